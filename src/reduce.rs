//! Axis-wise reduction drivers.
//!
//! A reduction along a set of axes decomposes the input into sub-tensors
//! spanning those axes and reduces each one independently; sub-tensor `i`
//! fills output slot `i`. Sub-tensor enumeration walks the retained axes in
//! row-major order, which is exactly the output's own element order, so the
//! fan-out is an embarrassingly parallel write of disjoint slots.

use rayon::prelude::*;

use crate::executioner::{slice_geometry, OpExecutioner};
use crate::ops::{AccumulationOp, IndexAccumulationOp};
use crate::task::{accumulation_task, index_accumulation_task, SendPtr, Walk};
use crate::view::{DimVec, NdArray, NdView, ViewLayout};
use crate::{Element, ExecError, Result};

impl OpExecutioner {
    /// Reduce `x` along `axes`, producing one scalar per retained-axis
    /// combination.
    ///
    /// Reducing every axis yields a `[1, 1]` array. Reducing a matrix down
    /// to one retained axis keeps the orientation of that axis: retaining
    /// axis 0 gives a `[k, 1]` column, retaining a later axis gives a
    /// `[1, k]` row.
    pub fn accumulate_along<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        axes: &[usize],
    ) -> Result<NdArray<T>>
    where
        T: Element,
        Op: AccumulationOp<T> + ?Sized,
    {
        self.accumulate_along_impl(op, x, None, axes)
    }

    /// Two-operand reduction along `axes`, e.g. a per-row dot product.
    pub fn accumulate_pair_along<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        y: &NdView<'_, T>,
        axes: &[usize],
    ) -> Result<NdArray<T>>
    where
        T: Element,
        Op: AccumulationOp<T> + ?Sized,
    {
        if x.shape() != y.shape() {
            return Err(ExecError::ShapeMismatch(
                x.shape().to_vec(),
                y.shape().to_vec(),
            ));
        }
        self.accumulate_along_impl(op, x, Some(y), axes)
    }

    fn accumulate_along_impl<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        y: Option<&NdView<'_, T>>,
        axes: &[usize],
    ) -> Result<NdArray<T>>
    where
        T: Element,
        Op: AccumulationOp<T> + ?Sized,
    {
        if op.is_pass_through() {
            let value = op.exec_pass_through(x, y)?;
            return Ok(NdArray::from_parts(vec![value], &[1, 1]));
        }
        let axes = normalize_axes(x.rank(), axes)?;

        if axes.len() == x.rank() {
            // Reducing every axis is the whole-view reduction.
            let value = self.accum_view(op, x, y);
            return Ok(NdArray::from_parts(vec![value], &[1, 1]));
        }

        let out_shape = reduced_shape(x.shape(), &axes);
        let count: usize = retained_extents(x.shape(), &axes).iter().product();
        // Complex slots stay off the task tree: the fan-out below runs them
        // sequentially, and each slot's fold must not split either.
        let threshold = if T::IS_COMPLEX {
            usize::MAX
        } else {
            self.threshold()
        };

        let slots: Vec<T> = if axes.len() == 1 {
            let dim = axes[0];
            let x_geo = slice_geometry(x, dim, count);
            let y_geo = y.map(|y| slice_geometry(y, dim, count));
            let xp = SendPtr::from_const(x.base_ptr());
            let yp = y.map(|y| SendPtr::from_const(y.base_ptr()));
            let slot = |i: usize| {
                let (xo, n, xs) = x_geo.resolve(i);
                let yw = match (&y_geo, yp) {
                    (Some(g), Some(p)) => {
                        let (yo, _, ys) = g.resolve(i);
                        Some(Walk::new(p, yo, ys))
                    }
                    _ => None,
                };
                accumulation_task(op, n, Walk::new(xp, xo, xs), yw, threshold)
            };
            if T::IS_COMPLEX {
                (0..count).map(slot).collect()
            } else {
                (0..count).into_par_iter().map(slot).collect()
            }
        } else {
            // Multi-axis sub-tensors reduce through the whole-view path,
            // which re-classifies each sub-tensor's own layout.
            let slot = |i: usize| {
                let sub = x.tensor_along_dimension(i, &axes);
                let y_sub = y.map(|y| y.tensor_along_dimension(i, &axes));
                self.accum_view(op, &sub, y_sub.as_ref())
            };
            if T::IS_COMPLEX {
                (0..count).map(slot).collect()
            } else {
                (0..count).into_par_iter().map(slot).collect()
            }
        };

        Ok(NdArray::from_parts(slots, &out_shape))
    }

    /// Index reduction along `axes`: each output slot holds the winning
    /// position *within* its sub-tensor, in the sub-tensor's row-major
    /// order. For a single axis that is simply the position along that axis.
    pub fn index_accumulate_along<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        axes: &[usize],
    ) -> Result<NdArray<usize>>
    where
        T: Element,
        Op: IndexAccumulationOp<T> + ?Sized,
    {
        self.index_accumulate_along_impl(op, x, None, axes)
    }

    /// Two-operand index reduction along `axes`.
    pub fn index_accumulate_pair_along<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        y: &NdView<'_, T>,
        axes: &[usize],
    ) -> Result<NdArray<usize>>
    where
        T: Element,
        Op: IndexAccumulationOp<T> + ?Sized,
    {
        if x.shape() != y.shape() {
            return Err(ExecError::ShapeMismatch(
                x.shape().to_vec(),
                y.shape().to_vec(),
            ));
        }
        self.index_accumulate_along_impl(op, x, Some(y), axes)
    }

    fn index_accumulate_along_impl<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        y: Option<&NdView<'_, T>>,
        axes: &[usize],
    ) -> Result<NdArray<usize>>
    where
        T: Element,
        Op: IndexAccumulationOp<T> + ?Sized,
    {
        if op.is_pass_through() {
            let index = op.exec_pass_through(x, y)?;
            return Ok(NdArray::from_parts(vec![index], &[1, 1]));
        }
        let axes = normalize_axes(x.rank(), axes)?;

        let reduced_len: usize = axes.iter().map(|&a| x.shape()[a]).product();
        if reduced_len == 0 {
            return Err(ExecError::EmptyInput);
        }

        if axes.len() == x.rank() {
            let index = self.index_view(op, x, y)?;
            return Ok(NdArray::from_parts(vec![index], &[1, 1]));
        }

        let out_shape = reduced_shape(x.shape(), &axes);
        let count: usize = retained_extents(x.shape(), &axes).iter().product();
        let threshold = if T::IS_COMPLEX {
            usize::MAX
        } else {
            self.threshold()
        };

        let slots: Vec<usize> = if axes.len() == 1 {
            let dim = axes[0];
            let x_geo = slice_geometry(x, dim, count);
            let y_geo = y.map(|y| slice_geometry(y, dim, count));
            let xp = SendPtr::from_const(x.base_ptr());
            let yp = y.map(|y| SendPtr::from_const(y.base_ptr()));
            let slot = |i: usize| -> Result<usize> {
                let (xo, n, xs) = x_geo.resolve(i);
                let yw = match (&y_geo, yp) {
                    (Some(g), Some(p)) => {
                        let (yo, _, ys) = g.resolve(i);
                        Some(Walk::new(p, yo, ys))
                    }
                    _ => None,
                };
                let partial =
                    index_accumulation_task(op, n, 0, Walk::new(xp, xo, xs), yw, threshold);
                partial.index.ok_or(ExecError::EmptyInput)
            };
            if T::IS_COMPLEX {
                (0..count).map(slot).collect::<Result<_>>()?
            } else {
                (0..count)
                    .into_par_iter()
                    .map(slot)
                    .collect::<Result<_>>()?
            }
        } else {
            let slot = |i: usize| -> Result<usize> {
                let sub = x.tensor_along_dimension(i, &axes);
                let y_sub = y.map(|y| y.tensor_along_dimension(i, &axes));
                self.index_view(op, &sub, y_sub.as_ref())
            };
            if T::IS_COMPLEX {
                (0..count).map(slot).collect::<Result<_>>()?
            } else {
                (0..count)
                    .into_par_iter()
                    .map(slot)
                    .collect::<Result<_>>()?
            }
        };

        Ok(NdArray::from_parts(slots, &out_shape))
    }
}

/// Validate, sort, and dedup a reduction axis list.
pub(crate) fn normalize_axes(rank: usize, axes: &[usize]) -> Result<DimVec> {
    if axes.is_empty() {
        return Err(ExecError::EmptyAxes);
    }
    let mut norm: DimVec = DimVec::new();
    for &axis in axes {
        if axis >= rank {
            return Err(ExecError::InvalidAxis { axis, rank });
        }
        norm.push(axis);
    }
    norm.sort_unstable();
    norm.dedup();
    Ok(norm)
}

/// Extents of the retained (non-reduced) axes, in axis order.
fn retained_extents(shape: &[usize], axes: &DimVec) -> DimVec {
    shape
        .iter()
        .enumerate()
        .filter(|(k, _)| !axes.contains(k))
        .map(|(_, &e)| e)
        .collect()
}

/// Output shape after reducing `axes`. A single retained axis keeps its
/// orientation: axis 0 stays a column, anything later becomes a row.
fn reduced_shape(shape: &[usize], axes: &DimVec) -> DimVec {
    let retained: DimVec = (0..shape.len()).filter(|k| !axes.contains(k)).collect();
    match retained.len() {
        0 => DimVec::from_slice(&[1, 1]),
        1 => {
            let k = retained[0];
            if k == 0 {
                DimVec::from_slice(&[shape[k], 1])
            } else {
                DimVec::from_slice(&[1, shape[k]])
            }
        }
        _ => retained.iter().map(|&k| shape[k]).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{ArgMax, ArgMin, Dot, Max, Sum};
    use num_complex::Complex64;

    fn matrix_2x3() -> NdArray<f64> {
        // [[1, 2, 3],
        //  [4, 5, 6]]
        NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap()
    }

    #[test]
    fn sum_along_axis0_gives_row() {
        let m = matrix_2x3();
        let exec = OpExecutioner::with_threshold(1).unwrap();
        let out = exec.accumulate_along(&Sum, &m.view(), &[0]).unwrap();
        assert_eq!(out.shape(), &[1, 3]);
        assert_eq!(out.data(), &[5.0, 7.0, 9.0]);
    }

    #[test]
    fn sum_along_axis1_gives_column() {
        let m = matrix_2x3();
        let exec = OpExecutioner::with_threshold(1).unwrap();
        let out = exec.accumulate_along(&Sum, &m.view(), &[1]).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        assert_eq!(out.data(), &[6.0, 15.0]);
    }

    #[test]
    fn sum_along_all_axes_gives_scalar() {
        let m = matrix_2x3();
        let exec = OpExecutioner::new();
        let out = exec.accumulate_along(&Sum, &m.view(), &[0, 1]).unwrap();
        assert_eq!(out.shape(), &[1, 1]);
        assert_eq!(out.data(), &[21.0]);
    }

    #[test]
    fn duplicate_axes_normalize() {
        let m = matrix_2x3();
        let exec = OpExecutioner::new();
        let out = exec.accumulate_along(&Sum, &m.view(), &[1, 1, 1]).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        assert_eq!(out.data(), &[6.0, 15.0]);
    }

    #[test]
    fn axis_validation() {
        let m = matrix_2x3();
        let exec = OpExecutioner::new();
        assert!(matches!(
            exec.accumulate_along(&Sum, &m.view(), &[]),
            Err(ExecError::EmptyAxes)
        ));
        assert!(matches!(
            exec.accumulate_along(&Sum, &m.view(), &[2]),
            Err(ExecError::InvalidAxis { axis: 2, rank: 2 })
        ));
    }

    #[test]
    fn rank3_sum_along_middle_axis() {
        // Shape [2, 3, 4], values 0..24 row-major.
        let data: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let a = NdArray::from_vec(data, &[2, 3, 4]).unwrap();
        let exec = OpExecutioner::with_threshold(1).unwrap();
        let out = exec.accumulate_along(&Sum, &a.view(), &[1]).unwrap();
        assert_eq!(out.shape(), &[2, 4]);
        // Slot (i, k) = sum over j of a[i][j][k].
        for i in 0..2 {
            for k in 0..4 {
                let expected: f64 = (0..3).map(|j| (i * 12 + j * 4 + k) as f64).sum();
                assert_eq!(out.get(&[i, k]), expected);
            }
        }
    }

    #[test]
    fn rank3_multi_axis_reduction() {
        let data: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let a = NdArray::from_vec(data, &[2, 3, 4]).unwrap();
        let exec = OpExecutioner::with_threshold(1).unwrap();
        let out = exec.accumulate_along(&Sum, &a.view(), &[0, 2]).unwrap();
        // Single retained axis 1 of extent 3, not axis 0: a row.
        assert_eq!(out.shape(), &[1, 3]);
        for j in 0..3 {
            let expected: f64 = (0..2)
                .flat_map(|i| (0..4).map(move |k| (i * 12 + j * 4 + k) as f64))
                .sum();
            assert_eq!(out.data()[j], expected);
        }
    }

    #[test]
    fn transposed_view_reduces_like_logical_layout() {
        // Column-major storage of the logical 2x3 matrix.
        let data = vec![1.0f64, 4.0, 2.0, 5.0, 3.0, 6.0];
        let v = NdView::new(&data, &[2, 3], &[1, 2], 0).unwrap();
        let exec = OpExecutioner::with_threshold(1).unwrap();
        let out = exec.accumulate_along(&Sum, &v, &[0]).unwrap();
        assert_eq!(out.shape(), &[1, 3]);
        assert_eq!(out.data(), &[5.0, 7.0, 9.0]);
    }

    #[test]
    fn max_along_axis_threshold_independent() {
        let data: Vec<f64> = (0..60).map(|i| ((i * 13) % 60) as f64).collect();
        let a = NdArray::from_vec(data, &[6, 10]).unwrap();
        let exec_seq = OpExecutioner::with_threshold(1_000_000).unwrap();
        let expected = exec_seq.accumulate_along(&Max, &a.view(), &[1]).unwrap();
        for threshold in [1usize, 2, 8] {
            let exec = OpExecutioner::with_threshold(threshold).unwrap();
            let out = exec.accumulate_along(&Max, &a.view(), &[1]).unwrap();
            assert_eq!(out, expected, "threshold {}", threshold);
        }
    }

    #[test]
    fn dot_pair_along_rows() {
        let a = matrix_2x3();
        let b = NdArray::from_vec(vec![1.0; 6], &[2, 3]).unwrap();
        let exec = OpExecutioner::with_threshold(1).unwrap();
        let out = exec
            .accumulate_pair_along(&Dot, &a.view(), &b.view(), &[1])
            .unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        assert_eq!(out.data(), &[6.0, 15.0]);
    }

    #[test]
    fn argmax_along_rows_and_columns() {
        // [[3, 9, 1],
        //  [8, 2, 8]]
        let m = NdArray::from_vec(vec![3.0, 9.0, 1.0, 8.0, 2.0, 8.0], &[2, 3]).unwrap();
        let exec = OpExecutioner::with_threshold(1).unwrap();

        let rows = exec.index_accumulate_along(&ArgMax, &m.view(), &[1]).unwrap();
        assert_eq!(rows.shape(), &[2, 1]);
        // Row 1 ties at positions 0 and 2; the first occurrence wins.
        assert_eq!(rows.data(), &[1, 0]);

        let cols = exec.index_accumulate_along(&ArgMax, &m.view(), &[0]).unwrap();
        assert_eq!(cols.shape(), &[1, 3]);
        assert_eq!(cols.data(), &[1, 0, 1]);
    }

    #[test]
    fn argmin_along_all_axes() {
        let m = matrix_2x3();
        let exec = OpExecutioner::new();
        let out = exec.index_accumulate_along(&ArgMin, &m.view(), &[0, 1]).unwrap();
        assert_eq!(out.shape(), &[1, 1]);
        assert_eq!(out.data(), &[0]);
    }

    #[test]
    fn index_reduction_over_empty_axis_errors() {
        let data: Vec<f64> = vec![];
        let v = NdView::new(&data, &[0, 3], &[3, 1], 0).unwrap();
        let exec = OpExecutioner::new();
        assert!(matches!(
            exec.index_accumulate_along(&ArgMax, &v, &[0]),
            Err(ExecError::EmptyInput)
        ));
    }

    #[test]
    fn complex_axis_reduction_stays_sequential() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        // combine is only reachable from a fork-join split, so a nonzero
        // count means a complex slot entered the task tree.
        struct CountingSum {
            merges: AtomicUsize,
        }

        impl AccumulationOp<Complex64> for CountingSum {
            fn name(&self) -> &'static str {
                "counting_sum"
            }

            fn init(&self) -> Complex64 {
                Complex64::new(0.0, 0.0)
            }

            fn update(&self, acc: Complex64, value: Complex64) -> Complex64 {
                acc + value
            }

            fn combine(&self, first: Complex64, second: Complex64) -> Complex64 {
                self.merges.fetch_add(1, Ordering::Relaxed);
                first + second
            }
        }

        let data: Vec<Complex64> = (0..8).map(|i| Complex64::new(i as f64, 0.0)).collect();
        let a = NdArray::from_vec(data, &[2, 4]).unwrap();
        let op = CountingSum {
            merges: AtomicUsize::new(0),
        };
        let exec = OpExecutioner::with_threshold(1).unwrap();
        let out = exec.accumulate_along(&op, &a.view(), &[1]).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        assert_eq!(out.data()[0], Complex64::new(6.0, 0.0));
        assert_eq!(out.data()[1], Complex64::new(22.0, 0.0));
        assert_eq!(op.merges.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn complex_argmax_along_axis_with_tiny_threshold() {
        // Moduli: row 0 is [5, 5, 1] and the tie keeps position 0; row 1 is
        // [2, 7, 7] and position 1 wins.
        let data = vec![
            Complex64::new(3.0, 4.0),
            Complex64::new(5.0, 0.0),
            Complex64::new(1.0, 0.0),
            Complex64::new(0.0, 2.0),
            Complex64::new(7.0, 0.0),
            Complex64::new(0.0, -7.0),
        ];
        let a = NdArray::from_vec(data, &[2, 3]).unwrap();
        let exec = OpExecutioner::with_threshold(1).unwrap();
        let out = exec.index_accumulate_along(&ArgMax, &a.view(), &[1]).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        assert_eq!(out.data(), &[0, 1]);
    }

    // Position of the largest elementwise gap between two views.
    struct ArgMaxGap;

    impl IndexAccumulationOp<f64> for ArgMaxGap {
        fn name(&self) -> &'static str {
            "argmax_gap"
        }

        fn map_pair(&self, x: f64, y: f64) -> f64 {
            (x - y).abs()
        }

        fn improves(&self, best: f64, candidate: f64) -> bool {
            candidate > best
        }
    }

    #[test]
    fn index_pair_along_rows() {
        let x = NdArray::from_vec(vec![1.0, 5.0, 3.0, 2.0, 2.0, 9.0], &[2, 3]).unwrap();
        let y = NdArray::from_vec(vec![1.0, 1.0, 9.0, 2.0, 8.0, 2.0], &[2, 3]).unwrap();
        // Gaps: [[0, 4, 6], [0, 6, 7]].
        for threshold in [1usize, 100] {
            let exec = OpExecutioner::with_threshold(threshold).unwrap();
            let out = exec
                .index_accumulate_pair_along(&ArgMaxGap, &x.view(), &y.view(), &[1])
                .unwrap();
            assert_eq!(out.shape(), &[2, 1]);
            assert_eq!(out.data(), &[2, 2]);
        }
    }

    #[test]
    fn index_pair_along_shape_mismatch() {
        let x = NdArray::from_vec(vec![0.0; 6], &[2, 3]).unwrap();
        let y = NdArray::from_vec(vec![0.0; 4], &[2, 2]).unwrap();
        let exec = OpExecutioner::new();
        assert!(matches!(
            exec.index_accumulate_pair_along(&ArgMaxGap, &x.view(), &y.view(), &[1]),
            Err(ExecError::ShapeMismatch(..))
        ));
    }

    #[test]
    fn complex_sum_along_axis() {
        let data: Vec<Complex64> = (0..6)
            .map(|i| Complex64::new(i as f64, 2.0 * i as f64))
            .collect();
        let a = NdArray::from_vec(data, &[2, 3]).unwrap();
        let exec = OpExecutioner::with_threshold(1).unwrap();
        let out = exec.accumulate_along(&Sum, &a.view(), &[1]).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        assert_eq!(out.data()[0], Complex64::new(3.0, 6.0));
        assert_eq!(out.data()[1], Complex64::new(12.0, 24.0));
    }
}
