//! Operation dispatch: classify operand layout, pick an execution path,
//! run the fork-join tasks.
//!
//! Each of the four operation kinds has its own entry point; a generic
//! [`OpRef`] front door exists for callers that carry a kind-erased
//! descriptor. Complex element types never reach the task tree: they run a
//! strictly sequential element-at-a-time path in logical order.

use rayon::prelude::*;

use crate::layout::{choose_tensor_dimension, classify, tad_geometry, tensor1d_stats, Execution};
use crate::ops::{AccumulationOp, IndexAccumulationOp, ScalarOp, TransformOp};
use crate::task::{
    accumulation_task, index_accumulation_task, scalar_task, transform_task, SendPtr, Walk,
};
use crate::view::{NdView, NdViewMut, ViewLayout};
use crate::{
    Element, ExecError, Result, DEFAULT_PARALLEL_THRESHOLD, PARALLEL_THRESHOLD_ENV,
};

/// The execution engine. Holds the one tunable: the element count below
/// which a buffer task runs sequentially instead of splitting.
#[derive(Debug, Clone)]
pub struct OpExecutioner {
    threshold: usize,
}

impl Default for OpExecutioner {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

/// Kind-erased operation reference for the generic front door.
///
/// The four kinds are a closed set; dispatch over them is exhaustive.
pub enum OpRef<'d, T: Element> {
    Transform(&'d dyn TransformOp<T>),
    Scalar(&'d dyn ScalarOp<T>),
    Accumulation(&'d dyn AccumulationOp<T>),
    IndexAccumulation(&'d dyn IndexAccumulationOp<T>),
}

/// What a generic [`OpExecutioner::exec`] call produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpOutput<T> {
    /// The result was written into the destination view.
    Assigned,
    /// A scalar reduction value.
    Value(T),
    /// An index reduction position.
    Index(usize),
}

impl OpExecutioner {
    /// Engine with the default threshold of
    /// [`DEFAULT_PARALLEL_THRESHOLD`] elements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with an explicit threshold. Zero is rejected here, at
    /// configuration time, not at call time.
    pub fn with_threshold(threshold: usize) -> Result<Self> {
        if threshold == 0 {
            return Err(ExecError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    /// Engine honoring the `NDEXEC_PARALLEL_THRESHOLD` environment
    /// variable; invalid values warn and fall back to the default.
    pub fn from_env() -> Self {
        let mut threshold = DEFAULT_PARALLEL_THRESHOLD;
        if let Ok(raw) = std::env::var(PARALLEL_THRESHOLD_ENV) {
            match raw.parse::<usize>() {
                Ok(t) if t > 0 => threshold = t,
                _ => log::warn!(
                    "invalid {} value {:?}; using default threshold {}",
                    PARALLEL_THRESHOLD_ENV,
                    raw,
                    DEFAULT_PARALLEL_THRESHOLD
                ),
            }
        }
        Self { threshold }
    }

    /// The configured sequential threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    // ========================================================================
    // Generic front door
    // ========================================================================

    /// Dimension-less dispatch over a kind-erased descriptor.
    ///
    /// Transform and Scalar write into `z`; Accumulation and
    /// IndexAccumulation return their value/position.
    pub fn exec<T: Element>(
        &self,
        op: OpRef<'_, T>,
        x: &NdView<'_, T>,
        y: Option<&NdView<'_, T>>,
        z: Option<&mut NdViewMut<'_, T>>,
    ) -> Result<OpOutput<T>> {
        match op {
            OpRef::Transform(op) => {
                let z = z.ok_or(ExecError::MissingDestination(op.name()))?;
                self.transform_dispatch(op, x, y, z)?;
                Ok(OpOutput::Assigned)
            }
            OpRef::Scalar(op) => {
                let z = z.ok_or(ExecError::MissingDestination(op.name()))?;
                self.scalar(op, x, z)?;
                Ok(OpOutput::Assigned)
            }
            OpRef::Accumulation(op) => {
                let value = match y {
                    Some(y) => self.accumulate_pair(op, x, y)?,
                    None => self.accumulate(op, x)?,
                };
                Ok(OpOutput::Value(value))
            }
            OpRef::IndexAccumulation(op) => {
                let index = match y {
                    Some(y) => self.index_accumulate_pair(op, x, y)?,
                    None => self.index_accumulate(op, x)?,
                };
                Ok(OpOutput::Index(index))
            }
        }
    }

    /// Axis-wise dispatch over a kind-erased descriptor.
    ///
    /// Transform and Scalar ops behave identically axis-wise and whole-array,
    /// so after the axis list passes the same validation the reduction
    /// drivers perform they forward to [`exec`](Self::exec). Routing
    /// Accumulation or IndexAccumulation through here is a programming
    /// contract violation: those kinds have dedicated axis-wise drivers with
    /// different "along all dimensions" semantics.
    pub fn exec_axes<T: Element>(
        &self,
        op: OpRef<'_, T>,
        x: &NdView<'_, T>,
        y: Option<&NdView<'_, T>>,
        z: Option<&mut NdViewMut<'_, T>>,
        axes: &[usize],
    ) -> Result<OpOutput<T>> {
        match op {
            OpRef::Accumulation(op) => Err(ExecError::WrongEntryPoint {
                kind: "accumulation",
                name: op.name(),
            }),
            OpRef::IndexAccumulation(op) => Err(ExecError::WrongEntryPoint {
                kind: "index accumulation",
                name: op.name(),
            }),
            other => {
                crate::reduce::normalize_axes(x.rank(), axes)?;
                self.exec(other, x, y, z)
            }
        }
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    /// `z[i] = op(x[i])`
    pub fn transform<T, Op>(&self, op: &Op, x: &NdView<'_, T>, z: &mut NdViewMut<'_, T>) -> Result<()>
    where
        T: Element,
        Op: TransformOp<T> + ?Sized,
    {
        self.transform_dispatch(op, x, None, z)
    }

    /// `z[i] = op(x[i], y[i])`
    pub fn transform_pair<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        y: &NdView<'_, T>,
        z: &mut NdViewMut<'_, T>,
    ) -> Result<()>
    where
        T: Element,
        Op: TransformOp<T> + ?Sized,
    {
        self.transform_dispatch(op, x, Some(y), z)
    }

    /// In-place `x[i] = op(x[i])`.
    pub fn transform_inplace<T, Op>(&self, op: &Op, x: &mut NdViewMut<'_, T>) -> Result<()>
    where
        T: Element,
        Op: TransformOp<T> + ?Sized,
    {
        if op.is_pass_through() {
            let view = x.as_view();
            // Pass-through descriptors refuse aliased in-place execution for
            // safety; hand them a copy of the input.
            let dup = view.dup();
            return op.exec_pass_through(&dup.view(), None, x);
        }
        if T::IS_COMPLEX {
            for i in 0..x.len() {
                let v = op.apply(x.get_linear(i));
                x.put_linear(i, v);
            }
            return Ok(());
        }
        self.inplace_dispatch(|n, walk, threshold| transform_task(op, n, walk, None, walk, threshold), x)
    }

    /// In-place `x[i] = op(x[i], y[i])`.
    pub fn transform_pair_inplace<T, Op>(
        &self,
        op: &Op,
        x: &mut NdViewMut<'_, T>,
        y: &NdView<'_, T>,
    ) -> Result<()>
    where
        T: Element,
        Op: TransformOp<T> + ?Sized,
    {
        ensure_same_shape(x.shape(), y.shape())?;
        if op.is_pass_through() {
            let dup = x.as_view().dup();
            return op.exec_pass_through(&dup.view(), Some(y), x);
        }
        if T::IS_COMPLEX {
            for i in 0..x.len() {
                let v = op.apply_pair(x.get_linear(i), y.get_linear(i));
                x.put_linear(i, v);
            }
            return Ok(());
        }

        let xl: &dyn ViewLayout = &*x;
        let yl: &dyn ViewLayout = y;
        match classify(&[xl, yl]) {
            Execution::Direct => {
                let n = x.len();
                let x_walk = Walk::new(
                    SendPtr(x.base_ptr_mut()),
                    x.offset() as isize,
                    x.element_wise_stride().unwrap_or(1),
                );
                let y_walk = Walk::new(
                    SendPtr::from_const(y.base_ptr()),
                    y.offset() as isize,
                    y.element_wise_stride().unwrap_or(1),
                );
                transform_task(op, n, x_walk, Some(y_walk), x_walk, self.threshold);
                Ok(())
            }
            Execution::Decomposed => {
                let dim = {
                    let xl: &dyn ViewLayout = &*x;
                    let yl: &dyn ViewLayout = y;
                    choose_tensor_dimension(&[xl, yl])
                };
                let count = x.tensors_along_dimension(&[dim]);
                let x_geo = slice_geometry(&*x, dim, count);
                let y_geo = slice_geometry(y, dim, count);
                let xp = SendPtr(x.base_ptr_mut());
                let yp = SendPtr::from_const(y.base_ptr());
                let threshold = self.threshold;
                (0..count).into_par_iter().for_each(|i| {
                    let (xo, n, xs) = x_geo.resolve(i);
                    let (yo, _, ys) = y_geo.resolve(i);
                    let xw = Walk::new(xp, xo, xs);
                    transform_task(op, n, xw, Some(Walk::new(yp, yo, ys)), xw, threshold);
                });
                Ok(())
            }
        }
    }

    fn transform_dispatch<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        y: Option<&NdView<'_, T>>,
        z: &mut NdViewMut<'_, T>,
    ) -> Result<()>
    where
        T: Element,
        Op: TransformOp<T> + ?Sized,
    {
        if op.is_pass_through() {
            return op.exec_pass_through(x, y, z);
        }
        ensure_same_shape(x.shape(), z.shape())?;
        if let Some(y) = y {
            ensure_same_shape(x.shape(), y.shape())?;
        }

        if T::IS_COMPLEX {
            // Sequential fallback: one element at a time, logical order.
            for i in 0..x.len() {
                let v = match y {
                    Some(y) => op.apply_pair(x.get_linear(i), y.get_linear(i)),
                    None => op.apply(x.get_linear(i)),
                };
                z.put_linear(i, v);
            }
            return Ok(());
        }

        let mut layouts: Vec<&dyn ViewLayout> = vec![x];
        if let Some(y) = y {
            layouts.push(y);
        }
        let zl: &dyn ViewLayout = &*z;
        layouts.push(zl);

        match classify(&layouts) {
            Execution::Direct => {
                let n = x.len();
                let x_walk = Walk::new(
                    SendPtr::from_const(x.base_ptr()),
                    x.offset() as isize,
                    x.element_wise_stride().unwrap_or(1),
                );
                let y_walk = y.map(|y| {
                    Walk::new(
                        SendPtr::from_const(y.base_ptr()),
                        y.offset() as isize,
                        y.element_wise_stride().unwrap_or(1),
                    )
                });
                let z_walk = Walk::new(
                    SendPtr(z.base_ptr_mut()),
                    z.offset() as isize,
                    z.element_wise_stride().unwrap_or(1),
                );
                transform_task(op, n, x_walk, y_walk, z_walk, self.threshold);
                Ok(())
            }
            Execution::Decomposed => {
                let dim = choose_tensor_dimension(&layouts);
                let count = x.tensors_along_dimension(&[dim]);
                let x_geo = slice_geometry(x, dim, count);
                let y_geo = y.map(|y| slice_geometry(y, dim, count));
                let z_geo = slice_geometry(&*z, dim, count);
                let xp = SendPtr::from_const(x.base_ptr());
                let yp = y.map(|y| SendPtr::from_const(y.base_ptr()));
                let zp = SendPtr(z.base_ptr_mut());
                let threshold = self.threshold;
                (0..count).into_par_iter().for_each(|i| {
                    let (xo, n, xs) = x_geo.resolve(i);
                    let yw = match (&y_geo, yp) {
                        (Some(g), Some(p)) => {
                            let (yo, _, ys) = g.resolve(i);
                            Some(Walk::new(p, yo, ys))
                        }
                        _ => None,
                    };
                    let (zo, _, zs) = z_geo.resolve(i);
                    transform_task(
                        op,
                        n,
                        Walk::new(xp, xo, xs),
                        yw,
                        Walk::new(zp, zo, zs),
                        threshold,
                    );
                });
                Ok(())
            }
        }
    }

    fn inplace_dispatch<T, F>(&self, run: F, x: &mut NdViewMut<'_, T>) -> Result<()>
    where
        T: Element,
        F: Fn(usize, Walk<T>, usize) + Sync,
    {
        let xl: &dyn ViewLayout = &*x;
        match classify(&[xl]) {
            Execution::Direct => {
                let n = x.len();
                let offset = x.offset() as isize;
                let stride = x.element_wise_stride().unwrap_or(1);
                let walk = Walk::new(SendPtr(x.base_ptr_mut()), offset, stride);
                run(n, walk, self.threshold);
                Ok(())
            }
            Execution::Decomposed => {
                let dim = {
                    let xl: &dyn ViewLayout = &*x;
                    choose_tensor_dimension(&[xl])
                };
                let count = x.tensors_along_dimension(&[dim]);
                let geo = slice_geometry(&*x, dim, count);
                let ptr = SendPtr(x.base_ptr_mut());
                let threshold = self.threshold;
                (0..count).into_par_iter().for_each(|i| {
                    let (off, n, stride) = geo.resolve(i);
                    run(n, Walk::new(ptr, off, stride), threshold);
                });
                Ok(())
            }
        }
    }

    // ========================================================================
    // Scalar ops
    // ========================================================================

    /// `z[i] = op(x[i])` with the descriptor's captured constant.
    pub fn scalar<T, Op>(&self, op: &Op, x: &NdView<'_, T>, z: &mut NdViewMut<'_, T>) -> Result<()>
    where
        T: Element,
        Op: ScalarOp<T> + ?Sized,
    {
        if op.is_pass_through() {
            return op.exec_pass_through(x, z);
        }
        ensure_same_shape(x.shape(), z.shape())?;

        if T::IS_COMPLEX {
            for i in 0..x.len() {
                let v = op.apply(x.get_linear(i));
                z.put_linear(i, v);
            }
            return Ok(());
        }

        let xl: &dyn ViewLayout = x;
        let zl: &dyn ViewLayout = &*z;
        match classify(&[xl, zl]) {
            Execution::Direct => {
                let n = x.len();
                let x_walk = Walk::new(
                    SendPtr::from_const(x.base_ptr()),
                    x.offset() as isize,
                    x.element_wise_stride().unwrap_or(1),
                );
                let z_walk = Walk::new(
                    SendPtr(z.base_ptr_mut()),
                    z.offset() as isize,
                    z.element_wise_stride().unwrap_or(1),
                );
                scalar_task(op, n, x_walk, z_walk, self.threshold);
                Ok(())
            }
            Execution::Decomposed => {
                let dim = {
                    let xl: &dyn ViewLayout = x;
                    let zl: &dyn ViewLayout = &*z;
                    choose_tensor_dimension(&[xl, zl])
                };
                let count = x.tensors_along_dimension(&[dim]);
                let x_geo = slice_geometry(x, dim, count);
                let z_geo = slice_geometry(&*z, dim, count);
                let xp = SendPtr::from_const(x.base_ptr());
                let zp = SendPtr(z.base_ptr_mut());
                let threshold = self.threshold;
                (0..count).into_par_iter().for_each(|i| {
                    let (xo, n, xs) = x_geo.resolve(i);
                    let (zo, _, zs) = z_geo.resolve(i);
                    scalar_task(op, n, Walk::new(xp, xo, xs), Walk::new(zp, zo, zs), threshold);
                });
                Ok(())
            }
        }
    }

    /// In-place `x[i] = op(x[i])` with the captured constant.
    pub fn scalar_inplace<T, Op>(&self, op: &Op, x: &mut NdViewMut<'_, T>) -> Result<()>
    where
        T: Element,
        Op: ScalarOp<T> + ?Sized,
    {
        if op.is_pass_through() {
            let dup = x.as_view().dup();
            return op.exec_pass_through(&dup.view(), x);
        }
        if T::IS_COMPLEX {
            for i in 0..x.len() {
                let v = op.apply(x.get_linear(i));
                x.put_linear(i, v);
            }
            return Ok(());
        }
        self.inplace_dispatch(|n, walk, threshold| scalar_task(op, n, walk, walk, threshold), x)
    }

    // ========================================================================
    // Accumulations
    // ========================================================================

    /// Reduce the whole view to a scalar.
    pub fn accumulate<T, Op>(&self, op: &Op, x: &NdView<'_, T>) -> Result<T>
    where
        T: Element,
        Op: AccumulationOp<T> + ?Sized,
    {
        if op.is_pass_through() {
            return op.exec_pass_through(x, None);
        }
        Ok(self.accum_view(op, x, None))
    }

    /// Two-operand reduction, e.g. a dot product.
    pub fn accumulate_pair<T, Op>(&self, op: &Op, x: &NdView<'_, T>, y: &NdView<'_, T>) -> Result<T>
    where
        T: Element,
        Op: AccumulationOp<T> + ?Sized,
    {
        if op.is_pass_through() {
            return op.exec_pass_through(x, Some(y));
        }
        ensure_same_shape(x.shape(), y.shape())?;
        Ok(self.accum_view(op, x, Some(y)))
    }

    /// Accumulation over one view (pair optional), any layout. Shapes are
    /// already validated.
    pub(crate) fn accum_view<T, Op>(&self, op: &Op, x: &NdView<'_, T>, y: Option<&NdView<'_, T>>) -> T
    where
        T: Element,
        Op: AccumulationOp<T> + ?Sized,
    {
        if T::IS_COMPLEX {
            let mut acc = op.init();
            for i in 0..x.len() {
                let v = match y {
                    Some(y) => op.map_pair(x.get_linear(i), y.get_linear(i)),
                    None => op.map(x.get_linear(i)),
                };
                acc = op.update(acc, v);
            }
            return acc;
        }

        let mut layouts: Vec<&dyn ViewLayout> = vec![x];
        if let Some(y) = y {
            layouts.push(y);
        }

        match classify(&layouts) {
            Execution::Direct => {
                let x_walk = Walk::new(
                    SendPtr::from_const(x.base_ptr()),
                    x.offset() as isize,
                    x.element_wise_stride().unwrap_or(1),
                );
                let y_walk = y.map(|y| {
                    Walk::new(
                        SendPtr::from_const(y.base_ptr()),
                        y.offset() as isize,
                        y.element_wise_stride().unwrap_or(1),
                    )
                });
                accumulation_task(op, x.len(), x_walk, y_walk, self.threshold)
            }
            Execution::Decomposed => {
                let dim = choose_tensor_dimension(&layouts);
                let count = x.tensors_along_dimension(&[dim]);
                let x_geo = slice_geometry(x, dim, count);
                let y_geo = y.map(|y| slice_geometry(y, dim, count));
                let xp = SendPtr::from_const(x.base_ptr());
                let yp = y.map(|y| SendPtr::from_const(y.base_ptr()));
                let threshold = self.threshold;
                let partials: Vec<T> = (0..count)
                    .into_par_iter()
                    .map(|i| {
                        let (xo, n, xs) = x_geo.resolve(i);
                        let yw = match (&y_geo, yp) {
                            (Some(g), Some(p)) => {
                                let (yo, _, ys) = g.resolve(i);
                                Some(Walk::new(p, yo, ys))
                            }
                            _ => None,
                        };
                        accumulation_task(op, n, Walk::new(xp, xo, xs), yw, threshold)
                    })
                    .collect();
                // Combine in slice order so non-commutative combiners see
                // their halves in sequence order.
                let mut iter = partials.into_iter();
                match iter.next() {
                    Some(first) => iter.fold(first, |acc, p| op.combine(acc, p)),
                    None => op.init(),
                }
            }
        }
    }

    // ========================================================================
    // Index accumulations
    // ========================================================================

    /// Position of the extremum over the whole view, in logical row-major
    /// order.
    pub fn index_accumulate<T, Op>(&self, op: &Op, x: &NdView<'_, T>) -> Result<usize>
    where
        T: Element,
        Op: IndexAccumulationOp<T> + ?Sized,
    {
        if op.is_pass_through() {
            return op.exec_pass_through(x, None);
        }
        self.index_view(op, x, None)
    }

    /// Two-operand index reduction.
    pub fn index_accumulate_pair<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        y: &NdView<'_, T>,
    ) -> Result<usize>
    where
        T: Element,
        Op: IndexAccumulationOp<T> + ?Sized,
    {
        if op.is_pass_through() {
            return op.exec_pass_through(x, Some(y));
        }
        ensure_same_shape(x.shape(), y.shape())?;
        self.index_view(op, x, Some(y))
    }

    pub(crate) fn index_view<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        y: Option<&NdView<'_, T>>,
    ) -> Result<usize>
    where
        T: Element,
        Op: IndexAccumulationOp<T> + ?Sized,
    {
        if x.is_empty() {
            return Err(ExecError::EmptyInput);
        }

        if T::IS_COMPLEX {
            let at = |i: usize| match y {
                Some(y) => op.map_pair(x.get_linear(i), y.get_linear(i)),
                None => op.map(x.get_linear(i)),
            };
            let mut best = at(0);
            let mut best_idx = 0usize;
            for i in 1..x.len() {
                let v = at(i);
                if op.improves(best, v) {
                    best = v;
                    best_idx = i;
                }
            }
            return Ok(best_idx);
        }

        let mut layouts: Vec<&dyn ViewLayout> = vec![x];
        if let Some(y) = y {
            layouts.push(y);
        }

        let partial = match classify(&layouts) {
            Execution::Direct => {
                let x_walk = Walk::new(
                    SendPtr::from_const(x.base_ptr()),
                    x.offset() as isize,
                    x.element_wise_stride().unwrap_or(1),
                );
                let y_walk = y.map(|y| {
                    Walk::new(
                        SendPtr::from_const(y.base_ptr()),
                        y.offset() as isize,
                        y.element_wise_stride().unwrap_or(1),
                    )
                });
                index_accumulation_task(op, x.len(), 0, x_walk, y_walk, self.threshold)
            }
            Execution::Decomposed => {
                // Decompose along the last axis so sub-tensor enumeration
                // order equals logical row-major order: slice i covers
                // absolute positions [i * len, (i + 1) * len).
                let dim = x.rank() - 1;
                let count = x.tensors_along_dimension(&[dim]);
                let slice_len = x.shape()[dim];
                let x_geo = slice_geometry(x, dim, count);
                let y_geo = y.map(|y| slice_geometry(y, dim, count));
                let xp = SendPtr::from_const(x.base_ptr());
                let yp = y.map(|y| SendPtr::from_const(y.base_ptr()));
                let threshold = self.threshold;
                let partials: Vec<_> = (0..count)
                    .into_par_iter()
                    .map(|i| {
                        let (xo, n, xs) = x_geo.resolve(i);
                        let yw = match (&y_geo, yp) {
                            (Some(g), Some(p)) => {
                                let (yo, _, ys) = g.resolve(i);
                                Some(Walk::new(p, yo, ys))
                            }
                            _ => None,
                        };
                        index_accumulation_task(
                            op,
                            n,
                            i * slice_len,
                            Walk::new(xp, xo, xs),
                            yw,
                            threshold,
                        )
                    })
                    .collect();
                let mut iter = partials.into_iter();
                let first = iter.next().ok_or(ExecError::EmptyInput)?;
                iter.fold(first, |best, p| {
                    crate::task::merge_index_partials(op, best, p)
                })
            }
        };

        partial.index.ok_or(ExecError::EmptyInput)
    }

    // ========================================================================
    // Row/column iteration helpers
    // ========================================================================

    /// Apply a transform independently to every row (last-axis sub-tensor)
    /// of `x`, writing into the matching rows of `z`.
    ///
    /// Convenience wrapper over the front door: each row is copied out,
    /// transformed, and copied back. Vector inputs degenerate to a single
    /// whole-view transform.
    pub fn for_each_row<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        y: Option<&NdView<'_, T>>,
        z: &mut NdViewMut<'_, T>,
    ) -> Result<()>
    where
        T: Element,
        Op: TransformOp<T> + ?Sized,
    {
        if x.is_vector() || x.rank() <= 1 {
            return self.transform_dispatch(op, x, y, z);
        }
        self.iterate_tads(op, x, y, z, x.rank() - 1)
    }

    /// Apply a transform independently to every column (axis-0 sub-tensor)
    /// of `x`, writing into the matching columns of `z`.
    pub fn for_each_column<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        y: Option<&NdView<'_, T>>,
        z: &mut NdViewMut<'_, T>,
    ) -> Result<()>
    where
        T: Element,
        Op: TransformOp<T> + ?Sized,
    {
        if x.is_vector() || x.rank() <= 1 {
            return self.transform_dispatch(op, x, y, z);
        }
        self.iterate_tads(op, x, y, z, 0)
    }

    fn iterate_tads<T, Op>(
        &self,
        op: &Op,
        x: &NdView<'_, T>,
        y: Option<&NdView<'_, T>>,
        z: &mut NdViewMut<'_, T>,
        dim: usize,
    ) -> Result<()>
    where
        T: Element,
        Op: TransformOp<T> + ?Sized,
    {
        ensure_same_shape(x.shape(), z.shape())?;
        if let Some(y) = y {
            ensure_same_shape(x.shape(), y.shape())?;
        }
        let count = x.tensors_along_dimension(&[dim]);
        for i in 0..count {
            // Work on copies so strided sources and destinations never alias.
            let xr = x.tensor_along_dimension(i, &[dim]).dup();
            let yr = y.map(|y| y.tensor_along_dimension(i, &[dim]).dup());
            let mut out = xr.clone();
            self.transform_dispatch(
                op,
                &xr.view(),
                yr.as_ref().map(|a| a.view()).as_ref(),
                &mut out.view_mut(),
            )?;
            let (zo, n, zs) = tad_geometry(&*z, i, &[dim]);
            for (k, &v) in out.data().iter().enumerate().take(n) {
                z.put_flat((zo + k as isize * zs) as usize, v);
            }
        }
        Ok(())
    }
}

/// Per-slice `(offset, len, stride)` geometry: O(1) rank-2 stats, or a
/// table derived up front for higher ranks.
pub(crate) enum SliceGeometry {
    Stats(crate::layout::Tensor1dStats),
    Table(Vec<(isize, usize, isize)>),
}

impl SliceGeometry {
    pub(crate) fn resolve(&self, i: usize) -> (isize, usize, isize) {
        match self {
            SliceGeometry::Stats(s) => (s.offset(i), s.len, s.stride),
            SliceGeometry::Table(t) => t[i],
        }
    }
}

pub(crate) fn slice_geometry(view: &dyn ViewLayout, dim: usize, count: usize) -> SliceGeometry {
    if view.rank() == 2 {
        SliceGeometry::Stats(tensor1d_stats(view, dim))
    } else {
        SliceGeometry::Table((0..count).map(|i| tad_geometry(view, i, &[dim])).collect())
    }
}

fn ensure_same_shape(a: &[usize], b: &[usize]) -> Result<()> {
    if a != b {
        return Err(ExecError::ShapeMismatch(a.to_vec(), b.to_vec()));
    }
    Ok(())
}
