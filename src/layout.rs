//! Layout classification: direct vs. decomposed execution.
//!
//! An operation can run as a single flat pass over the backing buffers only
//! when every operand can be walked with one fixed element stride. When any
//! operand cannot, the operands are decomposed into maximal uniformly
//! strided 1-D slices ("tensors along a dimension") and the operation runs
//! once per slice. Classification is pure: it never touches element data.

use crate::view::{tad_offset, ViewLayout};

/// How an operation will be executed over its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// One flat pass per operand buffer with a fixed element stride.
    Direct,
    /// Split into 1-D sub-tensors first, one buffer pass per sub-tensor.
    Decomposed,
}

/// Classify a set of same-shaped operand views.
///
/// Direct requires a uniform element-wise stride on every operand. Output
/// aliasing beyond identity (partial overlap between distinct buffers)
/// cannot be expressed through the safe view API, so no overlap analysis
/// happens here.
pub fn classify(views: &[&dyn ViewLayout]) -> Execution {
    if views
        .iter()
        .all(|v| v.element_wise_stride().is_some())
    {
        Execution::Direct
    } else {
        Execution::Decomposed
    }
}

/// Pick the axis along which to slice operands into 1-D sub-tensors.
///
/// Prefers the axis yielding the fewest, longest slices: the largest
/// extent, with ties broken toward the smallest combined stride magnitude
/// across all operands (the most contiguous walk).
pub fn choose_tensor_dimension(views: &[&dyn ViewLayout]) -> usize {
    let shape = views[0].shape();
    let mut best = 0usize;
    let mut best_extent = 0usize;
    let mut best_cost = usize::MAX;
    for d in 0..shape.len() {
        let extent = shape[d];
        let cost: usize = views
            .iter()
            .map(|v| v.strides()[d].unsigned_abs())
            .sum();
        if extent > best_extent || (extent == best_extent && cost < best_cost) {
            best = d;
            best_extent = extent;
            best_cost = cost;
        }
    }
    best
}

/// Slice geometry for decomposing a rank-2 view along one axis.
///
/// Computed once and reused for every slice, so per-slice classification
/// cost stays O(1). Higher ranks derive each slice's geometry independently
/// through `tensor_along_dimension`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tensor1dStats {
    /// Buffer offset of slice 0.
    pub first_offset: isize,
    /// Offset separation between the starts of consecutive slices.
    pub separation: isize,
    /// Elements per slice.
    pub len: usize,
    /// Element stride within a slice.
    pub stride: isize,
    /// Number of slices.
    pub count: usize,
}

impl Tensor1dStats {
    /// Buffer offset of slice `i`.
    pub fn offset(&self, i: usize) -> isize {
        self.first_offset + i as isize * self.separation
    }
}

/// Slice geometry for a rank-2 view decomposed along `dim`.
pub fn tensor1d_stats(view: &dyn ViewLayout, dim: usize) -> Tensor1dStats {
    debug_assert_eq!(view.rank(), 2, "tensor1d_stats requires a rank-2 view");
    let other = 1 - dim;
    Tensor1dStats {
        first_offset: view.offset() as isize,
        separation: view.strides()[other],
        len: view.shape()[dim],
        stride: view.strides()[dim],
        count: view.shape()[other],
    }
}

/// 1-D slice geometry of sub-tensor `index` along `axes` for any rank.
pub(crate) fn tad_geometry(
    view: &dyn ViewLayout,
    index: usize,
    axes: &[usize],
) -> (isize, usize, isize) {
    debug_assert_eq!(axes.len(), 1, "tad_geometry expects a single axis");
    let d = axes[0];
    let offset = tad_offset(view, index, axes);
    (offset, view.shape()[d], view.strides()[d])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::NdView;

    #[test]
    fn contiguous_views_classify_direct() {
        let a = vec![0.0f64; 12];
        let b = vec![0.0f64; 12];
        let va = NdView::new(&a, &[3, 4], &[4, 1], 0).unwrap();
        let vb = NdView::new(&b, &[3, 4], &[4, 1], 0).unwrap();
        assert_eq!(classify(&[&va, &vb]), Execution::Direct);
    }

    #[test]
    fn transposed_view_forces_decomposed() {
        let a = vec![0.0f64; 12];
        let b = vec![0.0f64; 12];
        let va = NdView::new(&a, &[4, 3], &[1, 4], 0).unwrap();
        let vb = NdView::new(&b, &[4, 3], &[3, 1], 0).unwrap();
        assert_eq!(classify(&[&va, &vb]), Execution::Decomposed);
    }

    #[test]
    fn classification_is_stable() {
        let a = vec![0.0f64; 12];
        let va = NdView::new(&a, &[4, 3], &[1, 4], 0).unwrap();
        let first = classify(&[&va]);
        for _ in 0..10 {
            assert_eq!(classify(&[&va]), first);
        }
    }

    #[test]
    fn choose_dimension_prefers_longest_extent() {
        let a = vec![0.0f64; 24];
        let v = NdView::new(&a, &[2, 12], &[12, 1], 0).unwrap();
        assert_eq!(choose_tensor_dimension(&[&v]), 1);

        let w = NdView::new(&a, &[12, 2], &[2, 1], 0).unwrap();
        assert_eq!(choose_tensor_dimension(&[&w]), 0);
    }

    #[test]
    fn choose_dimension_ties_prefer_contiguous_stride() {
        let a = vec![0.0f64; 16];
        // 4x4: axis 1 is contiguous (stride 1), axis 0 strided.
        let v = NdView::new(&a, &[4, 4], &[4, 1], 0).unwrap();
        assert_eq!(choose_tensor_dimension(&[&v]), 1);
        // Column-major layout flips the preference.
        let w = NdView::new(&a, &[4, 4], &[1, 4], 0).unwrap();
        assert_eq!(choose_tensor_dimension(&[&w]), 0);
    }

    #[test]
    fn tensor1d_stats_rank2_rows() {
        let a: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let v = NdView::new(&a, &[3, 4], &[4, 1], 0).unwrap();
        let stats = tensor1d_stats(&v, 1);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.len, 4);
        assert_eq!(stats.stride, 1);
        assert_eq!(stats.separation, 4);
        assert_eq!(stats.offset(0), 0);
        assert_eq!(stats.offset(2), 8);
    }

    #[test]
    fn tensor1d_stats_respects_view_offset() {
        let a: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let v = NdView::new(&a, &[3, 4], &[4, 1], 2).unwrap();
        let stats = tensor1d_stats(&v, 1);
        assert_eq!(stats.offset(0), 2);
        assert_eq!(stats.offset(1), 6);
    }

    #[test]
    fn tad_geometry_matches_stats_for_rank2() {
        let a: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let v = NdView::new(&a, &[3, 4], &[4, 1], 0).unwrap();
        let stats = tensor1d_stats(&v, 1);
        for i in 0..3 {
            let (off, len, stride) = tad_geometry(&v, i, &[1]);
            assert_eq!(off, stats.offset(i));
            assert_eq!(len, stats.len);
            assert_eq!(stride, stats.stride);
        }
    }
}
