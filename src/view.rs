//! Strided views over caller-owned buffers, plus a minimal owned container
//! for operation results.
//!
//! The engine never owns operand memory: callers hand in [`NdView`] /
//! [`NdViewMut`] borrows described by `(shape, strides, offset)` and the
//! engine walks the backing slice through them. [`NdArray`] exists only so
//! reductions have somewhere to put their output; it is a plain row-major
//! `Vec` with a shape.

use crate::{Element, ExecError, Result};
use smallvec::SmallVec;

/// Stack-allocated shape vector; rank rarely exceeds a handful of axes.
pub(crate) type DimVec = SmallVec<[usize; 8]>;
/// Stack-allocated stride vector.
pub(crate) type StrideVec = SmallVec<[isize; 8]>;

/// Read-side layout contract consumed by the layout classifier and the
/// dimension-reduction driver.
///
/// Implemented by [`NdView`], [`NdViewMut`] and [`NdArray`]; the engine's
/// classification logic only sees this trait.
pub trait ViewLayout {
    /// Per-axis extents.
    fn shape(&self) -> &[usize];

    /// Per-axis element strides (may be negative).
    fn strides(&self) -> &[isize];

    /// Element index of the first logical element in the backing buffer.
    fn offset(&self) -> usize;

    /// Number of axes.
    fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Total number of logical elements.
    fn len(&self) -> usize {
        self.shape().iter().product()
    }

    /// True when the view holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat stride with which the whole view can be walked in logical
    /// (row-major) order, or `None` when no such uniform stride exists.
    ///
    /// Extent-1 axes are ignored; the remaining axes must nest, i.e.
    /// `stride[k] == stride[k + 1] * extent[k + 1]`. Views that are
    /// uniformly strided only in some other axis order (column-major
    /// contiguous matrices, say) report `None` and take the decomposed
    /// path, which is correct if less direct.
    fn element_wise_stride(&self) -> Option<isize> {
        let mut walked: SmallVec<[(usize, isize); 8]> = SmallVec::new();
        for (&d, &s) in self.shape().iter().zip(self.strides()) {
            if d > 1 {
                walked.push((d, s));
            }
        }
        match walked.len() {
            0 => Some(1),
            1 => Some(walked[0].1),
            _ => {
                for k in 0..walked.len() - 1 {
                    let (inner_d, inner_s) = walked[k + 1];
                    if walked[k].1 != inner_s * inner_d as isize {
                        return None;
                    }
                }
                Some(walked[walked.len() - 1].1)
            }
        }
    }

    /// Rank <= 1, or exactly one axis with extent > 1.
    fn is_vector(&self) -> bool {
        self.rank() <= 1 || self.shape().iter().filter(|&&d| d > 1).count() <= 1
    }

    /// Exactly two axes.
    fn is_matrix(&self) -> bool {
        self.rank() == 2
    }

    /// A rank-2 `m x 1` view.
    fn is_column_vector(&self) -> bool {
        self.rank() == 2 && self.shape()[1] == 1
    }

    /// A rank-2 `1 x n` view.
    fn is_row_vector(&self) -> bool {
        self.rank() == 2 && self.shape()[0] == 1
    }

    /// Number of sub-tensors spanning the given axes.
    fn tensors_along_dimension(&self, axes: &[usize]) -> usize {
        let spanned: usize = axes.iter().map(|&a| self.shape()[a]).product();
        if spanned == 0 {
            0
        } else {
            self.len() / spanned
        }
    }
}

/// Validate `(shape, strides, offset)` against a buffer of `buf_len`
/// elements: every addressable element must stay in bounds, including
/// through negative strides.
fn validate_view(
    buf_len: usize,
    shape: &[usize],
    strides: &[isize],
    offset: usize,
) -> Result<()> {
    if shape.len() != strides.len() {
        return Err(ExecError::StrideLengthMismatch(strides.len(), shape.len()));
    }
    if shape.iter().any(|&d| d == 0) {
        return Ok(());
    }
    let base = isize::try_from(offset).map_err(|_| ExecError::OffsetOverflow)?;
    let mut lo = base;
    let mut hi = base;
    for (&d, &s) in shape.iter().zip(strides) {
        let span = s
            .checked_mul(d as isize - 1)
            .ok_or(ExecError::OffsetOverflow)?;
        if span >= 0 {
            hi = hi.checked_add(span).ok_or(ExecError::OffsetOverflow)?;
        } else {
            lo = lo.checked_add(span).ok_or(ExecError::OffsetOverflow)?;
        }
    }
    if lo < 0 {
        return Err(ExecError::OutOfBounds {
            index: 0,
            len: buf_len,
        });
    }
    if hi as usize >= buf_len {
        return Err(ExecError::OutOfBounds {
            index: hi as usize,
            len: buf_len,
        });
    }
    Ok(())
}

/// Flat buffer index of a logical coordinate. Construction-time validation
/// guarantees the result is in bounds for any in-range coordinate.
fn flat_index(shape: &[usize], strides: &[isize], offset: usize, idx: &[usize]) -> usize {
    assert_eq!(idx.len(), shape.len(), "coordinate rank mismatch");
    let mut flat = offset as isize;
    for ((&i, &d), &s) in idx.iter().zip(shape).zip(strides) {
        assert!(i < d, "index {} out of range for extent {}", i, d);
        flat += i as isize * s;
    }
    flat as usize
}

/// Decompose a linear (row-major) position into a coordinate.
fn unravel(shape: &[usize], mut linear: usize, out: &mut DimVec) {
    out.clear();
    out.resize(shape.len(), 0);
    for k in (0..shape.len()).rev() {
        let d = shape[k];
        out[k] = linear % d;
        linear /= d;
    }
}

/// Buffer offset of sub-tensor `index` spanning `axes` (ascending order),
/// relative to the start of the backing buffer.
///
/// The complementary axes enumerate in row-major order, matching the
/// element order of a row-major output of the reduced shape.
pub(crate) fn tad_offset(view: &dyn ViewLayout, index: usize, axes: &[usize]) -> isize {
    let shape = view.shape();
    let strides = view.strides();
    let mut rem = index;
    let mut off = view.offset() as isize;
    for k in (0..shape.len()).rev() {
        if axes.contains(&k) {
            continue;
        }
        let coord = rem % shape[k];
        rem /= shape[k];
        off += coord as isize * strides[k];
    }
    off
}

/// Read-only strided view over a borrowed slice.
#[derive(Clone, Debug)]
pub struct NdView<'a, T> {
    data: &'a [T],
    shape: DimVec,
    strides: StrideVec,
    offset: usize,
}

impl<'a, T> NdView<'a, T> {
    /// Create a view over `data` with the given shape, strides and starting
    /// offset. Fails if the described extent escapes the buffer.
    pub fn new(data: &'a [T], shape: &[usize], strides: &[isize], offset: usize) -> Result<Self> {
        validate_view(data.len(), shape, strides, offset)?;
        Ok(Self {
            data,
            shape: shape.iter().copied().collect(),
            strides: strides.iter().copied().collect(),
            offset,
        })
    }

    /// Contiguous 1-D view over a whole slice.
    pub fn from_slice(data: &'a [T]) -> Self {
        Self {
            shape: SmallVec::from_slice(&[data.len()]),
            strides: SmallVec::from_slice(&[1]),
            offset: 0,
            data,
        }
    }

    /// The backing buffer.
    pub fn data(&self) -> &'a [T] {
        self.data
    }

    pub(crate) fn base_ptr(&self) -> *const T {
        self.data.as_ptr()
    }

    pub(crate) fn from_raw_parts(
        data: &'a [T],
        shape: DimVec,
        strides: StrideVec,
        offset: usize,
    ) -> Self {
        Self {
            data,
            shape,
            strides,
            offset,
        }
    }
}

impl<'a, T: Copy> NdView<'a, T> {
    /// Bounds-checked element access by coordinate.
    pub fn get(&self, idx: &[usize]) -> T {
        self.data[flat_index(&self.shape, &self.strides, self.offset, idx)]
    }

    /// Element at linear position `i` in logical row-major order.
    pub fn get_linear(&self, i: usize) -> T {
        let mut coord = DimVec::new();
        unravel(&self.shape, i, &mut coord);
        self.get(&coord)
    }

    /// Sub-tensor `index` spanning `axes` (ascending); see
    /// [`ViewLayout::tensors_along_dimension`] for the count.
    pub fn tensor_along_dimension(&self, index: usize, axes: &[usize]) -> NdView<'a, T> {
        let off = tad_offset(self, index, axes);
        NdView {
            data: self.data,
            shape: axes.iter().map(|&a| self.shape[a]).collect(),
            strides: axes.iter().map(|&a| self.strides[a]).collect(),
            offset: off as usize,
        }
    }

    /// Sub-view with axis 0 fixed at `i`.
    pub fn slice(&self, i: usize) -> NdView<'a, T> {
        assert!(self.rank() >= 1 && i < self.shape[0]);
        NdView {
            data: self.data,
            shape: self.shape[1..].iter().copied().collect(),
            strides: self.strides[1..].iter().copied().collect(),
            offset: (self.offset as isize + i as isize * self.strides[0]) as usize,
        }
    }

    /// Row `i` of a matrix-like view.
    pub fn row(&self, i: usize) -> NdView<'a, T> {
        assert!(self.is_matrix(), "row() requires a rank-2 view");
        self.tensor_along_dimension(i, &[1])
    }

    /// Column `j` of a matrix-like view.
    pub fn column(&self, j: usize) -> NdView<'a, T> {
        assert!(self.is_matrix(), "column() requires a rank-2 view");
        self.tensor_along_dimension(j, &[0])
    }

    /// Deep copy into a fresh row-major array.
    pub fn dup(&self) -> NdArray<T> {
        let n = self.len();
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(self.get_linear(i));
        }
        NdArray::from_parts(out, &self.shape)
    }
}

impl<T> ViewLayout for NdView<'_, T> {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn strides(&self) -> &[isize] {
        &self.strides
    }

    fn offset(&self) -> usize {
        self.offset
    }
}

/// Mutable strided view over a borrowed slice; the destination side of
/// transform and scalar ops.
pub struct NdViewMut<'a, T> {
    data: &'a mut [T],
    shape: DimVec,
    strides: StrideVec,
    offset: usize,
}

impl<'a, T> NdViewMut<'a, T> {
    /// Create a mutable view; same validation as [`NdView::new`].
    pub fn new(
        data: &'a mut [T],
        shape: &[usize],
        strides: &[isize],
        offset: usize,
    ) -> Result<Self> {
        validate_view(data.len(), shape, strides, offset)?;
        Ok(Self {
            data,
            shape: shape.iter().copied().collect(),
            strides: strides.iter().copied().collect(),
            offset,
        })
    }

    /// Contiguous 1-D mutable view over a whole slice.
    pub fn from_slice(data: &'a mut [T]) -> Self {
        Self {
            shape: SmallVec::from_slice(&[data.len()]),
            strides: SmallVec::from_slice(&[1]),
            offset: 0,
            data,
        }
    }

    /// Read-only alias of this view.
    pub fn as_view(&self) -> NdView<'_, T> {
        NdView {
            data: self.data,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            offset: self.offset,
        }
    }

    pub(crate) fn base_ptr_mut(&mut self) -> *mut T {
        self.data.as_mut_ptr()
    }
}

impl<T: Copy> NdViewMut<'_, T> {
    /// Bounds-checked element read.
    pub fn get(&self, idx: &[usize]) -> T {
        self.data[flat_index(&self.shape, &self.strides, self.offset, idx)]
    }

    /// Bounds-checked element write.
    pub fn put(&mut self, idx: &[usize], value: T) {
        let flat = flat_index(&self.shape, &self.strides, self.offset, idx);
        self.data[flat] = value;
    }

    /// Write at linear position `i` in logical row-major order.
    pub fn put_linear(&mut self, i: usize, value: T) {
        let mut coord = DimVec::new();
        unravel(&self.shape, i, &mut coord);
        self.put(&coord, value);
    }

    /// Read at linear position `i` in logical row-major order.
    pub fn get_linear(&self, i: usize) -> T {
        let mut coord = DimVec::new();
        unravel(&self.shape, i, &mut coord);
        self.get(&coord)
    }

    /// Write directly at buffer position `flat`, bypassing the layout.
    pub(crate) fn put_flat(&mut self, flat: usize, value: T) {
        self.data[flat] = value;
    }
}

impl<T> ViewLayout for NdViewMut<'_, T> {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn strides(&self) -> &[isize] {
        &self.strides
    }

    fn offset(&self) -> usize {
        self.offset
    }
}

/// Row-major strides for a shape.
pub(crate) fn row_major_strides(shape: &[usize]) -> StrideVec {
    let mut strides: StrideVec = SmallVec::with_capacity(shape.len());
    strides.resize(shape.len(), 1);
    let mut acc = 1isize;
    for k in (0..shape.len()).rev() {
        strides[k] = acc;
        acc *= shape[k] as isize;
    }
    strides
}

/// Minimal owned row-major array; holds reduction outputs and deep copies.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray<T> {
    data: Vec<T>,
    shape: DimVec,
    strides: StrideVec,
}

impl<T: Copy> NdArray<T> {
    /// Array of the given shape with every element set to `value`.
    pub fn from_elem(shape: &[usize], value: T) -> Self {
        let n: usize = shape.iter().product();
        Self::from_parts(vec![value; n], shape)
    }

    /// Wrap an existing row-major buffer.
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let n: usize = shape.iter().product();
        if data.len() != n {
            return Err(ExecError::ShapeMismatch(vec![data.len()], shape.to_vec()));
        }
        Ok(Self::from_parts(data, shape))
    }

    pub(crate) fn from_parts(data: Vec<T>, shape: &[usize]) -> Self {
        Self {
            data,
            shape: shape.iter().copied().collect(),
            strides: row_major_strides(shape),
        }
    }

    /// Element by coordinate.
    pub fn get(&self, idx: &[usize]) -> T {
        self.data[flat_index(&self.shape, &self.strides, 0, idx)]
    }
}

impl<T: Element> NdArray<T> {
    /// Zero-filled array of the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::from_elem(shape, T::zero())
    }
}

impl<T> NdArray<T> {
    /// The flat row-major buffer.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Mutable access to the flat buffer.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Read-only view of the whole array.
    pub fn view(&self) -> NdView<'_, T> {
        NdView {
            data: &self.data,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            offset: 0,
        }
    }

    /// Mutable view of the whole array.
    pub fn view_mut(&mut self) -> NdViewMut<'_, T> {
        NdViewMut {
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            data: &mut self.data,
            offset: 0,
        }
    }
}

impl<T> ViewLayout for NdArray<T> {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn strides(&self) -> &[isize] {
        &self.strides
    }

    fn offset(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_out_of_bounds() {
        let data = vec![0.0f64; 6];
        assert!(NdView::new(&data, &[2, 3], &[3, 1], 0).is_ok());
        assert!(NdView::new(&data, &[2, 4], &[4, 1], 0).is_err());
        assert!(NdView::new(&data, &[6], &[1], 1).is_err());
        assert!(NdView::new(&data, &[3], &[1], 3).is_ok());
        assert!(NdView::new(&data, &[3], &[1], 4).is_err());
    }

    #[test]
    fn new_rejects_stride_length_mismatch() {
        let data = vec![0.0f64; 6];
        let err = NdView::new(&data, &[2, 3], &[1], 0).unwrap_err();
        assert!(matches!(err, ExecError::StrideLengthMismatch(1, 2)));
    }

    #[test]
    fn negative_stride_reversed_vector() {
        let data = vec![1.0f64, 2.0, 3.0, 4.0];
        let v = NdView::new(&data, &[4], &[-1], 3).unwrap();
        assert_eq!(v.get_linear(0), 4.0);
        assert_eq!(v.get_linear(3), 1.0);
        assert_eq!(v.element_wise_stride(), Some(-1));
    }

    #[test]
    fn negative_stride_bounds_checked() {
        let data = vec![1.0f64, 2.0, 3.0, 4.0];
        // Would walk to element -1.
        assert!(NdView::new(&data, &[4], &[-1], 2).is_err());
    }

    #[test]
    fn element_wise_stride_row_major() {
        let data = vec![0.0f64; 24];
        let v = NdView::new(&data, &[2, 3, 4], &[12, 4, 1], 0).unwrap();
        assert_eq!(v.element_wise_stride(), Some(1));
    }

    #[test]
    fn element_wise_stride_strided_vector() {
        let data = vec![0.0f64; 10];
        let v = NdView::new(&data, &[5], &[2], 0).unwrap();
        assert_eq!(v.element_wise_stride(), Some(2));
    }

    #[test]
    fn element_wise_stride_none_for_col_major_matrix() {
        // Column-major contiguous: walking logical row-major order jumps.
        let data = vec![0.0f64; 6];
        let v = NdView::new(&data, &[2, 3], &[1, 2], 0).unwrap();
        assert_eq!(v.element_wise_stride(), None);
    }

    #[test]
    fn element_wise_stride_ignores_unit_axes() {
        let data = vec![0.0f64; 6];
        let v = NdView::new(&data, &[1, 6, 1], &[6, 1, 1], 0).unwrap();
        assert_eq!(v.element_wise_stride(), Some(1));
    }

    #[test]
    fn vector_and_matrix_predicates() {
        let data = vec![0.0f64; 6];
        let m = NdView::new(&data, &[2, 3], &[3, 1], 0).unwrap();
        assert!(m.is_matrix());
        assert!(!m.is_vector());
        let col = NdView::new(&data, &[6, 1], &[1, 1], 0).unwrap();
        assert!(col.is_column_vector());
        assert!(col.is_vector());
        let row = NdView::new(&data, &[1, 6], &[6, 1], 0).unwrap();
        assert!(row.is_row_vector());
    }

    #[test]
    fn tensor_along_dimension_rows_and_columns() {
        // 2x3 row-major: [[0, 1, 2], [3, 4, 5]]
        let data: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let m = NdView::new(&data, &[2, 3], &[3, 1], 0).unwrap();

        assert_eq!(m.tensors_along_dimension(&[1]), 2);
        let r1 = m.tensor_along_dimension(1, &[1]);
        assert_eq!(r1.shape(), &[3]);
        assert_eq!(r1.get_linear(0), 3.0);
        assert_eq!(r1.get_linear(2), 5.0);

        assert_eq!(m.tensors_along_dimension(&[0]), 3);
        let c2 = m.tensor_along_dimension(2, &[0]);
        assert_eq!(c2.shape(), &[2]);
        assert_eq!(c2.get_linear(0), 2.0);
        assert_eq!(c2.get_linear(1), 5.0);
    }

    #[test]
    fn tad_enumeration_matches_row_major_output_order() {
        // 2x3x4, reduce axis 2: sub-tensor i corresponds to output linear
        // position i over the [2, 3] complement in row-major order.
        let data: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let t = NdView::new(&data, &[2, 3, 4], &[12, 4, 1], 0).unwrap();
        assert_eq!(t.tensors_along_dimension(&[2]), 6);
        for i in 0..6 {
            let tad = t.tensor_along_dimension(i, &[2]);
            assert_eq!(tad.get_linear(0), (i * 4) as f64);
        }
    }

    #[test]
    fn dup_is_row_major_copy() {
        let data: Vec<f64> = (0..6).map(|i| i as f64).collect();
        // Transposed 3x2 view of the 2x3 buffer.
        let t = NdView::new(&data, &[3, 2], &[1, 3], 0).unwrap();
        let d = t.dup();
        assert_eq!(d.data(), &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert_eq!(d.shape(), &[3, 2]);
        assert_eq!(d.strides(), &[2, 1]);
    }

    #[test]
    fn view_mut_put_and_get() {
        let mut data = vec![0.0f64; 6];
        let mut v = NdViewMut::new(&mut data, &[2, 3], &[3, 1], 0).unwrap();
        v.put(&[1, 2], 7.0);
        assert_eq!(v.get(&[1, 2]), 7.0);
        v.put_linear(0, 1.5);
        assert_eq!(data[0], 1.5);
    }

    #[test]
    fn ndarray_round_trips_through_views() {
        let a = NdArray::from_vec((0..6).map(|i| i as f64).collect(), &[2, 3]).unwrap();
        assert_eq!(a.view().get(&[1, 1]), 4.0);
        assert_eq!(a.get(&[0, 2]), 2.0);
        assert_eq!(a.strides(), &[3, 1]);
    }
}
