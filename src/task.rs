//! Recursive fork-join tasks over raw buffer ranges.
//!
//! Each task owns a `(offset, stride, length)` walk per operand. Ranges
//! longer than the threshold split into `n / 2` and `n - n / 2` halves
//! (the larger remainder always lands in the second half, keeping splits
//! deterministic for a given `n`) and run under [`rayon::join`]; at or
//! below the threshold the walk runs sequentially. Reduction partials
//! merge through the descriptor's combiner in first-half/second-half call
//! order, which keeps non-commutative combiners — index tie-breaking in
//! particular — exact.

use crate::ops::{AccumulationOp, IndexAccumulationOp, ScalarOp, TransformOp};
use crate::Element;

/// A raw pointer wrapper that is `Send` + `Sync`.
///
/// # Safety
/// The caller must guarantee that the pointed-to data is valid for the
/// lifetime of any parallel operation and that no data races occur:
/// operand buffers are only read, and distinct sub-tasks write disjoint
/// destination ranges (the split arithmetic partitions them statically).
pub(crate) struct SendPtr<T>(pub(crate) *mut T);

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    pub(crate) fn from_const(ptr: *const T) -> Self {
        SendPtr(ptr as *mut T)
    }

    pub(crate) fn as_ptr(self) -> *mut T {
        self.0
    }

    pub(crate) fn as_const(self) -> *const T {
        self.0 as *const T
    }
}

/// One operand's walk through its buffer.
#[derive(Clone, Copy)]
pub(crate) struct Walk<T> {
    pub(crate) ptr: SendPtr<T>,
    pub(crate) offset: isize,
    pub(crate) stride: isize,
}

impl<T> Walk<T> {
    pub(crate) fn new(ptr: SendPtr<T>, offset: isize, stride: isize) -> Self {
        Self {
            ptr,
            offset,
            stride,
        }
    }

    /// The walk advanced past its first `n` elements.
    fn advanced(self, n: usize) -> Self {
        Self {
            offset: self.offset + n as isize * self.stride,
            ..self
        }
    }
}

/// Elementwise transform over a buffer range: `z[i] = op(x[i])` or
/// `op(x[i], y[i])`. In-place execution (x and z walking the same
/// elements) is sound: each element is read before its single write.
pub(crate) fn transform_task<T, Op>(
    op: &Op,
    n: usize,
    x: Walk<T>,
    y: Option<Walk<T>>,
    z: Walk<T>,
    threshold: usize,
) where
    T: Element,
    Op: TransformOp<T> + ?Sized,
{
    if n > threshold {
        let n1 = n / 2;
        let n2 = n - n1;
        rayon::join(
            || transform_task(op, n1, x, y, z, threshold),
            || {
                transform_task(
                    op,
                    n2,
                    x.advanced(n1),
                    y.map(|w| w.advanced(n1)),
                    z.advanced(n1),
                    threshold,
                )
            },
        );
        return;
    }

    unsafe {
        let mut px = x.ptr.as_const().offset(x.offset);
        let mut pz = z.ptr.as_ptr().offset(z.offset);
        match y {
            Some(y) => {
                let mut py = y.ptr.as_const().offset(y.offset);
                for _ in 0..n {
                    *pz = op.apply_pair(*px, *py);
                    px = px.offset(x.stride);
                    py = py.offset(y.stride);
                    pz = pz.offset(z.stride);
                }
            }
            None => {
                for _ in 0..n {
                    *pz = op.apply(*px);
                    px = px.offset(x.stride);
                    pz = pz.offset(z.stride);
                }
            }
        }
    }
}

/// Scalar op over a buffer range: `z[i] = op(x[i])` with the constant
/// captured by the descriptor.
pub(crate) fn scalar_task<T, Op>(op: &Op, n: usize, x: Walk<T>, z: Walk<T>, threshold: usize)
where
    T: Element,
    Op: ScalarOp<T> + ?Sized,
{
    if n > threshold {
        let n1 = n / 2;
        let n2 = n - n1;
        rayon::join(
            || scalar_task(op, n1, x, z, threshold),
            || scalar_task(op, n2, x.advanced(n1), z.advanced(n1), threshold),
        );
        return;
    }

    unsafe {
        let mut px = x.ptr.as_const().offset(x.offset);
        let mut pz = z.ptr.as_ptr().offset(z.offset);
        for _ in 0..n {
            *pz = op.apply(*px);
            px = px.offset(x.stride);
            pz = pz.offset(z.stride);
        }
    }
}

/// Accumulation over a buffer range. Returns the partial result for the
/// range; the caller merges partials with the descriptor's combiner.
pub(crate) fn accumulation_task<T, Op>(
    op: &Op,
    n: usize,
    x: Walk<T>,
    y: Option<Walk<T>>,
    threshold: usize,
) -> T
where
    T: Element,
    Op: AccumulationOp<T> + ?Sized,
{
    if n > threshold {
        let n1 = n / 2;
        let n2 = n - n1;
        let (first, second) = rayon::join(
            || accumulation_task(op, n1, x, y, threshold),
            || {
                accumulation_task(
                    op,
                    n2,
                    x.advanced(n1),
                    y.map(|w| w.advanced(n1)),
                    threshold,
                )
            },
        );
        return op.combine(first, second);
    }

    let mut acc = op.init();
    unsafe {
        let mut px = x.ptr.as_const().offset(x.offset);
        match y {
            Some(y) => {
                let mut py = y.ptr.as_const().offset(y.offset);
                for _ in 0..n {
                    acc = op.update(acc, op.map_pair(*px, *py));
                    px = px.offset(x.stride);
                    py = py.offset(y.stride);
                }
            }
            None => {
                for _ in 0..n {
                    acc = op.update(acc, op.map(*px));
                    px = px.offset(x.stride);
                }
            }
        }
    }
    acc
}

/// Partial result of an index accumulation: the best value seen and its
/// absolute position in the original un-split range. `index` is `None`
/// only for empty ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct IndexPartial<T> {
    pub(crate) value: T,
    pub(crate) index: Option<usize>,
}

/// Merge two index partials in first-half/second-half order; the first
/// half wins ties, so the lowest index of a repeated extremum survives.
pub(crate) fn merge_index_partials<T, Op>(
    op: &Op,
    first: IndexPartial<T>,
    second: IndexPartial<T>,
) -> IndexPartial<T>
where
    T: Element,
    Op: IndexAccumulationOp<T> + ?Sized,
{
    match (first.index, second.index) {
        (Some(_), Some(_)) => {
            if op.improves(first.value, second.value) {
                second
            } else {
                first
            }
        }
        (None, Some(_)) => second,
        _ => first,
    }
}

/// Index accumulation over a buffer range. `base` is the absolute element
/// index of the range's first element, so partials already carry absolute
/// positions when they merge.
pub(crate) fn index_accumulation_task<T, Op>(
    op: &Op,
    n: usize,
    base: usize,
    x: Walk<T>,
    y: Option<Walk<T>>,
    threshold: usize,
) -> IndexPartial<T>
where
    T: Element,
    Op: IndexAccumulationOp<T> + ?Sized,
{
    if n > threshold {
        let n1 = n / 2;
        let n2 = n - n1;
        let (first, second) = rayon::join(
            || index_accumulation_task(op, n1, base, x, y, threshold),
            || {
                index_accumulation_task(
                    op,
                    n2,
                    base + n1,
                    x.advanced(n1),
                    y.map(|w| w.advanced(n1)),
                    threshold,
                )
            },
        );
        return merge_index_partials(op, first, second);
    }

    // Placeholder value; the first element always replaces an empty partial.
    let mut best = IndexPartial {
        value: T::zero(),
        index: None,
    };
    unsafe {
        let mut px = x.ptr.as_const().offset(x.offset);
        match y {
            Some(y) => {
                let mut py = y.ptr.as_const().offset(y.offset);
                for i in 0..n {
                    let v = op.map_pair(*px, *py);
                    if best.index.is_none() || op.improves(best.value, v) {
                        best = IndexPartial {
                            value: v,
                            index: Some(base + i),
                        };
                    }
                    px = px.offset(x.stride);
                    py = py.offset(y.stride);
                }
            }
            None => {
                for i in 0..n {
                    let v = op.map(*px);
                    if best.index.is_none() || op.improves(best.value, v) {
                        best = IndexPartial {
                            value: v,
                            index: Some(base + i),
                        };
                    }
                    px = px.offset(x.stride);
                }
            }
        }
    }
    best
}
