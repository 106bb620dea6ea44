//! Operation descriptors.
//!
//! Operations form a closed set of four kinds, one trait per kind. The
//! executioner's dispatch is exhaustive over these four; new element-level
//! operators are added by implementing the matching trait, never by adding
//! a kind.
//!
//! Reduction descriptors supply an identity ([`AccumulationOp::init`]) and
//! a partial-result combiner; the combiner receives the first-half and
//! second-half results of a split in call order, so it may be
//! non-commutative. Index reductions resolve ties by keeping the index
//! already seen: the lowest index of a repeated extremum always wins.

use crate::view::{NdView, NdViewMut};
use crate::{Element, ExecError, Result};

/// Elementwise transform: `z[i] = op(x[i])` or `z[i] = op(x[i], y[i])`.
pub trait TransformOp<T: Element>: Sync {
    /// Descriptor name, used in error reports.
    fn name(&self) -> &'static str;

    /// Unary element operator.
    fn apply(&self, x: T) -> T;

    /// Binary element operator; defaults to ignoring `y`.
    fn apply_pair(&self, x: T, y: T) -> T {
        let _ = y;
        self.apply(x)
    }

    /// Descriptors that carry their own specialized execution bypass the
    /// engine entirely.
    fn is_pass_through(&self) -> bool {
        false
    }

    /// Specialized execution for pass-through descriptors.
    fn exec_pass_through(
        &self,
        x: &NdView<'_, T>,
        y: Option<&NdView<'_, T>>,
        z: &mut NdViewMut<'_, T>,
    ) -> Result<()> {
        let _ = (x, y, z);
        Err(ExecError::PassThroughUnsupported(self.name()))
    }
}

/// Reduction to a scalar (or one scalar per retained axis combination).
pub trait AccumulationOp<T: Element>: Sync {
    /// Descriptor name, used in error reports.
    fn name(&self) -> &'static str;

    /// Identity value the fold starts from.
    fn init(&self) -> T;

    /// Element operator applied before folding; identity by default.
    fn map(&self, x: T) -> T {
        x
    }

    /// Two-operand element operator (dot products and the like).
    fn map_pair(&self, x: T, y: T) -> T {
        let _ = y;
        self.map(x)
    }

    /// Fold one mapped element into the running value.
    fn update(&self, acc: T, value: T) -> T;

    /// Merge the partial results of a two-way split. `first` is the lower
    /// half of the range, `second` the upper; callers preserve that order.
    fn combine(&self, first: T, second: T) -> T;

    /// See [`TransformOp::is_pass_through`].
    fn is_pass_through(&self) -> bool {
        false
    }

    /// Specialized execution for pass-through descriptors.
    fn exec_pass_through(&self, x: &NdView<'_, T>, y: Option<&NdView<'_, T>>) -> Result<T> {
        let _ = (x, y);
        Err(ExecError::PassThroughUnsupported(self.name()))
    }
}

/// Elementwise op against a captured constant: `z[i] = op(x[i])` where the
/// operator closes over [`scalar`](ScalarOp::scalar).
pub trait ScalarOp<T: Element>: Sync {
    /// Descriptor name, used in error reports.
    fn name(&self) -> &'static str;

    /// The captured constant.
    fn scalar(&self) -> T;

    /// Element operator.
    fn apply(&self, x: T) -> T;

    /// See [`TransformOp::is_pass_through`].
    fn is_pass_through(&self) -> bool {
        false
    }

    /// Specialized execution for pass-through descriptors.
    fn exec_pass_through(&self, x: &NdView<'_, T>, z: &mut NdViewMut<'_, T>) -> Result<()> {
        let _ = (x, z);
        Err(ExecError::PassThroughUnsupported(self.name()))
    }
}

/// Reduction to a position rather than a value, e.g. arg-max.
pub trait IndexAccumulationOp<T: Element>: Sync {
    /// Descriptor name, used in error reports.
    fn name(&self) -> &'static str;

    /// Element operator applied before comparison; identity by default.
    fn map(&self, x: T) -> T {
        x
    }

    /// Two-operand element operator.
    fn map_pair(&self, x: T, y: T) -> T {
        let _ = y;
        self.map(x)
    }

    /// True when `candidate` strictly improves on `best`. A non-strict
    /// implementation would let later duplicates steal the index; strict
    /// comparison keeps the first occurrence.
    fn improves(&self, best: T, candidate: T) -> bool;

    /// See [`TransformOp::is_pass_through`].
    fn is_pass_through(&self) -> bool {
        false
    }

    /// Specialized execution for pass-through descriptors.
    fn exec_pass_through(&self, x: &NdView<'_, T>, y: Option<&NdView<'_, T>>) -> Result<usize> {
        let _ = (x, y);
        Err(ExecError::PassThroughUnsupported(self.name()))
    }
}

// ============================================================================
// Transforms
// ============================================================================

/// `z = -x`
pub struct Negate;

impl<T: Element> TransformOp<T> for Negate {
    fn name(&self) -> &'static str {
        "negate"
    }

    fn apply(&self, x: T) -> T {
        T::zero() - x
    }
}

/// `z = |x|` (modulus for complex elements).
pub struct Abs;

impl<T: Element> TransformOp<T> for Abs {
    fn name(&self) -> &'static str {
        "abs"
    }

    fn apply(&self, x: T) -> T {
        x.abs_val()
    }
}

/// `z = x + y`
pub struct Add;

impl<T: Element> TransformOp<T> for Add {
    fn name(&self) -> &'static str {
        "add"
    }

    fn apply(&self, x: T) -> T {
        x
    }

    fn apply_pair(&self, x: T, y: T) -> T {
        x + y
    }
}

/// `z = x - y`
pub struct Sub;

impl<T: Element> TransformOp<T> for Sub {
    fn name(&self) -> &'static str {
        "sub"
    }

    fn apply(&self, x: T) -> T {
        x
    }

    fn apply_pair(&self, x: T, y: T) -> T {
        x - y
    }
}

/// `z = x * y`
pub struct Mul;

impl<T: Element> TransformOp<T> for Mul {
    fn name(&self) -> &'static str {
        "mul"
    }

    fn apply(&self, x: T) -> T {
        x
    }

    fn apply_pair(&self, x: T, y: T) -> T {
        x * y
    }
}

/// `z = x / y`
pub struct Div;

impl<T: Element> TransformOp<T> for Div {
    fn name(&self) -> &'static str {
        "div"
    }

    fn apply(&self, x: T) -> T {
        x
    }

    fn apply_pair(&self, x: T, y: T) -> T {
        x / y
    }
}

// ============================================================================
// Accumulations
// ============================================================================

/// Sum reduction.
pub struct Sum;

impl<T: Element> AccumulationOp<T> for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn init(&self) -> T {
        T::zero()
    }

    fn update(&self, acc: T, value: T) -> T {
        acc + value
    }

    fn combine(&self, first: T, second: T) -> T {
        first + second
    }
}

/// Product reduction.
pub struct Prod;

impl<T: Element> AccumulationOp<T> for Prod {
    fn name(&self) -> &'static str {
        "prod"
    }

    fn init(&self) -> T {
        T::one()
    }

    fn update(&self, acc: T, value: T) -> T {
        acc * value
    }

    fn combine(&self, first: T, second: T) -> T {
        first * second
    }
}

/// Maximum reduction; complex elements compare by modulus.
pub struct Max;

impl<T: Element> AccumulationOp<T> for Max {
    fn name(&self) -> &'static str {
        "max"
    }

    fn init(&self) -> T {
        T::max_identity()
    }

    fn update(&self, acc: T, value: T) -> T {
        if value.ord_key() > acc.ord_key() {
            value
        } else {
            acc
        }
    }

    fn combine(&self, first: T, second: T) -> T {
        // First half wins ties, matching sequential left-to-right order.
        if second.ord_key() > first.ord_key() {
            second
        } else {
            first
        }
    }
}

/// Minimum reduction; complex elements compare by modulus.
pub struct Min;

impl<T: Element> AccumulationOp<T> for Min {
    fn name(&self) -> &'static str {
        "min"
    }

    fn init(&self) -> T {
        T::min_identity()
    }

    fn update(&self, acc: T, value: T) -> T {
        if value.ord_key() < acc.ord_key() {
            value
        } else {
            acc
        }
    }

    fn combine(&self, first: T, second: T) -> T {
        if second.ord_key() < first.ord_key() {
            second
        } else {
            first
        }
    }
}

/// Dot product: two-operand accumulation of `x * y`.
pub struct Dot;

impl<T: Element> AccumulationOp<T> for Dot {
    fn name(&self) -> &'static str {
        "dot"
    }

    fn init(&self) -> T {
        T::zero()
    }

    fn map_pair(&self, x: T, y: T) -> T {
        x * y
    }

    fn update(&self, acc: T, value: T) -> T {
        acc + value
    }

    fn combine(&self, first: T, second: T) -> T {
        first + second
    }
}

// ============================================================================
// Scalar ops
// ============================================================================

/// `z = x + k`
pub struct ScalarAdd<T>(pub T);

impl<T: Element> ScalarOp<T> for ScalarAdd<T> {
    fn name(&self) -> &'static str {
        "scalar_add"
    }

    fn scalar(&self) -> T {
        self.0
    }

    fn apply(&self, x: T) -> T {
        x + self.0
    }
}

/// `z = x * k`
pub struct ScalarMul<T>(pub T);

impl<T: Element> ScalarOp<T> for ScalarMul<T> {
    fn name(&self) -> &'static str {
        "scalar_mul"
    }

    fn scalar(&self) -> T {
        self.0
    }

    fn apply(&self, x: T) -> T {
        x * self.0
    }
}

/// `z = k` (fill).
pub struct ScalarSet<T>(pub T);

impl<T: Element> ScalarOp<T> for ScalarSet<T> {
    fn name(&self) -> &'static str {
        "scalar_set"
    }

    fn scalar(&self) -> T {
        self.0
    }

    fn apply(&self, _x: T) -> T {
        self.0
    }
}

// ============================================================================
// Index accumulations
// ============================================================================

/// Index of the maximum element (lowest index on ties).
pub struct ArgMax;

impl<T: Element> IndexAccumulationOp<T> for ArgMax {
    fn name(&self) -> &'static str {
        "argmax"
    }

    fn improves(&self, best: T, candidate: T) -> bool {
        candidate.ord_key() > best.ord_key()
    }
}

/// Index of the minimum element (lowest index on ties).
pub struct ArgMin;

impl<T: Element> IndexAccumulationOp<T> for ArgMin {
    fn name(&self) -> &'static str {
        "argmin"
    }

    fn improves(&self, best: T, candidate: T) -> bool {
        candidate.ord_key() < best.ord_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_combine_is_addition() {
        let op = Sum;
        let acc = AccumulationOp::<f64>::update(&op, AccumulationOp::<f64>::init(&op), 2.0);
        assert_eq!(op.combine(acc, 3.0), 5.0);
    }

    #[test]
    fn max_combine_first_wins_ties() {
        let op = Max;
        assert_eq!(op.combine(4.0f64, 4.0), 4.0);
        assert_eq!(op.combine(2.0f64, 4.0), 4.0);
        assert_eq!(op.combine(4.0f64, 2.0), 4.0);
    }

    #[test]
    fn argmax_is_strict() {
        let op = ArgMax;
        assert!(!IndexAccumulationOp::<f64>::improves(&op, 4.0, 4.0));
        assert!(IndexAccumulationOp::<f64>::improves(&op, 4.0, 4.5));
    }

    #[test]
    fn dot_maps_pairs() {
        let op = Dot;
        assert_eq!(AccumulationOp::<f64>::map_pair(&op, 3.0, 4.0), 12.0);
    }

    #[test]
    fn scalar_set_ignores_input() {
        let op = ScalarSet(7.0f64);
        assert_eq!(op.apply(123.0), 7.0);
        assert_eq!(op.scalar(), 7.0);
    }

    #[test]
    fn negate_twice_round_trips() {
        let op = Negate;
        let x = 3.25f64;
        assert_eq!(op.apply(op.apply(x)), x);
    }
}
