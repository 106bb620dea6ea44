//! Element type contract for the execution engine.
//!
//! The engine supports four element types: `f32`, `f64` and their complex
//! counterparts. Complex operands force the strictly sequential fallback
//! path; `IS_COMPLEX` is a compile-time constant so the dispatch branch
//! folds away for real element types.

use num_complex::Complex;
use num_traits::{Float, Num, NumAssign, Zero};

/// Numeric element the engine can execute over.
///
/// Ordering-based ops (max, min, arg-max) compare elements through
/// [`ord_key`](Element::ord_key): the value itself for real types, the
/// modulus for complex types.
pub trait Element:
    Copy + Num + NumAssign + PartialEq + Send + Sync + std::fmt::Debug + 'static
{
    /// True for complex element types; routes execution to the sequential
    /// fallback path instead of the fork-join task tree.
    const IS_COMPLEX: bool;

    /// The underlying real scalar type.
    type Real: Float;

    /// Lift a real scalar into this element type.
    fn from_real(r: Self::Real) -> Self;

    /// Comparison key for ordering-based reductions.
    fn ord_key(self) -> Self::Real;

    /// Absolute value as an element (modulus lifted back for complex).
    fn abs_val(self) -> Self;

    /// Identity for max-style folds: compares below every operand.
    fn max_identity() -> Self;

    /// Identity for min-style folds: compares above every operand.
    fn min_identity() -> Self;
}

impl Element for f32 {
    const IS_COMPLEX: bool = false;
    type Real = f32;

    fn from_real(r: f32) -> Self {
        r
    }

    fn ord_key(self) -> f32 {
        self
    }

    fn abs_val(self) -> Self {
        self.abs()
    }

    fn max_identity() -> Self {
        f32::NEG_INFINITY
    }

    fn min_identity() -> Self {
        f32::INFINITY
    }
}

impl Element for f64 {
    const IS_COMPLEX: bool = false;
    type Real = f64;

    fn from_real(r: f64) -> Self {
        r
    }

    fn ord_key(self) -> f64 {
        self
    }

    fn abs_val(self) -> Self {
        self.abs()
    }

    fn max_identity() -> Self {
        f64::NEG_INFINITY
    }

    fn min_identity() -> Self {
        f64::INFINITY
    }
}

impl<F: Float + NumAssign + Send + Sync + std::fmt::Debug + 'static> Element for Complex<F> {
    const IS_COMPLEX: bool = true;
    type Real = F;

    fn from_real(r: F) -> Self {
        Complex::new(r, F::zero())
    }

    // Complex values order by modulus.
    fn ord_key(self) -> F {
        self.norm()
    }

    fn abs_val(self) -> Self {
        Complex::new(self.norm(), F::zero())
    }

    // |z| >= 0 for every z, so the zero element is a valid max identity.
    fn max_identity() -> Self {
        Complex::zero()
    }

    fn min_identity() -> Self {
        Complex::new(F::infinity(), F::zero())
    }
}
