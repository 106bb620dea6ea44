//! Parallel execution engine for elementwise and reduction ops over strided
//! n-dimensional array views.
//!
//! Given an operation descriptor and one or more strided views over
//! caller-owned buffers, [`OpExecutioner`] classifies the operand layout,
//! decides between a single flat pass and a decomposition into 1-D
//! sub-tensors, and runs the work as a recursive fork-join task tree with a
//! configurable sequential threshold.
//!
//! # Core Types
//!
//! - [`NdView`] / [`NdViewMut`]: zero-copy strided views over existing data
//! - [`NdArray`]: minimal owned row-major container for results
//! - [`OpExecutioner`]: the dispatch front door
//!
//! # Operation Kinds
//!
//! Operations form a closed set of four kinds, one trait each:
//!
//! - [`TransformOp`]: elementwise `z[i] = op(x[i])` or `op(x[i], y[i])`
//! - [`AccumulationOp`]: reduction to a scalar (or one scalar per retained
//!   axis combination)
//! - [`ScalarOp`]: elementwise against a captured constant
//! - [`IndexAccumulationOp`]: reduction to a *position*, e.g. arg-max
//!
//! # Example
//!
//! ```rust
//! use ndexec::{NdArray, NdView, OpExecutioner};
//! use ndexec::ops::{Add, ArgMax, Sum};
//!
//! let exec = OpExecutioner::new();
//!
//! let x = vec![3.0f64, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
//! let view = NdView::new(&x, &[8], &[1], 0).unwrap();
//!
//! let total = exec.accumulate(&Sum, &view).unwrap();
//! assert_eq!(total, 31.0);
//!
//! let peak = exec.index_accumulate(&ArgMax, &view).unwrap();
//! assert_eq!(peak, 5);
//!
//! let y = vec![10.0f64; 8];
//! let yv = NdView::new(&y, &[8], &[1], 0).unwrap();
//! let mut z = NdArray::zeros(&[8]);
//! exec.transform_pair(&Add, &view, &yv, &mut z.view_mut()).unwrap();
//! assert_eq!(z.data()[0], 13.0);
//! ```
//!
//! # Parallelism
//!
//! Above the threshold a buffer range splits into `n / 2` and `n - n / 2`
//! halves executed under [`rayon::join`]; partial reduction results merge in
//! first-half/second-half order so non-commutative combiners (index
//! tie-breaking in particular) stay deterministic. Complex element types
//! bypass the task tree entirely and run sequentially.

mod element;
mod executioner;
mod layout;
pub mod ops;
mod reduce;
mod task;
pub mod view;

pub use element::Element;
pub use executioner::{OpExecutioner, OpOutput, OpRef};
pub use layout::{choose_tensor_dimension, classify, Execution, Tensor1dStats};
pub use ops::{AccumulationOp, IndexAccumulationOp, ScalarOp, TransformOp};
pub use view::{NdArray, NdView, NdViewMut, ViewLayout};

/// Default number of elements below which a buffer task runs sequentially.
///
/// Ranges longer than this split in half and run as parallel sub-tasks.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 8192;

/// Environment variable consulted by [`OpExecutioner::from_env`] for a
/// process-wide threshold override.
pub const PARALLEL_THRESHOLD_ENV: &str = "NDEXEC_PARALLEL_THRESHOLD";

/// Errors that can occur while validating views or dispatching operations.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Array shapes are incompatible for the operation.
    #[error("shape mismatch: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    /// Array ranks do not match.
    #[error("rank mismatch: {0} vs {1}")]
    RankMismatch(usize, usize),

    /// Invalid axis index for the given array rank.
    #[error("invalid axis {axis} for rank {rank}")]
    InvalidAxis { axis: usize, rank: usize },

    /// Reduction called with an empty axis list.
    #[error("reduction requires at least one axis")]
    EmptyAxes,

    /// Stride array length doesn't match the shape.
    #[error("stride and shape length mismatch: {0} vs {1}")]
    StrideLengthMismatch(usize, usize),

    /// The view addresses elements outside its backing buffer.
    #[error("view exceeds buffer bounds: element {index} of buffer length {len}")]
    OutOfBounds { index: usize, len: usize },

    /// Integer overflow while computing an element offset.
    #[error("offset overflow while computing element address")]
    OffsetOverflow,

    /// The parallel-split threshold must be a positive element count.
    #[error("parallel threshold must be > 0 (is: {0})")]
    InvalidThreshold(usize),

    /// Accumulation/IndexAccumulation routed through the generic axis-wise
    /// entry point. These kinds have dedicated axis-wise drivers and must
    /// never reach the generic one.
    #[error("{kind} op \"{name}\" must use its dedicated entry point, not the generic exec")]
    WrongEntryPoint {
        kind: &'static str,
        name: &'static str,
    },

    /// A generic dispatch that writes a result was given no destination.
    #[error("op \"{0}\" requires a destination view")]
    MissingDestination(&'static str),

    /// An index accumulation over a view with no elements has no position
    /// to report.
    #[error("index accumulation over an empty view")]
    EmptyInput,

    /// A descriptor claimed pass-through execution but supplied none.
    #[error("pass-through op \"{0}\" supplies no execution")]
    PassThroughUnsupported(&'static str),
}

/// Result type for execution-engine operations.
pub type Result<T> = std::result::Result<T, ExecError>;
