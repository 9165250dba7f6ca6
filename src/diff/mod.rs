//! Differentiation primitives consumed by the evaluation caches.

pub mod dual;
pub mod finite_diff;
pub mod scalar;
pub mod tape;

// Re-export commonly used types
pub use dual::Dual;
pub use finite_diff::FdScheme;
pub use scalar::Scalar;
pub use tape::Tape;
