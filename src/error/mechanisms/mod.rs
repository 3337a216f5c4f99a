//! Recovery mechanisms applied after retries are exhausted
pub mod degraded_mode;

// Re-export main types
pub use degraded_mode::{
    DegradationRegistry, DegradationStrategy, FallbackProvider, NoFallback, Outcome,
    StaticFallback,
};
