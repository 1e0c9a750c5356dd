//! Metrics for the pool, caches and coordinator.
//!
//! Names are plain strings; no exporter is installed here, so every call is a
//! no-op until the host application installs a `metrics` recorder.

pub mod meter;

// Re-export commonly used items
pub use meter::*;
