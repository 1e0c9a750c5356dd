//! Request coalescing on top of a cache.

pub mod coordinator;


pub use coordinator::{FlightStats, RequestCoordinator};
