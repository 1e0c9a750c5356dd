#[path = "shared/bytes/mod.rs"]
pub mod bytes;
#[path = "shared/dedlog/mod.rs"]
pub mod dedlog;
#[path = "shared/time/mod.rs"]
pub mod time;

pub mod cache;
pub mod config;
pub mod error;
pub mod flight;
pub mod metrics;
pub mod pool;
pub mod shutdown;

pub use cache::{Cache, DurableCacheAdapter, Lookup, MemoryStore, RawStore, ReadMode, ResultCache};
pub use error::{Error, Result, StoreError};
pub use flight::RequestCoordinator;
pub use pool::WorkerPool;
