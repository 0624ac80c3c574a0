//! Chain job persistence.
//!
//! This crate provides:
//! - The `JobStore` seam the orchestrator reads and writes chains through
//! - A Redis implementation (JSON rows plus per-status index sets)
//! - An in-memory implementation for tests

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use redis_store::{RedisJobStore, StoreConfig};
pub use store::JobStore;
