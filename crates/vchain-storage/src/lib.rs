//! Object storage for finished chain videos.
//!
//! This crate provides:
//! - The `ObjectStorage` seam the worker uploads through
//! - A Cloudflare R2 (S3-compatible) client
//! - An in-memory store for tests
//! - The key layout for chain artifacts

pub mod client;
pub mod error;
pub mod keys;
pub mod storage;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use keys::{chain_prefix, final_video_key, thumbnail_key};
pub use storage::{MemoryStorage, ObjectStorage, StoredObject};
