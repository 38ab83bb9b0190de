//! # Asynchroza Redis
//!
//! Coordination store access for the dispatcher.
//!
//! ## Design Principles
//!
//! - **No business logic** - leadership, pending tracking and endpoint bookkeeping
//!   live in the dispatcher and only see the [`CoordinationStore`] trait
//! - **Atomic primitives only** - every conditional write is a single Redis command
//!   or Lua script, so no client-side locking is needed
//! - **Swappable** - [`RedisStore`] for deployments, [`MemoryStore`] for tests and
//!   local runs
//!
//! ## Example
//!
//! ```rust,no_run
//! use asynchroza_redis::{CoordinationStore, RedisStore};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = RedisStore::connect("redis://localhost:6379").await?;
//!
//!     let acquired = store
//!         .set_if_absent("leadership_lock", "node-1", Duration::from_secs(10))
//!         .await?;
//!     println!("acquired: {acquired}");
//!
//!     Ok(())
//! }
//! ```

mod client;
mod memory;
mod scripts;
mod store;

pub use client::RedisStore;
pub use memory::MemoryStore;
pub use store::{CoordinationStore, MessageStream};

// Re-export commonly used types
pub use redis::RedisError;

use thiserror::Error;

/// Coordination store failure.
///
/// Always transient from the caller's point of view: log it and retry on the next
/// scheduled tick. A store that answered "no" (lock already held, member missing)
/// returns `Ok(false)` instead.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
