//! Typed persistence interface
//!
//! The stores own row mapping and SQL; entities come out as plain owned
//! values. Concurrent database operations across the whole pipeline are
//! capped by a shared counting semaphore to bound contention.

pub mod articles;
pub mod sources;

pub use articles::{ArticleFilter, ArticleStore, NameCount, TopicCount};
pub use sources::SourceStore;

use std::sync::Arc;
use tokio::sync::Semaphore;

/// Pipeline-wide cap on in-flight database operations
pub const MAX_CONCURRENT_DB_OPS: usize = 5;

/// Build the semaphore shared by all stores
pub fn db_semaphore() -> Arc<Semaphore> {
    Arc::new(Semaphore::new(MAX_CONCURRENT_DB_OPS))
}
