//! Stores read by the evaluation engine
//!
//! Three trait-based stores keep the engine independent of where readings,
//! subscriptions and recipients live.
//!
//! ## Design
//!
//! - **Trait-based**: `ReadingStore`, `SubscriptionStore` and `RecipientDirectory`
//! - **Async**: All operations are async so evaluations can run concurrently
//! - **Fresh reads**: Nothing is cached between evaluations
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with migrations
//! - **In-Memory**: No persistence, for testing and dry runs
//!
//! ## Usage
//!
//! ```no_run
//! use enviro_notify::storage::{SubscriptionStore, sqlite::SqliteBackend};
//! use enviro_notify::MetricType;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./enviro.db").await?;
//!     let band = backend.find_global_band(MetricType::Uv, 8.2).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{ReadingStore, RecipientDirectory, SubscriptionStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{
    BandIssue, BandUpsert, GlobalBand, PersonalThreshold, ReachableRecipient, Recipient,
    ThresholdUpsert, validate_bands,
};
