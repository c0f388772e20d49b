//! Latest-snapshot storage
//!
//! The gateway keeps exactly one [`Snapshot`](crate::Snapshot) per device and
//! nothing else: no history, no eviction, no persistence past process lifetime.
//!
//! ## Design
//!
//! - **Trait-based**: `SnapshotStore` lets the pipeline and the subscriber
//!   handlers share one injected store without knowing its backing
//! - **Async**: operations are async so a fallible backend can do I/O
//! - **Short critical sections**: the in-memory store holds its lock only for
//!   the copy of a single record
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use telemetry_gateway::storage::{MemoryStore, SnapshotStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
//! let latest = store.get(7).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::SnapshotStore;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
