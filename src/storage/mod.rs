//! Registry storage.
//!
//! The traits define the contract; [`memory`] provides the thread-safe
//! in-memory backend used by the batch pipeline.

mod memory;
mod traits;

pub use memory::{InMemoryClassificationStore, InMemoryEntityStore};
pub use traits::{ClassificationStore, EntityStore, StorageError, Upsert};
