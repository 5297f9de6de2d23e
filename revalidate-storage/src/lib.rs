//! revalidate Storage - Persistent Store Trait and Backends
//!
//! Defines the durable key-value store that cache instances share, plus two
//! implementations:
//!
//! - [`MemoryStore`]: process-local, quota-aware, suited to tests and
//!   single-process apps.
//! - [`LmdbStore`]: durable across restarts, backed by LMDB via heed.
//!
//! Both hand out sibling contexts whose writes are announced to one another
//! through [`StoreSubscription`] handles.

pub mod lmdb;
pub mod memory;
pub mod subscription;
pub mod traits;

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::MemoryStore;
pub use subscription::{ChangeFeed, StoreEvent, StoreSubscription, DEFAULT_FEED_CAPACITY};
pub use traits::{ContextId, KeyValueStore, StoreChange, StoreStats};

pub use revalidate_core::StoreError;
