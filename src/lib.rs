//! # Bazaar
//!
//! Storage core for a small marketplace backend: accounts and product
//! listings held in memory, persisted as JSON snapshots after every
//! mutation, plus an in-memory cache of single-use password recovery tokens.
//!
//! ## Core Concepts
//!
//! - **Records**: Schema-free JSON objects, unique per kind by a key field
//! - **Collections**: Ordered records of one kind behind a per-kind lock
//! - **Snapshots**: One pretty-printed JSON file per kind, replaced atomically
//! - **Recovery tokens**: 256-bit secrets, one live token per subject, never persisted
//!
//! ## Example
//!
//! ```ignore
//! use bazaar::{Record, RecordPatch, RecordStore, StoreConfig, ACCOUNTS};
//!
//! let store = RecordStore::open_or_create(StoreConfig {
//!     data_dir: "./data".into(),
//!     ..Default::default()
//! })?;
//!
//! store.insert(ACCOUNTS, Record::new().with("username", "alice"))?;
//! store.update(ACCOUNTS, "alice", &RecordPatch::new().set("username", "alicia"))?;
//! assert!(store.find_by_key(ACCOUNTS, "alice")?.is_none());
//! ```

pub mod collection;
pub mod error;
pub mod market;
pub mod recovery;
pub mod snapshot;
pub mod store;
pub mod types;

// Re-exports
pub use collection::Collection;
pub use error::{Result, StoreError};
pub use market::{
    AccountInfo, AccountStatus, Marketplace, MarketplaceConfig, NewAccount, NewListing,
    DEFAULT_ABOUT, DEFAULT_RECOVERY_TTL,
};
pub use recovery::{is_well_formed_secret, RecoveryTokenCache, SECRET_BYTES, SECRET_LEN};
pub use snapshot::SnapshotFile;
pub use store::{KindConfig, RecordStore, StoreConfig, ACCOUNTS, LISTINGS};
pub use types::*;
