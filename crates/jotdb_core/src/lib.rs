//! # jotdb Core
//!
//! Embedded, single-file document store.
//!
//! This crate provides:
//! - [`Datastore`]: the CRUD facade, with upserts, multi-updates, TTL
//!   expiration and timestamp fields
//! - Secondary [`Index`]es with unique and sparse variants
//! - Append-log persistence with atomic compaction and crash recovery
//! - A single FIFO execution queue serializing all stateful operations
//!
//! Documents are [`Value`] trees from `jotdb_model`, re-exported here
//! together with the `doc!` / `array!` construction macros.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod datastore;
mod error;
mod events;
mod executor;
mod id;
mod index;
mod options;
mod persistence;

pub use cursor::Cursor;
pub use datastore::{
    AffectedDocuments, Datastore, RemoveOptions, UpdateOptions, UpdateResult,
};
pub use error::{DatastoreError, DatastoreResult};
pub use events::CompactionEvent;
pub use id::{create_doc_id, DOC_ID_LEN};
pub use index::{Index, IndexOptions, SharedDoc};
pub use options::{DatastoreOptions, LoadCallback, SerializationHook};

pub use jotdb_model::{array, doc, ModelError, Value};
