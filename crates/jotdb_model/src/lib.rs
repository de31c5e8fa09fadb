//! # jotdb Model
//!
//! Document model for jotdb.
//!
//! This crate provides:
//! - The dynamic [`Value`] type documents are made of
//! - The single-line text codec with `$$date` envelopes
//! - One total order across all value kinds, plus strict deep equality
//! - The query evaluator ([`match_query`])
//! - The update-modifier machinery ([`modify`])
//!
//! It performs no I/O; the datastore and persistence layers live in
//! `jotdb_core`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compare;
mod error;
mod query;
mod serialize;
mod update;
mod value;

pub use compare::{are_things_equal, compare_things, get_dot_value};
pub use error::{ModelError, ModelResult};
pub use query::match_query;
pub use serialize::{
    check_key, check_object, deserialize, serialize, DATE_KEY, DELETED_KEY, INDEX_CREATED_KEY,
    INDEX_REMOVED_KEY,
};
pub use update::modify;
pub use value::{EpochMillis, Value, WherePredicate};
