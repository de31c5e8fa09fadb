//! Lazy query cursors.

use crate::datastore::Datastore;
use crate::error::DatastoreResult;
use jotdb_model::Value;

/// The fully assembled description of one find operation.
///
/// Shared by the immediate `find` forms and the cursor chain.
#[derive(Clone)]
pub(crate) struct FindSpec {
    pub(crate) query: Value,
    pub(crate) sort: Option<Value>,
    pub(crate) skip: Option<usize>,
    pub(crate) limit: Option<usize>,
    pub(crate) projection: Option<Value>,
}

impl FindSpec {
    pub(crate) fn new(query: Value) -> Self {
        Self {
            query,
            sort: None,
            skip: None,
            limit: None,
            projection: None,
        }
    }
}

/// A lazy query: build it up with `sort` / `skip` / `limit` /
/// `projection`, then run it with [`Cursor::exec`] or [`Cursor::count`].
///
/// Execution enqueues a single task on the datastore's queue, so a
/// cursor observes the effects of everything submitted before it ran.
///
/// # Example
///
/// ```rust,ignore
/// let page = db
///     .cursor(doc! { "system" => "sol" })
///     .sort(doc! { "order" => 1 })
///     .skip(10)
///     .limit(5)
///     .projection(doc! { "name" => 1, "order" => 1 })
///     .exec()?;
/// ```
pub struct Cursor<'a> {
    datastore: &'a Datastore,
    spec: FindSpec,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(datastore: &'a Datastore, query: Value) -> Self {
        Self {
            datastore,
            spec: FindSpec::new(query),
        }
    }

    /// Sorts results by the given `{field: 1 | -1, ...}` specification.
    ///
    /// Keys apply in declaration order; `1` is ascending under the model
    /// total order, `-1` descending.
    #[must_use]
    pub fn sort(mut self, spec: Value) -> Self {
        self.spec.sort = Some(spec);
        self
    }

    /// Skips the first `n` results (after sorting).
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.spec.skip = Some(n);
        self
    }

    /// Caps the number of results (after sorting and skipping).
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.spec.limit = Some(n);
        self
    }

    /// Restricts returned fields with a `{field: 1, ...}` (keep) or
    /// `{field: 0, ...}` (omit) specification. The two modes cannot be
    /// mixed, except that `_id` may always be included or excluded.
    #[must_use]
    pub fn projection(mut self, spec: Value) -> Self {
        self.spec.projection = Some(spec);
        self
    }

    /// Runs the query and returns matching documents as deep copies.
    pub fn exec(self) -> DatastoreResult<Vec<Value>> {
        self.datastore.run_find(self.spec)
    }

    /// Runs the query and returns the number of matching documents
    /// (after `skip` and `limit` are applied).
    pub fn count(self) -> DatastoreResult<usize> {
        Ok(self.datastore.run_find(self.spec)?.len())
    }
}
