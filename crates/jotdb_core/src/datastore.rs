//! Datastore facade.
//!
//! A `Datastore` owns its indexes, its persistence layer and one
//! execution queue. Every stateful operation runs as a queued task, so
//! operations submitted in order complete in order and each observes the
//! effects of all prior ones. Mutations are all-or-nothing: any index or
//! persistence failure rolls the in-memory and on-disk state back to
//! what it was before the call.

use crate::cursor::{Cursor, FindSpec};
use crate::error::{DatastoreError, DatastoreResult};
use crate::events::{CompactionEvent, CompactionFeed};
use crate::executor::Executor;
use crate::id::create_doc_id;
use crate::index::{Index, IndexOptions, SharedDoc};
use crate::options::DatastoreOptions;
use crate::persistence::{index_options_to_value, Persistence};
use jotdb_model::{
    check_object, compare_things, get_dot_value, match_query, modify, Value, DELETED_KEY,
    INDEX_CREATED_KEY, INDEX_REMOVED_KEY,
};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Options for [`Datastore::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Update every match instead of only the first.
    pub multi: bool,
    /// Insert a document synthesized from the query (or the replacement
    /// body) when nothing matches.
    pub upsert: bool,
    /// Return the post-update documents in the result.
    pub return_updated_docs: bool,
}

/// Options for [`Datastore::remove`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Remove every match instead of only the first.
    pub multi: bool,
}

/// Documents returned by an update.
#[derive(Debug, Clone, PartialEq)]
pub enum AffectedDocuments {
    /// A single document (upsert, or non-multi update).
    Single(Box<Value>),
    /// All updated documents (multi update).
    Multiple(Vec<Value>),
}

/// Result of [`Datastore::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    /// Number of documents written (1 for an upsert).
    pub num_affected: usize,
    /// Present for upserts and when `return_updated_docs` was set.
    pub affected_documents: Option<AffectedDocuments>,
    /// True when the update inserted a new document.
    pub upsert: bool,
}

/// In-memory state: every index, plus the TTL declarations.
struct DatastoreState {
    indexes: HashMap<String, Index>,
    /// field name -> expireAfterSeconds, for the indexes that carry it.
    ttl_indexes: HashMap<String, f64>,
}

impl DatastoreState {
    fn new() -> Self {
        let mut indexes = HashMap::new();
        indexes.insert("_id".to_string(), Index::new(IndexOptions::new("_id").unique()));
        Self {
            indexes,
            ttl_indexes: HashMap::new(),
        }
    }

    fn id_index(&self) -> &Index {
        self.indexes.get("_id").expect("the _id index always exists")
    }

    fn non_id_index_options(&self) -> Vec<IndexOptions> {
        self.indexes
            .values()
            .filter(|index| index.field_name() != "_id")
            .map(|index| index.options().clone())
            .collect()
    }

    /// Adds a document to every index; on rejection the indexes already
    /// touched are undone before the error is returned.
    fn add_to_indexes(&mut self, doc: &SharedDoc) -> DatastoreResult<()> {
        let names: Vec<String> = self.indexes.keys().cloned().collect();
        let mut done: Vec<&String> = Vec::with_capacity(names.len());
        for name in &names {
            if let Err(error) = self.indexes.get_mut(name).expect("known index").insert(doc) {
                for undone in done {
                    self.indexes.get_mut(undone).expect("known index").remove(doc);
                }
                return Err(error);
            }
            done.push(name);
        }
        Ok(())
    }

    fn remove_from_indexes(&mut self, doc: &SharedDoc) {
        for index in self.indexes.values_mut() {
            index.remove(doc);
        }
    }

    /// Applies a batch of replacements to every index; total rollback on
    /// any rejection.
    fn update_indexes(&mut self, pairs: &[(SharedDoc, SharedDoc)]) -> DatastoreResult<()> {
        let names: Vec<String> = self.indexes.keys().cloned().collect();
        let mut done: Vec<&String> = Vec::with_capacity(names.len());
        for name in &names {
            let index = self.indexes.get_mut(name).expect("known index");
            if let Err(error) = index.update_multiple(pairs) {
                for undone in done {
                    self.indexes
                        .get_mut(undone)
                        .expect("known index")
                        .revert_update_multiple(pairs);
                }
                return Err(error);
            }
            done.push(name);
        }
        Ok(())
    }

    fn revert_index_updates(&mut self, pairs: &[(SharedDoc, SharedDoc)]) {
        for index in self.indexes.values_mut() {
            index.revert_update_multiple(pairs);
        }
    }

    /// Narrows the candidate set for a query.
    ///
    /// The first top-level key (in the query's declared order) that names
    /// an indexed field and carries a usable clause wins: a literal
    /// equality uses `get_matching`, `$in` a multi-key lookup, and a
    /// comparison bound a range lookup. Anything else scans all data.
    fn candidates(&self, query: &Value) -> DatastoreResult<Vec<SharedDoc>> {
        if let Some(clauses) = query.as_object() {
            for (key, value) in clauses {
                if key.starts_with('$') {
                    continue;
                }
                let Some(index) = self.indexes.get(key) else {
                    continue;
                };
                match value {
                    Value::String(_)
                    | Value::Number(_)
                    | Value::Bool(_)
                    | Value::DateTime(_)
                    | Value::Null => return Ok(index.get_matching(value)),
                    Value::Object(_) => {
                        if let Some(in_list) = value.get("$in") {
                            let keys = in_list.as_array().ok_or_else(|| {
                                jotdb_model::ModelError::invalid_query(
                                    "$in operator called with a non-array",
                                )
                            })?;
                            return Ok(index.get_matching_many(keys));
                        }
                        if ["$lt", "$lte", "$gt", "$gte"]
                            .iter()
                            .any(|op| value.get(op).is_some())
                        {
                            return index.get_between_bounds(value);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(self.id_index().get_all())
    }
}

struct DatastoreCore {
    timestamp_data: bool,
    state: Mutex<DatastoreState>,
    persistence: Persistence,
    executor: Executor,
    compaction_feed: CompactionFeed,
}

/// An embedded, single-file document store.
///
/// Documents are schema-free [`Value`] objects queried with a
/// MongoDB-style operator DSL. All operations are synchronous from the
/// caller's point of view but run serialized on the datastore's own
/// worker, in submission order.
///
/// A data file belongs to exactly one datastore at a time; opening two
/// datastores over the same file leaves both undefined.
///
/// # Example
///
/// ```rust,ignore
/// use jotdb_core::{Datastore, DatastoreOptions};
/// use jotdb_model::doc;
///
/// let db = Datastore::new(DatastoreOptions::new().filename("app.db"))?;
/// db.load_database()?;
///
/// db.insert(doc! { "planet" => "mars", "order" => 4 })?;
/// let inner = db.find(doc! { "order" => doc! { "$lte" => 4 } })?;
/// ```
pub struct Datastore {
    core: Arc<DatastoreCore>,
}

impl Datastore {
    /// Opens a datastore.
    ///
    /// No file is touched unless `autoload` is set; call
    /// [`Datastore::load_database`] before reading or writing a
    /// persistent store. With `autoload`, a load failure is delivered to
    /// the `onload` callback when one is installed, and returned as an
    /// error here otherwise.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use jotdb_core::{Datastore, DatastoreOptions};
    ///
    /// let db = Datastore::new(
    ///     DatastoreOptions::new()
    ///         .filename("app.db")
    ///         .timestamp_data(true),
    /// )?;
    /// db.load_database()?;
    /// ```
    pub fn new(mut options: DatastoreOptions) -> DatastoreResult<Self> {
        let onload = options.onload.take();
        let autoload = options.autoload;
        let timestamp_data = options.timestamp_data;
        let persistence = Persistence::new(&mut options)?;

        let datastore = Self {
            core: Arc::new(DatastoreCore {
                timestamp_data,
                state: Mutex::new(DatastoreState::new()),
                persistence,
                executor: Executor::new(),
                compaction_feed: CompactionFeed::new(),
            }),
        };

        if autoload {
            let outcome = datastore.load_database();
            match onload {
                Some(callback) => callback(outcome),
                None => outcome?,
            }
        }
        Ok(datastore)
    }

    /// Opens a fresh in-memory datastore, mostly for tests.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let db = Datastore::in_memory();
    /// db.insert(doc! { "scratch" => true })?;
    /// ```
    pub fn in_memory() -> Self {
        Self::new(DatastoreOptions::new().in_memory_only(true))
            .expect("in-memory datastores cannot fail to open")
    }

    /// Loads (or reloads) the database from the data file.
    ///
    /// All in-memory state is reset and the append log is replayed, then
    /// compacted. Fails with a corruption error when too many lines are
    /// unreadable, or a unique violation when a declared index rejects
    /// the replayed documents; either way the in-memory state is left
    /// empty.
    pub fn load_database(&self) -> DatastoreResult<()> {
        let core = Arc::clone(&self.core);
        self.core.executor.run(move || core.load_database_task())
    }

    /// Rewrites the data file down to the current live state.
    pub fn persist_cached_database(&self) -> DatastoreResult<()> {
        let core = Arc::clone(&self.core);
        self.core.executor.run(move || core.compact_task())
    }

    /// Subscribes to `compaction.done` events.
    pub fn subscribe_compaction(&self) -> Receiver<CompactionEvent> {
        self.core.compaction_feed.subscribe()
    }

    /// Synchronous snapshot of every live document, as deep copies.
    #[must_use]
    pub fn get_all_data(&self) -> Vec<Value> {
        let state = self.core.state.lock();
        state
            .id_index()
            .get_all()
            .iter()
            .map(|doc| (**doc).clone())
            .collect()
    }

    /// Inserts one document, returning it with its `_id` assigned.
    pub fn insert(&self, doc: Value) -> DatastoreResult<Value> {
        let core = Arc::clone(&self.core);
        let mut inserted = self
            .core
            .executor
            .run(move || core.insert_docs(vec![doc]))?;
        Ok(inserted.pop().expect("one document in, one out"))
    }

    /// Inserts a batch of documents, all-or-nothing.
    pub fn insert_many(&self, docs: Vec<Value>) -> DatastoreResult<Vec<Value>> {
        let core = Arc::clone(&self.core);
        self.core.executor.run(move || core.insert_docs(docs))
    }

    /// Returns every document matching the query, as deep copies.
    pub fn find(&self, query: Value) -> DatastoreResult<Vec<Value>> {
        self.run_find(FindSpec::new(query))
    }

    /// [`Datastore::find`] with a projection applied to the results.
    pub fn find_projected(&self, query: Value, projection: Value) -> DatastoreResult<Vec<Value>> {
        let mut spec = FindSpec::new(query);
        spec.projection = Some(projection);
        self.run_find(spec)
    }

    /// Returns the first matching document, if any.
    pub fn find_one(&self, query: Value) -> DatastoreResult<Option<Value>> {
        let mut spec = FindSpec::new(query);
        spec.limit = Some(1);
        Ok(self.run_find(spec)?.pop())
    }

    /// Counts matching documents.
    pub fn count(&self, query: Value) -> DatastoreResult<usize> {
        Ok(self.run_find(FindSpec::new(query))?.len())
    }

    /// Starts a lazy cursor over the query.
    #[must_use]
    pub fn cursor(&self, query: Value) -> Cursor<'_> {
        Cursor::new(self, query)
    }

    /// Updates matching documents, or upserts.
    pub fn update(
        &self,
        query: Value,
        update: Value,
        options: UpdateOptions,
    ) -> DatastoreResult<UpdateResult> {
        let core = Arc::clone(&self.core);
        self.core
            .executor
            .run(move || core.update_task(&query, &update, options))
    }

    /// Removes matching documents, returning how many were deleted.
    pub fn remove(&self, query: Value, options: RemoveOptions) -> DatastoreResult<usize> {
        let core = Arc::clone(&self.core);
        self.core
            .executor
            .run(move || core.remove_task(&query, options.multi))
    }

    /// Declares an index over a field.
    ///
    /// Idempotent: re-declaring an existing field is a no-op and the
    /// first declaration's options are retained. Creation over
    /// pre-existing data that violates a unique constraint fails and the
    /// partial index is discarded.
    pub fn ensure_index(&self, options: IndexOptions) -> DatastoreResult<()> {
        let core = Arc::clone(&self.core);
        self.core
            .executor
            .run(move || core.ensure_index_task(options))
    }

    /// Drops an index.
    pub fn remove_index(&self, field_name: &str) -> DatastoreResult<()> {
        let core = Arc::clone(&self.core);
        let field_name = field_name.to_string();
        self.core
            .executor
            .run(move || core.remove_index_task(&field_name))
    }

    pub(crate) fn run_find(&self, spec: FindSpec) -> DatastoreResult<Vec<Value>> {
        let core = Arc::clone(&self.core);
        self.core.executor.run(move || core.find_task(&spec))
    }
}

impl Drop for Datastore {
    fn drop(&mut self) {
        self.core.executor.shutdown();
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("Datastore")
            .field("documents", &state.id_index().get_all().len())
            .field("indexes", &state.indexes.len())
            .finish_non_exhaustive()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

impl DatastoreCore {
    fn load_database_task(self: &Arc<Self>) -> DatastoreResult<()> {
        // Nothing backs an in-memory store; its state stays as it is.
        if self.persistence.is_in_memory() {
            return Ok(());
        }
        let raw = self.persistence.load_raw_state()?;

        let mut state = self.state.lock();
        *state = DatastoreState::new();
        for options in raw.indexes {
            if let Some(seconds) = options.expire_after_seconds {
                state.ttl_indexes.insert(options.field_name.clone(), seconds);
            }
            state
                .indexes
                .insert(options.field_name.clone(), Index::new(options));
        }

        let docs: Vec<SharedDoc> = raw.documents.into_iter().map(Arc::new).collect();
        for index in state.indexes.values_mut() {
            if let Err(error) = index.reset_with(&docs) {
                *state = DatastoreState::new();
                return Err(error);
            }
        }

        let live = state.id_index().get_all();
        let index_options = state.non_id_index_options();
        drop(state);

        self.persistence
            .persist_cached_database(&live, &index_options)?;
        self.compaction_feed.emit(CompactionEvent {
            live_documents: live.len(),
            index_count: index_options.len(),
        });
        Ok(())
    }

    fn compact_task(self: &Arc<Self>) -> DatastoreResult<()> {
        let state = self.state.lock();
        let live = state.id_index().get_all();
        let index_options = state.non_id_index_options();
        drop(state);

        self.persistence
            .persist_cached_database(&live, &index_options)?;
        self.compaction_feed.emit(CompactionEvent {
            live_documents: live.len(),
            index_count: index_options.len(),
        });
        Ok(())
    }

    /// Validates a document for insertion and gives it an `_id` and
    /// timestamps as needed.
    fn prepare_for_insertion(
        &self,
        state: &DatastoreState,
        doc: Value,
    ) -> DatastoreResult<SharedDoc> {
        let mut doc = doc;
        if !doc.is_object() {
            return Err(DatastoreError::invalid_argument(
                "only objects can be inserted",
            ));
        }

        match doc.get("_id") {
            None => doc.set("_id", Value::String(self.fresh_doc_id(state))),
            Some(id) if !id.is_truthy() => {
                doc.set("_id", Value::String(self.fresh_doc_id(state)));
            }
            Some(Value::String(_)) => {}
            Some(other) => {
                return Err(DatastoreError::invalid_argument(format!(
                    "a document _id must be a string, got {}",
                    other.kind()
                )));
            }
        }

        if self.timestamp_data {
            let now = Value::DateTime(now_millis());
            if doc.get("createdAt").is_none() {
                doc.set("createdAt", now.clone());
            }
            if doc.get("updatedAt").is_none() {
                doc.set("updatedAt", now);
            }
        }

        check_object(&doc)?;
        Ok(Arc::new(doc))
    }

    /// Draws ids until one is free in the `_id` index.
    fn fresh_doc_id(&self, state: &DatastoreState) -> String {
        loop {
            let id = create_doc_id();
            if state
                .id_index()
                .get_matching(&Value::String(id.clone()))
                .is_empty()
            {
                return id;
            }
        }
    }

    /// Inserts a batch: validation, indexes with rollback, then one
    /// durable append. All-or-nothing.
    fn insert_docs(self: &Arc<Self>, docs: Vec<Value>) -> DatastoreResult<Vec<Value>> {
        let mut state = self.state.lock();

        let mut prepared: Vec<SharedDoc> = Vec::with_capacity(docs.len());
        for doc in docs {
            prepared.push(self.prepare_for_insertion(&state, doc)?);
        }

        let mut added: Vec<&SharedDoc> = Vec::with_capacity(prepared.len());
        for doc in &prepared {
            if let Err(error) = state.add_to_indexes(doc) {
                for done in added {
                    state.remove_from_indexes(done);
                }
                return Err(error);
            }
            added.push(doc);
        }

        let records: Vec<Value> = prepared.iter().map(|doc| (**doc).clone()).collect();
        if let Err(error) = self.persistence.persist_new_state(&records) {
            for doc in &prepared {
                state.remove_from_indexes(doc);
            }
            return Err(error);
        }

        Ok(records)
    }

    /// Drops expired documents from a candidate list, scheduling their
    /// removal. The removals run as their own queued tasks; until one
    /// runs, the document stays on disk but is never returned.
    fn expire_stale(
        self: &Arc<Self>,
        state: &DatastoreState,
        candidates: Vec<SharedDoc>,
    ) -> Vec<SharedDoc> {
        if state.ttl_indexes.is_empty() {
            return candidates;
        }
        let now = now_millis();
        let mut live = Vec::with_capacity(candidates.len());
        for doc in candidates {
            let expired = state.ttl_indexes.iter().any(|(field, seconds)| {
                matches!(
                    get_dot_value(&doc, field),
                    Value::DateTime(ms) if now > ms + (seconds * 1000.0) as i64
                )
            });
            if !expired {
                live.push(doc);
                continue;
            }
            if let Some(id) = doc.get("_id") {
                let query = Value::Object(vec![("_id".to_string(), id.clone())]);
                let core = Arc::clone(self);
                self.executor.submit(move || {
                    if let Err(error) = core.remove_task(&query, false) {
                        warn!(%error, "failed to remove an expired document");
                    }
                });
            }
        }
        live
    }

    fn find_task(self: &Arc<Self>, spec: &FindSpec) -> DatastoreResult<Vec<Value>> {
        let state = self.state.lock();
        let candidates = state.candidates(&spec.query)?;
        let candidates = self.expire_stale(&state, candidates);

        let mut matched: Vec<SharedDoc> = Vec::new();
        for doc in candidates {
            if match_query(&doc, &spec.query)? {
                matched.push(doc);
            }
        }
        drop(state);

        if let Some(sort_spec) = &spec.sort {
            let entries = sort_spec.as_object().ok_or_else(|| {
                jotdb_model::ModelError::invalid_query("sort specification must be an object")
            })?;
            let mut criteria: Vec<(&String, bool)> = Vec::with_capacity(entries.len());
            for (field, direction) in entries {
                let ascending = match direction.as_number() {
                    Some(d) if d == 1.0 => true,
                    Some(d) if d == -1.0 => false,
                    _ => {
                        return Err(jotdb_model::ModelError::invalid_query(
                            "sort direction must be 1 or -1",
                        )
                        .into())
                    }
                };
                criteria.push((field, ascending));
            }
            matched.sort_by(|a, b| {
                for (field, ascending) in &criteria {
                    let ord = compare_things(
                        &get_dot_value(a, field),
                        &get_dot_value(b, field),
                    );
                    let ord = if *ascending { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let skipped = matched.into_iter().skip(spec.skip.unwrap_or(0));
        let selected: Vec<SharedDoc> = match spec.limit {
            Some(limit) => skipped.take(limit).collect(),
            None => skipped.collect(),
        };

        selected
            .iter()
            .map(|doc| project(doc, spec.projection.as_ref()))
            .collect()
    }

    fn update_task(
        self: &Arc<Self>,
        query: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> DatastoreResult<UpdateResult> {
        if options.upsert {
            let state = self.state.lock();
            let candidates = state.candidates(query)?;
            let candidates = self.expire_stale(&state, candidates);
            let mut found = false;
            for doc in &candidates {
                if match_query(doc, query)? {
                    found = true;
                    break;
                }
            }
            drop(state);

            if !found {
                // A valid plain document is inserted as given; anything
                // else seeds the new document from the query's literal
                // equalities and applies the update to it.
                let to_insert = if check_object(update).is_ok() {
                    update.deep_copy_strict()
                } else {
                    modify(&query.deep_copy_strict(), update)?
                };
                let mut inserted = self.insert_docs(vec![to_insert])?;
                let doc = inserted.pop().expect("one document in, one out");
                return Ok(UpdateResult {
                    num_affected: 1,
                    affected_documents: Some(AffectedDocuments::Single(Box::new(doc))),
                    upsert: true,
                });
            }
        }

        let mut state = self.state.lock();
        let candidates = state.candidates(query)?;
        let candidates = self.expire_stale(&state, candidates);

        let now = now_millis();
        let mut pairs: Vec<(SharedDoc, SharedDoc)> = Vec::new();
        for doc in candidates {
            if match_query(&doc, query)? && (options.multi || pairs.is_empty()) {
                let mut new_doc = modify(&doc, update)?;
                if self.timestamp_data {
                    // A replacement body would wipe createdAt; restore it.
                    if let Some(created) = doc.get("createdAt") {
                        new_doc.set("createdAt", created.clone());
                    }
                    new_doc.set("updatedAt", Value::DateTime(now));
                }
                pairs.push((doc, Arc::new(new_doc)));
            }
        }

        state.update_indexes(&pairs)?;

        let records: Vec<Value> = pairs.iter().map(|(_, new)| (**new).clone()).collect();
        if let Err(error) = self.persistence.persist_new_state(&records) {
            state.revert_index_updates(&pairs);
            return Err(error);
        }

        let affected_documents = if options.return_updated_docs {
            if options.multi {
                Some(AffectedDocuments::Multiple(records))
            } else {
                records
                    .into_iter()
                    .next()
                    .map(|doc| AffectedDocuments::Single(Box::new(doc)))
            }
        } else {
            None
        };

        Ok(UpdateResult {
            num_affected: pairs.len(),
            affected_documents,
            upsert: false,
        })
    }

    fn remove_task(self: &Arc<Self>, query: &Value, multi: bool) -> DatastoreResult<usize> {
        let mut state = self.state.lock();
        // No TTL pass here: removal must also reach already-stale
        // documents, and the TTL path itself funnels into remove.
        let candidates = state.candidates(query)?;

        let mut to_remove: Vec<SharedDoc> = Vec::new();
        for doc in candidates {
            if match_query(&doc, query)? && (multi || to_remove.is_empty()) {
                to_remove.push(doc);
            }
        }

        let mut tombstones: Vec<Value> = Vec::with_capacity(to_remove.len());
        for doc in &to_remove {
            state.remove_from_indexes(doc);
            let id = doc.get("_id").cloned().unwrap_or(Value::Null);
            tombstones.push(Value::Object(vec![
                ("_id".to_string(), id),
                (DELETED_KEY.to_string(), Value::Bool(true)),
            ]));
        }

        if let Err(error) = self.persistence.persist_new_state(&tombstones) {
            for doc in &to_remove {
                state
                    .add_to_indexes(doc)
                    .expect("re-adding just-removed documents cannot violate uniqueness");
            }
            return Err(error);
        }
        Ok(to_remove.len())
    }

    fn ensure_index_task(self: &Arc<Self>, options: IndexOptions) -> DatastoreResult<()> {
        if options.field_name.is_empty() {
            return Err(DatastoreError::invalid_argument(
                "cannot create an index without a field name",
            ));
        }

        let mut state = self.state.lock();
        // Re-declaring is a no-op; the first declaration's options stay.
        if state.indexes.contains_key(&options.field_name) {
            return Ok(());
        }

        let mut index = Index::new(options.clone());
        let docs = state.id_index().get_all();
        index.reset_with(&docs)?;

        let field_name = options.field_name.clone();
        state.indexes.insert(field_name.clone(), index);
        if let Some(seconds) = options.expire_after_seconds {
            state.ttl_indexes.insert(field_name.clone(), seconds);
        }

        let envelope = Value::Object(vec![(
            INDEX_CREATED_KEY.to_string(),
            index_options_to_value(&options),
        )]);
        if let Err(error) = self.persistence.persist_new_state(&[envelope]) {
            state.indexes.remove(&field_name);
            state.ttl_indexes.remove(&field_name);
            return Err(error);
        }
        Ok(())
    }

    fn remove_index_task(self: &Arc<Self>, field_name: &str) -> DatastoreResult<()> {
        if field_name == "_id" {
            return Err(DatastoreError::invalid_argument(
                "the _id index cannot be removed",
            ));
        }

        let mut state = self.state.lock();
        let removed = state.indexes.remove(field_name);
        let removed_ttl = state.ttl_indexes.remove(field_name);

        let envelope = Value::Object(vec![(
            INDEX_REMOVED_KEY.to_string(),
            Value::String(field_name.to_string()),
        )]);
        if let Err(error) = self.persistence.persist_new_state(&[envelope]) {
            if let Some(index) = removed {
                state.indexes.insert(field_name.to_string(), index);
            }
            if let Some(seconds) = removed_ttl {
                state.ttl_indexes.insert(field_name.to_string(), seconds);
            }
            return Err(error);
        }
        Ok(())
    }
}

/// Applies a projection to one document, returning a deep copy.
///
/// Reuses the update machinery: a keep-projection is a `$set` of the
/// extracted values onto an empty document, an omit-projection a
/// `$unset` on a copy, so dotted paths work in both modes.
fn project(doc: &SharedDoc, projection: Option<&Value>) -> DatastoreResult<Value> {
    let Some(projection) = projection else {
        return Ok((**doc).clone());
    };
    let entries = projection
        .as_object()
        .ok_or_else(|| jotdb_model::ModelError::invalid_query("projection must be an object"))?;
    if entries.is_empty() {
        return Ok((**doc).clone());
    }

    let mut keep_id = true;
    let mut mode: Option<bool> = None;
    let mut keys: Vec<&String> = Vec::new();
    for (key, value) in entries {
        let selected = match value.as_number() {
            Some(n) if n == 1.0 => true,
            Some(n) if n == 0.0 => false,
            _ => {
                return Err(jotdb_model::ModelError::invalid_query(
                    "projection values must be 0 or 1",
                )
                .into())
            }
        };
        if key == "_id" {
            keep_id = selected;
            continue;
        }
        match mode {
            None => mode = Some(selected),
            Some(current) if current != selected => {
                return Err(jotdb_model::ModelError::invalid_query(
                    "cannot both keep and omit fields, except for _id",
                )
                .into())
            }
            _ => {}
        }
        keys.push(key);
    }

    let mut projected = match mode {
        Some(true) => {
            let mut set_fields: Vec<(String, Value)> = Vec::with_capacity(keys.len());
            for key in keys {
                let value = get_dot_value(doc, key);
                if !value.is_undefined() {
                    set_fields.push((key.clone(), value));
                }
            }
            let update = Value::Object(vec![("$set".to_string(), Value::Object(set_fields))]);
            modify(&Value::object(), &update)?
        }
        Some(false) => {
            let unset_fields: Vec<(String, Value)> = keys
                .into_iter()
                .map(|key| (key.clone(), Value::Bool(true)))
                .collect();
            let update = Value::Object(vec![("$unset".to_string(), Value::Object(unset_fields))]);
            modify(doc, &update)?
        }
        // Only _id was mentioned: everything else is kept.
        None => (**doc).clone(),
    };

    if keep_id {
        if let Some(id) = doc.get("_id") {
            projected.set("_id", id.clone());
        }
    } else {
        projected.remove_field("_id");
    }
    Ok(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jotdb_model::{array, doc};

    fn create_db() -> Datastore {
        Datastore::in_memory()
    }

    #[test]
    fn insert_assigns_an_id() {
        let db = create_db();
        let inserted = db.insert(doc! { "planet" => "mars" }).unwrap();
        let id = inserted.doc_id().unwrap();
        assert_eq!(id.len(), crate::id::DOC_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(db.get_all_data().len(), 1);
    }

    #[test]
    fn insert_keeps_user_supplied_id() {
        let db = create_db();
        let inserted = db.insert(doc! { "_id" => "custom", "a" => 1 }).unwrap();
        assert_eq!(inserted.doc_id(), Some("custom"));
    }

    #[test]
    fn falsy_ids_are_replaced() {
        let db = create_db();
        let inserted = db.insert(doc! { "_id" => "", "a" => 1 }).unwrap();
        assert_eq!(inserted.doc_id().unwrap().len(), crate::id::DOC_ID_LEN);

        let inserted = db.insert(doc! { "_id" => Value::Null, "a" => 2 }).unwrap();
        assert_eq!(inserted.doc_id().unwrap().len(), crate::id::DOC_ID_LEN);
    }

    #[test]
    fn non_string_id_is_rejected() {
        let db = create_db();
        let result = db.insert(doc! { "_id" => 42, "a" => 1 });
        assert!(matches!(result, Err(DatastoreError::InvalidArgument { .. })));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let db = create_db();
        db.insert(doc! { "_id" => "x", "a" => 1 }).unwrap();
        let result = db.insert(doc! { "_id" => "x", "a" => 2 });
        assert!(matches!(result, Err(DatastoreError::UniqueViolated { .. })));
        assert_eq!(db.get_all_data().len(), 1);
    }

    #[test]
    fn forbidden_field_names_are_rejected() {
        let db = create_db();
        assert!(db.insert(doc! { "$bad" => 1 }).is_err());
        assert!(db.insert(doc! { "so.bad" => 1 }).is_err());
        assert!(db.insert(doc! { "nested" => doc! { "$deep" => 1 } }).is_err());
        assert!(db.get_all_data().is_empty());
    }

    #[test]
    fn only_objects_can_be_inserted() {
        let db = create_db();
        assert!(matches!(
            db.insert(Value::Number(5.0)),
            Err(DatastoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn batch_insert_is_all_or_nothing() {
        let db = create_db();
        db.ensure_index(IndexOptions::new("a").unique()).unwrap();

        let result = db.insert_many(vec![
            doc! { "a" => 5, "b" => "hello" },
            doc! { "a" => 42, "b" => "world" },
            doc! { "a" => 5, "b" => "bloup" },
            doc! { "a" => 7 },
        ]);
        assert!(matches!(result, Err(DatastoreError::UniqueViolated { .. })));
        assert!(db.find(Value::object()).unwrap().is_empty());
    }

    #[test]
    fn find_filters_and_copies() {
        let db = create_db();
        db.insert(doc! { "planet" => "mars", "order" => 4 }).unwrap();
        db.insert(doc! { "planet" => "earth", "order" => 3 }).unwrap();

        let found = db.find(doc! { "planet" => "mars" }).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("order"), Some(&Value::Number(4.0)));

        assert_eq!(db.find(Value::object()).unwrap().len(), 2);
        assert!(db.find(doc! { "planet" => "venus" }).unwrap().is_empty());
    }

    #[test]
    fn find_uses_indexes_transparently() {
        let db = create_db();
        db.ensure_index(IndexOptions::new("order")).unwrap();
        for (planet, order) in [("mercury", 1), ("venus", 2), ("earth", 3), ("mars", 4)] {
            db.insert(doc! { "planet" => planet, "order" => order }).unwrap();
        }

        let found = db.find(doc! { "order" => 3 }).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("planet"), Some(&Value::String("earth".into())));

        let found = db
            .find(doc! { "order" => doc! { "$in" => array![1, 4] } })
            .unwrap();
        assert_eq!(found.len(), 2);

        let found = db
            .find(doc! { "order" => doc! { "$gt" => 1, "$lte" => 3 } })
            .unwrap();
        assert_eq!(found.len(), 2);

        // A document inserted after index creation without the field is
        // still reachable through the index (undefined key).
        db.insert(doc! { "planet" => "pluto" }).unwrap();
        assert_eq!(db.find(doc! { "planet" => "pluto" }).unwrap().len(), 1);
    }

    #[test]
    fn find_one_and_count() {
        let db = create_db();
        db.insert(doc! { "a" => 1 }).unwrap();
        db.insert(doc! { "a" => 2 }).unwrap();

        assert!(db.find_one(doc! { "a" => 2 }).unwrap().is_some());
        assert!(db.find_one(doc! { "a" => 9 }).unwrap().is_none());
        assert_eq!(db.count(Value::object()).unwrap(), 2);
        assert_eq!(db.count(doc! { "a" => doc! { "$gt" => 1 } }).unwrap(), 1);
    }

    #[test]
    fn cursor_sort_skip_limit() {
        let db = create_db();
        for n in [3, 1, 4, 1, 5, 9, 2, 6] {
            db.insert(doc! { "n" => n }).unwrap();
        }

        let sorted = db
            .cursor(Value::object())
            .sort(doc! { "n" => 1 })
            .exec()
            .unwrap();
        let ns: Vec<f64> = sorted
            .iter()
            .map(|d| d.get("n").unwrap().as_number().unwrap())
            .collect();
        assert_eq!(ns, vec![1.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 9.0]);

        let page = db
            .cursor(Value::object())
            .sort(doc! { "n" => -1 })
            .skip(2)
            .limit(3)
            .exec()
            .unwrap();
        let ns: Vec<f64> = page
            .iter()
            .map(|d| d.get("n").unwrap().as_number().unwrap())
            .collect();
        assert_eq!(ns, vec![5.0, 4.0, 3.0]);

        assert_eq!(
            db.cursor(Value::object()).skip(6).count().unwrap(),
            2
        );
    }

    #[test]
    fn cursor_sort_on_multiple_keys() {
        let db = create_db();
        db.insert(doc! { "a" => 1, "b" => 2 }).unwrap();
        db.insert(doc! { "a" => 1, "b" => 1 }).unwrap();
        db.insert(doc! { "a" => 0, "b" => 9 }).unwrap();

        let sorted = db
            .cursor(Value::object())
            .sort(doc! { "a" => 1, "b" => 1 })
            .exec()
            .unwrap();
        let pairs: Vec<(f64, f64)> = sorted
            .iter()
            .map(|d| {
                (
                    d.get("a").unwrap().as_number().unwrap(),
                    d.get("b").unwrap().as_number().unwrap(),
                )
            })
            .collect();
        assert_eq!(pairs, vec![(0.0, 9.0), (1.0, 1.0), (1.0, 2.0)]);
    }

    #[test]
    fn bad_sort_direction_is_an_error() {
        let db = create_db();
        db.insert(doc! { "a" => 1 }).unwrap();
        let result = db.cursor(Value::object()).sort(doc! { "a" => 2 }).exec();
        assert!(result.is_err());
    }

    #[test]
    fn projection_keep_and_omit() {
        let db = create_db();
        db.insert(doc! { "a" => 1, "b" => 2, "c" => doc! { "d" => 3 } })
            .unwrap();

        let kept = db
            .find_projected(Value::object(), doc! { "a" => 1, "c.d" => 1 })
            .unwrap();
        assert_eq!(kept[0].get("a"), Some(&Value::Number(1.0)));
        assert_eq!(kept[0].get("b"), None);
        assert_eq!(
            kept[0].get("c").unwrap().get("d"),
            Some(&Value::Number(3.0))
        );
        assert!(kept[0].doc_id().is_some());

        let no_id = db
            .find_projected(Value::object(), doc! { "a" => 1, "_id" => 0 })
            .unwrap();
        assert!(no_id[0].doc_id().is_none());

        let omitted = db
            .find_projected(Value::object(), doc! { "b" => 0 })
            .unwrap();
        assert_eq!(omitted[0].get("a"), Some(&Value::Number(1.0)));
        assert_eq!(omitted[0].get("b"), None);
        assert!(omitted[0].doc_id().is_some());

        let mixed = db.find_projected(Value::object(), doc! { "a" => 1, "b" => 0 });
        assert!(mixed.is_err());
    }

    #[test]
    fn update_single_and_multi() {
        let db = create_db();
        for n in 1..=3 {
            db.insert(doc! { "n" => n, "seen" => false }).unwrap();
        }

        let result = db
            .update(
                doc! { "n" => doc! { "$gte" => 1 } },
                doc! { "$set" => doc! { "seen" => true } },
                UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(result.num_affected, 1);
        assert_eq!(db.count(doc! { "seen" => true }).unwrap(), 1);

        let result = db
            .update(
                doc! { "n" => doc! { "$gte" => 1 } },
                doc! { "$set" => doc! { "seen" => true } },
                UpdateOptions {
                    multi: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(result.num_affected, 3);
        assert_eq!(db.count(doc! { "seen" => true }).unwrap(), 3);
    }

    #[test]
    fn update_replacement_keeps_id() {
        let db = create_db();
        let inserted = db.insert(doc! { "a" => 1 }).unwrap();
        let id = inserted.doc_id().unwrap().to_string();

        db.update(
            doc! { "a" => 1 },
            doc! { "fresh" => true },
            UpdateOptions::default(),
        )
        .unwrap();

        let found = db.find_one(doc! { "fresh" => true }).unwrap().unwrap();
        assert_eq!(found.doc_id(), Some(id.as_str()));
        assert_eq!(found.get("a"), None);
    }

    #[test]
    fn update_cannot_change_id() {
        let db = create_db();
        db.insert(doc! { "_id" => "x", "a" => 1 }).unwrap();
        let result = db.update(
            doc! { "a" => 1 },
            doc! { "$set" => doc! { "_id" => "y" } },
            UpdateOptions::default(),
        );
        assert!(result.is_err());
        assert_eq!(db.find(doc! { "_id" => "x" }).unwrap().len(), 1);
    }

    #[test]
    fn update_returns_updated_docs() {
        let db = create_db();
        db.insert(doc! { "n" => 1 }).unwrap();
        db.insert(doc! { "n" => 2 }).unwrap();

        let result = db
            .update(
                doc! { "n" => 2 },
                doc! { "$inc" => doc! { "n" => 10 } },
                UpdateOptions {
                    return_updated_docs: true,
                    ..Default::default()
                },
            )
            .unwrap();
        match result.affected_documents {
            Some(AffectedDocuments::Single(doc)) => {
                assert_eq!(doc.get("n"), Some(&Value::Number(12.0)));
            }
            other => panic!("expected a single document, got {other:?}"),
        }

        let result = db
            .update(
                Value::object(),
                doc! { "$set" => doc! { "tag" => "all" } },
                UpdateOptions {
                    multi: true,
                    return_updated_docs: true,
                    ..Default::default()
                },
            )
            .unwrap();
        match result.affected_documents {
            Some(AffectedDocuments::Multiple(docs)) => assert_eq!(docs.len(), 2),
            other => panic!("expected all documents, got {other:?}"),
        }
    }

    #[test]
    fn upsert_inserts_from_replacement_body() {
        let db = create_db();
        let result = db
            .update(
                doc! { "missing" => true },
                doc! { "planet" => "mars" },
                UpdateOptions {
                    upsert: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(result.upsert);
        assert_eq!(result.num_affected, 1);
        assert_eq!(db.count(doc! { "planet" => "mars" }).unwrap(), 1);
        // The query's literals are not part of a replacement upsert.
        assert_eq!(db.count(doc! { "missing" => true }).unwrap(), 0);
    }

    #[test]
    fn upsert_with_operators_seeds_from_query() {
        let db = create_db();
        let result = db
            .update(
                doc! { "$or" => array![doc! { "a" => 4 }, doc! { "a" => 5 }] },
                doc! { "$set" => doc! { "hello" => "world" }, "$inc" => doc! { "bloup" => 3 } },
                UpdateOptions {
                    upsert: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(result.upsert);

        let doc = db.find_one(Value::object()).unwrap().unwrap();
        assert_eq!(doc.get("hello"), Some(&Value::String("world".into())));
        assert_eq!(doc.get("bloup"), Some(&Value::Number(3.0)));
        assert_eq!(doc.get("a"), None);
        assert!(doc.doc_id().is_some());
    }

    #[test]
    fn upsert_with_literal_query_keeps_equalities() {
        let db = create_db();
        db.update(
            doc! { "a" => 4 },
            doc! { "$inc" => doc! { "n" => 1 } },
            UpdateOptions {
                upsert: true,
                ..Default::default()
            },
        )
        .unwrap();

        let doc = db.find_one(Value::object()).unwrap().unwrap();
        assert_eq!(doc.get("a"), Some(&Value::Number(4.0)));
        assert_eq!(doc.get("n"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn upsert_does_not_fire_when_a_match_exists() {
        let db = create_db();
        db.insert(doc! { "a" => 4, "n" => 10 }).unwrap();
        let result = db
            .update(
                doc! { "a" => 4 },
                doc! { "$inc" => doc! { "n" => 1 } },
                UpdateOptions {
                    upsert: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!result.upsert);
        assert_eq!(db.get_all_data().len(), 1);
        assert_eq!(db.count(doc! { "n" => 11 }).unwrap(), 1);
    }

    #[test]
    fn update_unique_violation_rolls_back_completely() {
        let db = create_db();
        db.ensure_index(IndexOptions::new("a").unique()).unwrap();
        db.insert(doc! { "_id" => "1", "a" => 1, "touched" => false }).unwrap();
        db.insert(doc! { "_id" => "2", "a" => 2, "touched" => false }).unwrap();

        // Updating both onto the same key must fail and change nothing.
        let result = db.update(
            Value::object(),
            doc! { "$set" => doc! { "a" => 7, "touched" => true } },
            UpdateOptions {
                multi: true,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(DatastoreError::UniqueViolated { .. })));

        assert_eq!(db.count(doc! { "touched" => false }).unwrap(), 2);
        assert_eq!(db.count(doc! { "a" => 1 }).unwrap(), 1);
        assert_eq!(db.count(doc! { "a" => 2 }).unwrap(), 1);
        assert_eq!(db.count(doc! { "a" => 7 }).unwrap(), 0);
    }

    #[test]
    fn remove_single_and_multi() {
        let db = create_db();
        for n in 1..=3 {
            db.insert(doc! { "n" => n }).unwrap();
        }

        let removed = db
            .remove(doc! { "n" => doc! { "$gte" => 1 } }, RemoveOptions::default())
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.get_all_data().len(), 2);

        let removed = db
            .remove(
                doc! { "n" => doc! { "$gte" => 1 } },
                RemoveOptions { multi: true },
            )
            .unwrap();
        assert_eq!(removed, 2);
        assert!(db.get_all_data().is_empty());
    }

    #[test]
    fn remove_missing_matches_nothing() {
        let db = create_db();
        db.insert(doc! { "a" => 1 }).unwrap();
        assert_eq!(
            db.remove(doc! { "a" => 9 }, RemoveOptions { multi: true }).unwrap(),
            0
        );
        assert_eq!(db.get_all_data().len(), 1);
    }

    #[test]
    fn ensure_index_is_idempotent_and_keeps_first_options() {
        let db = create_db();
        db.ensure_index(IndexOptions::new("a").unique()).unwrap();
        // Re-declaring with different options is a silent no-op.
        db.ensure_index(IndexOptions::new("a")).unwrap();

        db.insert(doc! { "a" => 1 }).unwrap();
        assert!(db.insert(doc! { "a" => 1 }).is_err());
    }

    #[test]
    fn ensure_index_requires_a_field_name() {
        let db = create_db();
        assert!(matches!(
            db.ensure_index(IndexOptions::new("")),
            Err(DatastoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn ensure_index_over_violating_data_fails_cleanly() {
        let db = create_db();
        db.insert(doc! { "a" => 1 }).unwrap();
        db.insert(doc! { "a" => 1 }).unwrap();

        let result = db.ensure_index(IndexOptions::new("a").unique());
        assert!(matches!(result, Err(DatastoreError::UniqueViolated { .. })));

        // The partial index is gone: inserts with duplicate keys still work.
        db.insert(doc! { "a" => 1 }).unwrap();
        assert_eq!(db.get_all_data().len(), 3);
    }

    #[test]
    fn sparse_unique_index_ignores_absent_fields() {
        let db = create_db();
        db.ensure_index(IndexOptions::new("email").unique().sparse())
            .unwrap();
        db.insert(doc! { "name" => "a" }).unwrap();
        db.insert(doc! { "name" => "b" }).unwrap();
        db.insert(doc! { "email" => "x@y" }).unwrap();
        assert!(db.insert(doc! { "email" => "x@y" }).is_err());
    }

    #[test]
    fn remove_index_drops_enforcement() {
        let db = create_db();
        db.ensure_index(IndexOptions::new("a").unique()).unwrap();
        db.insert(doc! { "a" => 1 }).unwrap();
        assert!(db.insert(doc! { "a" => 1 }).is_err());

        db.remove_index("a").unwrap();
        db.insert(doc! { "a" => 1 }).unwrap();
        assert_eq!(db.get_all_data().len(), 2);

        assert!(db.remove_index("_id").is_err());
    }

    #[test]
    fn timestamp_data_on_insert_and_update() {
        let db = Datastore::new(
            DatastoreOptions::new().in_memory_only(true).timestamp_data(true),
        )
        .unwrap();

        let inserted = db.insert(doc! { "a" => 1 }).unwrap();
        let created = match inserted.get("createdAt") {
            Some(Value::DateTime(ms)) => *ms,
            other => panic!("expected a createdAt datetime, got {other:?}"),
        };
        assert!(matches!(inserted.get("updatedAt"), Some(Value::DateTime(_))));

        std::thread::sleep(std::time::Duration::from_millis(5));
        db.update(
            doc! { "a" => 1 },
            doc! { "$set" => doc! { "a" => 2 } },
            UpdateOptions::default(),
        )
        .unwrap();

        let updated = db.find_one(doc! { "a" => 2 }).unwrap().unwrap();
        assert_eq!(updated.get("createdAt"), Some(&Value::DateTime(created)));
        let refreshed = match updated.get("updatedAt") {
            Some(Value::DateTime(ms)) => *ms,
            other => panic!("expected an updatedAt datetime, got {other:?}"),
        };
        assert!(refreshed > created);
    }

    #[test]
    fn user_supplied_timestamps_are_preserved() {
        let db = Datastore::new(
            DatastoreOptions::new().in_memory_only(true).timestamp_data(true),
        )
        .unwrap();
        let inserted = db
            .insert(doc! { "a" => 1, "createdAt" => Value::DateTime(1234) })
            .unwrap();
        assert_eq!(inserted.get("createdAt"), Some(&Value::DateTime(1234)));
    }

    #[test]
    fn ttl_expiration_hides_and_removes_documents() {
        let db = create_db();
        db.ensure_index(IndexOptions::new("exp").expire_after_seconds(0.05))
            .unwrap();
        db.insert(doc! { "hello" => "world", "exp" => Value::DateTime(now_millis()) })
            .unwrap();
        db.insert(doc! { "hello" => "eternal" }).unwrap();

        assert_eq!(db.count(Value::object()).unwrap(), 2);

        std::thread::sleep(std::time::Duration::from_millis(120));
        // The expired document is never returned...
        let found = db.find(Value::object()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("hello"), Some(&Value::String("eternal".into())));

        // ...and its scheduled removal drains through the queue before
        // the next queued operation.
        assert_eq!(db.count(Value::object()).unwrap(), 1);
        assert_eq!(db.get_all_data().len(), 1);
    }

    #[test]
    fn panicking_predicate_does_not_poison_the_datastore() {
        let db = create_db();
        db.insert(doc! { "a" => 1 }).unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = db.find(doc! { "$where" => Value::where_fn(|_| panic!("user code")) });
        }));
        assert!(outcome.is_err());

        // The queue keeps serving.
        db.insert(doc! { "a" => 2 }).unwrap();
        assert_eq!(db.get_all_data().len(), 2);
    }

    #[test]
    fn operations_complete_in_submission_order() {
        let db = create_db();
        for n in 0..50 {
            db.insert(doc! { "n" => n }).unwrap();
        }
        db.update(
            Value::object(),
            doc! { "$set" => doc! { "swept" => true } },
            UpdateOptions {
                multi: true,
                ..Default::default()
            },
        )
        .unwrap();
        let removed = db
            .remove(doc! { "swept" => true }, RemoveOptions { multi: true })
            .unwrap();
        assert_eq!(removed, 50);
        assert!(db.get_all_data().is_empty());
    }

    #[test]
    fn results_are_independent_copies() {
        let db = create_db();
        db.insert(doc! { "a" => doc! { "deep" => 1 } }).unwrap();

        let mut first = db.find(Value::object()).unwrap();
        first[0].set("a", Value::Null);

        let second = db.find(Value::object()).unwrap();
        assert_eq!(
            second[0].get("a").unwrap().get("deep"),
            Some(&Value::Number(1.0))
        );
    }

    #[test]
    fn load_database_is_a_noop_in_memory() {
        let db = create_db();
        db.ensure_index(IndexOptions::new("a").unique()).unwrap();
        db.insert(doc! { "a" => 1 }).unwrap();

        db.load_database().unwrap();
        assert_eq!(db.get_all_data().len(), 1);
        assert!(db.insert(doc! { "a" => 1 }).is_err());
    }
}
