//! Field indexes over a balanced tree.
//!
//! Each index maps the projected value of one (possibly dotted) field to
//! the set of live documents producing it. Documents are shared as
//! [`SharedDoc`] so every index references the same allocation; removal
//! matches entries by pointer identity.

use crate::error::{DatastoreError, DatastoreResult};
use jotdb_model::{compare_things, get_dot_value, ModelError, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

/// A document shared between the datastore and its indexes.
pub type SharedDoc = Arc<Value>;

/// Declaration of an index.
///
/// # Example
///
/// ```rust,ignore
/// // Unique email addresses, but only for documents that carry one.
/// let options = IndexOptions::new("email").unique().sparse();
///
/// // Expire sessions an hour after their `lastSeen` timestamp.
/// let options = IndexOptions::new("lastSeen").expire_after_seconds(3600.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    /// Dot-notation path of the indexed field.
    pub field_name: String,
    /// Reject two documents with the same key.
    pub unique: bool,
    /// Skip documents where the field is undefined.
    pub sparse: bool,
    /// Expire documents this many seconds after the indexed timestamp.
    pub expire_after_seconds: Option<f64>,
}

impl IndexOptions {
    /// Creates a plain (non-unique, non-sparse) index declaration.
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            unique: false,
            sparse: false,
            expire_after_seconds: None,
        }
    }

    /// Enforces key uniqueness across documents.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Skips documents lacking the field.
    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Turns the index into a TTL index.
    #[must_use]
    pub fn expire_after_seconds(mut self, seconds: f64) -> Self {
        self.expire_after_seconds = Some(seconds);
        self
    }
}

/// Key wrapper ordering [`Value`]s by the model total order.
#[derive(Debug, Clone)]
struct IndexKey(Value);

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        compare_things(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_things(&self.0, &other.0)
    }
}

/// One secondary (or primary) index.
///
/// `Index` supports:
/// - Equality lookups, single- and multi-key
/// - Range lookups over `{ $gt|$gte?, $lt|$lte? }` bounds
/// - Ordered traversal of every held document
///
/// # Example
///
/// ```rust,ignore
/// let mut index = Index::new(IndexOptions::new("planet").unique());
///
/// let doc = Arc::new(doc! { "_id" => "1", "planet" => "mars" });
/// index.insert(&doc)?;
///
/// let matching = index.get_matching(&Value::String("mars".into()));
/// assert_eq!(matching.len(), 1);
/// ```
pub struct Index {
    options: IndexOptions,
    tree: BTreeMap<IndexKey, Vec<SharedDoc>>,
}

impl Index {
    /// Creates an empty index.
    #[must_use]
    pub fn new(options: IndexOptions) -> Self {
        Self {
            options,
            tree: BTreeMap::new(),
        }
    }

    /// The index declaration.
    #[must_use]
    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// The indexed field path.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.options.field_name
    }

    /// Number of distinct keys currently held.
    #[must_use]
    pub fn num_keys(&self) -> usize {
        self.tree.len()
    }

    /// Projects the keys a document contributes to this index.
    ///
    /// `None` means the document is skipped (sparse index, field absent).
    /// An array-valued field contributes one key per distinct element, so
    /// duplicate elements cannot trip the unique check against the
    /// document itself.
    fn projected_keys(&self, doc: &Value) -> Option<Vec<Value>> {
        let key = get_dot_value(doc, &self.options.field_name);
        if key.is_undefined() && self.options.sparse {
            return None;
        }
        match key {
            Value::Array(items) => {
                let mut distinct: Vec<Value> = Vec::new();
                for item in items {
                    if !distinct
                        .iter()
                        .any(|k| compare_things(k, &item) == Ordering::Equal)
                    {
                        distinct.push(item);
                    }
                }
                Some(distinct)
            }
            other => Some(vec![other]),
        }
    }

    fn tree_insert(&mut self, key: Value, doc: &SharedDoc) -> DatastoreResult<()> {
        if self.options.unique {
            if let Some(existing) = self.tree.get(&IndexKey(key.clone())) {
                if !existing.is_empty() {
                    return Err(DatastoreError::unique_violated(
                        &self.options.field_name,
                        key,
                    ));
                }
            }
        }
        self.tree
            .entry(IndexKey(key))
            .or_default()
            .push(Arc::clone(doc));
        Ok(())
    }

    fn tree_remove(&mut self, key: &Value, doc: &SharedDoc) {
        let wrapped = IndexKey(key.clone());
        if let Some(slot) = self.tree.get_mut(&wrapped) {
            slot.retain(|held| !Arc::ptr_eq(held, doc));
            if slot.is_empty() {
                self.tree.remove(&wrapped);
            }
        }
    }

    /// Inserts a document.
    ///
    /// On a unique violation mid-way through an array fan-out, every key
    /// already inserted for this call is removed again before the error
    /// is returned.
    pub fn insert(&mut self, doc: &SharedDoc) -> DatastoreResult<()> {
        let Some(keys) = self.projected_keys(doc) else {
            return Ok(());
        };
        let mut inserted: Vec<Value> = Vec::with_capacity(keys.len());
        for key in keys {
            if let Err(error) = self.tree_insert(key.clone(), doc) {
                for done in &inserted {
                    self.tree_remove(done, doc);
                }
                return Err(error);
            }
            inserted.push(key);
        }
        Ok(())
    }

    /// Removes a document, deleting every key it projected.
    pub fn remove(&mut self, doc: &SharedDoc) {
        let Some(keys) = self.projected_keys(doc) else {
            return;
        };
        for key in keys {
            self.tree_remove(&key, doc);
        }
    }

    /// Replaces `old` with `new`.
    ///
    /// Atomic: when inserting `new` fails, `old` is restored before the
    /// error is returned.
    pub fn update(&mut self, old: &SharedDoc, new: &SharedDoc) -> DatastoreResult<()> {
        self.remove(old);
        if let Err(error) = self.insert(new) {
            self.insert(old)
                .expect("restoring a previously held document cannot violate uniqueness");
            return Err(error);
        }
        Ok(())
    }

    /// Undoes a previously applied [`Index::update`].
    pub fn revert_update(&mut self, old: &SharedDoc, new: &SharedDoc) {
        self.remove(new);
        self.insert(old)
            .expect("restoring a previously held document cannot violate uniqueness");
    }

    /// Applies a batch of replacements atomically.
    ///
    /// On failure every pair is rolled back and the index holds exactly
    /// the old documents again.
    pub fn update_multiple(&mut self, pairs: &[(SharedDoc, SharedDoc)]) -> DatastoreResult<()> {
        for (old, _) in pairs {
            self.remove(old);
        }
        let mut failure: Option<(usize, DatastoreError)> = None;
        for (i, (_, new)) in pairs.iter().enumerate() {
            if let Err(error) = self.insert(new) {
                failure = Some((i, error));
                break;
            }
        }
        if let Some((failing, error)) = failure {
            for (_, new) in &pairs[..failing] {
                self.remove(new);
            }
            for (old, _) in pairs {
                self.insert(old)
                    .expect("restoring previously held documents cannot violate uniqueness");
            }
            return Err(error);
        }
        Ok(())
    }

    /// Undoes a previously applied [`Index::update_multiple`].
    pub fn revert_update_multiple(&mut self, pairs: &[(SharedDoc, SharedDoc)]) {
        for (_, new) in pairs {
            self.remove(new);
        }
        for (old, _) in pairs {
            self.insert(old)
                .expect("restoring previously held documents cannot violate uniqueness");
        }
    }

    /// Wipes the index.
    pub fn reset(&mut self) {
        self.tree.clear();
    }

    /// Wipes the index and bulk-loads the given documents.
    pub fn reset_with(&mut self, docs: &[SharedDoc]) -> DatastoreResult<()> {
        self.reset();
        for doc in docs {
            self.insert(doc)?;
        }
        Ok(())
    }

    /// Documents whose key equals `key`.
    #[must_use]
    pub fn get_matching(&self, key: &Value) -> Vec<SharedDoc> {
        self.tree
            .get(&IndexKey(key.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Union of matches over several keys, de-duplicated (one document
    /// may project more than one of the keys).
    #[must_use]
    pub fn get_matching_many(&self, keys: &[Value]) -> Vec<SharedDoc> {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut result = Vec::new();
        for key in keys {
            for doc in self.get_matching(key) {
                if seen.insert(Arc::as_ptr(&doc) as usize) {
                    result.push(doc);
                }
            }
        }
        result
    }

    /// Documents whose key falls inside `{ $gt|$gte?, $lt|$lte? }` bounds.
    ///
    /// Keys other than the four bound operators are ignored here; they
    /// belong to the match phase. When both the strict and the inclusive
    /// form of a bound are present, the more restrictive one wins.
    pub fn get_between_bounds(&self, query: &Value) -> DatastoreResult<Vec<SharedDoc>> {
        if !query.is_object() {
            return Err(ModelError::invalid_query("bounds query must be an object").into());
        }
        let lower = match (query.get("$gt"), query.get("$gte")) {
            (Some(gt), Some(gte)) => {
                if compare_things(gte, gt) == Ordering::Greater {
                    Bound::Included(IndexKey(gte.clone()))
                } else {
                    Bound::Excluded(IndexKey(gt.clone()))
                }
            }
            (Some(gt), None) => Bound::Excluded(IndexKey(gt.clone())),
            (None, Some(gte)) => Bound::Included(IndexKey(gte.clone())),
            (None, None) => Bound::Unbounded,
        };
        let upper = match (query.get("$lt"), query.get("$lte")) {
            (Some(lt), Some(lte)) => {
                if compare_things(lte, lt) == Ordering::Less {
                    Bound::Included(IndexKey(lte.clone()))
                } else {
                    Bound::Excluded(IndexKey(lt.clone()))
                }
            }
            (Some(lt), None) => Bound::Excluded(IndexKey(lt.clone())),
            (None, Some(lte)) => Bound::Included(IndexKey(lte.clone())),
            (None, None) => Bound::Unbounded,
        };

        // An inverted range panics in BTreeMap::range; treat it as empty.
        if let (
            Bound::Included(l) | Bound::Excluded(l),
            Bound::Included(u) | Bound::Excluded(u),
        ) = (&lower, &upper)
        {
            if l.cmp(u) == Ordering::Greater {
                return Ok(Vec::new());
            }
        }

        let mut result = Vec::new();
        for (_, docs) in self.tree.range((lower, upper)) {
            result.extend(docs.iter().cloned());
        }
        Ok(result)
    }

    /// Every held document, in key order.
    #[must_use]
    pub fn get_all(&self) -> Vec<SharedDoc> {
        let mut result = Vec::new();
        for docs in self.tree.values() {
            result.extend(docs.iter().cloned());
        }
        result
    }
}
