//! Append-log persistence.
//!
//! The data file holds one record per line: a live document, a
//! `$$deleted` tombstone, or an `$$indexCreated` / `$$indexRemoved`
//! envelope. Loading replays the log into the latest state; compaction
//! rewrites the file down to that state through the crash-safe
//! temp-file + rename protocol of `jotdb_storage`.

use crate::error::{DatastoreError, DatastoreResult};
use crate::index::{IndexOptions, SharedDoc};
use crate::options::{DatastoreOptions, SerializationHook};
use jotdb_model::{
    deserialize, serialize, ModelResult, Value, DELETED_KEY, INDEX_CREATED_KEY, INDEX_REMOVED_KEY,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::PathBuf;
use tracing::{debug, warn};

/// State recovered from a full replay of the data file.
#[derive(Debug, Default)]
pub(crate) struct LoadedState {
    /// Live documents, in first-seen order.
    pub documents: Vec<Value>,
    /// Declared indexes, in creation order.
    pub indexes: Vec<IndexOptions>,
}

/// The persistence layer of one datastore.
pub(crate) struct Persistence {
    filename: Option<PathBuf>,
    in_memory: bool,
    corrupt_alert_threshold: f64,
    after_serialization: Option<SerializationHook>,
    before_deserialization: Option<SerializationHook>,
}

impl Persistence {
    /// Builds the persistence layer, taking ownership of the hook pair.
    ///
    /// Fails when only one hook is declared, or when both are declared,
    /// a non-empty data file exists, and the pair is not a bijection on
    /// canary strings.
    pub(crate) fn new(options: &mut DatastoreOptions) -> DatastoreResult<Self> {
        let after_serialization = options.after_serialization.take();
        let before_deserialization = options.before_deserialization.take();

        if after_serialization.is_some() != before_deserialization.is_some() {
            return Err(DatastoreError::hook_mismatch(
                "afterSerialization and beforeDeserialization must be declared together",
            ));
        }

        let persistence = Self {
            filename: if options.is_in_memory() {
                None
            } else {
                options.filename.clone()
            },
            in_memory: options.is_in_memory(),
            corrupt_alert_threshold: options.corrupt_alert_threshold,
            after_serialization,
            before_deserialization,
        };
        persistence.verify_hooks_against_existing_file()?;
        Ok(persistence)
    }

    /// When a non-empty data file exists, proves `before(after(x)) == x`
    /// on canary strings of every small length before anything is read
    /// through the hooks. A broken pair would otherwise corrupt the file
    /// silently.
    fn verify_hooks_against_existing_file(&self) -> DatastoreResult<()> {
        let (Some(after), Some(before)) =
            (&self.after_serialization, &self.before_deserialization)
        else {
            return Ok(());
        };
        let Some(filename) = &self.filename else {
            return Ok(());
        };
        if !jotdb_storage::exists(filename) {
            return Ok(());
        }
        let not_empty = std::fs::metadata(filename).map(|m| m.len() > 0).unwrap_or(false);
        if !not_empty {
            return Ok(());
        }

        for length in 1..30 {
            let canary: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(length)
                .map(char::from)
                .collect();
            if before(&after(&canary)) != canary {
                return Err(DatastoreError::hook_mismatch(
                    "beforeDeserialization is not the reverse of afterSerialization",
                ));
            }
        }
        Ok(())
    }

    /// True when no file backs this datastore.
    pub(crate) fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    fn encode_line(&self, record: &Value) -> DatastoreResult<String> {
        let line = serialize(record)?;
        Ok(match &self.after_serialization {
            Some(hook) => hook(&line),
            None => line,
        })
    }

    fn decode_line(&self, line: &str) -> ModelResult<Value> {
        match &self.before_deserialization {
            Some(hook) => deserialize(&hook(line)),
            None => deserialize(line),
        }
    }

    /// Appends one line per record, durably, in a single write.
    pub(crate) fn persist_new_state(&self, records: &[Value]) -> DatastoreResult<()> {
        if self.in_memory {
            return Ok(());
        }
        let filename = self.filename.as_ref().expect("persistent datastore has a filename");

        let mut buffer = String::new();
        for record in records {
            buffer.push_str(&self.encode_line(record)?);
            buffer.push('\n');
        }
        jotdb_storage::append(filename, &buffer)?;
        Ok(())
    }

    /// Replays raw file contents into the latest state.
    ///
    /// Later lines win per `_id`; tombstones delete; envelopes add and
    /// remove index declarations. Lines that fail to parse count toward
    /// the corruption ratio; crossing the threshold fails the whole load
    /// and leaves no partial state behind.
    pub(crate) fn treat_raw_data(&self, raw: &str) -> DatastoreResult<LoadedState> {
        let mut order: Vec<String> = Vec::new();
        let mut docs_by_id: std::collections::HashMap<String, Value> =
            std::collections::HashMap::new();
        let mut indexes: Vec<(String, IndexOptions)> = Vec::new();
        let mut non_empty = 0usize;
        let mut corrupt = 0usize;

        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            non_empty += 1;

            let record = match self.decode_line(line) {
                Ok(record) => record,
                Err(_) => {
                    corrupt += 1;
                    continue;
                }
            };

            if let Some(id) = record.doc_id().map(str::to_string) {
                if record.get(DELETED_KEY) == Some(&Value::Bool(true)) {
                    docs_by_id.remove(&id);
                } else {
                    if !docs_by_id.contains_key(&id) {
                        order.push(id.clone());
                    }
                    docs_by_id.insert(id, record);
                }
            } else if let Some(envelope) = record.get(INDEX_CREATED_KEY) {
                if let Some(options) = index_options_from_value(envelope) {
                    indexes.retain(|(name, _)| *name != options.field_name);
                    indexes.push((options.field_name.clone(), options));
                }
            } else if let Some(Value::String(field_name)) = record.get(INDEX_REMOVED_KEY) {
                indexes.retain(|(name, _)| name != field_name);
            }
            // Anything else (no _id, not an envelope) is silently dropped.
        }

        if non_empty > 0 && corrupt as f64 / non_empty as f64 > self.corrupt_alert_threshold {
            return Err(DatastoreError::corruption(format!(
                "{corrupt} of {non_empty} lines are unreadable, which is more than the \
                 tolerated fraction ({})",
                self.corrupt_alert_threshold
            )));
        }
        if corrupt > 0 {
            warn!(corrupt, non_empty, "skipped corrupt lines while loading data file");
        }

        let documents = order
            .into_iter()
            .filter_map(|id| docs_by_id.remove(&id))
            .collect();
        Ok(LoadedState {
            documents,
            indexes: indexes.into_iter().map(|(_, options)| options).collect(),
        })
    }

    /// Reads and replays the data file.
    ///
    /// Ensures the data directory exists and reconciles a leftover side
    /// file before reading.
    pub(crate) fn load_raw_state(&self) -> DatastoreResult<LoadedState> {
        if self.in_memory {
            return Ok(LoadedState::default());
        }
        let filename = self.filename.as_ref().expect("persistent datastore has a filename");

        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() {
                jotdb_storage::ensure_dir_exists(parent)?;
            }
        }
        jotdb_storage::ensure_datafile_integrity(filename)?;
        let raw = jotdb_storage::read_to_string(filename)?;
        let state = self.treat_raw_data(&raw)?;
        debug!(
            documents = state.documents.len(),
            indexes = state.indexes.len(),
            "replayed data file"
        );
        Ok(state)
    }

    /// Rewrites the data file down to the given live state, atomically.
    pub(crate) fn persist_cached_database(
        &self,
        docs: &[SharedDoc],
        indexes: &[IndexOptions],
    ) -> DatastoreResult<()> {
        if self.in_memory {
            return Ok(());
        }
        let filename = self.filename.as_ref().expect("persistent datastore has a filename");

        let mut buffer = String::new();
        for doc in docs {
            buffer.push_str(&self.encode_line(doc)?);
            buffer.push('\n');
        }
        for options in indexes {
            let envelope = Value::Object(vec![(
                INDEX_CREATED_KEY.to_string(),
                index_options_to_value(options),
            )]);
            buffer.push_str(&self.encode_line(&envelope)?);
            buffer.push('\n');
        }

        jotdb_storage::write_and_replace(filename, &buffer)?;
        debug!(documents = docs.len(), indexes = indexes.len(), "compacted data file");
        Ok(())
    }
}

/// Serializes index options into the `$$indexCreated` envelope body.
pub(crate) fn index_options_to_value(options: &IndexOptions) -> Value {
    let mut fields = vec![(
        "fieldName".to_string(),
        Value::String(options.field_name.clone()),
    )];
    if options.unique {
        fields.push(("unique".to_string(), Value::Bool(true)));
    }
    if options.sparse {
        fields.push(("sparse".to_string(), Value::Bool(true)));
    }
    if let Some(seconds) = options.expire_after_seconds {
        fields.push(("expireAfterSeconds".to_string(), Value::Number(seconds)));
    }
    Value::Object(fields)
}

/// Parses an `$$indexCreated` envelope body; `None` when it lacks a
/// usable field name.
pub(crate) fn index_options_from_value(value: &Value) -> Option<IndexOptions> {
    let field_name = value.get("fieldName")?.as_str()?.to_string();
    let mut options = IndexOptions::new(field_name);
    options.unique = value.get("unique").is_some_and(Value::is_truthy);
    options.sparse = value.get("sparse").is_some_and(Value::is_truthy);
    options.expire_after_seconds = value.get("expireAfterSeconds").and_then(Value::as_number);
    Some(options)
}
