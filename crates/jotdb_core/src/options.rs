//! Datastore configuration.

use crate::error::DatastoreResult;
use std::fmt;
use std::path::PathBuf;

/// A per-line text transform applied after serialization / before
/// deserialization. The two hooks must be declared together and must be
/// inverses of each other.
pub type SerializationHook = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Callback receiving the result of the autoload triggered by
/// [`DatastoreOptions::autoload`].
pub type LoadCallback = Box<dyn FnOnce(DatastoreResult<()>) + Send>;

/// Configuration for opening a datastore.
pub struct DatastoreOptions {
    /// Path to the data file. Absent forces an in-memory datastore.
    pub(crate) filename: Option<PathBuf>,
    /// Skip all persistence.
    pub(crate) in_memory_only: bool,
    /// Load the database as part of construction.
    pub(crate) autoload: bool,
    /// Maintain `createdAt` / `updatedAt` on every document.
    pub(crate) timestamp_data: bool,
    /// Fraction in [0, 1] of corrupt lines tolerated on load.
    pub(crate) corrupt_alert_threshold: f64,
    pub(crate) after_serialization: Option<SerializationHook>,
    pub(crate) before_deserialization: Option<SerializationHook>,
    pub(crate) onload: Option<LoadCallback>,
}

impl Default for DatastoreOptions {
    fn default() -> Self {
        Self {
            filename: None,
            in_memory_only: false,
            autoload: false,
            timestamp_data: false,
            corrupt_alert_threshold: 0.1,
            after_serialization: None,
            before_deserialization: None,
            onload: None,
        }
    }
}

impl DatastoreOptions {
    /// Creates options with default values (in-memory, no autoload).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data file path.
    ///
    /// An empty path is treated as absent and forces in-memory mode.
    #[must_use]
    pub fn filename(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.filename = if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        };
        self
    }

    /// Disables persistence entirely.
    #[must_use]
    pub fn in_memory_only(mut self, value: bool) -> Self {
        self.in_memory_only = value;
        self
    }

    /// Loads the database during construction.
    #[must_use]
    pub fn autoload(mut self, value: bool) -> Self {
        self.autoload = value;
        self
    }

    /// Auto-manages `createdAt` and `updatedAt` fields.
    #[must_use]
    pub fn timestamp_data(mut self, value: bool) -> Self {
        self.timestamp_data = value;
        self
    }

    /// Sets the fraction of corrupt lines tolerated on load, in [0, 1].
    #[must_use]
    pub fn corrupt_alert_threshold(mut self, value: f64) -> Self {
        self.corrupt_alert_threshold = value;
        self
    }

    /// Installs the post-serialization line transform.
    #[must_use]
    pub fn after_serialization(
        mut self,
        hook: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.after_serialization = Some(Box::new(hook));
        self
    }

    /// Installs the pre-deserialization line transform.
    #[must_use]
    pub fn before_deserialization(
        mut self,
        hook: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.before_deserialization = Some(Box::new(hook));
        self
    }

    /// Installs the autoload result callback.
    #[must_use]
    pub fn onload(mut self, callback: impl FnOnce(DatastoreResult<()>) + Send + 'static) -> Self {
        self.onload = Some(Box::new(callback));
        self
    }

    /// True when this configuration performs no persistence.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.in_memory_only || self.filename.is_none()
    }
}

impl fmt::Debug for DatastoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatastoreOptions")
            .field("filename", &self.filename)
            .field("in_memory_only", &self.in_memory_only)
            .field("autoload", &self.autoload)
            .field("timestamp_data", &self.timestamp_data)
            .field("corrupt_alert_threshold", &self.corrupt_alert_threshold)
            .field("after_serialization", &self.after_serialization.is_some())
            .field("before_deserialization", &self.before_deserialization.is_some())
            .finish_non_exhaustive()
    }
}
