//! Generic composite layer over a storage medium and a document format.
//! The crate carries no concrete file-system or format-parser dependency;
//! `MemorySource` and `JsonDocument` below are the minimal, structural-only
//! implementations used to exercise `FileLayer<S, D>` in tests — a
//! structural-only format is free to re-render wholesale from `Value`
//! rather than patch bytes in place.

use std::sync::{Arc, Mutex};

use crate::error::LayerError;
use crate::patch::JsonPatch;
use crate::schema::Schema;
use crate::value::Value;
use crate::watch::{LayerWatcher, PollingWatcher};

use super::{Details, Layer};

/// Where a document's raw bytes live. Implementors fetch/store bytes only;
/// parsing is the `Document`'s job.
pub trait Source: Send + Sync {
    fn read(&self) -> Result<Vec<u8>, LayerError>;
    fn write(&self, bytes: &[u8]) -> Result<(), LayerError>;
    /// Human-readable identifier for `Details::path` (a file path, a URL, …).
    fn describe(&self) -> String;
}

/// A document format: parse raw bytes into a `Value`, and render a `Value`
/// back to bytes for writing. `can_roundtrip_comments` lets `FileLayer`
/// report whether `save` can be expected to preserve formatting a human
/// wrote by hand; this crate's only `Document` impl is structural, so it
/// always re-renders from `Value` rather than patching bytes in place.
pub trait Document: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Value, LayerError>;
    fn render(&self, value: &Value) -> Result<Vec<u8>, LayerError>;
    fn format_name(&self) -> &'static str;
}

/// Composes a `Source` and a `Document` into a `Layer`. Mutual exclusion
/// between the background watcher's own fetch and `load`/`save` is
/// enforced here via `op_mutex`.
pub struct FileLayer<S, D> {
    name: String,
    source: Arc<S>,
    document: Arc<D>,
    op_mutex: Arc<Mutex<()>>,
    read_only: bool,
}

impl<S: Source + 'static, D: Document + 'static> FileLayer<S, D> {
    pub fn new(name: impl Into<String>, source: S, document: D) -> Self {
        Self {
            name: name.into(),
            source: Arc::new(source),
            document: Arc::new(document),
            op_mutex: Arc::new(Mutex::new(())),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn fetch(&self) -> Result<Value, LayerError> {
        let bytes = self.source.read()?;
        self.document.parse(&bytes)
    }
}

impl<S: Source + 'static, D: Document + 'static> Layer for FileLayer<S, D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&mut self) -> Result<Value, LayerError> {
        let _guard = self.op_mutex.lock().unwrap_or_else(|e| e.into_inner());
        self.fetch()
    }

    fn save(&mut self, changeset: &[JsonPatch]) -> Result<(), LayerError> {
        if self.read_only {
            return Err(LayerError::SaveNotSupported);
        }
        let _guard = self.op_mutex.lock().unwrap_or_else(|e| e.into_inner());
        let mut current = self.fetch()?;
        crate::patch::replay(&mut current, changeset)
            .map_err(|e| LayerError::Parse(e.to_string()))?;
        let bytes = self.document.render(&current)?;
        self.source.write(&bytes)
    }

    fn can_save(&self) -> bool {
        !self.read_only
    }

    fn fill_details(&self) -> Details {
        Details {
            source_kind: "file".to_string(),
            format: self.document.format_name().to_string(),
            path: self.source.describe(),
        }
    }

    fn watch(&self) -> Result<Box<dyn LayerWatcher>, LayerError> {
        let source = self.source.clone();
        let document = self.document.clone();
        let op_mutex = self.op_mutex.clone();
        Ok(Box::new(PollingWatcher::new(move || {
            let _guard = op_mutex.lock().unwrap_or_else(|e| e.into_inner());
            let bytes = source.read()?;
            document.parse(&bytes)
        })))
    }

    fn init_with_store(&mut self, _schema: &Schema) {}
}

/// A `Source` backed by a process-local byte buffer, for tests and for
/// callers who want `FileLayer`'s merge/save semantics without real disk
/// I/O.
#[derive(Clone, Default)]
pub struct MemorySource {
    bytes: Arc<Mutex<Vec<u8>>>,
    label: String,
}

impl MemorySource {
    pub fn new(label: impl Into<String>, initial: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(initial.into())),
            label: label.into(),
        }
    }
}

impl Source for MemorySource {
    fn read(&self) -> Result<Vec<u8>, LayerError> {
        Ok(self.bytes.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), LayerError> {
        *self.bytes.lock().unwrap_or_else(|e| e.into_inner()) = bytes.to_vec();
        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// A `Document` that (de)serializes a `Value` through `serde_json`. No
/// comment preservation, no formatting fidelity — a structural round trip.
#[derive(Clone, Default)]
pub struct JsonDocument;

impl Document for JsonDocument {
    fn parse(&self, bytes: &[u8]) -> Result<Value, LayerError> {
        if bytes.is_empty() {
            return Ok(Value::map());
        }
        let json: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| LayerError::Parse(e.to_string()))?;
        Ok(Value::from_json(&json))
    }

    fn render(&self, value: &Value) -> Result<Vec<u8>, LayerError> {
        serde_json::to_vec_pretty(&value.to_json()).map_err(|e| LayerError::Parse(e.to_string()))
    }

    fn format_name(&self) -> &'static str {
        "json"
    }
}
