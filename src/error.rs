//! Boundary error types.

use thiserror::Error;

use crate::path::PathError;

/// Errors a [`Layer`](crate::layer::Layer) implementation may surface from
/// `load`/`save`/`watch`.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("source not found: {0}")]
    NotExist(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("save not supported by this source")]
    SaveNotSupported,
    #[error("operation cancelled")]
    Cancelled,
    #[error("watcher failed to start: {0}")]
    WatcherStart(String),
    #[error("{0}")]
    Other(String),
}

/// Top-level error type returned by [`Store`](crate::store::Store)
/// operations.
#[derive(Debug, Error)]
pub enum JubakoError {
    #[error("layer {0:?} not found")]
    LayerNotFound(String),

    #[error("layer {0:?} already exists")]
    LayerAlreadyExists(String),

    #[error("layer {0:?} is not yet loaded")]
    LayerNotLoaded(String),

    #[error("layer {0:?} is read-only")]
    LayerReadOnly(String),

    #[error("layer {0:?} is not writable: its source does not support saving")]
    LayerNotWritable(String),

    #[error("layer {0:?} does not support save")]
    SaveNotSupported(String),

    #[error("path {path:?} is sensitive and cannot be written to non-sensitive layer {layer:?}")]
    SensitiveFieldToNormalLayer { layer: String, path: String },

    #[error("invalid JSON pointer: {0}")]
    InvalidPointer(#[from] PathError),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("conversion error: {0}")]
    ConversionError(String),

    #[error("watcher start error: {0}")]
    WatcherStartError(String),

    #[error("layer {layer:?} error: {source}")]
    Layer {
        layer: String,
        #[source]
        source: LayerError,
    },

    #[error("{0} error(s) occurred during save: {1}")]
    Joined(usize, JoinedErrors),
}

/// A simple joined-error display used by `Store::save` to aggregate
/// per-layer failures into one reported error.
#[derive(Debug)]
pub struct JoinedErrors(pub Vec<JubakoError>);

impl std::fmt::Display for JoinedErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for JoinedErrors {}

pub type Result<T> = std::result::Result<T, JubakoError>;
