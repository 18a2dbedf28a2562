//! The `{value, exists, layer, masked}` quadruple describing a single
//! path's effective state, plus the per-leaf context handed to
//! `Store::walk` callbacks.

use std::sync::Arc;

use crate::value::Value;

/// One layer's published, read-only metadata.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    pub name: String,
    pub priority: i64,
    pub source_kind: String,
    pub format: String,
    pub path: String,
    pub read_only: bool,
    pub no_watch: bool,
    pub sensitive: bool,
    pub optional: bool,
    pub loaded: bool,
    pub dirty: bool,
}

/// Distinguishes missing (`exists=false`), explicit null
/// (`exists=true, value=Null`), and present (`exists=true, value≠Null`).
#[derive(Debug, Clone)]
pub struct ResolvedValue {
    pub value: Value,
    pub exists: bool,
    pub layer: Option<LayerInfo>,
    pub masked: bool,
}

impl ResolvedValue {
    pub fn missing() -> Self {
        Self {
            value: Value::Null,
            exists: false,
            layer: None,
            masked: false,
        }
    }
}

/// Per-leaf context supplied to a `Store::walk` callback.
pub struct WalkContext {
    pub path: String,
    pub origin: Option<LayerInfo>,
    pub sensitive: bool,
    pub mask: Option<Arc<dyn Fn(&Value) -> Value + Send + Sync>>,
}

impl WalkContext {
    /// The leaf's value with masking applied, following the same rule as
    /// `Store::get_at`: only when `sensitive`, a mask function is
    /// configured, and the value isn't empty.
    pub fn masked_value(&self, raw: &Value) -> Value {
        if self.sensitive && !raw.is_empty_for_masking() {
            if let Some(mask) = &self.mask {
                return mask(raw);
            }
        }
        raw.clone()
    }
}
