//! The merge/remap/decode pipeline that turns every layer's loaded data
//! into one materialized record.

use crate::error::JubakoError;
use crate::origin::{walk_for_origins, OriginIndex};
use crate::schema::Schema;
use crate::value::Value;

/// One layer's contribution, as seen by the materializer. Deliberately
/// decoupled from `store::LayerEntry` so this module doesn't need to know
/// about changesets, read-only flags, or the `dyn Layer` trait object.
pub struct LayerSnapshot<'a> {
    pub name: &'a str,
    pub priority: i64,
    /// `None` means this layer hasn't loaded yet; it's skipped during
    /// materialize.
    pub data: Option<&'a Value>,
}

/// Clear the origin index, then fold every loaded layer (lowest priority
/// first) into one deep-merged tree, recording provenance for every leaf
/// and container path along the way.
pub fn merge_layers(layers: &[LayerSnapshot<'_>], origins: &mut OriginIndex) -> Value {
    origins.clear();
    let mut merged = Value::map();
    for layer in layers {
        let Some(data) = layer.data else { continue };
        walk_for_origins(origins, "", data, layer.name, layer.priority);
        merged.deep_merge(data);
    }
    merged
}

/// Remap the merged tree through the Schema, then hand it to the decoder.
/// A decode failure leaves the caller's previous snapshot untouched — this
/// function is pure and has no side effect on failure.
pub fn decode<T>(
    merged: &Value,
    schema: &Schema,
    decoder: &(dyn Fn(&Value) -> Result<T, JubakoError> + Send + Sync),
) -> Result<T, JubakoError> {
    let remapped = schema.apply_mappings(merged);
    decoder(&remapped)
}

/// The default decoder: a JSON-equivalent round trip through `serde_json`.
pub fn default_decoder<T: serde::de::DeserializeOwned>(v: &Value) -> Result<T, JubakoError> {
    serde_json::from_value(v.to_json()).map_err(|e| JubakoError::DecodeError(e.to_string()))
}
