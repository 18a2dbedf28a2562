//! In-memory reference layer holding a `Value::Map` directly. The
//! simplest concrete `Layer`, used as a baseline in every other module's
//! tests and as the fallback target for `Store::set`/`set_to` when no
//! layer name is given.

use crate::error::LayerError;
use crate::patch::JsonPatch;
use crate::schema::Schema;
use crate::value::Value;

use super::{Details, Layer};

/// A layer backed by a plain in-process `Value` tree, with no external
/// source at all. `load` always succeeds; `save` just applies the
/// changeset to the held tree and returns.
pub struct MapLayer {
    name: String,
    data: Value,
}

impl MapLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Value::map(),
        }
    }

    pub fn with_data(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl Layer for MapLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&mut self) -> Result<Value, LayerError> {
        Ok(self.data.clone())
    }

    fn save(&mut self, changeset: &[JsonPatch]) -> Result<(), LayerError> {
        crate::patch::replay(&mut self.data, changeset)
            .map_err(|e| LayerError::Other(e.to_string()))
    }

    fn can_save(&self) -> bool {
        true
    }

    fn fill_details(&self) -> Details {
        Details {
            source_kind: "map".to_string(),
            format: "value".to_string(),
            path: String::new(),
        }
    }

    fn init_with_store(&mut self, _schema: &Schema) {}
}
