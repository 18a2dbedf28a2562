//! The Layer contract between the Store and each configuration source,
//! plus concrete reference layers.

pub mod env;
pub mod file;
pub mod map;

use crate::error::LayerError;
use crate::patch::JsonPatch;
use crate::schema::Schema;
use crate::value::Value;
use crate::watch::LayerWatcher;

/// Identifies where a layer's data came from, for display/diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Details {
    pub source_kind: String,
    pub format: String,
    pub path: String,
}

/// The boundary every configuration source must implement.
///
/// Layers are stored as `Box<dyn Layer>` rather than a closed enum: unlike
/// a fixed set of backends known at compile time, `Store::add` must accept
/// arbitrary caller-defined sources (see `DESIGN.md`).
pub trait Layer: Send + Sync {
    fn name(&self) -> &str;

    /// Load the layer's current data. Optional layers have `NotExist`
    /// handled by the Store, not the layer itself.
    fn load(&mut self) -> Result<Value, LayerError>;

    /// Apply `changeset` to the underlying source. `can_save() == false`
    /// implementations should return `Err(LayerError::SaveNotSupported)`.
    fn save(&mut self, changeset: &[JsonPatch]) -> Result<(), LayerError>;

    fn can_save(&self) -> bool;

    fn fill_details(&self) -> Details;

    /// Build a watcher for this layer. The default is a no-op watcher that
    /// never delivers updates.
    fn watch(&self) -> Result<Box<dyn LayerWatcher>, LayerError> {
        Ok(Box::new(crate::watch::NoopWatcher))
    }

    /// Consulted once when the layer is added to a Store, letting
    /// store-aware layers (e.g. the env layer) capture the Store's schema
    /// to build their transform lazily.
    fn init_with_store(&mut self, _schema: &Schema) {}
}
