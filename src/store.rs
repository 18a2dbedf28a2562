//! The public entry point: a layered, materialized, reactive configuration
//! store. See `DESIGN.md` for the layer registry and materialize pipeline
//! this type drives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::cell::Cell;
use crate::error::{JoinedErrors, JubakoError};
use crate::layer::{Details, Layer};
use crate::materializer::{self, LayerSnapshot};
use crate::origin::OriginIndex;
use crate::resolved::{LayerInfo, ResolvedValue, WalkContext};
use crate::schema::{Coercer, DefaultCoercer, Schema, SchemaOptions, Schematic};
use crate::set_opts::{self, SetAction, SetOption};
use crate::value::Value;
use crate::watch::{CancelToken, LayerWatcher};

struct LayerEntry {
    layer: Box<dyn Layer>,
    priority: i64,
    details: Details,
    read_only: bool,
    no_watch: bool,
    sensitive: bool,
    optional: bool,
    data: Option<Value>,
    changeset: Vec<crate::patch::JsonPatch>,
    dirty: bool,
}

fn is_writable(entry: &LayerEntry) -> bool {
    !entry.read_only && entry.layer.can_save()
}

#[derive(Default)]
struct StoreInner {
    layers: Vec<LayerEntry>,
    origins: OriginIndex,
}

/// One option accepted by [`Store::new`]. Construct via the free functions
/// below (`with_tag_name`, `with_decoder`, ...) rather than the variants
/// directly.
pub enum StoreOption<T> {
    TagName(&'static str),
    JubakoTagName(&'static str),
    JubakoTagDelimiter(char),
    PriorityStep(i64),
    Decoder(Arc<dyn Fn(&Value) -> Result<T, JubakoError> + Send + Sync>),
    Coercer(Arc<dyn Coercer>),
    Mask(Arc<dyn Fn(&Value) -> Value + Send + Sync>),
    WarnSink(Arc<dyn Fn(&str) + Send + Sync>),
}

pub fn with_tag_name<T>(name: &'static str) -> StoreOption<T> {
    StoreOption::TagName(name)
}

pub fn with_jubako_tag_name<T>(name: &'static str) -> StoreOption<T> {
    StoreOption::JubakoTagName(name)
}

pub fn with_jubako_tag_delimiter<T>(delimiter: char) -> StoreOption<T> {
    StoreOption::JubakoTagDelimiter(delimiter)
}

pub fn with_priority_step<T>(step: i64) -> StoreOption<T> {
    StoreOption::PriorityStep(step)
}

pub fn with_decoder<T>(
    decoder: impl Fn(&Value) -> Result<T, JubakoError> + Send + Sync + 'static,
) -> StoreOption<T> {
    StoreOption::Decoder(Arc::new(decoder))
}

pub fn with_coercer<T>(coercer: impl Coercer + 'static) -> StoreOption<T> {
    StoreOption::Coercer(Arc::new(coercer))
}

pub fn with_mask<T>(mask: impl Fn(&Value) -> Value + Send + Sync + 'static) -> StoreOption<T> {
    StoreOption::Mask(Arc::new(mask))
}

pub fn with_warn_sink<T>(sink: impl Fn(&str) + Send + Sync + 'static) -> StoreOption<T> {
    StoreOption::WarnSink(Arc::new(sink))
}

struct StoreBuilder<T> {
    tag_name: Option<&'static str>,
    jubako_tag_name: Option<&'static str>,
    jubako_tag_delimiter: Option<char>,
    priority_step: Option<i64>,
    decoder: Option<Arc<dyn Fn(&Value) -> Result<T, JubakoError> + Send + Sync>>,
    coercer: Option<Arc<dyn Coercer>>,
    mask: Option<Arc<dyn Fn(&Value) -> Value + Send + Sync>>,
    warn_sink: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl<T> Default for StoreBuilder<T> {
    fn default() -> Self {
        Self {
            tag_name: None,
            jubako_tag_name: None,
            jubako_tag_delimiter: None,
            priority_step: None,
            decoder: None,
            coercer: None,
            mask: None,
            warn_sink: None,
        }
    }
}

impl<T> StoreOption<T> {
    fn apply(self, builder: &mut StoreBuilder<T>) {
        match self {
            StoreOption::TagName(n) => builder.tag_name = Some(n),
            StoreOption::JubakoTagName(n) => builder.jubako_tag_name = Some(n),
            StoreOption::JubakoTagDelimiter(d) => builder.jubako_tag_delimiter = Some(d),
            StoreOption::PriorityStep(s) => builder.priority_step = Some(s),
            StoreOption::Decoder(d) => builder.decoder = Some(d),
            StoreOption::Coercer(c) => builder.coercer = Some(c),
            StoreOption::Mask(m) => builder.mask = Some(m),
            StoreOption::WarnSink(s) => builder.warn_sink = Some(s),
        }
    }
}

/// One option accepted by [`Store::add`].
pub enum AddOption {
    Priority(i64),
    ReadOnly,
    NoWatch,
    Sensitive,
    Optional,
}

pub fn priority(p: i64) -> AddOption {
    AddOption::Priority(p)
}

pub fn read_only() -> AddOption {
    AddOption::ReadOnly
}

pub fn no_watch() -> AddOption {
    AddOption::NoWatch
}

pub fn sensitive() -> AddOption {
    AddOption::Sensitive
}

pub fn optional() -> AddOption {
    AddOption::Optional
}

/// Configuration for [`Store::watch`].
pub struct WatchConfig {
    pub debounce_delay: Duration,
    pub on_error: Option<Arc<dyn Fn(&str, &crate::error::LayerError) + Send + Sync>>,
    pub on_reload: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_millis(100),
            on_error: None,
            on_reload: None,
        }
    }
}

/// A running watch supervisor. Dropping this without calling `stop` leaves
/// the background thread running; call `stop` to join it deterministically.
pub struct WatchHandle {
    cancel: CancelToken,
    join: Option<std::thread::JoinHandle<()>>,
}

impl WatchHandle {
    pub fn stop(mut self) {
        self.cancel.cancel();
        if let Some(h) = self.join.take() {
            let _ = h.join();
        }
    }
}

/// A layered configuration store materializing into `T`.
///
/// Bound uniformly over `T: Schematic + DeserializeOwned + Send + Sync +
/// 'static` for the whole impl block, rather than splitting methods across
/// several `impl` blocks with narrower bounds: `Store::new`'s default
/// decoder always needs `DeserializeOwned`, so every constructor path ends
/// up requiring it anyway. Documented as a deliberate simplification in
/// `DESIGN.md`.
pub struct Store<T> {
    schema: Schema,
    decoder: Arc<dyn Fn(&Value) -> Result<T, JubakoError> + Send + Sync>,
    #[allow(dead_code)]
    coercer: Arc<dyn Coercer>,
    mask: Option<Arc<dyn Fn(&Value) -> Value + Send + Sync>>,
    warn_sink: Arc<dyn Fn(&str) + Send + Sync>,
    priority_step: i64,
    resolved: Cell<T>,
    inner: RwLock<StoreInner>,
}

impl<T> Store<T>
where
    T: Schematic + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(options: impl IntoIterator<Item = StoreOption<T>>) -> Result<Self, JubakoError> {
        let mut builder = StoreBuilder::default();
        for opt in options {
            opt.apply(&mut builder);
        }

        let schema_opts = SchemaOptions {
            tag_name: builder.tag_name.unwrap_or("json"),
            jubako_tag_name: builder.jubako_tag_name.unwrap_or("jubako"),
            jubako_tag_delimiter: builder.jubako_tag_delimiter.unwrap_or(','),
        };
        let schema = Schema::build_for::<T>(&schema_opts);

        let decoder = builder
            .decoder
            .unwrap_or_else(|| Arc::new(materializer::default_decoder::<T>));
        let coercer: Arc<dyn Coercer> = builder.coercer.unwrap_or_else(|| Arc::new(DefaultCoercer));
        let warn_sink = builder
            .warn_sink
            .unwrap_or_else(|| Arc::new(|msg: &str| tracing::warn!(message = msg, "jubako")));
        let priority_step = builder.priority_step.unwrap_or(10);

        let initial = decoder(&Value::map())?;

        Ok(Self {
            schema,
            decoder,
            coercer,
            mask: builder.mask,
            warn_sink,
            priority_step,
            resolved: Cell::new(initial),
            inner: RwLock::new(StoreInner::default()),
        })
    }

    /// Register a new layer. Priority defaults to its registration index
    /// times the store's priority step; layers of equal priority keep
    /// their relative registration order (stable sort).
    pub fn add(
        &self,
        layer: impl Layer + 'static,
        options: impl IntoIterator<Item = AddOption>,
    ) -> Result<(), JubakoError> {
        let mut inner = self.inner.write();

        let mut explicit_priority = None;
        let mut read_only = false;
        let mut no_watch = false;
        let mut sensitive = false;
        let mut optional = false;
        for opt in options {
            match opt {
                AddOption::Priority(p) => explicit_priority = Some(p),
                AddOption::ReadOnly => read_only = true,
                AddOption::NoWatch => no_watch = true,
                AddOption::Sensitive => sensitive = true,
                AddOption::Optional => optional = true,
            }
        }

        let mut layer = Box::new(layer) as Box<dyn Layer>;
        let name = layer.name().to_string();
        if inner.layers.iter().any(|e| e.layer.name() == name) {
            return Err(JubakoError::LayerAlreadyExists(name));
        }

        layer.init_with_store(&self.schema);
        let details = layer.fill_details();

        let priority = explicit_priority.unwrap_or_else(|| inner.layers.len() as i64 * self.priority_step);

        inner.layers.push(LayerEntry {
            layer,
            priority,
            details,
            read_only,
            no_watch,
            sensitive,
            optional,
            data: None,
            changeset: Vec::new(),
            dirty: false,
        });
        inner.layers.sort_by_key(|e| e.priority);
        Ok(())
    }

    /// Load every registered layer and materialize. Optional layers whose
    /// source doesn't exist yet load as an empty document.
    pub fn load(&self) -> Result<(), JubakoError> {
        let mut inner = self.inner.write();
        for entry in &mut inner.layers {
            let name = entry.layer.name().to_string();
            match entry.layer.load() {
                Ok(data) => entry.data = Some(data),
                Err(crate::error::LayerError::NotExist(_)) if entry.optional => {
                    entry.data = Some(Value::map());
                }
                Err(e) => return Err(JubakoError::Layer { layer: name, source: e }),
            }
            entry.changeset.clear();
            entry.dirty = false;
        }
        let value = self.materialize_locked(&mut inner)?;
        drop(inner);
        self.resolved.set(value);
        Ok(())
    }

    /// Re-fetch every layer's source, then replay its in-memory changeset
    /// on top so unsaved edits survive an external reload.
    pub fn reload(&self) -> Result<(), JubakoError> {
        let mut inner = self.inner.write();
        for idx in 0..inner.layers.len() {
            let (name, optional, old_changeset) = {
                let entry = &inner.layers[idx];
                (entry.layer.name().to_string(), entry.optional, entry.changeset.clone())
            };
            let loaded = inner.layers[idx].layer.load();
            let mut data = match loaded {
                Ok(data) => data,
                Err(crate::error::LayerError::NotExist(_)) if optional => Value::map(),
                Err(e) => return Err(JubakoError::Layer { layer: name, source: e }),
            };
            crate::patch::replay(&mut data, &old_changeset)?;
            let entry = &mut inner.layers[idx];
            entry.data = Some(data);
            entry.dirty = !old_changeset.is_empty() && is_writable(entry);
            entry.changeset = old_changeset;
        }
        let value = self.materialize_locked(&mut inner)?;
        drop(inner);
        self.resolved.set(value);
        Ok(())
    }

    fn materialize_locked(&self, inner: &mut StoreInner) -> Result<T, JubakoError> {
        let snapshots: Vec<LayerSnapshot<'_>> = inner
            .layers
            .iter()
            .map(|e| LayerSnapshot {
                name: e.layer.name(),
                priority: e.priority,
                data: e.data.as_ref(),
            })
            .collect();
        let merged = materializer::merge_layers(&snapshots, &mut inner.origins);
        materializer::decode(&merged, &self.schema, self.decoder.as_ref())
    }

    /// The current materialized snapshot.
    pub fn get(&self) -> Arc<T> {
        self.resolved.get()
    }

    /// Subscribe to materialized snapshots; returns an unsubscribe closure.
    pub fn subscribe<F>(&self, f: F) -> impl Fn() + '_
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.resolved.subscribe(f)
    }

    fn find_layer_index(inner: &StoreInner, layer_name: &str) -> Result<usize, JubakoError> {
        inner
            .layers
            .iter()
            .position(|e| e.layer.name() == layer_name)
            .ok_or_else(|| JubakoError::LayerNotFound(layer_name.to_string()))
    }

    fn check_writable(entry: &LayerEntry, layer_name: &str) -> Result<(), JubakoError> {
        if entry.read_only {
            return Err(JubakoError::LayerReadOnly(layer_name.to_string()));
        }
        if !entry.layer.can_save() {
            return Err(JubakoError::LayerNotWritable(layer_name.to_string()));
        }
        if entry.data.is_none() {
            return Err(JubakoError::LayerNotLoaded(layer_name.to_string()));
        }
        Ok(())
    }

    /// Write one value into a single layer at `path`.
    pub fn set_to(&self, layer_name: &str, path: &str, value: Value) -> Result<(), JubakoError> {
        let mut inner = self.inner.write();
        let idx = Self::find_layer_index(&inner, layer_name)?;
        Self::check_writable(&inner.layers[idx], layer_name)?;

        if self.schema.trie.lookup(path).is_some_and(|m| m.sensitive()) && !inner.layers[idx].sensitive {
            return Err(JubakoError::SensitiveFieldToNormalLayer {
                layer: layer_name.to_string(),
                path: path.to_string(),
            });
        }

        {
            let entry = &mut inner.layers[idx];
            let data = entry.data.as_mut().expect("checked above");
            let outcome = crate::path::set_path(data, path, value.clone())?;
            let patch = if outcome.created {
                crate::patch::JsonPatch::add(path, value)
            } else {
                crate::patch::JsonPatch::replace(path, value)
            };
            entry.changeset.push(patch);
            entry.dirty = true;
        }

        let value = self.materialize_locked(&mut inner)?;
        drop(inner);
        self.resolved.set(value);
        Ok(())
    }

    /// Delete one or more paths from a single layer. Materializes only if
    /// at least one path was actually present.
    pub fn delete_from(&self, layer_name: &str, paths: &[&str]) -> Result<(), JubakoError> {
        let mut inner = self.inner.write();
        let idx = Self::find_layer_index(&inner, layer_name)?;
        Self::check_writable(&inner.layers[idx], layer_name)?;

        let mut any = false;
        {
            let entry = &mut inner.layers[idx];
            let data = entry.data.as_mut().expect("checked above");
            for path in paths {
                let removed = crate::path::delete_path(data, path)?;
                if removed {
                    any = true;
                    entry.changeset.push(crate::patch::JsonPatch::remove(*path));
                }
            }
            if any {
                entry.dirty = true;
            }
        }

        if any {
            let value = self.materialize_locked(&mut inner)?;
            drop(inner);
            self.resolved.set(value);
        }
        Ok(())
    }

    /// Apply a batch of `Set`/`SetOption` entries to a single layer,
    /// materializing once at the end.
    pub fn set(
        &self,
        layer_name: &str,
        options: impl IntoIterator<Item = SetOption>,
    ) -> Result<(), JubakoError> {
        let entries = set_opts::evaluate(options);
        let mut inner = self.inner.write();
        let idx = Self::find_layer_index(&inner, layer_name)?;
        Self::check_writable(&inner.layers[idx], layer_name)?;

        // Sensitivity is checked for every entry up front so a violation
        // leaves the layer untouched: no partial writes.
        if !inner.layers[idx].sensitive {
            for entry_item in &entries {
                if self.schema.trie.lookup(&entry_item.path).is_some_and(|m| m.sensitive()) {
                    return Err(JubakoError::SensitiveFieldToNormalLayer {
                        layer: layer_name.to_string(),
                        path: entry_item.path.clone(),
                    });
                }
            }
        }

        for entry_item in &entries {
            let patch_opt = {
                let data = inner.layers[idx].data.as_mut().expect("checked above");
                match &entry_item.action {
                    SetAction::Set(v) => {
                        let outcome = crate::path::set_path(data, &entry_item.path, v.clone())?;
                        Some(if outcome.created {
                            crate::patch::JsonPatch::add(entry_item.path.clone(), v.clone())
                        } else {
                            crate::patch::JsonPatch::replace(entry_item.path.clone(), v.clone())
                        })
                    }
                    SetAction::Delete => {
                        let removed = crate::path::delete_path(data, &entry_item.path)?;
                        removed.then(|| crate::patch::JsonPatch::remove(entry_item.path.clone()))
                    }
                }
            };
            if let Some(patch) = patch_opt {
                inner.layers[idx].changeset.push(patch);
            }
        }
        if !entries.is_empty() {
            inner.layers[idx].dirty = true;
        }

        let value = self.materialize_locked(&mut inner)?;
        drop(inner);
        self.resolved.set(value);
        Ok(())
    }

    /// Persist every layer with a pending changeset. Layers with nothing
    /// pending are skipped silently; failures from multiple layers are
    /// aggregated rather than aborting on the first one.
    pub fn save(&self) -> Result<(), JubakoError> {
        let mut inner = self.inner.write();
        let mut errors = Vec::new();
        for entry in &mut inner.layers {
            if !entry.dirty || entry.changeset.is_empty() {
                continue;
            }
            let name = entry.layer.name().to_string();
            if entry.read_only {
                errors.push(JubakoError::LayerReadOnly(name));
                continue;
            }
            if !entry.layer.can_save() {
                errors.push(JubakoError::LayerNotWritable(name));
                continue;
            }
            match entry.layer.save(&entry.changeset) {
                Ok(()) => {
                    entry.changeset.clear();
                    entry.dirty = false;
                }
                Err(e) => errors.push(JubakoError::Layer { layer: name, source: e }),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            let count = errors.len();
            Err(JubakoError::Joined(count, JoinedErrors(errors)))
        }
    }

    /// Persist a single layer's pending changeset, if any.
    pub fn save_layer(&self, name: &str) -> Result<(), JubakoError> {
        let mut inner = self.inner.write();
        let idx = Self::find_layer_index(&inner, name)?;
        let entry = &mut inner.layers[idx];
        if !entry.dirty || entry.changeset.is_empty() {
            return Ok(());
        }
        Self::check_writable(entry, name)?;
        entry.layer.save(&entry.changeset).map_err(|e| JubakoError::Layer {
            layer: name.to_string(),
            source: e,
        })?;
        entry.changeset.clear();
        entry.dirty = false;
        Ok(())
    }

    fn resolve_raw(inner: &StoreInner, path: &str) -> ResolvedValue {
        if inner.origins.is_leaf(path) {
            if let Some(entry) = inner.origins.get_leaf(path) {
                return ResolvedValue {
                    value: entry.value.clone(),
                    exists: true,
                    layer: Some(Self::layer_info_for(inner, &entry.layer_name)),
                    masked: false,
                };
            }
        }
        if inner.origins.is_container(path) {
            let mut merged = Value::Null;
            let mut last_layer = None;
            for entry in inner.origins.get_all_container(path) {
                merged.deep_merge(&entry.value);
                last_layer = Some(entry.layer_name.clone());
            }
            return ResolvedValue {
                value: merged,
                exists: true,
                layer: last_layer.map(|n| Self::layer_info_for(inner, &n)),
                masked: false,
            };
        }
        ResolvedValue::missing()
    }

    /// Resolve the effective value at `path`, masking it if the schema
    /// marks it sensitive, a mask function is configured, and the value
    /// isn't empty.
    pub fn get_at(&self, path: &str) -> ResolvedValue {
        let inner = self.inner.read();
        let mut resolved = Self::resolve_raw(&inner, path);
        if resolved.exists {
            if let Some(mask) = &self.mask {
                let sensitive = self.schema.trie.lookup(path).is_some_and(|m| m.sensitive());
                if sensitive && !resolved.value.is_empty_for_masking() {
                    resolved.value = mask(&resolved.value);
                    resolved.masked = true;
                }
            }
        }
        resolved
    }

    /// Like `get_at`, but never applies masking.
    pub fn get_at_unmasked(&self, path: &str) -> ResolvedValue {
        let inner = self.inner.read();
        Self::resolve_raw(&inner, path)
    }

    /// Every layer's individual contribution at `path`, lowest priority
    /// first.
    pub fn get_all_at(&self, path: &str) -> Vec<ResolvedValue> {
        let inner = self.inner.read();
        let entries = if inner.origins.is_leaf(path) {
            inner.origins.get_all_leaf(path)
        } else {
            inner.origins.get_all_container(path)
        };
        entries
            .iter()
            .map(|e| ResolvedValue {
                value: e.value.clone(),
                exists: true,
                layer: Some(Self::layer_info_for(&inner, &e.layer_name)),
                masked: false,
            })
            .collect()
    }

    /// Visit every leaf path in lexicographic order, stopping early if `f`
    /// returns `false`.
    pub fn walk(&self, mut f: impl FnMut(&WalkContext, &Value) -> bool) {
        let inner = self.inner.read();
        let mut paths: Vec<&str> = inner.origins.leaf_paths().collect();
        paths.sort_unstable();
        for path in paths {
            let resolved = Self::resolve_raw(&inner, path);
            let sensitive = self.schema.trie.lookup(path).is_some_and(|m| m.sensitive());
            let ctx = WalkContext {
                path: path.to_string(),
                origin: resolved.layer.clone(),
                sensitive,
                mask: self.mask.clone(),
            };
            if !f(&ctx, &resolved.value) {
                break;
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.read().layers.iter().any(|e| e.dirty)
    }

    pub fn list_layers(&self) -> Vec<String> {
        self.inner.read().layers.iter().map(|e| e.layer.name().to_string()).collect()
    }

    pub fn get_layer_info(&self, name: &str) -> Option<LayerInfo> {
        let inner = self.inner.read();
        inner
            .layers
            .iter()
            .find(|e| e.layer.name() == name)
            .map(|_| Self::layer_info_for(&inner, name))
    }

    fn layer_info_for(inner: &StoreInner, name: &str) -> LayerInfo {
        match inner.layers.iter().find(|e| e.layer.name() == name) {
            Some(entry) => LayerInfo {
                name: name.to_string(),
                priority: entry.priority,
                source_kind: entry.details.source_kind.clone(),
                format: entry.details.format.clone(),
                path: entry.details.path.clone(),
                read_only: entry.read_only,
                no_watch: entry.no_watch,
                sensitive: entry.sensitive,
                optional: entry.optional,
                loaded: entry.data.is_some(),
                dirty: entry.dirty,
            },
            None => LayerInfo {
                name: name.to_string(),
                priority: 0,
                source_kind: String::new(),
                format: String::new(),
                path: String::new(),
                read_only: false,
                no_watch: false,
                sensitive: false,
                optional: false,
                loaded: false,
                dirty: false,
            },
        }
    }

    /// Run `f` against a named layer's trait object. Rust can't hand back a
    /// `&dyn Layer` borrowed from an internal lock guard without leaking
    /// it, so `GetLayer` becomes a callback accessor instead (documented
    /// deviation, see `DESIGN.md`).
    pub fn with_layer<R>(&self, name: &str, f: impl FnOnce(&dyn Layer) -> R) -> Option<R> {
        let inner = self.inner.read();
        inner
            .layers
            .iter()
            .find(|e| e.layer.name() == name)
            .map(|e| f(e.layer.as_ref()))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn has_mappings(&self) -> bool {
        self.schema.has_mappings()
    }

    fn apply_watch_updates(&self, updates: HashMap<String, Value>) -> Result<(), JubakoError> {
        let mut inner = self.inner.write();
        for entry in &mut inner.layers {
            if let Some(data) = updates.get(entry.layer.name()) {
                entry.data = Some(data.clone());
                entry.changeset.clear();
                entry.dirty = false;
            }
        }
        let value = self.materialize_locked(&mut inner)?;
        drop(inner);
        self.resolved.set(value);
        Ok(())
    }

    /// Start the watch supervisor: builds and starts a watcher for every
    /// layer not marked `no_watch`, then runs a debounce loop on a
    /// background thread that multiplexes all of them into one
    /// materialize call per settled batch.
    pub fn watch(self: &Arc<Self>, config: WatchConfig) -> Result<WatchHandle, JubakoError> {
        let inner = self.inner.read();
        let mut watchers: Vec<(String, Box<dyn LayerWatcher>)> = Vec::new();
        for entry in &inner.layers {
            if entry.no_watch {
                continue;
            }
            let mut watcher = entry
                .layer
                .watch()
                .map_err(|e| JubakoError::WatcherStartError(e.to_string()))?;
            if let Err(e) = watcher.start() {
                for (_, mut w) in watchers {
                    w.stop();
                }
                return Err(JubakoError::WatcherStartError(e.to_string()));
            }
            watchers.push((entry.layer.name().to_string(), watcher));
        }
        drop(inner);

        let cancel = CancelToken::new();
        let cancel_thread = cancel.clone();
        let store = Arc::clone(self);
        let debounce_delay = config.debounce_delay;

        let join = std::thread::spawn(move || {
            let mut pending: HashMap<String, Value> = HashMap::new();
            let mut last_update: Option<Instant> = None;
            loop {
                if cancel_thread.is_cancelled() {
                    break;
                }
                let mut saw_frame = false;
                for (name, watcher) in &watchers {
                    while let Some(frame) = watcher.try_recv() {
                        saw_frame = true;
                        match frame.data {
                            Ok(data) => {
                                pending.insert(name.clone(), data);
                                last_update = Some(Instant::now());
                            }
                            Err(e) => {
                                if let Some(on_error) = &config.on_error {
                                    on_error(name, &e);
                                }
                            }
                        }
                    }
                }
                if !pending.is_empty() {
                    if let Some(at) = last_update {
                        if at.elapsed() >= debounce_delay {
                            let batch = std::mem::take(&mut pending);
                            match store.apply_watch_updates(batch) {
                                Ok(()) => {
                                    if let Some(on_reload) = &config.on_reload {
                                        on_reload();
                                    }
                                }
                                Err(e) => {
                                    if let Some(on_error) = &config.on_error {
                                        on_error("", &crate::error::LayerError::Other(e.to_string()));
                                    }
                                }
                            }
                            last_update = None;
                        }
                    }
                }
                if !saw_frame {
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
            for (_, mut watcher) in watchers {
                watcher.stop();
            }
        });

        Ok(WatchHandle {
            cancel,
            join: Some(join),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::map::MapLayer;
    use crate::schema::{FieldContainer, FieldDescriptor, TargetKind, TypeDescriptor};

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Config {
        #[serde(default)]
        host: String,
        #[serde(default)]
        port: i64,
    }

    impl Schematic for Config {
        fn describe() -> TypeDescriptor {
            TypeDescriptor {
                fields: vec![
                    FieldDescriptor {
                        field_name: "host",
                        tag: Some("host"),
                        jubako_tag: None,
                        container: FieldContainer::Leaf,
                        leaf_kind: TargetKind::String,
                    },
                    FieldDescriptor {
                        field_name: "port",
                        tag: Some("port"),
                        jubako_tag: None,
                        container: FieldContainer::Leaf,
                        leaf_kind: TargetKind::Int,
                    },
                ],
            }
        }
    }

    fn warn_sink_noop<T>() -> StoreOption<T> {
        with_warn_sink(|_msg: &str| {})
    }

    #[test]
    fn new_decodes_default_for_zero_layers() {
        let store = Store::<Config>::new([warn_sink_noop()]).unwrap();
        assert_eq!(*store.get(), Config { host: String::new(), port: 0 });
    }

    #[test]
    fn add_rejects_duplicate_names() {
        let store = Store::<Config>::new([warn_sink_noop()]).unwrap();
        store.add(MapLayer::new("defaults"), []).unwrap();
        let err = store.add(MapLayer::new("defaults"), []).unwrap_err();
        assert!(matches!(err, JubakoError::LayerAlreadyExists(_)));
    }

    #[test]
    fn load_and_get_reflect_merged_layers() {
        let store = Store::<Config>::new([warn_sink_noop()]).unwrap();
        store
            .add(
                MapLayer::with_data(
                    "defaults",
                    Value::Map([("host".to_string(), Value::String("localhost".into()))].into_iter().collect()),
                ),
                [],
            )
            .unwrap();
        store
            .add(
                MapLayer::with_data("user", Value::Map([("port".to_string(), Value::Int(9000))].into_iter().collect())),
                [priority(10)],
            )
            .unwrap();
        store.load().unwrap();
        let cfg = store.get();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 9000);
    }

    #[test]
    fn set_to_marks_dirty_and_materializes() {
        let store = Store::<Config>::new([warn_sink_noop()]).unwrap();
        store.add(MapLayer::new("user"), []).unwrap();
        store.load().unwrap();
        store.set_to("user", "/host", Value::String("example.com".into())).unwrap();
        assert_eq!(store.get().host, "example.com");
        assert!(store.is_dirty());
    }

    #[test]
    fn set_to_rejects_read_only_layer() {
        let store = Store::<Config>::new([warn_sink_noop()]).unwrap();
        store.add(MapLayer::new("defaults"), [read_only()]).unwrap();
        store.load().unwrap();
        let err = store.set_to("defaults", "/host", Value::String("x".into())).unwrap_err();
        assert!(matches!(err, JubakoError::LayerReadOnly(_)));
    }

    #[test]
    fn save_clears_dirty_on_success() {
        let store = Store::<Config>::new([warn_sink_noop()]).unwrap();
        store.add(MapLayer::new("user"), []).unwrap();
        store.load().unwrap();
        store.set_to("user", "/host", Value::String("x".into())).unwrap();
        assert!(store.is_dirty());
        store.save().unwrap();
        assert!(!store.is_dirty());
    }

    #[test]
    fn get_at_resolves_leaf_and_reports_missing() {
        let store = Store::<Config>::new([warn_sink_noop()]).unwrap();
        store
            .add(
                MapLayer::with_data("defaults", Value::Map([("host".to_string(), Value::String("x".into()))].into_iter().collect())),
                [],
            )
            .unwrap();
        store.load().unwrap();
        let resolved = store.get_at("/host");
        assert!(resolved.exists);
        assert_eq!(resolved.value, Value::String("x".into()));
        assert!(!store.get_at("/missing").exists);
    }

    #[test]
    fn delete_from_materializes_only_when_something_removed() {
        let store = Store::<Config>::new([warn_sink_noop()]).unwrap();
        store
            .add(
                MapLayer::with_data("user", Value::Map([("host".to_string(), Value::String("x".into()))].into_iter().collect())),
                [],
            )
            .unwrap();
        store.load().unwrap();
        store.delete_from("user", &["/host"]).unwrap();
        assert_eq!(store.get().host, String::new());
        store.delete_from("user", &["/missing"]).unwrap();
    }
}
