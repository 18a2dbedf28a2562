//! Jubako: a layered, reactive configuration engine.
//!
//! Multiple named sources ("layers") are loaded, deep-merged by priority,
//! remapped through a hand-described schema, and decoded into a typed
//! record held in a reference-stable, subscribable [`Cell`]. See
//! [`store::Store`] for the entry point.

pub mod cell;
pub mod error;
pub mod layer;
pub mod materializer;
pub mod origin;
pub mod patch;
pub mod path;
pub mod resolved;
pub mod schema;
pub mod set_opts;
pub mod store;
pub mod value;
pub mod watch;

pub use cell::Cell;
pub use error::{JoinedErrors, JubakoError, LayerError};
pub use layer::{Details, Layer};
pub use patch::{JsonPatch, PatchOp};
pub use path::PathError;
pub use resolved::{LayerInfo, ResolvedValue, WalkContext};
pub use schema::{Schema, SchemaOptions, Schematic};
pub use set_opts::{SetAction, SetEntry, SetOption};
pub use store::{
    no_watch, optional, priority, read_only, sensitive, with_coercer, with_decoder,
    with_jubako_tag_delimiter, with_jubako_tag_name, with_mask, with_priority_step, with_tag_name,
    with_warn_sink, AddOption, Store, StoreOption, WatchConfig, WatchHandle,
};
pub use value::{Map, Value};
pub use watch::{CancelToken, LayerWatcher, WatchFrame};
