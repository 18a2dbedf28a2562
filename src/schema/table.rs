//! The hierarchical `MappingTable`: one [`PathMapping`] per field, plus
//! nested/slice-element/map-value sub-tables for container fields.

use std::collections::HashSet;

use indexmap::IndexMap;

use super::{FieldContainer, SchemaOptions, TargetKind, TypeDescriptor};
use crate::value::{Map, Value};

/// Three-valued sensitivity: a field with no `jubako` tag is `Unset`; one
/// tagged `sensitive` is `Explicit(true)`; container fields may in
/// principle propagate a parent's policy down (`Inherit`), though no field
/// in this schema walker currently emits it — it exists so downstream
/// matching can distinguish "never set" from "explicitly false".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    Unset,
    Explicit(bool),
    Inherit,
}

/// How a [`PathMapping`]'s field nests, mirroring [`FieldContainer`] but
/// without the associated [`super::TypeDescriptor`] payload (the payload is
/// only needed once, to build the sub-table, which is stored alongside in
/// [`MappingTable`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Leaf,
    Struct,
    SliceOfStruct,
    MapOfStruct,
}

/// One field's remap description, produced while walking a [`TypeDescriptor`].
#[derive(Debug, Clone)]
pub struct PathMapping {
    /// The name used in the decoded map; defaults to the field's tag-derived
    /// key, falling back to the Rust field name.
    pub field_key: String,
    /// Declared remap source, if any: absolute paths start with `/`;
    /// relative paths are stored without a leading `/` and are resolved
    /// against the enclosing element's prefix.
    pub source_path: Option<String>,
    pub is_relative: bool,
    /// `true` for fields tagged `"-"` in either the field tag or the
    /// `jubako` tag's path segment.
    pub skipped: bool,
    pub sensitivity: Sensitivity,
    pub container: ContainerKind,
    /// Extra `jubako` tag directives beyond `sensitive` (e.g. `env:PATTERN`),
    /// consumed by [`crate::layer::env::EnvLayer`].
    pub directives: Vec<String>,
    /// The coercion target for a leaf field; meaningless for non-leaf
    /// fields, where it is left as whatever the [`super::FieldDescriptor`]
    /// happened to carry.
    pub leaf_kind: TargetKind,
}

impl PathMapping {
    pub fn sensitive(&self) -> bool {
        matches!(self.sensitivity, Sensitivity::Explicit(true))
    }

    /// The `env:<PATTERN>` directive's raw pattern string, if any.
    pub fn env_pattern(&self) -> Option<&str> {
        self.directives.iter().find_map(|d| d.strip_prefix("env:"))
    }
}

/// A record type's field tree: this level's mappings, plus sub-tables for
/// nested struct/slice-of-struct/map-of-struct fields, each keyed by the
/// owning field's `field_key`.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    pub mappings: Vec<PathMapping>,
    pub nested: IndexMap<String, MappingTable>,
    pub slice_element: IndexMap<String, MappingTable>,
    pub map_value: IndexMap<String, MappingTable>,
}

impl MappingTable {
    pub fn build(descriptor: &TypeDescriptor, opts: &SchemaOptions) -> Self {
        let mut table = MappingTable::default();
        for field in &descriptor.fields {
            let (mut field_key, skipped_by_field_tag) = parse_field_tag(field.tag, field.field_name);
            let (source_path, is_relative, skipped_by_jubako_tag, sensitivity, directives) =
                parse_jubako_tag(field.jubako_tag, opts.jubako_tag_delimiter);

            if field_key.is_empty() {
                field_key = field.field_name.to_string();
            }
            let skipped = skipped_by_field_tag || skipped_by_jubako_tag;

            let container = match &field.container {
                FieldContainer::Leaf => ContainerKind::Leaf,
                FieldContainer::Struct(td) => {
                    table.nested.insert(field_key.clone(), MappingTable::build(td, opts));
                    ContainerKind::Struct
                }
                FieldContainer::SliceOfStruct(td) => {
                    table
                        .slice_element
                        .insert(field_key.clone(), MappingTable::build(td, opts));
                    ContainerKind::SliceOfStruct
                }
                FieldContainer::MapOfStruct(td) => {
                    table
                        .map_value
                        .insert(field_key.clone(), MappingTable::build(td, opts));
                    ContainerKind::MapOfStruct
                }
            };

            if matches!(sensitivity, Sensitivity::Explicit(true)) && container != ContainerKind::Leaf {
                tracing::warn!(
                    field = field.field_name,
                    "jubako: \"sensitive\" directive on non-leaf field has no effect on its children"
                );
            }

            table.mappings.push(PathMapping {
                field_key,
                source_path,
                is_relative,
                skipped,
                sensitivity,
                container,
                directives,
                leaf_kind: field.leaf_kind,
            });
        }
        table
    }

    /// Recursively test whether any mapping (at this level or nested)
    /// satisfies `pred`; used for `Store::has_mappings`.
    pub fn any_mapping(&self, pred: impl Fn(&PathMapping) -> bool + Copy) -> bool {
        self.mappings.iter().any(|m| pred(m))
            || self.nested.values().any(|t| t.any_mapping(pred))
            || self.slice_element.values().any(|t| t.any_mapping(pred))
            || self.map_value.values().any(|t| t.any_mapping(pred))
    }

    /// Collect every field carrying an `env:<PATTERN>` directive, paired
    /// with the JSON-pointer template it resolves to. Mirrors
    /// [`crate::schema::trie::MappingTrie::build`]'s table walk, but
    /// substitutes `{key}`/`{index}` placeholders for map-value/slice-element
    /// sub-table prefixes instead of the trie's literal `*`, since the env
    /// layer's pattern capture groups are named `key`/`index`.
    pub fn env_mappings(&self) -> Vec<EnvMapping> {
        let mut out = Vec::new();
        collect_env_mappings(self, "", &mut out);
        out
    }
}

/// One `env:<PATTERN>` directive resolved to a target JSON-pointer template.
#[derive(Debug, Clone)]
pub struct EnvMapping {
    /// The raw pattern from the `env:` directive, e.g.
    /// `"BACKLOG_CLIENT_ID_{key|lower}"` or a plain literal env var name.
    pub pattern: String,
    /// The JSON pointer this field resolves to, with `{key}`/`{index}`
    /// placeholders left in for slice/map ancestors, e.g.
    /// `"/backlog/{key}/client_id"`.
    pub target_template: String,
    pub leaf_kind: TargetKind,
}

fn collect_env_mappings(table: &MappingTable, prefix: &str, out: &mut Vec<EnvMapping>) {
    for m in &table.mappings {
        if m.skipped {
            continue;
        }
        let insert_at = match (&m.source_path, m.is_relative) {
            (Some(sp), false) => sp.clone(),
            (Some(sp), true) => crate::path::join(prefix, sp),
            (None, _) => crate::path::join(prefix, &crate::path::escape(&m.field_key)),
        };
        if let Some(pattern) = m.env_pattern() {
            out.push(EnvMapping {
                pattern: pattern.to_string(),
                target_template: insert_at.clone(),
                leaf_kind: m.leaf_kind,
            });
        }

        let field_prefix = crate::path::join(prefix, &crate::path::escape(&m.field_key));
        match m.container {
            ContainerKind::Struct => {
                if let Some(sub) = table.nested.get(&m.field_key) {
                    collect_env_mappings(sub, &field_prefix, out);
                }
            }
            ContainerKind::SliceOfStruct => {
                if let Some(sub) = table.slice_element.get(&m.field_key) {
                    collect_env_mappings(sub, &format!("{field_prefix}/{{index}}"), out);
                }
            }
            ContainerKind::MapOfStruct => {
                if let Some(sub) = table.map_value.get(&m.field_key) {
                    collect_env_mappings(sub, &format!("{field_prefix}/{{key}}"), out);
                }
            }
            ContainerKind::Leaf => {}
        }
    }
}

fn parse_field_tag(tag: Option<&str>, field_name: &str) -> (String, bool) {
    match tag {
        None => (field_name.to_string(), false),
        Some(t) => {
            let first = t.split(',').next().unwrap_or("").trim();
            if first == "-" {
                (field_name.to_string(), true)
            } else if first.is_empty() {
                (field_name.to_string(), false)
            } else {
                (first.to_string(), false)
            }
        }
    }
}

#[allow(clippy::type_complexity)]
fn parse_jubako_tag(
    tag: Option<&str>,
    delimiter: char,
) -> (Option<String>, bool, bool, Sensitivity, Vec<String>) {
    let Some(t) = tag else {
        return (None, false, false, Sensitivity::Unset, Vec::new());
    };
    let mut parts = t.split(delimiter);
    let path_raw = parts.next().unwrap_or("").trim();
    let directives: Vec<String> = parts.map(|s| s.trim().to_string()).collect();
    let sensitivity = if directives.iter().any(|d| d == "sensitive") {
        Sensitivity::Explicit(true)
    } else {
        Sensitivity::Unset
    };

    if path_raw == "-" {
        return (None, false, true, sensitivity, directives);
    }
    if path_raw.is_empty() {
        return (None, false, false, sensitivity, directives);
    }
    if let Some(abs) = path_raw.strip_prefix('/') {
        return (Some(format!("/{abs}")), false, false, sensitivity, directives);
    }
    let rel = path_raw.strip_prefix("./").unwrap_or(path_raw);
    (Some(rel.to_string()), true, false, sensitivity, directives)
}

/// Restructure `element` (a subtree of `root` at `prefix`) to match the
/// table's structural layout. `root` is the full merged tree, needed for
/// absolute source-path lookups.
pub fn apply_mappings(table: &MappingTable, root: &Value, prefix: &str, element: &Value) -> Value {
    let mut target = Map::new();
    let mut claimed: HashSet<String> = HashSet::new();

    for m in &table.mappings {
        if m.skipped {
            continue;
        }

        let value = match (&m.source_path, m.is_relative) {
            (Some(sp), false) => {
                // Claim the top-level segment of the source path relative
                // to this element's prefix, even when the remainder is
                // nested further down, so pass-through doesn't also copy
                // the source container an explicit mapping already moved
                // the value out of (see DESIGN.md, explicit mapping wins).
                if let Some(rest) = sp.strip_prefix(prefix) {
                    let rest = rest.strip_prefix('/').unwrap_or(rest);
                    if let Some(top) = rest.split('/').next() {
                        if !top.is_empty() {
                            claimed.insert(top.to_string());
                        }
                    }
                }
                crate::path::get_path(root, sp).cloned()
            }
            (Some(sp), true) => {
                if let Some(top) = sp.split('/').next() {
                    claimed.insert(top.to_string());
                }
                crate::path::get_path(element, &format!("/{sp}")).cloned()
            }
            (None, _) => {
                claimed.insert(m.field_key.clone());
                element.as_map().and_then(|mm| mm.get(&m.field_key)).cloned()
            }
        };

        match m.container {
            ContainerKind::Leaf => {
                if let Some(v) = value {
                    target.insert(m.field_key.clone(), v);
                }
            }
            ContainerKind::Struct => {
                claimed.insert(m.field_key.clone());
                if let Some(sub) = table.nested.get(&m.field_key) {
                    let sub_element = element
                        .as_map()
                        .and_then(|mm| mm.get(&m.field_key))
                        .cloned()
                        .unwrap_or_else(Value::map);
                    let sub_prefix = crate::path::join(prefix, &crate::path::escape(&m.field_key));
                    target.insert(m.field_key.clone(), apply_mappings(sub, root, &sub_prefix, &sub_element));
                } else if let Some(v) = value {
                    target.insert(m.field_key.clone(), v);
                }
            }
            ContainerKind::SliceOfStruct => {
                claimed.insert(m.field_key.clone());
                if let Some(sub) = table.slice_element.get(&m.field_key) {
                    let list = element
                        .as_map()
                        .and_then(|mm| mm.get(&m.field_key))
                        .and_then(Value::as_list)
                        .unwrap_or(&[]);
                    let sub_prefix = crate::path::join(prefix, &crate::path::escape(&m.field_key));
                    let new_list: Vec<Value> = list
                        .iter()
                        .enumerate()
                        .map(|(i, el)| {
                            let el_prefix = crate::path::join(&sub_prefix, &i.to_string());
                            apply_mappings(sub, root, &el_prefix, el)
                        })
                        .collect();
                    target.insert(m.field_key.clone(), Value::List(new_list));
                }
            }
            ContainerKind::MapOfStruct => {
                claimed.insert(m.field_key.clone());
                if let Some(sub) = table.map_value.get(&m.field_key) {
                    if let Some(mm) = element
                        .as_map()
                        .and_then(|e| e.get(&m.field_key))
                        .and_then(Value::as_map)
                    {
                        let sub_prefix = crate::path::join(prefix, &crate::path::escape(&m.field_key));
                        let mut new_map = Map::new();
                        for (k, v) in mm {
                            let el_prefix = crate::path::join(&sub_prefix, &crate::path::escape(k));
                            new_map.insert(k.clone(), apply_mappings(sub, root, &el_prefix, v));
                        }
                        target.insert(m.field_key.clone(), Value::Map(new_map));
                    }
                }
            }
        }
    }

    if let Some(em) = element.as_map() {
        for (k, v) in em {
            if !claimed.contains(k) && !target.contains_key(k) {
                target.insert(k.clone(), v.clone());
            }
        }
    }

    Value::Map(target)
}
