//! Struct-tag-derived mapping descriptor: hierarchical `MappingTable` plus
//! flat, wildcard-capable `MappingTrie` lookup.

mod coerce;
mod table;
mod trie;

pub use coerce::{coerce, Coercer, DefaultCoercer, TargetKind};
pub use table::{ContainerKind, EnvMapping, MappingTable, PathMapping, Sensitivity};
pub use trie::MappingTrie;

use crate::value::Value;

/// Describes one field of a record type participating in a Schema. This is
/// the Rust-idiomatic stand-in for reflection: types implement
/// [`Schematic`] by hand to describe their own field tree, the way a
/// derive macro would generate it in a language with compile-time
/// codegen. See the `jubako` tag directive mini-language in
/// [`table::PathMapping::parse_jubako_tag`].
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// The struct field's Rust name, used as a fallback `field_key`.
    pub field_name: &'static str,
    /// Raw value of the configured "field tag" (default name `json`), e.g.
    /// `"port,omitempty"` or `"-"`. `None` if the field carries no such tag.
    pub tag: Option<&'static str>,
    /// Raw value of the `jubako` tag, e.g. `"/server/port,sensitive"`.
    pub jubako_tag: Option<&'static str>,
    /// How this field nests, if at all.
    pub container: FieldContainer,
    /// The runtime kind a leaf field's value should be coerced to. Ignored
    /// for non-leaf fields. Used by the default coercer and by the env
    /// layer's schema-driven transform, which has no other way to learn a
    /// field's primitive type without real reflection.
    pub leaf_kind: TargetKind,
}

/// How a field's type nests for schema-building purposes.
#[derive(Debug, Clone)]
pub enum FieldContainer {
    /// A plain leaf value (`string`, `int`, a date-time type, etc).
    Leaf,
    /// A nested record; recurse into its own [`Schematic::describe`].
    Struct(TypeDescriptor),
    /// A slice/array/list of a nested record type.
    SliceOfStruct(TypeDescriptor),
    /// A string-keyed map of a nested record type.
    MapOfStruct(TypeDescriptor),
}

/// The full field tree of one record type, as produced by [`Schematic::describe`].
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub fields: Vec<FieldDescriptor>,
}

/// Implemented by record types that participate in a [`crate::store::Store`].
///
/// Because Rust has no runtime reflection, and this crate takes on no
/// code-generation tooling, implementors write this by hand — it is
/// mechanical and short, mirroring what a `#[derive(Schematic)]` would
/// produce.
pub trait Schematic {
    fn describe() -> TypeDescriptor;
}

/// Immutable, construction-time schema shared by all reads from a `Store`.
#[derive(Debug, Clone)]
pub struct Schema {
    pub table: MappingTable,
    pub trie: MappingTrie,
}

/// Options controlling tag-name parsing, passed down from
/// [`crate::store::StoreOption`].
#[derive(Debug, Clone)]
pub struct SchemaOptions {
    pub tag_name: &'static str,
    pub jubako_tag_name: &'static str,
    pub jubako_tag_delimiter: char,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            tag_name: "json",
            jubako_tag_name: "jubako",
            jubako_tag_delimiter: ',',
        }
    }
}

impl Schema {
    /// Build a Schema from a record type's [`TypeDescriptor`]: walk the
    /// descriptor to build the `MappingTable`, then walk the table to
    /// build the flat `MappingTrie`.
    pub fn build(descriptor: &TypeDescriptor, opts: &SchemaOptions) -> Self {
        let table = MappingTable::build(descriptor, opts);
        let trie = MappingTrie::build(&table);
        Schema { table, trie }
    }

    pub fn build_for<T: Schematic>(opts: &SchemaOptions) -> Self {
        Self::build(&T::describe(), opts)
    }

    /// Whether any field declared a remap (used by `Store::has_mappings`).
    pub fn has_mappings(&self) -> bool {
        self.table.any_mapping(|m| m.source_path.is_some())
    }

    /// Recursively restructure `merged` to match the target record's
    /// structural layout.
    pub fn apply_mappings(&self, merged: &Value) -> Value {
        table::apply_mappings(&self.table, merged, "", merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ServerConfig;

    impl Schematic for ServerConfig {
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
                        leaf_kind: TargetKind::UInt,
                    },
                    FieldDescriptor {
                        field_name: "password",
                        tag: Some("password"),
                        jubako_tag: Some("sensitive"),
                        container: FieldContainer::Leaf,
                        leaf_kind: TargetKind::String,
                    },
                ],
            }
        }
    }

    #[test]
    fn schema_build_for_simple_struct() {
        let schema = Schema::build_for::<ServerConfig>(&SchemaOptions::default());
        assert!(schema.trie.lookup("/password").is_some_and(|m| m.sensitive()));
        assert!(!schema.trie.lookup("/host").is_some_and(|m| m.sensitive()));
    }
}
