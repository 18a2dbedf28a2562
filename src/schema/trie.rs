//! Flat, wildcard-capable lookup over a [`MappingTable`].

use indexmap::IndexMap;

use super::table::{ContainerKind, MappingTable, PathMapping};

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: IndexMap<String, TrieNode>,
    wildcard: Option<Box<TrieNode>>,
    mapping: Option<PathMapping>,
}

/// Flat view of a [`MappingTable`]: paths with a literal `*` segment match
/// any slice index or map key.
#[derive(Debug, Clone, Default)]
pub struct MappingTrie {
    root: TrieNode,
}

impl MappingTrie {
    pub fn build(table: &MappingTable) -> Self {
        let mut root = TrieNode::default();
        insert_table(&mut root, table, "");
        MappingTrie { root }
    }

    /// Recursive descent: at each segment try the exact child first, then
    /// the wildcard. Returns the terminal mapping, if any.
    pub fn lookup(&self, path: &str) -> Option<&PathMapping> {
        let segments = crate::path::parse(path).ok()?;
        let mut node = &self.root;
        for seg in &segments {
            node = node
                .children
                .get(seg)
                .or_else(|| node.wildcard.as_deref())?;
        }
        node.mapping.as_ref()
    }
}

fn insert_path(root: &mut TrieNode, path: &str, mapping: PathMapping) {
    let segments = crate::path::parse(path).unwrap_or_default();
    let mut node = root;
    for seg in &segments {
        node = if seg == "*" {
            node.wildcard.get_or_insert_with(Default::default)
        } else {
            node.children.entry(seg.clone()).or_default()
        };
    }
    node.mapping = Some(mapping);
}

fn insert_table(root: &mut TrieNode, table: &MappingTable, prefix: &str) {
    for m in &table.mappings {
        if m.skipped {
            continue;
        }
        let insert_at = match (&m.source_path, m.is_relative) {
            (Some(sp), false) => sp.clone(),
            (Some(sp), true) => crate::path::join(prefix, sp),
            (None, _) => crate::path::join(prefix, &crate::path::escape(&m.field_key)),
        };
        insert_path(root, &insert_at, m.clone());

        let field_prefix = crate::path::join(prefix, &crate::path::escape(&m.field_key));
        match m.container {
            ContainerKind::Struct => {
                if let Some(sub) = table.nested.get(&m.field_key) {
                    insert_table(root, sub, &field_prefix);
                }
            }
            ContainerKind::SliceOfStruct => {
                if let Some(sub) = table.slice_element.get(&m.field_key) {
                    insert_table(root, sub, &format!("{field_prefix}/*"));
                }
            }
            ContainerKind::MapOfStruct => {
                if let Some(sub) = table.map_value.get(&m.field_key) {
                    insert_table(root, sub, &format!("{field_prefix}/*"));
                }
            }
            ContainerKind::Leaf => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldContainer, FieldDescriptor, SchemaOptions, TargetKind, TypeDescriptor};

    fn leaf(name: &'static str, tag: &'static str, jubako: Option<&'static str>) -> FieldDescriptor {
        FieldDescriptor {
            field_name: name,
            tag: Some(tag),
            jubako_tag: jubako,
            container: FieldContainer::Leaf,
            leaf_kind: TargetKind::String,
        }
    }

    #[test]
    fn wildcard_matches_any_slice_index() {
        let inner = TypeDescriptor {
            fields: vec![leaf("ClientId", "client_id", None)],
        };
        let descriptor = TypeDescriptor {
            fields: vec![FieldDescriptor {
                field_name: "Backlog",
                tag: Some("backlog"),
                jubako_tag: None,
                container: FieldContainer::MapOfStruct(inner),
                leaf_kind: TargetKind::String,
            }],
        };
        let table = MappingTable::build(&descriptor, &SchemaOptions::default());
        let trie = MappingTrie::build(&table);
        assert!(trie.lookup("/backlog/jp/client_id").is_some());
        assert!(trie.lookup("/backlog/us/client_id").is_some());
        assert!(trie.lookup("/backlog/jp/missing").is_none());
    }

    #[test]
    fn absolute_remap_is_reachable_at_declared_path() {
        let descriptor = TypeDescriptor {
            fields: vec![leaf("Password", "password", Some("/secrets/password,sensitive"))],
        };
        let table = MappingTable::build(&descriptor, &SchemaOptions::default());
        let trie = MappingTrie::build(&table);
        let mapping = trie.lookup("/secrets/password").unwrap();
        assert!(mapping.sensitive());
        assert!(trie.lookup("/password").is_none());
    }
}
