//! Per-path provenance over leaf and container nodes.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::value::Value;

/// A single layer's contribution at some path, as recorded by the
/// materializer while walking each layer's loaded tree.
#[derive(Debug, Clone)]
pub struct OriginEntry {
    pub layer_name: String,
    pub priority: i64,
    pub value: Value,
}

/// Two parallel indices from pointer path to an ordered (lowest priority
/// first) list of contributing layers.
#[derive(Debug, Default)]
pub struct OriginIndex {
    leafs: IndexMap<String, Vec<Arc<OriginEntry>>>,
    containers: IndexMap<String, Vec<Arc<OriginEntry>>>,
}

impl OriginIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.leafs.clear();
        self.containers.clear();
    }

    pub fn set_leaf(&mut self, path: &str, entry: Arc<OriginEntry>) {
        self.leafs.entry(path.to_string()).or_default().push(entry);
    }

    pub fn set_container(&mut self, path: &str, entry: Arc<OriginEntry>) {
        self.containers
            .entry(path.to_string())
            .or_default()
            .push(entry);
    }

    /// Highest-priority (last) contributing entry at `path`, if any.
    pub fn get_leaf(&self, path: &str) -> Option<&Arc<OriginEntry>> {
        self.leafs.get(path).and_then(|v| v.last())
    }

    pub fn get_container(&self, path: &str) -> Option<&Arc<OriginEntry>> {
        self.containers.get(path).and_then(|v| v.last())
    }

    pub fn get_all_leaf(&self, path: &str) -> &[Arc<OriginEntry>] {
        self.leafs.get(path).map_or(&[], Vec::as_slice)
    }

    pub fn get_all_container(&self, path: &str) -> &[Arc<OriginEntry>] {
        self.containers.get(path).map_or(&[], Vec::as_slice)
    }

    pub fn is_container(&self, path: &str) -> bool {
        self.containers.get(path).is_some_and(|v| !v.is_empty())
    }

    pub fn is_leaf(&self, path: &str) -> bool {
        self.leafs.get(path).is_some_and(|v| !v.is_empty())
    }

    /// All leaf paths, for `Store::walk`; the caller is responsible for
    /// the required lexicographic sort.
    pub fn leaf_paths(&self) -> impl Iterator<Item = &str> {
        self.leafs.keys().map(String::as_str)
    }
}

/// Walk a layer's loaded tree, recording every map/list/leaf path into the
/// origin index.
pub fn walk_for_origins(
    index: &mut OriginIndex,
    path: &str,
    value: &Value,
    layer_name: &str,
    priority: i64,
) {
    match value {
        Value::Map(m) => {
            index.set_container(
                path,
                Arc::new(OriginEntry {
                    layer_name: layer_name.to_string(),
                    priority,
                    value: value.clone(),
                }),
            );
            for (k, v) in m {
                let child_path = crate::path::join(path, &crate::path::escape(k));
                walk_for_origins(index, &child_path, v, layer_name, priority);
            }
        }
        Value::List(l) => {
            index.set_container(
                path,
                Arc::new(OriginEntry {
                    layer_name: layer_name.to_string(),
                    priority,
                    value: value.clone(),
                }),
            );
            for (i, v) in l.iter().enumerate() {
                let child_path = crate::path::join(path, &i.to_string());
                walk_for_origins(index, &child_path, v, layer_name, priority);
            }
        }
        leaf => {
            index.set_leaf(
                path,
                Arc::new(OriginEntry {
                    layer_name: layer_name.to_string(),
                    priority,
                    value: leaf.clone(),
                }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_and_container_classification_is_disjoint() {
        let mut idx = OriginIndex::new();
        let tree = Value::Map(
            [("server".to_string(), Value::Map(
                [("port".to_string(), Value::Int(8080))].into_iter().collect(),
            ))]
            .into_iter()
            .collect(),
        );
        walk_for_origins(&mut idx, "", &tree, "defaults", 0);
        assert!(idx.is_container("/server"));
        assert!(!idx.is_leaf("/server"));
        assert!(idx.is_leaf("/server/port"));
        assert!(!idx.is_container("/server/port"));
    }

    #[test]
    fn get_leaf_returns_highest_priority() {
        let mut idx = OriginIndex::new();
        idx.set_leaf(
            "/a",
            Arc::new(OriginEntry {
                layer_name: "defaults".into(),
                priority: 0,
                value: Value::Int(1),
            }),
        );
        idx.set_leaf(
            "/a",
            Arc::new(OriginEntry {
                layer_name: "user".into(),
                priority: 10,
                value: Value::Int(2),
            }),
        );
        let entry = idx.get_leaf("/a").unwrap();
        assert_eq!(entry.layer_name, "user");
        assert_eq!(idx.get_all_leaf("/a").len(), 2);
    }

    #[test]
    fn clear_empties_both_maps() {
        let mut idx = OriginIndex::new();
        idx.set_leaf(
            "/a",
            Arc::new(OriginEntry {
                layer_name: "x".into(),
                priority: 0,
                value: Value::Null,
            }),
        );
        idx.clear();
        assert!(idx.get_leaf("/a").is_none());
    }
}
