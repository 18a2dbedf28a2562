//! Environment-variable layer with the schema-driven pattern transform,
//! the one layer non-trivial enough to exercise the Schema directly.

use std::collections::HashMap;

use regex::Regex;

use crate::error::LayerError;
use crate::patch::JsonPatch;
use crate::schema::{coerce, ContainerKind, MappingTable, Schema, TargetKind};
use crate::value::Value;

use super::{Details, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    Lower,
    Upper,
}

struct CompiledPattern {
    regex: Regex,
    filters_by_name: HashMap<String, Vec<Filter>>,
    target_template: String,
    leaf_kind: TargetKind,
}

/// The schema-driven replacement for the default `prefix+lowercase+split`
/// transform, built lazily from `init_with_store`.
struct SchemaTransform {
    /// Env token (post-prefix, verbatim case) -> (target path, leaf kind).
    exact: HashMap<String, (String, TargetKind)>,
    /// Tried in declaration order; first match wins (see `DESIGN.md` for
    /// why declaration order rather than specificity breaks ties).
    patterns: Vec<CompiledPattern>,
}

/// Reads process (or injected) environment variables into the value tree,
/// optionally driven by a record type's `Schema` for typed, pattern-aware
/// path resolution.
pub struct EnvLayer {
    name: String,
    prefix: String,
    delimiter: char,
    environ: Box<dyn Fn() -> Vec<(String, String)> + Send + Sync>,
    schema_transform: Option<SchemaTransform>,
}

impl EnvLayer {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            delimiter: '_',
            environ: Box::new(|| std::env::vars().collect()),
            schema_transform: None,
        }
    }

    /// Override the environment supplier, e.g. for tests.
    pub fn with_environ(
        mut self,
        environ: impl Fn() -> Vec<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        self.environ = Box::new(environ);
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Resolve one (post-prefix) env token + raw string value to a
    /// `(json_pointer_path, coerced_value)` pair, or `None` to skip it.
    fn resolve(&self, key: &str, raw_value: &str) -> Option<(String, Value)> {
        if let Some(transform) = &self.schema_transform {
            if let Some((path, kind)) = transform.exact.get(key) {
                return coerce_env_value(raw_value, *kind).map(|v| (path.clone(), v));
            }
            for pattern in &transform.patterns {
                if let Some(caps) = pattern.regex.captures(key) {
                    let path = resolve_template(&pattern.target_template, &caps, &pattern.filters_by_name);
                    return coerce_env_value(raw_value, pattern.leaf_kind).map(|v| (path, v));
                }
            }
            None
        } else {
            let lowered = key.to_lowercase();
            let parts: Vec<&str> = lowered
                .split(self.delimiter)
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                return None;
            }
            Some((crate::path::build(parts), Value::String(raw_value.to_string())))
        }
    }
}

impl Layer for EnvLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&mut self) -> Result<Value, LayerError> {
        let mut tree = Value::map();
        for (key, value) in (self.environ)() {
            let Some(rest) = key.strip_prefix(&self.prefix) else {
                continue;
            };
            if let Some((path, coerced)) = self.resolve(rest, &value) {
                if path.is_empty() {
                    continue;
                }
                crate::path::set_path(&mut tree, &path, coerced)
                    .map_err(|e| LayerError::Parse(e.to_string()))?;
            }
        }
        Ok(tree)
    }

    fn save(&mut self, _changeset: &[JsonPatch]) -> Result<(), LayerError> {
        Err(LayerError::SaveNotSupported)
    }

    fn can_save(&self) -> bool {
        false
    }

    fn fill_details(&self) -> Details {
        Details {
            source_kind: "env".to_string(),
            format: "env".to_string(),
            path: self.prefix.clone(),
        }
    }

    fn init_with_store(&mut self, schema: &Schema) {
        self.schema_transform = Some(build_schema_transform(&schema.table, self.delimiter));
    }
}

/// String -> typed coercion for a resolved env value. Unlike the general
/// default [`crate::schema::coerce`], a failed conversion is a hard skip
/// rather than a pass-through of the original string.
fn coerce_env_value(raw: &str, kind: TargetKind) -> Option<Value> {
    match kind {
        TargetKind::String => Some(Value::String(raw.to_string())),
        TargetKind::List => Some(Value::List(
            raw.split(',').map(|s| Value::String(s.trim().to_string())).collect(),
        )),
        TargetKind::Map => None,
        _ => {
            let coerced = coerce(&Value::String(raw.to_string()), kind);
            match (kind, &coerced) {
                (TargetKind::Bool, Value::Bool(_))
                | (TargetKind::Int, Value::Int(_))
                | (TargetKind::UInt, Value::UInt(_))
                | (TargetKind::Float, Value::Float(_)) => Some(coerced),
                _ => None,
            }
        }
    }
}

fn build_schema_transform(table: &MappingTable, delimiter: char) -> SchemaTransform {
    let mut exact = HashMap::new();
    let mut auto = Vec::new();
    collect_auto_exact(table, "", delimiter, &mut auto);
    for (token, path, kind) in auto {
        exact.insert(token, (path, kind));
    }

    let mut patterns = Vec::new();
    for mapping in table.env_mappings() {
        if mapping.pattern.contains('{') {
            match compile_pattern(&mapping.pattern) {
                Ok((regex, filters_by_name)) => patterns.push(CompiledPattern {
                    regex,
                    filters_by_name,
                    target_template: mapping.target_template,
                    leaf_kind: mapping.leaf_kind,
                }),
                Err(e) => tracing::warn!(pattern = %mapping.pattern, error = %e, "jubako: skipping unparsable env pattern"),
            }
        } else {
            exact.insert(mapping.pattern, (mapping.target_template, mapping.leaf_kind));
        }
    }

    SchemaTransform { exact, patterns }
}

/// Every leaf field not carrying its own `env:` directive gets an implicit
/// exact token derived from its resolved JSON path: uppercase each
/// segment, join with `delimiter`. Fields nested under a slice-of-struct
/// or map-of-struct can't be auto-derived (no index/key to fill in) and
/// are left for an explicit `env:{index}`/`env:{key}` pattern mapping.
fn collect_auto_exact(
    table: &MappingTable,
    prefix: &str,
    delimiter: char,
    out: &mut Vec<(String, String, TargetKind)>,
) {
    for m in &table.mappings {
        if m.skipped {
            continue;
        }
        let insert_at = match (&m.source_path, m.is_relative) {
            (Some(sp), false) => sp.clone(),
            (Some(sp), true) => crate::path::join(prefix, sp),
            (None, _) => crate::path::join(prefix, &crate::path::escape(&m.field_key)),
        };
        match m.container {
            ContainerKind::Leaf => {
                if m.env_pattern().is_none() {
                    out.push((derive_token(&insert_at, delimiter), insert_at, m.leaf_kind));
                }
            }
            ContainerKind::Struct => {
                if let Some(sub) = table.nested.get(&m.field_key) {
                    let field_prefix = crate::path::join(prefix, &crate::path::escape(&m.field_key));
                    collect_auto_exact(sub, &field_prefix, delimiter, out);
                }
            }
            ContainerKind::SliceOfStruct | ContainerKind::MapOfStruct => {}
        }
    }
}

fn derive_token(path: &str, delimiter: char) -> String {
    path.trim_start_matches('/')
        .split('/')
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join(&delimiter.to_string())
}

/// Compile an `env:` pattern string (e.g. `"BACKLOG_CLIENT_ID_{key|lower}"`)
/// into an anchored regex plus the filter pipeline declared per placeholder
/// name.
fn compile_pattern(pattern: &str) -> Result<(Regex, HashMap<String, Vec<Filter>>), LayerError> {
    let mut regex_src = String::new();
    let mut literal = String::new();
    let mut filters_by_name = HashMap::new();
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        literal.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('}') else {
            return Err(LayerError::Parse(format!("unterminated placeholder in {pattern:?}")));
        };
        let inner = &after_open[..close];
        let mut parts = inner.split('|');
        let name = parts.next().unwrap_or("").trim().to_string();
        let filters: Vec<Filter> = parts
            .filter_map(|f| match f.trim() {
                "lower" => Some(Filter::Lower),
                "upper" => Some(Filter::Upper),
                _ => None,
            })
            .collect();

        if !literal.is_empty() {
            regex_src.push_str(&regex::escape(&literal));
            literal.clear();
        }
        match name.as_str() {
            "key" => regex_src.push_str("(?P<key>.+)"),
            "index" => regex_src.push_str(r"(?P<index>\d+)"),
            _ => return Err(LayerError::Parse(format!("unknown placeholder {{{name}}} in {pattern:?}"))),
        }
        filters_by_name.insert(name, filters);
        rest = &after_open[close + 1..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        regex_src.push_str(&regex::escape(&literal));
    }

    let regex = Regex::new(&format!("^{regex_src}$")).map_err(|e| LayerError::Parse(e.to_string()))?;
    Ok((regex, filters_by_name))
}

/// Substitute `{key}`/`{index}` placeholders in `template` with the
/// matched, filtered, pointer-escaped capture values.
fn resolve_template(
    template: &str,
    captures: &regex::Captures<'_>,
    filters_by_name: &HashMap<String, Vec<Filter>>,
) -> String {
    let mut out = template.to_string();
    for name in ["key", "index"] {
        if let Some(m) = captures.name(name) {
            let mut value = m.as_str().to_string();
            if let Some(filters) = filters_by_name.get(name) {
                for filter in filters {
                    value = match filter {
                        Filter::Lower => value.to_lowercase(),
                        Filter::Upper => value.to_uppercase(),
                    };
                }
            }
            out = out.replace(&format!("{{{name}}}"), &crate::path::escape(&value));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldContainer, FieldDescriptor, SchemaOptions, Schematic, TypeDescriptor};

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn default_transform_builds_path_from_tokens() {
        let mut layer = EnvLayer::new("env", "APP_")
            .with_environ(|| vars(&[("APP_SERVER_HOST", "localhost"), ("OTHER_VAR", "ignored")]));
        let tree = layer.load().unwrap();
        assert_eq!(
            crate::path::get_path(&tree, "/server/host"),
            Some(&Value::String("localhost".into()))
        );
        assert_eq!(crate::path::get_path(&tree, "/other/var"), None);
    }

    #[test]
    fn can_save_is_false_and_save_errors() {
        let mut layer = EnvLayer::new("env", "APP_");
        assert!(!layer.can_save());
        assert!(matches!(layer.save(&[]), Err(LayerError::SaveNotSupported)));
    }

    struct ServerConfig;
    impl Schematic for ServerConfig {
        fn describe() -> TypeDescriptor {
            TypeDescriptor {
                fields: vec![
                    FieldDescriptor {
                        field_name: "Port",
                        tag: Some("port"),
                        jubako_tag: None,
                        container: FieldContainer::Leaf,
                        leaf_kind: TargetKind::UInt,
                    },
                    FieldDescriptor {
                        field_name: "Debug",
                        tag: Some("debug"),
                        jubako_tag: None,
                        container: FieldContainer::Leaf,
                        leaf_kind: TargetKind::Bool,
                    },
                ],
            }
        }
    }

    #[test]
    fn schema_driven_exact_mapping_coerces_to_leaf_kind() {
        let schema = Schema::build_for::<ServerConfig>(&SchemaOptions::default());
        let mut layer = EnvLayer::new("env", "APP_")
            .with_environ(|| vars(&[("APP_PORT", "9000"), ("APP_DEBUG", "yes")]));
        layer.init_with_store(&schema);
        let tree = layer.load().unwrap();
        assert_eq!(crate::path::get_path(&tree, "/port"), Some(&Value::UInt(9000)));
        assert_eq!(crate::path::get_path(&tree, "/debug"), Some(&Value::Bool(true)));
    }

    #[test]
    fn schema_driven_skips_uncoercible_value() {
        let schema = Schema::build_for::<ServerConfig>(&SchemaOptions::default());
        let mut layer =
            EnvLayer::new("env", "APP_").with_environ(|| vars(&[("APP_PORT", "not-a-number")]));
        layer.init_with_store(&schema);
        let tree = layer.load().unwrap();
        assert_eq!(crate::path::get_path(&tree, "/port"), None);
    }

    struct Backlog;
    impl Schematic for Backlog {
        fn describe() -> TypeDescriptor {
            let mut client_id = FieldDescriptor {
                field_name: "ClientId",
                tag: Some("client_id"),
                jubako_tag: None,
                container: FieldContainer::Leaf,
                leaf_kind: TargetKind::String,
            };
            client_id.jubako_tag = Some("env:BACKLOG_CLIENT_ID_{key|lower}");
            TypeDescriptor {
                fields: vec![FieldDescriptor {
                    field_name: "Backlog",
                    tag: Some("backlog"),
                    jubako_tag: None,
                    container: FieldContainer::MapOfStruct(TypeDescriptor {
                        fields: vec![client_id],
                    }),
                    leaf_kind: TargetKind::String,
                }],
            }
        }
    }

    #[test]
    fn schema_driven_pattern_mapping_applies_filter_and_inserts_key() {
        let schema = Schema::build_for::<Backlog>(&SchemaOptions::default());
        let mut layer = EnvLayer::new("env", "APP_")
            .with_environ(|| vars(&[("APP_BACKLOG_CLIENT_ID_JP", "abc")]));
        layer.init_with_store(&schema);
        let tree = layer.load().unwrap();
        assert_eq!(
            crate::path::get_path(&tree, "/backlog/jp/client_id"),
            Some(&Value::String("abc".into()))
        );
    }

    #[test]
    fn exact_mapping_wins_over_pattern_when_both_match() {
        // A literal exact token takes priority even if a pattern could
        // also match the same key (see DESIGN.md).
        let (regex, _) = compile_pattern("FOO_{key}").unwrap();
        assert!(regex.is_match("FOO_BAR"));
        let mut exact = HashMap::new();
        exact.insert("FOO_BAR".to_string(), ("/exact".to_string(), TargetKind::String));
        let transform = SchemaTransform {
            exact,
            patterns: vec![CompiledPattern {
                regex,
                filters_by_name: HashMap::new(),
                target_template: "/pattern/{key}".to_string(),
                leaf_kind: TargetKind::String,
            }],
        };
        let mut layer = EnvLayer::new("env", "APP_").with_environ(|| vars(&[("APP_FOO_BAR", "v")]));
        layer.schema_transform = Some(transform);
        let tree = layer.load().unwrap();
        assert_eq!(crate::path::get_path(&tree, "/exact"), Some(&Value::String("v".into())));
        assert_eq!(crate::path::get_path(&tree, "/pattern/bar"), None);
    }
}
