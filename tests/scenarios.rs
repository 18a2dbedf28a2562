//! End-to-end scenario tests mirroring the literal-value walkthroughs a
//! layered config engine's own test suite would carry.

use jubako::layer::file::{Document as _, FileLayer, JsonDocument, MemorySource, Source as _};
use jubako::layer::map::MapLayer;
use jubako::schema::{FieldContainer, FieldDescriptor, SchemaOptions, Schematic, TargetKind, TypeDescriptor};
use jubako::store::{self, Store};
use jubako::value::Value;
use jubako::JubakoError;

#[derive(Debug, serde::Deserialize, PartialEq, Default)]
struct ServerConfig {
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: i64,
}

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
                    leaf_kind: TargetKind::Int,
                },
            ],
        }
    }
}

#[derive(Debug, serde::Deserialize, PartialEq, Default)]
struct Wrapped {
    #[serde(default)]
    server: ServerConfig,
}

impl Schematic for Wrapped {
    fn describe() -> TypeDescriptor {
        TypeDescriptor {
            fields: vec![FieldDescriptor {
                field_name: "server",
                tag: Some("server"),
                jubako_tag: None,
                container: FieldContainer::Struct(ServerConfig::describe()),
                leaf_kind: TargetKind::String,
            }],
        }
    }
}

fn quiet<T>() -> store::StoreOption<T> {
    store::with_warn_sink(|_msg: &str| {})
}

fn server_map(host: Option<&str>, port: Option<i64>) -> Value {
    let mut inner = jubako::Map::new();
    if let Some(h) = host {
        inner.insert("host".to_string(), Value::String(h.to_string()));
    }
    if let Some(p) = port {
        inner.insert("port".to_string(), Value::Int(p));
    }
    let mut outer = jubako::Map::new();
    outer.insert("server".to_string(), Value::Map(inner));
    Value::Map(outer)
}

/// S1 — Merge precedence: a higher-priority layer's leaf wins, but the
/// origin index still remembers every contributing layer.
#[test]
fn s1_merge_precedence() {
    let store = Store::<Wrapped>::new([quiet()]).unwrap();
    store
        .add(
            MapLayer::with_data("defaults", server_map(Some("localhost"), Some(8080))),
            [],
        )
        .unwrap();
    store
        .add(MapLayer::with_data("user", server_map(None, Some(9000))), [store::priority(10)])
        .unwrap();
    store.load().unwrap();

    let host = store.get_at("/server/host");
    assert_eq!(host.value, Value::String("localhost".into()));
    assert_eq!(host.layer.unwrap().name, "defaults");

    let port = store.get_at("/server/port");
    assert_eq!(port.value, Value::Int(9000));
    assert_eq!(port.layer.unwrap().name, "user");

    let all_ports = store.get_all_at("/server/port");
    assert_eq!(all_ports.len(), 2);
    assert_eq!(all_ports.last().unwrap().layer.as_ref().unwrap().name, "user");
}

/// S2 — Dirty save: a `SetTo` marks the store dirty, `Save` hands the
/// layer a replace patch and clears dirty, and the write is observable.
#[test]
fn s2_dirty_save() {
    let store = Store::<Wrapped>::new([quiet()]).unwrap();
    let source = MemorySource::new("mem://user", br#"{"server":{"port":8080}}"#.to_vec());
    store
        .add(FileLayer::new("user", source.clone(), JsonDocument), [])
        .unwrap();
    store.load().unwrap();

    store.set_to("user", "/server/port", Value::Int(9000)).unwrap();
    assert!(store.is_dirty());

    store.save().unwrap();
    assert!(!store.is_dirty());
    assert_eq!(store.get().server.port, 9000);

    let persisted = JsonDocument.parse(&source.read().unwrap()).unwrap();
    assert_eq!(
        jubako::path::get_path(&persisted, "/server/port"),
        Some(&Value::Int(9000))
    );
}

/// S3 — Reload preserves edits: the underlying source still reports the
/// original value, but the in-memory changeset is replayed on top.
#[test]
fn s3_reload_preserves_edits() {
    let store = Store::<Wrapped>::new([quiet()]).unwrap();
    store
        .add(MapLayer::with_data("l", server_map(None, Some(1))), [])
        .unwrap();
    store.load().unwrap();

    store.set_to("l", "/server/port", Value::Int(2)).unwrap();
    assert_eq!(store.get().server.port, 2);

    store.reload().unwrap();
    assert_eq!(store.get().server.port, 2);
    assert!(store.is_dirty());
}

/// S4 — Env schema transform (pattern + filter): a `{key|lower}` pattern
/// mapping inserts the captured map key and lowercases it.
#[test]
fn s4_env_schema_transform_pattern_and_filter() {
    use jubako::layer::env::EnvLayer;

    struct ClientId;
    impl Schematic for ClientId {
        fn describe() -> TypeDescriptor {
            let mut field = FieldDescriptor {
                field_name: "ClientId",
                tag: Some("client_id"),
                jubako_tag: None,
                container: FieldContainer::Leaf,
                leaf_kind: TargetKind::String,
            };
            field.jubako_tag = Some("env:BACKLOG_CLIENT_ID_{key|lower}");
            TypeDescriptor { fields: vec![field] }
        }
    }
    struct Backlog;
    impl Schematic for Backlog {
        fn describe() -> TypeDescriptor {
            TypeDescriptor {
                fields: vec![FieldDescriptor {
                    field_name: "Backlog",
                    tag: Some("backlog"),
                    jubako_tag: None,
                    container: FieldContainer::MapOfStruct(ClientId::describe()),
                    leaf_kind: TargetKind::String,
                }],
            }
        }
    }

    let schema = jubako::Schema::build_for::<Backlog>(&SchemaOptions::default());
    let mut layer = EnvLayer::new("env", "APP_")
        .with_environ(|| vec![("APP_BACKLOG_CLIENT_ID_JP".to_string(), "abc".to_string())]);
    jubako::Layer::init_with_store(&mut layer, &schema);
    let tree = jubako::Layer::load(&mut layer).unwrap();
    assert_eq!(
        jubako::path::get_path(&tree, "/backlog/jp/client_id"),
        Some(&Value::String("abc".into()))
    );
}

#[derive(Debug, serde::Deserialize, PartialEq, Default)]
struct Secret {
    #[serde(default)]
    password: String,
}

impl Schematic for Secret {
    fn describe() -> TypeDescriptor {
        let mut field = FieldDescriptor {
            field_name: "password",
            tag: Some("password"),
            jubako_tag: None,
            container: FieldContainer::Leaf,
            leaf_kind: TargetKind::String,
        };
        field.jubako_tag = Some("sensitive");
        TypeDescriptor { fields: vec![field] }
    }
}

/// S5 — Sensitivity routing: writing a sensitive field to a non-sensitive
/// layer is rejected; the same write to a sensitive layer succeeds.
#[test]
fn s5_sensitivity_routing() {
    let store = Store::<Secret>::new([quiet()]).unwrap();
    store.add(MapLayer::new("secrets"), [store::sensitive()]).unwrap();
    store.add(MapLayer::new("user"), [store::priority(10)]).unwrap();
    store.load().unwrap();

    let err = store.set_to("user", "/password", Value::String("x".into())).unwrap_err();
    assert!(matches!(err, JubakoError::SensitiveFieldToNormalLayer { .. }));

    store.set_to("secrets", "/password", Value::String("x".into())).unwrap();
    assert_eq!(store.get().password, "x");
}

/// S6 — Mask on read: a masked sensitive value reads as the mask's output
/// via `GetAt`, the real value via `GetAtUnmasked`, and an empty stored
/// value is never masked.
#[test]
fn s6_mask_on_read() {
    let store = Store::<Secret>::new([quiet(), store::with_mask(|_: &Value| Value::String("****".into()))]).unwrap();
    store.add(MapLayer::new("secrets"), [store::sensitive()]).unwrap();
    store.load().unwrap();
    store.set_to("secrets", "/password", Value::String("hunter2".into())).unwrap();

    let masked = store.get_at("/password");
    assert_eq!(masked.value, Value::String("****".into()));
    assert!(masked.masked);

    let unmasked = store.get_at_unmasked("/password");
    assert_eq!(unmasked.value, Value::String("hunter2".into()));
    assert!(!unmasked.masked);

    store.set_to("secrets", "/password", Value::String(String::new())).unwrap();
    let empty = store.get_at("/password");
    assert_eq!(empty.value, Value::String(String::new()));
    assert!(!empty.masked);
}
