use common::{Inventory, Item, TreeNode, compile, demo_model, fixed_time, models_registry};
use frog_core::prost_reflect::{
    DynamicMessage, MapKey as WireKey, ReflectMessage, Value as WireValue,
};
use frog_core::{
    ConversionError, FrogConfig, MapKey, MessageTranscoder, ProtoCompiler, Record, TypeCatalog,
    Value,
};
use hello_service::{DemoModel, ResponseModel, server_registry};
use std::collections::BTreeMap;

mod common;

fn hello_catalog() -> (TypeCatalog, frog_core::CompiledSchema) {
    let mut catalog = TypeCatalog::new();
    let registry = server_registry(&mut catalog, &FrogConfig::default()).unwrap();
    let schema = compile(&catalog, &registry);
    (catalog, schema)
}

#[test]
fn test_encode_model_sets_every_field() {
    let (catalog, schema) = hello_catalog();
    let transcoder = MessageTranscoder::new(&catalog, &schema);

    let mut model = demo_model();
    model.int_field = 1;
    model.float_field = 1.0;
    model.str_field = "1".to_string();
    model.list_int_field = vec![1];
    model.map_int_field = BTreeMap::from([("a".to_string(), 1)]);

    let message = transcoder.encode(model.clone()).unwrap();

    assert_eq!(message.descriptor().full_name(), "hello_d.DemoModel");
    assert_eq!(
        message.get_field_by_name("int_field").unwrap().as_i64(),
        Some(1)
    );
    assert_eq!(
        message.get_field_by_name("float_field").unwrap().as_f64(),
        Some(1.0)
    );
    assert_eq!(
        message.get_field_by_name("str_field").unwrap().as_str(),
        Some("1")
    );
    assert_eq!(
        message.get_field_by_name("list_int_field").unwrap().as_list(),
        Some(&[WireValue::I64(1)][..])
    );

    let map_field = message.get_field_by_name("map_int_field").unwrap();
    let map = map_field.as_map().unwrap();
    assert_eq!(
        map.get(&WireKey::String("a".to_string())),
        Some(&WireValue::I64(1))
    );

    let decoded: DemoModel = transcoder.decode(&message).unwrap();
    assert_eq!(decoded, model);
}

#[test]
fn test_generic_mapping_encodes_as_declared_record() {
    let (catalog, schema) = hello_catalog();
    let transcoder = MessageTranscoder::new(&catalog, &schema);
    let response = catalog.lookup::<ResponseModel>().unwrap();

    let native = Record::new()
        .with("int_a", 1_i64)
        .with("float_b", 1.0)
        .with("string_c", "1")
        .with("repeated_model_d", vec![demo_model()])
        .with("map_model_e", BTreeMap::from([("a".to_string(), 1_i64)]));

    let message = transcoder.to_wire(&Value::Record(native), response).unwrap();
    let mut decoded = transcoder.to_native(&message, response).unwrap();

    assert_eq!(decoded.get("int_a"), Some(&Value::Int(1)));
    assert_eq!(decoded.get("float_b"), Some(&Value::Float(1.0)));
    assert_eq!(decoded.get("string_c"), Some(&Value::Str("1".into())));

    let models: Vec<DemoModel> = decoded.take("repeated_model_d").unwrap();
    assert_eq!(models, vec![demo_model()]);

    let map: BTreeMap<String, i64> = decoded.take("map_model_e").unwrap();
    assert_eq!(map["a"], 1);
}

#[test]
fn test_string_keyed_map_is_accepted_as_record() {
    let (catalog, schema) = hello_catalog();
    let transcoder = MessageTranscoder::new(&catalog, &schema);
    let response = catalog.lookup::<ResponseModel>().unwrap();

    let native = Value::Map(BTreeMap::from([
        (MapKey::Str("int_a".into()), Value::Int(7)),
        (MapKey::Str("string_c".into()), Value::Str("seven".into())),
    ]));

    let message = transcoder.to_wire(&native, response).unwrap();

    assert_eq!(message.get_field_by_name("int_a").unwrap().as_i64(), Some(7));
    assert_eq!(
        message.get_field_by_name("string_c").unwrap().as_str(),
        Some("seven")
    );
}

#[test]
fn test_unknown_native_fields_are_ignored() {
    let (catalog, schema) = hello_catalog();
    let transcoder = MessageTranscoder::new(&catalog, &schema);
    let response = catalog.lookup::<ResponseModel>().unwrap();

    let native = Record::new()
        .with("int_a", 3_i64)
        .with("not_a_field", "ignored");

    let message = transcoder.to_wire(&Value::Record(native), response).unwrap();
    let decoded = transcoder.to_native(&message, response).unwrap();

    assert_eq!(decoded.get("int_a"), Some(&Value::Int(3)));
    assert!(!decoded.contains("not_a_field"));
}

#[test]
fn test_type_mismatch_reports_field_path() {
    let (catalog, schema) = hello_catalog();
    let transcoder = MessageTranscoder::new(&catalog, &schema);
    let response = catalog.lookup::<ResponseModel>().unwrap();

    let bad_model = Record::new().with("int_field", "one");
    let native = Record::new().with("repeated_model_d", Value::List(vec![bad_model.into()]));

    let err = transcoder
        .to_wire(&Value::Record(native), response)
        .unwrap_err();

    match &err {
        ConversionError::Field { field, .. } => {
            assert_eq!(field, "repeated_model_d.0.int_field")
        }
        other => panic!("Expected a field error, got {other:?}"),
    }
    assert!(matches!(
        err.root_cause(),
        ConversionError::TypeMismatch {
            expected: "int64",
            found: "string"
        }
    ));
}

#[test]
fn test_timestamp_keeps_nanoseconds() {
    let (catalog, schema) = hello_catalog();
    let transcoder = MessageTranscoder::new(&catalog, &schema);

    let message = transcoder.encode(demo_model()).unwrap();
    let time_field = message.get_field_by_name("create_time").unwrap();
    let timestamp = time_field.as_message().unwrap();

    assert_eq!(
        timestamp.get_field_by_name("seconds").unwrap().as_i64(),
        Some(1_611_717_600)
    );
    assert_eq!(
        timestamp.get_field_by_name("nanos").unwrap().as_i32(),
        Some(123_456_789)
    );

    let decoded: DemoModel = transcoder.decode(&message).unwrap();
    assert_eq!(decoded.create_time, fixed_time());
}

#[test]
fn test_recursive_record_round_trip() {
    let mut catalog = TypeCatalog::new();
    let registry = models_registry(&mut catalog);
    let schema = compile(&catalog, &registry);
    let transcoder = MessageTranscoder::new(&catalog, &schema);

    let tree = TreeNode {
        value: 1,
        children: vec![
            TreeNode {
                value: 2,
                children: vec![TreeNode {
                    value: 3,
                    children: Vec::new(),
                }],
            },
            TreeNode {
                value: 4,
                children: Vec::new(),
            },
        ],
    };

    let message = transcoder.encode(tree.clone()).unwrap();
    let decoded: TreeNode = transcoder.decode(&message).unwrap();

    assert_eq!(decoded, tree);
}

#[test]
fn test_map_of_records_round_trip() {
    let mut catalog = TypeCatalog::new();
    let registry = models_registry(&mut catalog);
    let schema = compile(&catalog, &registry);
    let transcoder = MessageTranscoder::new(&catalog, &schema);

    let inventory = Inventory {
        items: BTreeMap::from([
            (
                "apples".to_string(),
                Item {
                    count: 3,
                    active: true,
                },
            ),
            (
                "pears".to_string(),
                Item {
                    count: 0,
                    active: false,
                },
            ),
        ]),
        by_shelf: BTreeMap::from([(1, "apples".to_string()), (-2, "pears".to_string())]),
        featured: None,
        updated_at: fixed_time(),
    };

    let message = transcoder.encode(inventory.clone()).unwrap();
    assert!(!message.has_field_by_name("featured"));

    let decoded: Inventory = transcoder.decode(&message).unwrap();
    assert_eq!(decoded, inventory);
}

#[test]
fn test_unset_record_field_decodes_to_null() {
    let mut catalog = TypeCatalog::new();
    let registry = models_registry(&mut catalog);
    let schema = compile(&catalog, &registry);
    let transcoder = MessageTranscoder::new(&catalog, &schema);
    let id = catalog.lookup::<Inventory>().unwrap();

    let message = DynamicMessage::new(schema.message("Inventory").unwrap());
    let decoded = transcoder.to_native(&message, id).unwrap();

    assert_eq!(decoded.get("featured"), Some(&Value::Null));
    assert_eq!(decoded.get("items"), Some(&Value::Map(BTreeMap::new())));
    assert_eq!(decoded.get("by_shelf"), Some(&Value::Map(BTreeMap::new())));
}

const LEGACY_SCHEMA: &str = r#"syntax = "proto3";

package legacy;

import "google/protobuf/timestamp.proto";

message DemoModel {
  int64 int_field = 1;
  double float_field = 2;
  repeated int64 list_int_field = 4;
  map<string, int64> map_int_field = 5;
  google.protobuf.Timestamp create_time = 6;
}

message ResponseModel {
  int64 int_a = 1;
  double float_b = 2;
  repeated DemoModel repeated_model_d = 4;
  map<string, int64> map_model_e = 5;
}

service legacy {
  rpc noop(DemoModel) returns (ResponseModel) {};
}
"#;

fn legacy_catalog() -> (TypeCatalog, frog_core::CompiledSchema) {
    let mut catalog = TypeCatalog::new();
    catalog.register::<ResponseModel>().unwrap();
    let schema = ProtoCompiler::new()
        .compile_source("legacy.proto", LEGACY_SCHEMA)
        .unwrap();
    (catalog, schema)
}

#[test]
fn test_missing_wire_field_uses_declared_default() {
    let (catalog, schema) = legacy_catalog();
    let transcoder = MessageTranscoder::new(&catalog, &schema);

    let mut message = DynamicMessage::new(schema.message("DemoModel").unwrap());
    message.set_field_by_name("int_field", WireValue::I64(5));

    let decoded: DemoModel = transcoder.decode(&message).unwrap();

    assert_eq!(decoded.int_field, 5);
    assert_eq!(decoded.str_field, "");
}

#[test]
fn test_missing_wire_field_without_default_fails() {
    let (catalog, schema) = legacy_catalog();
    let transcoder = MessageTranscoder::new(&catalog, &schema);

    let message = DynamicMessage::new(schema.message("ResponseModel").unwrap());
    let err = transcoder.decode::<ResponseModel>(&message).unwrap_err();

    assert!(matches!(
        err.root_cause(),
        ConversionError::MissingField { field, .. } if field == "string_c"
    ));
}

#[test]
fn test_encoding_a_field_missing_from_the_wire_fails() {
    let (catalog, schema) = legacy_catalog();
    let transcoder = MessageTranscoder::new(&catalog, &schema);

    let mut model = demo_model();
    model.str_field = "lost".to_string();
    let err = transcoder.encode(model).unwrap_err();

    assert!(matches!(
        err,
        ConversionError::MissingField { field, .. } if field == "str_field"
    ));
}

#[test]
fn test_unregistered_model_is_rejected() {
    let (_, schema) = hello_catalog();
    let empty = TypeCatalog::new();
    let transcoder = MessageTranscoder::new(&empty, &schema);

    let err = transcoder.encode(demo_model()).unwrap_err();
    assert!(matches!(err, ConversionError::NotRegistered(_)));
}

#[derive(Debug, Clone, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

impl frog_core::Model for Point {
    fn fields() -> Vec<frog_core::FieldDef> {
        vec![
            frog_core::FieldDef::of::<i64>("x"),
            frog_core::FieldDef::of::<i64>("y"),
        ]
    }

    fn into_record(self) -> Record {
        Record::new().with("x", self.x).with("y", self.y)
    }

    fn from_record(mut record: Record) -> Result<Self, ConversionError> {
        Ok(Self {
            x: record.take("x")?,
            y: record.take("y")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Polyline {
    points: Vec<Point>,
}

impl frog_core::Model for Polyline {
    fn fields() -> Vec<frog_core::FieldDef> {
        vec![frog_core::FieldDef::of::<Vec<Point>>("points")]
    }

    fn into_record(self) -> Record {
        Record::new().with("points", self.points)
    }

    fn from_record(mut record: Record) -> Result<Self, ConversionError> {
        Ok(Self {
            points: record.take("points")?,
        })
    }
}

frog_core::native_model!(Point, Polyline);

fn geometry_catalog() -> (TypeCatalog, frog_core::CompiledSchema) {
    let mut catalog = TypeCatalog::new();
    let mut registry = frog_core::ServiceRegistry::new("geometry");
    registry
        .add_method(
            &mut catalog,
            frog_core::MethodBinding::remote(
                "trace",
                frog_core::Signature::new()
                    .param::<Polyline>("line")
                    .returns::<Polyline>(),
            ),
        )
        .unwrap();
    let schema = compile(&catalog, &registry);
    (catalog, schema)
}

#[test]
fn test_point_round_trip_keeps_signs() {
    let (catalog, schema) = geometry_catalog();
    let transcoder = MessageTranscoder::new(&catalog, &schema);

    let message = transcoder.encode(Point { x: 3, y: -4 }).unwrap();
    let point: Point = transcoder.decode(&message).unwrap();

    assert_eq!(point, Point { x: 3, y: -4 });
}

#[test]
fn test_list_of_records_keeps_order() {
    let (catalog, schema) = geometry_catalog();
    let transcoder = MessageTranscoder::new(&catalog, &schema);
    let line = Polyline {
        points: vec![Point { x: 1, y: 1 }, Point { x: 2, y: 2 }],
    };

    let message = transcoder.encode(line.clone()).unwrap();
    let decoded: Polyline = transcoder.decode(&message).unwrap();

    assert_eq!(decoded, line);
}
