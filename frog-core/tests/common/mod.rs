#![allow(dead_code)]

use frog_core::chrono::{DateTime, Utc};
use frog_core::{
    CompiledSchema, ConversionError, FieldDef, MethodBinding, Model, ProtoCompiler, Record,
    RpcContext, ServiceRegistry, ServiceRuntime, Signature, TypeCatalog, native_model,
};
use hello_service::{DemoModel, ResponseModel};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Emits and compiles the schema of a registry without touching the filesystem.
pub fn compile(catalog: &TypeCatalog, registry: &ServiceRegistry) -> CompiledSchema {
    let text = registry
        .emit_schema(catalog)
        .expect("Schema should be emitted");
    ProtoCompiler::new()
        .compile_source(&format!("{}.proto", registry.name()), &text)
        .expect("Schema should compile")
}

/// Builds a runtime from an in-memory compilation of the registry's schema.
pub fn runtime(catalog: TypeCatalog, registry: ServiceRegistry) -> Arc<ServiceRuntime> {
    let schema = compile(&catalog, &registry);
    Arc::new(ServiceRuntime::new(catalog, registry, schema).expect("Runtime should build"))
}

pub fn fixed_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_611_717_600, 123_456_789).expect("Valid timestamp")
}

pub fn demo_model() -> DemoModel {
    DemoModel {
        int_field: 0,
        float_field: 0.0,
        str_field: String::new(),
        list_int_field: vec![0],
        map_int_field: BTreeMap::from([("a".to_string(), 0)]),
        create_time: fixed_time(),
    }
}

/// Arguments of `echo_with_increment_one` with every value at zero.
pub fn default_args() -> Record {
    Record::new()
        .with("int_a", 0_i64)
        .with("float_b", 0.0)
        .with("string_c", "")
        .with("repeated_model_d", vec![demo_model()])
        .with("map_model_e", BTreeMap::from([("a".to_string(), 0_i64)]))
}

pub fn default_request_model() -> ResponseModel {
    ResponseModel {
        int_a: 0,
        float_b: 0.0,
        string_c: String::new(),
        repeated_model_d: vec![demo_model()],
        map_model_e: BTreeMap::from([("a".to_string(), 0)]),
    }
}

pub fn assert_incremented(response: &ResponseModel) {
    assert_eq!(response.int_a, 1);
    assert_eq!(response.float_b, 1.0);
    assert_eq!(response.string_c, "1");
    assert_eq!(response.map_model_e["a"], 1);

    let model = &response.repeated_model_d[0];
    assert_eq!(model.int_field, 1);
    assert_eq!(model.float_field, 1.0);
    assert_eq!(model.str_field, "1");
    assert_eq!(model.list_int_field[0], 1);
    assert_eq!(model.map_int_field["a"], 1);
    assert_eq!(model.create_time, fixed_time());
}

/// A tree: a record referencing itself through a list.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub value: i64,
    pub children: Vec<TreeNode>,
}

impl Model for TreeNode {
    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::of::<i64>("value"),
            FieldDef::of::<Vec<TreeNode>>("children"),
        ]
    }

    fn into_record(self) -> Record {
        Record::new()
            .with("value", self.value)
            .with("children", self.children)
    }

    fn from_record(mut record: Record) -> Result<Self, ConversionError> {
        Ok(Self {
            value: record.take("value")?,
            children: record.take("children")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub count: i64,
    pub active: bool,
}

impl Model for Item {
    fn fields() -> Vec<FieldDef> {
        vec![FieldDef::of::<i64>("count"), FieldDef::of::<bool>("active")]
    }

    fn into_record(self) -> Record {
        Record::new()
            .with("count", self.count)
            .with("active", self.active)
    }

    fn from_record(mut record: Record) -> Result<Self, ConversionError> {
        Ok(Self {
            count: record.take("count")?,
            active: record.take("active")?,
        })
    }
}

/// A record with a map of records, an optional record and a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    pub items: BTreeMap<String, Item>,
    pub by_shelf: BTreeMap<i64, String>,
    pub featured: Option<Item>,
    pub updated_at: DateTime<Utc>,
}

impl Model for Inventory {
    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::of::<BTreeMap<String, Item>>("items"),
            FieldDef::of::<BTreeMap<i64, String>>("by_shelf"),
            FieldDef::of::<Option<Item>>("featured"),
            FieldDef::of::<DateTime<Utc>>("updated_at"),
        ]
    }

    fn into_record(self) -> Record {
        Record::new()
            .with("items", self.items)
            .with("by_shelf", self.by_shelf)
            .with("featured", self.featured)
            .with("updated_at", self.updated_at)
    }

    fn from_record(mut record: Record) -> Result<Self, ConversionError> {
        Ok(Self {
            items: record.take("items")?,
            by_shelf: record.take("by_shelf")?,
            featured: record.take("featured")?,
            updated_at: record.take("updated_at")?,
        })
    }
}

native_model!(TreeNode, Item, Inventory);

/// A service exercising recursive records, maps of records and timestamps.
pub fn models_registry(catalog: &mut TypeCatalog) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new("models");

    registry
        .add_method(
            catalog,
            MethodBinding::new(
                "grow",
                Signature::new()
                    .param::<TreeNode>("root")
                    .returns::<TreeNode>(),
                |mut args: Record, _ctx: &RpcContext| {
                    let mut root: TreeNode = args.take("root")?;
                    root.children.push(TreeNode {
                        value: root.value + 1,
                        children: Vec::new(),
                    });
                    Ok::<_, ConversionError>(root)
                },
            ),
        )
        .expect("grow should bind");

    registry
        .add_method(
            catalog,
            MethodBinding::new(
                "restock",
                Signature::new()
                    .param::<Inventory>("inventory")
                    .param::<i64>("amount")
                    .returns::<Inventory>(),
                |mut args: Record, _ctx: &RpcContext| {
                    let mut inventory: Inventory = args.take("inventory")?;
                    let amount: i64 = args.take("amount")?;
                    inventory
                        .items
                        .values_mut()
                        .for_each(|item| item.count += amount);
                    Ok::<_, ConversionError>(inventory)
                },
            ),
        )
        .expect("restock should bind");

    registry
}
