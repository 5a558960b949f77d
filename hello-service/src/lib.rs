//! # Hello Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide a small service built with
//! `frog-core` for integration testing. It is not intended for production use.
//!
//! The service `hello_d` has two methods that echo their input back with every number
//! incremented and every string suffixed with `"1"`:
//!
//! * `echo_with_increment_one` takes its fields as separate parameters and returns a generic
//!   record, with [`ResponseModel`] as its explicit response type.
//! * `echo_with_increment_one_base` takes a whole [`ResponseModel`] and returns another one.
use frog_core::chrono::{DateTime, Utc};
use frog_core::grpc::server::ServiceName;
use frog_core::{
    BindError, ConversionError, FieldDef, FrogConfig, GenerateError, MethodBinding, Model,
    ProtoCompiler, Record, RpcContext, RuntimeError, ServiceRegistry, ServiceRuntime, Signature,
    TypeCatalog, native_model,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const SERVICE_NAME: &str = "hello_d";

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoModel {
    pub int_field: i64,
    pub float_field: f64,
    pub str_field: String,
    pub list_int_field: Vec<i64>,
    pub map_int_field: BTreeMap<String, i64>,
    pub create_time: DateTime<Utc>,
}

impl Default for DemoModel {
    fn default() -> Self {
        Self {
            int_field: 0,
            float_field: 0.0,
            str_field: String::new(),
            list_int_field: Vec::new(),
            map_int_field: BTreeMap::new(),
            create_time: Utc::now(),
        }
    }
}

impl DemoModel {
    pub fn increment_one(&mut self) {
        self.int_field += 1;
        self.float_field += 1.0;
        self.str_field.push('1');
        self.list_int_field.iter_mut().for_each(|n| *n += 1);
        self.map_int_field.values_mut().for_each(|n| *n += 1);
    }
}

impl Model for DemoModel {
    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::of::<i64>("int_field").with_default(0_i64),
            FieldDef::of::<f64>("float_field").with_default(0.0),
            FieldDef::of::<String>("str_field").with_default(""),
            FieldDef::of::<Vec<i64>>("list_int_field").with_default(Vec::<i64>::new()),
            FieldDef::of::<BTreeMap<String, i64>>("map_int_field")
                .with_default(BTreeMap::<String, i64>::new()),
            FieldDef::of::<DateTime<Utc>>("create_time"),
        ]
    }

    fn into_record(self) -> Record {
        Record::new()
            .with("int_field", self.int_field)
            .with("float_field", self.float_field)
            .with("str_field", self.str_field)
            .with("list_int_field", self.list_int_field)
            .with("map_int_field", self.map_int_field)
            .with("create_time", self.create_time)
    }

    fn from_record(mut record: Record) -> Result<Self, ConversionError> {
        Ok(Self {
            int_field: record.take("int_field")?,
            float_field: record.take("float_field")?,
            str_field: record.take("str_field")?,
            list_int_field: record.take("list_int_field")?,
            map_int_field: record.take("map_int_field")?,
            create_time: record
                .take::<Option<DateTime<Utc>>>("create_time")?
                .unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseModel {
    pub int_a: i64,
    pub float_b: f64,
    pub string_c: String,
    pub repeated_model_d: Vec<DemoModel>,
    pub map_model_e: BTreeMap<String, i64>,
}

impl ResponseModel {
    pub fn increment_one(mut self) -> Self {
        self.int_a += 1;
        self.float_b += 1.0;
        self.string_c.push('1');
        self.repeated_model_d
            .iter_mut()
            .for_each(DemoModel::increment_one);
        self.map_model_e.values_mut().for_each(|n| *n += 1);
        self
    }
}

impl Model for ResponseModel {
    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::of::<i64>("int_a"),
            FieldDef::of::<f64>("float_b"),
            FieldDef::of::<String>("string_c"),
            FieldDef::of::<Vec<DemoModel>>("repeated_model_d"),
            FieldDef::of::<BTreeMap<String, i64>>("map_model_e"),
        ]
    }

    fn into_record(self) -> Record {
        Record::new()
            .with("int_a", self.int_a)
            .with("float_b", self.float_b)
            .with("string_c", self.string_c)
            .with("repeated_model_d", self.repeated_model_d)
            .with("map_model_e", self.map_model_e)
    }

    fn from_record(mut record: Record) -> Result<Self, ConversionError> {
        Ok(Self {
            int_a: record.take("int_a")?,
            float_b: record.take("float_b")?,
            string_c: record.take("string_c")?,
            repeated_model_d: record.take("repeated_model_d")?,
            map_model_e: record.take("map_model_e")?,
        })
    }
}

native_model!(DemoModel, ResponseModel);

/// The `hello_d` service name, as `tonic`'s router expects it.
pub struct HelloService;

impl ServiceName for HelloService {
    const NAME: &'static str = "hello_d.hello_d";
}

fn echo_with_increment_one_signature() -> Signature {
    Signature::new()
        .param::<i64>("int_a")
        .param::<f64>("float_b")
        .param::<String>("string_c")
        .param::<Vec<DemoModel>>("repeated_model_d")
        .param::<BTreeMap<String, i64>>("map_model_e")
        .returns::<Record>()
}

fn echo_with_increment_one_base_signature() -> Signature {
    Signature::new()
        .param::<ResponseModel>("request_model")
        .returns::<ResponseModel>()
}

pub fn echo_with_increment_one(
    mut args: Record,
    _ctx: &RpcContext,
) -> Result<Record, ConversionError> {
    let int_a: i64 = args.take("int_a")?;
    let float_b: f64 = args.take("float_b")?;
    let mut string_c: String = args.take("string_c")?;
    let mut repeated_model_d: Vec<DemoModel> = args.take("repeated_model_d")?;
    let mut map_model_e: BTreeMap<String, i64> = args.take("map_model_e")?;

    string_c.push('1');
    repeated_model_d
        .iter_mut()
        .for_each(DemoModel::increment_one);
    map_model_e.values_mut().for_each(|n| *n += 1);

    Ok(Record::new()
        .with("int_a", int_a + 1)
        .with("float_b", float_b + 1.0)
        .with("string_c", string_c)
        .with("repeated_model_d", repeated_model_d)
        .with("map_model_e", map_model_e))
}

pub fn echo_with_increment_one_base(
    mut args: Record,
    _ctx: &RpcContext,
) -> Result<ResponseModel, ConversionError> {
    let request: ResponseModel = args.take("request_model")?;
    Ok(request.increment_one())
}

/// Registers the `hello_d` methods with their handlers.
pub fn server_registry(
    catalog: &mut TypeCatalog,
    config: &FrogConfig,
) -> Result<ServiceRegistry, BindError> {
    let mut registry = ServiceRegistry::with_config(SERVICE_NAME, config);

    registry.add_method(
        catalog,
        MethodBinding::new(
            "echo_with_increment_one_base",
            echo_with_increment_one_base_signature(),
            echo_with_increment_one_base,
        ),
    )?;
    registry.add_method(
        catalog,
        MethodBinding::new(
            "echo_with_increment_one",
            echo_with_increment_one_signature(),
            echo_with_increment_one,
        )
        .response_type::<ResponseModel>(),
    )?;

    Ok(registry)
}

/// Registers the `hello_d` methods without handlers, as a client declares them.
pub fn client_registry(
    catalog: &mut TypeCatalog,
    config: &FrogConfig,
) -> Result<ServiceRegistry, BindError> {
    let mut registry = ServiceRegistry::with_config(SERVICE_NAME, config);

    registry.add_method(
        catalog,
        MethodBinding::remote(
            "echo_with_increment_one_base",
            echo_with_increment_one_base_signature(),
        ),
    )?;
    registry.add_method(
        catalog,
        MethodBinding::remote(
            "echo_with_increment_one",
            echo_with_increment_one_signature(),
        )
        .response_type::<ResponseModel>(),
    )?;

    Ok(registry)
}

/// Builds the server runtime, writing the schema artifacts into `config.proto_dir`.
pub fn server_runtime(config: &FrogConfig) -> Result<Arc<ServiceRuntime>, SetupError> {
    let mut catalog = TypeCatalog::new();
    let registry = server_registry(&mut catalog, config)?;
    build_runtime(catalog, registry)
}

/// Builds the client runtime, writing the schema artifacts into `config.proto_dir`.
pub fn client_runtime(config: &FrogConfig) -> Result<Arc<ServiceRuntime>, SetupError> {
    let mut catalog = TypeCatalog::new();
    let registry = client_registry(&mut catalog, config)?;
    build_runtime(catalog, registry)
}

fn build_runtime(
    catalog: TypeCatalog,
    registry: ServiceRegistry,
) -> Result<Arc<ServiceRuntime>, SetupError> {
    let schema = registry.generate(&catalog, &ProtoCompiler::new())?;
    Ok(Arc::new(ServiceRuntime::new(catalog, registry, schema)?))
}
