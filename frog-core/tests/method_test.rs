use common::{
    Item, assert_incremented, compile, default_args, default_request_model, runtime,
};
use frog_core::prost::Message;
use frog_core::prost_reflect::{DynamicMessage, ReflectMessage};
use frog_core::tonic::Status;
use frog_core::{
    BindError, BoxError, CallError, CatalogError, ConversionError, FrogConfig, MethodBinding,
    NativeType, Record, RpcContext, RuntimeError, ServiceRegistry, ServiceRuntime, Signature,
    TypeCatalog, TypeExpr, Value,
};
use hello_service::{DemoModel, ResponseModel, client_registry, server_registry};

mod common;

fn hello_runtime() -> std::sync::Arc<ServiceRuntime> {
    let mut catalog = TypeCatalog::new();
    let registry = server_registry(&mut catalog, &FrogConfig::default()).unwrap();
    runtime(catalog, registry)
}

#[test]
fn test_invoke_with_separate_parameters() {
    let runtime = hello_runtime();
    let transcoder = runtime.transcoder();
    let method = runtime.method("echo_with_increment_one").unwrap();

    let request = method.encode_request(&transcoder, &default_args()).unwrap();
    let mut ctx = RpcContext::new("echo_with_increment_one");
    let response = runtime
        .invoke("echo_with_increment_one", &request, &mut ctx)
        .unwrap();

    assert_eq!(response.descriptor().name(), "ResponseModel");
    let response: ResponseModel = transcoder.decode(&response).unwrap();
    assert_incremented(&response);
}

#[test]
fn test_invoke_with_whole_model_parameter() {
    let runtime = hello_runtime();
    let transcoder = runtime.transcoder();
    let method = runtime.method("echo_with_increment_one_base").unwrap();

    let args = Record::new().with("request_model", default_request_model());
    let request = method.encode_request(&transcoder, &args).unwrap();
    let mut ctx = RpcContext::new("echo_with_increment_one_base");
    let response = runtime
        .invoke("echo_with_increment_one_base", &request, &mut ctx)
        .unwrap();

    let response = method.decode_response(&transcoder, &response).unwrap();
    let response = ResponseModel::from_value(Value::Record(response)).unwrap();
    assert_incremented(&response);
}

#[test]
fn test_unknown_method_is_not_found() {
    let runtime = hello_runtime();
    let request = DynamicMessage::new(runtime.schema().message("ResponseModel").unwrap());

    let err = runtime
        .invoke("missing", &request, &mut RpcContext::new("missing"))
        .unwrap_err();

    assert!(matches!(err, CallError::MethodNotFound(name) if name == "missing"));
}

#[test]
fn test_routes_follow_registration_order() {
    let runtime = hello_runtime();

    let paths: Vec<&str> = runtime.routes().map(|r| r.path()).collect();

    assert_eq!(
        paths,
        vec![
            "/hello_d.hello_d/echo_with_increment_one_base",
            "/hello_d.hello_d/echo_with_increment_one",
        ]
    );
    let route = runtime
        .route_by_path("/hello_d.hello_d/echo_with_increment_one")
        .unwrap();
    assert_eq!(route.method(), "echo_with_increment_one");
    assert_eq!(
        route.descriptor().input().name(),
        "echo_with_increment_one_request"
    );
}

#[test]
fn test_client_side_call_through_loopback_transport() {
    let server = hello_runtime();

    let mut client_catalog = TypeCatalog::new();
    let registry = client_registry(&mut client_catalog, &FrogConfig::default()).unwrap();
    let client = runtime(client_catalog, registry);
    let method = client.method("echo_with_increment_one").unwrap();
    assert!(!method.is_servable());

    let response = method
        .invoke_client_side(&client.transcoder(), &default_args(), |request| {
            let route = server.route("echo_with_increment_one").unwrap();
            let bytes = request.encode_to_vec();
            let request = DynamicMessage::decode(route.descriptor().input(), bytes.as_slice())?;

            let mut ctx = RpcContext::new("echo_with_increment_one");
            let response = server.invoke("echo_with_increment_one", &request, &mut ctx)?;
            Ok::<_, BoxError>(response)
        })
        .unwrap();

    let response = ResponseModel::from_value(Value::Record(response)).unwrap();
    assert_incremented(&response);
}

#[test]
fn test_transport_failures_are_reported() {
    let client = hello_runtime();
    let method = client.method("echo_with_increment_one").unwrap();

    let err = method
        .invoke_client_side(&client.transcoder(), &default_args(), |_| {
            Err(BoxError::from("connection refused"))
        })
        .unwrap_err();

    assert!(matches!(err, CallError::Transport(_)));
}

#[test]
fn test_remote_binding_is_not_servable() {
    let mut catalog = TypeCatalog::new();
    let registry = client_registry(&mut catalog, &FrogConfig::default()).unwrap();
    let client = runtime(catalog, registry);
    let method = client.method("echo_with_increment_one").unwrap();

    let request = method
        .encode_request(&client.transcoder(), &default_args())
        .unwrap();
    let err = client
        .invoke(
            "echo_with_increment_one",
            &request,
            &mut RpcContext::new("echo_with_increment_one"),
        )
        .unwrap_err();

    assert!(matches!(err, CallError::NotServable(_)));
}

#[test]
fn test_server_and_client_emit_the_same_schema() {
    let mut server_catalog = TypeCatalog::new();
    let server = server_registry(&mut server_catalog, &FrogConfig::default()).unwrap();
    let mut client_catalog = TypeCatalog::new();
    let client = client_registry(&mut client_catalog, &FrogConfig::default()).unwrap();

    assert_eq!(
        server.emit_schema(&server_catalog).unwrap(),
        client.emit_schema(&client_catalog).unwrap()
    );
}

#[test]
fn test_handler_errors_are_wrapped() {
    let mut catalog = TypeCatalog::new();
    let mut registry = ServiceRegistry::new("failing");
    registry
        .add_method(
            &mut catalog,
            MethodBinding::new(
                "explode",
                Signature::new().returns::<Item>(),
                |_args: Record, _ctx: &RpcContext| Err::<Item, _>(Status::internal("boom")),
            ),
        )
        .unwrap();
    let runtime = runtime(catalog, registry);
    let request = DynamicMessage::new(runtime.schema().message("explode_request").unwrap());

    let err = runtime
        .invoke("explode", &request, &mut RpcContext::new("explode"))
        .unwrap_err();

    match err {
        CallError::Handler(source) => {
            let status = source.downcast_ref::<Status>().unwrap();
            assert_eq!(status.message(), "boom");
        }
        other => panic!("Expected a handler error, got {other:?}"),
    }
}

#[test]
fn test_wrong_return_value_is_a_conversion_error() {
    let mut catalog = TypeCatalog::new();
    let mut registry = ServiceRegistry::new("sloppy");
    registry
        .add_method(
            &mut catalog,
            MethodBinding::new(
                "count",
                Signature::new().returns::<Record>(),
                |_args: Record, _ctx: &RpcContext| Ok::<_, ConversionError>(Value::Int(3)),
            )
            .response_type::<Item>(),
        )
        .unwrap();
    let runtime = runtime(catalog, registry);
    let request = DynamicMessage::new(runtime.schema().message("count_request").unwrap());

    let err = runtime
        .invoke("count", &request, &mut RpcContext::new("count"))
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Conversion(ConversionError::TypeMismatch {
            expected: "record",
            found: "int64"
        })
    ));
}

fn returning(returns: Option<TypeExpr>) -> BindError {
    let signature = match returns {
        Some(ty) => Signature::new().returns_expr(ty),
        None => Signature::new(),
    };
    MethodBinding::remote("broken", signature)
        .bind(&mut TypeCatalog::new(), &Default::default())
        .unwrap_err()
}

#[test]
fn test_non_record_returns_are_rejected() {
    for (returns, expected) in [
        (Some(TypeExpr::of::<i64>()), "int64"),
        (Some(TypeExpr::of::<Vec<DemoModel>>()), "list<"),
        (Some(TypeExpr::Mapping), "mapping"),
        (None, "nothing"),
    ] {
        match returning(returns) {
            BindError::UnsupportedReturn { annotation, .. } => {
                assert!(annotation.starts_with(expected), "{annotation}")
            }
            other => panic!("Expected an unsupported return, got {other:?}"),
        }
    }
}

#[test]
fn test_named_return_resolves_registered_record() {
    let mut catalog = TypeCatalog::new();
    catalog.register::<ResponseModel>().unwrap();

    let method = MethodBinding::remote(
        "lookup",
        Signature::new().returns_expr(TypeExpr::named("ResponseModel")),
    )
    .bind(&mut catalog, &Default::default())
    .unwrap();

    assert_eq!(Some(method.response()), catalog.lookup::<ResponseModel>());

    let err = MethodBinding::remote(
        "ghost",
        Signature::new().returns_expr(TypeExpr::named("Ghost")),
    )
    .bind(&mut catalog, &Default::default())
    .unwrap_err();
    assert!(matches!(err, BindError::Catalog(_)));
}

#[test]
fn test_explicit_request_type_must_match_parameters() {
    let mut catalog = TypeCatalog::new();

    let err = MethodBinding::remote(
        "partial",
        Signature::new()
            .param::<i64>("int_a")
            .returns::<ResponseModel>(),
    )
    .request_type::<ResponseModel>()
    .bind(&mut catalog, &Default::default())
    .unwrap_err();

    match err {
        BindError::RequestMismatch {
            expected, declared, ..
        } => {
            assert_eq!(expected, vec!["int_a".to_string()]);
            assert_eq!(declared.len(), 5);
        }
        other => panic!("Expected a request mismatch, got {other:?}"),
    }

    // The response registered before the request was rejected is gone too.
    assert!(catalog.is_empty());
    assert!(catalog.lookup::<ResponseModel>().is_none());
}

#[test]
fn test_same_method_name_in_two_services_must_share_parameters() {
    let mut catalog = TypeCatalog::new();

    let mut users = ServiceRegistry::new("users");
    users
        .add_method(
            &mut catalog,
            MethodBinding::remote("get", Signature::new().param::<i64>("id").returns::<Item>()),
        )
        .unwrap();

    let mut orders = ServiceRegistry::new("orders");
    let err = orders
        .add_method(
            &mut catalog,
            MethodBinding::remote(
                "get",
                Signature::new()
                    .param::<String>("sku")
                    .param::<bool>("flag")
                    .returns::<Item>(),
            ),
        )
        .unwrap_err();

    match err {
        BindError::Catalog(CatalogError::SyntheticMismatch {
            existing, found, ..
        }) => {
            assert_eq!(existing, vec!["id"]);
            assert_eq!(found, vec!["sku", "flag"]);
        }
        other => panic!("Expected a synthetic mismatch, got {other:?}"),
    }
    assert!(orders.methods().next().is_none());

    let request = catalog.lookup_wire_name("get_request").unwrap();
    let fields: Vec<&str> = catalog
        .record(request)
        .fields()
        .iter()
        .map(|f| f.name())
        .collect();
    assert_eq!(fields, vec!["id"]);

    let mut mirror = ServiceRegistry::new("users_mirror");
    mirror
        .add_method(
            &mut catalog,
            MethodBinding::remote("get", Signature::new().param::<i64>("id").returns::<Item>()),
        )
        .unwrap();
    assert_eq!(mirror.method("get").unwrap().request(), request);
}

#[test]
fn test_explicit_request_type_is_used_when_it_matches() {
    let mut catalog = TypeCatalog::new();

    let method = MethodBinding::remote(
        "echo",
        Signature::new()
            .param::<i64>("int_a")
            .param::<f64>("float_b")
            .param::<String>("string_c")
            .param::<Vec<DemoModel>>("repeated_model_d")
            .param::<std::collections::BTreeMap<String, i64>>("map_model_e")
            .returns::<ResponseModel>(),
    )
    .request_type::<ResponseModel>()
    .bind(&mut catalog, &Default::default())
    .unwrap();

    assert_eq!(method.request(), method.response());
    assert!(catalog.lookup_wire_name("echo_request").is_none());
}

#[test]
fn test_duplicate_methods_are_rejected() {
    let mut catalog = TypeCatalog::new();
    let mut registry = server_registry(&mut catalog, &FrogConfig::default()).unwrap();

    let err = registry
        .add_method(
            &mut catalog,
            MethodBinding::remote(
                "echo_with_increment_one",
                Signature::new().returns::<ResponseModel>(),
            ),
        )
        .unwrap_err();

    assert!(matches!(err, BindError::DuplicateMethod(_)));
}

fn auth_registry(catalog: &mut TypeCatalog, with_handler: bool) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new("guarded");
    registry
        .add_request_extra_field("auth_token", TypeExpr::of::<String>())
        .unwrap();

    if with_handler {
        registry
            .on_extra_field("auth_token", |value: Value, ctx: &mut RpcContext| {
                let token = String::from_value(value)
                    .map_err(|err| Status::invalid_argument(err.to_string()))?;
                if token != "letmein" {
                    return Err(Status::unauthenticated("bad token"));
                }
                ctx.insert("user", Value::Str("frog".into()));
                Ok(())
            })
            .unwrap();
    }

    registry
        .add_method(
            catalog,
            MethodBinding::new(
                "whoami",
                Signature::new().param::<i64>("count").returns::<Item>(),
                |mut args: Record, ctx: &RpcContext| {
                    let count: i64 = args.take("count")?;
                    Ok::<_, ConversionError>(Item {
                        count,
                        active: ctx.get("user") == Some(&Value::Str("frog".into()))
                            && !args.contains("auth_token"),
                    })
                },
            ),
        )
        .unwrap();

    registry
}

fn call_whoami(runtime: &ServiceRuntime, token: &str) -> Result<Item, CallError> {
    let method = runtime.method("whoami")?;
    let transcoder = runtime.transcoder();
    let args = Record::new().with("count", 2_i64).with("auth_token", token);

    let request = method.encode_request(&transcoder, &args)?;
    let bytes = request.encode_to_vec();
    let request = DynamicMessage::decode(request.descriptor(), bytes.as_slice())
        .map_err(|err| CallError::Transport(err.into()))?;

    let response = runtime.invoke("whoami", &request, &mut RpcContext::new("whoami"))?;
    Ok(transcoder.decode(&response)?)
}

#[test]
fn test_extra_fields_reach_their_handler_only() {
    let mut catalog = TypeCatalog::new();
    let registry = auth_registry(&mut catalog, true);
    let request = catalog.lookup_wire_name("whoami_request").unwrap();
    assert!(catalog.record(request).field("auth_token").is_some());
    let runtime = runtime(catalog, registry);

    let item = call_whoami(&runtime, "letmein").unwrap();

    assert_eq!(item.count, 2);
    assert!(item.active);
}

#[test]
fn test_extra_field_handler_can_reject_calls() {
    let mut catalog = TypeCatalog::new();
    let registry = auth_registry(&mut catalog, true);
    let runtime = runtime(catalog, registry);

    let err = call_whoami(&runtime, "guess").unwrap_err();

    match err {
        CallError::ExtraField { field, source } => {
            assert_eq!(field, "auth_token");
            let status = source.downcast_ref::<Status>().unwrap();
            assert_eq!(status.code(), frog_core::tonic::Code::Unauthenticated);
        }
        other => panic!("Expected an extra field error, got {other:?}"),
    }
}

#[test]
fn test_extra_field_without_handler_fails_the_call() {
    let mut catalog = TypeCatalog::new();
    let registry = auth_registry(&mut catalog, false);
    let runtime = runtime(catalog, registry);

    let err = call_whoami(&runtime, "letmein").unwrap_err();

    assert!(matches!(err, CallError::UnhandledExtraField(field) if field == "auth_token"));
}

#[test]
fn test_extra_fields_must_be_declared_first() {
    let mut catalog = TypeCatalog::new();
    let mut registry = server_registry(&mut catalog, &FrogConfig::default()).unwrap();

    let err = registry
        .add_request_extra_field("auth_token", TypeExpr::of::<String>())
        .unwrap_err();
    assert!(matches!(err, BindError::LateExtraField(_)));

    let err = registry
        .on_extra_field("auth_token", |_: Value, _: &mut RpcContext| {
            Ok::<_, Status>(())
        })
        .unwrap_err();
    assert!(matches!(err, BindError::UnknownExtraField(_)));
}

#[test]
fn test_runtime_rejects_mismatched_schema() {
    let mut catalog = TypeCatalog::new();
    let registry = server_registry(&mut catalog, &FrogConfig::default()).unwrap();

    let mut other_catalog = TypeCatalog::new();
    let mut other = ServiceRegistry::new("hello_d");
    other
        .add_method(
            &mut other_catalog,
            MethodBinding::remote(
                "echo_with_increment_one_base",
                Signature::new().returns::<DemoModel>(),
            ),
        )
        .unwrap();
    let schema = compile(&other_catalog, &other);

    let err = ServiceRuntime::new(catalog, registry, schema).unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::MessageMismatch { .. } | RuntimeError::MissingMethod(_)
    ));
}
