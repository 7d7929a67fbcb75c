#![allow(dead_code)]

use std::sync::{Arc, Once};

use anyhow::anyhow;
use serde_json::Value;

use switchyard::config::EngineConfig;
use switchyard::handler::handler_fn;
use switchyard::model::{
    ApiSpec, ComboKind, DataSectionSpec, ElementSpec, ErrorCode, ErrorCodeSpec, FunctionRequest,
    FunctionResult, FunctionSpec, ParamType, Parameters, ParameterSpec,
};
use switchyard::protocol::convention::{Inbound, Outbound, Payload};
use switchyard::server::{Engine, EngineBuilder};
use switchyard::xml::Element;

/// Caller address used by tests, allowed by the default access rules
pub const LOCAL: &str = "127.0.0.1:40000";

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// API exercising every path of the pipeline
pub fn test_spec() -> ApiSpec {
    ApiSpec::new("test")
        .version("2.1")
        .function(
            FunctionSpec::new("Echo")
                .describe("Returns its input")
                .input(ParameterSpec::required("in", ParamType::Text))
                .output(ParameterSpec::required("out", ParamType::Text)),
        )
        .function(
            FunctionSpec::new("Pair")
                .input(ParameterSpec::optional("a", ParamType::Text))
                .input(ParameterSpec::optional("b", ParamType::Text))
                .output(ParameterSpec::optional("a", ParamType::Text))
                .output(ParameterSpec::optional("b", ParamType::Text)),
        )
        .function(
            FunctionSpec::new("Add")
                .input(ParameterSpec::required("a", ParamType::Int32))
                .input(ParameterSpec::required("b", ParamType::Int32))
                .output(ParameterSpec::required("sum", ParamType::Int32)),
        )
        .function(
            FunctionSpec::new("Choose")
                .input(ParameterSpec::optional("left", ParamType::Text))
                .input(ParameterSpec::optional("right", ParamType::Text))
                .combo(ComboKind::Exclusive, &["left", "right"]),
        )
        .function(
            FunctionSpec::new("Lookup")
                .input(ParameterSpec::required("key", ParamType::Text))
                .output(ParameterSpec::required("value", ParamType::Text))
                .error_code(ErrorCodeSpec::new("NotFound")),
        )
        .function(
            FunctionSpec::new("Store").input_data(
                DataSectionSpec::new().top_level(
                    ElementSpec::new("item")
                        .attribute(ParameterSpec::required("id", ParamType::Int32))
                        .with_pcdata(),
                ),
            ),
        )
        .function(FunctionSpec::new("Fail"))
        .function(FunctionSpec::new("Boom"))
        .function(FunctionSpec::new("Sloppy").output(ParameterSpec::required("value", ParamType::Int32)))
}

async fn echo(request: FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
    let input = request.parameter("in").unwrap_or_default().to_string();
    Ok(FunctionResult::success().with_parameter("out", input))
}

async fn pair(request: FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
    let mut result = FunctionResult::success();
    for (name, value) in request.parameters().iter() {
        result = result.with_parameter(name, value);
    }
    Ok(result)
}

async fn add(request: FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
    let a: i32 = request.parameter("a").unwrap_or_default().parse()?;
    let b: i32 = request.parameter("b").unwrap_or_default().parse()?;
    Ok(FunctionResult::success().with_parameter("sum", (a + b).to_string()))
}

async fn choose(_request: FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
    Ok(FunctionResult::success())
}

async fn lookup(request: FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
    match request.parameter("key") {
        Some("missing") => Ok(FunctionResult::error(ErrorCode::parse("NotFound"))),
        Some("bogus") => Ok(FunctionResult::error(ErrorCode::parse("Undeclared"))),
        Some(key) => Ok(FunctionResult::success().with_parameter("value", key.to_uppercase())),
        None => Err(anyhow!("key vanished")),
    }
}

async fn store(request: FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
    let count = request.data_section().map_or(0, |data| data.children().len());
    Ok(FunctionResult::success().with_parameter("stored", count.to_string()))
}

async fn fail(_request: FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
    Err(anyhow!("database unreachable"))
}

async fn boom(_request: FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
    panic!("handler exploded")
}

async fn sloppy(_request: FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
    Ok(FunctionResult::success().with_parameter("value", "many"))
}

/// Builder with a handler for every function of [`test_spec`]
pub fn builder() -> EngineBuilder {
    EngineBuilder::new(test_spec())
        .handler("Echo", Arc::new(handler_fn(echo)))
        .handler("Pair", Arc::new(handler_fn(pair)))
        .handler("Add", Arc::new(handler_fn(add)))
        .handler("Choose", Arc::new(handler_fn(choose)))
        .handler("Lookup", Arc::new(handler_fn(lookup)))
        .handler("Store", Arc::new(handler_fn(store)))
        .handler("Fail", Arc::new(handler_fn(fail)))
        .handler("Boom", Arc::new(handler_fn(boom)))
        .handler("Sloppy", Arc::new(handler_fn(sloppy)))
}

pub async fn start_with(config: EngineConfig) -> Arc<Engine> {
    init_tracing();
    builder().config(config).start().await.expect("engine start")
}

pub async fn start() -> Arc<Engine> {
    start_with(EngineConfig::default()).await
}

pub fn params(pairs: &[(&str, &str)]) -> Parameters {
    pairs.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect()
}

/// Standard convention GET of `function`
pub fn standard(function: &str, pairs: &[(&str, &str)]) -> Inbound {
    let mut parameters = params(pairs);
    parameters.set("_function", function);
    Inbound::get(parameters)
}

pub fn xml_body(outbound: &Outbound) -> &Element {
    match &outbound.body {
        Payload::Xml(root) => root,
        other => panic!("expected an XML body, got {other:?}"),
    }
}

pub fn json_body(outbound: &Outbound) -> &Value {
    match &outbound.body {
        Payload::Json(value) => value,
        other => panic!("expected a JSON body, got {other:?}"),
    }
}

/// Error code of a standard `<result>` document
pub fn error_code(outbound: &Outbound) -> Option<String> {
    xml_body(outbound).attribute("errorcode").map(str::to_string)
}

/// Output parameter of a standard `<result>` document
pub fn result_param(outbound: &Outbound, name: &str) -> Option<String> {
    xml_body(outbound)
        .children_named("param")
        .find(|p| p.attribute("name") == Some(name))
        .map(|p| p.text_or_empty().to_string())
}

/// Data section of a standard `<result>` document
pub fn result_data(outbound: &Outbound) -> Option<&Element> {
    xml_body(outbound).child("data")
}

/// Calls `function` through the standard convention from the local address
pub async fn call(engine: &Engine, function: &str, pairs: &[(&str, &str)]) -> Outbound {
    engine.handle(standard(function, pairs), LOCAL).await
}
