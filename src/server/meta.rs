//! Built-in functions every API answers, all named with a leading `_`.
//!
//! Meta-functions bypass the interceptor hooks around regular functions and
//! are counted by the API itself.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::protocol::model::{
    ApiSpec, FunctionRequest, FunctionResult, InvalidMessage, ParamType, ParameterSpec,
};
use crate::protocol::xml::Element;
use crate::server::api::Api;
use crate::server::function::Function;
use crate::server::links::LinkOutcome;
use crate::server::statistics::{Aggregate, StatisticsSnapshot};

/// Timestamp notation used in meta-function output
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

const FUNCTION_NAME: &str = "functionName";

/// The fixed set of meta-functions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetaFunction {
    NoOp,
    GetFunctionList,
    GetStatistics,
    ResetStatistics,
    GetVersion,
    CheckLinks,
    GetSettings,
    EnableFunction,
    DisableFunction,
    EnableApi,
    DisableApi,
    ReloadProperties,
    Wsdl,
    Smd,
}

impl MetaFunction {
    /// Every meta-function, in reporting order
    pub const ALL: [MetaFunction; 14] = [
        Self::NoOp,
        Self::GetFunctionList,
        Self::GetStatistics,
        Self::ResetStatistics,
        Self::GetVersion,
        Self::CheckLinks,
        Self::GetSettings,
        Self::EnableFunction,
        Self::DisableFunction,
        Self::EnableApi,
        Self::DisableApi,
        Self::ReloadProperties,
        Self::Wsdl,
        Self::Smd,
    ];

    /// Name callers use
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoOp => "_NoOp",
            Self::GetFunctionList => "_GetFunctionList",
            Self::GetStatistics => "_GetStatistics",
            Self::ResetStatistics => "_ResetStatistics",
            Self::GetVersion => "_GetVersion",
            Self::CheckLinks => "_CheckLinks",
            Self::GetSettings => "_GetSettings",
            Self::EnableFunction => "_EnableFunction",
            Self::DisableFunction => "_DisableFunction",
            Self::EnableApi => "_EnableAPI",
            Self::DisableApi => "_DisableAPI",
            Self::ReloadProperties => "_ReloadProperties",
            Self::Wsdl => "_WSDL",
            Self::Smd => "_SMD",
        }
    }

    /// Meta-function called `name`
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|meta| meta.name() == name)
    }

    /// Names given to positional arguments, in order
    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            Self::GetStatistics => &[FUNCTION_NAME, "detailed", "reset"],
            Self::EnableFunction | Self::DisableFunction => &[FUNCTION_NAME],
            _ => &[],
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

/// Runs a meta-function
pub(crate) async fn call(api: &Api, meta: MetaFunction, request: &FunctionRequest) -> FunctionResult {
    match meta {
        MetaFunction::NoOp => FunctionResult::success(),
        MetaFunction::GetFunctionList => function_list(api),
        MetaFunction::GetStatistics => statistics(api, request),
        MetaFunction::ResetStatistics => {
            for function in api.functions() {
                function.statistics().reset();
            }
            info!(api = api.name(), "statistics reset");
            FunctionResult::success()
        }
        MetaFunction::GetVersion => FunctionResult::success()
            .with_parameter("switchyard.version", env!("CARGO_PKG_VERSION"))
            .with_parameter("api.name", api.name())
            .with_parameter("api.version", api.spec().version.as_str())
            .with_parameter("os.name", std::env::consts::OS)
            .with_parameter("os.arch", std::env::consts::ARCH),
        MetaFunction::CheckLinks => check_links(api).await,
        MetaFunction::GetSettings => settings(api),
        MetaFunction::EnableFunction => toggle_function(api, request, true),
        MetaFunction::DisableFunction => toggle_function(api, request, false),
        MetaFunction::EnableApi => {
            api.set_disabled(false);
            FunctionResult::success()
        }
        MetaFunction::DisableApi => {
            api.set_disabled(true);
            FunctionResult::success()
        }
        MetaFunction::ReloadProperties => reload(api).await,
        MetaFunction::Wsdl => {
            let wsdl = api.schemas.wsdl.get_or_init(|| wsdl(api.spec()));
            FunctionResult::success()
                .with_parameter("format", "wsdl")
                .with_parameter("description", wsdl.as_str())
        }
        MetaFunction::Smd => {
            let smd = api.schemas.smd.get_or_init(|| smd(api.spec()));
            FunctionResult::success()
                .with_parameter("format", "smd")
                .with_parameter("description", smd.as_str())
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Function named by the `functionName` parameter
///
/// Required when `required`; otherwise absent means "all functions".
fn named_function<'a>(
    api: &'a Api,
    request: &FunctionRequest,
    required: bool,
) -> Result<Option<&'a Function>, FunctionResult> {
    let mut message = InvalidMessage::new();
    match request.parameter(FUNCTION_NAME) {
        None if required => message.missing(FUNCTION_NAME),
        None => return Ok(None),
        Some(name) => match api.function(name) {
            Some(function) => return Ok(Some(function.as_ref())),
            None => message.invalid_value(FUNCTION_NAME, "_function"),
        },
    }
    Err(FunctionResult::invalid_request(message))
}

fn flag(request: &FunctionRequest, name: &str, message: &mut InvalidMessage) -> bool {
    match request.parameter(name) {
        None | Some("false") => false,
        Some("true") => true,
        Some(_) => {
            message.invalid_value(name, "_boolean");
            false
        }
    }
}

fn function_list(api: &Api) -> FunctionResult {
    let mut data = Element::new("data");
    for function in api.functions() {
        data.add_child(
            Element::new("function")
                .with_attribute("name", function.name())
                .with_attribute("version", function.version())
                .with_attribute("enabled", function.is_enabled().to_string()),
        );
    }
    FunctionResult::success().with_data(data)
}

fn statistics(api: &Api, request: &FunctionRequest) -> FunctionResult {
    let mut message = InvalidMessage::new();
    let detailed = flag(request, "detailed", &mut message);
    let reset = flag(request, "reset", &mut message);
    if !message.is_empty() {
        return FunctionResult::invalid_request(message);
    }
    let scoped = match named_function(api, request, false) {
        Ok(scoped) => scoped,
        Err(invalid) => return invalid,
    };

    let mut data = Element::new("data");
    let functions: Vec<&Function> = match scoped {
        Some(function) => vec![function],
        None => api.functions().iter().map(AsRef::as_ref).collect(),
    };
    for function in functions {
        let snapshot = if reset {
            function.statistics().snapshot_and_reset()
        } else {
            function.statistics().snapshot()
        };
        data.add_child(function_statistics(function.name(), &snapshot, detailed));
    }
    if scoped.is_none() {
        for meta in MetaFunction::ALL {
            data.add_child(
                Element::new("meta")
                    .with_attribute("name", meta.name())
                    .with_attribute("count", api.meta_call_count(meta).to_string()),
            );
        }
    }

    let now = Utc::now();
    FunctionResult::success()
        .with_parameter("startup", timestamp(api.started()))
        .with_parameter("now", timestamp(now))
        .with_parameter("uptime", (now - api.started()).num_seconds().max(0).to_string())
        .with_data(data)
}

fn function_statistics(name: &str, snapshot: &StatisticsSnapshot, detailed: bool) -> Element {
    let mut unsuccessful = aggregate("unsuccessful", &snapshot.unsuccessful);
    if detailed {
        for (code, bucket) in &snapshot.by_error_code {
            unsuccessful.add_child(aggregate("errorCode", bucket).with_attribute("name", code.as_str()));
        }
    }
    Element::new("function")
        .with_attribute("name", name)
        .with_attribute("lastReset", timestamp(snapshot.last_reset))
        .with_child(aggregate("successful", &snapshot.successful))
        .with_child(unsuccessful)
        .with_child(aggregate("notModified", &snapshot.not_modified))
}

fn aggregate(name: &str, bucket: &Aggregate) -> Element {
    let mut element = Element::new(name)
        .with_attribute("count", bucket.count.to_string())
        .with_attribute("average", bucket.average_ms().to_string());
    if let Some(min) = &bucket.min {
        element.set_attribute("min", min.duration_ms.to_string());
        element.set_attribute("minStart", timestamp(min.at));
    }
    if let Some(max) = &bucket.max {
        element.set_attribute("max", max.duration_ms.to_string());
        element.set_attribute("maxStart", timestamp(max.at));
    }
    if let Some(last) = &bucket.last {
        element.set_attribute("lastStart", timestamp(last.at));
        element.set_attribute("lastDuration", last.duration_ms.to_string());
    }
    element
}

async fn check_links(api: &Api) -> FunctionResult {
    let reports = api.links().check().await;
    let mut data = Element::new("data");
    let mut failures = 0usize;
    for report in &reports {
        let mut check = Element::new("check")
            .with_attribute("url", report.url.as_str())
            .with_attribute("result", report.outcome.as_str())
            .with_attribute("duration", report.duration_ms.to_string());
        match &report.outcome {
            LinkOutcome::Success => {}
            LinkOutcome::Failure(reason) => {
                failures += 1;
                check.set_attribute("reason", reason.as_str());
            }
            LinkOutcome::Timeout => failures += 1,
        }
        data.add_child(check);
    }
    FunctionResult::success()
        .with_parameter("linkCount", reports.len().to_string())
        .with_parameter("failureCount", failures.to_string())
        .with_data(data)
}

fn property(name: &str, value: impl Into<String>) -> Element {
    Element::new("property").with_attribute("name", name).with_attribute("value", value)
}

fn settings(api: &Api) -> FunctionResult {
    let config = api.settings();

    let build = Element::new("build")
        .with_child(property("package", env!("CARGO_PKG_NAME")))
        .with_child(property("version", env!("CARGO_PKG_VERSION")))
        .with_child(property("api", api.name()))
        .with_child(property("api.version", api.spec().version.as_str()));

    let mut runtime = Element::new("runtime")
        .with_child(property("conventions", config.engine.conventions.join(",")))
        .with_child(property(
            "default_convention",
            config.engine.default_convention.clone().unwrap_or_default(),
        ))
        .with_child(property("interceptors", config.interceptors.order.join(",")))
        .with_child(property("acl.api", config.acl.api.as_str()))
        .with_child(property("acl.global", config.acl.global.as_str()))
        .with_child(property("links", config.links.urls.join(",")))
        .with_child(property("api.enabled", (!api.is_disabled()).to_string()));
    for (name, value) in &config.properties {
        runtime.add_child(property(&format!("property.{name}"), value.as_str()));
    }

    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    let system = Element::new("system")
        .with_child(property("os", std::env::consts::OS))
        .with_child(property("arch", std::env::consts::ARCH))
        .with_child(property("family", std::env::consts::FAMILY))
        .with_child(property("pid", std::process::id().to_string()))
        .with_child(property("cpus", cpus.to_string()));

    FunctionResult::success().with_data(
        Element::new("data").with_child(build).with_child(runtime).with_child(system),
    )
}

fn toggle_function(api: &Api, request: &FunctionRequest, enabled: bool) -> FunctionResult {
    match named_function(api, request, true) {
        Ok(Some(function)) => {
            function.set_enabled(enabled);
            FunctionResult::success()
        }
        Ok(None) => FunctionResult::success(),
        Err(invalid) => invalid,
    }
}

async fn reload(api: &Api) -> FunctionResult {
    let Some(reconfigure) = api.reconfigure() else {
        return FunctionResult::success().with_parameter("reloaded", "false");
    };
    match reconfigure.reload_if_changed().await {
        Ok(reloaded) => FunctionResult::success().with_parameter("reloaded", reloaded.to_string()),
        Err(e) => {
            warn!(api = api.name(), "reloading configuration failed: {}", e);
            FunctionResult::internal_error("ConfigError", &e.to_string(), "")
        }
    }
}

fn xsd_type(param_type: &ParamType) -> &'static str {
    match param_type {
        ParamType::Boolean => "xsd:boolean",
        ParamType::Int32 => "xsd:int",
        ParamType::Int64 => "xsd:long",
        ParamType::Float64 => "xsd:double",
        ParamType::Date => "xsd:date",
        ParamType::Timestamp => "xsd:dateTime",
        ParamType::Text | ParamType::Enum { .. } | ParamType::Pattern { .. } => "xsd:string",
    }
}

fn schema_element(name: &str, params: &[ParameterSpec], with_data: bool) -> Element {
    let mut sequence = Element::new("xsd:sequence");
    for param in params {
        sequence.add_child(
            Element::new("xsd:element")
                .with_attribute("name", param.name.as_str())
                .with_attribute("type", xsd_type(&param.param_type))
                .with_attribute("minOccurs", if param.required { "1" } else { "0" }),
        );
    }
    if with_data {
        let any = Element::new("xsd:any")
            .with_attribute("processContents", "lax")
            .with_attribute("minOccurs", "0")
            .with_attribute("maxOccurs", "unbounded");
        sequence.add_child(
            Element::new("xsd:element")
                .with_attribute("name", "data")
                .with_attribute("minOccurs", "0")
                .with_child(
                    Element::new("xsd:complexType")
                        .with_child(Element::new("xsd:sequence").with_child(any)),
                ),
        );
    }
    Element::new("xsd:element")
        .with_attribute("name", name)
        .with_child(Element::new("xsd:complexType").with_child(sequence))
}

fn soap_body() -> Element {
    Element::new("soap:body").with_attribute("use", "literal")
}

/// WSDL 1.1 document/literal description of the API
fn wsdl(spec: &ApiSpec) -> String {
    let namespace = format!("urn:{}", spec.name);
    let mut schema = Element::new("xsd:schema").with_attribute("targetNamespace", namespace.as_str());
    let mut messages = Vec::new();
    let mut port_type = Element::new("portType").with_attribute("name", format!("{}PortType", spec.name));
    let mut binding = Element::new("binding")
        .with_attribute("name", format!("{}Binding", spec.name))
        .with_attribute("type", format!("tns:{}PortType", spec.name))
        .with_child(
            Element::new("soap:binding")
                .with_attribute("style", "document")
                .with_attribute("transport", "http://schemas.xmlsoap.org/soap/http"),
        );

    for function in &spec.functions {
        let name = function.name.as_str();
        schema.add_child(schema_element(
            &format!("{name}Request"),
            &function.input,
            function.input_data.is_some(),
        ));
        schema.add_child(schema_element(
            &format!("{name}Response"),
            &function.output,
            function.output_data.is_some(),
        ));
        for (suffix, element) in [("Input", "Request"), ("Output", "Response")] {
            messages.push(
                Element::new("message").with_attribute("name", format!("{name}{suffix}")).with_child(
                    Element::new("part")
                        .with_attribute("name", "parameters")
                        .with_attribute("element", format!("tns:{name}{element}")),
                ),
            );
        }

        let mut operation = Element::new("operation").with_attribute("name", name);
        if !function.description.is_empty() {
            operation.add_child(Element::new("documentation").with_text(function.description.as_str()));
        }
        port_type.add_child(
            operation
                .with_child(Element::new("input").with_attribute("message", format!("tns:{name}Input")))
                .with_child(Element::new("output").with_attribute("message", format!("tns:{name}Output"))),
        );
        binding.add_child(
            Element::new("operation")
                .with_attribute("name", name)
                .with_child(Element::new("soap:operation").with_attribute("soapAction", name))
                .with_child(Element::new("input").with_child(soap_body()))
                .with_child(Element::new("output").with_child(soap_body())),
        );
    }

    let mut definitions = Element::new("definitions")
        .with_attribute("name", spec.name.as_str())
        .with_attribute("targetNamespace", namespace.as_str())
        .with_attribute("xmlns", "http://schemas.xmlsoap.org/wsdl/")
        .with_attribute("xmlns:soap", "http://schemas.xmlsoap.org/wsdl/soap/")
        .with_attribute("xmlns:xsd", "http://www.w3.org/2001/XMLSchema")
        .with_attribute("xmlns:tns", namespace.as_str())
        .with_child(Element::new("types").with_child(schema));
    for message in messages {
        definitions.add_child(message);
    }
    let service = Element::new("service").with_attribute("name", spec.name.as_str()).with_child(
        Element::new("port")
            .with_attribute("name", format!("{}Port", spec.name))
            .with_attribute("binding", format!("tns:{}Binding", spec.name))
            .with_child(Element::new("soap:address").with_attribute("location", namespace.as_str())),
    );
    definitions.add_child(port_type);
    definitions.add_child(binding);
    definitions.add_child(service);
    definitions.to_document()
}

fn smd_type(param_type: &ParamType) -> &'static str {
    match param_type {
        ParamType::Boolean => "boolean",
        ParamType::Int32 | ParamType::Int64 => "integer",
        ParamType::Float64 => "number",
        _ => "string",
    }
}

/// Simple Method Description (SMD 2.0) of the API for JSON-RPC 2.0 clients
fn smd(spec: &ApiSpec) -> String {
    let mut services = Map::new();
    for function in &spec.functions {
        let parameters: Vec<Value> = function
            .input
            .iter()
            .map(|param| {
                json!({
                    "name": param.name,
                    "type": smd_type(&param.param_type),
                    "optional": !param.required,
                })
            })
            .collect();
        let mut service = json!({
            "parameters": parameters,
            "returns": { "type": "object" },
        });
        if !function.description.is_empty() {
            service["description"] = Value::String(function.description.clone());
        }
        services.insert(function.name.clone(), service);
    }
    let smd = json!({
        "SMDVersion": "2.0",
        "id": format!("urn:{}", spec.name),
        "description": format!("{} {}", spec.name, spec.version),
        "transport": "POST",
        "envelope": "JSON-RPC-2.0",
        "services": services,
    });
    serde_json::to_string_pretty(&smd).unwrap_or_default()
}
