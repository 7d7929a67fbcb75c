//! Calling conventions: one adapter per wire protocol.
//!
//! A calling convention decides whether it can read an inbound message,
//! converts it into a [`FunctionRequest`] and renders a [`FunctionResult`]
//! back into the same wire format. Transports hand over an [`Inbound`]
//! envelope whose payload is already parsed (an XML element tree or a JSON
//! value) and receive an [`Outbound`] envelope that [`Outbound::render`]
//! turns into response text.
//!
//! Conventions are stateless and shared between all workers. Logic common to
//! several conventions lives in plain functions in this module:
//! [`status_for`] maps results onto HTTP status codes and
//! [`clean_up_parameters`] drops the entries that never reach a function.
//!
//! Available conventions, in detection order:
//! - `standard`: flat HTTP parameters, `_function` names the function
//! - `xml`: generic `<request function="..">` envelope
//! - `xml-rpc`
//! - `json-rpc-2.0`, `json-rpc-1.1`, `json-rpc-1.0`
//! - `soap`: flat SOAP mapping
//! - `soap-map`: structural SOAP mapping driven by the declared contract

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use crate::error::ConventionError;
use crate::protocol::model::{
    ApiSpec, Backpack, ErrorCode, FunctionRequest, FunctionResult, Parameters, FORWARDED_MARKER,
};
use crate::protocol::xml::Element;
use crate::server::meta::MetaFunction;

mod jsonrpc;
mod jsonrpc2;
mod registry;
mod soap;
mod soap_map;
mod standard;
pub mod tree;
mod xml_envelope;
mod xmlrpc;

pub use jsonrpc::{JsonRpc1, JsonRpcVersion};
pub use jsonrpc2::JsonRpc2;
pub use registry::{ConventionRegistry, BUILT_IN};
pub use soap::Soap;
pub use soap_map::SoapMap;
pub use standard::Standard;
pub use xml_envelope::XmlEnvelope;
pub use xmlrpc::{FaultCode, XmlRpc};

/// Content type of XML responses
pub const XML_CONTENT_TYPE: &str = "text/xml; charset=UTF-8";

/// Content type of JSON responses
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Parameter that explicitly selects a convention
pub const CONVENTION_PARAMETER: &str = "_convention";

/// HTTP request method
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Head,
    Options,
    Put,
    Delete,
    Patch,
    Trace,
}

impl Method {
    /// Upper case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ConventionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "TRACE" => Ok(Self::Trace),
            other => Err(ConventionError::invalid(format!("unknown method {other}"))),
        }
    }
}

/// Parsed message body
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Payload {
    /// No body
    #[default]
    Empty,
    /// XML document, represented by its root element
    Xml(Element),
    /// JSON document
    Json(Value),
}

impl Payload {
    /// Root element of an XML body
    pub fn as_xml(&self) -> Option<&Element> {
        match self {
            Self::Xml(root) => Some(root),
            _ => None,
        }
    }

    /// JSON body
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Inbound message as handed over by a transport
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    /// Request method
    pub method: Method,
    /// Declared content type of the body
    pub content_type: Option<String>,
    /// Query string and form parameters
    pub parameters: Parameters,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// Parsed body
    pub body: Payload,
    /// The standard convention's `_data` parameter, already parsed
    pub embedded_data: Option<Element>,
}

impl Inbound {
    /// Message with the given method and nothing else
    pub fn new(method: Method) -> Self {
        Self {
            method,
            content_type: None,
            parameters: Parameters::new(),
            headers: Vec::new(),
            body: Payload::Empty,
            embedded_data: None,
        }
    }

    /// GET request carrying only parameters
    pub fn get(parameters: Parameters) -> Self {
        Self { parameters, ..Self::new(Method::Get) }
    }

    /// POST request with an XML body
    pub fn post_xml(root: Element) -> Self {
        Self {
            content_type: Some(XML_CONTENT_TYPE.to_string()),
            body: Payload::Xml(root),
            ..Self::new(Method::Post)
        }
    }

    /// POST request with a JSON body
    pub fn post_json(value: Value) -> Self {
        Self {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            body: Payload::Json(value),
            ..Self::new(Method::Post)
        }
    }

    /// Replaces the method
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds a query string or form parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.set(name, value);
        self
    }

    /// Adds a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of a header, compared case insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

/// Outbound message handed back to the transport
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    /// HTTP status code
    pub status: u16,
    /// Content type of the body, `None` when there is no body
    pub content_type: Option<&'static str>,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Payload,
}

impl Outbound {
    /// Response without a body
    pub fn empty(status: u16) -> Self {
        Self { status, content_type: None, headers: Vec::new(), body: Payload::Empty }
    }

    /// XML response
    pub fn xml(status: u16, root: Element) -> Self {
        Self {
            status,
            content_type: Some(XML_CONTENT_TYPE),
            headers: Vec::new(),
            body: Payload::Xml(root),
        }
    }

    /// JSON response
    pub fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            content_type: Some(JSON_CONTENT_TYPE),
            headers: Vec::new(),
            body: Payload::Json(value),
        }
    }

    /// Adds a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of a header, compared case insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// Drops the body, keeping status and headers
    pub fn without_body(mut self) -> Self {
        self.body = Payload::Empty;
        self.content_type = None;
        self
    }

    /// Serializes the body
    pub fn render(&self) -> String {
        match &self.body {
            Payload::Empty => String::new(),
            Payload::Xml(root) => root.to_document(),
            Payload::Json(value) => value.to_string(),
        }
    }
}

/// Capability shared by all wire protocol adapters
pub trait CallingConvention: Send + Sync {
    /// Registered name of the convention
    fn name(&self) -> &'static str;

    /// Request methods the convention accepts
    fn supported_methods(&self) -> &'static [Method];

    /// Decides whether the message is written in this convention
    ///
    /// Must not fail; the registry treats a panic as "no match".
    fn matches(&self, inbound: &Inbound) -> bool;

    /// Converts the message into a canonical request
    fn convert_request(
        &self,
        inbound: &Inbound,
        api: &ApiSpec,
    ) -> Result<FunctionRequest, ConventionError>;

    /// Renders a result in this convention
    fn convert_result(&self, result: &FunctionResult, backpack: &Backpack, api: &ApiSpec)
        -> Outbound;

    /// Renders a canonical request as an inbound message of this convention
    fn render_request(&self, request: &FunctionRequest) -> Inbound;

    /// Identifier the caller gave the message, read without converting it
    ///
    /// Lets a refusal of an unconvertible message still answer the caller's
    /// id. Conventions without request ids keep the default.
    fn request_id(&self, _inbound: &Inbound) -> Option<Value> {
        None
    }
}

/// `id` member of a JSON object body
pub(crate) fn json_request_id(inbound: &Inbound) -> Option<Value> {
    match inbound.body.as_json() {
        Some(Value::Object(object)) => object.get("id").cloned(),
        _ => None,
    }
}

/// HTTP status code of a result
///
/// Application error codes are regular answers and map to 200.
pub fn status_for(result: &FunctionResult) -> u16 {
    match result.error_code() {
        None if result.is_not_modified() => 304,
        None => 200,
        Some(ErrorCode::InvalidRequest) => 400,
        Some(ErrorCode::AccessDenied) => 403,
        Some(ErrorCode::NoSuchFunction) => 404,
        Some(ErrorCode::InvalidResponse | ErrorCode::InternalError) => 500,
        Some(ErrorCode::DisabledFunction) => 503,
        Some(ErrorCode::Application(_)) => 200,
    }
}

/// Drops parameters that never reach a function
///
/// Entries with an empty name or value go, as do framework parameters
/// (leading underscore) other than the forwarding marker.
pub fn clean_up_parameters(parameters: &Parameters) -> Parameters {
    parameters
        .iter()
        .filter(|(name, value)| !name.is_empty() && !value.is_empty())
        .filter(|(name, _)| !name.starts_with('_') || *name == FORWARDED_MARKER)
        .collect()
}

/// Converts a JSON scalar into its parameter text; `None` for null
pub(crate) fn json_scalar(name: &str, value: &Value) -> Result<Option<String>, ConventionError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Array(_) | Value::Object(_) => {
            Err(ConventionError::invalid(format!("parameter {name} must be a scalar value")))
        }
    }
}

/// Names positional arguments of `method` are bound to
///
/// Declared functions use their input parameters, meta-functions their fixed
/// argument list. Anything else has none and is left to dispatch to refuse.
fn positional_names<'a>(method: &str, api: &'a ApiSpec) -> Vec<&'a str> {
    match api.find(method) {
        Some(function) => function.input.iter().map(|param| param.name.as_str()).collect(),
        None => MetaFunction::from_name(method)
            .map(|meta| meta.parameter_names().to_vec())
            .unwrap_or_default(),
    }
}

/// Converts JSON parameters, positional or named, into a canonical request
///
/// Positional values are assigned to the declared input parameters in order;
/// surplus values are dropped like any undeclared parameter. A `data` member
/// of named parameters becomes the data section.
pub(crate) fn json_request(
    method: &str,
    params: Option<&Value>,
    api: &ApiSpec,
) -> Result<FunctionRequest, ConventionError> {
    let mut parameters = Parameters::new();
    let mut data = None;
    match params {
        None | Some(Value::Null) => {}
        Some(Value::Array(values)) => {
            let names = positional_names(method, api);
            if values.len() > names.len() {
                debug!(
                    method,
                    given = values.len(),
                    bound = names.len(),
                    "surplus positional parameters dropped"
                );
            }
            for (name, value) in names.into_iter().zip(values) {
                if let Some(text) = json_scalar(name, value)? {
                    parameters.set(name, text);
                }
            }
        }
        Some(Value::Object(members)) => {
            for (name, value) in members {
                if name == "data" && value.is_object() {
                    data = Some(tree::json_to_element("data", value)?);
                } else if let Some(text) = json_scalar(name, value)? {
                    parameters.set(name.as_str(), text);
                }
            }
        }
        Some(_) => return Err(ConventionError::invalid("params must be an array or an object")),
    }
    FunctionRequest::new(method, clean_up_parameters(&parameters), data)
}

/// JSON object holding the output parameters and the data section
pub(crate) fn json_result_object(result: &FunctionResult) -> Value {
    let mut object = serde_json::Map::new();
    for (name, value) in result.parameters().iter() {
        object.insert(name.to_string(), Value::String(value.to_string()));
    }
    if let Some(data) = result.data_section() {
        object.insert("data".to_string(), tree::element_to_json(data));
    }
    Value::Object(object)
}

/// JSON object holding the parameters and data section of a request
pub(crate) fn json_request_params(request: &FunctionRequest) -> Value {
    let mut object = serde_json::Map::new();
    for (name, value) in request.parameters().iter() {
        object.insert(name.to_string(), Value::String(value.to_string()));
    }
    if let Some(data) = request.data_section() {
        object.insert("data".to_string(), tree::element_to_json(data));
    }
    Value::Object(object)
}

/// XML result document shared by the standard and the XML envelope conventions
pub(crate) fn result_element(result: &FunctionResult) -> Element {
    let mut root = Element::new("result");
    if let Some(code) = result.error_code() {
        root.set_attribute("errorcode", code.as_str());
    }
    for (name, value) in result.parameters().iter() {
        root.add_child(Element::new("param").with_attribute("name", name).with_text(value));
    }
    if let Some(data) = result.data_section() {
        root.add_child(data.renamed("data"));
    }
    root
}
