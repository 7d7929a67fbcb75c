//! XML-RPC calling convention.
//!
//! The first parameter of a `methodCall` must be a struct. Its scalar members
//! become input parameters; members holding an array of structs become data
//! section elements named after the member. Responses carry a single struct
//! whose member types follow the declared output parameters. Errors are
//! reported as faults with a fixed numeric code and the error code as
//! `faultString`, always with HTTP status 200.

use chrono::NaiveDateTime;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::ToPrimitive;

use crate::error::ConventionError;
use crate::protocol::convention::{
    clean_up_parameters, CallingConvention, Inbound, Method, Outbound,
};
use crate::protocol::model::{
    ApiSpec, Backpack, ErrorCode, FunctionRequest, FunctionResult, ParamType, Parameters,
};
use crate::protocol::xml::Element;

const XMLRPC_DATE_FORMAT: &str = "%Y%m%dT%H:%M:%S";

/// Numeric fault codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum FaultCode {
    DisabledFunction = 1,
    InternalError = 2,
    InvalidRequest = 3,
    InvalidResponse = 4,
    Other = 99,
}

impl FaultCode {
    /// Fault code reported for an error code
    pub fn for_error_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::DisabledFunction => Self::DisabledFunction,
            ErrorCode::InternalError => Self::InternalError,
            ErrorCode::InvalidRequest => Self::InvalidRequest,
            ErrorCode::InvalidResponse => Self::InvalidResponse,
            _ => Self::Other,
        }
    }
}

/// XML-RPC calling convention
#[derive(Clone, Copy, Debug, Default)]
pub struct XmlRpc;

impl CallingConvention for XmlRpc {
    fn name(&self) -> &'static str {
        "xml-rpc"
    }

    fn supported_methods(&self) -> &'static [Method] {
        &[Method::Post, Method::Options]
    }

    fn matches(&self, inbound: &Inbound) -> bool {
        inbound.body.as_xml().is_some_and(|root| root.local_name() == "methodCall")
    }

    fn convert_request(
        &self,
        inbound: &Inbound,
        api: &ApiSpec,
    ) -> Result<FunctionRequest, ConventionError> {
        let root = inbound
            .body
            .as_xml()
            .filter(|root| root.local_name() == "methodCall")
            .ok_or_else(|| ConventionError::invalid("<methodCall> expected"))?;
        let name = root.child("methodName").map(Element::text_or_empty).unwrap_or_default();
        let declared = api.find(name);

        let mut parameters = Parameters::new();
        let mut data = None;
        let first = root.child("params").and_then(|params| params.child("param"));
        if let Some(param) = first {
            let value = param
                .child("value")
                .ok_or_else(|| ConventionError::invalid("<param> without a <value>"))?;
            let members = value
                .child("struct")
                .ok_or_else(|| ConventionError::invalid("the first parameter must be a struct"))?;
            for member in members.children_named("member") {
                let (member_name, value) = member_parts(member)?;
                if let Some(array) = value.child("array") {
                    let section = data.get_or_insert_with(|| Element::new("data"));
                    for item in array_values(array) {
                        section.add_child(struct_to_element(member_name, item)?);
                    }
                    continue;
                }
                let declared_type = declared
                    .and_then(|f| f.input_param(member_name))
                    .map(|p| &p.param_type);
                parameters.set(member_name, scalar_from_value(member_name, value, declared_type)?);
            }
        }
        FunctionRequest::new(name, clean_up_parameters(&parameters), data)
    }

    fn convert_result(
        &self,
        result: &FunctionResult,
        backpack: &Backpack,
        api: &ApiSpec,
    ) -> Outbound {
        let response = match result.error_code() {
            Some(code) => {
                let fault = FaultCode::for_error_code(code);
                let members = Element::new("struct")
                    .with_child(member(
                        "faultCode",
                        typed_value("i4", fault.to_i32().unwrap_or(99).to_string()),
                    ))
                    .with_child(member("faultString", typed_value("string", code.as_str())));
                Element::new("methodResponse")
                    .with_child(Element::new("fault").with_child(Element::new("value").with_child(members)))
            }
            None => {
                let declared = backpack.function.as_deref().and_then(|name| api.find(name));
                let mut members = Element::new("struct");
                for (name, value) in result.parameters().iter() {
                    let param_type = declared.and_then(|f| f.output_param(name)).map(|p| &p.param_type);
                    members.add_child(member(name, scalar_to_value(value, param_type)));
                }
                if let Some(data) = result.data_section() {
                    append_data_members(&mut members, data);
                }
                Element::new("methodResponse").with_child(
                    Element::new("params").with_child(
                        Element::new("param").with_child(Element::new("value").with_child(members)),
                    ),
                )
            }
        };
        Outbound::xml(200, response)
    }

    fn render_request(&self, request: &FunctionRequest) -> Inbound {
        let mut members = Element::new("struct");
        for (name, value) in request.parameters().iter() {
            members.add_child(member(name, typed_value("string", value)));
        }
        if let Some(data) = request.data_section() {
            append_data_members(&mut members, data);
        }
        let call = Element::new("methodCall")
            .with_child(Element::new("methodName").with_text(request.name()))
            .with_child(Element::new("params").with_child(
                Element::new("param").with_child(Element::new("value").with_child(members)),
            ));
        Inbound::post_xml(call)
    }
}

fn member_parts(member: &Element) -> Result<(&str, &Element), ConventionError> {
    let name = member
        .child("name")
        .map(Element::text_or_empty)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ConventionError::invalid("struct member without a name"))?;
    let value = member
        .child("value")
        .ok_or_else(|| ConventionError::invalid(format!("struct member {name} without a value")))?;
    Ok((name, value))
}

fn array_values(array: &Element) -> impl Iterator<Item = &Element> {
    array.child("data").into_iter().flat_map(|data| data.children_named("value"))
}

/// Converts one array item into a data section element
fn struct_to_element(name: &str, value: &Element) -> Result<Element, ConventionError> {
    let members = value
        .child("struct")
        .ok_or_else(|| ConventionError::invalid(format!("items of {name} must be structs")))?;
    let mut element = Element::new(name);
    for member in members.children_named("member") {
        let (member_name, value) = member_parts(member)?;
        if let Some(array) = value.child("array") {
            for item in array_values(array) {
                element.add_child(struct_to_element(member_name, item)?);
            }
        } else if member_name == super::tree::PCDATA {
            element.set_text(scalar_from_value(member_name, value, None)?);
        } else {
            element.set_attribute(member_name, scalar_from_value(member_name, value, None)?);
        }
    }
    Ok(element)
}

/// Reads a scalar value, normalizing booleans and dates to their canonical text
fn scalar_from_value(
    name: &str,
    value: &Element,
    declared: Option<&ParamType>,
) -> Result<String, ConventionError> {
    let Some(typed) = value.children().first() else {
        return Ok(value.text_or_empty().to_string());
    };
    let text = typed.text_or_empty().trim();
    match typed.local_name() {
        "string" => Ok(typed.text_or_empty().to_string()),
        "boolean" => match text {
            "1" => Ok("true".to_string()),
            "0" => Ok("false".to_string()),
            _ => Err(ConventionError::invalid(format!("{name}: invalid boolean {text}"))),
        },
        "int" | "i4" | "i8" | "double" | "base64" => Ok(text.to_string()),
        "dateTime.iso8601" => {
            let date = NaiveDateTime::parse_from_str(text, XMLRPC_DATE_FORMAT)
                .map_err(|e| ConventionError::invalid(format!("{name}: invalid date {text}: {e}")))?;
            let format = match declared {
                Some(ParamType::Date) => "%Y%m%d",
                _ => "%Y%m%d%H%M%S",
            };
            Ok(date.format(format).to_string())
        }
        other => Err(ConventionError::invalid(format!("{name}: unsupported value type {other}"))),
    }
}

/// Renders a canonical value using the XML-RPC type matching its declaration
fn scalar_to_value(value: &str, declared: Option<&ParamType>) -> Element {
    match declared {
        Some(ParamType::Boolean) => typed_value("boolean", if value == "true" { "1" } else { "0" }),
        Some(ParamType::Int32) => typed_value("i4", value),
        Some(ParamType::Float64) => typed_value("double", value),
        Some(ParamType::Date) => match chrono::NaiveDate::parse_from_str(value, "%Y%m%d") {
            Ok(date) => typed_value("dateTime.iso8601", date.format("%Y%m%dT00:00:00").to_string()),
            Err(_) => typed_value("string", value),
        },
        Some(ParamType::Timestamp) => match NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S") {
            Ok(date) => typed_value("dateTime.iso8601", date.format(XMLRPC_DATE_FORMAT).to_string()),
            Err(_) => typed_value("string", value),
        },
        _ => typed_value("string", value),
    }
}

/// Adds one array member per distinct top level element name
fn append_data_members(members: &mut Element, data: &Element) {
    let mut names: Vec<&str> = Vec::new();
    for child in data.children() {
        if !names.contains(&child.local_name()) {
            names.push(child.local_name());
        }
    }
    for name in names {
        let mut items = Element::new("data");
        for child in data.children_named(name) {
            items.add_child(Element::new("value").with_child(element_to_struct(child)));
        }
        members.add_child(member(name, Element::new("value").with_child(Element::new("array").with_child(items))));
    }
}

fn element_to_struct(element: &Element) -> Element {
    let mut members = Element::new("struct");
    for (name, value) in element.plain_attributes() {
        members.add_child(member(name, typed_value("string", value)));
    }
    if let Some(text) = element.text() {
        members.add_child(member(super::tree::PCDATA, typed_value("string", text)));
    }
    append_data_members(&mut members, element);
    members
}

fn member(name: &str, value: Element) -> Element {
    Element::new("member").with_child(Element::new("name").with_text(name)).with_child(value)
}

fn typed_value(type_name: &str, text: impl Into<String>) -> Element {
    Element::new("value").with_child(Element::new(type_name).with_text(text))
}
