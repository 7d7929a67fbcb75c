//! SOAP 1.1 calling convention with a flat mapping.
//!
//! The body holds one element `{Function}Request` whose leaf children are the
//! input parameters and whose optional `data` child is the data section. The
//! response element is `{Function}Response` in the `urn:{api}` namespace.
//! Errors become a SOAP fault with HTTP status 500: `soap:Client` when the
//! request was invalid, `soap:Server` otherwise.
//!
//! Dates and timestamps travel in XML Schema notation (`2024-01-31`,
//! `2024-01-31T12:00:00`) and are converted from and to the canonical
//! compact notation using the declared parameter types.

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::ConventionError;
use crate::protocol::convention::{clean_up_parameters, CallingConvention, Inbound, Method, Outbound};
use crate::protocol::model::{
    ApiSpec, Backpack, ErrorCode, FunctionRequest, FunctionResult, FunctionSpec, ParamType,
    Parameters,
};
use crate::protocol::xml::Element;

/// Namespace of the SOAP 1.1 envelope
pub const ENVELOPE_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Generic SOAP calling convention
#[derive(Clone, Copy, Debug, Default)]
pub struct Soap;

impl CallingConvention for Soap {
    fn name(&self) -> &'static str {
        "soap"
    }

    fn supported_methods(&self) -> &'static [Method] {
        &[Method::Post, Method::Options]
    }

    fn matches(&self, inbound: &Inbound) -> bool {
        is_envelope(inbound)
    }

    fn convert_request(
        &self,
        inbound: &Inbound,
        api: &ApiSpec,
    ) -> Result<FunctionRequest, ConventionError> {
        let (name, element) = request_element(inbound)?;
        let declared = api.find(&name);
        let mut parameters = Parameters::new();
        let mut data = None;
        for child in element.children() {
            let local = child.local_name();
            if local == "data" {
                data = Some(strip_prefixes(child, "data"));
            } else if !child.children().is_empty() {
                return Err(ConventionError::invalid(format!("parameter {local} must be a leaf element")));
            } else {
                let declared_type = declared.and_then(|f| f.input_param(local)).map(|p| &p.param_type);
                parameters.set(local, from_xsd(child.text_or_empty(), declared_type));
            }
        }
        FunctionRequest::new(name, clean_up_parameters(&parameters), data)
    }

    fn convert_result(&self, result: &FunctionResult, backpack: &Backpack, api: &ApiSpec) -> Outbound {
        let function = backpack.function.as_deref().unwrap_or_default();
        let declared = api.find(function);
        let mut content = Vec::new();
        for (name, value) in result.parameters().iter() {
            let param_type = output_type(declared, result, name);
            content.push(Element::new(name).with_text(to_xsd(value, param_type)));
        }
        if let Some(data) = result.data_section() {
            content.push(data.renamed("data"));
        }
        respond(result, function, api, content)
    }

    fn render_request(&self, request: &FunctionRequest) -> Inbound {
        let mut element = request_wrapper(request.name());
        for (name, value) in request.parameters().iter() {
            element.add_child(Element::new(name).with_text(value));
        }
        if let Some(data) = request.data_section() {
            element.add_child(data.renamed("data"));
        }
        Inbound::post_xml(envelope(element))
    }
}

/// True for a SOAP envelope with a body
pub(crate) fn is_envelope(inbound: &Inbound) -> bool {
    inbound
        .body
        .as_xml()
        .is_some_and(|root| root.local_name() == "Envelope" && root.child("Body").is_some())
}

/// Function name and request element of a SOAP envelope
pub(crate) fn request_element(inbound: &Inbound) -> Result<(String, &Element), ConventionError> {
    let root = inbound
        .body
        .as_xml()
        .filter(|root| root.local_name() == "Envelope")
        .ok_or_else(|| ConventionError::invalid("SOAP envelope expected"))?;
    let body = root.child("Body").ok_or_else(|| ConventionError::invalid("SOAP body missing"))?;
    let element = match body.children() {
        [element] => element,
        [] => return Err(ConventionError::FunctionNotSpecified),
        _ => return Err(ConventionError::invalid("SOAP body must hold exactly one element")),
    };
    let local = element.local_name();
    let name = local.strip_suffix("Request").unwrap_or(local);
    Ok((name.to_string(), element))
}

/// Copy of a data section element with every namespace prefix removed
pub(crate) fn strip_prefixes(element: &Element, name: &str) -> Element {
    let mut copy = Element::new(name);
    for (attribute, value) in element.plain_attributes() {
        copy.set_attribute(attribute, value);
    }
    if let Some(text) = element.text() {
        copy.set_text(text);
    }
    for child in element.children() {
        copy.add_child(strip_prefixes(child, child.local_name()));
    }
    copy
}

/// Empty `{Function}Request` element
pub(crate) fn request_wrapper(function: &str) -> Element {
    Element::new(format!("ns0:{function}Request")).with_attribute("xmlns:ns0", "urn:switchyard")
}

/// Wraps a body element into a SOAP envelope
pub(crate) fn envelope(body_element: Element) -> Element {
    Element::new("soap:Envelope")
        .with_attribute("xmlns:soap", ENVELOPE_NAMESPACE)
        .with_child(Element::new("soap:Body").with_child(body_element))
}

/// Builds the response or fault envelope holding `content`
pub(crate) fn respond(
    result: &FunctionResult,
    function: &str,
    api: &ApiSpec,
    content: Vec<Element>,
) -> Outbound {
    let namespace = format!("urn:{}", api.name);
    match result.error_code() {
        None => {
            let mut response = Element::new(format!("ns0:{function}Response"))
                .with_attribute("xmlns:ns0", namespace);
            for element in content {
                response.add_child(element);
            }
            Outbound::xml(200, envelope(response))
        }
        Some(code) => {
            let fault_code = match code {
                ErrorCode::InvalidRequest => "soap:Client",
                _ => "soap:Server",
            };
            let mut fault = Element::new("soap:Fault")
                .with_child(Element::new("faultcode").with_text(fault_code))
                .with_child(Element::new("faultstring").with_text(code.as_str()));
            if !content.is_empty() {
                let mut detail = Element::new(format!("ns0:{function}Fault"))
                    .with_attribute("xmlns:ns0", namespace);
                for element in content {
                    detail.add_child(element);
                }
                fault.add_child(Element::new("detail").with_child(detail));
            }
            Outbound::xml(500, envelope(fault))
        }
    }
}

/// Declared type of an output parameter of a successful result or an error code
pub(crate) fn output_type<'a>(
    declared: Option<&'a FunctionSpec>,
    result: &FunctionResult,
    name: &str,
) -> Option<&'a ParamType> {
    let declared = declared?;
    let param = match result.error_code() {
        None => declared.output_param(name),
        Some(code) => declared
            .error_code_spec(code.as_str())
            .and_then(|e| e.output.iter().find(|p| p.name == name)),
    };
    param.map(|p| &p.param_type)
}

/// Converts an XML Schema date into the canonical notation
pub(crate) fn from_xsd(value: &str, declared: Option<&ParamType>) -> String {
    let converted = match declared {
        Some(ParamType::Date) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .map(|d| d.format("%Y%m%d").to_string()),
        Some(ParamType::Timestamp) => NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|d| d.format("%Y%m%d%H%M%S").to_string()),
        _ => None,
    };
    converted.unwrap_or_else(|| value.to_string())
}

/// Converts a canonical date into XML Schema notation
pub(crate) fn to_xsd(value: &str, declared: Option<&ParamType>) -> String {
    let converted = match declared {
        Some(ParamType::Date) => NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .map(|d| d.format("%Y-%m-%d").to_string()),
        Some(ParamType::Timestamp) => NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S")
            .ok()
            .map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string()),
        _ => None,
    };
    converted.unwrap_or_else(|| value.to_string())
}
