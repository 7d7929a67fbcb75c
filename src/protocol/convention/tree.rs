//! Mapping between data section trees and JSON values.
//!
//! JSON based conventions carry the data section as a JSON object:
//! attributes become string members, the text becomes a `pcdata` member and
//! child elements are grouped into arrays named after the element.

use serde_json::{Map, Value};

use crate::error::ConventionError;
use crate::protocol::xml::Element;

/// Member name holding the text content of an element
pub const PCDATA: &str = "pcdata";

/// Converts an element into a JSON object
pub fn element_to_json(element: &Element) -> Value {
    let mut object = Map::new();
    for (name, value) in element.plain_attributes() {
        object.insert(name.to_string(), Value::String(value.to_string()));
    }
    if let Some(text) = element.text() {
        object.insert(PCDATA.to_string(), Value::String(text.to_string()));
    }
    for child in element.children() {
        let entry = object
            .entry(child.local_name().to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => items.push(element_to_json(child)),
            // an attribute already took the name
            other => *other = Value::Array(vec![element_to_json(child)]),
        }
    }
    Value::Object(object)
}

/// Converts a JSON object into an element called `name`
///
/// Scalars become attributes, arrays of objects and nested objects become
/// child elements.
pub fn json_to_element(name: &str, value: &Value) -> Result<Element, ConventionError> {
    let Value::Object(members) = value else {
        return Err(ConventionError::invalid(format!("element {name} must be a JSON object")));
    };
    let mut element = Element::new(name);
    for (key, member) in members {
        match member {
            Value::Null => {}
            Value::String(s) if key == PCDATA => element.set_text(s.as_str()),
            Value::String(s) => element.set_attribute(key.as_str(), s.as_str()),
            Value::Bool(b) => element.set_attribute(key.as_str(), b.to_string()),
            Value::Number(n) => element.set_attribute(key.as_str(), n.to_string()),
            Value::Object(_) => element.add_child(json_to_element(key, member)?),
            Value::Array(items) => {
                for item in items {
                    element.add_child(json_to_element(key, item)?);
                }
            }
        }
    }
    Ok(element)
}
