//! Validation of requests and results against their declared contract.
//!
//! Input validation runs before a handler is invoked and also filters the
//! parameters down to the declared ones. Output validation runs after the
//! handler returns. Both collect every defect instead of stopping at the
//! first one, so callers get a complete picture in one round trip.

use crate::protocol::model::{
    ComboKind, DataSectionSpec, Defect, ErrorCode, FunctionResult, FunctionSpec, InvalidMessage,
    ParamCombo, ParameterSpec, Parameters,
};
use crate::protocol::xml::Element;

/// Validates input parameters and the input data section
///
/// # Arguments
///
/// * `spec` - Declared contract of the function
/// * `parameters` - Parameters as received
/// * `data` - Input data section, if any
///
/// # Returns
///
/// The declared parameters that are present, in declaration order, or every
/// defect found.
pub fn validate_input(
    spec: &FunctionSpec,
    parameters: &Parameters,
    data: Option<&Element>,
) -> Result<Parameters, InvalidMessage> {
    let mut message = InvalidMessage::new();
    let mut accepted = Parameters::new();

    check_parameters(&spec.input, parameters, &mut message);
    for declared in &spec.input {
        if let Some(value) = parameters.get(&declared.name) {
            accepted.set(declared.name.as_str(), value);
        }
    }

    for combo in &spec.combos {
        if let Some(defect) = check_combo(combo, parameters) {
            message.push(defect);
        }
    }

    if let (Some(section), Some(data)) = (&spec.input_data, data) {
        check_data_section(section, data, &mut message);
    }

    if message.is_empty() {
        Ok(accepted)
    } else {
        Err(message)
    }
}

/// Validates a function's result
///
/// Framework error codes and not-modified results carry no declared output
/// and always pass. An application error code must be declared and its
/// output parameters must fit the declaration.
pub fn validate_output(spec: &FunctionSpec, result: &FunctionResult) -> Result<(), InvalidMessage> {
    let mut message = InvalidMessage::new();
    match result.error_code() {
        Some(code) if code.is_framework() => {}
        Some(ErrorCode::Application(code)) => match spec.error_code_spec(code) {
            Some(declared) => check_parameters(&declared.output, result.parameters(), &mut message),
            None => message.push(Defect::UndeclaredErrorCode { code: code.clone() }),
        },
        Some(_) => {}
        None if result.is_not_modified() => {}
        None => {
            check_parameters(&spec.output, result.parameters(), &mut message);
            if let (Some(section), Some(data)) = (&spec.output_data, result.data_section()) {
                check_data_section(section, data, &mut message);
            }
        }
    }
    if message.is_empty() {
        Ok(())
    } else {
        Err(message)
    }
}

fn check_parameters(declared: &[ParameterSpec], actual: &Parameters, message: &mut InvalidMessage) {
    for param in declared {
        match actual.get(&param.name) {
            None if param.required => message.missing(param.name.as_str()),
            None => {}
            Some(value) if !param.param_type.is_valid(value) => {
                message.invalid_value(param.name.as_str(), param.param_type.name())
            }
            Some(_) => {}
        }
    }
}

fn check_combo(combo: &ParamCombo, parameters: &Parameters) -> Option<Defect> {
    let set = combo.params.iter().filter(|p| parameters.contains(p)).count();
    let broken = match combo.kind {
        ComboKind::Exclusive => set != 1,
        ComboKind::Inclusive => set == 0,
        ComboKind::AllOrNone => set != 0 && set != combo.params.len(),
        ComboKind::NotAll => set == combo.params.len(),
    };
    broken.then(|| Defect::InvalidCombination {
        kind: combo.kind.as_str().to_string(),
        params: combo.params.clone(),
    })
}

/// Walks the data section; undeclared elements are left alone
fn check_data_section(section: &DataSectionSpec, data: &Element, message: &mut InvalidMessage) {
    for child in data.children() {
        if section.top_level.iter().any(|name| name == child.local_name()) {
            check_element(section, child, message);
        }
    }
}

fn check_element(section: &DataSectionSpec, element: &Element, message: &mut InvalidMessage) {
    let Some(declared) = section.element(element.local_name()) else {
        return;
    };
    for attribute in &declared.attributes {
        match element.attribute(&attribute.name) {
            None if attribute.required => message.push(Defect::MissingParameter {
                param: attribute.name.clone(),
                element: Some(declared.name.clone()),
            }),
            None => {}
            Some(value) if !attribute.param_type.is_valid(value) => {
                message.push(Defect::InvalidValueForType {
                    param: attribute.name.clone(),
                    type_name: attribute.param_type.name().into_owned(),
                    element: Some(declared.name.clone()),
                })
            }
            Some(_) => {}
        }
    }
    for child in element.children() {
        if declared.children.iter().any(|name| name == child.local_name()) {
            check_element(section, child, message);
        }
    }
}
