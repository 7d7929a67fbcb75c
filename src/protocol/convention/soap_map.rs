//! SOAP calling convention with a structural mapping.
//!
//! Unlike the flat [`Soap`](super::Soap) convention, the request element may
//! nest elements freely. The declared contract decides how they map:
//!
//! - a leaf whose dotted path (`address.street`) names a declared input
//!   parameter becomes that parameter,
//! - an element named after a declared data section element becomes a data
//!   element; its leaf children become attributes when the element declares
//!   an attribute of that name,
//! - a `data` element wraps data elements,
//! - any other element with children is walked with its name appended to the
//!   path.
//!
//! Elements that fit none of these are skipped with a warning. Results are
//! rendered with the reverse mapping: dotted output parameters become nested
//! elements and data element attributes become child elements.
//!
//! Its envelopes look exactly like those of [`Soap`](super::Soap), which comes
//! first in detection order. While both are enabled this convention is only
//! selected by an explicit `_convention=soap-map` or as the configured
//! default convention.

use tracing::warn;

use crate::error::ConventionError;
use crate::protocol::convention::soap::{
    envelope, from_xsd, is_envelope, output_type, request_element, request_wrapper, respond,
    to_xsd,
};
use crate::protocol::convention::{clean_up_parameters, CallingConvention, Inbound, Method, Outbound};
use crate::protocol::model::{
    ApiSpec, Backpack, DataSectionSpec, ElementSpec, FunctionRequest, FunctionResult, FunctionSpec,
    Parameters,
};
use crate::protocol::xml::Element;

/// Structurally mapping SOAP calling convention
#[derive(Clone, Copy, Debug, Default)]
pub struct SoapMap;

impl CallingConvention for SoapMap {
    fn name(&self) -> &'static str {
        "soap-map"
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
        let mut mapper = Mapper {
            declared: api.find(&name),
            parameters: Parameters::new(),
            data: Vec::new(),
        };
        mapper.map_children(element, None);

        let Mapper { parameters, data, .. } = mapper;
        let data = (!data.is_empty()).then(|| {
            let mut section = Element::new("data");
            for child in data {
                section.add_child(child);
            }
            section
        });
        FunctionRequest::new(name, clean_up_parameters(&parameters), data)
    }

    fn convert_result(&self, result: &FunctionResult, backpack: &Backpack, api: &ApiSpec) -> Outbound {
        let function = backpack.function.as_deref().unwrap_or_default();
        let declared = api.find(function);
        let mut holder = Element::new("holder");
        for (name, value) in result.parameters().iter() {
            let param_type = output_type(declared, result, name);
            insert_dotted(&mut holder, name, to_xsd(value, param_type));
        }
        if let Some(data) = result.data_section() {
            for child in data.children() {
                holder.add_child(unmap_data_element(child));
            }
        }
        respond(result, function, api, holder.children().to_vec())
    }

    fn render_request(&self, request: &FunctionRequest) -> Inbound {
        let mut element = request_wrapper(request.name());
        for (name, value) in request.parameters().iter() {
            insert_dotted(&mut element, name, value.to_string());
        }
        if let Some(data) = request.data_section() {
            for child in data.children() {
                element.add_child(unmap_data_element(child));
            }
        }
        Inbound::post_xml(envelope(element))
    }
}

struct Mapper<'a> {
    declared: Option<&'a FunctionSpec>,
    parameters: Parameters,
    data: Vec<Element>,
}

impl<'a> Mapper<'a> {
    fn section(&self) -> Option<&'a DataSectionSpec> {
        self.declared.and_then(|f| f.input_data.as_ref())
    }

    fn map_children(&mut self, element: &Element, path: Option<&str>) {
        for child in element.children() {
            self.map_element(child, path);
        }
    }

    fn map_element(&mut self, element: &Element, path: Option<&str>) {
        let local = element.local_name();
        let full = match path {
            Some(path) => format!("{path}.{local}"),
            None => local.to_string(),
        };

        let input = self.declared.and_then(|f| f.input_param(&full));
        if let Some(param) = input.filter(|_| element.children().is_empty()) {
            let value = from_xsd(element.text_or_empty(), Some(&param.param_type));
            self.parameters.set(full, value);
            return;
        }
        if local == "data" {
            for child in element.children() {
                self.map_data_child(child);
            }
            return;
        }
        if let Some(spec) = self.section().and_then(|s| s.element(local)) {
            let mapped = map_data_element(element, spec, self.section());
            self.data.push(mapped);
            return;
        }
        if !element.children().is_empty() {
            self.map_children(element, Some(&full));
            return;
        }
        if self.declared.is_none() {
            self.parameters.set(full, element.text_or_empty());
            return;
        }
        warn!(element = %full, "skipping unmapped SOAP element");
    }

    fn map_data_child(&mut self, element: &Element) {
        match self.section().and_then(|s| s.element(element.local_name())) {
            Some(spec) => {
                let mapped = map_data_element(element, spec, self.section());
                self.data.push(mapped);
            }
            None => warn!(element = element.local_name(), "skipping undeclared data element"),
        }
    }
}

/// Maps a SOAP element onto a declared data section element
fn map_data_element(element: &Element, spec: &ElementSpec, section: Option<&DataSectionSpec>) -> Element {
    let mut mapped = Element::new(spec.name.as_str());
    for (name, value) in element.plain_attributes() {
        mapped.set_attribute(name, value);
    }
    if spec.pcdata {
        if let Some(text) = element.text().filter(|t| !t.trim().is_empty()) {
            mapped.set_text(text);
        }
    }
    for child in element.children() {
        let local = child.local_name();
        if let Some(attribute) = spec.attribute_spec(local).filter(|_| child.children().is_empty()) {
            mapped.set_attribute(local, from_xsd(child.text_or_empty(), Some(&attribute.param_type)));
        } else if let Some(child_spec) = section
            .filter(|_| spec.children.iter().any(|c| c == local))
            .and_then(|s| s.element(local))
        {
            mapped.add_child(map_data_element(child, child_spec, section));
        } else {
            warn!(element = local, parent = spec.name.as_str(), "skipping unmapped data element");
        }
    }
    mapped
}

/// Inserts `value` below `root` following the dotted `name`
fn insert_dotted(root: &mut Element, name: &str, value: String) {
    let mut current = root;
    let mut segments = name.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.add_child(Element::new(segment).with_text(value));
            return;
        }
        let existing = current
            .children()
            .iter()
            .position(|c| c.name() == segment && c.text().is_none());
        let index = match existing {
            Some(index) => index,
            None => {
                current.add_child(Element::new(segment));
                current.children().len() - 1
            }
        };
        current = &mut current.children_mut()[index];
    }
}

/// Renders a data element with its attributes as child elements
fn unmap_data_element(element: &Element) -> Element {
    let mut unmapped = Element::new(element.local_name());
    for (name, value) in element.plain_attributes() {
        unmapped.add_child(Element::new(name).with_text(value));
    }
    if let Some(text) = element.text() {
        unmapped.set_text(text);
    }
    for child in element.children() {
        unmapped.add_child(unmap_data_element(child));
    }
    unmapped
}
