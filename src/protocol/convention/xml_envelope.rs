//! Generic XML envelope: `<request function=".."><param name="..">v</param><data/></request>`.

use crate::error::ConventionError;
use crate::protocol::convention::{
    clean_up_parameters, result_element, status_for, CallingConvention, Inbound, Method, Outbound,
};
use crate::protocol::model::{ApiSpec, Backpack, FunctionRequest, FunctionResult, Parameters};
use crate::protocol::xml::Element;

/// XML envelope calling convention
#[derive(Clone, Copy, Debug, Default)]
pub struct XmlEnvelope;

impl CallingConvention for XmlEnvelope {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn supported_methods(&self) -> &'static [Method] {
        &[Method::Post, Method::Options]
    }

    fn matches(&self, inbound: &Inbound) -> bool {
        inbound
            .body
            .as_xml()
            .is_some_and(|root| root.local_name() == "request" && root.attribute("function").is_some())
    }

    fn convert_request(
        &self,
        inbound: &Inbound,
        _api: &ApiSpec,
    ) -> Result<FunctionRequest, ConventionError> {
        let root = inbound
            .body
            .as_xml()
            .ok_or_else(|| ConventionError::invalid("XML body expected"))?;
        if root.local_name() != "request" {
            return Err(ConventionError::invalid(format!("unexpected root element <{}>", root.name())));
        }
        let name = root.attribute("function").unwrap_or_default();

        let mut parameters = Parameters::new();
        let mut data = None;
        for child in root.children() {
            match child.local_name() {
                "param" => {
                    let param = child
                        .attribute("name")
                        .ok_or_else(|| ConventionError::invalid("<param> without a name"))?;
                    if parameters.contains(param) {
                        return Err(ConventionError::invalid(format!("duplicate parameter {param}")));
                    }
                    parameters.set(param, child.text_or_empty());
                }
                "data" if data.is_none() => data = Some(child.renamed("data")),
                "data" => return Err(ConventionError::invalid("more than one <data> element")),
                other => {
                    return Err(ConventionError::invalid(format!("unexpected element <{other}>")))
                }
            }
        }
        FunctionRequest::new(name, clean_up_parameters(&parameters), data)
    }

    fn convert_result(
        &self,
        result: &FunctionResult,
        _backpack: &Backpack,
        _api: &ApiSpec,
    ) -> Outbound {
        Outbound::xml(status_for(result), result_element(result))
    }

    fn render_request(&self, request: &FunctionRequest) -> Inbound {
        let mut root = Element::new("request").with_attribute("function", request.name());
        for (name, value) in request.parameters().iter() {
            root.add_child(Element::new("param").with_attribute("name", name).with_text(value));
        }
        if let Some(data) = request.data_section() {
            root.add_child(data.renamed("data"));
        }
        Inbound::post_xml(root)
    }
}
