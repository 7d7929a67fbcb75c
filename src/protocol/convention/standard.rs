//! The native convention: flat HTTP parameters in, `<result>` document out.
//!
//! The function name travels in the `_function` parameter and the data
//! section in `_data`, which the transport parses and hands over as
//! `Inbound::embedded_data`.

use crate::error::ConventionError;
use crate::protocol::convention::{
    clean_up_parameters, result_element, status_for, CallingConvention, Inbound, Method, Outbound,
};
use crate::protocol::model::{ApiSpec, Backpack, FunctionRequest, FunctionResult};

/// Parameter naming the function
pub const FUNCTION_PARAMETER: &str = "_function";

/// Standard calling convention
#[derive(Clone, Copy, Debug, Default)]
pub struct Standard;

impl CallingConvention for Standard {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn supported_methods(&self) -> &'static [Method] {
        &[Method::Get, Method::Post, Method::Head, Method::Options]
    }

    fn matches(&self, inbound: &Inbound) -> bool {
        inbound.parameters.get(FUNCTION_PARAMETER).is_some_and(|f| !f.is_empty())
    }

    fn convert_request(
        &self,
        inbound: &Inbound,
        _api: &ApiSpec,
    ) -> Result<FunctionRequest, ConventionError> {
        let name = inbound.parameters.get(FUNCTION_PARAMETER).unwrap_or_default();
        if let Some(data) = &inbound.embedded_data {
            if data.local_name() != "data" {
                return Err(ConventionError::invalid(format!(
                    "data section root must be <data>, found <{}>",
                    data.name()
                )));
            }
        }
        FunctionRequest::new(
            name,
            clean_up_parameters(&inbound.parameters),
            inbound.embedded_data.clone(),
        )
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
        let mut inbound = Inbound::new(Method::Get).with_parameter(FUNCTION_PARAMETER, request.name());
        for (name, value) in request.parameters().iter() {
            inbound.parameters.set(name, value);
        }
        inbound.embedded_data = request.data_section().cloned();
        inbound
    }
}
