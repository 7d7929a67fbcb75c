//! JSON-RPC 2.0 calling convention.
//!
//! Requests must carry `"jsonrpc": "2.0"`. A request without an `id` member
//! is a notification and gets an empty 204 response. Error objects map the
//! framework codes onto the reserved JSON-RPC range: `-32600` for an invalid
//! request, `-32603` for any other framework code and `-32000` for
//! application codes.

use serde_json::{json, Map, Value};

use crate::error::ConventionError;
use crate::protocol::convention::{
    json_request, json_request_id, json_request_params, json_result_object, CallingConvention,
    Inbound, Method, Outbound,
};
use crate::protocol::model::{ApiSpec, Backpack, ErrorCode, FunctionRequest, FunctionResult};

const VERSION: &str = "2.0";

/// Error code of an invalid request
pub const INVALID_REQUEST: i64 = -32600;
/// Error code of any other framework error
pub const INTERNAL_ERROR: i64 = -32603;
/// Error code of application errors
pub const APPLICATION_ERROR: i64 = -32000;

/// JSON-RPC 2.0 calling convention
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRpc2;

impl JsonRpc2 {
    fn error_number(code: &ErrorCode) -> i64 {
        match code {
            ErrorCode::InvalidRequest => INVALID_REQUEST,
            ErrorCode::Application(_) => APPLICATION_ERROR,
            _ => INTERNAL_ERROR,
        }
    }
}

impl CallingConvention for JsonRpc2 {
    fn name(&self) -> &'static str {
        "json-rpc-2.0"
    }

    fn supported_methods(&self) -> &'static [Method] {
        &[Method::Post, Method::Options]
    }

    fn matches(&self, inbound: &Inbound) -> bool {
        matches!(inbound.body.as_json(), Some(Value::Object(object)) if object.contains_key("jsonrpc"))
    }

    fn convert_request(
        &self,
        inbound: &Inbound,
        api: &ApiSpec,
    ) -> Result<FunctionRequest, ConventionError> {
        let Some(Value::Object(object)) = inbound.body.as_json() else {
            return Err(ConventionError::invalid("JSON object expected"));
        };
        if object.get("jsonrpc").and_then(Value::as_str) != Some(VERSION) {
            return Err(ConventionError::invalid("jsonrpc must be \"2.0\""));
        }
        let method = match object.get("method") {
            Some(Value::String(method)) => method.as_str(),
            Some(_) => return Err(ConventionError::invalid("method must be a string")),
            None => "",
        };
        let mut request = json_request(method, object.get("params"), api)?;
        let backpack = request.backpack_mut();
        backpack.notification = !object.contains_key("id");
        backpack.request_id = object.get("id").cloned();
        Ok(request)
    }

    fn convert_result(&self, result: &FunctionResult, backpack: &Backpack, _api: &ApiSpec) -> Outbound {
        if backpack.notification {
            return Outbound::empty(204);
        }
        let mut response = Map::new();
        response.insert("jsonrpc".to_string(), Value::String(VERSION.to_string()));
        match result.error_code() {
            None => {
                response.insert("result".to_string(), json_result_object(result));
            }
            Some(code) => {
                let mut error = json!({
                    "code": Self::error_number(code),
                    "message": code.as_str(),
                });
                if !result.parameters().is_empty() || result.data_section().is_some() {
                    error["data"] = json_result_object(result);
                }
                response.insert("error".to_string(), error);
            }
        }
        response.insert("id".to_string(), backpack.request_id.clone().unwrap_or(Value::Null));
        Outbound::json(200, Value::Object(response))
    }

    fn render_request(&self, request: &FunctionRequest) -> Inbound {
        Inbound::post_json(json!({
            "jsonrpc": VERSION,
            "method": request.name(),
            "params": json_request_params(request),
            "id": 1,
        }))
    }

    fn request_id(&self, inbound: &Inbound) -> Option<Value> {
        json_request_id(inbound)
    }
}
