//! JSON-RPC 1.0 and 1.1 calling conventions.
//!
//! Both dialects share the request shape `{method, params, id}` and differ in
//! detection and in the response envelope:
//!
//! - 1.0 requests carry no version member and must carry an `id`; a `null`
//!   id marks a notification. Responses always hold both `result` and
//!   `error`, one of them `null`.
//! - 1.1 requests carry `"version": "1.1"`. Responses carry the version and
//!   either `result` or `error`.
//!
//! `system.describe` is answered with a service description generated from
//! the declared API instead of calling a function.

use serde_json::{json, Map, Value};

use crate::error::ConventionError;
use crate::protocol::convention::{
    json_request, json_request_id, json_request_params, json_result_object, status_for,
    CallingConvention, Inbound, Method, Outbound,
};
use crate::protocol::model::{ApiSpec, Backpack, FunctionRequest, FunctionResult, ParamType};

/// Method name answered with a service description
pub const DESCRIBE_METHOD: &str = "system.describe";

/// JSON-RPC dialect handled by [`JsonRpc1`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JsonRpcVersion {
    V1_0,
    V1_1,
}

/// JSON-RPC 1.0 or 1.1 calling convention
#[derive(Clone, Copy, Debug)]
pub struct JsonRpc1 {
    version: JsonRpcVersion,
}

impl JsonRpc1 {
    /// Convention for the given dialect
    pub fn new(version: JsonRpcVersion) -> Self {
        Self { version }
    }

    fn describe(&self, api: &ApiSpec) -> Value {
        let procs: Vec<Value> = api
            .functions
            .iter()
            .map(|function| {
                let params: Vec<Value> = function
                    .input
                    .iter()
                    .map(|p| json!({ "name": p.name, "type": describe_type(&p.param_type) }))
                    .collect();
                json!({
                    "name": function.name,
                    "summary": function.description,
                    "params": params,
                    "return": { "type": "obj" },
                })
            })
            .collect();
        json!({
            "sdversion": "1.0",
            "name": api.name,
            "id": format!("urn:{}", api.name),
            "version": api.version,
            "procs": procs,
        })
    }
}

impl CallingConvention for JsonRpc1 {
    fn name(&self) -> &'static str {
        match self.version {
            JsonRpcVersion::V1_0 => "json-rpc-1.0",
            JsonRpcVersion::V1_1 => "json-rpc-1.1",
        }
    }

    fn supported_methods(&self) -> &'static [Method] {
        &[Method::Post, Method::Options]
    }

    fn matches(&self, inbound: &Inbound) -> bool {
        let Some(Value::Object(object)) = inbound.body.as_json() else {
            return false;
        };
        if !object.get("method").is_some_and(Value::is_string) || object.contains_key("jsonrpc") {
            return false;
        }
        match self.version {
            JsonRpcVersion::V1_0 => !object.contains_key("version") && object.contains_key("id"),
            JsonRpcVersion::V1_1 => object.get("version").and_then(Value::as_str) == Some("1.1"),
        }
    }

    fn convert_request(
        &self,
        inbound: &Inbound,
        api: &ApiSpec,
    ) -> Result<FunctionRequest, ConventionError> {
        let Some(Value::Object(object)) = inbound.body.as_json() else {
            return Err(ConventionError::invalid("JSON object expected"));
        };
        let method = object.get("method").and_then(Value::as_str).unwrap_or_default();
        let id = object.get("id").cloned();
        if self.version == JsonRpcVersion::V1_0 && id.is_none() {
            return Err(ConventionError::invalid("id is required"));
        }

        let mut request = if method == DESCRIBE_METHOD {
            let mut request = FunctionRequest::new(method, Default::default(), None)?;
            request.backpack_mut().describe = true;
            request.backpack_mut().skip_function_call = true;
            request
        } else {
            json_request(method, object.get("params"), api)?
        };
        let backpack = request.backpack_mut();
        backpack.notification = self.version == JsonRpcVersion::V1_0 && id == Some(Value::Null);
        backpack.request_id = id;
        Ok(request)
    }

    fn convert_result(&self, result: &FunctionResult, backpack: &Backpack, api: &ApiSpec) -> Outbound {
        if backpack.notification {
            return Outbound::empty(204);
        }
        let (result_value, error_value) = if backpack.describe && result.is_success() {
            (self.describe(api), Value::Null)
        } else {
            match result.error_code() {
                None => (json_result_object(result), Value::Null),
                Some(code) => {
                    let mut params = Map::new();
                    for (name, value) in result.parameters().iter() {
                        params.insert(name.to_string(), Value::String(value.to_string()));
                    }
                    let error = json!({
                        "name": "JSONRPCError",
                        "code": status_for(result),
                        "message": code.as_str(),
                        "error": Value::Object(params),
                    });
                    (Value::Null, error)
                }
            }
        };

        let id = backpack.request_id.clone().unwrap_or(Value::Null);
        let response = match self.version {
            JsonRpcVersion::V1_0 => json!({ "result": result_value, "error": error_value, "id": id }),
            JsonRpcVersion::V1_1 => {
                let mut response = Map::new();
                response.insert("version".to_string(), Value::String("1.1".to_string()));
                if error_value.is_null() {
                    response.insert("result".to_string(), result_value);
                } else {
                    response.insert("error".to_string(), error_value);
                }
                if backpack.request_id.is_some() {
                    response.insert("id".to_string(), id);
                }
                Value::Object(response)
            }
        };
        Outbound::json(200, response)
    }

    fn render_request(&self, request: &FunctionRequest) -> Inbound {
        let params = json_request_params(request);
        let body = match self.version {
            JsonRpcVersion::V1_0 => json!({ "method": request.name(), "params": params, "id": 1 }),
            JsonRpcVersion::V1_1 => {
                json!({ "version": "1.1", "method": request.name(), "params": params, "id": 1 })
            }
        };
        Inbound::post_json(body)
    }

    fn request_id(&self, inbound: &Inbound) -> Option<Value> {
        json_request_id(inbound)
    }
}

/// Parameter type as named by the 1.1 service description format
fn describe_type(param_type: &ParamType) -> &'static str {
    match param_type {
        ParamType::Boolean => "bit",
        t if t.is_numeric() => "num",
        _ => "str",
    }
}
