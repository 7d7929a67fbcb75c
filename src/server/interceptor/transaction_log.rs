//! One log line per completed call.
//!
//! Lines go to the `switchyard::transactions` target at INFO level so they
//! can be routed separately from diagnostics. Parameters are written URL
//! encoded (`a=1&b=x%20y`).

use tracing::info;
use url::form_urlencoded;

use crate::protocol::model::{FunctionRequest, FunctionResult};
use crate::server::api::Api;
use crate::server::interceptor::Interceptor;

/// Target of the transaction log lines
pub const TRANSACTION_TARGET: &str = "switchyard::transactions";

/// Transaction logging interceptor
#[derive(Clone, Copy, Debug, Default)]
pub struct TransactionLog;

#[async_trait::async_trait]
impl Interceptor for TransactionLog {
    fn name(&self) -> &'static str {
        "transaction-log"
    }

    fn after_dispatch(&self, _api: &Api, request: &FunctionRequest, result: &FunctionResult) {
        let backpack = request.backpack();
        let params = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(request.parameters().iter())
            .finish();
        let caller = backpack.caller.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string());
        let error_code = result.error_code().map_or("0", |code| code.as_str());
        info!(
            target: "switchyard::transactions",
            caller = %caller,
            function = request.name(),
            start = %backpack.start_time.format("%Y%m%d-%H%M%S%.3f"),
            duration_ms = backpack.elapsed_ms(),
            error_code,
            params = %params,
            "transaction"
        );
    }
}
