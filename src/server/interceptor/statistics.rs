//! Records call statistics after dispatch.

use tracing::trace;

use crate::protocol::model::{FunctionRequest, FunctionResult};
use crate::server::api::Api;
use crate::server::interceptor::Interceptor;

/// Folds every regular function call into the function's statistics
///
/// Meta-functions are counted by the API itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatisticsInterceptor;

#[async_trait::async_trait]
impl Interceptor for StatisticsInterceptor {
    fn name(&self) -> &'static str {
        "statistics"
    }

    fn after_dispatch(&self, api: &Api, request: &FunctionRequest, result: &FunctionResult) {
        let Some(function) = api.function(request.name()) else {
            return;
        };
        let backpack = request.backpack();
        function.statistics().record_call(backpack.started, backpack.start_time, result);
        trace!(function = request.name(), "call recorded");
    }
}
