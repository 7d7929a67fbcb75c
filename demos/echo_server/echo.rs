use anyhow::Context;
use async_trait::async_trait;

use switchyard::handler::{FunctionHandler, Properties};
use switchyard::model::{ApiSpec, FunctionRequest, FunctionResult, FunctionSpec, ParamType, ParameterSpec};

/// The demo API: one function copying `in` to `out`
pub fn spec() -> ApiSpec {
    ApiSpec::new("demo").version("1.0").function(
        FunctionSpec::new("Echo")
            .describe("Returns its input")
            .input(ParameterSpec::required("in", ParamType::Text))
            .output(ParameterSpec::required("out", ParamType::Text)),
    )
}

/// Echo handler with an optional prefix taken from the `echo.prefix` property
#[derive(Default)]
pub struct Echo {
    prefix: parking_lot::RwLock<String>,
}

#[async_trait]
impl FunctionHandler for Echo {
    async fn initialize(&self, properties: &Properties) -> anyhow::Result<()> {
        *self.prefix.write() = properties.get("echo.prefix").cloned().unwrap_or_default();
        Ok(())
    }

    async fn call(&self, request: &FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
        let input = request.parameter("in").context("missing input")?;
        let prefix = self.prefix.read().clone();
        Ok(FunctionResult::success().with_parameter("out", format!("{prefix}{input}")))
    }
}
