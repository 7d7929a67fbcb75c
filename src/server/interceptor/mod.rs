//! Interceptors observe and shape every call at fixed points of the pipeline.
//!
//! The chain is an explicit ordered list assembled from the `[interceptors]`
//! configuration plus any interceptor added by the embedder. The hooks run in
//! this order for one call:
//!
//! 1. `request_received`, with the raw inbound message
//! 2. `before_dispatch`, with the converted request
//! 3. `before_function_call`, which may replace the request
//! 4. the function itself
//! 5. `after_function_call`, which may replace the result
//! 6. `after_dispatch`, with the final request and result
//! 7. `request_complete`, with the rendered outbound message
//!
//! Hooks 1 to 3 run in chain order, hooks 5 to 7 in reverse chain order, so
//! the first interceptor wraps all others. Each interceptor goes through the
//! same bootstrap / initialize / deinitialize lifecycle as a function and
//! only takes part in calls while usable.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::protocol::convention::{Inbound, Outbound};
use crate::protocol::model::{FunctionRequest, FunctionResult};
use crate::server::api::Api;
use crate::server::lifecycle::{Lifecycle, LifecycleState};

pub mod load_balancer;
pub mod statistics;
pub mod transaction_log;

pub use load_balancer::{LoadBalancer, RemoteCaller, Target, TargetCache};
pub use statistics::StatisticsInterceptor;
pub use transaction_log::TransactionLog;

/// Observer of the call pipeline
///
/// Every hook has an empty default implementation.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Name used in logs and configuration
    fn name(&self) -> &'static str;

    /// One-time setup
    async fn bootstrap(&self, _config: &EngineConfig) -> anyhow::Result<()> {
        Ok(())
    }

    /// Applies the current configuration; called again on every reload
    async fn initialize(&self, _config: &EngineConfig) -> anyhow::Result<()> {
        Ok(())
    }

    /// Releases resources
    async fn deinitialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// A message arrived, before any conversion
    fn request_received(&self, _inbound: &Inbound) {}

    /// The message was converted into a request
    fn before_dispatch(&self, _request: &FunctionRequest) {}

    /// The request is about to reach a regular function
    async fn before_function_call(&self, _api: &Api, request: FunctionRequest) -> FunctionRequest {
        request
    }

    /// A regular function returned
    async fn after_function_call(
        &self,
        _api: &Api,
        _request: &FunctionRequest,
        result: FunctionResult,
    ) -> FunctionResult {
        result
    }

    /// Dispatch finished, for regular and meta functions alike
    fn after_dispatch(&self, _api: &Api, _request: &FunctionRequest, _result: &FunctionResult) {}

    /// The response was rendered
    fn request_complete(&self, _inbound: &Inbound, _outbound: &Outbound) {}
}

struct Entry {
    interceptor: Arc<dyn Interceptor>,
    lifecycle: Lifecycle,
}

/// Ordered list of interceptors
pub struct InterceptorChain {
    entries: Vec<Entry>,
}

impl InterceptorChain {
    /// Chain of the given interceptors, in order
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        let entries = interceptors
            .into_iter()
            .map(|interceptor| Entry { lifecycle: Lifecycle::new(interceptor.name()), interceptor })
            .collect();
        Self { entries }
    }

    /// Chain of the built-in interceptors named in the configuration
    ///
    /// The load balancer needs a remote caller; naming it without one is a
    /// configuration error.
    pub fn from_config(
        config: &EngineConfig,
        remote: Option<Arc<dyn RemoteCaller>>,
    ) -> Result<Self, ConfigError> {
        let mut interceptors: Vec<Arc<dyn Interceptor>> = Vec::new();
        for name in &config.interceptors.order {
            let interceptor: Arc<dyn Interceptor> = match name.as_str() {
                "statistics" => Arc::new(StatisticsInterceptor),
                "transaction-log" => Arc::new(TransactionLog),
                "load-balancer" => {
                    let remote = remote.clone().ok_or_else(|| {
                        ConfigError::Validation("load-balancer needs a remote caller".to_string())
                    })?;
                    Arc::new(LoadBalancer::new(remote))
                }
                other => return Err(ConfigError::Validation(format!("unknown interceptor {other}"))),
            };
            interceptors.push(interceptor);
        }
        Ok(Self::new(interceptors))
    }

    /// Appends an interceptor
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.entries.push(Entry { lifecycle: Lifecycle::new(interceptor.name()), interceptor });
    }

    /// Interceptor names in chain order
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.interceptor.name()).collect()
    }

    /// Bootstraps every interceptor, stopping at the first failure
    pub async fn bootstrap(&self, config: &EngineConfig) -> anyhow::Result<()> {
        for entry in &self.entries {
            transition(entry, LifecycleState::Bootstrapping)?;
            if let Err(e) = entry.interceptor.bootstrap(config).await {
                transition(entry, LifecycleState::Unusable)?;
                return Err(e.context(format!("bootstrap of interceptor {} failed", entry.interceptor.name())));
            }
            transition(entry, LifecycleState::Bootstrapped)?;
        }
        Ok(())
    }

    /// Initializes every interceptor, stopping at the first failure
    pub async fn initialize(&self, config: &EngineConfig) -> anyhow::Result<()> {
        for entry in &self.entries {
            transition(entry, LifecycleState::Initializing)?;
            if let Err(e) = entry.interceptor.initialize(config).await {
                transition(entry, LifecycleState::Bootstrapped)?;
                return Err(e.context(format!(
                    "initialization of interceptor {} failed",
                    entry.interceptor.name()
                )));
            }
            transition(entry, LifecycleState::Usable)?;
        }
        Ok(())
    }

    /// Deinitializes every interceptor in reverse order; failures are logged
    pub async fn deinitialize(&self) {
        for entry in self.entries.iter().rev() {
            if matches!(entry.lifecycle.state(), LifecycleState::Unusable) {
                continue;
            }
            if transition(entry, LifecycleState::Deinitializing).is_err() {
                continue;
            }
            if let Err(e) = entry.interceptor.deinitialize().await {
                warn!(interceptor = entry.interceptor.name(), "deinitialization failed: {:#}", e);
            }
            let _ = transition(entry, LifecycleState::Unusable);
        }
    }

    fn usable(&self) -> impl DoubleEndedIterator<Item = &Arc<dyn Interceptor>> {
        self.entries.iter().filter(|e| e.lifecycle.is_usable()).map(|e| &e.interceptor)
    }

    /// Runs `request_received` in chain order
    pub fn request_received(&self, inbound: &Inbound) {
        for interceptor in self.usable() {
            interceptor.request_received(inbound);
        }
    }

    /// Runs `before_dispatch` in chain order
    pub fn before_dispatch(&self, request: &FunctionRequest) {
        for interceptor in self.usable() {
            interceptor.before_dispatch(request);
        }
    }

    /// Runs `before_function_call` in chain order, threading the request through
    pub async fn before_function_call(&self, api: &Api, mut request: FunctionRequest) -> FunctionRequest {
        for interceptor in self.usable() {
            request = interceptor.before_function_call(api, request).await;
        }
        request
    }

    /// Runs `after_function_call` in reverse order, threading the result through
    pub async fn after_function_call(
        &self,
        api: &Api,
        request: &FunctionRequest,
        mut result: FunctionResult,
    ) -> FunctionResult {
        for interceptor in self.usable().rev() {
            result = interceptor.after_function_call(api, request, result).await;
        }
        result
    }

    /// Runs `after_dispatch` in reverse order
    pub fn after_dispatch(&self, api: &Api, request: &FunctionRequest, result: &FunctionResult) {
        for interceptor in self.usable().rev() {
            interceptor.after_dispatch(api, request, result);
        }
    }

    /// Runs `request_complete` in reverse order
    pub fn request_complete(&self, inbound: &Inbound, outbound: &Outbound) {
        for interceptor in self.usable().rev() {
            interceptor.request_complete(inbound, outbound);
        }
    }
}

fn transition(entry: &Entry, target: LifecycleState) -> anyhow::Result<()> {
    entry.lifecycle.transition(target).map_err(|found| {
        anyhow::anyhow!(
            "interceptor {}: illegal lifecycle transition from {:?} to {:?}",
            entry.interceptor.name(),
            found,
            target
        )
    })?;
    debug!(interceptor = entry.interceptor.name(), state = ?target, "interceptor lifecycle");
    Ok(())
}
