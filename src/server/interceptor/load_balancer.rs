//! Distribution of calls to other nodes.
//!
//! Two strategies are supported:
//!
//! - `forward`: after the local call, the request is sent to one target
//!   (round robin) and the remote output parameters and data elements are
//!   spliced into the local result. A failing target leaves the local result
//!   untouched.
//! - `fan-out`: before the local call, the request is sent to every target,
//!   each on its own task. Outcomes are logged and never affect the local
//!   result.
//!
//! Forwarded requests carry the `_forwarded` marker with this node's id and
//! are never distributed again, which rules out loops between nodes.
//! Meta-functions are never distributed.
//!
//! The network client is not part of this crate: the embedder supplies a
//! [`RemoteCaller`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::config::{EngineConfig, LoadBalanceStrategy};
use crate::error::ConfigError;
use crate::protocol::model::{FunctionRequest, FunctionResult};
use crate::protocol::xml::Element;
use crate::server::access::NamePattern;
use crate::server::api::Api;
use crate::server::interceptor::Interceptor;

/// Client side transport used to reach other nodes
#[async_trait]
pub trait RemoteCaller: Send + Sync {
    /// Sends `request` to `target` and returns the remote result
    async fn call(&self, target: &Target, request: &FunctionRequest) -> anyhow::Result<FunctionResult>;
}

/// Another node of the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    url: Url,
}

impl Target {
    /// Parses the base URL of a node
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(url)
            .map_err(|e| ConfigError::Validation(format!("invalid target {url}: {e}")))?;
        if url.host_str().is_none() {
            return Err(ConfigError::Validation(format!("target {url} has no host")));
        }
        Ok(Self { url })
    }

    /// Base URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host name or address
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Port, falling back to the scheme's default
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }
}

/// Targets of the load balancer
///
/// Filled from configuration on every initialization and emptied on
/// deinitialization; its size is bounded by the configured target list.
#[derive(Debug, Default)]
pub struct TargetCache {
    targets: RwLock<Vec<Arc<Target>>>,
    next: AtomicUsize,
}

impl TargetCache {
    /// Replaces all targets
    pub fn replace(&self, targets: Vec<Target>) {
        *self.targets.write() = targets.into_iter().map(Arc::new).collect();
        self.next.store(0, Ordering::Release);
    }

    /// Removes all targets
    pub fn clear(&self) {
        self.targets.write().clear();
    }

    /// All targets
    pub fn all(&self) -> Vec<Arc<Target>> {
        self.targets.read().clone()
    }

    /// Number of targets
    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    /// True without targets
    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }

    /// Next target in round robin order
    pub fn next(&self) -> Option<Arc<Target>> {
        let targets = self.targets.read();
        if targets.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::AcqRel) % targets.len();
        Some(Arc::clone(&targets[index]))
    }
}

#[derive(Debug)]
struct Settings {
    strategy: LoadBalanceStrategy,
    functions: Vec<NamePattern>,
    node_id: String,
}

/// Load balancing interceptor
pub struct LoadBalancer {
    remote: Arc<dyn RemoteCaller>,
    targets: TargetCache,
    settings: RwLock<Option<Arc<Settings>>>,
}

impl LoadBalancer {
    /// Load balancer sending calls through `remote`
    pub fn new(remote: Arc<dyn RemoteCaller>) -> Self {
        Self { remote, targets: TargetCache::default(), settings: RwLock::new(None) }
    }

    /// Current targets
    pub fn targets(&self) -> &TargetCache {
        &self.targets
    }

    fn distribution(&self, request: &FunctionRequest, strategy: LoadBalanceStrategy) -> Option<Arc<Settings>> {
        if request.is_forwarded() || request.name().starts_with('_') {
            return None;
        }
        let settings = self.settings.read().clone()?;
        let selected = settings.strategy == strategy
            && settings.functions.iter().any(|p| p.matches(request.name()));
        selected.then_some(settings)
    }
}

#[async_trait]
impl Interceptor for LoadBalancer {
    fn name(&self) -> &'static str {
        "load-balancer"
    }

    async fn initialize(&self, config: &EngineConfig) -> anyhow::Result<()> {
        let section = &config.load_balancer;
        let targets = section
            .targets
            .iter()
            .map(|t| Target::parse(t))
            .collect::<Result<Vec<_>, _>>()?;
        let functions = section
            .functions
            .iter()
            .map(|f| NamePattern::new(f))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(targets = targets.len(), strategy = ?section.strategy, "load balancer configured");
        self.targets.replace(targets);
        *self.settings.write() = Some(Arc::new(Settings {
            strategy: section.strategy,
            functions,
            node_id: section.node_id.clone(),
        }));
        Ok(())
    }

    async fn deinitialize(&self) -> anyhow::Result<()> {
        self.targets.clear();
        *self.settings.write() = None;
        Ok(())
    }

    async fn before_function_call(&self, _api: &Api, request: FunctionRequest) -> FunctionRequest {
        let Some(settings) = self.distribution(&request, LoadBalanceStrategy::FanOut) else {
            return request;
        };
        let forwarded = Arc::new(request.forwarded_by(&settings.node_id));
        for target in self.targets.all() {
            let remote = Arc::clone(&self.remote);
            let forwarded = Arc::clone(&forwarded);
            tokio::spawn(async move {
                match remote.call(&target, &forwarded).await {
                    Ok(result) => {
                        debug!(target = %target.url(), function = forwarded.name(), success = result.is_success(), "fan-out call finished")
                    }
                    Err(e) => {
                        warn!(target = %target.url(), function = forwarded.name(), "fan-out call failed: {:#}", e)
                    }
                }
            });
        }
        request
    }

    async fn after_function_call(
        &self,
        _api: &Api,
        request: &FunctionRequest,
        mut result: FunctionResult,
    ) -> FunctionResult {
        let Some(settings) = self.distribution(request, LoadBalanceStrategy::Forward) else {
            return result;
        };
        if !result.is_success() {
            debug!(function = request.name(), error_code = ?result.error_code(), "local call failed, not forwarding");
            return result;
        }
        let Some(target) = self.targets.next() else {
            return result;
        };
        let forwarded = request.forwarded_by(&settings.node_id);
        match self.remote.call(&target, &forwarded).await {
            Ok(remote) if remote.is_success() => {
                splice(&mut result, &remote);
                result
            }
            Ok(remote) => {
                warn!(
                    target = %target.url(),
                    function = request.name(),
                    error_code = ?remote.error_code(),
                    "forwarded call was unsuccessful"
                );
                result
            }
            Err(e) => {
                warn!(target = %target.url(), function = request.name(), "forwarded call failed: {:#}", e);
                result
            }
        }
    }
}

/// Copies the remote output into the local result
fn splice(local: &mut FunctionResult, remote: &FunctionResult) {
    for (name, value) in remote.parameters().iter() {
        local.parameters_mut().set(name, value);
    }
    if let Some(remote_data) = remote.data_section() {
        let data = local.data_section_mut().get_or_insert_with(|| Element::new("data"));
        for child in remote_data.children() {
            data.add_child(child.clone());
        }
    }
}
