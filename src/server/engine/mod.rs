//! The engine ties conventions, access control, functions and interceptors together.
//!
//! This module provides the single entry point for inbound messages:
//! - Selects the calling convention (explicit `_convention`, configured
//!   default, then detection)
//! - Classifies the HTTP method (501 when no convention knows it, 405 when
//!   the selected convention does not accept it)
//! - Converts the message, dispatches the request and renders the result
//! - Runs the interceptor hooks around every step
//!
//! The engine also owns the startup sequence and the state machine that
//! gates calls. Only a `Ready` engine accepts calls; any other state answers
//! 503, or 500 when a startup stage failed.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};
use tracing_attributes::instrument;

use crate::config::{ConfigWatcher, EngineConfig};
use crate::error::{ConfigError, DispatchError, ProgrammingError};
use crate::handler::FunctionHandler;
use crate::protocol::convention::{
    CallingConvention, ConventionRegistry, Inbound, Method, Outbound, CONVENTION_PARAMETER,
};
use crate::protocol::model::{ApiSpec, Backpack, ErrorCode, FunctionResult, InvalidMessage};
use crate::server::access::parse_caller;
use crate::server::api::{Api, Reconfigure};
use crate::server::function::panic_message;
use crate::server::interceptor::{Interceptor, InterceptorChain, RemoteCaller};
use crate::server::links::{LinkTester, TcpConnect};

mod state;

pub use state::{EngineState, StateCell};

/// Conventions in use and the configured default
struct Routing {
    registry: ConventionRegistry,
    default: Option<String>,
}

impl Routing {
    fn from_config(
        config: &EngineConfig,
        extra: &[Arc<dyn CallingConvention>],
    ) -> Result<Self, ConfigError> {
        let mut registry = ConventionRegistry::with_names(&config.engine.conventions)?;
        for convention in extra {
            registry.register(Arc::clone(convention));
        }
        Ok(Self { registry, default: config.engine.default_convention.clone() })
    }

    /// Methods accepted by at least one convention, without duplicates
    fn allowed_methods(&self) -> String {
        let mut methods: Vec<Method> = Vec::new();
        for convention in self.registry.iter() {
            for method in convention.supported_methods() {
                if !methods.contains(method) {
                    methods.push(*method);
                }
            }
        }
        join_methods(&methods)
    }
}

fn join_methods(methods: &[Method]) -> String {
    methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ")
}

/// Assembles and starts an [`Engine`]
pub struct EngineBuilder {
    spec: ApiSpec,
    handlers: HashMap<String, Arc<dyn FunctionHandler>>,
    config: Option<EngineConfig>,
    config_file: Option<PathBuf>,
    remote: Option<Arc<dyn RemoteCaller>>,
    tester: Arc<dyn LinkTester>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    conventions: Vec<Arc<dyn CallingConvention>>,
}

impl EngineBuilder {
    /// Builder for an engine serving `spec`
    pub fn new(spec: ApiSpec) -> Self {
        Self {
            spec,
            handlers: HashMap::new(),
            config: None,
            config_file: None,
            remote: None,
            tester: Arc::new(TcpConnect),
            interceptors: Vec::new(),
            conventions: Vec::new(),
        }
    }

    /// Provides the logic of the declared function `name`
    pub fn handler(mut self, name: impl Into<String>, handler: Arc<dyn FunctionHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Uses a configuration held in memory
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Loads the configuration from a TOML file and watches it for changes
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Client transport used by the load balancer
    pub fn remote_caller(mut self, remote: Arc<dyn RemoteCaller>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Tester used by `_CheckLinks`; defaults to a TCP connect
    pub fn link_tester(mut self, tester: Arc<dyn LinkTester>) -> Self {
        self.tester = tester;
        self
    }

    /// Appends an interceptor after the configured ones
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Registers an additional calling convention
    pub fn convention(mut self, convention: Arc<dyn CallingConvention>) -> Self {
        self.conventions.push(convention);
        self
    }

    /// Runs the startup sequence
    ///
    /// # Returns
    ///
    /// An error when the configuration cannot be loaded or the API cannot be
    /// constructed. Failures while bootstrapping or initializing the API
    /// still yield an engine, left in the matching failed state.
    pub async fn start(self) -> Result<Arc<Engine>, ConfigError> {
        let state = StateCell::default();

        let (config, watcher) = match self.load_config() {
            Ok(loaded) => loaded,
            Err(e) => {
                let _ = state.transition(EngineState::FrameworkBootstrapFailed);
                return Err(e);
            }
        };
        let framework = Routing::from_config(&config, &self.conventions).and_then(|routing| {
            let mut chain = InterceptorChain::from_config(&config, self.remote.clone())?;
            for interceptor in &self.interceptors {
                chain.push(Arc::clone(interceptor));
            }
            Ok((routing, chain))
        });
        let (routing, chain) = match framework {
            Ok(framework) => framework,
            Err(e) => {
                let _ = state.transition(EngineState::FrameworkBootstrapFailed);
                return Err(e);
            }
        };

        let _ = state.transition(EngineState::ConstructingApi);
        let api = match Api::new(self.spec, self.handlers, self.tester)
            .and_then(|api| api.configure(&config).map(|()| api))
        {
            Ok(api) => Arc::new(api),
            Err(e) => {
                let _ = state.transition(EngineState::ApiConstructionFailed);
                return Err(e);
            }
        };
        let _ = state.transition(EngineState::BootstrappingApi);

        let engine = Arc::new(Engine {
            state,
            api,
            chain,
            routing: RwLock::new(Arc::new(routing)),
            config: RwLock::new(Arc::new(config)),
            extra_conventions: self.conventions,
            watcher,
            reload: tokio::sync::Mutex::new(()),
        });
        let weak: Weak<Engine> = Arc::downgrade(&engine);
        engine.api.set_reconfigure(weak);

        if let Err(e) = engine.bootstrap().await {
            error!("API bootstrap failed: {:#}", e);
            let _ = engine.state.transition(EngineState::ApiBootstrapFailed);
            return Ok(engine);
        }
        let config = engine.config();
        if let Err(e) = engine.initialize(&config, || ()).await {
            error!("API initialization failed: {:#}", e);
        }
        Ok(engine)
    }

    fn load_config(&self) -> Result<(EngineConfig, Option<ConfigWatcher>), ConfigError> {
        match &self.config_file {
            Some(path) => {
                let watcher = ConfigWatcher::new(path.clone());
                let config = EngineConfig::from_file(path)?;
                Ok((config, Some(watcher)))
            }
            None => {
                let config = self.config.clone().unwrap_or_default();
                config.validate()?;
                Ok((config, None))
            }
        }
    }
}

/// A running API behind all configured calling conventions
pub struct Engine {
    state: StateCell,
    api: Arc<Api>,
    chain: InterceptorChain,
    routing: RwLock<Arc<Routing>>,
    config: RwLock<Arc<EngineConfig>>,
    extra_conventions: Vec<Arc<dyn CallingConvention>>,
    watcher: Option<ConfigWatcher>,
    reload: tokio::sync::Mutex<()>,
}

impl Engine {
    /// Current state
    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    /// The served API
    pub fn api(&self) -> &Arc<Api> {
        &self.api
    }

    /// The interceptor chain
    pub fn interceptors(&self) -> &InterceptorChain {
        &self.chain
    }

    /// Configuration applied last
    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.read().clone()
    }

    /// Names of the conventions in use, in detection order
    pub fn conventions(&self) -> Vec<&'static str> {
        self.routing.read().registry.names()
    }

    fn move_to(&self, target: EngineState) -> Result<(), ProgrammingError> {
        self.state.transition(target).map_err(|found| {
            ProgrammingError::new("Engine", format!("illegal transition from {found:?} to {target:?}"))
        })
    }

    async fn bootstrap(&self) -> anyhow::Result<()> {
        let config = self.config();
        self.chain.bootstrap(&config).await?;
        self.api.bootstrap(&config.properties).await?;
        Ok(())
    }

    /// Moves through `InitializingApi` to `Ready`, or to the failed state
    ///
    /// `commit` runs once everything initialized, before the engine turns
    /// `Ready`. Functions go first so a refusing handler leaves the
    /// interceptors as they were.
    async fn initialize(&self, config: &EngineConfig, commit: impl FnOnce()) -> anyhow::Result<()> {
        self.move_to(EngineState::InitializingApi)?;
        let outcome = async {
            self.api.initialize(&config.properties).await?;
            self.chain.initialize(config).await
        }
        .await;
        match outcome {
            Ok(()) => {
                commit();
                self.move_to(EngineState::Ready)?;
                info!(api = self.api.name(), conventions = ?self.conventions(), "engine ready");
                Ok(())
            }
            Err(e) => {
                self.move_to(EngineState::ApiInitializationFailed)?;
                Err(e)
            }
        }
    }

    /// Applies a new configuration and initializes the API again
    ///
    /// Legal from `Ready` and from `ApiInitializationFailed`. Conventions are
    /// rebuilt from the new configuration; the interceptor list stays as
    /// constructed and only gets initialized again.
    ///
    /// The new conventions, access rules and settings are installed together
    /// and only once initialization succeeded. A configuration that does not
    /// validate is refused without leaving the current state.
    pub async fn reinitialize(&self, config: EngineConfig) -> Result<(), ConfigError> {
        let _guard = self.reload.lock().await;
        config.validate()?;
        let routing = Routing::from_config(&config, &self.extra_conventions)?;
        let settings = self.api.prepare(&config)?;
        let config = Arc::new(config);
        self.initialize(&config, || {
            self.api.apply(settings);
            *self.routing.write() = Arc::new(routing);
            *self.config.write() = Arc::clone(&config);
        })
        .await
        .map_err(|e| match e.downcast::<ConfigError>() {
            Ok(e) => e,
            Err(e) => ConfigError::Initialization(e),
        })
    }

    /// Stops the API and the interceptors; calls are refused from now on
    pub async fn dispose(&self) {
        if let Err(found) = self.state.transition(EngineState::Disposing) {
            debug!(state = ?found, "engine already disposing");
            return;
        }
        self.chain.deinitialize().await;
        self.api.deinitialize().await;
        let _ = self.state.transition(EngineState::Disposed);
        info!(api = self.api.name(), "engine disposed");
    }

    /// Handles one inbound message
    ///
    /// # Arguments
    ///
    /// * `inbound` - The parsed message
    /// * `caller` - Address of the caller, with or without port
    ///
    /// # Returns
    ///
    /// The message to send back. Never fails: anything that escapes the
    /// pipeline is logged and answered with 500.
    #[instrument(skip_all, fields(caller = %caller, method = %inbound.method))]
    pub async fn handle(&self, inbound: Inbound, caller: &str) -> Outbound {
        match AssertUnwindSafe(self.process(&inbound, caller)).catch_unwind().await {
            Ok(Ok(outbound)) => outbound,
            Ok(Err(e)) => {
                error!("request failed: {}", e);
                Outbound::empty(500)
            }
            Err(payload) => {
                error!(panic = %panic_message(payload.as_ref()), "request panicked");
                Outbound::empty(500)
            }
        }
    }

    fn finish(&self, inbound: &Inbound, outbound: Outbound) -> Outbound {
        self.chain.request_complete(inbound, &outbound);
        outbound
    }

    async fn process(&self, inbound: &Inbound, caller: &str) -> Result<Outbound, ProgrammingError> {
        let state = self.state();
        if state != EngineState::Ready {
            debug!(?state, "engine not ready");
            return Ok(Outbound::empty(state.refusal_status()));
        }
        let ip = parse_caller(caller)
            .ok_or_else(|| ProgrammingError::new("Engine", format!("malformed caller address {caller:?}")))?;

        self.chain.request_received(inbound);
        let routing = self.routing.read().clone();

        if !routing.registry.supports_method(inbound.method) {
            debug!("method not supported by any convention");
            return Ok(self.finish(inbound, Outbound::empty(501)));
        }
        if inbound.method == Method::Options {
            let outbound = Outbound::empty(200).with_header("Allow", routing.allowed_methods());
            return Ok(self.finish(inbound, outbound));
        }

        let Some(convention) = self.select(&routing, inbound) else {
            return Ok(self.finish(inbound, Outbound::empty(400)));
        };
        let convention = Arc::clone(convention);
        if !convention.supported_methods().contains(&inbound.method) {
            debug!(convention = convention.name(), "method not allowed");
            let allow = join_methods(convention.supported_methods());
            return Ok(self.finish(inbound, Outbound::empty(405).with_header("Allow", allow)));
        }
        let head = inbound.method == Method::Head;

        let mut request = match convention.convert_request(inbound, self.api.spec()) {
            Ok(request) => request,
            Err(e) => {
                debug!(convention = convention.name(), "conversion failed: {}", e);
                let mut backpack = Backpack::new();
                backpack.caller = Some(ip);
                backpack.convention = Some(convention.name());
                backpack.request_id = convention.request_id(inbound);
                let result = FunctionResult::invalid_request(InvalidMessage::new());
                let mut outbound = convention.convert_result(&result, &backpack, self.api.spec());
                if head {
                    outbound = outbound.without_body();
                }
                return Ok(self.finish(inbound, outbound));
            }
        };
        let name = request.name().to_string();
        let backpack = request.backpack_mut();
        backpack.caller = Some(ip);
        backpack.convention = Some(convention.name());
        backpack.function = Some(name);
        if head {
            backpack.skip_function_call = true;
        }

        self.chain.before_dispatch(&request);
        let result = match self.api.handle_call(request.clone(), Some(convention.name()), &self.chain).await {
            Ok(result) => result,
            Err(DispatchError::AccessDenied { caller, function }) => {
                info!(%caller, function = %function, "access denied");
                FunctionResult::error(ErrorCode::AccessDenied)
            }
            Err(DispatchError::NoSuchFunction(function)) => {
                debug!(function = %function, "no such function");
                FunctionResult::error(ErrorCode::NoSuchFunction)
            }
            Err(DispatchError::Fatal(e)) => {
                warn!(function = request.name(), "dispatch aborted: {}", e);
                return Ok(self.finish(inbound, Outbound::empty(500)));
            }
        };
        self.chain.after_dispatch(&self.api, &request, &result);

        let mut outbound = convention.convert_result(&result, request.backpack(), self.api.spec());
        if let Some(status) = request.backpack().status_code {
            outbound.status = status;
        }
        if head {
            outbound = outbound.without_body();
        }
        debug!(function = request.name(), status = outbound.status, "request complete");
        Ok(self.finish(inbound, outbound))
    }

    /// Convention for `inbound`
    ///
    /// An explicit `_convention` parameter wins; an unknown name selects
    /// nothing. Otherwise the configured default is used when it recognizes
    /// the message, then the first convention that does.
    fn select<'a>(&self, routing: &'a Routing, inbound: &Inbound) -> Option<&'a Arc<dyn CallingConvention>> {
        if let Some(name) = inbound.parameters.get(CONVENTION_PARAMETER) {
            let convention = routing.registry.get(name);
            if convention.is_none() {
                debug!(convention = name, "unknown convention requested");
            }
            return convention;
        }
        let default = routing
            .default
            .as_deref()
            .and_then(|name| routing.registry.get(name))
            .filter(|c| ConventionRegistry::matches(c.as_ref(), inbound));
        let selected = default.or_else(|| routing.registry.detect(inbound));
        if selected.is_none() {
            debug!("no convention recognizes the request");
        }
        selected
    }
}

#[async_trait]
impl Reconfigure for Engine {
    async fn reload_if_changed(&self) -> Result<bool, ConfigError> {
        let Some(watcher) = &self.watcher else {
            return Ok(false);
        };
        let Some(config) = watcher.reload_if_changed()? else {
            return Ok(false);
        };
        info!(path = %watcher.path().display(), "configuration changed, reinitializing");
        self.reinitialize(config).await?;
        Ok(true)
    }
}
