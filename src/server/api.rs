//! The API: registry of functions and the dispatch entry point.
//!
//! An API owns its functions for the lifetime of the process, in declaration
//! order, together with the access rules, the meta-function counters and the
//! lazily generated service descriptions. Dispatch goes through
//! [`Api::handle_call`]:
//!
//! 1. A disabled API only honors `_EnableAPI`; everything else gets the fixed
//!    disabled result.
//! 2. The access rules are consulted with the caller address, the function
//!    name and the convention name. A denial is an error.
//! 3. Names starting with `_` are meta-functions.
//! 4. Any other name is looked up. An unknown name is an error unless the
//!    request asks to skip the call.
//! 5. The function runs between the chain's `before_function_call` and
//!    `after_function_call` hooks.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use tracing_attributes::instrument;

use crate::config::EngineConfig;
use crate::error::{ConfigError, DispatchError, ProgrammingError};
use crate::handler::{FunctionHandler, Properties};
use crate::protocol::model::{ApiSpec, FunctionRequest, FunctionResult};
use crate::server::access::{AccessControl, AccessRuleList};
use crate::server::function::Function;
use crate::server::interceptor::InterceptorChain;
use crate::server::links::{LinkChecker, LinkTester};
use crate::server::meta::{self, MetaFunction};

/// Reloads the configuration on behalf of `_ReloadProperties`
#[async_trait]
pub trait Reconfigure: Send + Sync {
    /// Reloads when the configuration changed; reports whether it did
    async fn reload_if_changed(&self) -> Result<bool, ConfigError>;
}

/// Lazily generated service descriptions
///
/// Generated on first request and kept for the lifetime of the API; the
/// declared contract never changes after construction.
#[derive(Debug, Default)]
pub(crate) struct SchemaCache {
    pub(crate) wsdl: OnceLock<String>,
    pub(crate) smd: OnceLock<String>,
}

/// Parsed access rules and settings waiting to be installed
pub(crate) struct PreparedSettings {
    api_rules: AccessRuleList,
    global_rules: AccessRuleList,
    self_addresses: Vec<IpAddr>,
    config: Arc<EngineConfig>,
}

/// Registry of the functions of one API
pub struct Api {
    spec: Arc<ApiSpec>,
    functions: Vec<Arc<Function>>,
    by_name: HashMap<String, Arc<Function>>,
    disabled: AtomicBool,
    access: AccessControl,
    meta_calls: Vec<AtomicU64>,
    started: DateTime<Utc>,
    settings: RwLock<Arc<EngineConfig>>,
    links: LinkChecker,
    reconfigure: OnceLock<Weak<dyn Reconfigure>>,
    pub(crate) schemas: SchemaCache,
}

impl Api {
    /// Creates the API, pairing every declared function with its handler
    ///
    /// # Arguments
    ///
    /// * `spec` - Declared contract of the API
    /// * `handlers` - One handler per declared function, keyed by function name
    /// * `tester` - Tester used by `_CheckLinks`
    ///
    /// # Returns
    ///
    /// A configuration error when a declared function has no handler, when a
    /// handler has no declared function or when a name is declared twice.
    pub fn new(
        spec: ApiSpec,
        mut handlers: HashMap<String, Arc<dyn FunctionHandler>>,
        tester: Arc<dyn LinkTester>,
    ) -> Result<Self, ConfigError> {
        let spec = Arc::new(spec);
        let mut functions = Vec::with_capacity(spec.functions.len());
        let mut by_name = HashMap::with_capacity(spec.functions.len());
        for function_spec in &spec.functions {
            if function_spec.name.starts_with('_') {
                return Err(ConfigError::Validation(format!(
                    "function name {} uses the reserved prefix",
                    function_spec.name
                )));
            }
            let handler = handlers.remove(&function_spec.name).ok_or_else(|| {
                ConfigError::Validation(format!("no handler for function {}", function_spec.name))
            })?;
            let function = Arc::new(Function::new(function_spec.clone(), handler));
            if by_name.insert(function_spec.name.clone(), Arc::clone(&function)).is_some() {
                return Err(ConfigError::Validation(format!(
                    "function {} declared twice",
                    function_spec.name
                )));
            }
            functions.push(function);
        }
        if let Some(orphan) = handlers.keys().next() {
            return Err(ConfigError::Validation(format!("handler {orphan} has no declared function")));
        }

        Ok(Self {
            spec,
            functions,
            by_name,
            disabled: AtomicBool::new(false),
            access: AccessControl::default(),
            meta_calls: MetaFunction::ALL.iter().map(|_| AtomicU64::new(0)).collect(),
            started: Utc::now(),
            settings: RwLock::new(Arc::new(EngineConfig::default())),
            links: LinkChecker::new(tester),
            reconfigure: OnceLock::new(),
            schemas: SchemaCache::default(),
        })
    }

    /// API name
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Declared contract
    pub fn spec(&self) -> &ApiSpec {
        &self.spec
    }

    /// Functions in declaration order
    pub fn functions(&self) -> &[Arc<Function>] {
        &self.functions
    }

    /// Function with the given name
    pub fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.by_name.get(name)
    }

    /// Access rules
    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    /// External link checker
    pub fn links(&self) -> &LinkChecker {
        &self.links
    }

    /// When the API was created
    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Configuration applied last
    pub fn settings(&self) -> Arc<EngineConfig> {
        self.settings.read().clone()
    }

    /// True while the whole API is disabled
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Enables or disables the whole API
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
        info!(api = %self.spec.name, disabled, "API state changed");
    }

    /// Number of calls of a meta-function since startup
    pub fn meta_call_count(&self, meta: MetaFunction) -> u64 {
        self.meta_calls[meta.index()].load(Ordering::Acquire)
    }

    /// Registers the component that reloads configuration
    pub fn set_reconfigure(&self, reconfigure: Weak<dyn Reconfigure>) {
        if self.reconfigure.set(reconfigure).is_err() {
            warn!(api = %self.spec.name, "reconfiguration hook already set");
        }
    }

    pub(crate) fn reconfigure(&self) -> Option<Arc<dyn Reconfigure>> {
        self.reconfigure.get().and_then(Weak::upgrade)
    }

    /// Applies the access rules, links and settings of a configuration
    pub fn configure(&self, config: &EngineConfig) -> Result<(), ConfigError> {
        let settings = self.prepare(config)?;
        self.apply(settings);
        Ok(())
    }

    /// Parses what [`Api::apply`] installs, leaving the running API untouched
    pub(crate) fn prepare(&self, config: &EngineConfig) -> Result<PreparedSettings, ConfigError> {
        Ok(PreparedSettings {
            api_rules: AccessRuleList::parse(&config.acl.api)?,
            global_rules: AccessRuleList::parse(&config.acl.global)?,
            self_addresses: config.engine.self_addresses()?,
            config: Arc::new(config.clone()),
        })
    }

    /// Installs prepared settings; cannot fail
    pub(crate) fn apply(&self, settings: PreparedSettings) {
        let PreparedSettings { api_rules, global_rules, self_addresses, config } = settings;
        self.access.replace(api_rules, global_rules, self_addresses);
        self.links.configure(&config.links);
        *self.settings.write() = config;
    }

    /// Bootstraps every function in declaration order
    pub async fn bootstrap(&self, properties: &Properties) -> anyhow::Result<()> {
        for function in &self.functions {
            function.bootstrap(properties).await?;
        }
        debug!(api = %self.spec.name, functions = self.functions.len(), "API bootstrapped");
        Ok(())
    }

    /// Initializes every function in declaration order
    pub async fn initialize(&self, properties: &Properties) -> anyhow::Result<()> {
        for function in &self.functions {
            function.initialize(properties).await?;
        }
        debug!(api = %self.spec.name, "API initialized");
        Ok(())
    }

    /// Deinitializes every function in reverse order; failures are logged
    pub async fn deinitialize(&self) {
        for function in self.functions.iter().rev() {
            if let Err(e) = function.deinitialize().await {
                warn!(function = function.name(), "deinitialization failed: {:#}", e);
            }
        }
    }

    /// Dispatches one call
    ///
    /// # Arguments
    ///
    /// * `request` - The canonical request; its backpack must carry the caller
    /// * `convention` - Name of the convention the request came in with
    /// * `chain` - Interceptors wrapped around regular function calls
    ///
    /// # Returns
    ///
    /// The result, or why the call was refused before reaching a function.
    #[instrument(skip_all, fields(function = %request.name()))]
    pub async fn handle_call(
        &self,
        request: FunctionRequest,
        convention: Option<&str>,
        chain: &InterceptorChain,
    ) -> Result<FunctionResult, DispatchError> {
        let name = request.name();
        if self.is_disabled() && MetaFunction::from_name(name) != Some(MetaFunction::EnableApi) {
            debug!("API disabled");
            return Ok(FunctionResult::disabled());
        }

        let caller = request.backpack().caller.ok_or_else(|| {
            ProgrammingError::new(self.spec.name.as_str(), "request without caller address")
        })?;
        if !self.access.allowed_ip(caller, name, convention) {
            debug!(%caller, "access denied");
            return Err(DispatchError::AccessDenied { caller, function: name.to_string() });
        }

        if name.starts_with('_') {
            return match MetaFunction::from_name(name) {
                Some(meta) => {
                    self.meta_calls[meta.index()].fetch_add(1, Ordering::AcqRel);
                    Ok(meta::call(self, meta, &request).await)
                }
                None if request.backpack().skip_function_call => Ok(FunctionResult::success()),
                None => Err(DispatchError::NoSuchFunction(name.to_string())),
            };
        }

        let Some(function) = self.function(name).cloned() else {
            if request.backpack().skip_function_call {
                return Ok(FunctionResult::success());
            }
            return Err(DispatchError::NoSuchFunction(name.to_string()));
        };

        let request = chain.before_function_call(self, request).await;
        let result = function.handle_call(&request).await?;
        Ok(chain.after_function_call(self, &request, result).await)
    }
}
