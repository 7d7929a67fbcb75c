//! Configuration parsing and change detection.
//!
//! The engine reads one TOML document with the following sections, all of
//! them optional:
//!
//! ```toml
//! [engine]
//! default_convention = "standard"
//! conventions = ["standard", "xml", "json-rpc-2.0"]
//! self_addresses = ["10.0.0.5"]
//!
//! [acl]
//! api = "allow 10.0.0.0/8 *; deny * _*"
//! global = "allow 127.0.0.1/32 *"
//!
//! [interceptors]
//! order = ["statistics", "transaction-log", "load-balancer"]
//!
//! [load_balancer]
//! strategy = "fan-out"
//! targets = ["http://10.0.0.6:8080/", "http://10.0.0.7:8080/"]
//! functions = ["Store*"]
//! node_id = "node-a"
//!
//! [links]
//! urls = ["http://db.internal:5432/"]
//! timeout_ms = 2000
//!
//! [properties]
//! greeting = "hello"
//! ```
//!
//! `ConfigWatcher` remembers the modification time of the file and tells the
//! engine whether a reload is due.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use filetime::FileTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::protocol::convention::{ConventionRegistry, BUILT_IN};
use crate::server::access::{AccessRuleList, NamePattern};
use crate::server::interceptor::load_balancer::Target;

/// Names of the built-in interceptors
pub const INTERCEPTORS: [&str; 3] = ["statistics", "transaction-log", "load-balancer"];

/// Top level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Convention selection and local addresses
    #[serde(default)]
    pub engine: EngineSection,

    /// Access rules
    #[serde(default)]
    pub acl: AclSection,

    /// Interceptor chain
    #[serde(default)]
    pub interceptors: InterceptorSection,

    /// Forwarding to other nodes
    #[serde(default)]
    pub load_balancer: LoadBalancerSection,

    /// External links reported by `_CheckLinks`
    #[serde(default)]
    pub links: LinksSection,

    /// Free runtime properties handed to handlers
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value cannot be used.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value that serde cannot check on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConventionRegistry::with_names(&self.engine.conventions)?;
        if let Some(default) = &self.engine.default_convention {
            if !self.engine.conventions.contains(default) {
                return Err(ConfigError::Validation(format!(
                    "default convention {default} is not enabled"
                )));
            }
        }
        self.engine.self_addresses()?;

        AccessRuleList::parse(&self.acl.api)?;
        AccessRuleList::parse(&self.acl.global)?;

        for name in &self.interceptors.order {
            if !INTERCEPTORS.contains(&name.as_str()) {
                return Err(ConfigError::Validation(format!("unknown interceptor {name}")));
            }
        }

        for target in &self.load_balancer.targets {
            Target::parse(target)?;
        }
        for function in &self.load_balancer.functions {
            NamePattern::new(function)?;
        }
        for link in &self.links.urls {
            url::Url::parse(link)
                .map_err(|e| ConfigError::Validation(format!("invalid link {link}: {e}")))?;
        }
        Ok(())
    }
}

/// `[engine]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Convention tried first when the request does not name one
    #[serde(default)]
    pub default_convention: Option<String>,

    /// Enabled conventions in detection order
    #[serde(default = "default_conventions")]
    pub conventions: Vec<String>,

    /// Addresses of this host besides loopback
    #[serde(default)]
    pub self_addresses: Vec<String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            default_convention: None,
            conventions: default_conventions(),
            self_addresses: Vec::new(),
        }
    }
}

impl EngineSection {
    /// Parsed self addresses
    pub fn self_addresses(&self) -> Result<Vec<IpAddr>, ConfigError> {
        self.self_addresses
            .iter()
            .map(|a| {
                a.parse()
                    .map_err(|_| ConfigError::Validation(format!("invalid self address {a}")))
            })
            .collect()
    }
}

fn default_conventions() -> Vec<String> {
    BUILT_IN.iter().map(|name| name.to_string()).collect()
}

/// `[acl]` section
///
/// Rules are separated by `;` or newlines. See `AccessRule` for the syntax.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AclSection {
    /// Rules of this API, evaluated first
    #[serde(default)]
    pub api: String,

    /// Rules shared by all APIs of the process, evaluated second
    #[serde(default)]
    pub global: String,
}

/// `[interceptors]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterceptorSection {
    /// Names of the built-in interceptors in chain order
    #[serde(default = "default_interceptors")]
    pub order: Vec<String>,
}

impl Default for InterceptorSection {
    fn default() -> Self {
        Self { order: default_interceptors() }
    }
}

fn default_interceptors() -> Vec<String> {
    vec!["statistics".to_string(), "transaction-log".to_string()]
}

/// How the load balancer distributes calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalanceStrategy {
    /// Call one target and use its result
    #[default]
    Forward,
    /// Call every target in the background and keep the local result
    FanOut,
}

/// `[load_balancer]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadBalancerSection {
    /// Distribution strategy
    #[serde(default)]
    pub strategy: LoadBalanceStrategy,

    /// Base URLs of the other nodes
    #[serde(default)]
    pub targets: Vec<String>,

    /// Glob patterns of the functions to distribute
    #[serde(default = "default_functions")]
    pub functions: Vec<String>,

    /// Identifier of this node, sent in the forwarding marker
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

impl Default for LoadBalancerSection {
    fn default() -> Self {
        Self {
            strategy: LoadBalanceStrategy::default(),
            targets: Vec::new(),
            functions: default_functions(),
            node_id: default_node_id(),
        }
    }
}

fn default_functions() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_node_id() -> String {
    "local".to_string()
}

/// `[links]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinksSection {
    /// URLs checked by `_CheckLinks`
    #[serde(default)]
    pub urls: Vec<String>,

    /// Per link timeout in milliseconds
    #[serde(default = "default_link_timeout")]
    pub timeout_ms: u64,
}

impl Default for LinksSection {
    fn default() -> Self {
        Self { urls: Vec::new(), timeout_ms: default_link_timeout() }
    }
}

impl LinksSection {
    /// Per link timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_link_timeout() -> u64 {
    5_000
}

/// Detects modifications of a configuration file
///
/// The first check after construction reports no change: the watcher is
/// primed with the modification time at construction.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Mutex<Option<FileTime>>,
}

impl ConfigWatcher {
    /// Starts watching `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = modification_time(&path).ok();
        Self { path, last_modified: Mutex::new(last_modified) }
    }

    /// Watched file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the modification time differs from the last check
    pub fn changed(&self) -> Result<bool, ConfigError> {
        let current = modification_time(&self.path)?;
        let mut last = self.last_modified.lock();
        let changed = *last != Some(current);
        if changed {
            debug!(path = %self.path.display(), "configuration file changed");
            *last = Some(current);
        }
        Ok(changed)
    }

    /// Reloads the configuration if the file changed
    pub fn reload_if_changed(&self) -> Result<Option<EngineConfig>, ConfigError> {
        if !self.changed()? {
            return Ok(None);
        }
        EngineConfig::from_file(&self.path).map(Some)
    }
}

fn modification_time(path: &Path) -> Result<FileTime, ConfigError> {
    let metadata = std::fs::metadata(path)?;
    Ok(FileTime::from_last_modification_time(&metadata))
}
