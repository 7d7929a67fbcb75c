//! Registry of the calling conventions an engine accepts.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::error::ConfigError;
use crate::protocol::convention::{
    CallingConvention, Inbound, JsonRpc1, JsonRpc2, JsonRpcVersion, Method, Soap, SoapMap,
    Standard, XmlEnvelope, XmlRpc,
};

/// Names of all built-in conventions in detection order
pub const BUILT_IN: [&str; 8] = [
    "standard",
    "xml",
    "xml-rpc",
    "json-rpc-2.0",
    "json-rpc-1.1",
    "json-rpc-1.0",
    "soap",
    "soap-map",
];

/// Ordered set of conventions keyed by name
///
/// Built once at engine construction and never mutated afterwards.
#[derive(Clone)]
pub struct ConventionRegistry {
    conventions: Vec<Arc<dyn CallingConvention>>,
}

impl Default for ConventionRegistry {
    fn default() -> Self {
        let conventions = BUILT_IN.iter().filter_map(|name| built_in(name)).collect();
        Self { conventions }
    }
}

impl ConventionRegistry {
    /// Registry with the named built-in conventions, in the given order
    pub fn with_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let mut conventions = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let convention = built_in(name).ok_or_else(|| {
                ConfigError::Validation(format!("unknown calling convention {name}"))
            })?;
            conventions.push(convention);
        }
        Ok(Self { conventions })
    }

    /// Appends a convention; a convention with the same name is replaced
    pub fn register(&mut self, convention: Arc<dyn CallingConvention>) {
        match self.conventions.iter().position(|c| c.name() == convention.name()) {
            Some(index) => self.conventions[index] = convention,
            None => self.conventions.push(convention),
        }
    }

    /// Convention registered under `name`
    pub fn get(&self, name: &str) -> Option<&Arc<dyn CallingConvention>> {
        self.conventions.iter().find(|c| c.name() == name)
    }

    /// Registered conventions in detection order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CallingConvention>> {
        self.conventions.iter()
    }

    /// Registered names in detection order
    pub fn names(&self) -> Vec<&'static str> {
        self.conventions.iter().map(|c| c.name()).collect()
    }

    /// Runs `matches`, treating a panic as no match
    pub fn matches(convention: &dyn CallingConvention, inbound: &Inbound) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| convention.matches(inbound))) {
            Ok(matched) => matched,
            Err(_) => {
                warn!(convention = convention.name(), "convention detection panicked");
                false
            }
        }
    }

    /// First convention that recognizes the message
    pub fn detect(&self, inbound: &Inbound) -> Option<&Arc<dyn CallingConvention>> {
        self.conventions.iter().find(|c| Self::matches(c.as_ref(), inbound))
    }

    /// True when at least one registered convention accepts the method
    pub fn supports_method(&self, method: Method) -> bool {
        self.conventions.iter().any(|c| c.supported_methods().contains(&method))
    }
}

fn built_in(name: &str) -> Option<Arc<dyn CallingConvention>> {
    let convention: Arc<dyn CallingConvention> = match name {
        "standard" => Arc::new(Standard),
        "xml" => Arc::new(XmlEnvelope),
        "xml-rpc" => Arc::new(XmlRpc),
        "json-rpc-1.0" => Arc::new(JsonRpc1::new(JsonRpcVersion::V1_0)),
        "json-rpc-1.1" => Arc::new(JsonRpc1::new(JsonRpcVersion::V1_1)),
        "json-rpc-2.0" => Arc::new(JsonRpc2),
        "soap" => Arc::new(Soap),
        "soap-map" => Arc::new(SoapMap),
        _ => return None,
    };
    Some(convention)
}
