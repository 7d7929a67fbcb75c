//! Access control lists.
//!
//! A rule reads `allow|deny <ip>[/<prefix>] <function> [<convention>]`, for
//! example `allow 10.0.0.0/8 Get* json-rpc-2.0`. The address may be `*`;
//! function and convention are glob patterns where `*` matches any run of
//! characters and `?` one character. Rules are evaluated in order and the
//! first matching rule decides. A list without a matching rule denies.
//!
//! An API has two lists: its own, evaluated first, and the global one shared
//! by every API of the process. When both are empty only loopback and the
//! configured self addresses may call.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, trace};

use crate::error::{ConfigError, ProgrammingError};

/// Address pattern of a rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IpPattern {
    /// Matches every address
    Any,
    /// Matches addresses inside the network
    Network {
        /// Network address
        address: IpAddr,
        /// Prefix length in bits
        prefix: u8,
    },
}

impl IpPattern {
    /// True when `ip` lies inside the pattern
    pub fn matches(&self, ip: IpAddr) -> bool {
        match (self, ip) {
            (Self::Any, _) => true,
            (Self::Network { address: IpAddr::V4(net), prefix }, IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(*prefix)).unwrap_or(0);
                u32::from(*net) & mask == u32::from(ip) & mask
            }
            (Self::Network { address: IpAddr::V6(net), prefix }, IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(*prefix)).unwrap_or(0);
                u128::from(*net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for IpPattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Self::Any);
        }
        let invalid = || ConfigError::Validation(format!("invalid address pattern {s}"));
        let (address, prefix) = match s.split_once('/') {
            Some((address, prefix)) => (address, Some(prefix)),
            None => (s, None),
        };
        let address: IpAddr = address.parse().map_err(|_| invalid())?;
        let max = if address.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(prefix) => prefix.parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self::Network { address, prefix })
    }
}

impl fmt::Display for IpPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Network { address, prefix } => write!(f, "{address}/{prefix}"),
        }
    }
}

/// Glob pattern over function or convention names
#[derive(Clone, Debug)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    /// Compiles a glob pattern
    pub fn new(glob: &str) -> Result<Self, ConfigError> {
        let mut expression = String::with_capacity(glob.len() + 8);
        expression.push('^');
        for c in glob.chars() {
            match c {
                '*' => expression.push_str(".*"),
                '?' => expression.push('.'),
                c => expression.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        expression.push('$');
        let regex = Regex::new(&expression)
            .map_err(|e| ConfigError::Validation(format!("invalid name pattern {glob}: {e}")))?;
        Ok(Self { source: glob.to_string(), regex })
    }

    /// True when `name` matches the pattern
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// One allow or deny rule
#[derive(Clone, Debug, PartialEq)]
pub struct AccessRule {
    /// Whether a match allows or denies the call
    pub allow: bool,
    /// Caller addresses the rule applies to
    pub ip: IpPattern,
    /// Functions the rule applies to
    pub function: NamePattern,
    /// Conventions the rule applies to, every convention when absent
    pub convention: Option<NamePattern>,
}

impl AccessRule {
    /// Decision of this rule, `None` when it does not apply
    pub fn evaluate(&self, ip: IpAddr, function: &str, convention: Option<&str>) -> Option<bool> {
        if !self.ip.matches(ip) || !self.function.matches(function) {
            return None;
        }
        match (&self.convention, convention) {
            (None, _) => Some(self.allow),
            (Some(pattern), Some(convention)) if pattern.matches(convention) => Some(self.allow),
            _ => None,
        }
    }
}

impl FromStr for AccessRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = s.split_whitespace().collect();
        let (kind, ip, function, convention) = match words.as_slice() {
            [kind, ip, function] => (*kind, *ip, *function, None),
            [kind, ip, function, convention] => (*kind, *ip, *function, Some(*convention)),
            _ => return Err(ConfigError::Validation(format!("malformed access rule \"{s}\""))),
        };
        let allow = match kind {
            "allow" => true,
            "deny" => false,
            other => {
                return Err(ConfigError::Validation(format!(
                    "access rule must start with allow or deny, found {other}"
                )))
            }
        };
        Ok(Self {
            allow,
            ip: ip.parse()?,
            function: NamePattern::new(function)?,
            convention: convention.map(NamePattern::new).transpose()?,
        })
    }
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.allow { "allow" } else { "deny" };
        write!(f, "{kind} {} {}", self.ip, self.function.as_str())?;
        if let Some(convention) = &self.convention {
            write!(f, " {}", convention.as_str())?;
        }
        Ok(())
    }
}

/// Ordered rules, first match wins
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccessRuleList {
    rules: Vec<AccessRule>,
}

impl AccessRuleList {
    /// Parses rules separated by `;` or newlines; blank entries are ignored
    pub fn parse(rules: &str) -> Result<Self, ConfigError> {
        let rules = rules
            .split([';', '\n'])
            .map(str::trim)
            .filter(|rule| !rule.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<AccessRule>, _>>()?;
        Ok(Self { rules })
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    /// True when the list holds no rule
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Decision of the first matching rule
    pub fn evaluate(&self, ip: IpAddr, function: &str, convention: Option<&str>) -> Option<bool> {
        self.rules.iter().find_map(|rule| {
            let decision = rule.evaluate(ip, function, convention);
            if decision.is_some() {
                trace!(rule = %rule, ip = %ip, function, "access rule matched");
            }
            decision
        })
    }
}

/// Parses a caller address given as `ip` or `ip:port`
pub fn parse_caller(caller: &str) -> Option<IpAddr> {
    caller
        .parse::<IpAddr>()
        .ok()
        .or_else(|| caller.parse::<SocketAddr>().ok().map(|a| a.ip()))
}

/// Rule lists and self addresses in force at one moment
#[derive(Debug, Default)]
struct AccessLists {
    api: AccessRuleList,
    global: AccessRuleList,
    self_addresses: Vec<IpAddr>,
}

/// Access control of one API
///
/// All lists are replaced together in one store on reconfiguration, so a
/// decision never mixes old and new rules. Readers clone the `Arc` and
/// evaluate without holding the lock.
#[derive(Debug, Default)]
pub struct AccessControl {
    lists: RwLock<Arc<AccessLists>>,
}

impl AccessControl {
    /// Access control with the given lists
    pub fn new(api: AccessRuleList, global: AccessRuleList, self_addresses: Vec<IpAddr>) -> Self {
        Self { lists: RwLock::new(Arc::new(AccessLists { api, global, self_addresses })) }
    }

    /// Replaces all lists at once
    pub fn replace(&self, api: AccessRuleList, global: AccessRuleList, self_addresses: Vec<IpAddr>) {
        let lists = Arc::new(AccessLists { api, global, self_addresses });
        *self.lists.write() = lists;
        debug!("access rules replaced");
    }

    /// Decides whether `caller` may call `function` using `convention`
    ///
    /// # Arguments
    ///
    /// * `caller` - Caller address as `ip` or `ip:port`
    /// * `function` - Name of the requested function
    /// * `convention` - Name of the convention, if known
    ///
    /// # Returns
    ///
    /// The decision, or a `ProgrammingError` when the address is malformed:
    /// transports must always supply a valid one.
    pub fn allowed(
        &self,
        caller: &str,
        function: &str,
        convention: Option<&str>,
    ) -> Result<bool, ProgrammingError> {
        let ip = parse_caller(caller).ok_or_else(|| {
            ProgrammingError::new("AccessControl", format!("malformed caller address \"{caller}\""))
        })?;
        Ok(self.allowed_ip(ip, function, convention))
    }

    /// Decision for an already parsed caller address
    pub fn allowed_ip(&self, ip: IpAddr, function: &str, convention: Option<&str>) -> bool {
        let lists = self.lists.read().clone();
        if lists.api.is_empty() && lists.global.is_empty() {
            return ip.is_loopback() || lists.self_addresses.contains(&ip);
        }
        lists
            .api
            .evaluate(ip, function, convention)
            .or_else(|| lists.global.evaluate(ip, function, convention))
            .unwrap_or(false)
    }
}
