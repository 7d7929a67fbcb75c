//! Canonical request representation.

use std::sync::LazyLock;

use regex::Regex;
use smallvec::SmallVec;

use crate::error::ConventionError;
use crate::protocol::model::Backpack;
use crate::protocol::xml::Element;

/// Parameter name that may never be used by a request
pub const RESERVED_PARAMETER: &str = "function";

/// Framework parameter added to forwarded calls so they are not forwarded again
pub const FORWARDED_MARKER: &str = "_forwarded";

/// Ordered name to value mapping used for input and output parameters
///
/// Insertion order is preserved because several wire formats are rendered in
/// declaration order. Lookups are linear; parameter lists are short.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parameters(SmallVec<[(String, String); 8]>);

impl Parameters {
    /// Creates an empty parameter list
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a parameter
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// True when a parameter with this name is present
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }

    /// Sets a parameter, replacing an existing value without moving it
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Builder variant of [`Parameters::set`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Removes a parameter and returns its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(index).1)
    }

    /// Keeps only the parameters for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.0.retain(|(n, v)| keep(n, v));
    }

    /// Iterates over the parameters in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parameter names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no parameters
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Parameters::new();
        for (name, value) in iter {
            params.set(name, value);
        }
        params
    }
}

impl IntoIterator for Parameters {
    type Item = (String, String);
    type IntoIter = smallvec::IntoIter<[(String, String); 8]>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Legal parameter names; `None` only if the constant pattern fails to compile
static PARAMETER_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_.-]*$").ok());

/// Checks a parameter name against `[a-zA-Z][a-zA-Z0-9_.-]*`
///
/// The forwarding marker is the only framework name let through.
pub fn is_valid_parameter_name(name: &str) -> bool {
    name == FORWARDED_MARKER
        || PARAMETER_NAME.as_ref().is_some_and(|pattern| pattern.is_match(name))
}

/// A single call expressed independently of the wire format
///
/// The function name and the parameter naming rules are enforced on
/// construction, so every convention gets the same behavior.
#[derive(Clone, Debug)]
pub struct FunctionRequest {
    name: String,
    parameters: Parameters,
    data: Option<Element>,
    backpack: Backpack,
}

impl FunctionRequest {
    /// Builds a request, rejecting an empty function name or illegal parameter names
    pub fn new(
        name: impl Into<String>,
        parameters: Parameters,
        data: Option<Element>,
    ) -> Result<Self, ConventionError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConventionError::FunctionNotSpecified);
        }
        for param in parameters.names() {
            if param == RESERVED_PARAMETER {
                return Err(ConventionError::invalid(format!(
                    "parameter name \"{RESERVED_PARAMETER}\" is reserved"
                )));
            }
            if !is_valid_parameter_name(param) {
                return Err(ConventionError::invalid(format!("invalid parameter name \"{param}\"")));
            }
        }
        Ok(Self { name, parameters, data, backpack: Backpack::default() })
    }

    /// Name of the function to call
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input parameters in the order they were received
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Value of one input parameter
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name)
    }

    /// Input data section, if any
    pub fn data_section(&self) -> Option<&Element> {
        self.data.as_ref()
    }

    /// Side channel metadata attached by the transport and the convention
    pub fn backpack(&self) -> &Backpack {
        &self.backpack
    }

    /// Mutable access to the side channel metadata
    pub fn backpack_mut(&mut self) -> &mut Backpack {
        &mut self.backpack
    }

    /// Replaces the backpack
    pub fn with_backpack(mut self, backpack: Backpack) -> Self {
        self.backpack = backpack;
        self
    }

    /// True when the request was forwarded by another node
    pub fn is_forwarded(&self) -> bool {
        self.parameters.contains(FORWARDED_MARKER)
    }

    /// Copy of this request tagged with the forwarding marker
    pub fn forwarded_by(&self, node_id: &str) -> Self {
        let mut copy = self.clone();
        copy.parameters.set(FORWARDED_MARKER, node_id);
        copy
    }

    /// Replaces the parameters with a subset already validated by the caller
    pub(crate) fn set_parameters(&mut self, parameters: Parameters) {
        self.parameters = parameters;
    }
}
