//! Error types shared across the crate.
//!
//! Caller mistakes never surface as errors from the engine: they are turned
//! into structured results by the conventions and the dispatcher. The types in
//! this module cover what remains:
//!
//! - `ProgrammingError`: an invariant was violated. Always logged with the
//!   subject and the source location that detected it, and expected to
//!   propagate until the engine's outer handler swallows it.
//! - `ConfigError`: a property is missing or invalid. Aborts the lifecycle
//!   stage that is running.
//! - `ConventionError`: an inbound message could not be converted into a
//!   request.
//! - `DispatchError`: the call was refused before reaching a function.

use std::net::IpAddr;
use std::panic::Location;

use thiserror::Error;
use tracing::error;

/// Violation of an internal invariant
///
/// Constructing the error logs it immediately, so provenance is kept even if a
/// caller further up decides to swallow it.
#[derive(Debug, Error)]
#[error("programming error in {subject} at {location}: {detail}")]
pub struct ProgrammingError {
    subject: String,
    detail: String,
    location: &'static Location<'static>,
}

impl ProgrammingError {
    /// Creates and logs a new programming error attributed to the caller's location
    #[track_caller]
    pub fn new(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        let location = Location::caller();
        let subject = subject.into();
        let detail = detail.into();
        error!(subject = %subject, location = %location, "programming error: {}", detail);
        Self { subject, detail, location }
    }

    /// The component or object the violation concerns
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Human readable description of the violation
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// Source location that detected the violation
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

/// Configuration could not be loaded or is not valid
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML or does not fit the schema
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A property holds a value that cannot be used
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The configuration was valid but a function or interceptor refused it
    #[error("initialization failed: {0:#}")]
    Initialization(anyhow::Error),
}

/// An inbound message could not be turned into a `FunctionRequest`
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConventionError {
    /// The message is malformed or carries an illegal parameter
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The message does not name the function to call
    #[error("function not specified")]
    FunctionNotSpecified,
}

impl ConventionError {
    /// Shorthand for `ConventionError::InvalidRequest`
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidRequest(detail.into())
    }
}

/// A call was refused before any function logic ran
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No access rule allows the caller to invoke the function
    #[error("access denied for {caller} to function {function}")]
    AccessDenied {
        /// Address of the refused caller
        caller: IpAddr,
        /// Name of the function that was requested
        function: String,
    },

    /// The API does not define the requested function
    #[error("no such function: {0}")]
    NoSuchFunction(String),

    /// An invariant was violated while dispatching
    #[error(transparent)]
    Fatal(#[from] ProgrammingError),
}
