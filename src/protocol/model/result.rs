//! Canonical result representation.

use std::fmt;

use crate::protocol::model::Parameters;
use crate::protocol::xml::Element;

/// Parameter carrying the failure class of an internal error
pub const EXCEPTION_CLASS: &str = "_exception.class";
/// Parameter carrying the failure message of an internal error
pub const EXCEPTION_MESSAGE: &str = "_exception.message";
/// Parameter carrying the captured stack trace of an internal error
pub const EXCEPTION_STACKTRACE: &str = "_exception.stacktrace";

/// Error code of an unsuccessful result
///
/// Framework codes start with an underscore and have a fixed meaning across
/// conventions. Any other code is defined by the API.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCode {
    /// The request did not satisfy the declared contract
    InvalidRequest,
    /// The function produced output that violates the declared contract
    InvalidResponse,
    /// The function failed unexpectedly
    InternalError,
    /// The function or the whole API is disabled
    DisabledFunction,
    /// The API defines no function with the requested name
    NoSuchFunction,
    /// Access rules refuse the call
    AccessDenied,
    /// Error code declared by the API
    Application(String),
}

impl ErrorCode {
    /// Wire representation of the code
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidRequest => "_InvalidRequest",
            Self::InvalidResponse => "_InvalidResponse",
            Self::InternalError => "_InternalError",
            Self::DisabledFunction => "_DisabledFunction",
            Self::NoSuchFunction => "_NoSuchFunction",
            Self::AccessDenied => "_AccessDenied",
            Self::Application(code) => code,
        }
    }

    /// Parses the wire representation, mapping unknown codes to `Application`
    pub fn parse(code: &str) -> Self {
        match code {
            "_InvalidRequest" => Self::InvalidRequest,
            "_InvalidResponse" => Self::InvalidResponse,
            "_InternalError" => Self::InternalError,
            "_DisabledFunction" => Self::DisabledFunction,
            "_NoSuchFunction" => Self::NoSuchFunction,
            "_AccessDenied" => Self::AccessDenied,
            other => Self::Application(other.to_string()),
        }
    }

    /// True for codes defined by the framework rather than the API
    pub fn is_framework(&self) -> bool {
        !matches!(self, Self::Application(_))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a result for statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome<'a> {
    /// No error code
    Successful,
    /// The caller's cached copy is still valid
    NotModified,
    /// The result carries an error code
    Unsuccessful(&'a ErrorCode),
}

/// Outcome of one call expressed independently of the wire format
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionResult {
    error_code: Option<ErrorCode>,
    parameters: Parameters,
    data: Option<Element>,
    not_modified: bool,
}

impl FunctionResult {
    /// Successful result without output
    pub fn success() -> Self {
        Self::default()
    }

    /// Unsuccessful result with the given code and no output
    pub fn error(code: ErrorCode) -> Self {
        Self { error_code: Some(code), ..Default::default() }
    }

    /// Fixed result returned for disabled functions and a disabled API
    pub fn disabled() -> Self {
        Self::error(ErrorCode::DisabledFunction)
    }

    /// Empty result telling the caller its cached copy is still valid
    pub fn not_modified() -> Self {
        Self { not_modified: true, ..Default::default() }
    }

    /// Result describing why a request was rejected
    pub fn invalid_request(message: InvalidMessage) -> Self {
        Self { data: message.to_data_section(), ..Self::error(ErrorCode::InvalidRequest) }
    }

    /// Result describing why a function's output was rejected
    pub fn invalid_response(message: InvalidMessage) -> Self {
        Self { data: message.to_data_section(), ..Self::error(ErrorCode::InvalidResponse) }
    }

    /// Result of a function that failed unexpectedly
    pub fn internal_error(class: &str, message: &str, stacktrace: &str) -> Self {
        let mut result = Self::error(ErrorCode::InternalError);
        result.parameters.set(EXCEPTION_CLASS, class);
        result.parameters.set(EXCEPTION_MESSAGE, message);
        if !stacktrace.is_empty() {
            result.parameters.set(EXCEPTION_STACKTRACE, stacktrace);
        }
        result
    }

    /// Adds an output parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.set(name, value);
        self
    }

    /// Sets the output data section
    pub fn with_data(mut self, data: Element) -> Self {
        self.data = Some(data);
        self
    }

    /// Error code, `None` for a successful result
    pub fn error_code(&self) -> Option<&ErrorCode> {
        self.error_code.as_ref()
    }

    /// True when the result carries no error code
    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }

    /// True for the not-modified result kind
    pub fn is_not_modified(&self) -> bool {
        self.not_modified
    }

    /// Classifies the result for statistics
    pub fn outcome(&self) -> Outcome<'_> {
        match &self.error_code {
            Some(code) => Outcome::Unsuccessful(code),
            None if self.not_modified => Outcome::NotModified,
            None => Outcome::Successful,
        }
    }

    /// Output parameters
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Mutable access to the output parameters
    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    /// Value of one output parameter
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name)
    }

    /// Output data section, if any
    pub fn data_section(&self) -> Option<&Element> {
        self.data.as_ref()
    }

    /// Mutable access to the output data section
    pub fn data_section_mut(&mut self) -> &mut Option<Element> {
        &mut self.data
    }
}

/// One reason a request or a response violates its declared contract
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Defect {
    /// A required parameter or attribute is absent
    MissingParameter {
        /// Parameter or attribute name
        param: String,
        /// Data section element holding the attribute, if any
        element: Option<String>,
    },
    /// A value cannot be parsed as its declared type
    InvalidValueForType {
        /// Parameter or attribute name
        param: String,
        /// Name of the declared type
        type_name: String,
        /// Data section element holding the attribute, if any
        element: Option<String>,
    },
    /// A parameter combination rule is broken
    InvalidCombination {
        /// Kind of the combination rule
        kind: String,
        /// Parameters taking part in the rule
        params: Vec<String>,
    },
    /// A result carries an application error code the function does not declare
    UndeclaredErrorCode {
        /// The offending code
        code: String,
    },
}

impl Defect {
    fn to_element(&self) -> Element {
        match self {
            Self::MissingParameter { param, element } => {
                let mut e = Element::new("missing-param").with_attribute("param", param);
                if let Some(element) = element {
                    e.set_attribute("element", element);
                }
                e
            }
            Self::InvalidValueForType { param, type_name, element } => {
                let mut e = Element::new("invalid-value-for-type")
                    .with_attribute("param", param)
                    .with_attribute("type", type_name);
                if let Some(element) = element {
                    e.set_attribute("element", element);
                }
                e
            }
            Self::InvalidCombination { kind, params } => {
                let mut e = Element::new("param-combo").with_attribute("type", kind);
                for param in params {
                    e.add_child(Element::new("param").with_attribute("name", param));
                }
                e
            }
            Self::UndeclaredErrorCode { code } => {
                Element::new("undeclared-error-code").with_attribute("code", code)
            }
        }
    }
}

/// Collection of defects found in one message
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InvalidMessage {
    defects: Vec<Defect>,
}

impl InvalidMessage {
    /// Empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a defect
    pub fn push(&mut self, defect: Defect) {
        self.defects.push(defect);
    }

    /// Records a missing parameter
    pub fn missing(&mut self, param: impl Into<String>) {
        self.push(Defect::MissingParameter { param: param.into(), element: None });
    }

    /// Records a value that does not fit its type
    pub fn invalid_value(&mut self, param: impl Into<String>, type_name: impl Into<String>) {
        self.push(Defect::InvalidValueForType {
            param: param.into(),
            type_name: type_name.into(),
            element: None,
        });
    }

    /// Defects in the order they were found
    pub fn defects(&self) -> &[Defect] {
        &self.defects
    }

    /// True when no defect was recorded
    pub fn is_empty(&self) -> bool {
        self.defects.is_empty()
    }

    /// Structured data section listing the defects, `None` when there are none
    pub fn to_data_section(&self) -> Option<Element> {
        if self.defects.is_empty() {
            return None;
        }
        let mut data = Element::new("data");
        for defect in &self.defects {
            data.add_child(defect.to_element());
        }
        Some(data)
    }
}

impl From<Defect> for InvalidMessage {
    fn from(defect: Defect) -> Self {
        Self { defects: vec![defect] }
    }
}
