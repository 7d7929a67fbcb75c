//! Declared contracts of an API and its functions.
//!
//! Specifications are produced outside this crate (typically generated from
//! declarative descriptors) and handed to the engine at startup. They drive
//! input and output validation, positional JSON-RPC parameters, the SOAP
//! structural mapping and the generated service descriptions.

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

/// Type of a parameter or attribute value
#[derive(Clone, Debug)]
pub enum ParamType {
    /// Any string
    Text,
    /// `true` or `false`
    Boolean,
    /// Signed 32 bit integer
    Int32,
    /// Signed 64 bit integer
    Int64,
    /// Double precision floating point number
    Float64,
    /// Calendar date formatted as `yyyyMMdd`
    Date,
    /// Date and time formatted as `yyyyMMddHHmmss`
    Timestamp,
    /// One of a fixed set of values
    Enum {
        /// Name of the type
        name: String,
        /// Allowed values
        values: Vec<String>,
    },
    /// String matching a regular expression in full
    Pattern {
        /// Name of the type
        name: String,
        /// Anchored expression
        regex: Regex,
    },
}

impl ParamType {
    /// Enumeration type accepting exactly the given values
    pub fn enumeration(name: impl Into<String>, values: &[&str]) -> Self {
        Self::Enum { name: name.into(), values: values.iter().map(|v| v.to_string()).collect() }
    }

    /// Pattern type; the expression is anchored at both ends
    pub fn pattern(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self::Pattern { name: name.into(), regex })
    }

    /// Name of the type as reported in invalid-value defects
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Self::Text => Cow::Borrowed("_text"),
            Self::Boolean => Cow::Borrowed("_boolean"),
            Self::Int32 => Cow::Borrowed("_int32"),
            Self::Int64 => Cow::Borrowed("_int64"),
            Self::Float64 => Cow::Borrowed("_float64"),
            Self::Date => Cow::Borrowed("_date"),
            Self::Timestamp => Cow::Borrowed("_timestamp"),
            Self::Enum { name, .. } | Self::Pattern { name, .. } => Cow::Borrowed(name),
        }
    }

    /// True when `value` is a valid textual representation of this type
    pub fn is_valid(&self, value: &str) -> bool {
        match self {
            Self::Text => true,
            Self::Boolean => matches!(value, "true" | "false"),
            Self::Int32 => value.parse::<i32>().is_ok(),
            Self::Int64 => value.parse::<i64>().is_ok(),
            Self::Float64 => value.parse::<f64>().is_ok(),
            Self::Date => value.len() == 8 && NaiveDate::parse_from_str(value, "%Y%m%d").is_ok(),
            Self::Timestamp => {
                value.len() == 14 && NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S").is_ok()
            }
            Self::Enum { values, .. } => values.iter().any(|v| v == value),
            Self::Pattern { regex, .. } => regex.is_match(value),
        }
    }

    /// True for the numeric types
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::Float64)
    }
}

/// Declaration of one parameter or data section attribute
#[derive(Clone, Debug)]
pub struct ParameterSpec {
    /// Parameter name
    pub name: String,
    /// Value type
    pub param_type: ParamType,
    /// Whether the parameter must be present
    pub required: bool,
    /// Free text description
    pub description: String,
}

impl ParameterSpec {
    /// Required parameter
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self { name: name.into(), param_type, required: true, description: String::new() }
    }

    /// Optional parameter
    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self { name: name.into(), param_type, required: false, description: String::new() }
    }

    /// Sets the description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Declaration of one data section element
#[derive(Clone, Debug)]
pub struct ElementSpec {
    /// Element name
    pub name: String,
    /// Declared attributes
    pub attributes: Vec<ParameterSpec>,
    /// Names of the element types allowed as children
    pub children: Vec<String>,
    /// Whether the element may carry text
    pub pcdata: bool,
}

impl ElementSpec {
    /// Element without attributes, children or text
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attributes: Vec::new(), children: Vec::new(), pcdata: false }
    }

    /// Declares an attribute
    pub fn attribute(mut self, attribute: ParameterSpec) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Allows a child element type
    pub fn child(mut self, name: impl Into<String>) -> Self {
        self.children.push(name.into());
        self
    }

    /// Allows text content
    pub fn with_pcdata(mut self) -> Self {
        self.pcdata = true;
        self
    }

    /// Declared attribute with the given name
    pub fn attribute_spec(&self, name: &str) -> Option<&ParameterSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Declaration of a data section
#[derive(Clone, Debug, Default)]
pub struct DataSectionSpec {
    /// Element types allowed directly below `<data>`
    pub top_level: Vec<String>,
    /// All element types of the section
    pub elements: Vec<ElementSpec>,
}

impl DataSectionSpec {
    /// Empty data section declaration
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an element type allowed directly below `<data>`
    pub fn top_level(mut self, element: ElementSpec) -> Self {
        self.top_level.push(element.name.clone());
        self.elements.push(element);
        self
    }

    /// Declares an element type that only appears nested
    pub fn nested(mut self, element: ElementSpec) -> Self {
        self.elements.push(element);
        self
    }

    /// Declared element with the given name
    pub fn element(&self, name: &str) -> Option<&ElementSpec> {
        self.elements.iter().find(|e| e.name == name)
    }
}

/// Kind of a parameter combination rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComboKind {
    /// Exactly one of the parameters must be set
    Exclusive,
    /// At least one of the parameters must be set
    Inclusive,
    /// Either all or none of the parameters must be set
    AllOrNone,
    /// The parameters must not all be set
    NotAll,
}

impl ComboKind {
    /// Name reported in invalid-combination defects
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive-parameters",
            Self::Inclusive => "inclusive-parameters",
            Self::AllOrNone => "all-or-none-parameters",
            Self::NotAll => "not-all-parameters",
        }
    }
}

/// Rule constraining which parameters may be set together
#[derive(Clone, Debug)]
pub struct ParamCombo {
    /// Rule kind
    pub kind: ComboKind,
    /// Parameters the rule applies to
    pub params: Vec<String>,
}

/// Declaration of an application error code
#[derive(Clone, Debug)]
pub struct ErrorCodeSpec {
    /// Error code as sent on the wire
    pub name: String,
    /// Free text description
    pub description: String,
    /// Output parameters returned along with the code
    pub output: Vec<ParameterSpec>,
}

impl ErrorCodeSpec {
    /// Error code without output parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: String::new(), output: Vec::new() }
    }
}

/// Declared contract of one function
#[derive(Clone, Debug)]
pub struct FunctionSpec {
    /// Function name
    pub name: String,
    /// Version of the contract
    pub version: String,
    /// Free text description
    pub description: String,
    /// Input parameters in declaration order
    pub input: Vec<ParameterSpec>,
    /// Output parameters in declaration order
    pub output: Vec<ParameterSpec>,
    /// Input data section
    pub input_data: Option<DataSectionSpec>,
    /// Output data section
    pub output_data: Option<DataSectionSpec>,
    /// Application error codes
    pub error_codes: Vec<ErrorCodeSpec>,
    /// Input parameter combination rules
    pub combos: Vec<ParamCombo>,
}

impl FunctionSpec {
    /// Function without parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0".to_string(),
            description: String::new(),
            input: Vec::new(),
            output: Vec::new(),
            input_data: None,
            output_data: None,
            error_codes: Vec::new(),
            combos: Vec::new(),
        }
    }

    /// Sets the contract version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declares an input parameter
    pub fn input(mut self, param: ParameterSpec) -> Self {
        self.input.push(param);
        self
    }

    /// Declares an output parameter
    pub fn output(mut self, param: ParameterSpec) -> Self {
        self.output.push(param);
        self
    }

    /// Declares the input data section
    pub fn input_data(mut self, data: DataSectionSpec) -> Self {
        self.input_data = Some(data);
        self
    }

    /// Declares the output data section
    pub fn output_data(mut self, data: DataSectionSpec) -> Self {
        self.output_data = Some(data);
        self
    }

    /// Declares an application error code
    pub fn error_code(mut self, code: ErrorCodeSpec) -> Self {
        self.error_codes.push(code);
        self
    }

    /// Declares a parameter combination rule
    pub fn combo(mut self, kind: ComboKind, params: &[&str]) -> Self {
        self.combos.push(ParamCombo { kind, params: params.iter().map(|p| p.to_string()).collect() });
        self
    }

    /// Declared input parameter with the given name
    pub fn input_param(&self, name: &str) -> Option<&ParameterSpec> {
        self.input.iter().find(|p| p.name == name)
    }

    /// Declared output parameter with the given name
    pub fn output_param(&self, name: &str) -> Option<&ParameterSpec> {
        self.output.iter().find(|p| p.name == name)
    }

    /// Declared application error code with the given name
    pub fn error_code_spec(&self, name: &str) -> Option<&ErrorCodeSpec> {
        self.error_codes.iter().find(|c| c.name == name)
    }
}

/// Declared contract of a whole API
#[derive(Clone, Debug)]
pub struct ApiSpec {
    /// API name
    pub name: String,
    /// API version
    pub version: String,
    /// Functions in bootstrap and initialization order
    pub functions: Vec<FunctionSpec>,
}

impl ApiSpec {
    /// API without functions
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), version: "1.0".to_string(), functions: Vec::new() }
    }

    /// Sets the API version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Adds a function
    pub fn function(mut self, function: FunctionSpec) -> Self {
        self.functions.push(function);
        self
    }

    /// Function declaration with the given name
    pub fn find(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.iter().find(|f| f.name == name)
    }
}
