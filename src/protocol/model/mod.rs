//! The canonical call model shared by every calling convention.
//!
//! - `request`: `FunctionRequest` and the ordered `Parameters` map, including
//!   the naming rules enforced when a request is built.
//! - `result`: `FunctionResult`, the error codes and the structured defects
//!   of an invalid message.
//! - `backpack`: Strongly typed per-request side channel for transport and
//!   convention metadata.
//! - `spec`: Declared function contracts consumed by validation and by the
//!   conventions that need parameter order or types.
//! - `validate`: Input and output validation against a `FunctionSpec`.

mod backpack;
mod request;
mod result;
pub mod spec;
pub mod validate;

pub use backpack::Backpack;
pub use request::{
    is_valid_parameter_name, FunctionRequest, Parameters, FORWARDED_MARKER, RESERVED_PARAMETER,
};
pub use result::{
    Defect, ErrorCode, FunctionResult, InvalidMessage, Outcome, EXCEPTION_CLASS, EXCEPTION_MESSAGE,
    EXCEPTION_STACKTRACE,
};
pub use spec::{
    ApiSpec, ComboKind, DataSectionSpec, ElementSpec, ErrorCodeSpec, FunctionSpec, ParamCombo,
    ParamType, ParameterSpec,
};
