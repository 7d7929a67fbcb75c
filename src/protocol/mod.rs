//! Protocol module implements everything that is independent of dispatch:
//!
//! - `xml`: The element tree used for data sections and XML payloads, together
//!   with a writer producing well-formed XML text.
//!
//! - `model`: The canonical call model. Every calling convention converts its
//!   wire representation into a `FunctionRequest` and renders a
//!   `FunctionResult` back. The module also holds the declared function
//!   specifications and the validation performed against them.
//!
//! - `convention`: One adapter per wire protocol, the registry used to select
//!   among them and the shared status mapping.

pub mod convention;
pub mod model;
pub mod xml;
