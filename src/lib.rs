//! Switchyard - a multi-protocol RPC serving core
//!
//! This library accepts calls expressed in several independent wire formats,
//! normalizes each into one canonical request, dispatches it through a single
//! function-invocation pipeline and renders the outcome back in the format the
//! caller used.
//!
//! ## Supported Calling Conventions
//!
//! - `standard`: flat parameters with the function name in `_function`
//! - `xml`: a generic `<request function="..">` envelope
//! - `xml-rpc`: XML-RPC method calls with struct/array values and faults
//! - `json-rpc-1.0`, `json-rpc-1.1`, `json-rpc-2.0`: the three JSON-RPC dialects
//! - `soap`, `soap-map`: SOAP 1.1 envelopes, flat or structurally mapped
//!
//! ## Main Components
//!
//! - `protocol`: The canonical call model (`FunctionRequest`, `FunctionResult`),
//!   declared function specifications, the XML element tree and the calling
//!   convention adapters that translate wire payloads to and from the model.
//!
//! - `server`: Access control, functions and the API registry, the reserved
//!   meta-functions, the interceptor chain, statistics and the `Engine` state
//!   machine that ties everything together.
//!
//! - `handler`: The trait that must be implemented to provide the logic of one
//!   function.
//!
//! - `config`: TOML configuration for conventions, access rules, interceptors,
//!   load balancing and runtime properties.
//!
//! ## Out of Scope
//!
//! Byte-level XML and JSON parsing, the network transport and client-side
//! fail-over are provided by the embedding application. The engine consumes
//! already-parsed payloads and the caller's address.
//!
//! ## Usage
//!
//! Declare an `ApiSpec`, implement `FunctionHandler` for each function and
//! start an `Engine` with `EngineBuilder`. Every inbound message is then passed
//! to `Engine::handle` together with the caller's address.

pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;

pub use protocol::model;
pub use protocol::xml;
