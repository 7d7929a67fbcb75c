//! Server side of the call pipeline.
//!
//! - `access`: access rules evaluated for every call
//! - `function`: one declared function with its handler, flags and statistics
//! - `api`: the registry of functions and the dispatcher
//! - `meta`: the reserved `_` functions every API answers
//! - `interceptor`: hooks around each call and the built-in interceptors
//! - `statistics`: per-function call statistics
//! - `links`: reachability checks of external services
//! - `lifecycle`: bootstrap / initialize / deinitialize state of components
//! - `engine`: convention selection, the state machine and the entry point

pub mod access;
pub mod api;
pub mod engine;
pub mod function;
pub mod interceptor;
pub mod lifecycle;
pub mod links;
pub mod meta;
pub mod statistics;

pub use api::Api;
pub use engine::{Engine, EngineBuilder, EngineState};
pub use function::Function;
