//! Handler module defines the interface between the engine and the logic of
//! one function.
//!
//! This module provides:
//! - The `FunctionHandler` trait that must be implemented for every declared
//!   function
//! - `HandlerFn`, an adapter turning a closure into a handler
//! - `Properties`, the runtime properties handed to handlers on
//!   initialization
//!
//! Handlers never see wire formats. They receive a `FunctionRequest` whose
//! input parameters were already validated against the declared contract and
//! return a `FunctionResult`. Returning an error (or panicking) does not
//! tear anything down: the engine turns it into an `_InternalError` result
//! carrying the failure's class, message and backtrace.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::protocol::model::{FunctionRequest, FunctionResult};

/// Runtime properties taken from the `[properties]` configuration section
pub type Properties = BTreeMap<String, String>;

/// The API to implement to provide the logic of a function
///
/// Lifecycle
/// ---------
/// `bootstrap` runs once when the engine starts. `initialize` runs after
/// bootstrap and again whenever the configuration is reloaded, so it must be
/// safe to call repeatedly. `deinitialize` runs once when the engine is
/// disposed. All three have empty default implementations.
///
/// Concurrency
/// -----------
/// `call` runs concurrently on many workers. Implementations own whatever
/// synchronization their state needs.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    /// One-time setup
    async fn bootstrap(&self, _properties: &Properties) -> anyhow::Result<()> {
        Ok(())
    }

    /// Applies the current runtime properties
    async fn initialize(&self, _properties: &Properties) -> anyhow::Result<()> {
        Ok(())
    }

    /// Releases resources before the engine goes away
    async fn deinitialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Executes one call
    ///
    /// # Arguments
    ///
    /// * `request` - The validated request; undeclared parameters are removed
    /// * `call_id` - Sequence number of this call, unique per function
    async fn call(&self, request: &FunctionRequest, call_id: u64) -> anyhow::Result<FunctionResult>;
}

type BoxedFuture = Pin<Box<dyn Future<Output = anyhow::Result<FunctionResult>> + Send>>;

/// Handler backed by a closure returning a future
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps a closure into a [`FunctionHandler`]
///
/// The closure receives an owned copy of the request so the returned future
/// can be `'static`.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<impl Fn(FunctionRequest, u64) -> BoxedFuture + Send + Sync>
where
    F: Fn(FunctionRequest, u64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<FunctionResult>> + Send + 'static,
{
    HandlerFn { f: move |request, call_id| Box::pin(f(request, call_id)) as BoxedFuture }
}

#[async_trait]
impl<F> FunctionHandler for HandlerFn<F>
where
    F: Fn(FunctionRequest, u64) -> BoxedFuture + Send + Sync,
{
    async fn call(&self, request: &FunctionRequest, call_id: u64) -> anyhow::Result<FunctionResult> {
        (self.f)(request.clone(), call_id).await
    }
}
