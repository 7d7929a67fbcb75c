//! A single callable function of an API.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};

use futures::FutureExt;
use tracing::{debug, error, warn};
use tracing_attributes::instrument;

use crate::error::ProgrammingError;
use crate::handler::{FunctionHandler, Properties};
use crate::protocol::model::validate::{validate_input, validate_output};
use crate::protocol::model::{FunctionRequest, FunctionResult, FunctionSpec};
use crate::server::lifecycle::{Lifecycle, LifecycleState};
use crate::server::statistics::FunctionStatistics;

/// Declared contract, handler and runtime state of one function
///
/// Owned by exactly one API for the lifetime of the process.
pub struct Function {
    spec: FunctionSpec,
    handler: Arc<dyn FunctionHandler>,
    enabled: AtomicBool,
    calls: AtomicU64,
    lifecycle: Lifecycle,
    statistics: FunctionStatistics,
}

impl Function {
    /// Creates an enabled function in the unusable state
    pub fn new(spec: FunctionSpec, handler: Arc<dyn FunctionHandler>) -> Self {
        install_panic_trace();
        let lifecycle = Lifecycle::new(spec.name.clone());
        Self {
            spec,
            handler,
            enabled: AtomicBool::new(true),
            calls: AtomicU64::new(0),
            lifecycle,
            statistics: FunctionStatistics::new(),
        }
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Version of the declared contract
    pub fn version(&self) -> &str {
        &self.spec.version
    }

    /// Declared contract
    pub fn spec(&self) -> &FunctionSpec {
        &self.spec
    }

    /// True unless the function was disabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enables or disables the function
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        debug!(function = %self.spec.name, enabled, "function state changed");
    }

    /// Number of calls handled so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Acquire)
    }

    /// Lifecycle stage
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Call statistics
    pub fn statistics(&self) -> &FunctionStatistics {
        &self.statistics
    }

    /// Runs the handler's one-time setup
    pub async fn bootstrap(&self, properties: &Properties) -> anyhow::Result<()> {
        self.move_to(LifecycleState::Bootstrapping)?;
        match self.handler.bootstrap(properties).await {
            Ok(()) => Ok(self.move_to(LifecycleState::Bootstrapped)?),
            Err(e) => {
                self.move_to(LifecycleState::Unusable)?;
                Err(e.context(format!("bootstrap of {} failed", self.spec.name)))
            }
        }
    }

    /// Applies runtime properties; legal again after a successful initialization
    pub async fn initialize(&self, properties: &Properties) -> anyhow::Result<()> {
        self.move_to(LifecycleState::Initializing)?;
        match self.handler.initialize(properties).await {
            Ok(()) => Ok(self.move_to(LifecycleState::Usable)?),
            Err(e) => {
                self.move_to(LifecycleState::Bootstrapped)?;
                Err(e.context(format!("initialization of {} failed", self.spec.name)))
            }
        }
    }

    /// Releases the handler's resources
    pub async fn deinitialize(&self) -> anyhow::Result<()> {
        if matches!(self.lifecycle.state(), LifecycleState::Unusable) {
            return Ok(());
        }
        self.move_to(LifecycleState::Deinitializing)?;
        let outcome = self.handler.deinitialize().await;
        self.move_to(LifecycleState::Unusable)?;
        outcome
    }

    fn move_to(&self, target: LifecycleState) -> Result<(), ProgrammingError> {
        self.lifecycle.transition(target).map_err(|found| {
            ProgrammingError::new(
                self.spec.name.as_str(),
                format!("illegal lifecycle transition from {found:?} to {target:?}"),
            )
        })
    }

    /// Handles one call
    ///
    /// # Arguments
    ///
    /// * `request` - The canonical request, already past access control
    ///
    /// # Returns
    ///
    /// A result for every call, including disabled, invalid and failing ones.
    /// Only calling a function that is not usable is an error.
    #[instrument(skip_all, fields(function = %self.spec.name))]
    pub async fn handle_call(
        &self,
        request: &FunctionRequest,
    ) -> Result<FunctionResult, ProgrammingError> {
        if !self.lifecycle.is_usable() {
            return Err(ProgrammingError::new(
                self.spec.name.as_str(),
                format!("called while {:?}", self.lifecycle.state()),
            ));
        }
        let call_id = self.calls.fetch_add(1, Ordering::AcqRel) + 1;

        if !self.is_enabled() {
            debug!(call_id, "function disabled");
            return Ok(FunctionResult::disabled());
        }
        if request.backpack().skip_function_call {
            return Ok(FunctionResult::success());
        }

        let parameters = match validate_input(&self.spec, request.parameters(), request.data_section())
        {
            Ok(parameters) => parameters,
            Err(message) => {
                debug!(call_id, defects = message.defects().len(), "invalid request");
                return Ok(FunctionResult::invalid_request(message));
            }
        };
        let mut request = request.clone();
        request.set_parameters(parameters);

        let call = AssertUnwindSafe(self.handler.call(&request, call_id)).catch_unwind();
        let result = match call.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(call_id, "function failed: {:#}", e);
                return Ok(FunctionResult::internal_error("error", &format!("{e:#}"), &format!("{e:?}")));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                let trace = take_panic_trace();
                error!(call_id, "function panicked: {}", message);
                return Ok(FunctionResult::internal_error("panic", &message, &trace));
            }
        };

        if let Err(message) = validate_output(&self.spec, &result) {
            warn!(call_id, defects = message.defects().len(), "function returned an invalid response");
            return Ok(FunctionResult::invalid_response(message));
        }
        Ok(result)
    }
}

thread_local! {
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Installs a panic hook keeping the location and backtrace of the last
/// panic of each thread, then calling the hook it replaced
///
/// A handler panic unwinds into `catch_unwind` on the thread it happened on,
/// so the caught panic is always the last one recorded there.
fn install_panic_trace() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map_or_else(|| "unknown location".to_string(), |l| l.to_string());
            let trace = format!("panicked at {location}\n{}", Backtrace::force_capture());
            let _ = PANIC_TRACE.try_with(|last| *last.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// Takes the trace recorded for the last panic of this thread
fn take_panic_trace() -> String {
    PANIC_TRACE.with(|last| last.borrow_mut().take()).unwrap_or_default()
}

/// Extracts the message of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
