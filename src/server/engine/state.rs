//! Engine state machine.

use std::sync::atomic::{AtomicU8, Ordering};

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use tracing::{debug, error};

/// Stage of the engine
///
/// The happy path runs from `BootstrappingFramework` to `Ready`. Each stage
/// has a failed state of its own. `Disposing` is reachable from any state
/// except the disposal states themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum EngineState {
    BootstrappingFramework = 0,
    FrameworkBootstrapFailed = 1,
    ConstructingApi = 2,
    ApiConstructionFailed = 3,
    BootstrappingApi = 4,
    ApiBootstrapFailed = 5,
    InitializingApi = 6,
    ApiInitializationFailed = 7,
    Ready = 8,
    Disposing = 9,
    Disposed = 10,
}

impl EngineState {
    /// States reachable from this one, `Disposing` aside
    pub fn valid_transitions(&self) -> &'static [EngineState] {
        use EngineState::*;
        match self {
            BootstrappingFramework => &[ConstructingApi, FrameworkBootstrapFailed],
            ConstructingApi => &[BootstrappingApi, ApiConstructionFailed],
            BootstrappingApi => &[InitializingApi, ApiBootstrapFailed],
            InitializingApi => &[Ready, ApiInitializationFailed],
            Ready | ApiInitializationFailed => &[InitializingApi],
            FrameworkBootstrapFailed | ApiConstructionFailed | ApiBootstrapFailed => &[],
            Disposing => &[Disposed],
            Disposed => &[],
        }
    }

    /// True when moving to `target` is legal
    pub fn can_transition_to(&self, target: EngineState) -> bool {
        match target {
            EngineState::Disposing => !matches!(self, EngineState::Disposing | EngineState::Disposed),
            _ => self.valid_transitions().contains(&target),
        }
    }

    /// True for the failed states
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            EngineState::FrameworkBootstrapFailed
                | EngineState::ApiConstructionFailed
                | EngineState::ApiBootstrapFailed
                | EngineState::ApiInitializationFailed
        )
    }

    /// HTTP status for calls refused in this state
    ///
    /// Failed states answer 500, every other state that is not ready 503.
    pub fn refusal_status(&self) -> u16 {
        if self.is_error() {
            500
        } else {
            503
        }
    }
}

/// Atomic holder of the engine state
#[derive(Debug)]
pub struct StateCell {
    state: AtomicU8,
}

impl Default for StateCell {
    fn default() -> Self {
        Self { state: AtomicU8::new(EngineState::BootstrappingFramework as u8) }
    }
}

impl StateCell {
    /// Current state
    pub fn get(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
            .unwrap_or(EngineState::FrameworkBootstrapFailed)
    }

    /// Moves to `target` if legal from the current state
    ///
    /// Returns the state found when the transition was refused.
    pub fn transition(&self, target: EngineState) -> Result<(), EngineState> {
        let target_value = target.to_u8().unwrap_or_default();
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = EngineState::from_u8(current).unwrap_or(EngineState::FrameworkBootstrapFailed);
            if !from.can_transition_to(target) {
                return Err(from);
            }
            match self.state.compare_exchange(current, target_value, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    if target.is_error() {
                        error!(?from, to = ?target, "engine stage failed");
                    } else {
                        debug!(?from, to = ?target, "engine state changed");
                    }
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }
}
