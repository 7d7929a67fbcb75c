//! Lifecycle state shared by functions and interceptors.

use std::sync::atomic::{AtomicU8, Ordering};

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use tracing::trace;

/// Stage of a component's life
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum LifecycleState {
    Unusable = 0,
    Bootstrapping = 1,
    Bootstrapped = 2,
    Initializing = 3,
    Usable = 4,
    Deinitializing = 5,
}

impl LifecycleState {
    /// States reachable from this one
    pub fn valid_transitions(&self) -> &'static [LifecycleState] {
        use LifecycleState::*;
        match self {
            Unusable => &[Bootstrapping],
            Bootstrapping => &[Bootstrapped, Unusable],
            Bootstrapped => &[Initializing, Deinitializing],
            Initializing => &[Usable, Bootstrapped],
            Usable => &[Initializing, Deinitializing],
            Deinitializing => &[Unusable],
        }
    }

    /// True when moving to `target` is legal
    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Atomic lifecycle cell
#[derive(Debug)]
pub struct Lifecycle {
    owner: String,
    state: AtomicU8,
}

impl Lifecycle {
    /// New cell in the unusable state
    pub fn new(owner: impl Into<String>) -> Self {
        Self { owner: owner.into(), state: AtomicU8::new(LifecycleState::Unusable as u8) }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(LifecycleState::Unusable)
    }

    /// True when calls are accepted
    pub fn is_usable(&self) -> bool {
        self.state() == LifecycleState::Usable
    }

    /// Moves to `target` if legal from the current state
    ///
    /// Returns the state found when the transition was refused.
    pub fn transition(&self, target: LifecycleState) -> Result<(), LifecycleState> {
        let target_value = target.to_u8().unwrap_or_default();
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = LifecycleState::from_u8(current).unwrap_or(LifecycleState::Unusable);
            if !from.can_transition_to(target) {
                return Err(from);
            }
            match self.state.compare_exchange(current, target_value, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    trace!(owner = %self.owner, ?from, to = ?target, "lifecycle transition");
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }
}
