//! Bridge lifecycle state machine.
//!
//! The bridge starts `Uninitialized`, becomes `Initialized` once the
//! bootstrap call reports success, and ends `Disposed`. Disposed is
//! terminal. Every public call except the bootstrap is gated on
//! `Initialized`.

use crate::error::{BridgeError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Engine created, bootstrap not yet successful
    Uninitialized,
    /// Bootstrap succeeded; calls are accepted
    Initialized,
    /// Bridge torn down; nothing is accepted
    Disposed,
}

impl LifecycleState {
    /// Whether moving from `self` to `to` is a legal transition
    pub fn can_transition_to(self, to: LifecycleState) -> bool {
        matches!(
            (self, to),
            (LifecycleState::Uninitialized, LifecycleState::Initialized)
                | (LifecycleState::Uninitialized, LifecycleState::Disposed)
                | (LifecycleState::Initialized, LifecycleState::Disposed)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Initialized => write!(f, "initialized"),
            LifecycleState::Disposed => write!(f, "disposed"),
        }
    }
}

/// Outcome of claiming the bootstrap slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStart {
    /// No bootstrap was in flight
    Started,
    /// A bootstrap was in flight and is superseded
    Restarted,
    /// Nothing to do
    AlreadyInitialized,
}

impl BootstrapStart {
    /// Whether a bootstrap call should be submitted
    pub fn should_submit(self) -> bool {
        !matches!(self, BootstrapStart::AlreadyInitialized)
    }
}

/// Thread-safe lifecycle controller
#[derive(Debug)]
pub struct Lifecycle {
    state: RwLock<LifecycleState>,
    /// Set while a bootstrap call is in flight
    bootstrapping: AtomicBool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Create a controller in the `Uninitialized` state
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Uninitialized),
            bootstrapping: AtomicBool::new(false),
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Whether calls are currently accepted
    pub fn is_initialized(&self) -> bool {
        self.state() == LifecycleState::Initialized
    }

    /// Whether the bridge has been disposed
    pub fn is_disposed(&self) -> bool {
        self.state() == LifecycleState::Disposed
    }

    /// Fail with `InvalidState` unless initialized
    pub fn ensure_initialized(&self, operation: &str) -> Result<()> {
        match self.state() {
            LifecycleState::Initialized => Ok(()),
            state => Err(BridgeError::invalid_state(operation, state)),
        }
    }

    /// Move to `to`, returning the previous state.
    ///
    /// Illegal transitions leave the state untouched and fail with
    /// `InvalidState` naming `operation`.
    pub fn transition(&self, to: LifecycleState, operation: &str) -> Result<LifecycleState> {
        let mut state = self.state.write();
        let from = *state;
        if !from.can_transition_to(to) {
            return Err(BridgeError::invalid_state(operation, from));
        }
        *state = to;
        if to == LifecycleState::Disposed {
            self.bootstrapping.store(false, Ordering::SeqCst);
        }
        Ok(from)
    }

    /// Claim the bootstrap slot.
    ///
    /// A bootstrap already in flight is taken over (`Restarted`): the
    /// program it ran in may have been reloaded, so its result cannot be
    /// relied on.
    pub fn begin_bootstrap(&self) -> Result<BootstrapStart> {
        let state = self.state.read();
        match *state {
            LifecycleState::Disposed => Err(BridgeError::invalid_state(
                "initialize",
                LifecycleState::Disposed,
            )),
            LifecycleState::Initialized => Ok(BootstrapStart::AlreadyInitialized),
            LifecycleState::Uninitialized => {
                if self.bootstrapping.swap(true, Ordering::SeqCst) {
                    Ok(BootstrapStart::Restarted)
                } else {
                    Ok(BootstrapStart::Started)
                }
            }
        }
    }

    /// Release the bootstrap slot, moving to `Initialized` on success.
    ///
    /// Returns whether the bridge is initialized afterwards.
    pub fn complete_bootstrap(&self, success: bool) -> bool {
        let mut state = self.state.write();
        self.bootstrapping.store(false, Ordering::SeqCst);
        if success && *state == LifecycleState::Uninitialized {
            *state = LifecycleState::Initialized;
        }
        *state == LifecycleState::Initialized
    }

    /// Whether a bootstrap call is in flight
    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrapping.load(Ordering::SeqCst)
    }
}
