//! Worker lifecycle state machine.
//!
//! `Parsed → Installing → Installed → Activating → Activated`, with
//! `Redundant` for a failed install or activation. A redundant worker may
//! install again.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entry::GenerationId;
use crate::error::LifecycleError;

/// Worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Configured, nothing cached yet
    Parsed,
    /// Population running
    Installing,
    /// Population done, waiting for activation
    Installed,
    /// Activation running
    Activating,
    /// Serving requests through the cache
    Activated,
    /// Install or activation failed
    Redundant,
}

impl WorkerState {
    /// Get state name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        }
    }

    /// Whether requests go through the cache in this state.
    pub fn controls_requests(&self) -> bool {
        matches!(self, Self::Activated)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// State change
    StateChange { from: WorkerState, to: WorkerState },
    /// A generation was populated or reused during install
    Installed {
        generation: GenerationId,
        version: String,
        reused: bool,
    },
    /// The worker took control of request handling
    ControllerChange,
}

/// Event callback. Shared so a snapshot can be notified without holding
/// the manager.
pub type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Lifecycle manager
pub struct LifecycleManager {
    state: WorkerState,
    listeners: Vec<Listener>,
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl LifecycleManager {
    /// Create a manager in the `Parsed` state.
    pub fn new() -> Self {
        Self {
            state: WorkerState::Parsed,
            listeners: Vec::new(),
        }
    }

    /// Get current state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Add event listener
    pub fn add_listener(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Snapshot of the registered listeners, for notifying after the
    /// manager's lock is released.
    pub fn listeners(&self) -> Vec<Listener> {
        self.listeners.clone()
    }

    /// Deliver `event` to every listener.
    pub fn dispatch(&self, event: &LifecycleEvent) {
        notify(&self.listeners, event);
    }

    /// Move to `to`, rejecting transitions the lifecycle does not allow.
    /// Returns the state-change event; delivering it is up to the caller.
    pub fn transition(&mut self, to: WorkerState) -> Result<LifecycleEvent, LifecycleError> {
        let from = self.state;
        if !is_valid_transition(from, to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }
        self.state = to;
        log::debug!("worker state {} -> {}", from, to);
        Ok(LifecycleEvent::StateChange { from, to })
    }

    /// Take control of request handling.
    pub fn claim(&self) -> Result<LifecycleEvent, LifecycleError> {
        if self.state != WorkerState::Activated {
            return Err(LifecycleError::NotInstalled(self.state));
        }
        Ok(LifecycleEvent::ControllerChange)
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Deliver `event` to each of `listeners` in registration order.
pub fn notify(listeners: &[Listener], event: &LifecycleEvent) {
    for listener in listeners {
        listener(event);
    }
}

/// Check if a state transition is valid
pub fn is_valid_transition(from: WorkerState, to: WorkerState) -> bool {
    use WorkerState::*;

    matches!(
        (from, to),
        (Parsed, Installing)
            | (Installing, Installed)
            | (Installing, Redundant)
            | (Installed, Activating)
            | (Activating, Activated)
            | (Activating, Redundant)
            | (Activated, Redundant)
            // Retry after a failed install
            | (Redundant, Installing)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn full_lifecycle_emits_state_changes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut manager = LifecycleManager::new();
        manager.add_listener(Arc::new(move |event| sink.lock().unwrap().push(event.clone())));

        for state in [
            WorkerState::Installing,
            WorkerState::Installed,
            WorkerState::Activating,
            WorkerState::Activated,
        ] {
            let event = manager.transition(state).unwrap();
            manager.dispatch(&event);
        }
        let claimed = manager.claim().unwrap();
        notify(&manager.listeners(), &claimed);

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            LifecycleEvent::StateChange {
                from: WorkerState::Parsed,
                to: WorkerState::Installing
            }
        );
        assert_eq!(events[4], LifecycleEvent::ControllerChange);
    }

    #[test]
    fn skipping_install_is_rejected() {
        let mut manager = LifecycleManager::new();
        let err = manager.transition(WorkerState::Activated).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidTransition {
                from: WorkerState::Parsed,
                to: WorkerState::Activated
            }
        );
        assert_eq!(manager.state(), WorkerState::Parsed);
    }

    #[test]
    fn redundant_worker_may_retry_install() {
        let mut manager = LifecycleManager::new();
        manager.transition(WorkerState::Installing).unwrap();
        manager.transition(WorkerState::Redundant).unwrap();
        manager.transition(WorkerState::Installing).unwrap();
        assert!(!is_valid_transition(WorkerState::Redundant, WorkerState::Activated));
    }

    #[test]
    fn claim_requires_activation() {
        let manager = LifecycleManager::new();
        assert_eq!(
            manager.claim(),
            Err(LifecycleError::NotInstalled(WorkerState::Parsed))
        );
    }

    #[test]
    fn only_activated_controls_requests() {
        assert!(WorkerState::Activated.controls_requests());
        assert!(!WorkerState::Installed.controls_requests());
        assert_eq!(WorkerState::Activating.to_string(), "activating");
    }
}
