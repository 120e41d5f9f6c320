//! Interrupt Coordinator — per-hardware cancellation flags.
//!
//! Interruption is cooperative: the orchestrator polls `check` at named
//! checkpoints and unwinds the turn when the flag is set. An in-flight
//! synthesis call cannot be preempted; its `CancellationToken` aborts it at
//! the next await point, and callers tolerate a short tail of
//! already-dispatched audio.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use voxflow_core::error::{Result, VoxflowError};

/// Cleanup target invoked with the hardware id when an interrupt fires.
pub type CleanupHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct InterruptOutcome {
    /// Whether any turn was actually in flight for this identity.
    pub was_active: bool,
}

struct HardwareEntry {
    interrupted: bool,
    active_turns: usize,
    cancel: CancellationToken,
}

impl Default for HardwareEntry {
    fn default() -> Self {
        Self {
            interrupted: false,
            active_turns: 0,
            cancel: CancellationToken::new(),
        }
    }
}

/// Per-hardware interrupt-flag register, shared by all stream tasks.
#[derive(Default)]
pub struct InterruptCoordinator {
    entries: Mutex<HashMap<String, HardwareEntry>>,
    cleanup_hooks: Mutex<Vec<CleanupHook>>,
}

impl InterruptCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cleanup target fired on every effective interrupt
    /// (e.g. marking the identity's sessions interrupted in the registry).
    pub fn register_cleanup(&self, hook: CleanupHook) {
        self.cleanup_hooks.lock().unwrap().push(hook);
    }

    /// Record a turn starting; returns the token that aborts the turn's
    /// in-flight sub-calls on interrupt.
    pub fn begin_turn(&self, hardware_id: &str) -> CancellationToken {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(hardware_id.to_string()).or_default();
        entry.active_turns += 1;
        entry.cancel.clone()
    }

    /// Record a turn finishing (normally or unwound).
    pub fn end_turn(&self, hardware_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(hardware_id) {
            entry.active_turns = entry.active_turns.saturating_sub(1);
            if entry.active_turns == 0 && !entry.interrupted {
                entries.remove(hardware_id);
            }
        }
    }

    /// Fast non-blocking flag lookup, polled between pipeline stages.
    pub fn check(&self, hardware_id: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(hardware_id)
            .is_some_and(|e| e.interrupted)
    }

    /// Request interruption of this identity's in-flight turn. Idempotent:
    /// interrupting an idle identity is a harmless no-op that never poisons
    /// a future turn.
    pub fn interrupt(&self, hardware_id: &str) -> InterruptOutcome {
        let was_active = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(hardware_id) {
                Some(entry) if entry.active_turns > 0 => {
                    entry.interrupted = true;
                    entry.cancel.cancel();
                    true
                }
                _ => false,
            }
        };

        if was_active {
            info!(hardware_id, "Interrupt requested for in-flight turn");
            for hook in self.cleanup_hooks.lock().unwrap().iter() {
                hook(hardware_id);
            }
        } else {
            debug!(hardware_id, "Interrupt for idle identity, nothing to do");
        }

        InterruptOutcome { was_active }
    }

    /// Reset the flag so the next turn starts clean. Installs a fresh
    /// token: a turn still unwinding keeps its cancelled clone and can
    /// never be re-armed by the reset.
    pub fn clear(&self, hardware_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(hardware_id) {
            entry.interrupted = false;
            entry.cancel = CancellationToken::new();
            if entry.active_turns == 0 {
                entries.remove(hardware_id);
            }
        }
    }

    fn active_turns(&self, hardware_id: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .get(hardware_id)
            .map_or(0, |e| e.active_turns)
    }

    /// Wait until the identity has no turns in flight. Resolves to
    /// `TimedOut` rather than hanging when the turn fails to unwind.
    pub async fn wait_for_idle(&self, hardware_id: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active_turns(hardware_id) > 0 {
            if tokio::time::Instant::now() >= deadline {
                return Err(VoxflowError::TimedOut(format!(
                    "turn unwind for {hardware_id}"
                )));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }
}
