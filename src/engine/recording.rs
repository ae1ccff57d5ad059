//! In-process engine host.
//!
//! `RecordingEngine` runs no JavaScript. It records what the bridge asks
//! of it and lets the caller play the script side: answering sync
//! evaluations and delivering async results through the exposed
//! `ResultIntake`.

use super::{EvalCompletion, ScriptEngine};
use crate::error::EngineError;
use crate::intake::ResultIntake;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Value reported for sync evaluations with no scripted reply
const DEFAULT_SYNC_REPLY: &str = "null";

#[derive(Default)]
struct Recorded {
    programs: Vec<String>,
    interface: Option<(String, ResultIntake)>,
    scripts: Vec<String>,
    fail_next: Option<String>,
    fail_setup: Option<String>,
    sync_replies: VecDeque<String>,
    resets: usize,
    destroyed: bool,
}

/// Engine host that records scripts instead of running them
#[derive(Default)]
pub struct RecordingEngine {
    recorded: Mutex<Recorded>,
}

impl RecordingEngine {
    /// Create a host that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host whose setup (program load) fails with `message`
    pub fn failing_setup(message: impl Into<String>) -> Self {
        let engine = Self::new();
        engine.recorded.lock().fail_setup = Some(message.into());
        engine
    }

    /// Make the next evaluation fail with `message`
    pub fn fail_next_evaluation(&self, message: impl Into<String>) {
        self.recorded.lock().fail_next = Some(message.into());
    }

    /// Queue the value returned by the next sync evaluation
    pub fn reply_sync(&self, value: impl Into<String>) {
        self.recorded.lock().sync_replies.push_back(value.into());
    }

    /// Deliver a result as script code would, through the exposed interface.
    ///
    /// Returns whether a pending call was resolved; `false` if no interface
    /// was exposed.
    pub fn deliver(&self, function_name: &str, result: &str) -> bool {
        let intake = self
            .recorded
            .lock()
            .interface
            .as_ref()
            .map(|(_, intake)| intake.clone());
        match intake {
            Some(intake) => intake.handle_result(function_name, result),
            None => {
                warn!(function_name = function_name, "No interface exposed; result dropped");
                false
            }
        }
    }

    /// Every evaluated script, oldest first
    pub fn scripts(&self) -> Vec<String> {
        self.recorded.lock().scripts.clone()
    }

    /// Most recently evaluated script
    pub fn last_script(&self) -> Option<String> {
        self.recorded.lock().scripts.last().cloned()
    }

    /// Number of evaluated scripts
    pub fn evaluation_count(&self) -> usize {
        self.recorded.lock().scripts.len()
    }

    /// Programs loaded, oldest first
    pub fn loaded_programs(&self) -> Vec<String> {
        self.recorded.lock().programs.clone()
    }

    /// Name the native interface was exposed under
    pub fn interface_name(&self) -> Option<String> {
        self.recorded
            .lock()
            .interface
            .as_ref()
            .map(|(name, _)| name.clone())
    }

    /// Number of resets
    pub fn reset_count(&self) -> usize {
        self.recorded.lock().resets
    }

    /// Whether the host was destroyed
    pub fn is_destroyed(&self) -> bool {
        self.recorded.lock().destroyed
    }
}

impl ScriptEngine for RecordingEngine {
    fn load_initial_program(&self, uri: &str) -> Result<(), EngineError> {
        let mut recorded = self.recorded.lock();
        if let Some(message) = recorded.fail_setup.take() {
            return Err(EngineError::new(message));
        }
        recorded.programs.push(uri.to_string());
        Ok(())
    }

    fn expose_interface(&self, name: &str, intake: ResultIntake) -> Result<(), EngineError> {
        self.recorded.lock().interface = Some((name.to_string(), intake));
        Ok(())
    }

    fn evaluate(
        &self,
        script: &str,
        on_complete: Option<EvalCompletion>,
    ) -> Result<(), EngineError> {
        let reply = {
            let mut recorded = self.recorded.lock();
            if recorded.destroyed {
                return Err(EngineError::new("engine destroyed"));
            }
            if let Some(message) = recorded.fail_next.take() {
                return Err(EngineError::new(message));
            }
            recorded.scripts.push(script.to_string());
            on_complete.as_ref().map(|_| {
                recorded
                    .sync_replies
                    .pop_front()
                    .unwrap_or_else(|| DEFAULT_SYNC_REPLY.to_string())
            })
        };

        debug!(len = script.len(), "Recorded script");

        // Completion runs after the lock is released; it may call back in.
        if let (Some(on_complete), Some(reply)) = (on_complete, reply) {
            on_complete(reply);
        }
        Ok(())
    }

    fn reset(&self) -> Result<(), EngineError> {
        let mut recorded = self.recorded.lock();
        recorded.resets += 1;
        recorded.programs.push("about:blank".to_string());
        Ok(())
    }

    fn destroy(&self) {
        let mut recorded = self.recorded.lock();
        recorded.destroyed = true;
        // Drop the intake so nothing reaches the bridge afterwards
        recorded.interface = None;
    }
}

impl std::fmt::Debug for RecordingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let recorded = self.recorded.lock();
        f.debug_struct("RecordingEngine")
            .field("scripts", &recorded.scripts.len())
            .field("destroyed", &recorded.destroyed)
            .finish()
    }
}
