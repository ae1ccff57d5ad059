//! Script engine host boundary.
//!
//! The bridge drives an embedded JavaScript context through the
//! `ScriptEngine` trait. Hosts wrap a real web view or JS runtime; the
//! in-process `RecordingEngine` stands in for one in tests and tooling.
//!
//! Evaluation may be thread-affine in the underlying host. Callers marshal
//! onto the host's thread before calling into the bridge; the trait itself
//! only requires `Send + Sync` so a bridge can be shared.

pub mod recording;

pub use recording::RecordingEngine;

use crate::error::EngineError;
use crate::intake::ResultIntake;

/// Handler receiving the value of a synchronously evaluated script
pub type EvalCompletion = Box<dyn FnOnce(String) + Send + 'static>;

/// An embeddable JavaScript execution environment
pub trait ScriptEngine: Send + Sync {
    /// Load the program the bridge's scripts run against
    fn load_initial_program(&self, uri: &str) -> Result<(), EngineError>;

    /// Make `intake` reachable from script as `window.<name>.handleResult`
    fn expose_interface(&self, name: &str, intake: ResultIntake) -> Result<(), EngineError>;

    /// Evaluate `script`.
    ///
    /// When `on_complete` is given, the host calls it with the script's
    /// value encoded as a JSON string once evaluation finishes.
    fn evaluate(&self, script: &str, on_complete: Option<EvalCompletion>)
        -> Result<(), EngineError>;

    /// Clear history and caches and replace the program with a blank document
    fn reset(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Tear the host down; no call is made on it afterwards
    fn destroy(&self);
}
