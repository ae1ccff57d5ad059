//! Native result entry point.
//!
//! `ResultIntake` is the object exposed to script code. Its single member,
//! `handle_result`, may be called from the engine's own thread concurrently
//! with new calls; all table access goes through the correlator's lock.

use crate::correlator::CallCorrelator;
use std::sync::Arc;
use tracing::error;

/// Receives results delivered by script code
#[derive(Clone)]
pub struct ResultIntake {
    correlator: Arc<CallCorrelator>,
}

impl ResultIntake {
    /// Create an intake resolving into `correlator`
    pub fn new(correlator: Arc<CallCorrelator>) -> Self {
        Self { correlator }
    }

    /// Deliver `result` for the call registered under `function_name`.
    ///
    /// A blank name is logged and ignored; an unknown name is a logged
    /// no-op. Returns whether a pending callback fired. Never panics.
    pub fn handle_result(&self, function_name: &str, result: &str) -> bool {
        if function_name.trim().is_empty() {
            error!(result_len = result.len(), "Result delivered with blank function name");
            return false;
        }
        self.correlator.resolve(function_name, result.to_string())
    }
}

impl std::fmt::Debug for ResultIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultIntake")
            .field("pending", &self.correlator.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicateKeyPolicy;
    use std::sync::mpsc;

    fn intake() -> (ResultIntake, Arc<CallCorrelator>) {
        let correlator = Arc::new(CallCorrelator::new(DuplicateKeyPolicy::Replace, None));
        (ResultIntake::new(Arc::clone(&correlator)), correlator)
    }

    #[test]
    fn test_delivers_to_pending_call() {
        let (intake, correlator) = intake();
        let (tx, rx) = mpsc::channel();
        correlator
            .register("L".into(), Box::new(move |r| tx.send(r).unwrap()))
            .unwrap();

        assert!(intake.handle_result("L", "X"));
        assert_eq!(rx.recv().unwrap(), "X");
    }

    #[test]
    fn test_blank_name_is_ignored() {
        let (intake, correlator) = intake();
        correlator.register(" ".into(), Box::new(|_| {})).unwrap();

        assert!(!intake.handle_result("", "x"));
        assert!(!intake.handle_result("   ", "x"));
        assert_eq!(correlator.len(), 1);
        assert_eq!(correlator.metrics().unsolicited_results(), 0);
    }

    #[test]
    fn test_unknown_name_is_noop() {
        let (intake, correlator) = intake();
        assert!(!intake.handle_result("nobody", "x"));
        assert_eq!(correlator.metrics().unsolicited_results(), 1);
    }

    #[test]
    fn test_result_passed_through_unmodified() {
        let (intake, correlator) = intake();
        let (tx, rx) = mpsc::channel();
        correlator
            .register("k".into(), Box::new(move |r| tx.send(r).unwrap()))
            .unwrap();

        let raw = "Error: not json {'";
        intake.handle_result("k", raw);
        assert_eq!(rx.recv().unwrap(), raw);
    }
}
