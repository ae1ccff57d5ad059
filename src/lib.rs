//! # JS Bridge
//!
//! This library lets native code call functions running inside an embedded
//! JavaScript engine (a web-view style context) and receive their results
//! asynchronously, without a shared call stack between the two sides.
//!
//! ## Architecture
//!
//! ```text
//! Native caller
//!     │
//!     │ call_function / call_by_label / invoke
//!     ▼
//! JsBridge ── lifecycle gate ── validation ── CallCorrelator (register)
//!     │
//!     │ ScriptBuilder renders, ScriptEngine evaluates
//!     ▼
//! Script engine
//!     │
//!     │ window.<interface>.handleResult(key, result)
//!     ▼
//! ResultIntake ── CallCorrelator (resolve, at most once) ── callback
//! ```
//!
//! ## Features
//!
//! - **At-most-once delivery**: each pending callback fires once or never
//! - **Structured arguments**: arguments travel as one escaped JSON array
//! - **Lifecycle gating**: calls are refused until bootstrap and after disposal
//! - **Optional deadlines**: stranded calls receive a `TIMEOUT` failure
//! - **Awaitable calls**: `invoke` returns a future over the raw result

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bridge;
pub mod call;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod intake;
pub mod lifecycle;
pub mod metrics;
pub mod script;

// Re-export commonly used types
pub use bridge::{JsBridge, PendingCall};
pub use call::{CallKey, CallMode, Envelope, ResultCallback};
pub use config::{Bootstrap, BridgeConfig, DuplicateKeyPolicy, ScriptConventions};
pub use correlator::{CallCorrelator, PendingCallInfo};
pub use engine::{EvalCompletion, RecordingEngine, ScriptEngine};
pub use error::{BridgeError, CallFailure, EngineError, ErrorCode, Result};
pub use intake::ResultIntake;
pub use lifecycle::{BootstrapStart, LifecycleState};
pub use metrics::{BridgeStats, MetricsCollector};
pub use script::{ScriptBuilder, ScriptCommand};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default log directive when `RUST_LOG` is unset
const DEFAULT_LOG_DIRECTIVE: &str = "js_bridge=debug";

/// Install a fmt subscriber filtered by `RUST_LOG` (default `js_bridge=debug`).
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_DIRECTIVE));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
