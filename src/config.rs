//! Bridge configuration types and defaults.
//!
//! This module defines the bounds enforced on every call, the optional
//! per-call deadline, the duplicate-key policy and the naming conventions
//! the generated scripts rely on.

use crate::script::is_identifier_path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Default maximum length of a function, class or method name
pub const DEFAULT_MAX_NAME_LEN: usize = 100;

/// Default maximum length of a namespace (package name)
pub const DEFAULT_MAX_NAMESPACE_LEN: usize = 100;

/// Default maximum number of positional arguments
pub const DEFAULT_MAX_ARGS: usize = 10;

/// Default maximum length of raw script text
pub const DEFAULT_MAX_SCRIPT_LEN: usize = 10_000;

/// Default program loaded into the engine at construction
pub const DEFAULT_INITIAL_PROGRAM_URI: &str = "file:///android_asset/index.html";

/// Default global name of the native result interface
pub const DEFAULT_INTERFACE_NAME: &str = "Android";

/// Default script function that invokes a method on a named registry entry
pub const DEFAULT_REGISTRY_INVOKER: &str = "callNpmMethod";

/// Default script function that constructs a class and calls a method on it
pub const DEFAULT_CONSTRUCTOR_INVOKER: &str = "createAndCallMethod";

/// Reserved call key used by the bootstrap call
pub const BOOTSTRAP_KEY: &str = "initialize";

/// What happens when a call is registered under a key that is still pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplicateKeyPolicy {
    /// Replace the pending callback; the previous one is dropped unfired
    #[default]
    Replace,
    /// Fail the new call with a conflict error
    Reject,
}

/// How the bridge initializes the script side once the engine is ready
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Bootstrap {
    /// Evaluate a self-contained script that reports success immediately
    Inline,
    /// Call a function provided by the loaded program, e.g. `initialize(true, cb)`
    PageFunction {
        /// Function name (dotted identifier path)
        name: String,
        /// Leading arguments; the completion callback is appended
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl Default for Bootstrap {
    fn default() -> Self {
        Bootstrap::Inline
    }
}

/// Names the generated scripts reference on the script side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConventions {
    /// Global name under which the native result interface is exposed
    #[serde(default = "default_interface_name")]
    pub interface_name: String,

    /// Function invoking `(namespace, name, ...args, cb)` on a registry entry
    #[serde(default = "default_registry_invoker")]
    pub registry_invoker: String,

    /// Function invoking `(namespace, class, ctorArgs, method, methodArgs, cb)`
    #[serde(default = "default_constructor_invoker")]
    pub constructor_invoker: String,
}

impl Default for ScriptConventions {
    fn default() -> Self {
        Self {
            interface_name: DEFAULT_INTERFACE_NAME.to_string(),
            registry_invoker: DEFAULT_REGISTRY_INVOKER.to_string(),
            constructor_invoker: DEFAULT_CONSTRUCTOR_INVOKER.to_string(),
        }
    }
}

/// Configuration for a bridge instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Maximum function/class/method name length (default: 100)
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,

    /// Maximum namespace length (default: 100)
    #[serde(default = "default_max_namespace_len")]
    pub max_namespace_len: usize,

    /// Maximum positional arguments per argument list (default: 10)
    #[serde(default = "default_max_args")]
    pub max_args: usize,

    /// Maximum raw script length for labelled calls (default: 10000)
    #[serde(default = "default_max_script_len")]
    pub max_script_len: usize,

    /// Per-call deadline in milliseconds (default: none)
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,

    /// Policy for re-registration under a pending key (default: replace)
    #[serde(default)]
    pub duplicate_key_policy: DuplicateKeyPolicy,

    /// Program loaded into the engine at construction
    #[serde(default = "default_initial_program_uri")]
    pub initial_program_uri: String,

    /// Script-side naming conventions
    #[serde(default)]
    pub conventions: ScriptConventions,

    /// Bootstrap strategy
    #[serde(default)]
    pub bootstrap: Bootstrap,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_namespace_len: DEFAULT_MAX_NAMESPACE_LEN,
            max_args: DEFAULT_MAX_ARGS,
            max_script_len: DEFAULT_MAX_SCRIPT_LEN,
            call_timeout_ms: None,
            duplicate_key_policy: DuplicateKeyPolicy::Replace,
            initial_program_uri: DEFAULT_INITIAL_PROGRAM_URI.to_string(),
            conventions: ScriptConventions::default(),
            bootstrap: Bootstrap::Inline,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum name length
    pub fn with_max_name_len(mut self, len: usize) -> Self {
        self.max_name_len = len;
        self
    }

    /// Set the maximum namespace length
    pub fn with_max_namespace_len(mut self, len: usize) -> Self {
        self.max_namespace_len = len;
        self
    }

    /// Set the maximum argument count
    pub fn with_max_args(mut self, count: usize) -> Self {
        self.max_args = count;
        self
    }

    /// Set the maximum raw script length
    pub fn with_max_script_len(mut self, len: usize) -> Self {
        self.max_script_len = len;
        self
    }

    /// Set a per-call deadline
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the duplicate-key policy
    pub fn with_duplicate_key_policy(mut self, policy: DuplicateKeyPolicy) -> Self {
        self.duplicate_key_policy = policy;
        self
    }

    /// Set the initial program URI
    pub fn with_initial_program(mut self, uri: impl Into<String>) -> Self {
        self.initial_program_uri = uri.into();
        self
    }

    /// Set the script-side conventions
    pub fn with_conventions(mut self, conventions: ScriptConventions) -> Self {
        self.conventions = conventions;
        self
    }

    /// Set the bootstrap strategy
    pub fn with_bootstrap(mut self, bootstrap: Bootstrap) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Parse a JSON configuration and validate it
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Per-call deadline as a duration
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = [
            ("max_name_len", self.max_name_len),
            ("max_namespace_len", self.max_namespace_len),
            ("max_script_len", self.max_script_len),
        ];
        for (field, value) in bounds {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    reason: "must be greater than 0".into(),
                });
            }
        }

        if self.call_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "call_timeout_ms".into(),
                reason: "must be greater than 0 when set".into(),
            });
        }

        if self.initial_program_uri.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "initial_program_uri".into(),
            });
        }

        let names = [
            ("conventions.interface_name", &self.conventions.interface_name),
            ("conventions.registry_invoker", &self.conventions.registry_invoker),
            (
                "conventions.constructor_invoker",
                &self.conventions.constructor_invoker,
            ),
        ];
        for (field, value) in names {
            if !is_identifier_path(value) {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    reason: format!("'{}' is not a JavaScript identifier path", value),
                });
            }
        }

        if let Bootstrap::PageFunction { name, args } = &self.bootstrap {
            if !is_identifier_path(name) {
                return Err(ConfigError::InvalidValue {
                    field: "bootstrap.name".into(),
                    reason: format!("'{}' is not a JavaScript identifier path", name),
                });
            }
            if args.len() > self.max_args {
                return Err(ConfigError::InvalidValue {
                    field: "bootstrap.args".into(),
                    reason: format!("at most {} arguments allowed", self.max_args),
                });
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// Missing required field
    #[error("Missing required configuration field: {field}")]
    MissingField {
        /// The field name
        field: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_max_name_len() -> usize {
    DEFAULT_MAX_NAME_LEN
}

fn default_max_namespace_len() -> usize {
    DEFAULT_MAX_NAMESPACE_LEN
}

fn default_max_args() -> usize {
    DEFAULT_MAX_ARGS
}

fn default_max_script_len() -> usize {
    DEFAULT_MAX_SCRIPT_LEN
}

fn default_initial_program_uri() -> String {
    DEFAULT_INITIAL_PROGRAM_URI.to_string()
}

fn default_interface_name() -> String {
    DEFAULT_INTERFACE_NAME.to_string()
}

fn default_registry_invoker() -> String {
    DEFAULT_REGISTRY_INVOKER.to_string()
}

fn default_constructor_invoker() -> String {
    DEFAULT_CONSTRUCTOR_INVOKER.to_string()
}
