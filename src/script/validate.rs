//! Call validation.
//!
//! Runs before any script is rendered or any callback registered, so a
//! rejected call leaves no trace in the correlator or the engine.

use super::is_identifier_path;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use serde_json::Value;

/// Bounds checked on every call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallValidator {
    max_name_len: usize,
    max_namespace_len: usize,
    max_args: usize,
    max_script_len: usize,
}

impl CallValidator {
    /// Take the bounds from a configuration
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            max_name_len: config.max_name_len,
            max_namespace_len: config.max_namespace_len,
            max_args: config.max_args,
            max_script_len: config.max_script_len,
        }
    }

    /// A function name interpolated as code: bounded and an identifier path
    pub fn function_name(&self, field: &str, name: &str) -> Result<()> {
        self.name(field, name)?;
        if !is_identifier_path(name) {
            return Err(BridgeError::validation(
                field,
                format!("'{}' is not a JavaScript identifier path", name),
            ));
        }
        Ok(())
    }

    /// A name passed as a string literal: non-blank and bounded
    pub fn name(&self, field: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(BridgeError::validation(field, "cannot be blank"));
        }
        let len = name.chars().count();
        if len > self.max_name_len {
            return Err(BridgeError::validation(
                field,
                format!("too long ({} > {} characters)", len, self.max_name_len),
            ));
        }
        Ok(())
    }

    /// A namespace; empty means "no namespace"
    pub fn namespace(&self, field: &str, namespace: &str) -> Result<()> {
        let len = namespace.chars().count();
        if len > self.max_namespace_len {
            return Err(BridgeError::validation(
                field,
                format!("too long ({} > {} characters)", len, self.max_namespace_len),
            ));
        }
        Ok(())
    }

    /// A namespace that must be present
    pub fn required_namespace(&self, field: &str, namespace: &str) -> Result<()> {
        if namespace.trim().is_empty() {
            return Err(BridgeError::validation(field, "cannot be blank"));
        }
        self.namespace(field, namespace)
    }

    /// A positional argument list
    pub fn args(&self, field: &str, args: &[Value]) -> Result<()> {
        if args.len() > self.max_args {
            return Err(BridgeError::validation(
                field,
                format!("too many arguments ({} > {})", args.len(), self.max_args),
            ));
        }
        Ok(())
    }

    /// A caller-chosen label
    pub fn label(&self, label: &str) -> Result<()> {
        if label.trim().is_empty() {
            return Err(BridgeError::validation("label", "cannot be blank"));
        }
        Ok(())
    }

    /// Raw script text
    pub fn script(&self, script: &str) -> Result<()> {
        if script.is_empty() {
            return Err(BridgeError::validation("script", "cannot be empty"));
        }
        let len = script.chars().count();
        if len > self.max_script_len {
            return Err(BridgeError::validation(
                "script",
                format!("too long ({} > {} characters)", len, self.max_script_len),
            ));
        }
        Ok(())
    }
}
