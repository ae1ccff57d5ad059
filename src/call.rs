//! Call identity and result types.
//!
//! A `CallKey` links a registered native callback to the script-side
//! completion that eventually resolves it. Results always cross the
//! boundary as strings; `Envelope` is the conventional JSON shape
//! scripts use to report outcomes.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One-shot callback receiving a call's raw result string
pub type ResultCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// Correlation key for one in-flight call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallKey(String);

impl CallKey {
    /// Use a caller-chosen label as the key
    pub fn label(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Key for a plain or namespaced function call: `name` or `ns.name`
    pub fn for_function(namespace: Option<&str>, function_name: &str) -> Self {
        match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => Self(format!("{}.{}", ns, function_name)),
            None => Self(function_name.to_string()),
        }
    }

    /// Key for a constructed-method call: `ns.Class.method`
    pub fn for_method(namespace: &str, class_name: &str, method_name: &str) -> Self {
        Self(format!("{}.{}.{}", namespace, class_name, method_name))
    }

    /// Fresh key that cannot collide with another in-flight call
    pub fn unique(prefix: &str) -> Self {
        Self(format!("{}#{}", prefix, Uuid::new_v4()))
    }

    /// Borrow the key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is empty or whitespace
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for CallKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CallKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for CallKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for CallKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// How a function call returns its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    /// The script reports back through the native result interface
    Async,
    /// The engine returns the evaluated value through its completion handler
    Sync,
}

/// Conventional `{success, data?, error?}` result shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Whether the script-side operation succeeded
    pub success: bool,

    /// Payload (if success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error message (if failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Error code, present on failures synthesized by the bridge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Envelope {
    /// Create a success envelope
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    /// Create a failure envelope
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: None,
        }
    }

    /// Parse a raw result string.
    ///
    /// Fails with `MalformedResult` carrying the raw text when it is not
    /// a JSON object with a boolean `success` member.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            BridgeError::MalformedResult(format!("{} (raw result: {})", e, raw))
        })
    }

    /// Render as a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Data on success, error message as `Err` otherwise
    pub fn into_result(self) -> std::result::Result<Option<Value>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "script reported failure without a message".to_string()))
        }
    }
}
