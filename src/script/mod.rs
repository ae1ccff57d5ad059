//! Script generation.
//!
//! Every call becomes a `ScriptCommand`: engine-evaluable text which, once
//! it finishes, reports back through the native result interface under the
//! same `CallKey` used at registration. All quoting of caller data into
//! script text happens in this module.

pub mod builder;
pub mod validate;

pub use builder::ScriptBuilder;
pub use validate::CallValidator;

use crate::call::{CallKey, CallMode};
use sha2::{Digest, Sha256};

/// Generated script text bound to the key it reports under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommand {
    text: String,
    key: Option<CallKey>,
    mode: CallMode,
}

impl ScriptCommand {
    /// Script that reports back through the result interface under `key`
    pub fn reporting(key: CallKey, text: String) -> Self {
        Self {
            text,
            key: Some(key),
            mode: CallMode::Async,
        }
    }

    /// Script whose value is returned by the engine's completion handler
    pub fn returning(text: String) -> Self {
        Self {
            text,
            key: None,
            mode: CallMode::Sync,
        }
    }

    /// Script text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Key the script reports under (async scripts only)
    pub fn key(&self) -> Option<&CallKey> {
        self.key.as_ref()
    }

    /// How the script returns its value
    pub fn mode(&self) -> CallMode {
        self.mode
    }

    /// Short stable digest of the text, for logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.text.as_bytes());
        hex::encode(&digest[..6])
    }

    /// Consume into the script text
    pub fn into_text(self) -> String {
        self.text
    }
}

/// Quote `value` as a single-quoted JavaScript string literal.
///
/// The result evaluates back to exactly `value`. Quotes, backslashes,
/// line terminators (including U+2028/U+2029) and other control characters
/// are escaped; backticks and `${` need no escaping inside single quotes.
pub fn js_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            // Keeps `</script>` inert when the text ends up inside an HTML document
            '<' => out.push_str("\\x3C"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Whether `name` is a dotted JavaScript identifier path such as `wallet.getBalance`.
///
/// ASCII identifiers only; each segment starts with a letter, `_` or `$`.
pub fn is_identifier_path(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => chars
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$'),
                _ => false,
            }
        })
}
