//! Script command rendering.
//!
//! Arguments travel as one JSON array, quoted once with
//! `js_string_literal` and decoded script-side with `JSON.parse`, then
//! applied to the target. Async commands append a completion function that
//! hands the result to the native interface under the call's key.
//!
//! A call that throws synchronously is caught and reported as an
//! `ENGINE_EVALUATION_ERROR` envelope: under the call's key for async
//! commands, as the returned value for sync ones.
//!
//! Rendering does no bounds checking; callers validate first.

use super::{is_identifier_path, js_string_literal, ScriptCommand};
use crate::call::{CallKey, CallMode};
use crate::config::{Bootstrap, ScriptConventions};
use crate::error::{ErrorCode, Result};
use serde_json::Value;

/// Renders calls into engine-evaluable script text
#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    conventions: ScriptConventions,
}

impl ScriptBuilder {
    /// Create a builder for the given script-side conventions
    pub fn new(conventions: ScriptConventions) -> Self {
        Self { conventions }
    }

    /// Conventions this builder renders against
    pub fn conventions(&self) -> &ScriptConventions {
        &self.conventions
    }

    /// Render a plain or namespaced function call.
    ///
    /// Bare calls render `fn.apply(receiver, args)`; namespaced calls go
    /// through the registry invoker as `invoker(namespace, fn, ...args)`.
    pub fn function_call(
        &self,
        key: &CallKey,
        namespace: Option<&str>,
        function_name: &str,
        args: &[Value],
        mode: CallMode,
    ) -> Result<ScriptCommand> {
        let args_json = json_array_literal(args)?;
        let push_completion = match mode {
            CallMode::Async => format!("\n        __args.push({});", self.completion_fn(key)),
            CallMode::Sync => String::new(),
        };
        let on_error = match mode {
            CallMode::Async => self.report_failure(key),
            CallMode::Sync => format!("return {};", failure_object()),
        };

        let invocation = match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => format!(
                "{invoker}.apply(null, [{ns}, {name}].concat(__args))",
                invoker = self.conventions.registry_invoker,
                ns = js_string_literal(ns),
                name = js_string_literal(function_name),
            ),
            None => {
                debug_assert!(is_identifier_path(function_name));
                format!(
                    "{target}.apply({receiver}, __args)",
                    target = function_name,
                    receiver = receiver_of(function_name),
                )
            }
        };

        let text = format!(
            r#"(function() {{
    try {{
        var __args = JSON.parse({args_json});{push_completion}
        return {invocation};
    }} catch (e) {{
        {on_error}
    }}
}})();"#
        );

        Ok(match mode {
            CallMode::Async => ScriptCommand::reporting(key.clone(), text),
            CallMode::Sync => ScriptCommand::returning(text),
        })
    }

    /// Render a construct-then-call: `new ns.Class(...ctorArgs).method(...methodArgs)`.
    ///
    /// Missing constructor arguments render as `null`, missing method
    /// arguments as `[]`.
    pub fn constructed_method_call(
        &self,
        key: &CallKey,
        namespace: &str,
        class_name: &str,
        constructor_args: Option<&[Value]>,
        method_name: &str,
        method_args: Option<&[Value]>,
    ) -> Result<ScriptCommand> {
        let ctor_json = match constructor_args {
            Some(args) => json_array_literal(args)?,
            None => js_string_literal("null"),
        };
        let method_json = json_array_literal(method_args.unwrap_or(&[]))?;

        let text = format!(
            r#"(function() {{
    try {{
        var __ctorArgs = JSON.parse({ctor_json});
        var __methodArgs = JSON.parse({method_json});
        return {invoker}({ns}, {class}, __ctorArgs, {method}, __methodArgs, {completion});
    }} catch (e) {{
        {on_error}
    }}
}})();"#,
            invoker = self.conventions.constructor_invoker,
            ns = js_string_literal(namespace),
            class = js_string_literal(class_name),
            method = js_string_literal(method_name),
            completion = self.completion_fn(key),
            on_error = self.report_failure(key),
        );

        Ok(ScriptCommand::reporting(key.clone(), text))
    }

    /// Render the bootstrap call reporting under `key`
    pub fn bootstrap(&self, key: &CallKey, bootstrap: &Bootstrap) -> Result<ScriptCommand> {
        match bootstrap {
            Bootstrap::PageFunction { name, args } => {
                self.function_call(key, None, name, args, CallMode::Async)
            }
            Bootstrap::Inline => {
                let text = format!(
                    r#"(function() {{
    var init = async function() {{
        try {{
            return {{ success: true }};
        }} catch (error) {{
            return {{ success: false, error: String(error) }};
        }}
    }};
    init().then({completion});
}})();"#,
                    completion = self.completion_fn(key),
                );
                Ok(ScriptCommand::reporting(key.clone(), text))
            }
        }
    }

    /// Wrap caller-supplied script text reporting under `key`
    pub fn raw(&self, key: &CallKey, script: &str) -> ScriptCommand {
        ScriptCommand::reporting(key.clone(), script.to_string())
    }

    /// Script expression forwarding a result to the native interface.
    ///
    /// Non-string results are JSON-encoded so the native side always
    /// receives a string.
    fn completion_fn(&self, key: &CallKey) -> String {
        format!(
            "function(result) {{ window.{iface}.handleResult({key}, typeof result === 'string' ? result : JSON.stringify(result)); }}",
            iface = self.conventions.interface_name,
            key = js_string_literal(key.as_str()),
        )
    }

    /// Statement reporting the caught exception `e` under `key`
    fn report_failure(&self, key: &CallKey) -> String {
        format!(
            "window.{iface}.handleResult({key}, JSON.stringify({failure}));",
            iface = self.conventions.interface_name,
            key = js_string_literal(key.as_str()),
            failure = failure_object(),
        )
    }
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new(ScriptConventions::default())
    }
}

/// Error envelope object literal for the caught exception `e`
fn failure_object() -> String {
    format!(
        "{{ success: false, error: String(e), code: {code} }}",
        code = js_string_literal(&ErrorCode::EngineEvaluationError.to_string()),
    )
}

/// JSON array of `args`, quoted as a JS string literal
fn json_array_literal(args: &[Value]) -> Result<String> {
    let json = serde_json::to_string(args)?;
    Ok(js_string_literal(&json))
}

/// `this` for a dotted target: `a.b` for `a.b.c`, `null` for a bare name
fn receiver_of(path: &str) -> &str {
    match path.rfind('.') {
        Some(idx) => &path[..idx],
        None => "null",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builder() -> ScriptBuilder {
        ScriptBuilder::default()
    }

    #[test]
    fn test_bare_async_call() {
        let key = CallKey::for_function(None, "getBalance");
        let cmd = builder()
            .function_call(&key, None, "getBalance", &[json!("0xabc")], CallMode::Async)
            .unwrap();

        let text = cmd.text();
        assert_eq!(cmd.key(), Some(&key));
        assert!(text.contains(r#"JSON.parse('["0xabc"]')"#));
        assert!(text.contains("__args.push(function(result)"));
        assert!(text.contains("window.Android.handleResult('getBalance'"));
        assert!(text.contains("getBalance.apply(null, __args)"));
    }

    #[test]
    fn test_async_call_reports_thrown_error_under_key() {
        let key = CallKey::unique("w.getBalance");
        let cmd = builder()
            .function_call(&key, Some("w"), "getBalance", &[], CallMode::Async)
            .unwrap();

        let text = cmd.text();
        assert!(text.contains("try {"));
        assert!(text.contains(&format!(
            "}} catch (e) {{\n        window.Android.handleResult('{}', JSON.stringify({{ success: false, error: String(e), code: 'ENGINE_EVALUATION_ERROR' }}));",
            key
        )));
    }

    #[test]
    fn test_sync_call_returns_thrown_error() {
        let key = CallKey::for_function(None, "version");
        let cmd = builder()
            .function_call(&key, None, "version", &[], CallMode::Sync)
            .unwrap();

        assert!(cmd.text().contains(
            "return { success: false, error: String(e), code: 'ENGINE_EVALUATION_ERROR' };"
        ));
        assert!(!cmd.text().contains("handleResult"));
    }

    #[test]
    fn test_constructed_method_reports_thrown_error() {
        let key = CallKey::for_method("ns", "C", "m");
        let cmd = builder()
            .constructed_method_call(&key, "ns", "C", None, "m", None)
            .unwrap();

        let handler = cmd.text().split("catch (e)").nth(1).unwrap().to_string();
        assert!(handler.contains("window.Android.handleResult('ns.C.m', JSON.stringify("));
        assert!(handler.contains("code: 'ENGINE_EVALUATION_ERROR'"));
    }

    #[test]
    fn test_bare_sync_call_has_no_completion() {
        let key = CallKey::for_function(None, "version");
        let cmd = builder()
            .function_call(&key, None, "version", &[], CallMode::Sync)
            .unwrap();

        assert_eq!(cmd.mode(), CallMode::Sync);
        assert!(cmd.key().is_none());
        assert!(!cmd.text().contains("handleResult"));
        assert!(cmd.text().contains("JSON.parse('[]')"));
        assert!(cmd.text().contains("return version.apply(null, __args);"));
    }

    #[test]
    fn test_dotted_target_keeps_receiver() {
        let key = CallKey::for_function(None, "wallet.accounts.list");
        let cmd = builder()
            .function_call(&key, None, "wallet.accounts.list", &[], CallMode::Sync)
            .unwrap();
        assert!(cmd
            .text()
            .contains("wallet.accounts.list.apply(wallet.accounts, __args)"));
    }

    #[test]
    fn test_namespaced_call_uses_registry_and_full_key() {
        let key = CallKey::for_function(Some("debeem-wallet"), "getBalance");
        let cmd = builder()
            .function_call(
                &key,
                Some("debeem-wallet"),
                "getBalance",
                &[json!(1)],
                CallMode::Async,
            )
            .unwrap();

        let text = cmd.text();
        assert!(text.contains("callNpmMethod.apply(null, ['debeem-wallet', 'getBalance'].concat(__args))"));
        // The completion reports under the registered key, not the bare name
        assert!(text.contains("handleResult('debeem-wallet.getBalance'"));
    }

    #[test]
    fn test_namespaced_sync_call() {
        let key = CallKey::for_function(Some("ns"), "f");
        let cmd = builder()
            .function_call(&key, Some("ns"), "f", &[], CallMode::Sync)
            .unwrap();
        assert!(cmd.text().contains("return callNpmMethod.apply(null, ['ns', 'f'].concat(__args));"));
        assert!(!cmd.text().contains("handleResult"));
    }

    #[test]
    fn test_hostile_arguments_stay_inside_literal() {
        let key = CallKey::label("sign");
        let hostile = json!("'); window.Android.handleResult('sign', 'forged'); ('");
        let cmd = builder()
            .function_call(&key, None, "sign", &[hostile, json!("`${x}`")], CallMode::Async)
            .unwrap();

        let text = cmd.text();
        let parse_line = text
            .lines()
            .find(|l| l.contains("JSON.parse"))
            .unwrap();
        // Exactly one unescaped opening and closing quote on the argument line
        let bytes = parse_line.as_bytes();
        let unescaped_quotes = bytes
            .iter()
            .enumerate()
            .filter(|(i, b)| {
                **b == b'\''
                    && bytes[..*i].iter().rev().take_while(|c| **c == b'\\').count() % 2 == 0
            })
            .count();
        assert_eq!(unescaped_quotes, 2);
        assert!(parse_line.contains("`${x}`"));
    }

    #[test]
    fn test_constructed_method_defaults() {
        let key = CallKey::for_method("debeem-wallet", "WalletAccount", "getAddress");
        let cmd = builder()
            .constructed_method_call(&key, "debeem-wallet", "WalletAccount", None, "getAddress", None)
            .unwrap();

        let text = cmd.text();
        assert!(text.contains("var __ctorArgs = JSON.parse('null');"));
        assert!(text.contains("var __methodArgs = JSON.parse('[]');"));
        assert!(text.contains(
            "createAndCallMethod('debeem-wallet', 'WalletAccount', __ctorArgs, 'getAddress', __methodArgs, function(result)"
        ));
        assert!(text.contains("handleResult('debeem-wallet.WalletAccount.getAddress'"));
    }

    #[test]
    fn test_constructed_method_with_args() {
        let key = CallKey::for_method("ns", "C", "m");
        let cmd = builder()
            .constructed_method_call(
                &key,
                "ns",
                "C",
                Some(&[json!({"mnemonic": "a b c"})]),
                "m",
                Some(&[json!(7), json!(null)]),
            )
            .unwrap();

        assert!(cmd.text().contains(r#"JSON.parse('[{"mnemonic":"a b c"}]')"#));
        assert!(cmd.text().contains("JSON.parse('[7,null]')"));
    }

    #[test]
    fn test_inline_bootstrap() {
        let key = CallKey::label("initialize");
        let cmd = builder().bootstrap(&key, &Bootstrap::Inline).unwrap();

        assert_eq!(cmd.key(), Some(&key));
        assert!(cmd.text().contains("return { success: true };"));
        assert!(cmd.text().contains("handleResult('initialize'"));
    }

    #[test]
    fn test_page_function_bootstrap() {
        let key = CallKey::label("initialize");
        let bootstrap = Bootstrap::PageFunction {
            name: "initialize".into(),
            args: vec![json!(true)],
        };
        let cmd = builder().bootstrap(&key, &bootstrap).unwrap();

        assert!(cmd.text().contains("JSON.parse('[true]')"));
        assert!(cmd.text().contains("initialize.apply(null, __args)"));
        assert!(cmd.text().contains("handleResult('initialize'"));
        // A throwing initializer still reports under the bootstrap key
        assert!(cmd.text().contains("catch (e) {\n        window.Android.handleResult('initialize', JSON.stringify("));
    }

    #[test]
    fn test_custom_interface_name() {
        let builder = ScriptBuilder::new(ScriptConventions {
            interface_name: "NativeBridge".into(),
            ..ScriptConventions::default()
        });
        let key = CallKey::label("k");
        let cmd = builder
            .function_call(&key, None, "f", &[], CallMode::Async)
            .unwrap();
        assert!(cmd.text().contains("window.NativeBridge.handleResult('k'"));
    }

    #[test]
    fn test_raw_script_passthrough() {
        let key = CallKey::label("L");
        let cmd = builder().raw(&key, "console.log('x');");
        assert_eq!(cmd.text(), "console.log('x');");
        assert_eq!(cmd.key(), Some(&key));
    }
}
