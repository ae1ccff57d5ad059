//! Public call surface.
//!
//! `JsBridge` ties the pieces together: every call passes the lifecycle
//! gate and validation, is registered with the correlator, rendered to a
//! script and handed to the engine. The result comes back later through
//! `ResultIntake::handle_result` on whatever thread the engine uses.

use crate::call::{CallKey, CallMode, Envelope, ResultCallback};
use crate::config::{BridgeConfig, BOOTSTRAP_KEY};
use crate::correlator::{invoke_guarded, CallCorrelator, PendingCallInfo};
use crate::engine::{EvalCompletion, ScriptEngine};
use crate::error::{BridgeError, CallFailure, EngineError, Result};
use crate::intake::ResultIntake;
use crate::lifecycle::{BootstrapStart, Lifecycle, LifecycleState};
use crate::metrics::{BridgeStats, MetricsCollector};
use crate::script::{CallValidator, ScriptBuilder, ScriptCommand};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

type InitCallback = Arc<dyn Fn(bool) + Send + Sync + 'static>;

/// Bridge between native callers and an embedded script engine
pub struct JsBridge {
    config: BridgeConfig,
    lifecycle: Arc<Lifecycle>,
    correlator: Arc<CallCorrelator>,
    intake: ResultIntake,
    builder: ScriptBuilder,
    validator: CallValidator,
    /// Cleared on disposal
    engine: RwLock<Option<Arc<dyn ScriptEngine>>>,
    metrics: Arc<MetricsCollector>,
    on_initialized: InitCallback,
}

impl JsBridge {
    /// Create a bridge owning `engine`.
    ///
    /// Exposes the result interface and loads the initial program. The
    /// bridge stays `Uninitialized` until `on_engine_ready` runs a
    /// successful bootstrap; `on_initialized` receives every bootstrap
    /// outcome, and `false` if engine setup fails here.
    pub fn new<F>(engine: Arc<dyn ScriptEngine>, config: BridgeConfig, on_initialized: F) -> Result<Self>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        config.validate()?;
        let on_initialized: InitCallback = Arc::new(on_initialized);

        info!(
            interface = %config.conventions.interface_name,
            program = %config.initial_program_uri,
            timeout_ms = ?config.call_timeout_ms,
            policy = ?config.duplicate_key_policy,
            "Creating JS bridge"
        );

        let metrics = Arc::new(MetricsCollector::new());
        let correlator = Arc::new(CallCorrelator::with_metrics(
            config.duplicate_key_policy,
            config.call_timeout(),
            Arc::clone(&metrics),
        ));
        let intake = ResultIntake::new(Arc::clone(&correlator));

        let setup = engine
            .expose_interface(&config.conventions.interface_name, intake.clone())
            .and_then(|()| engine.load_initial_program(&config.initial_program_uri));
        if let Err(e) = setup {
            error!(error = %e, "Engine setup failed");
            engine.destroy();
            on_initialized(false);
            return Err(BridgeError::Engine(e));
        }

        Ok(Self {
            builder: ScriptBuilder::new(config.conventions.clone()),
            validator: CallValidator::from_config(&config),
            config,
            lifecycle: Arc::new(Lifecycle::new()),
            correlator,
            intake,
            engine: RwLock::new(Some(engine)),
            metrics,
            on_initialized,
        })
    }

    /// Engine-ready signal: run the bootstrap call.
    ///
    /// Returns `Ok(true)` if a bootstrap was submitted and `Ok(false)` if
    /// the bridge is already initialized. Safe to call on every program
    /// (re)load: a bootstrap still in flight belongs to the program that
    /// was replaced, so its entry is dropped and the bootstrap runs again.
    #[instrument(skip(self))]
    pub fn on_engine_ready(&self) -> Result<bool> {
        let start = self.lifecycle.begin_bootstrap()?;
        if !start.should_submit() {
            debug!(state = %self.lifecycle.state(), "Bootstrap skipped");
            return Ok(false);
        }

        let key = CallKey::label(BOOTSTRAP_KEY);
        if start == BootstrapStart::Restarted {
            let discarded = self.correlator.discard(key.as_str());
            info!(discarded = discarded, "Engine reloaded during bootstrap; restarting it");
        }

        let lifecycle = Arc::clone(&self.lifecycle);
        let on_initialized = Arc::clone(&self.on_initialized);
        let callback: ResultCallback = Box::new(move |raw| {
            let success = match Envelope::parse(&raw) {
                Ok(envelope) => envelope.success,
                Err(e) => {
                    warn!(error = %e, "Unreadable bootstrap result");
                    false
                }
            };
            let initialized = lifecycle.complete_bootstrap(success);
            info!(initialized = initialized, "Bootstrap finished");
            on_initialized(initialized);
        });

        let submitted = self
            .builder
            .bootstrap(&key, &self.config.bootstrap)
            .and_then(|command| self.submit(command, callback));
        if let Err(e) = submitted {
            error!(error = %e, "Bootstrap could not be submitted");
            self.lifecycle.complete_bootstrap(false);
            (self.on_initialized)(false);
            return Err(e);
        }
        Ok(true)
    }

    /// Run caller-supplied script text whose completion reports under `label`.
    ///
    /// The script itself must call `handleResult(label, result)`.
    #[instrument(skip(self, script, callback), fields(script_len = script.len()))]
    pub fn call_by_label<F>(&self, label: &str, script: &str, callback: F) -> Result<()>
    where
        F: FnOnce(String) + Send + 'static,
    {
        const OP: &str = "call_by_label";
        self.admit(OP, || {
            self.validator.label(label)?;
            self.validator.script(script)
        })?;

        let key = CallKey::label(label);
        let command = self.builder.raw(&key, script);
        self.submit(command, Box::new(callback))
            .map_err(|e| self.rejected(OP, e))
    }

    /// Call `function_name` (optionally on a registry namespace) asynchronously.
    ///
    /// The result is delivered under `ns.function_name`, or `function_name`
    /// without a namespace.
    #[instrument(skip(self, args, callback), fields(arg_count = args.len()))]
    pub fn call_function<F>(
        &self,
        namespace: Option<&str>,
        function_name: &str,
        args: &[Value],
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(String) + Send + 'static,
    {
        let key = CallKey::for_function(namespace, function_name);
        self.submit_function("call_function", key, namespace, function_name, args, Box::new(callback))
    }

    /// Call `function_name` and receive its value through the engine's
    /// evaluation channel instead of the result interface.
    ///
    /// Nothing is registered with the correlator. An evaluation failure is
    /// reported to `callback` as an error-shaped result.
    #[instrument(skip(self, args, callback), fields(arg_count = args.len()))]
    pub fn call_function_sync<F>(
        &self,
        namespace: Option<&str>,
        function_name: &str,
        args: &[Value],
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(String) + Send + 'static,
    {
        const OP: &str = "call_function_sync";
        self.check_function(OP, namespace, function_name, args)?;

        let key = CallKey::for_function(namespace, function_name);
        let command =
            self.builder
                .function_call(&key, namespace, function_name, args, CallMode::Sync)?;

        self.metrics.record_submitted();
        debug!(key = %key, fingerprint = %command.fingerprint(), "Submitting sync call");

        // The engine either runs the completion or returns an error, never both.
        let slot = Arc::new(Mutex::new(Some(callback)));
        let completion_slot = Arc::clone(&slot);
        let completion_metrics = Arc::clone(&self.metrics);
        let completion_key = key.clone();
        let on_complete: EvalCompletion = Box::new(move |value| {
            let callback = completion_slot.lock().take();
            if let Some(callback) = callback {
                invoke_guarded(&completion_metrics, completion_key.as_str(), callback, value);
            }
        });

        if let Err(e) = self.evaluate(command.text(), Some(on_complete)) {
            self.metrics.record_evaluation_failure();
            error!(key = %key, error = %e, "Sync script evaluation failed");
            let callback = slot.lock().take();
            if let Some(callback) = callback {
                let failure = CallFailure::evaluation(key.as_str(), &e);
                invoke_guarded(&self.metrics, key.as_str(), callback, failure.to_result_string());
            }
        }
        Ok(())
    }

    /// Construct `namespace.class_name` and call `method_name` on the instance.
    ///
    /// Absent constructor arguments are passed as `null`, absent method
    /// arguments as `[]`. The result is delivered under `ns.Class.method`.
    #[instrument(skip(self, constructor_args, method_args, callback))]
    pub fn call_constructed_method<F>(
        &self,
        namespace: &str,
        class_name: &str,
        constructor_args: Option<&[Value]>,
        method_name: &str,
        method_args: Option<&[Value]>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(String) + Send + 'static,
    {
        let key = CallKey::for_method(namespace, class_name, method_name);
        self.submit_method(
            "call_constructed_method",
            key,
            namespace,
            class_name,
            constructor_args,
            method_name,
            method_args,
            Box::new(callback),
        )
    }

    /// Awaitable form of `call_function`.
    ///
    /// Each call gets its own key (`ns.fn#<uuid>`), so concurrent calls to
    /// the same function never replace one another. Resolves to the raw
    /// result string, or `Abandoned` if the bridge is disposed first.
    pub fn invoke(
        &self,
        namespace: Option<&str>,
        function_name: &str,
        args: &[Value],
    ) -> Result<PendingCall> {
        let (tx, rx) = oneshot::channel();
        let key = CallKey::unique(CallKey::for_function(namespace, function_name).as_str());
        self.submit_function(
            "invoke",
            key.clone(),
            namespace,
            function_name,
            args,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        Ok(PendingCall { key, rx })
    }

    /// Awaitable form of `call_constructed_method`, keyed `ns.Class.method#<uuid>`
    pub fn invoke_method(
        &self,
        namespace: &str,
        class_name: &str,
        constructor_args: Option<&[Value]>,
        method_name: &str,
        method_args: Option<&[Value]>,
    ) -> Result<PendingCall> {
        let (tx, rx) = oneshot::channel();
        let key = CallKey::unique(CallKey::for_method(namespace, class_name, method_name).as_str());
        self.submit_method(
            "invoke_method",
            key.clone(),
            namespace,
            class_name,
            constructor_args,
            method_name,
            method_args,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        Ok(PendingCall { key, rx })
    }

    /// Deliver a result as the script side would
    pub fn handle_result(&self, function_name: &str, result: &str) -> bool {
        self.intake.handle_result(function_name, result)
    }

    /// Handle to the result entry point exposed to the engine
    pub fn intake(&self) -> ResultIntake {
        self.intake.clone()
    }

    /// Tear the bridge down.
    ///
    /// Pending callbacks are dropped without being invoked, the engine is
    /// reset and destroyed, and every later operation fails with
    /// `InvalidState`, including a second `dispose`.
    #[instrument(skip(self))]
    pub fn dispose(&self) -> Result<()> {
        let previous = self
            .lifecycle
            .transition(LifecycleState::Disposed, "dispose")?;
        let dropped = self.correlator.close();

        if let Some(engine) = self.engine.write().take() {
            if let Err(e) = engine.reset() {
                warn!(error = %e, "Engine reset failed");
            }
            engine.destroy();
        }

        info!(previous = %previous, dropped_calls = dropped, "Bridge disposed");
        Ok(())
    }

    /// Expire overdue calls; returns how many timed out
    pub fn sweep_expired(&self) -> usize {
        self.correlator.sweep_expired()
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Whether calls are accepted
    pub fn is_initialized(&self) -> bool {
        self.lifecycle.is_initialized()
    }

    /// Calls waiting for a result, oldest first
    pub fn pending_calls(&self) -> Vec<PendingCallInfo> {
        self.correlator.pending()
    }

    /// Snapshot of counters and state
    pub fn stats(&self) -> BridgeStats {
        self.metrics
            .snapshot(self.lifecycle.state(), self.correlator.len())
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Bridge configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn submit_function(
        &self,
        operation: &str,
        key: CallKey,
        namespace: Option<&str>,
        function_name: &str,
        args: &[Value],
        callback: ResultCallback,
    ) -> Result<()> {
        self.check_function(operation, namespace, function_name, args)?;

        let command =
            self.builder
                .function_call(&key, namespace, function_name, args, CallMode::Async)?;
        self.submit(command, callback)
            .map_err(|e| self.rejected(operation, e))
    }

    #[allow(clippy::too_many_arguments)]
    fn submit_method(
        &self,
        operation: &str,
        key: CallKey,
        namespace: &str,
        class_name: &str,
        constructor_args: Option<&[Value]>,
        method_name: &str,
        method_args: Option<&[Value]>,
        callback: ResultCallback,
    ) -> Result<()> {
        self.admit(operation, || {
            self.validator.required_namespace("namespace", namespace)?;
            self.validator.name("className", class_name)?;
            self.validator.name("methodName", method_name)?;
            if let Some(args) = constructor_args {
                self.validator.args("constructorArgs", args)?;
            }
            if let Some(args) = method_args {
                self.validator.args("methodArgs", args)?;
            }
            Ok(())
        })?;

        let command = self.builder.constructed_method_call(
            &key,
            namespace,
            class_name,
            constructor_args,
            method_name,
            method_args,
        )?;
        self.submit(command, callback)
            .map_err(|e| self.rejected(operation, e))
    }

    fn check_function(
        &self,
        operation: &str,
        namespace: Option<&str>,
        function_name: &str,
        args: &[Value],
    ) -> Result<()> {
        self.admit(operation, || {
            match namespace.filter(|ns| !ns.is_empty()) {
                Some(ns) => {
                    self.validator.namespace("namespace", ns)?;
                    self.validator.name("functionName", function_name)?;
                }
                None => self.validator.function_name("functionName", function_name)?,
            }
            self.validator.args("args", args)
        })
    }

    /// Lifecycle gate then `checks`; failures are counted as rejections
    fn admit(&self, operation: &str, checks: impl FnOnce() -> Result<()>) -> Result<()> {
        self.lifecycle
            .ensure_initialized(operation)
            .and_then(|()| checks())
            .map_err(|e| self.rejected(operation, e))
    }

    fn rejected(&self, operation: &str, err: BridgeError) -> BridgeError {
        self.metrics.record_rejection(err.code());
        warn!(operation = operation, code = %err.code(), error = %err, "Call rejected");
        err
    }

    /// Register the command's callback, then evaluate it.
    ///
    /// Registration happens first so a result can never arrive before its
    /// entry exists. Engine failures are delivered to the callback.
    fn submit(&self, command: ScriptCommand, callback: ResultCallback) -> Result<()> {
        let key = command
            .key()
            .cloned()
            .ok_or_else(|| BridgeError::validation("script", "command reports no result"))?;

        if self.config.call_timeout_ms.is_some() {
            self.correlator.sweep_expired();
        }

        let registration = self.correlator.register(key.clone(), callback)?;
        self.correlator.schedule_expiry(&registration);
        self.metrics.record_submitted();

        debug!(
            key = %key,
            fingerprint = %command.fingerprint(),
            replaced = registration.replaced,
            "Submitting call"
        );

        if let Err(e) = self.evaluate(command.text(), None) {
            self.metrics.record_evaluation_failure();
            error!(key = %key, fingerprint = %command.fingerprint(), error = %e, "Script evaluation failed");
            let failure = CallFailure::evaluation(key.as_str(), &e);
            self.correlator
                .fail(&registration, failure.to_result_string());
        }
        Ok(())
    }

    fn evaluate(
        &self,
        script: &str,
        on_complete: Option<EvalCompletion>,
    ) -> std::result::Result<(), EngineError> {
        // Clone out of the lock; completions may re-enter the bridge.
        let engine = self.engine.read().clone();
        match engine {
            Some(engine) => engine.evaluate(script, on_complete),
            None => Err(EngineError::new("engine released")),
        }
    }
}

impl Drop for JsBridge {
    fn drop(&mut self) {
        if !self.lifecycle.is_disposed() {
            if let Err(e) = self.dispose() {
                warn!(error = %e, "Dispose on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for JsBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsBridge")
            .field("state", &self.lifecycle.state())
            .field("pending", &self.correlator.len())
            .finish()
    }
}

/// A submitted call whose result has not been awaited yet
#[derive(Debug)]
pub struct PendingCall {
    key: CallKey,
    rx: oneshot::Receiver<String>,
}

impl PendingCall {
    /// Key the result will be delivered under
    pub fn key(&self) -> &CallKey {
        &self.key
    }

    /// Await the result and parse it as an envelope
    pub async fn envelope(self) -> Result<Envelope> {
        let raw = self.await?;
        Envelope::parse(&raw)
    }
}

impl Future for PendingCall {
    type Output = Result<String>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| {
            received.map_err(|_| BridgeError::Abandoned {
                key: this.key.to_string(),
            })
        })
    }
}
