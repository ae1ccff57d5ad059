//! End-to-end tests driving `JsBridge` against the recording engine.

use js_bridge::config::BOOTSTRAP_KEY;
use js_bridge::{
    BridgeConfig, BridgeError, CallKey, DuplicateKeyPolicy, Envelope, ErrorCode, JsBridge,
    LifecycleState, RecordingEngine,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

fn ready_bridge(config: BridgeConfig) -> (Arc<JsBridge>, Arc<RecordingEngine>) {
    let engine = Arc::new(RecordingEngine::new());
    let initialized = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&initialized);
    let bridge = JsBridge::new(engine.clone(), config, move |ok| {
        if ok {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    })
    .unwrap();

    bridge.on_engine_ready().unwrap();
    engine.deliver(BOOTSTRAP_KEY, r#"{"success":true}"#);
    assert_eq!(initialized.load(Ordering::SeqCst), 1);
    (Arc::new(bridge), engine)
}

#[test]
fn test_registered_key_matches_script() {
    let (bridge, engine) = ready_bridge(BridgeConfig::default());
    let cases: Vec<(Option<&str>, &str, Vec<Value>)> = vec![
        (None, "getBalance", vec![]),
        (None, "wallet.sign", vec![json!("msg"), json!({"nonce": 1})]),
        (Some("debeem-wallet"), "getAddress", vec![json!(0)]),
        (Some("debeem-cipher"), "encrypt", (0..10).map(|i| json!(i)).collect()),
    ];

    for (namespace, function_name, args) in cases {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bridge
            .call_function(namespace, function_name, &args, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let key = CallKey::for_function(namespace, function_name);
        let pending = bridge.pending_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, key);

        let expected = format!("handleResult('{}'", key);
        assert!(engine.last_script().unwrap().contains(&expected));

        assert!(bridge.handle_result(key.as_str(), "{}"));
        assert!(!bridge.handle_result(key.as_str(), "{}"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(bridge.pending_calls().is_empty());
    }
}

#[test]
fn test_uninitialized_bridge_refuses_every_call() {
    let engine = Arc::new(RecordingEngine::new());
    let bridge = JsBridge::new(engine.clone(), BridgeConfig::default(), |_| {}).unwrap();

    let results = vec![
        bridge.call_by_label("L", "x();", |_| {}),
        bridge.call_function(None, "f", &[], |_| {}),
        bridge.call_function_sync(None, "f", &[], |_| {}),
        bridge.call_constructed_method("ns", "C", None, "m", None, |_| {}),
        bridge.invoke(None, "f", &[]).map(|_| ()),
    ];
    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    assert!(bridge.pending_calls().is_empty());
    assert_eq!(engine.evaluation_count(), 0);
    assert_eq!(bridge.stats().rejected_calls, 5);
}

#[test]
fn test_bounds_checked_before_engine() {
    let (bridge, engine) = ready_bridge(BridgeConfig::default());
    let before = engine.evaluation_count();
    let long_name = "f".repeat(101);
    let long_namespace = "n".repeat(101);
    let eleven: Vec<Value> = (0..11).map(|i| json!(i)).collect();

    let failures = vec![
        (bridge.call_function(None, &long_name, &[], |_| {}), "functionName"),
        (
            bridge.call_function(Some(long_namespace.as_str()), "f", &[], |_| {}),
            "namespace",
        ),
        (bridge.call_function(None, "f", &eleven, |_| {}), "args"),
        (
            bridge.call_constructed_method("ns", "C", Some(eleven.as_slice()), "m", None, |_| {}),
            "constructorArgs",
        ),
        (
            bridge.call_constructed_method("ns", "C", None, "m", Some(eleven.as_slice()), |_| {}),
            "methodArgs",
        ),
        (bridge.call_by_label("L", "", |_| {}), "script"),
        (bridge.call_by_label("L", &"x".repeat(10_001), |_| {}), "script"),
    ];

    for (result, expected_field) in failures {
        match result.unwrap_err() {
            BridgeError::Validation { field, .. } => assert_eq!(field, expected_field),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
    assert_eq!(engine.evaluation_count(), before);
    assert!(bridge.pending_calls().is_empty());
}

#[test]
fn test_label_round_trip() {
    let (bridge, _engine) = ready_bridge(BridgeConfig::default());
    let (tx, rx) = mpsc::channel();

    bridge
        .call_by_label("L", "window.Android.handleResult('L', 'X');", move |r| {
            tx.send(r).unwrap()
        })
        .unwrap();
    bridge.handle_result("L", "X");
    assert_eq!(rx.recv().unwrap(), "X");
}

#[test]
fn test_dispose_never_fires_pending() {
    let (bridge, engine) = ready_bridge(BridgeConfig::default());
    let fired = Arc::new(AtomicUsize::new(0));
    for label in ["first", "second"] {
        let fired = Arc::clone(&fired);
        bridge
            .call_by_label(label, "noop();", move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    bridge.dispose().unwrap();
    bridge.handle_result("first", "late");
    engine.deliver("second", "late");

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(bridge.state(), LifecycleState::Disposed);
    assert_eq!(bridge.stats().unsolicited_results, 1);
    assert!(matches!(
        bridge.call_by_label("again", "noop();", |_| {}),
        Err(BridgeError::InvalidState { .. })
    ));
}

#[test]
fn test_concurrent_delivery_fires_each_callback_once() {
    const THREADS: usize = 32;
    let (bridge, _engine) = ready_bridge(BridgeConfig::default());
    let received: Arc<Mutex<HashMap<String, Vec<String>>>> = Arc::new(Mutex::new(HashMap::new()));

    for i in 0..THREADS {
        let label = format!("call-{}", i);
        let received = Arc::clone(&received);
        let own = label.clone();
        bridge
            .call_by_label(&label, "noop();", move |result| {
                received.lock().entry(own).or_default().push(result);
            })
            .unwrap();
    }

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let bridge = Arc::clone(&bridge);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let label = format!("call-{}", i);
                barrier.wait();
                // Deliver twice; the second must be a no-op
                bridge.handle_result(&label, &format!("result-{}", i));
                bridge.handle_result(&label, "duplicate");
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let received = received.lock();
    assert_eq!(received.len(), THREADS);
    for i in 0..THREADS {
        let results = &received[&format!("call-{}", i)];
        assert_eq!(results, &vec![format!("result-{}", i)]);
    }
    assert!(bridge.pending_calls().is_empty());
    assert_eq!(bridge.stats().results_resolved as usize, THREADS + 1);
    assert_eq!(bridge.stats().unsolicited_results as usize, THREADS);
}

#[test]
fn test_concurrent_calls_and_deliveries() {
    const THREADS: usize = 8;
    const CALLS: usize = 50;
    let (bridge, engine) = ready_bridge(BridgeConfig::default());
    let fired = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let bridge = Arc::clone(&bridge);
            let engine = Arc::clone(&engine);
            let fired = Arc::clone(&fired);
            thread::spawn(move || {
                for c in 0..CALLS {
                    let key = CallKey::unique(&format!("worker{}", t));
                    let fired = Arc::clone(&fired);
                    bridge
                        .call_by_label(key.as_str(), "noop();", move |_| {
                            fired.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    engine.deliver(key.as_str(), &c.to_string());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(fired.load(Ordering::SeqCst), THREADS * CALLS);
    assert!(bridge.pending_calls().is_empty());
}

#[test]
fn test_blank_function_name_is_harmless() {
    let (bridge, _engine) = ready_bridge(BridgeConfig::default());
    bridge.call_by_label("L", "noop();", |_| {}).unwrap();

    assert!(!bridge.handle_result("", "x"));
    assert!(!bridge.handle_result("\t ", "x"));
    assert_eq!(bridge.pending_calls().len(), 1);
}

#[test]
fn test_replace_policy_strands_first_caller() {
    let (bridge, _engine) = ready_bridge(BridgeConfig::default());
    let (tx, rx) = mpsc::channel::<&'static str>();
    let first = tx.clone();

    bridge
        .call_function(None, "getBalance", &[], move |_| first.send("first").unwrap())
        .unwrap();
    bridge
        .call_function(None, "getBalance", &[], move |_| tx.send("second").unwrap())
        .unwrap();
    bridge.handle_result("getBalance", "1");

    assert_eq!(rx.recv().unwrap(), "second");
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_reject_policy_keeps_first_caller() {
    let config = BridgeConfig::default().with_duplicate_key_policy(DuplicateKeyPolicy::Reject);
    let (bridge, _engine) = ready_bridge(config);

    bridge.call_function(None, "getBalance", &[], |_| {}).unwrap();
    let err = bridge
        .call_function(None, "getBalance", &[], |_| {})
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
    assert_eq!(bridge.pending_calls().len(), 1);
}

#[test]
fn test_sweep_times_out_stranded_call() {
    let config = BridgeConfig::default().with_call_timeout(Duration::from_millis(10));
    let (bridge, _engine) = ready_bridge(config);
    let (tx, rx) = mpsc::channel();

    bridge
        .call_by_label("never", "noop();", move |r| tx.send(r).unwrap())
        .unwrap();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(bridge.sweep_expired(), 1);

    let envelope = Envelope::parse(&rx.recv().unwrap()).unwrap();
    assert!(!envelope.success);
    assert_eq!(envelope.code.as_deref(), Some("TIMEOUT"));

    // A late result finds nothing
    assert!(!bridge.handle_result("never", "late"));
    assert_eq!(bridge.stats().timeouts, 1);
}

#[tokio::test]
async fn test_deadline_timer_fires_inside_runtime() {
    let config = BridgeConfig::default().with_call_timeout(Duration::from_millis(20));
    let (bridge, _engine) = ready_bridge(config);

    let pending = bridge.invoke(None, "slow", &[]).unwrap();
    let envelope = pending.envelope().await.unwrap();
    assert_eq!(envelope.code.as_deref(), Some("TIMEOUT"));
    assert!(bridge.pending_calls().is_empty());
}

#[tokio::test]
async fn test_invoke_round_trip_across_tasks() {
    let (bridge, engine) = ready_bridge(BridgeConfig::default());
    let pending = bridge
        .invoke_method(
            "debeem-wallet",
            "WalletAccount",
            Some(&[json!("mnemonic")]),
            "getAddress",
            None,
        )
        .unwrap();
    let key = pending.key().clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.deliver(key.as_str(), r#"{"success":true,"data":"0xabc"}"#);
    });

    let data = pending.envelope().await.unwrap().into_result().unwrap();
    assert_eq!(data, Some(json!("0xabc")));
}

#[test]
fn test_stats_serialize() {
    let (bridge, _engine) = ready_bridge(BridgeConfig::default());
    bridge.call_by_label("L", "noop();", |_| {}).unwrap();

    let stats = serde_json::to_value(bridge.stats()).unwrap();
    assert_eq!(stats["state"], "initialized");
    assert_eq!(stats["pendingCalls"], 1);
    assert_eq!(stats["callsSubmitted"], 2);
}

#[tokio::test]
async fn test_overlapping_invokes_under_reject_policy() {
    let config = BridgeConfig::default().with_duplicate_key_policy(DuplicateKeyPolicy::Reject);
    let (bridge, engine) = ready_bridge(config);

    let calls: Vec<_> = (0..8)
        .map(|i| bridge.invoke(Some("w"), "getBalance", &[json!(i)]).unwrap())
        .collect();
    assert_eq!(bridge.pending_calls().len(), 8);

    for (i, call) in calls.iter().enumerate().rev() {
        assert!(engine.deliver(call.key().as_str(), &i.to_string()));
    }
    for (i, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.unwrap(), i.to_string());
    }
}
