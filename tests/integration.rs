//! End-to-end integration tests for rulenet.
//!
//! These tests wire engines, rule runtimes and the local directory together
//! the way an application would: rules subscribe through handles, derive new
//! facts, and post them back into an engine.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use rulenet::engine::{EngineConfig, EngineImage, ReasoningEngine};
use rulenet::error::{InferenceError, InvokeResult, TrieError};
use rulenet::handle::Handle;
use rulenet::invoke::async_method::AsyncMethod;
use rulenet::invoke::{Invoker, LocalDirectory, methods};
use rulenet::key::{Fact, KeyPath};
use rulenet::keypath;
use rulenet::rule::{FailurePolicy, InferenceContext, Rule, RuleConfig, RuleRuntime, RuleStatus};

const WAIT: Duration = Duration::from_secs(5);

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !done() {
        if start.elapsed() > WAIT {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}

/// Forwards every pass's view of one path to a channel.
struct Watch {
    path: KeyPath,
    seen: mpsc::Sender<Fact>,
}

impl Rule for Watch {
    fn infer(&mut self, ctx: &InferenceContext<'_>) -> Result<(), InferenceError> {
        let value = ctx.with_facts(|facts| facts.get(&self.path).ok().cloned());
        if let Some(value) = value {
            let _ = self.seen.send(value);
        }
        Ok(())
    }
}

/// Fires `alarm/heat` into an engine when the temperature crosses a limit.
struct HeatAlarm {
    limit: f64,
    invoker: Arc<dyn Invoker>,
    engine: Handle,
}

impl Rule for HeatAlarm {
    fn infer(&mut self, ctx: &InferenceContext<'_>) -> Result<(), InferenceError> {
        let temp = ctx.with_facts(|facts| {
            facts
                .get(&keypath!["sensor", "temp"])
                .map(|t| t.as_f64())
        })?;
        let Some(temp) = temp else {
            return Err(InferenceError::failed("temperature is not a number"));
        };
        if temp > self.limit {
            self.invoker.invoke(
                &self.engine,
                methods::POST,
                json!({"fact": {"celsius": temp}, "keys": ["alarm", "heat"]}),
            )?;
        }
        Ok(())
    }
}

fn watcher(
    directory: &LocalDirectory,
    name: &str,
    path: KeyPath,
) -> (Handle, Arc<RuleRuntime>, mpsc::Receiver<Fact>) {
    let (tx, rx) = mpsc::channel();
    let runtime = Arc::new(RuleRuntime::with_config(
        Watch { path, seen: tx },
        RuleConfig {
            name: name.into(),
            ..Default::default()
        },
    ));
    let handle = directory.bind(name, runtime.clone());
    (handle, runtime, rx)
}

#[test]
fn rule_derives_fact_into_engine() {
    let directory = Arc::new(LocalDirectory::new());
    let engine = ReasoningEngine::new(EngineConfig::default(), directory.clone());
    let engine_handle = directory.bind("engine", Arc::new(engine.clone()));

    let alarm = Arc::new(RuleRuntime::with_config(
        HeatAlarm {
            limit: 30.0,
            invoker: directory.clone(),
            engine: engine_handle,
        },
        RuleConfig {
            name: "heat-alarm".into(),
            on_failure: FailurePolicy::Continue,
        },
    ));
    let alarm_handle = directory.bind("heat-alarm", alarm.clone());
    let (pager_handle, pager, pages) = watcher(&directory, "pager", keypath!["alarm", "heat"]);

    engine.register(alarm_handle, &keypath!["sensor", "temp"]).unwrap();
    engine.register(pager_handle, &keypath!["alarm", "heat"]).unwrap();

    engine.post(&json!(22.0), &keypath!["sensor", "temp"]).unwrap();
    assert!(wait_until(|| alarm.passes() >= 1));
    assert!(pages.recv_timeout(Duration::from_millis(100)).is_err());

    engine.post(&json!(31.5), &keypath!["sensor", "temp"]).unwrap();
    assert_eq!(pages.recv_timeout(WAIT).unwrap(), json!({"celsius": 31.5}));

    assert_eq!(alarm.status(), RuleStatus::Running);
    assert_eq!(alarm.cancel(), RuleStatus::Stopped);
    pager.cancel();
}

/// Answers "ping" with "pong" on the same path it listens to.
struct Echo {
    invoker: Arc<dyn Invoker>,
    engine: Handle,
    seen: mpsc::Sender<Fact>,
}

impl Rule for Echo {
    fn infer(&mut self, ctx: &InferenceContext<'_>) -> Result<(), InferenceError> {
        let value = ctx.with_facts(|facts| facts.get(&keypath!["in"]).cloned())?;
        let _ = self.seen.send(value.clone());
        if value == json!("ping") {
            self.invoker.invoke(
                &self.engine,
                methods::POST,
                json!({"fact": "pong", "keys": ["in"]}),
            )?;
        }
        Ok(())
    }
}

#[test]
fn rule_can_post_back_into_its_own_path() {
    let directory = Arc::new(LocalDirectory::new());
    let engine = ReasoningEngine::new(EngineConfig::default(), directory.clone());
    let engine_handle = directory.bind("engine", Arc::new(engine.clone()));

    let (tx, rx) = mpsc::channel();
    let echo = Arc::new(RuleRuntime::with_config(
        Echo {
            invoker: directory.clone(),
            engine: engine_handle,
            seen: tx,
        },
        RuleConfig {
            name: "echo".into(),
            ..Default::default()
        },
    ));
    let handle = directory.bind("echo", echo.clone());
    engine.register(handle.clone(), &keypath!["in"]).unwrap();

    engine.post(&json!("ping"), &keypath!["in"]).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), json!("ping"));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), json!("pong"));

    // The self-delivery succeeded, so the rule is still registered.
    assert_eq!(echo.status(), RuleStatus::Running);
    assert_eq!(engine.registry().subscribers(&keypath!["in"]).unwrap(), vec![handle]);
    assert_eq!(engine.stats().evictions, 0);
    echo.cancel();
}

#[test]
fn stopped_rules_are_evicted_on_next_post() {
    let directory = Arc::new(LocalDirectory::new());
    let engine = ReasoningEngine::new(EngineConfig::default(), directory.clone());
    let path = keypath!["door", "front"];

    let (live_handle, live, live_rx) = watcher(&directory, "live", path.clone());
    let (gone_handle, gone, _gone_rx) = watcher(&directory, "gone", path.clone());
    engine.register(gone_handle.clone(), &path).unwrap();
    engine.register(live_handle.clone(), &path).unwrap();

    assert_eq!(gone.cancel(), RuleStatus::Stopped);
    engine.post(&json!("open"), &path).unwrap();

    assert_eq!(live_rx.recv_timeout(WAIT).unwrap(), json!("open"));
    assert_eq!(engine.registry().subscribers(&path).unwrap(), vec![live_handle]);
    let stats = engine.stats();
    assert_eq!(stats.posts, 1);
    assert_eq!(stats.deliveries, 1);
    assert_eq!(stats.evictions, 1);
    live.cancel();
}

#[test]
fn faulted_rule_self_prunes_then_compact_drops_the_path() {
    struct Broken;
    impl Rule for Broken {
        fn infer(&mut self, _ctx: &InferenceContext<'_>) -> Result<(), InferenceError> {
            Err(InferenceError::failed("calibration missing"))
        }
    }

    let directory = Arc::new(LocalDirectory::new());
    let engine = ReasoningEngine::new(EngineConfig::default(), directory.clone());
    let rule = Arc::new(RuleRuntime::new(Broken));
    let handle = directory.bind("broken", rule.clone());
    let path = keypath!["meter", 7];
    engine.register(handle, &path).unwrap();

    engine.post(&json!(1), &path).unwrap();
    assert!(wait_until(|| matches!(rule.status(), RuleStatus::Faulted { .. })));

    engine.post(&json!(2), &path).unwrap();
    assert!(engine.registry().subscribers(&path).unwrap().is_empty());

    // An emptied path still accepts posts until it is compacted.
    engine.post(&json!(3), &path).unwrap();
    assert_eq!(engine.registry().compact(), 1);
    assert!(matches!(
        engine.post(&json!(4), &path),
        Err(TrieError::PathNotFound { .. })
    ));
}

#[test]
fn image_relocates_registrations_to_another_process() {
    let origin = Arc::new(LocalDirectory::new());
    let engine = ReasoningEngine::new(EngineConfig { invoke_timeout_ms: 750 }, origin.clone());
    let path = keypath!["sensor", "humidity"];
    let (handle, first, _rx) = watcher(&origin, "humidity", path.clone());
    engine.register(handle, &path).unwrap();
    engine
        .register(Handle::http("http://rules.example:8300", "audit"), &path)
        .unwrap();

    let bytes = engine.image().to_bytes().unwrap();
    first.cancel();
    drop(engine);

    // The destination binds its own rule under the same local name.
    let destination = Arc::new(LocalDirectory::new());
    let (_, second, rx) = watcher(&destination, "humidity", path.clone());
    let image = EngineImage::from_bytes(&bytes).unwrap();
    let moved = ReasoningEngine::restore(&image, destination.clone());
    assert_eq!(moved.config().invoke_timeout_ms, 750);
    assert_eq!(moved.registry().subscribers(&path).unwrap().len(), 2);

    // The HTTP handle is unreachable from a local-only invoker and is evicted.
    moved.post(&json!(0.61), &path).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), json!(0.61));
    assert_eq!(
        moved.registry().subscribers(&path).unwrap(),
        vec![Handle::local("humidity")]
    );
    second.cancel();
}

#[test]
fn rule_sees_facts_from_many_paths() {
    let directory = Arc::new(LocalDirectory::new());
    let engine = ReasoningEngine::new(EngineConfig::default(), directory.clone());
    let (handle, rule, _rx) = watcher(&directory, "room", keypath!["room", "temp"]);
    for leaf in ["temp", "humidity", "co2"] {
        engine.register(handle.clone(), &keypath!["room", leaf]).unwrap();
    }

    engine.post(&json!(20), &keypath!["room", "temp"]).unwrap();
    engine.post(&json!(0.4), &keypath!["room", "humidity"]).unwrap();
    engine.post(&json!(612), &keypath!["room", "co2"]).unwrap();

    let facts = rule.facts_snapshot();
    assert_eq!(facts.len(), 3);
    assert_eq!(facts.get(&keypath!["room", "co2"]).unwrap(), &json!(612));
    rule.cancel();
}

#[test]
fn async_post_reports_outcome_to_callback() {
    let directory = Arc::new(LocalDirectory::new());
    let engine = ReasoningEngine::new(EngineConfig::default(), directory.clone());
    let engine_handle = directory.bind("engine", Arc::new(engine));

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    let callback = directory.bind(
        "callback",
        Arc::new(move |method: &str, args: Value| -> InvokeResult<Value> {
            sink.lock().unwrap().push((method.to_string(), args));
            Ok(Value::Null)
        }),
    );

    let poster = AsyncMethod::new(directory.clone(), engine_handle, Some(callback));
    poster
        .invoke(methods::POST, json!({"fact": 1, "keys": ["unknown"]}))
        .unwrap()
        .join()
        .unwrap();

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, methods::POST);
    let message = outcomes[0].1["err"].as_str().unwrap();
    assert!(message.contains("no such path"), "{message}");
}
