//! Rule runtime: the base behavior every subscriber rule adopts.
//!
//! A [`RuleRuntime`] owns a private fact trie, a dirty flag, and at most one
//! inference worker thread. `posit` merges a fact, raises the flag, and wakes
//! (or on first use, spawns) the worker, then returns. The worker clears the
//! flag, runs [`Rule::infer`], and sleeps until the flag is raised again, so a
//! burst of facts arriving during one pass coalesces into a single next pass.
//!
//! # Failure boundary
//!
//! An `Err` from `infer` is logged and recorded. Under
//! [`FailurePolicy::Halt`] the rule goes dormant with status
//! [`RuleStatus::Faulted`] and every later `posit` fails, which makes
//! registries evict it. Under [`FailurePolicy::Continue`] the worker keeps
//! serving changes. A panic inside `infer` always faults the rule.
//! Cancellation is a clean stop, never a fault.

mod context;

pub use context::InferenceContext;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{InferenceError, InvokeError, InvokeResult, RuleError, RuleResult};
use crate::invoke::{Invocable, PositArgs, decode_args, encode, methods};
use crate::key::{Fact, KeyPath};
use crate::trie::FactTrie;

/// Rule-specific inference over the accumulated private facts.
pub trait Rule: Send + 'static {
    /// Evaluate the current facts and fire if warranted.
    ///
    /// May read and mutate facts through [`InferenceContext::with_facts`] and
    /// [`InferenceContext::update_facts`], and may call out to other objects
    /// (including posting back into an engine) once those closures return.
    fn infer(&mut self, ctx: &InferenceContext<'_>) -> Result<(), InferenceError>;
}

/// What happens to the worker after `infer` returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log, mark the rule faulted, and stop reasoning.
    #[default]
    Halt,
    /// Log and keep waiting for further changes.
    Continue,
}

/// Configuration for one rule runtime.
#[derive(Debug, Clone)]
pub struct RuleConfig {
    /// Used in logs, errors and the worker thread name.
    pub name: String,
    pub on_failure: FailurePolicy,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            name: "rule".into(),
            on_failure: FailurePolicy::Halt,
        }
    }
}

/// Lifecycle of a rule's worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    /// No fact posited yet; no worker exists.
    Idle,
    Running,
    /// Cancelled by its owner.
    Stopped,
    /// Dormant after an inference failure.
    Faulted { message: String },
}

/// Veto hook run inside `posit` before a fact is merged.
type Admission = dyn Fn(&Fact, &KeyPath) -> Result<(), String> + Send + Sync;

enum Worker {
    /// Not started; holds the rule until the first posit.
    Pending(Box<dyn Rule>),
    Running(JoinHandle<()>),
    Gone,
}

pub(crate) struct RuleState {
    facts: FactTrie<Fact>,
    dirty: bool,
    cancelled: bool,
    status: RuleStatus,
    worker: Worker,
}

pub(crate) struct Shared {
    state: Mutex<RuleState>,
    changed: Condvar,
    passes: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RuleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hosts one [`Rule`]: private facts, dirty flag, lazily-started worker.
pub struct RuleRuntime {
    config: RuleConfig,
    shared: Arc<Shared>,
    admission: Option<Box<Admission>>,
}

impl RuleRuntime {
    /// Wrap `rule` with the default configuration.
    pub fn new(rule: impl Rule) -> Self {
        Self::with_config(rule, RuleConfig::default())
    }

    pub fn with_config(rule: impl Rule, config: RuleConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(RuleState {
                    facts: FactTrie::new(),
                    dirty: false,
                    cancelled: false,
                    status: RuleStatus::Idle,
                    worker: Worker::Pending(Box::new(rule)),
                }),
                changed: Condvar::new(),
                passes: AtomicU64::new(0),
            }),
            admission: None,
        }
    }

    /// Install a veto hook. A rejected fact fails that `posit` and is not
    /// merged.
    pub fn with_admission(
        mut self,
        check: impl Fn(&Fact, &KeyPath) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.admission = Some(Box::new(check));
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Merge `fact` at `path`, raise the dirty flag, and start or wake the
    /// worker. Returns without waiting for inference.
    pub fn posit(&self, fact: Fact, path: &KeyPath) -> RuleResult<()> {
        if let Some(check) = &self.admission {
            check(&fact, path).map_err(|reason| RuleError::Rejected {
                rule: self.config.name.clone(),
                path: path.to_string(),
                reason,
            })?;
        }

        let mut st = self.shared.lock();
        match &st.status {
            RuleStatus::Faulted { message } => {
                return Err(RuleError::Faulted {
                    rule: self.config.name.clone(),
                    message: message.clone(),
                });
            }
            RuleStatus::Stopped => {
                return Err(RuleError::Stopped {
                    rule: self.config.name.clone(),
                });
            }
            RuleStatus::Idle | RuleStatus::Running => {}
        }
        if st.cancelled {
            return Err(RuleError::Stopped {
                rule: self.config.name.clone(),
            });
        }

        st.facts.insert(path, fact)?;
        st.dirty = true;

        match std::mem::replace(&mut st.worker, Worker::Gone) {
            Worker::Pending(rule) => {
                let handle = self.spawn_worker(rule).inspect_err(|e| {
                    st.status = RuleStatus::Faulted {
                        message: e.to_string(),
                    };
                })?;
                st.worker = Worker::Running(handle);
                st.status = RuleStatus::Running;
            }
            running => {
                st.worker = running;
                self.shared.changed.notify_one();
            }
        }
        Ok(())
    }

    /// Ask the worker to stop and wait for it. A worker blocked waiting for
    /// changes exits promptly without another `infer` pass; one that is mid
    /// pass finishes that pass first.
    pub fn cancel(&self) -> RuleStatus {
        let handle = {
            let mut st = self.shared.lock();
            st.cancelled = true;
            self.shared.changed.notify_all();
            match std::mem::replace(&mut st.worker, Worker::Gone) {
                Worker::Running(handle) => Some(handle),
                Worker::Pending(_) => {
                    st.status = RuleStatus::Stopped;
                    None
                }
                Worker::Gone => None,
            }
        };
        if let Some(handle) = handle {
            // A rule cancelling itself from inside `infer` must not join itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        self.status()
    }

    pub fn status(&self) -> RuleStatus {
        self.shared.lock().status.clone()
    }

    /// Completed or in-flight `infer` passes so far.
    pub fn passes(&self) -> u64 {
        self.shared.passes.load(Ordering::SeqCst)
    }

    /// Whether a change is waiting for the next pass.
    pub fn is_dirty(&self) -> bool {
        self.shared.lock().dirty
    }

    /// Copy of the private fact store.
    pub fn facts_snapshot(&self) -> FactTrie<Fact> {
        self.shared.lock().facts.clone()
    }

    fn spawn_worker(&self, rule: Box<dyn Rule>) -> RuleResult<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        thread::Builder::new()
            .name(format!("rule-{}", self.config.name))
            .spawn(move || run_worker(shared, rule, config))
            .map_err(|source| RuleError::Spawn {
                rule: self.config.name.clone(),
                source,
            })
    }
}

impl Drop for RuleRuntime {
    fn drop(&mut self) {
        // Signal only: joining here could block the dropping thread on a
        // long inference pass.
        let mut st = self.shared.lock();
        st.cancelled = true;
        self.shared.changed.notify_all();
    }
}

impl std::fmt::Debug for RuleRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRuntime")
            .field("name", &self.config.name)
            .field("status", &self.status())
            .field("passes", &self.passes())
            .finish()
    }
}

impl Invocable for RuleRuntime {
    fn invoke_method(&self, method: &str, args: Value) -> InvokeResult<Value> {
        match method {
            methods::POSIT => {
                let PositArgs { fact, keys } = decode_args(method, args)?;
                self.posit(fact, &keys)
                    .map_err(|e| InvokeError::Target {
                        method: method.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Value::Null)
            }
            methods::FACTS => encode(&self.facts_snapshot()),
            methods::STATUS => encode(&self.status()),
            other => Err(InvokeError::UnknownMethod {
                method: other.to_string(),
            }),
        }
    }
}

fn run_worker(shared: Arc<Shared>, mut rule: Box<dyn Rule>, config: RuleConfig) {
    let name = config.name.as_str();
    tracing::info!(rule = %name, "inference worker started");

    let fault = loop {
        {
            let mut st = shared.lock();
            while !st.dirty && !st.cancelled {
                st = shared
                    .changed
                    .wait(st)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if st.cancelled {
                break None;
            }
            st.dirty = false;
        }

        let pass = shared.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = InferenceContext {
            shared: &shared,
            pass,
            rule: name,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| rule.infer(&ctx))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(rule = %name, pass, error = %e, "inference failed");
                if config.on_failure == FailurePolicy::Halt {
                    break Some(e.to_string());
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(rule = %name, pass, %message, "inference panicked");
                break Some(format!("panic: {message}"));
            }
        }
    };

    let mut st = shared.lock();
    match fault {
        Some(message) => {
            tracing::warn!(rule = %name, "rule is now dormant");
            st.status = RuleStatus::Faulted { message };
        }
        None => {
            tracing::info!(rule = %name, "inference worker stopped");
            st.status = RuleStatus::Stopped;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}
