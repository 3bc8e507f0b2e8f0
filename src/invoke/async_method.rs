//! One-shot asynchronous invocation with an optional callback.
//!
//! Each call spawns a short-lived worker thread that invokes the method on the
//! target. When a callback handle is set, the worker then invokes the *same
//! method name* on the callback with an [`AsyncOutcome`]: `{"ok": result}` or
//! `{"err": message}`. Callback failures are logged and dropped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Invoker;
use crate::error::{InvokeError, InvokeResult};
use crate::handle::Handle;

/// What the callback receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncOutcome {
    Ok(Value),
    Err(String),
}

impl From<InvokeResult<Value>> for AsyncOutcome {
    fn from(result: InvokeResult<Value>) -> Self {
        match result {
            Ok(value) => AsyncOutcome::Ok(value),
            Err(e) => AsyncOutcome::Err(e.to_string()),
        }
    }
}

/// A reusable `(target, callback)` pair for repeated asynchronous calls.
#[derive(Clone)]
pub struct AsyncMethod {
    invoker: Arc<dyn Invoker>,
    target: Handle,
    callback: Option<Handle>,
}

impl AsyncMethod {
    pub fn new(invoker: Arc<dyn Invoker>, target: Handle, callback: Option<Handle>) -> Self {
        Self {
            invoker,
            target,
            callback,
        }
    }

    /// Invoke `method` on the bound target in the background.
    pub fn invoke(&self, method: &str, args: Value) -> InvokeResult<JoinHandle<()>> {
        Self::spawn(
            Arc::clone(&self.invoker),
            self.target.clone(),
            method,
            args,
            self.callback.clone(),
        )
    }

    /// Invoke `method` on `target` in the background, reporting to `callback`.
    ///
    /// Returns as soon as the worker is running. Joining the returned handle
    /// is optional; the worker is detached otherwise.
    pub fn spawn(
        invoker: Arc<dyn Invoker>,
        target: Handle,
        method: &str,
        args: Value,
        callback: Option<Handle>,
    ) -> InvokeResult<JoinHandle<()>> {
        let method = method.to_string();
        thread::Builder::new()
            .name(format!("async-{method}"))
            .spawn(move || {
                let outcome = AsyncOutcome::from(invoker.invoke(&target, &method, args));
                let Some(callback) = callback else {
                    return;
                };
                let payload = match serde_json::to_value(&outcome) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(%method, "cannot encode async outcome: {e}");
                        return;
                    }
                };
                if let Err(e) = invoker.invoke(&callback, &method, payload) {
                    tracing::warn!(%method, %callback, "async callback failed: {e}");
                }
            })
            .map_err(|e| InvokeError::Transport {
                target: "async worker".into(),
                message: format!("failed to spawn worker thread: {e}"),
            })
    }
}

impl std::fmt::Debug for AsyncMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMethod")
            .field("target", &self.target)
            .field("callback", &self.callback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::{Invocable, LocalDirectory};
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn callback_receives_result_under_same_method_name() {
        let dir = Arc::new(LocalDirectory::new());
        let target = dir.bind(
            "doubler",
            Arc::new(|_: &str, args: Value| -> InvokeResult<Value> {
                Ok(json!(args.as_i64().unwrap_or(0) * 2))
            })
                as Arc<dyn Invocable>,
        );

        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let callback = dir.bind(
            "listener",
            Arc::new(move |method: &str, args: Value| -> InvokeResult<Value> {
                let _ = tx.lock().unwrap().send((method.to_string(), args));
                Ok(Value::Null)
            }) as Arc<dyn Invocable>,
        );

        let call = AsyncMethod::new(dir.clone(), target, Some(callback));
        call.invoke("double", json!(21)).unwrap().join().unwrap();

        let (method, payload) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(method, "double");
        let outcome: AsyncOutcome = serde_json::from_value(payload).unwrap();
        assert_eq!(outcome, AsyncOutcome::Ok(json!(42)));
    }

    #[test]
    fn failures_are_delivered_as_err() {
        let dir = Arc::new(LocalDirectory::new());
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let callback = dir.bind(
            "listener",
            Arc::new(move |_: &str, args: Value| -> InvokeResult<Value> {
                let _ = tx.lock().unwrap().send(args);
                Ok(Value::Null)
            }) as Arc<dyn Invocable>,
        );

        AsyncMethod::spawn(
            dir.clone(),
            Handle::local("missing"),
            "posit",
            Value::Null,
            Some(callback),
        )
        .unwrap()
        .join()
        .unwrap();

        let payload = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let outcome: AsyncOutcome = serde_json::from_value(payload).unwrap();
        assert!(matches!(outcome, AsyncOutcome::Err(msg) if msg.contains("missing")));
    }

    #[test]
    fn no_callback_discards_result() {
        let dir = Arc::new(LocalDirectory::new());
        let worker = AsyncMethod::spawn(
            dir,
            Handle::local("missing"),
            "posit",
            Value::Null,
            None,
        )
        .unwrap();
        assert!(worker.join().is_ok());
    }
}
