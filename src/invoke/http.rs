//! Blocking JSON-over-HTTP invocation transport.
//!
//! `POST {base_url}/objects/{object}/{method}` with the JSON arguments as the
//! body. A 200 carries the JSON result; any other status carries the error
//! text. The agent-level timeout is the only per-call timeout in the system.

use std::time::Duration;

use serde_json::Value;

use super::Invoker;
use crate::error::{InvokeError, InvokeResult};
use crate::handle::Handle;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP transport for [`Handle::Http`] targets.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    http: ureq::Agent,
    timeout: Duration,
}

impl HttpInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: ureq::AgentBuilder::new().timeout(timeout).build(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn post_json(&self, target: &Handle, url: &str, body: &Value) -> InvokeResult<Value> {
        let resp = self.http.post(url).send_json(body).map_err(|e| match e {
            ureq::Error::Status(status, resp) => InvokeError::Remote {
                status,
                message: resp.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(t) => InvokeError::Transport {
                target: target.to_string(),
                message: t.to_string(),
            },
        })?;
        resp.into_json().map_err(|e| InvokeError::Codec {
            message: format!("failed to parse JSON: {e}"),
        })
    }
}

impl Default for HttpInvoker {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Invoker for HttpInvoker {
    fn invoke(&self, target: &Handle, method: &str, args: Value) -> InvokeResult<Value> {
        let Handle::Http { base_url, object } = target else {
            return Err(InvokeError::Transport {
                target: target.to_string(),
                message: "not an HTTP handle".into(),
            });
        };
        let url = format!("{base_url}/objects/{object}/{method}");
        tracing::trace!(%url, "http invoke");
        self.post_json(target, &url, &args)
    }
}
