//! Invocation primitive: call a named method on a [`Handle`].
//!
//! Everything that crosses an object boundary goes through [`Invoker`]:
//! the ontology's fan-out, rules calling back out, and the CLI talking to a
//! hosted engine. Objects that can be called implement [`Invocable`].
//!
//! - [`LocalDirectory`]: name → object map for objects in this process
//! - [`HttpInvoker`]: blocking JSON-over-HTTP transport with a per-call timeout
//! - [`InvokeRouter`]: picks one of the above by handle kind
//! - [`AsyncMethod`]: one-shot background invocation with a callback

pub mod async_method;
pub mod http;

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{InvokeError, InvokeResult};
use crate::handle::Handle;
use crate::key::{Fact, KeyPath};

pub use async_method::AsyncMethod;
pub use http::HttpInvoker;

/// Well-known method names.
pub mod methods {
    /// Deliver a fact to a subscriber.
    pub const POSIT: &str = "posit";
    /// Post a fact into an engine (fan-out).
    pub const POST: &str = "post";
    pub const REGISTER: &str = "register";
    pub const UNREGISTER: &str = "unregister";
    /// Aliases kept for peers that use the older verbs.
    pub const ADD: &str = "add";
    pub const REMOVE: &str = "remove";
    pub const IMAGE: &str = "image";
    pub const FACTS: &str = "facts";
    pub const STATUS: &str = "status";
}

/// Call `method` with JSON `args` on whatever `target` refers to.
pub trait Invoker: Send + Sync {
    fn invoke(&self, target: &Handle, method: &str, args: Value) -> InvokeResult<Value>;
}

/// An object whose methods can be called by name.
pub trait Invocable: Send + Sync {
    fn invoke_method(&self, method: &str, args: Value) -> InvokeResult<Value>;
}

impl<F> Invocable for F
where
    F: Fn(&str, Value) -> InvokeResult<Value> + Send + Sync,
{
    fn invoke_method(&self, method: &str, args: Value) -> InvokeResult<Value> {
        self(method, args)
    }
}

impl<T: Invoker + ?Sized> Invoker for Arc<T> {
    fn invoke(&self, target: &Handle, method: &str, args: Value) -> InvokeResult<Value> {
        (**self).invoke(target, method, args)
    }
}

// ---------------------------------------------------------------------------
// Wire arguments
// ---------------------------------------------------------------------------

/// Arguments of `posit` and `post`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositArgs {
    pub fact: Fact,
    pub keys: KeyPath,
}

/// Arguments of `register` and `unregister`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationArgs {
    pub handle: Handle,
    pub keys: KeyPath,
}

/// Decode JSON arguments for `method`.
pub fn decode_args<T: DeserializeOwned>(method: &str, args: Value) -> InvokeResult<T> {
    serde_json::from_value(args).map_err(|e| InvokeError::BadArguments {
        method: method.to_string(),
        message: e.to_string(),
    })
}

/// Encode a value as JSON arguments or results.
pub fn encode<T: Serialize>(value: &T) -> InvokeResult<Value> {
    serde_json::to_value(value).map_err(|e| InvokeError::Codec {
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Local directory
// ---------------------------------------------------------------------------

/// Process-local registry of invocable objects, addressed by
/// [`Handle::Local`] names.
#[derive(Default)]
pub struct LocalDirectory {
    objects: DashMap<String, Arc<dyn Invocable>>,
}

impl LocalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `object` under `name`, replacing any previous binding. Returns
    /// the handle that reaches it.
    pub fn bind(&self, name: impl Into<String>, object: Arc<dyn Invocable>) -> Handle {
        let name = name.into();
        tracing::debug!(%name, "binding local object");
        self.objects.insert(name.clone(), object);
        Handle::local(name)
    }

    /// Remove a binding. Handles pointing at it fail from now on.
    pub fn unbind(&self, name: &str) -> Option<Arc<dyn Invocable>> {
        self.objects.remove(name).map(|(_, object)| object)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Invocable>> {
        self.objects.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Names of all bound objects.
    pub fn names(&self) -> Vec<String> {
        self.objects.iter().map(|r| r.key().clone()).collect()
    }

    /// Invoke `method` on the object bound as `name`.
    pub fn call(&self, name: &str, method: &str, args: Value) -> InvokeResult<Value> {
        // Clone the Arc out so the shard lock is not held across the call.
        let object = self.get(name).ok_or_else(|| InvokeError::UnknownObject {
            name: name.to_string(),
        })?;
        object.invoke_method(method, args)
    }
}

impl std::fmt::Debug for LocalDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDirectory")
            .field("objects", &self.objects.len())
            .finish()
    }
}

impl Invoker for LocalDirectory {
    fn invoke(&self, target: &Handle, method: &str, args: Value) -> InvokeResult<Value> {
        match target {
            Handle::Local { name } => self.call(name, method, args),
            Handle::Http { .. } => Err(InvokeError::Transport {
                target: target.to_string(),
                message: "local directory cannot reach HTTP endpoints".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes local handles to a [`LocalDirectory`] and HTTP handles to an
/// [`HttpInvoker`].
#[derive(Debug, Clone)]
pub struct InvokeRouter {
    local: Arc<LocalDirectory>,
    http: HttpInvoker,
}

impl InvokeRouter {
    pub fn new(local: Arc<LocalDirectory>, http: HttpInvoker) -> Self {
        Self { local, http }
    }

    pub fn directory(&self) -> &Arc<LocalDirectory> {
        &self.local
    }
}

impl Invoker for InvokeRouter {
    fn invoke(&self, target: &Handle, method: &str, args: Value) -> InvokeResult<Value> {
        match target {
            Handle::Local { name } => self.local.call(name, method, args),
            Handle::Http { .. } => self.http.invoke(target, method, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypath;
    use serde_json::json;

    fn echo() -> Arc<dyn Invocable> {
        Arc::new(|method: &str, args: Value| match method {
            "echo" => Ok(args),
            other => Err(InvokeError::UnknownMethod {
                method: other.to_string(),
            }),
        })
    }

    #[test]
    fn directory_dispatches_by_name() {
        let dir = LocalDirectory::new();
        let handle = dir.bind("echo", echo());
        assert_eq!(handle, Handle::local("echo"));
        assert_eq!(dir.invoke(&handle, "echo", json!(5)).unwrap(), json!(5));
        assert!(matches!(
            dir.invoke(&handle, "shout", Value::Null),
            Err(InvokeError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn unbound_objects_fail() {
        let dir = LocalDirectory::new();
        let handle = dir.bind("gone", echo());
        assert!(dir.unbind("gone").is_some());
        assert!(matches!(
            dir.invoke(&handle, "echo", Value::Null),
            Err(InvokeError::UnknownObject { .. })
        ));
        assert!(dir.names().is_empty());
    }

    #[test]
    fn local_directory_refuses_http_handles() {
        let dir = LocalDirectory::new();
        let remote = Handle::http("http://127.0.0.1:1", "x");
        assert!(matches!(
            dir.invoke(&remote, "echo", Value::Null),
            Err(InvokeError::Transport { .. })
        ));
    }

    #[test]
    fn router_sends_local_handles_to_directory() {
        let dir = Arc::new(LocalDirectory::new());
        let handle = dir.bind("echo", echo());
        let router = InvokeRouter::new(Arc::clone(&dir), HttpInvoker::default());
        assert_eq!(
            router.invoke(&handle, "echo", json!("hi")).unwrap(),
            json!("hi")
        );
    }

    #[test]
    fn posit_args_wire_shape() {
        let args = PositArgs {
            fact: json!({"celsius": 30}),
            keys: keypath!["sensor", 2],
        };
        let value = encode(&args).unwrap();
        assert_eq!(
            value,
            json!({"fact": {"celsius": 30}, "keys": ["sensor", 2]})
        );
        let back: PositArgs = decode_args(methods::POSIT, value).unwrap();
        assert_eq!(back, args);
        assert!(matches!(
            decode_args::<PositArgs>(methods::POSIT, json!({"keys": []})),
            Err(InvokeError::BadArguments { .. })
        ));
    }
}
