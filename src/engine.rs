//! Engine facade: top-level API for rulenet.
//!
//! The [`ReasoningEngine`] owns an [`OntologyRegistry`] and the [`Invoker`]
//! used for fan-out. It stores no inference logic: facts posted into it are
//! routed to whichever rule handles are registered under the key path.
//!
//! Engines are relocatable. [`ReasoningEngine::image`] captures every
//! registration as an [`EngineImage`], which can be shipped elsewhere and
//! restored against that process's invoker. Engines are also invocable, so an
//! engine can be registered as a subscriber of another engine or hosted
//! behind an HTTP endpoint.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ImageError, InvokeError, InvokeResult, TrieResult};
use crate::handle::Handle;
use crate::invoke::http::HttpInvoker;
use crate::invoke::{
    Invocable, InvokeRouter, Invoker, LocalDirectory, PositArgs, RegistrationArgs, decode_args,
    encode, methods,
};
use crate::key::{Fact, KeyPath};
use crate::ontology::{OntologyRegistry, RegistryStats};
use crate::trie::FactTrie;

/// Current [`EngineImage`] format version.
pub const IMAGE_VERSION: u32 = 1;

/// Configuration for a reasoning engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-invocation timeout for HTTP subscribers, in milliseconds.
    pub invoke_timeout_ms: u64,
}

impl EngineConfig {
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            invoke_timeout_ms: 5_000,
        }
    }
}

/// A transportable copy of an engine's registrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineImage {
    pub version: u32,
    pub config: EngineConfig,
    pub registrations: FactTrie<Vec<Handle>>,
}

impl EngineImage {
    /// Compact binary form (bincode).
    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        bincode::serialize(self).map_err(|e| ImageError::Encode {
            message: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        let image: Self = bincode::deserialize(bytes).map_err(|e| ImageError::Decode {
            message: e.to_string(),
        })?;
        image.check_version()
    }

    pub fn to_json(&self) -> Result<String, ImageError> {
        serde_json::to_string_pretty(self).map_err(|e| ImageError::Encode {
            message: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, ImageError> {
        let image: Self = serde_json::from_str(json).map_err(|e| ImageError::Decode {
            message: e.to_string(),
        })?;
        image.check_version()
    }

    fn check_version(self) -> Result<Self, ImageError> {
        if self.version != IMAGE_VERSION {
            return Err(ImageError::Version {
                found: self.version,
                expected: IMAGE_VERSION,
            });
        }
        Ok(self)
    }
}

/// The public-facing rule engine.
///
/// Cloning is cheap and yields a handle onto the *same* registry; use
/// [`ReasoningEngine::replicate`] for an independent copy.
#[derive(Clone)]
pub struct ReasoningEngine {
    config: EngineConfig,
    registry: Arc<OntologyRegistry>,
    invoker: Arc<dyn Invoker>,
}

impl ReasoningEngine {
    /// Create an engine with an empty ontology.
    pub fn new(config: EngineConfig, invoker: Arc<dyn Invoker>) -> Self {
        tracing::info!(
            invoke_timeout_ms = config.invoke_timeout_ms,
            "initializing reasoning engine"
        );
        Self {
            config,
            registry: Arc::new(OntologyRegistry::new()),
            invoker,
        }
    }

    /// Create an engine that reaches local handles through `directory` and
    /// HTTP handles with the configured invoke timeout.
    pub fn hosted(config: EngineConfig, directory: Arc<LocalDirectory>) -> Self {
        let invoker = hosted_invoker(&config, directory);
        Self::new(config, invoker)
    }

    /// Rebuild an engine from an image, resolving handles with `invoker`.
    ///
    /// The image's config is carried along for later images, but delivery
    /// timing is whatever `invoker` does. Use [`Self::restore_hosted`] to have
    /// the image's `invoke_timeout_ms` govern HTTP delivery.
    pub fn restore(image: &EngineImage, invoker: Arc<dyn Invoker>) -> Self {
        tracing::info!(
            paths = image.registrations.len(),
            "restoring reasoning engine from image"
        );
        Self {
            config: image.config.clone(),
            registry: Arc::new(OntologyRegistry::from_snapshot(&image.registrations)),
            invoker,
        }
    }

    /// Rebuild an engine from an image inside the process that owns
    /// `directory`, applying the image's invoke timeout to HTTP handles.
    pub fn restore_hosted(image: &EngineImage, directory: Arc<LocalDirectory>) -> Self {
        let invoker = hosted_invoker(&image.config, directory);
        Self::restore(image, invoker)
    }

    /// Assert or update `fact` and route it to every rule registered at `path`.
    ///
    /// Fails only if nothing was ever registered at `path`. Subscribers that
    /// fail delivery are evicted, never reported.
    pub fn post(&self, fact: &Fact, path: &KeyPath) -> TrieResult<()> {
        self.registry.post(fact, path, self.invoker.as_ref())
    }

    /// Register `handle` to receive facts posted at `path`.
    pub fn register(&self, handle: Handle, path: &KeyPath) -> TrieResult<()> {
        self.registry.register(handle, path)
    }

    /// Remove one registration of `handle` at `path`. Returns whether a
    /// registration was removed.
    pub fn unregister(&self, handle: &Handle, path: &KeyPath) -> TrieResult<bool> {
        self.registry.unregister(handle, path)
    }

    /// Capture every registration for relocation.
    pub fn image(&self) -> EngineImage {
        EngineImage {
            version: IMAGE_VERSION,
            config: self.config.clone(),
            registrations: self.registry.snapshot(),
        }
    }

    /// An independent engine with a copy of the current registrations.
    pub fn replicate(&self) -> Self {
        Self::restore(&self.image(), Arc::clone(&self.invoker))
    }

    pub fn registry(&self) -> &OntologyRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}

fn hosted_invoker(config: &EngineConfig, directory: Arc<LocalDirectory>) -> Arc<dyn Invoker> {
    Arc::new(InvokeRouter::new(
        directory,
        HttpInvoker::new(config.invoke_timeout()),
    ))
}

impl std::fmt::Debug for ReasoningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

impl Invocable for ReasoningEngine {
    fn invoke_method(&self, method: &str, args: Value) -> InvokeResult<Value> {
        let target_err = |e: crate::error::TrieError| InvokeError::Target {
            method: method.to_string(),
            message: e.to_string(),
        };
        match method {
            // `posit` lets an engine subscribe to another engine.
            methods::POST | methods::POSIT => {
                let PositArgs { fact, keys } = decode_args(method, args)?;
                self.post(&fact, &keys).map_err(target_err)?;
                Ok(Value::Null)
            }
            methods::REGISTER | methods::ADD => {
                let RegistrationArgs { handle, keys } = decode_args(method, args)?;
                self.register(handle, &keys).map_err(target_err)?;
                Ok(Value::Null)
            }
            methods::UNREGISTER | methods::REMOVE => {
                let RegistrationArgs { handle, keys } = decode_args(method, args)?;
                let removed = self.unregister(&handle, &keys).map_err(target_err)?;
                Ok(Value::Bool(removed))
            }
            methods::IMAGE => encode(&self.image()),
            other => Err(InvokeError::UnknownMethod {
                method: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrieError;
    use crate::keypath;
    use std::time::Instant;
    use serde_json::json;
    use std::sync::Mutex;

    fn counter(dir: &LocalDirectory, name: &str) -> (Handle, Arc<Mutex<Vec<PositArgs>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = dir.bind(
            name,
            Arc::new(move |_: &str, args: Value| -> InvokeResult<Value> {
                sink.lock().unwrap().push(serde_json::from_value(args).unwrap());
                Ok(Value::Null)
            }),
        );
        (handle, seen)
    }

    #[test]
    fn facade_delegates_to_registry() {
        let dir = Arc::new(LocalDirectory::new());
        let engine = ReasoningEngine::new(EngineConfig::default(), dir.clone());
        let (h, seen) = counter(&dir, "r");
        let path = keypath!["order", "status"];

        engine.register(h.clone(), &path).unwrap();
        engine.post(&json!("shipped"), &path).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(engine.unregister(&h, &path).unwrap());

        assert!(matches!(
            engine.post(&json!(1), &keypath!["nonexistent"]),
            Err(TrieError::PathNotFound { .. })
        ));
        assert_eq!(engine.stats().deliveries, 1);
    }

    #[test]
    fn clones_share_registry_replicas_do_not() {
        let dir = Arc::new(LocalDirectory::new());
        let engine = ReasoningEngine::new(EngineConfig::default(), dir.clone());
        let shared = engine.clone();
        let replica = engine.replicate();

        shared.register(Handle::local("x"), &keypath!["a"]).unwrap();
        assert_eq!(engine.registry().subscribers(&keypath!["a"]).unwrap().len(), 1);
        assert!(replica.registry().subscribers(&keypath!["a"]).is_err());
    }

    #[test]
    fn image_survives_bincode_and_json() {
        let dir = Arc::new(LocalDirectory::new());
        let engine = ReasoningEngine::new(
            EngineConfig {
                invoke_timeout_ms: 750,
            },
            dir.clone(),
        );
        engine
            .register(Handle::http("http://rules-a:8300", "alarm"), &keypath!["door", 3])
            .unwrap();
        engine.register(Handle::local("log"), &keypath!["door", 3]).unwrap();

        let image = engine.image();
        let from_bytes = EngineImage::from_bytes(&image.to_bytes().unwrap()).unwrap();
        let from_json = EngineImage::from_json(&image.to_json().unwrap()).unwrap();
        assert_eq!(from_bytes, image);
        assert_eq!(from_json, image);

        let moved = ReasoningEngine::restore(&from_bytes, dir);
        assert_eq!(moved.config().invoke_timeout_ms, 750);
        assert_eq!(
            moved.registry().subscribers(&keypath!["door", 3]).unwrap(),
            vec![
                Handle::http("http://rules-a:8300", "alarm"),
                Handle::local("log")
            ]
        );
    }

    #[test]
    fn image_version_is_checked() {
        let mut image = ReasoningEngine::new(
            EngineConfig::default(),
            Arc::new(LocalDirectory::new()),
        )
        .image();
        image.version = 99;
        let json = serde_json::to_string(&image).unwrap();
        assert!(matches!(
            EngineImage::from_json(&json),
            Err(ImageError::Version { found: 99, .. })
        ));
    }

    #[test]
    fn engine_is_invocable_by_method_name() {
        let dir = Arc::new(LocalDirectory::new());
        let engine = ReasoningEngine::new(EngineConfig::default(), dir.clone());
        let (_h, seen) = counter(&dir, "r");

        let reg = json!({"handle": {"local": {"name": "r"}}, "keys": ["k"]});
        engine.invoke_method(methods::ADD, reg.clone()).unwrap();
        engine
            .invoke_method(methods::POST, json!({"fact": 1, "keys": ["k"]}))
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(
            engine.invoke_method(methods::REMOVE, reg.clone()).unwrap(),
            json!(true)
        );
        assert_eq!(
            engine.invoke_method(methods::UNREGISTER, reg).unwrap(),
            json!(false)
        );
        assert!(matches!(
            engine.invoke_method(methods::POST, json!({"fact": 1, "keys": ["nope"]})),
            Err(InvokeError::Target { .. })
        ));
    }

    #[test]
    fn engines_chain_as_subscribers() {
        let dir = Arc::new(LocalDirectory::new());
        let upstream = ReasoningEngine::new(EngineConfig::default(), dir.clone());
        let downstream = ReasoningEngine::new(EngineConfig::default(), dir.clone());
        let (leaf, seen) = counter(&dir, "leaf");
        let path = keypath!["sensor", "smoke"];

        downstream.register(leaf, &path).unwrap();
        let down = dir.bind("downstream", Arc::new(downstream));
        upstream.register(down, &path).unwrap();

        upstream.post(&json!(true), &path).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].fact, json!(true));
    }

    #[test]
    fn restored_timeout_governs_http_delivery() {
        // Accepts connections into the backlog but never answers.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", silent.local_addr().unwrap());

        let dir = Arc::new(LocalDirectory::new());
        let origin = ReasoningEngine::new(
            EngineConfig {
                invoke_timeout_ms: 200,
            },
            dir.clone(),
        );
        let path = keypath!["slow"];
        origin.register(Handle::http(&base, "sleeper"), &path).unwrap();

        let moved = ReasoningEngine::restore_hosted(&origin.image(), dir);
        let start = Instant::now();
        moved.post(&json!(1), &path).unwrap();
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(moved.registry().subscribers(&path).unwrap().is_empty());
        assert_eq!(moved.stats().evictions, 1);
    }

    #[test]
    fn hosted_engine_routes_local_handles() {
        let dir = Arc::new(LocalDirectory::new());
        let engine = ReasoningEngine::hosted(EngineConfig::default(), dir.clone());
        let (h, seen) = counter(&dir, "r");
        engine.register(h, &keypath!["k"]).unwrap();
        engine.post(&json!(true), &keypath!["k"]).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
