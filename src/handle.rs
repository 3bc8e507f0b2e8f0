//! Subscriber handles.
//!
//! A [`Handle`] names something that can receive `posit(fact, keys)`. Handles
//! are plain values: they compare by content and serialize, so an engine
//! image carrying them stays meaningful after it moves to another process.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A transportable reference to an invocable object.
///
/// HTTP base URLs are stored without a trailing `/`, whether the handle was
/// built with [`Handle::http`] or deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "WireHandle")]
pub enum Handle {
    /// An object bound by name in the local directory of whichever process
    /// currently hosts the engine.
    Local { name: String },
    /// An object hosted behind an HTTP endpoint.
    Http { base_url: String, object: String },
}

/// Deserialization shape of [`Handle`], normalized on conversion.
#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireHandle {
    Local { name: String },
    Http { base_url: String, object: String },
}

impl From<WireHandle> for Handle {
    fn from(wire: WireHandle) -> Self {
        match wire {
            WireHandle::Local { name } => Handle::local(name),
            WireHandle::Http { base_url, object } => Handle::http(base_url, object),
        }
    }
}

impl Handle {
    pub fn local(name: impl Into<String>) -> Self {
        Handle::Local { name: name.into() }
    }

    pub fn http(base_url: impl Into<String>, object: impl Into<String>) -> Self {
        Handle::Http {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            object: object.into(),
        }
    }

    /// Whether this handle can be resolved from another host.
    pub fn is_network_addressable(&self) -> bool {
        matches!(self, Handle::Http { .. })
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Local { name } => write!(f, "local:{name}"),
            Handle::Http { base_url, object } => write!(f, "{base_url}/objects/{object}"),
        }
    }
}
