// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # rulenet
//!
//! A distributed declarative rule engine. Facts are JSON values addressed by
//! hierarchical key paths; rules subscribe to key paths and run their own
//! inference on a private copy of the facts they have received.
//!
//! ## Architecture
//!
//! - **Key paths** (`key`): non-empty sequences of integer or text tokens
//! - **Fact trie** (`trie`): a map from key paths to leaf values
//! - **Handles** (`handle`, `invoke`): location-transparent references to
//!   invocable objects, local or over HTTP
//! - **Ontology** (`ontology`): key path to subscriber registry with
//!   self-healing fan-out
//! - **Rules** (`rule`): private facts, dirty flag, one inference worker
//! - **Engine** (`engine`): the public facade, relocatable as an image
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use rulenet::engine::{EngineConfig, ReasoningEngine};
//! use rulenet::invoke::LocalDirectory;
//! use rulenet::rule::{InferenceContext, Rule, RuleRuntime};
//! use rulenet::error::InferenceError;
//! use rulenet::keypath;
//!
//! struct Alarm;
//!
//! impl Rule for Alarm {
//!     fn infer(&mut self, ctx: &InferenceContext<'_>) -> Result<(), InferenceError> {
//!         let temp = ctx.with_facts(|facts| facts.get(&keypath!["sensor", "temp"]).cloned())?;
//!         if temp.as_f64().unwrap_or_default() > 30.0 {
//!             tracing::warn!("too hot");
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let directory = Arc::new(LocalDirectory::new());
//! let alarm = directory.bind("alarm", Arc::new(RuleRuntime::new(Alarm)));
//! let engine = ReasoningEngine::new(EngineConfig::default(), directory.clone());
//! engine.register(alarm, &keypath!["sensor", "temp"]).unwrap();
//! engine.post(&serde_json::json!(31), &keypath!["sensor", "temp"]).unwrap();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod invoke;
pub mod key;
pub mod ontology;
pub mod rule;
#[cfg(feature = "server")]
pub mod server;
pub mod trie;
