//! Error types for rulenet, one enum per subsystem.
//!
//! Every variant carries a `rulenet::<subsystem>::<kind>` diagnostic code.
//! Variants a caller can act on also carry help text.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for rulenet.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum RuleNetError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Trie(#[from] TrieError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Image(#[from] ImageError),
}

// ---------------------------------------------------------------------------
// Key path errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum KeyError {
    #[error("key path must contain at least one token")]
    #[diagnostic(
        code(rulenet::key::empty),
        help("Every fact and every registration is addressed by a non-empty key path.")
    )]
    EmptyPath,

    #[error("cannot parse key path \"{input}\": {message}")]
    #[diagnostic(
        code(rulenet::key::parse),
        help("Write key paths as tokens separated by '/', e.g. \"sensor/kitchen/temp\".")
    )]
    Parse { input: String, message: String },
}

// ---------------------------------------------------------------------------
// Trie errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TrieError {
    #[error("no such path: {path}")]
    #[diagnostic(
        code(rulenet::trie::path_not_found),
        help(
            "Nothing was ever registered or posited at this key path. \
             Register a subscriber on the path before posting to it."
        )
    )]
    PathNotFound { path: String },

    #[error("path {path} conflicts with existing structure at depth {depth}")]
    #[diagnostic(
        code(rulenet::trie::shape_conflict),
        help(
            "A key path cannot be both a leaf and a prefix of a longer path. \
             Either extend the shorter path or pick a different final token."
        )
    )]
    ShapeConflict { path: String, depth: usize },
}

/// Result type for trie operations.
pub type TrieResult<T> = std::result::Result<T, TrieError>;

// ---------------------------------------------------------------------------
// Invocation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum InvokeError {
    #[error("no object bound as \"{name}\"")]
    #[diagnostic(
        code(rulenet::invoke::unknown_object),
        help("Bind the object in the local directory before invoking it.")
    )]
    UnknownObject { name: String },

    #[error("object does not support method \"{method}\"")]
    #[diagnostic(
        code(rulenet::invoke::unknown_method),
        help("Check the method name. Rules accept posit, facts and status.")
    )]
    UnknownMethod { method: String },

    #[error("bad arguments for \"{method}\": {message}")]
    #[diagnostic(
        code(rulenet::invoke::bad_arguments),
        help("Arguments are JSON. posit expects {{\"fact\": .., \"keys\": [..]}}.")
    )]
    BadArguments { method: String, message: String },

    #[error("transport failure reaching {target}: {message}")]
    #[diagnostic(
        code(rulenet::invoke::transport),
        help("The endpoint is unreachable. Is the hosting process running?")
    )]
    Transport { target: String, message: String },

    #[error("remote endpoint answered {status}: {message}")]
    #[diagnostic(code(rulenet::invoke::remote))]
    Remote { status: u16, message: String },

    #[error("\"{method}\" failed on target: {message}")]
    #[diagnostic(code(rulenet::invoke::target))]
    Target { method: String, message: String },

    #[error("cannot decode invocation result: {message}")]
    #[diagnostic(
        code(rulenet::invoke::codec),
        help("Server version mismatch?")
    )]
    Codec { message: String },
}

/// Result type for invocations.
pub type InvokeResult<T> = std::result::Result<T, InvokeError>;

// ---------------------------------------------------------------------------
// Inference errors
// ---------------------------------------------------------------------------

/// Failure raised by a rule's `infer` hook.
#[derive(Debug, Error, Diagnostic)]
pub enum InferenceError {
    #[error("inference failed: {message}")]
    #[diagnostic(code(rulenet::inference::failed))]
    Failed { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Trie(#[from] TrieError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Invoke(#[from] InvokeError),
}

impl InferenceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule runtime errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("rule '{rule}' rejected fact at {path}: {reason}")]
    #[diagnostic(code(rulenet::rule::rejected))]
    Rejected {
        rule: String,
        path: String,
        reason: String,
    },

    #[error("rule '{rule}' is dormant after an inference failure: {message}")]
    #[diagnostic(
        code(rulenet::rule::faulted),
        help("Inspect the logged error, fix the rule, and start a fresh runtime.")
    )]
    Faulted { rule: String, message: String },

    #[error("rule '{rule}' has been stopped")]
    #[diagnostic(code(rulenet::rule::stopped))]
    Stopped { rule: String },

    #[error("failed to spawn inference worker for rule '{rule}'")]
    #[diagnostic(
        code(rulenet::rule::spawn),
        help("The OS refused to create a thread. Check process thread limits.")
    )]
    Spawn {
        rule: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Trie(#[from] TrieError),
}

/// Result type for rule runtime operations.
pub type RuleResult<T> = std::result::Result<T, RuleError>;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    #[diagnostic(
        code(rulenet::config::io),
        help("Check that the file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {message}")]
    #[diagnostic(
        code(rulenet::config::parse),
        help("The config file is TOML with optional [engine] and [server] tables.")
    )]
    Parse { message: String },
}

// ---------------------------------------------------------------------------
// Engine image errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ImageError {
    #[error("failed to encode engine image: {message}")]
    #[diagnostic(code(rulenet::image::encode))]
    Encode { message: String },

    #[error("failed to decode engine image: {message}")]
    #[diagnostic(
        code(rulenet::image::decode),
        help("The image may be truncated or produced by an incompatible build.")
    )]
    Decode { message: String },

    #[error("unsupported engine image version {found} (expected {expected})")]
    #[diagnostic(code(rulenet::image::version))]
    Version { found: u32, expected: u32 },
}

/// Convenience result type.
pub type RuleNetResult<T> = std::result::Result<T, RuleNetError>;
