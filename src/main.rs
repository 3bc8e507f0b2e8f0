//! rulenet CLI: host a reasoning engine, or talk to one over HTTP.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde_json::{Value, json};

use rulenet::config::Settings;
use rulenet::engine::EngineImage;
use rulenet::handle::Handle;
use rulenet::invoke::http::HttpInvoker;
use rulenet::invoke::{Invoker, methods};
use rulenet::key::KeyPath;

/// Name the hosted engine is bound under.
const ENGINE_OBJECT: &str = "engine";

#[derive(Parser)]
#[command(name = "rulenet", version, about = "Distributed declarative rule engine")]
struct Cli {
    /// TOML settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a reasoning engine over HTTP.
    #[cfg(feature = "server")]
    Serve {
        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Post a fact to a running engine.
    Post {
        #[command(flatten)]
        target: EngineTarget,

        /// Key path, e.g. "sensor/kitchen/temp".
        #[arg(long)]
        keys: KeyPath,

        /// Fact as JSON, e.g. '21.5' or '{"unit":"C"}'.
        #[arg(long)]
        fact: String,
    },

    /// Register an HTTP-hosted subscriber with a running engine.
    Register {
        #[command(flatten)]
        target: EngineTarget,

        #[command(flatten)]
        subscriber: Subscriber,
    },

    /// Remove one registration from a running engine.
    Unregister {
        #[command(flatten)]
        target: EngineTarget,

        #[command(flatten)]
        subscriber: Subscriber,
    },

    /// Print a running engine's registrations as a JSON image.
    Image {
        #[command(flatten)]
        target: EngineTarget,
    },
}

#[derive(Args)]
struct EngineTarget {
    /// Base URL of the engine host. Defaults to the configured server address.
    #[arg(long)]
    url: Option<String>,

    /// Object name of the engine on that host.
    #[arg(long, default_value = ENGINE_OBJECT)]
    engine: String,
}

#[derive(Args)]
struct Subscriber {
    /// Key path to subscribe to.
    #[arg(long)]
    keys: KeyPath,

    /// Base URL of the host serving the subscriber.
    #[arg(long)]
    subscriber_url: String,

    /// Object name of the subscriber on that host.
    #[arg(long)]
    object: String,
}

impl Subscriber {
    fn args(&self) -> Value {
        json!({
            "handle": Handle::http(&self.subscriber_url, &self.object),
            "keys": self.keys,
        })
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::from_env()?,
    };
    let http = HttpInvoker::new(settings.engine.invoke_timeout());

    match cli.command {
        #[cfg(feature = "server")]
        Commands::Serve { port } => serve(settings, port)?,

        Commands::Post { target, keys, fact } => {
            let fact: Value = serde_json::from_str(&fact).into_diagnostic()?;
            let engine = target.handle(&settings);
            http.invoke(&engine, methods::POST, json!({"fact": fact, "keys": keys}))?;
            println!("posted to {keys}");
        }

        Commands::Register { target, subscriber } => {
            let engine = target.handle(&settings);
            http.invoke(&engine, methods::REGISTER, subscriber.args())?;
            println!(
                "registered {}/objects/{} at {}",
                subscriber.subscriber_url.trim_end_matches('/'),
                subscriber.object,
                subscriber.keys
            );
        }

        Commands::Unregister { target, subscriber } => {
            let engine = target.handle(&settings);
            let removed = http.invoke(&engine, methods::UNREGISTER, subscriber.args())?;
            if removed == Value::Bool(true) {
                println!("unregistered {} at {}", subscriber.object, subscriber.keys);
            } else {
                println!(
                    "{} was not registered at {}",
                    subscriber.object, subscriber.keys
                );
            }
        }

        Commands::Image { target } => {
            let engine = target.handle(&settings);
            let image: EngineImage =
                serde_json::from_value(http.invoke(&engine, methods::IMAGE, Value::Null)?)
                    .into_diagnostic()?;
            println!("{}", image.to_json()?);
        }
    }

    Ok(())
}

impl EngineTarget {
    fn handle(&self, settings: &Settings) -> Handle {
        let url = self
            .url
            .clone()
            .unwrap_or_else(|| settings.server.base_url());
        Handle::http(url, &self.engine)
    }
}

#[cfg(feature = "server")]
fn serve(mut settings: Settings, port: Option<u16>) -> Result<()> {
    use std::sync::Arc;

    use rulenet::engine::ReasoningEngine;
    use rulenet::invoke::LocalDirectory;

    if let Some(port) = port {
        settings.server.port = port;
    }
    let addr = settings.server.socket_addr()?;

    let directory = Arc::new(LocalDirectory::new());
    let engine = ReasoningEngine::hosted(settings.engine.clone(), Arc::clone(&directory));
    let handle = directory.bind(ENGINE_OBJECT, Arc::new(engine));
    tracing::info!(%handle, "engine bound");

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime
        .block_on(rulenet::server::serve(addr, directory))
        .into_diagnostic()
}
