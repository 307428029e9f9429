//! CLI for subrelay
//!
//! Subcommands:
//! - `relay`: subscribe to the configured topics and serve downstream clients
//! - `watch`: print a few topic feeds to the terminal

use std::process::ExitCode;

use clap::Parser;
use subrelay::config::{Settings, load_config};
use subrelay::multiplexer::Multiplexer;
use subrelay::presentation::{ConsolePresenter, PresenterHandler};
use subrelay::registry::Registry;
use subrelay::relay::Broadcaster;
use subrelay::transport;
use subrelay::upstream::Topic;
use subrelay::utils::{RelayError, Result, logging};
use tracing::{error, info, warn};
use url::Url;

#[derive(Parser)]
#[command(name = "subrelay")]
enum Command {
    /// Relay the configured topics to downstream websocket clients
    Relay,
    /// Subscribe to topics and print their feeds
    Watch {
        /// Upstream subscription URL (default: upstream.url from config)
        #[arg(long)]
        url: Option<String>,
        /// Topics as `name` or `name/instance`
        #[arg(default_values_t = [
            "measurement".to_string(),
            "service".to_string(),
            "measurement/2".to_string(),
        ])]
        topics: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.logging.level);

    let outcome = match cmd {
        Command::Relay => run_relay(&config).await,
        Command::Watch { url, topics } => run_watch(&config, url.as_deref(), &topics).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("subrelay failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_relay(config: &Settings) -> Result<()> {
    let base_url = config.upstream.base_url()?;
    let topics = config.relay.topics()?;
    let listener = transport::bind(&config.server.addr()).await?;

    let registry = Registry::new();
    let mut mux = Multiplexer::new(base_url, Broadcaster::new(registry.clone()))
        .with_reconnect(config.reconnect.policy());

    for topic in topics {
        let key = topic.display_key();
        match mux.subscribe_topic(topic).await {
            Ok(status) => info!("Relaying {} ({:?})", status.key(), status.state()),
            Err(e) => warn!("Could not subscribe to {}: {}", key, e),
        }
    }

    let outcome = tokio::select! {
        _ = transport::serve(listener, registry) => {
            error!("Downstream server exited unexpectedly.");
            Err(RelayError::ServerStopped)
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    };

    mux.shutdown().await;
    outcome
}

async fn run_watch(config: &Settings, url: Option<&str>, topics: &[String]) -> Result<()> {
    let base_url = match url {
        Some(url) => Url::parse(url)?,
        None => config.upstream.base_url()?,
    };
    let topics = topics
        .iter()
        .map(|t| t.parse::<Topic>())
        .collect::<Result<Vec<_>>>()?;

    let handler = PresenterHandler::new(ConsolePresenter::stdout());
    let mut mux = Multiplexer::new(base_url, handler).with_reconnect(config.reconnect.policy());

    for topic in topics {
        let key = topic.display_key();
        if let Err(e) = mux.subscribe_topic(topic).await {
            warn!("Could not subscribe to {}: {}", key, e);
        }
    }

    if mux.is_empty() {
        warn!("No topic could be subscribed.");
        return Ok(());
    }

    tokio::select! {
        _ = mux.wait_closed() => {
            info!("All subscriptions closed.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    mux.shutdown().await;
    Ok(())
}
