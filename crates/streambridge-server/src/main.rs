//! streambridge connector daemon.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};

use streambridge_core::{Broker, TracingConfig, TracingOutputFormat, init_tracing};
use streambridge_server::handlers::{run_chat, run_eventsub, run_pubsub};
use streambridge_server::{
    ChannelPointsSource, ConnectorConfig, ExportServer, Publisher, ServerResult, ServiceManager,
    SignalHandler, EVENTS_TOPIC,
};

/// Bridges stream chat and alerts to local consumers
#[derive(Debug, Parser)]
#[command(name = "streambridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "STREAMBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Export socket path, overriding the configuration
    #[arg(long, env = "STREAMBRIDGE_SOCKET")]
    socket_path: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    debug: bool,

    /// Log format: pretty, compact or json
    #[arg(long, value_parser = clap::value_parser!(TracingOutputFormat))]
    log_format: Option<TracingOutputFormat>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ServerResult<()> {
    let mut config = ConnectorConfig::load(cli.config.as_deref())?;
    if let Some(socket_path) = cli.socket_path {
        config.export.socket_path = socket_path;
    }
    config.debug |= cli.debug;

    if cli.write_config {
        let path = cli.config.unwrap_or_else(ConnectorConfig::default_path);
        config.save_to(&path)?;
        println!("{}", path.display());
        return Ok(());
    }

    let mut tracing = TracingConfig::daemon().with_debug(config.debug);
    if let Some(format) = cli.log_format {
        tracing = tracing.with_format(format);
    }
    init_tracing(tracing)?;

    let signals = SignalHandler::default();
    let _listener = signals.spawn_listener();
    let cancel = signals.token();

    let broker = Broker::new();
    let export = ExportServer::new(config.export.clone(), broker.clone()).await?;
    let publisher = Publisher::new(broker, EVENTS_TOPIC);
    let mut services = ServiceManager::new(cancel.clone());

    services.add("export", move |cancel| async move { export.run(cancel).await });

    let twitch = config.twitch.clone();
    let chat_publisher = publisher.clone();
    services.add("twitch chat", move |cancel| run_chat(twitch, chat_publisher, cancel));

    let twitch = config.twitch.clone();
    match twitch.channel_points_source {
        ChannelPointsSource::EventSub => {
            let eventsub = twitch.eventsub_config();
            services.add("twitch eventsub", move |cancel| {
                run_eventsub(twitch, eventsub, publisher, cancel)
            });
        }
        ChannelPointsSource::PubSub => {
            if twitch.bits {
                let bits_only = streambridge_server::TwitchConfig {
                    channel_points: false,
                    ..twitch.clone()
                };
                let eventsub = bits_only.eventsub_config();
                let bits_publisher = publisher.clone();
                services.add("twitch eventsub", move |cancel| {
                    run_eventsub(bits_only, eventsub, bits_publisher, cancel)
                });
            }
            let pubsub = twitch.pubsub_config();
            services.add("twitch pubsub", move |cancel| {
                run_pubsub(twitch, pubsub, publisher, cancel)
            });
        }
    }

    if config.streamelements.enabled {
        warn!("streamelements is enabled but its socket client is not available");
    }

    info!(services = ?services.outstanding(), "connector running");
    cancel.cancelled().await;
    info!("shutting down");

    let stuck = services.stop().await;
    if !stuck.is_empty() {
        warn!(services = ?stuck, "exiting with services still running");
    }
    Ok(())
}
