//! streambridge-tail entry point.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use streambridge_client::cli::Cli;
use streambridge_client::{ClientResult, ImportClient, JsonLinesDispatch};
use streambridge_core::{TracingConfig, init_tracing};

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

async fn run(cli: Cli) -> ClientResult<()> {
    init_tracing(TracingConfig::cli().with_debug(cli.debug))?;

    let client = match cli.socket_path {
        Some(path) => ImportClient::new(path),
        None => ImportClient::with_defaults(),
    }
    .with_connect_timeout(Duration::from_secs(cli.connect_timeout))
    .with_buffer_size(cli.buffer_size);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let mut dispatch = JsonLinesDispatch::new(std::io::stdout().lock());
    let stats = client.run(&mut dispatch, &cancel).await?;
    info!(
        dispatched = stats.dispatched,
        keepalives = stats.keepalives,
        skipped = stats.skipped,
        "import finished"
    );
    Ok(())
}
