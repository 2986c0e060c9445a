use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use dial_relay::{
    cli::{Cli, Commands},
    client,
    config::ServerConfig,
    server,
    telemetry::Telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Debug client keeps stdout for envelopes, so only warnings by default.
    if let Some(Commands::Dial {
        url,
        uid,
        ruid,
        wait_secs,
    }) = cli.command
    {
        let _telemetry = Telemetry::init("warn", false)?;
        return client::run_dial_client(&url, &uid, &ruid, Duration::from_secs(wait_secs)).await;
    }

    let telemetry = Telemetry::init("info", true)?;
    let config = ServerConfig::try_from(cli.server)?;
    info!(
        listen_addr = %config.listen_addr,
        tls = config.tls.is_some(),
        plain_addr = ?config.plain_addr,
        outbound_buffer = config.session.outbound_buffer,
        "starting dial-relay"
    );

    server::run(config, telemetry.metrics_handle()).await
}
