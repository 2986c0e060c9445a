use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dial-relay", author, version)]
#[command(about = "WebRTC signaling relay and debug dial client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dial a peer through a running relay and print every response
    Dial {
        /// Relay WebSocket URL
        #[arg(short, long, default_value = "ws://127.0.0.1:8080/ws")]
        url: String,

        /// Local identifier to claim
        #[arg(long)]
        uid: String,

        /// Identifier of the peer to pair with
        #[arg(long)]
        ruid: String,

        /// How long to keep listening for relay messages
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },
}

/// Listener and session settings for server mode.
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Primary listen address (TLS when a certificate pair is supplied).
    #[arg(long, env = "DIAL_RELAY_LISTEN_ADDR", default_value = "0.0.0.0:8443")]
    pub listen_addr: String,

    /// PEM certificate chain for the primary listener.
    #[arg(long, env = "DIAL_RELAY_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the primary listener.
    #[arg(long, env = "DIAL_RELAY_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Optional secondary unencrypted listener, for local testing.
    #[arg(long, env = "DIAL_RELAY_PLAIN_ADDR")]
    pub plain_addr: Option<String>,

    /// Depth of each connection's outbound queue.
    #[arg(long, env = "DIAL_RELAY_OUTBOUND_BUFFER", default_value_t = 64)]
    pub outbound_buffer: usize,

    /// Consecutive read failures tolerated before a session is closed.
    #[arg(long, env = "DIAL_RELAY_READ_RETRY_LIMIT", default_value_t = 3)]
    pub read_retry_limit: u32,

    /// Delay between read retries.
    #[arg(long, env = "DIAL_RELAY_READ_RETRY_BACKOFF_MS", default_value_t = 1000)]
    pub read_retry_backoff_ms: u64,

    /// Close sessions that send nothing for this long (0 disables).
    #[arg(long, env = "DIAL_RELAY_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    pub idle_timeout_secs: u64,

    /// Grace period applied during shutdown.
    #[arg(long, env = "DIAL_RELAY_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}
