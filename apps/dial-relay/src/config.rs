use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::cli::ServerArgs;
use crate::session::SessionConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub plain_addr: Option<SocketAddr>,
    pub tls: Option<TlsFiles>,
    pub session: SessionConfig,
    pub shutdown_grace: Duration,
}

impl TryFrom<ServerArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServerArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;
        let plain_addr = args
            .plain_addr
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("invalid plain address: {addr}"))
            })
            .transpose()?;

        let tls = match (args.tls_cert, args.tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
            (None, None) => None,
            _ => bail!("--tls-cert and --tls-key must be given together"),
        };

        if args.outbound_buffer == 0 {
            bail!("outbound buffer must be greater than zero");
        }
        if plain_addr == Some(listen_addr) {
            bail!("plain listener cannot share the primary address {listen_addr}");
        }

        let idle_timeout =
            (args.idle_timeout_secs > 0).then(|| Duration::from_secs(args.idle_timeout_secs));

        Ok(ServerConfig {
            listen_addr,
            plain_addr,
            tls,
            session: SessionConfig {
                outbound_buffer: args.outbound_buffer,
                read_retry_limit: args.read_retry_limit,
                read_retry_backoff: Duration::from_millis(args.read_retry_backoff_ms),
                idle_timeout,
            },
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}
