use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, timeout_at, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, warn};

use crate::protocol::{ClientEnvelope, Phase, ServerEnvelope};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Dials `ruid` as `uid` and prints each relay envelope as a JSON line.
///
/// Returns once the relay sends STOP, closes the socket, or `wait` elapses.
pub async fn run_dial_client(url: &str, uid: &str, ruid: &str, wait: Duration) -> Result<()> {
    debug!("Connecting to {} as {}", url, uid);

    let (ws_stream, _) = match timeout(CONNECT_TIMEOUT, connect_async(url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", url, e);
            return Err(anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            error!("Connection timeout after {} seconds", CONNECT_TIMEOUT.as_secs());
            return Err(anyhow!("Connection timeout - is the relay running?"));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let dial = serde_json::to_string(&ClientEnvelope::dial(uid, ruid))?;
    write.send(Message::Text(dial.into())).await?;

    let deadline = Instant::now() + wait;
    loop {
        let next = match timeout_at(deadline, read.next()).await {
            Ok(next) => next,
            Err(_) => {
                debug!("Stopped listening after {} seconds", wait.as_secs());
                break;
            }
        };
        let Some(frame) = next else {
            debug!("Relay closed the connection");
            break;
        };

        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let envelope: ServerEnvelope = match serde_json::from_str(text.as_str()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring unexpected relay frame: {}", e);
                continue;
            }
        };
        println!("{}", serde_json::to_string(&envelope)?);

        if envelope.phase == Phase::Dial.code() && !envelope.success {
            return Err(anyhow!("Dial rejected: {}", envelope.message));
        }
        if envelope.phase == Phase::Stop.code() {
            break;
        }
    }

    let _ = write.send(Message::Close(None)).await;
    Ok(())
}
