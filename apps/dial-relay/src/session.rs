use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::connections::{ConnectionHandle, DEFAULT_OUTBOUND_BUFFER};
use crate::error::ProtocolError;
use crate::protocol::{ClientEnvelope, DialRequest, Phase, ServerEnvelope};
use crate::server::AppState;
use crate::switchboard::Switchboard;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-connection limits handed to every session loop.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub outbound_buffer: usize,
    /// Consecutive transient read failures tolerated before giving up.
    pub read_retry_limit: u32,
    pub read_retry_backoff: Duration,
    /// `None` disables the idle timeout.
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            read_retry_limit: 3,
            read_retry_backoff: Duration::from_secs(1),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

/// Owns one accepted connection until it closes, then tears it down.
async fn handle_socket(socket: WebSocket, state: AppState, remote_addr: SocketAddr) {
    let config = state.session_config().clone();
    let (mut sink, mut stream) = socket.split();
    let (connection, mut rx) = ConnectionHandle::channel(config.outbound_buffer);
    let connection_id = connection.id();

    counter!("dial_relay_sessions_opened_total", 1);
    info!(connection_id = %connection_id, remote_addr = %remote_addr, "session opened");

    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(err) => {
                    warn!(connection_id = %connection_id, error = %err, "failed to encode envelope");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
        debug!(connection_id = %connection_id, "writer task finished");
    });

    let mut session = Session::new(state.switchboard().clone(), connection);
    let mut failures: u32 = 0;

    loop {
        let next = match config.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!(connection_id = %connection_id, "closing idle session");
                    break;
                }
            },
            None => stream.next().await,
        };

        let frame = match next {
            None => break,
            Some(Ok(frame)) => {
                failures = 0;
                frame
            }
            Some(Err(err)) => {
                failures += 1;
                if failures > config.read_retry_limit {
                    warn!(
                        connection_id = %connection_id,
                        error = %err,
                        attempts = failures,
                        "giving up on connection after repeated read failures"
                    );
                    break;
                }
                warn!(
                    connection_id = %connection_id,
                    error = %err,
                    attempt = failures,
                    "read failed; retrying"
                );
                tokio::time::sleep(config.read_retry_backoff).await;
                continue;
            }
        };

        match frame {
            Message::Text(text) => session.handle_text(&text),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => session.handle_text(text),
                Err(_) => debug!(
                    connection_id = %connection_id,
                    len = data.len(),
                    "ignoring non-UTF8 binary frame"
                ),
            },
            Message::Close(frame) => {
                debug!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let uid = session.uid().map(str::to_string);
    drop(session);
    counter!("dial_relay_sessions_closed_total", 1);
    info!(connection_id = %connection_id, uid = ?uid, "session closed");

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

/// Protocol state of one connection.
///
/// Dropping a session runs its teardown, so every exit path cleans up.
pub struct Session {
    switchboard: Switchboard,
    connection: ConnectionHandle,
    uid: Option<String>,
}

impl Session {
    pub fn new(switchboard: Switchboard, connection: ConnectionHandle) -> Self {
        Self {
            switchboard,
            connection,
            uid: None,
        }
    }

    /// Identifier this connection is bound to after its first accepted dial.
    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    /// Handles one inbound frame. Malformed input is dropped.
    pub fn handle_text(&mut self, text: &str) {
        let envelope: ClientEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(connection_id = %self.connection.id(), error = %err, "dropping malformed envelope");
                return;
            }
        };

        match envelope.phase() {
            Some(Phase::Dial) => self.handle_dial(&envelope.data),
            Some(phase) if phase.is_relayed() => self.handle_relay(phase, &envelope.data),
            _ => debug!(
                connection_id = %self.connection.id(),
                phase = envelope.phase,
                "ignoring envelope"
            ),
        }
    }

    fn handle_dial(&mut self, data: &str) {
        let request = match DialRequest::parse(data) {
            Ok(request) => request,
            Err(err) => {
                debug!(connection_id = %self.connection.id(), error = %err, "dropping malformed dial");
                return;
            }
        };

        if self.uid.as_deref().is_some_and(|bound| bound != request.uid) {
            self.reject(Phase::Dial, ProtocolError::InvalidLocalUid);
            return;
        }

        match self.switchboard.dial(&request, &self.connection) {
            Ok(_) => {
                if self.uid.is_none() {
                    debug!(connection_id = %self.connection.id(), uid = %request.uid, "session bound");
                    self.uid = Some(request.uid);
                }
            }
            Err(err) => self.reject(Phase::Dial, err),
        }
    }

    fn handle_relay(&mut self, phase: Phase, payload: &str) {
        if let Err(err) = self.switchboard.relay(self.uid.as_deref(), phase, payload) {
            self.reject(phase, err);
        }
    }

    fn reject(&self, phase: Phase, err: ProtocolError) {
        if let Err(send_err) = self
            .connection
            .send(ServerEnvelope::failure(phase, err.to_string()))
        {
            warn!(
                connection_id = %self.connection.id(),
                error = %send_err,
                "failed to deliver rejection"
            );
        }
    }

    /// Releases the bound user. Later calls do nothing.
    pub fn teardown(&mut self) {
        if let Some(uid) = self.uid.take() {
            let report = self.switchboard.teardown(&uid, self.connection.id());
            debug!(
                connection_id = %self.connection.id(),
                uid = %uid,
                removed = report.removed,
                notified = ?report.notified_partner,
                "session torn down"
            );
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::UserState;
    use tokio::sync::mpsc;

    fn test_session(switchboard: &Switchboard) -> (Session, mpsc::Receiver<ServerEnvelope>) {
        let (connection, rx) = ConnectionHandle::channel(16);
        (Session::new(switchboard.clone(), connection), rx)
    }

    fn dial_text(uid: &str, ruid: &str) -> String {
        serde_json::to_string(&ClientEnvelope::dial(uid, ruid)).unwrap()
    }

    fn frame(phase: Phase, data: &str) -> String {
        serde_json::to_string(&ClientEnvelope::new(phase, data)).unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEnvelope>) -> Vec<ServerEnvelope> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[test]
    fn malformed_input_is_dropped_silently() {
        let board = Switchboard::new();
        let (mut session, mut rx) = test_session(&board);

        session.handle_text("not json");
        session.handle_text(r#"{"Phase":1,"Data":"{broken"}"#);
        session.handle_text(r#"{"Phase":9,"Data":"whatever"}"#);
        session.handle_text(&frame(Phase::Stop, ""));

        assert!(drain(&mut rx).is_empty());
        assert!(session.uid().is_none());
        assert_eq!(board.stats().registered_users, 0);
    }

    #[test]
    fn relay_before_pairing_reports_incorrect_phase() {
        let board = Switchboard::new();
        let (mut session, mut rx) = test_session(&board);

        session.handle_text(&frame(Phase::Candidate, "cand"));
        assert_eq!(
            drain(&mut rx),
            vec![ServerEnvelope::failure(Phase::Candidate, "incorrect phase")]
        );
    }

    #[test]
    fn session_stays_bound_to_first_uid() {
        let board = Switchboard::new();
        let (mut session, mut rx) = test_session(&board);

        session.handle_text(&dial_text("alice", "bob"));
        assert_eq!(session.uid(), Some("alice"));

        session.handle_text(&dial_text("mallory", "carol"));
        assert_eq!(
            drain(&mut rx),
            vec![ServerEnvelope::failure(Phase::Dial, "invalid local uid")]
        );
        assert!(board.user("mallory").is_none());
    }

    #[test]
    fn rejected_dial_does_not_bind() {
        let board = Switchboard::new();
        let (mut alice, _alice_rx) = test_session(&board);
        let (mut bob, _bob_rx) = test_session(&board);
        alice.handle_text(&dial_text("alice", "bob"));
        bob.handle_text(&dial_text("bob", "alice"));

        let (mut carol, mut carol_rx) = test_session(&board);
        carol.handle_text(&dial_text("carol", "bob"));
        assert_eq!(
            drain(&mut carol_rx),
            vec![ServerEnvelope::failure(Phase::Dial, "invalid remote uid")]
        );
        assert!(carol.uid().is_none());
    }

    #[test]
    fn dropping_a_session_runs_teardown() {
        let board = Switchboard::new();
        let (mut alice, mut alice_rx) = test_session(&board);
        let (mut bob, mut bob_rx) = test_session(&board);

        alice.handle_text(&dial_text("alice", "bob"));
        bob.handle_text(&dial_text("bob", "alice"));
        alice.handle_text(&frame(Phase::Offer, "<sdp-offer>"));
        assert_eq!(
            drain(&mut bob_rx),
            vec![
                ServerEnvelope::dial_connected(true),
                ServerEnvelope::relayed(Phase::Offer, "<sdp-offer>"),
            ]
        );

        drop(bob);

        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEnvelope::dial_connected(false), ServerEnvelope::stop()]
        );
        assert!(board.user("bob").is_none());
        assert_eq!(board.user("alice").unwrap().state, UserState::Idle);

        alice.handle_text(&frame(Phase::Answer, "late"));
        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEnvelope::failure(Phase::Answer, "incorrect phase")]
        );
    }
}
