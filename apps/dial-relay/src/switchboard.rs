//! Shared pairing state for every session.
//!
//! The registry and the connection table sit behind a single lock. Each public
//! operation (dial, relay, teardown) runs start to finish under that lock, so a
//! handshake that touches two users can never interleave with another one.
//! Nothing awaits while the lock is held; outbound sends use `try_send`.

use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connections::{ConnectionHandle, ConnectionTable};
use crate::error::ProtocolError;
use crate::protocol::{DialRequest, Phase, ServerEnvelope};
use crate::registry::{Registry, User, UserState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    /// First half of the handshake; waiting for the remote side to dial back.
    Pending,
    /// Both sides dialed each other and are now busy.
    Connected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Whether this call removed the user from the registry.
    pub removed: bool,
    /// Partner that was reset and sent STOP.
    pub notified_partner: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SwitchboardStats {
    pub registered_users: usize,
    pub live_connections: usize,
    pub busy_pairs: usize,
}

#[derive(Clone, Default)]
pub struct Switchboard {
    inner: Arc<Mutex<SwitchboardInner>>,
}

#[derive(Default)]
struct SwitchboardInner {
    registry: Registry,
    connections: ConnectionTable,
}

impl Switchboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one DIAL request from the connection behind `connection`.
    pub fn dial(
        &self,
        request: &DialRequest,
        connection: &ConnectionHandle,
    ) -> Result<DialOutcome, ProtocolError> {
        let mut inner = self.inner.lock();
        let result = inner.dial(request, connection);
        match &result {
            Ok(DialOutcome::Connected) => {
                counter!("dial_relay_pairings_completed_total", 1);
                info!(uid = %request.uid, ruid = %request.ruid, "pairing completed");
            }
            Ok(DialOutcome::Pending) => {
                debug!(uid = %request.uid, ruid = %request.ruid, "dial pending");
            }
            Err(err) => {
                counter!("dial_relay_dial_rejected_total", 1, "reason" => err.reason());
                debug!(uid = %request.uid, ruid = %request.ruid, error = %err, "dial rejected");
            }
        }
        result
    }

    /// Forwards an offer/answer/candidate payload from `uid` to its partner.
    pub fn relay(&self, uid: Option<&str>, phase: Phase, payload: &str) -> Result<(), ProtocolError> {
        let inner = self.inner.lock();
        let partner_id = uid
            .and_then(|uid| inner.registry.get(uid))
            .and_then(User::active_partner)
            .ok_or(ProtocolError::IncorrectPhase)?;
        let partner = inner
            .connections
            .get(partner_id)
            .ok_or(ProtocolError::IncorrectPhase)?;

        match partner.send(ServerEnvelope::relayed(phase, payload)) {
            Ok(()) => {
                counter!("dial_relay_messages_relayed_total", 1, "phase" => phase.as_str());
            }
            Err(err) => {
                counter!("dial_relay_outbound_dropped_total", 1, "reason" => err.reason());
                warn!(
                    partner = %partner_id,
                    phase = phase.as_str(),
                    error = %err,
                    "dropping relayed message"
                );
            }
        }
        Ok(())
    }

    /// Removes `uid` and its connection, then resets and notifies its partner.
    ///
    /// Only the connection that currently owns `uid` may tear it down; repeated
    /// calls find nothing left to remove.
    pub fn teardown(&self, uid: &str, connection_id: Uuid) -> TeardownReport {
        let mut inner = self.inner.lock();
        inner.teardown(uid, connection_id)
    }

    pub fn user(&self, uid: &str) -> Option<User> {
        self.inner.lock().registry.get(uid).cloned()
    }

    pub fn connection_owner(&self, uid: &str) -> Option<Uuid> {
        self.inner.lock().connections.owner(uid)
    }

    pub fn stats(&self) -> SwitchboardStats {
        let inner = self.inner.lock();
        SwitchboardStats {
            registered_users: inner.registry.len(),
            live_connections: inner.connections.len(),
            busy_pairs: inner.registry.count_in(UserState::Busy) / 2,
        }
    }
}

impl SwitchboardInner {
    fn dial(
        &mut self,
        request: &DialRequest,
        connection: &ConnectionHandle,
    ) -> Result<DialOutcome, ProtocolError> {
        let DialRequest { uid, ruid } = request;

        if let Some(owner) = self.connections.owner(uid) {
            if owner != connection.id() {
                return Err(ProtocolError::InvalidLocalUid);
            }
        }

        let local_state = self
            .registry
            .get(uid)
            .map(|user| user.state)
            .unwrap_or_default();

        match local_state {
            UserState::Idle => {
                if uid == ruid {
                    return Err(ProtocolError::InvalidRemoteUid);
                }
                let remote_busy = self
                    .registry
                    .get(ruid)
                    .is_some_and(|remote| remote.state != UserState::Idle);
                if remote_busy {
                    return Err(ProtocolError::InvalidRemoteUid);
                }

                self.pair(uid, ruid, UserState::Dialing);
                if let Some(user) = self.registry.get_mut(uid) {
                    user.initiator = true;
                }
                self.connections.insert(uid, connection.clone());
                Ok(DialOutcome::Pending)
            }
            UserState::Dialing => {
                let Some(local) = self.registry.get(uid) else {
                    return Err(ProtocolError::InvalidRemoteUid);
                };
                if local.partner.as_deref() != Some(ruid.as_str()) {
                    return Err(ProtocolError::InvalidRemoteUid);
                }
                // The first mover dialing again keeps waiting.
                if local.initiator {
                    return Ok(DialOutcome::Pending);
                }

                self.pair(uid, ruid, UserState::Busy);
                self.connections.insert(uid, connection.clone());

                deliver(uid, connection, ServerEnvelope::dial_connected(true));
                match self.connections.get(ruid) {
                    Some(first_mover) => {
                        deliver(ruid, first_mover, ServerEnvelope::dial_connected(false))
                    }
                    None => warn!(uid = %ruid, "first mover has no live connection"),
                }
                Ok(DialOutcome::Connected)
            }
            UserState::Busy => Err(ProtocolError::InvalidLocalUid),
        }
    }

    /// Puts both users into `state` pointing at each other. Clears the
    /// initiator flag on both; the caller sets it for a fresh handshake.
    fn pair(&mut self, uid: &str, ruid: &str, state: UserState) {
        for (id, partner) in [(uid, ruid), (ruid, uid)] {
            let user = self.registry.find_or_create(id);
            user.state = state;
            user.partner = Some(partner.to_string());
            user.initiator = false;
        }
    }

    fn teardown(&mut self, uid: &str, connection_id: Uuid) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let Some(owner) = self.connections.owner(uid) {
            if owner != connection_id {
                debug!(uid = %uid, "skipping teardown of user owned by another connection");
                return report;
            }
        }
        self.connections.remove_owned(uid, connection_id);

        let Some(user) = self.registry.delete(uid) else {
            return report;
        };
        report.removed = true;

        let Some(partner_id) = user.active_partner() else {
            return report;
        };
        let points_back = self
            .registry
            .get(partner_id)
            .is_some_and(|partner| partner.active_partner() == Some(uid));
        if !points_back {
            return report;
        }

        match self.connections.get(partner_id) {
            Some(handle) => {
                if let Some(partner) = self.registry.get_mut(partner_id) {
                    partner.reset();
                }
                deliver(partner_id, handle, ServerEnvelope::stop());
                report.notified_partner = Some(partner_id.to_string());
            }
            None => {
                // Target that never connected; nothing else refers to it.
                self.registry.delete(partner_id);
            }
        }
        report
    }
}

fn deliver(uid: &str, handle: &ConnectionHandle, message: ServerEnvelope) {
    if let Err(err) = handle.send(message) {
        counter!("dial_relay_outbound_dropped_total", 1, "reason" => err.reason());
        warn!(uid = %uid, error = %err, "failed to deliver message");
    }
}
