use serde::{Deserialize, Serialize};

/// Message phase tags carried in the `Phase`/`phase` field of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Dial,
    Offer,
    Answer,
    Candidate,
    /// Server-originated only.
    Stop,
}

impl Phase {
    pub fn code(self) -> i64 {
        match self {
            Phase::Dial => 1,
            Phase::Offer => 2,
            Phase::Answer => 3,
            Phase::Candidate => 4,
            Phase::Stop => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Phase::Dial),
            2 => Some(Phase::Offer),
            3 => Some(Phase::Answer),
            4 => Some(Phase::Candidate),
            5 => Some(Phase::Stop),
            _ => None,
        }
    }

    /// Phases whose payload is forwarded verbatim to the partner.
    pub fn is_relayed(self) -> bool {
        matches!(self, Phase::Offer | Phase::Answer | Phase::Candidate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Dial => "dial",
            Phase::Offer => "offer",
            Phase::Answer => "answer",
            Phase::Candidate => "candidate",
            Phase::Stop => "stop",
        }
    }
}

/// Envelope sent from a client to the relay.
///
/// `data` is an opaque string; for DIAL it holds a JSON-encoded [`DialRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientEnvelope {
    #[serde(rename = "Phase", alias = "phase", default)]
    pub phase: i64,
    #[serde(rename = "Data", alias = "data", default)]
    pub data: String,
}

impl ClientEnvelope {
    pub fn new(phase: Phase, data: impl Into<String>) -> Self {
        Self {
            phase: phase.code(),
            data: data.into(),
        }
    }

    pub fn dial(uid: &str, ruid: &str) -> Self {
        let data = serde_json::json!({ "Uid": uid, "Ruid": ruid }).to_string();
        Self::new(Phase::Dial, data)
    }

    /// Known phase of this envelope, `None` for anything the relay ignores.
    pub fn phase(&self) -> Option<Phase> {
        Phase::from_code(self.phase)
    }
}

/// Payload of a DIAL envelope: local and desired remote identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DialRequest {
    #[serde(rename = "Uid", alias = "uid")]
    pub uid: String,
    #[serde(rename = "Ruid", alias = "ruid")]
    pub ruid: String,
}

impl DialRequest {
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

/// Envelope sent from the relay to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerEnvelope {
    pub phase: i64,
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: String,
}

impl ServerEnvelope {
    pub fn success(phase: Phase, data: impl Into<String>) -> Self {
        Self {
            phase: phase.code(),
            success: true,
            message: String::new(),
            data: data.into(),
        }
    }

    pub fn failure(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase: phase.code(),
            success: false,
            message: message.into(),
            data: String::new(),
        }
    }

    /// Successful DIAL completion. `callee` is `false` for the first mover.
    pub fn dial_connected(callee: bool) -> Self {
        Self::success(Phase::Dial, callee.to_string())
    }

    pub fn stop() -> Self {
        Self::success(Phase::Stop, "")
    }

    pub fn relayed(phase: Phase, payload: &str) -> Self {
        Self::success(phase, payload)
    }
}
