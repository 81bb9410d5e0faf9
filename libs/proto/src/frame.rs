//! The frame envelope carried on the wire.

use cpat_id::AgentUuid;
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::kinds::{CommandKind, EventKind, MessageKind, Role};
use crate::payloads::Payload;

/// Reason a peer refused or aborted a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The transport carried no verified client certificate.
    Unauthenticated,
    /// The claimed role may not connect to this peer.
    InvalidRole,
    /// A message arrived before the handshake completed.
    NotConnected,
    /// A payload could not be decoded for its kind.
    InvalidPayload,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::InvalidRole => "invalid_role",
            ErrorCode::NotConnected => "not_connected",
            ErrorCode::InvalidPayload => "invalid_payload",
        };
        write!(f, "{}", s)
    }
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Opens a session.
    Connect { role: Role, uuid: AgentUuid },

    /// Accepts a session; carries the acceptor's own role and identity.
    Connected { role: Role, uuid: AgentUuid },

    /// An instruction for the receiver.
    Command {
        kind: CommandKind,
        payload: serde_json::Value,
    },

    /// A notification for the receiver.
    Event {
        kind: EventKind,
        payload: serde_json::Value,
    },

    /// Refusal or abort.
    Error { code: ErrorCode, detail: String },
}

impl Frame {
    /// Builds a command or event frame from a typed payload.
    pub fn message<P: Payload>(payload: &P) -> Result<Self, ProtoError> {
        let payload_value = serde_json::to_value(payload)?;
        Ok(match P::KIND {
            MessageKind::Command(kind) => Frame::Command {
                kind,
                payload: payload_value,
            },
            MessageKind::Event(kind) => Frame::Event {
                kind,
                payload: payload_value,
            },
        })
    }

    /// The correlation key of a command or event frame.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Frame::Command { kind, .. } => Some(MessageKind::Command(*kind)),
            Frame::Event { kind, .. } => Some(MessageKind::Event(*kind)),
            _ => None,
        }
    }

    /// The raw payload of a command or event frame.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Frame::Command { payload, .. } | Frame::Event { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Decodes the payload, checking that the frame carries `P`'s kind.
    pub fn decode<P: Payload>(&self) -> Result<P, ProtoError> {
        match (self.kind(), self.payload()) {
            (Some(kind), Some(payload)) if kind == P::KIND => {
                Ok(serde_json::from_value(payload.clone())?)
            }
            (Some(kind), _) => Err(ProtoError::UnexpectedKind {
                expected: P::KIND,
                actual: kind.to_string(),
            }),
            (None, _) => Err(ProtoError::UnexpectedKind {
                expected: P::KIND,
                actual: self.name().to_string(),
            }),
        }
    }

    /// Short frame name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Connect { .. } => "connect",
            Frame::Connected { .. } => "connected",
            Frame::Command { .. } => "command",
            Frame::Event { .. } => "event",
            Frame::Error { .. } => "error",
        }
    }
}
