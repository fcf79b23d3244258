//! Call setup state for one pair of peers.
//!
//! The server relays signaling payloads without looking at them. This module
//! is for the endpoints: each side keeps one [`CallState`] per remote
//! connection and feeds it the signals it sends and receives.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// WebRTC signaling payload as exchanged by the endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal_type")]
pub enum CallSignal {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u16>,
    },
}

impl CallSignal {
    /// Interpret a relayed payload. Payloads from unknown clients may be anything.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }

    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    OfferSent,
    /// Both session descriptions are in place
    AnswerReceived,
    IceExchanging,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: CallState,
    pub direction: Direction,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unexpected {:?} signal in state {:?}", self.direction, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

impl CallState {
    /// Advance on a signal sent (`Outbound`) or received (`Inbound`).
    ///
    /// Once ICE is flowing any offer, answer or candidate is accepted and the
    /// state is kept, since ICE restarts renegotiate on a live call.
    pub fn on_signal(self, direction: Direction, signal: &CallSignal) -> Result<Self, InvalidTransition> {
        use CallSignal::*;
        use CallState::*;
        use Direction::*;

        let next = match (self, direction, signal) {
            (IceExchanging | Connected, _, _) => self,
            (Idle, Outbound, Offer { .. }) => OfferSent,
            (OfferSent, Inbound, Answer { .. }) => AnswerReceived,
            // Answering side: remote offer came in and we replied.
            (Idle, Inbound, Offer { .. }) => Idle,
            (Idle, Outbound, Answer { .. }) => AnswerReceived,
            (AnswerReceived, _, IceCandidate { .. }) => IceExchanging,
            _ => return Err(InvalidTransition { from: self, direction }),
        };
        Ok(next)
    }

    /// Media is flowing. Only valid after candidates have been exchanged.
    pub fn on_connected(self) -> Result<Self, InvalidTransition> {
        match self {
            Self::IceExchanging | Self::Connected => Ok(Self::Connected),
            from => Err(InvalidTransition { from, direction: Direction::Inbound }),
        }
    }

    pub fn on_hangup(self) -> Self {
        Self::Idle
    }
}
