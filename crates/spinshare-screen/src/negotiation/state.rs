//! Negotiation states and the legal transitions between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the exchange a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Issues the offer.
    Sender,
    /// Waits for an offer and answers it.
    Receiver,
}

/// Sender path: `Idle -> Offering -> AwaitingAnswer -> Connected`.
/// Receiver path: `Idle -> AwaitingOffer -> Answering -> Connected`.
/// Any live state may fail, and every state but `Closed` may close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    Idle,
    Offering,
    AwaitingAnswer,
    AwaitingOffer,
    Answering,
    Connected,
    Failed,
    Closed,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Offering => "offering",
            Self::AwaitingAnswer => "awaiting-answer",
            Self::AwaitingOffer => "awaiting-offer",
            Self::Answering => "answering",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// States in which we are waiting on the remote side or on the
    /// transport to finish a description exchange.
    pub fn is_negotiating(&self) -> bool {
        matches!(
            self,
            Self::Offering | Self::AwaitingAnswer | Self::AwaitingOffer | Self::Answering
        )
    }

    /// Negotiating states that are subject to the stall timeout.
    /// `AwaitingOffer` is exempt: the sender may not be capturing yet.
    pub fn has_deadline(&self) -> bool {
        matches!(self, Self::Offering | Self::AwaitingAnswer | Self::Answering)
    }

    pub fn can_transition(&self, to: NegotiationState, role: Role) -> bool {
        use NegotiationState::*;
        match (self, to) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (Idle, Offering) => role == Role::Sender,
            (Offering, AwaitingAnswer) => role == Role::Sender,
            (AwaitingAnswer, Connected) => role == Role::Sender,
            (Idle, AwaitingOffer) => role == Role::Receiver,
            (AwaitingOffer, Answering) => role == Role::Receiver,
            (Answering, Connected) => role == Role::Receiver,
            _ => false,
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
