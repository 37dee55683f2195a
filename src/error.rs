use thiserror::Error;

/// Причина сбоя операции согласования.
///
/// Каждый вариант имеет стабильный `reason_code` для отображения в UI.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("unexpected offer: {0}")]
    UnexpectedOffer(String),
    #[error("unexpected answer: {0}")]
    UnexpectedAnswer(String),
    #[error("both participants offered and no tie-break policy is configured")]
    GlareUnresolved,
    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),
    #[error("malformed signaling message: {0}")]
    MalformedMessage(String),
    #[error("local media unavailable: {0}")]
    MediaUnavailable(String),
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("session is closed")]
    SessionClosed,
}

impl NegotiationError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidState(_) => "invalid_state",
            Self::UnexpectedOffer(_) => "unexpected_offer",
            Self::UnexpectedAnswer(_) => "unexpected_answer",
            Self::GlareUnresolved => "glare_unresolved",
            Self::InvalidCandidate(_) => "invalid_candidate",
            Self::MalformedMessage(_) => "malformed_message",
            Self::MediaUnavailable(_) => "media_unavailable",
            Self::TransportFailure(_) => "transport_failure",
            Self::SessionClosed => "session_closed",
        }
    }

    /// Ошибки, после которых сессия переходит в `Failed`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportFailure(_) | Self::MediaUnavailable(_))
    }

    /// Сообщение отбрасывается, сессия продолжает работу.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidCandidate(_) | Self::MalformedMessage(_))
    }
}

impl From<webrtc::Error> for NegotiationError {
    fn from(err: webrtc::Error) -> Self {
        Self::TransportFailure(err.to_string())
    }
}

impl From<serde_json::Error> for NegotiationError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedMessage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NegotiationError>;
