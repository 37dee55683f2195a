//! Единый формат сообщений сигнализации и контракт канала-ретранслятора.
//!
//! На проводе: `{ "type": "offer" | "answer" | "candidate", "payload": string }`.
use crate::error::{NegotiationError, Result};
use crate::peer::ice::candidate_payload;
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Offer,
    Answer,
    Candidate,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "candidate" => Some(Self::Candidate),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Сообщение сигнализации; создаётся прямо перед отправкой и не меняется
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub payload: String,
}

impl SignalingMessage {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Offer,
            payload: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Answer,
            payload: sdp.into(),
        }
    }

    pub fn description(desc: &SessionDescription) -> Self {
        match desc.kind {
            SdpKind::Offer => Self::offer(desc.sdp.clone()),
            SdpKind::Answer => Self::answer(desc.sdp.clone()),
        }
    }

    pub fn candidate(candidate: &IceCandidate) -> Result<Self> {
        Ok(Self {
            kind: MessageType::Candidate,
            payload: candidate_payload(candidate)?,
        })
    }
}

// Промежуточная форма: отсутствующие поля различаются от пустых
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    payload: Option<String>,
}

pub fn encode(msg: &SignalingMessage) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Разбирает текст из ретранслятора.
///
/// Неизвестный или отсутствующий `type`, а также пустой `payload` у offer/answer
/// дают `MalformedMessage`; такое сообщение не передаётся в автомат согласования.
pub fn decode(text: &str) -> Result<SignalingMessage> {
    let raw: RawEnvelope = serde_json::from_str(text)?;
    let kind = raw
        .kind
        .ok_or_else(|| NegotiationError::MalformedMessage("missing type".into()))?;
    let kind = MessageType::parse(&kind)
        .ok_or_else(|| NegotiationError::MalformedMessage(format!("unknown type {kind:?}")))?;
    let payload = raw.payload.ok_or_else(|| {
        NegotiationError::MalformedMessage(format!("{kind} message without payload"))
    })?;
    if kind != MessageType::Candidate && payload.trim().is_empty() {
        return Err(NegotiationError::MalformedMessage(format!(
            "{kind} message with empty payload"
        )));
    }
    Ok(SignalingMessage { kind, payload })
}

/// Двунаправленный канал ретранслятора.
///
/// Доставка надёжная и упорядоченная в каждом направлении.
/// `recv` возвращает `None`, когда соединение с ретранслятором потеряно.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, text: String) -> Result<()>;
    async fn recv(&self) -> Option<String>;
}
