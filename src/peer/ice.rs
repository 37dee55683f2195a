use crate::error::{NegotiationError, Result};
use crate::peer::types::IceCandidate;
use std::collections::VecDeque;
use tracing::debug;

const CANDIDATE_TYPES: [&str; 4] = ["host", "srflx", "prflx", "relay"];

/// Разбирает payload кандидата из сообщения `candidate`.
///
/// Принимается JSON вида `{"candidate": "...", "sdpMid": "0", "sdpMLineIndex": 0}`
/// или голая строка `candidate:...` (с необязательным префиксом `a=`).
pub fn parse_candidate(payload: &str) -> Result<IceCandidate> {
    let trimmed = payload.trim();
    let candidate = if trimmed.starts_with('{') {
        serde_json::from_str::<IceCandidate>(trimmed)
            .map_err(|e| NegotiationError::InvalidCandidate(e.to_string()))?
    } else {
        IceCandidate::new(trimmed)
    };
    validate_candidate_line(&candidate.candidate)?;
    Ok(candidate)
}

/// Сериализует кандидат в payload сообщения
pub fn candidate_payload(candidate: &IceCandidate) -> Result<String> {
    serde_json::to_string(candidate).map_err(|e| NegotiationError::InvalidCandidate(e.to_string()))
}

/// Проверяет строку вида
/// `candidate:<foundation> <component> <transport> <priority> <address> <port> typ <type> ...`
pub fn validate_candidate_line(line: &str) -> Result<()> {
    let invalid = |why: &str| NegotiationError::InvalidCandidate(format!("{why}: {line:?}"));

    let line = line.strip_prefix("a=").unwrap_or(line);
    let body = line
        .strip_prefix("candidate:")
        .ok_or_else(|| invalid("missing candidate: prefix"))?;
    let fields: Vec<&str> = body.split_whitespace().collect();
    if fields.len() < 8 {
        return Err(invalid("too few fields"));
    }
    if fields[1].parse::<u16>().is_err() {
        return Err(invalid("bad component"));
    }
    let transport = fields[2].to_ascii_lowercase();
    if transport != "udp" && transport != "tcp" {
        return Err(invalid("bad transport"));
    }
    if fields[3].parse::<u32>().is_err() {
        return Err(invalid("bad priority"));
    }
    if fields[4].is_empty() {
        return Err(invalid("empty address"));
    }
    if fields[5].parse::<u16>().is_err() {
        return Err(invalid("bad port"));
    }
    if fields[6] != "typ" || !CANDIDATE_TYPES.contains(&fields[7]) {
        return Err(invalid("bad candidate type"));
    }
    Ok(())
}

/// Кандидаты, полученные до установки remote description.
///
/// Порядок прихода сохраняется; каждый кандидат выдаётся ровно один раз.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
        debug!(buffered = self.pending.len(), "remote description not set yet, queuing candidate");
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Забирает все отложенные кандидаты в порядке прихода
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
