//! Разрешение glare: оба участника отправили offer до того, как применили чужой.
use crate::peer::types::SessionDescription;
use std::cmp::Ordering;

/// Детерминированное правило выбора победителя при встречных offer.
///
/// Правило должно быть взаимодополняющим: если у одного участника
/// `local_wins` вернул `Some(true)`, у другого для той же пары он вернёт `Some(false)`.
/// `None` означает, что правило не может решить, и согласование завершается `GlareUnresolved`.
pub trait TieBreaker: Send + Sync {
    fn local_wins(&self, local_offer: &SessionDescription, remote_offer: &SessionDescription)
        -> Option<bool>;
}

/// Приоритет роли: одна сторона заранее назначена главной.
#[derive(Debug, Clone, Copy)]
pub struct FixedPriority {
    pub local_has_priority: bool,
}

impl FixedPriority {
    pub fn new(local_has_priority: bool) -> Self {
        Self { local_has_priority }
    }
}

impl TieBreaker for FixedPriority {
    fn local_wins(&self, _: &SessionDescription, _: &SessionDescription) -> Option<bool> {
        Some(self.local_has_priority)
    }
}

/// Побеждает участник с лексикографически большим id.
#[derive(Debug, Clone)]
pub struct PeerIdOrder {
    local_id: String,
    remote_id: String,
}

impl PeerIdOrder {
    pub fn new(local_id: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            remote_id: remote_id.into(),
        }
    }
}

impl TieBreaker for PeerIdOrder {
    fn local_wins(&self, _: &SessionDescription, _: &SessionDescription) -> Option<bool> {
        match self.local_id.cmp(&self.remote_id) {
            Ordering::Greater => Some(true),
            Ordering::Less => Some(false),
            Ordering::Equal => None,
        }
    }
}
