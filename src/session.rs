use crate::error::{NegotiationError, Result};
use crate::peer::ice::CandidateBuffer;
use crate::peer::state::{ConnectionState, DescriptionState, Role};
use crate::peer::types::{IceCandidate, SessionDescription};

/// Контекст согласования одного локального участника.
///
/// Принадлежит ровно одному `Negotiator`; между звонками не переиспользуется.
#[derive(Debug, Default)]
pub struct Session {
    id: String,
    role: Role,
    local_state: DescriptionState,
    remote_state: DescriptionState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending: CandidateBuffer,
    failed: bool,
    closed: bool,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_state(&self) -> DescriptionState {
        self.local_state
    }

    pub fn remote_state(&self) -> DescriptionState {
        self.remote_state
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    /// Откладывает кандидат до установки удалённого описания
    pub fn buffer_candidate(&mut self, candidate: IceCandidate) {
        self.pending.push(candidate);
    }

    /// Забирает отложенные кандидаты в порядке прихода
    pub fn take_pending(&mut self) -> Vec<IceCandidate> {
        self.pending.drain()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.closed {
            ConnectionState::Closed
        } else if self.failed {
            ConnectionState::Failed
        } else if self.local_state != DescriptionState::None
            && self.remote_state != DescriptionState::None
        {
            ConnectionState::Connected
        } else if self.role != Role::Unassigned
            || self.local_state != DescriptionState::None
            || self.remote_state != DescriptionState::None
        {
            ConnectionState::Negotiating
        } else {
            ConnectionState::Idle
        }
    }

    /// Ошибка, если сессия уже в терминальном состоянии
    pub fn ensure_active(&self) -> Result<()> {
        if self.closed {
            return Err(NegotiationError::SessionClosed);
        }
        if self.failed {
            return Err(NegotiationError::InvalidState("session has failed".into()));
        }
        Ok(())
    }

    pub fn assign_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn set_local(&mut self, state: DescriptionState, desc: SessionDescription) -> Result<()> {
        if state <= self.local_state {
            return Err(NegotiationError::InvalidState(format!(
                "local description cannot move from {:?} to {:?}",
                self.local_state, state
            )));
        }
        self.local_state = state;
        self.local_description = Some(desc);
        Ok(())
    }

    pub fn set_remote(&mut self, state: DescriptionState, desc: SessionDescription) -> Result<()> {
        if state <= self.remote_state {
            return Err(NegotiationError::InvalidState(format!(
                "remote description cannot move from {:?} to {:?}",
                self.remote_state, state
            )));
        }
        self.remote_state = state;
        self.remote_description = Some(desc);
        Ok(())
    }

    /// Проигравший glare отказывается от своего offer и становится answerer.
    /// Единственный разрешённый откат локального описания.
    pub fn discard_local_offer(&mut self) {
        debug_assert_eq!(self.local_state, DescriptionState::Offered);
        self.local_state = DescriptionState::None;
        self.local_description = None;
        self.role = Role::Answerer;
    }

    pub fn mark_failed(&mut self) -> bool {
        if self.closed || self.failed {
            return false;
        }
        self.failed = true;
        true
    }

    /// Освобождает описания и кандидатов; `false`, если уже закрыта
    pub fn mark_closed(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.local_description = None;
        self.remote_description = None;
        self.pending.clear();
        true
    }
}
