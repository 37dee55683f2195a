//! Автомат согласования offer/answer для одного участника звонка.
//!
//! Все операции выполняются под захваченной сессией: входящие сообщения не
//! перемежаются. Вызовы транспорта отменяемы: после `close()` их результат
//! отбрасывается и к закрытой сессии не применяется.
use crate::config::NegotiatorConfig;
use crate::error::{NegotiationError, Result};
use crate::logger::{dump_candidate, dump_description};
use crate::peer::connection::{Transport, TransportEvent};
use crate::peer::ice::parse_candidate;
use crate::peer::media::{MediaCapability, MediaConstraints, MediaStream};
use crate::peer::state::{ConnectionState, DescriptionState, Role, TransportState};
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::session::Session;
use crate::signaling::{MessageType, SignalingMessage};
use crate::utils::random_id;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// События сессии для наблюдателя (UI)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Оба описания установлены
    Connected,
    RemoteTrack(String),
    TransportStateChanged(TransportState),
    Failed(NegotiationError),
    Closed,
}

pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Снимок состояния сессии
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub role: Role,
    pub local: DescriptionState,
    pub remote: DescriptionState,
    pub connection: ConnectionState,
    pub pending_candidates: usize,
}

pub struct Negotiator {
    config: NegotiatorConfig,
    transport: Arc<dyn Transport>,
    session: Mutex<Session>,
    state_tx: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Negotiator {
    pub fn new(transport: Arc<dyn Transport>, config: NegotiatorConfig) -> (Self, SessionEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let negotiator = Self {
            config,
            transport,
            session: Mutex::new(Session::new(random_id())),
            state_tx,
            events,
        };
        (negotiator, rx)
    }

    pub fn label(&self) -> &str {
        self.config.label()
    }

    /// Текущее состояние соединения без захвата сессии
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Ждёт перехода в `Failed` или `Closed`
    pub async fn wait_terminal(&self) -> ConnectionState {
        let mut rx = self.state_tx.subscribe();
        let st = match rx.wait_for(|st| st.is_terminal()).await {
            Ok(st) => *st,
            Err(_) => ConnectionState::Closed,
        };
        st
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let session = self.session.lock().await;
        SessionSnapshot {
            role: session.role(),
            local: session.local_state(),
            remote: session.remote_state(),
            connection: session.connection_state(),
            pending_candidates: session.pending_len(),
        }
    }

    /// Получает локальные медиа и передаёт их транспорту.
    /// `MediaUnavailable` переводит сессию в `Failed`.
    pub async fn acquire_local_media(
        &self,
        media: &dyn MediaCapability,
        constraints: MediaConstraints,
    ) -> Result<MediaStream> {
        let mut session = self.lock_active().await?;
        let result = async {
            let stream = self.guarded(media.acquire_local_media(constraints)).await?;
            self.guarded(self.transport.add_local_stream(&stream)).await?;
            Ok::<_, NegotiationError>(stream)
        }
        .await;
        self.settle(&mut session, result)
    }

    /// Начать звонок: создать и применить локальный offer
    pub async fn start_as_offerer(&self) -> Result<SignalingMessage> {
        let mut session = self.lock_active().await?;
        if session.role() != Role::Unassigned {
            return Err(NegotiationError::InvalidState(format!(
                "role already assigned: {:?}",
                session.role()
            )));
        }

        let result = async {
            let offer = self.guarded(self.transport.create_offer()).await?;
            self.guarded(self.transport.set_local_description(&offer))
                .await?;
            Ok::<_, NegotiationError>(offer)
        }
        .await;
        let offer = self.settle(&mut session, result)?;

        session.assign_role(Role::Offerer);
        session.set_local(DescriptionState::Offered, offer.clone())?;
        dump_description("LOCAL", &offer);
        info!(peer = self.label(), session = %session.id(), "local offer created");
        self.publish(&session);
        Ok(SignalingMessage::description(&offer))
    }

    /// Обработка входящего сообщения; может вернуть ответное сообщение
    pub async fn on_message(&self, msg: SignalingMessage) -> Result<Option<SignalingMessage>> {
        let mut session = self.lock_active().await?;
        debug!(peer = self.label(), kind = %msg.kind, "inbound signaling message");
        let result = match msg.kind {
            MessageType::Offer => {
                self.handle_offer(&mut session, SessionDescription::offer(msg.payload))
                    .await
            }
            MessageType::Answer => self
                .handle_answer(&mut session, SessionDescription::answer(msg.payload))
                .await
                .map(|()| None),
            MessageType::Candidate => self
                .handle_candidate(&mut session, &msg.payload)
                .await
                .map(|()| None),
        };
        if let Err(e) = &result {
            warn!(peer = self.label(), reason = e.reason_code(), error = %e, "signaling message rejected");
        }
        self.publish(&session);
        result
    }

    /// Оборачивает найденный локальный кандидат в сообщение для отправки
    pub fn on_local_candidate_generated(&self, candidate: IceCandidate) -> Result<SignalingMessage> {
        match self.connection_state() {
            ConnectionState::Closed => return Err(NegotiationError::SessionClosed),
            ConnectionState::Failed => {
                return Err(NegotiationError::InvalidState("session has failed".into()))
            }
            _ => {}
        }
        dump_candidate("LOCAL", &candidate);
        SignalingMessage::candidate(&candidate)
    }

    /// Диспетчер событий транспорта
    pub async fn on_transport_event(&self, event: TransportEvent) -> Result<Option<SignalingMessage>> {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.on_local_candidate_generated(candidate).map(Some)
            }
            TransportEvent::RemoteTrack(id) => {
                info!(peer = self.label(), track = %id, "remote track");
                self.emit(SessionEvent::RemoteTrack(id));
                Ok(None)
            }
            TransportEvent::ConnectionStateChanged(state) => {
                self.emit(SessionEvent::TransportStateChanged(state));
                match state {
                    TransportState::Failed => {
                        let mut session = self.session.lock().await;
                        self.fail(
                            &mut session,
                            NegotiationError::TransportFailure("peer connection failed".into()),
                        );
                    }
                    TransportState::Closed => self.close().await,
                    TransportState::Disconnected => {
                        warn!(peer = self.label(), "peer connection disconnected, waiting for recovery");
                    }
                    _ => debug!(peer = self.label(), ?state, "transport state"),
                }
                Ok(None)
            }
        }
    }

    /// Потеря связи с ретранслятором во время звонка
    pub async fn on_relay_disconnected(&self) {
        let mut session = self.session.lock().await;
        self.fail(
            &mut session,
            NegotiationError::TransportFailure("signaling relay disconnected".into()),
        );
    }

    /// Освобождает описания и кандидатов; повторный вызов ничего не делает
    pub async fn close(&self) {
        // сначала отменяем незавершённые вызовы транспорта, потом ждём сессию
        self.state_tx.send_replace(ConnectionState::Closed);
        let mut session = self.session.lock().await;
        if !session.mark_closed() {
            return;
        }
        if let Err(e) = self.transport.close().await {
            warn!(peer = self.label(), error = %e, "transport close failed");
        }
        info!(peer = self.label(), session = %session.id(), "session closed");
        self.emit(SessionEvent::Closed);
    }

    async fn handle_offer(
        &self,
        session: &mut Session,
        offer: SessionDescription,
    ) -> Result<Option<SignalingMessage>> {
        if session.remote_state() != DescriptionState::None {
            return Err(NegotiationError::UnexpectedOffer(format!(
                "remote description already {:?}",
                session.remote_state()
            )));
        }
        if session.role() == Role::Offerer && session.local_state() == DescriptionState::Offered {
            if self.resolve_glare(session, &offer).await? {
                return Ok(None);
            }
        } else if session.local_state() != DescriptionState::None {
            return Err(NegotiationError::UnexpectedOffer(format!(
                "local description already {:?}",
                session.local_state()
            )));
        }

        let result = self
            .guarded(self.transport.set_remote_description(&offer))
            .await;
        self.settle(session, result)?;
        session.set_remote(DescriptionState::Offered, offer.clone())?;
        session.assign_role(Role::Answerer);
        dump_description("REMOTE", &offer);
        self.flush_pending(session).await?;

        let result = async {
            let answer = self.guarded(self.transport.create_answer()).await?;
            self.guarded(self.transport.set_local_description(&answer))
                .await?;
            Ok::<_, NegotiationError>(answer)
        }
        .await;
        let answer = self.settle(session, result)?;
        session.set_local(DescriptionState::Answered, answer.clone())?;
        dump_description("LOCAL", &answer);
        info!(peer = self.label(), session = %session.id(), "answer created");
        self.announce_connected(session);
        Ok(Some(SignalingMessage::description(&answer)))
    }

    /// `true`: локальный offer победил, входящий игнорируется.
    /// `false`: локальный offer отброшен, продолжаем как answerer.
    async fn resolve_glare(&self, session: &mut Session, remote: &SessionDescription) -> Result<bool> {
        let tie_breaker = self
            .config
            .tie_breaker
            .as_ref()
            .ok_or(NegotiationError::GlareUnresolved)?;
        let local = session
            .local_description()
            .ok_or_else(|| NegotiationError::InvalidState("offered without a description".into()))?;
        match tie_breaker.local_wins(local, remote) {
            None => Err(NegotiationError::GlareUnresolved),
            Some(true) => {
                info!(peer = self.label(), "glare: keeping local offer, ignoring remote offer");
                Ok(true)
            }
            Some(false) => {
                info!(peer = self.label(), "glare: discarding local offer, answering remote");
                let result = self
                    .guarded(self.transport.rollback_local_description())
                    .await;
                self.settle(session, result)?;
                session.discard_local_offer();
                Ok(false)
            }
        }
    }

    async fn handle_answer(&self, session: &mut Session, answer: SessionDescription) -> Result<()> {
        if session.role() != Role::Offerer
            || session.local_state() != DescriptionState::Offered
            || session.remote_state() != DescriptionState::None
        {
            return Err(NegotiationError::UnexpectedAnswer(format!(
                "role {:?}, local {:?}, remote {:?}",
                session.role(),
                session.local_state(),
                session.remote_state()
            )));
        }

        let result = self
            .guarded(self.transport.set_remote_description(&answer))
            .await;
        self.settle(session, result)?;
        session.set_remote(DescriptionState::Answered, answer.clone())?;
        dump_description("REMOTE", &answer);
        self.flush_pending(session).await?;
        self.announce_connected(session);
        Ok(())
    }

    async fn handle_candidate(&self, session: &mut Session, payload: &str) -> Result<()> {
        let candidate = parse_candidate(payload)?;
        dump_candidate("REMOTE", &candidate);
        if session.remote_state() == DescriptionState::None {
            session.buffer_candidate(candidate);
            return Ok(());
        }
        self.apply_candidate(&candidate).await
    }

    /// Применяет отложенные кандидаты в порядке прихода
    async fn flush_pending(&self, session: &mut Session) -> Result<()> {
        let candidates = session.take_pending();
        if !candidates.is_empty() {
            debug!(peer = self.label(), count = candidates.len(), "applying pending candidates");
        }
        for candidate in candidates {
            match self.apply_candidate(&candidate).await {
                Ok(()) => {}
                Err(NegotiationError::SessionClosed) => return Err(NegotiationError::SessionClosed),
                Err(e) => warn!(peer = self.label(), error = %e, "failed to apply pending candidate"),
            }
        }
        Ok(())
    }

    async fn apply_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.guarded(self.transport.add_ice_candidate(candidate))
            .await
            .map_err(|e| match e {
                NegotiationError::TransportFailure(msg) => NegotiationError::InvalidCandidate(msg),
                other => other,
            })
    }

    async fn lock_active(&self) -> Result<MutexGuard<'_, Session>> {
        let session = self.session.lock().await;
        if self.connection_state() == ConnectionState::Closed {
            return Err(NegotiationError::SessionClosed);
        }
        session.ensure_active()?;
        Ok(session)
    }

    /// Ждёт вызов транспорта, пока сессия не завершена
    async fn guarded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let mut state = self.state_tx.subscribe();
        let result = tokio::select! {
            biased;
            _ = state.wait_for(|st| st.is_terminal()) => None,
            res = fut => Some(res),
        };
        match result {
            Some(res) if !self.connection_state().is_terminal() => res,
            _ => {
                debug!(peer = self.label(), "session ended while transport call was outstanding, discarding result");
                Err(NegotiationError::SessionClosed)
            }
        }
    }

    /// Фатальные ошибки переводят сессию в `Failed`
    fn settle<T>(&self, session: &mut Session, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.fail(session, e.clone());
            }
        }
        result
    }

    fn fail(&self, session: &mut Session, err: NegotiationError) {
        if session.mark_failed() {
            warn!(peer = self.label(), reason = err.reason_code(), error = %err, "session failed");
            self.publish(session);
            self.emit(SessionEvent::Failed(err));
        }
    }

    fn announce_connected(&self, session: &Session) {
        if session.connection_state() == ConnectionState::Connected {
            info!(peer = self.label(), session = %session.id(), role = ?session.role(), "negotiation complete");
            self.publish(session);
            self.emit(SessionEvent::Connected);
        }
    }

    fn publish(&self, session: &Session) {
        let next = session.connection_state();
        self.state_tx.send_if_modified(|current| {
            // ранний Closed из close() не перезаписывается
            if *current == ConnectionState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
