//! Тестовый двойник транспорта для тестов и примеров, не для звонков.
//!
//! Записывает вызовы и выдаёт предсказуемые описания вида `offer-<label>-<n>`.
//! Откат локального offer здесь всегда успешен; настоящий откат проверяется
//! на `WebRtcTransport`.
use crate::error::{NegotiationError, Result};
use crate::peer::connection::{Transport, TransportEvent, TransportEvents};
use crate::peer::media::MediaStream;
use crate::peer::state::TransportState;
use crate::peer::types::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    Rollback,
    AddCandidate(IceCandidate),
    AddStream(String),
    Close,
}

pub struct MockTransport {
    label: String,
    calls: Mutex<Vec<TransportCall>>,
    counter: AtomicU32,
    remote_set: AtomicBool,
    reject_remote: AtomicBool,
    gate: watch::Sender<bool>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockTransport {
    pub fn new(label: impl Into<String>) -> (Arc<Self>, TransportEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let (gate, _) = watch::channel(true);
        let transport = Self {
            label: label.into(),
            calls: Mutex::new(Vec::new()),
            counter: AtomicU32::new(0),
            remote_set: AtomicBool::new(false),
            reject_remote: AtomicBool::new(false),
            gate,
            events,
        };
        (Arc::new(transport), rx)
    }

    pub async fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().await.clone()
    }

    /// Кандидаты в порядке применения
    pub async fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                TransportCall::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// Создание описаний зависает до `release_descriptions`
    pub fn hold_descriptions(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_descriptions(&self) {
        self.gate.send_replace(true);
    }

    /// Следующие `set_remote_description` завершаются ошибкой транспорта
    pub fn reject_remote_descriptions(&self) {
        self.reject_remote.store(true, Ordering::SeqCst);
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn discover_candidate(&self, candidate: IceCandidate) {
        self.emit(TransportEvent::LocalCandidate(candidate));
    }

    pub fn report_state(&self, state: TransportState) {
        self.emit(TransportEvent::ConnectionStateChanged(state));
    }

    async fn record(&self, call: TransportCall) {
        self.calls.lock().await.push(call);
    }

    async fn wait_gate(&self) {
        let mut open = self.gate.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }

    fn next_sdp(&self, kind: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{kind}-{}-{n}", self.label)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(TransportCall::CreateOffer).await;
        self.wait_gate().await;
        Ok(SessionDescription::offer(self.next_sdp("offer")))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(TransportCall::CreateAnswer).await;
        self.wait_gate().await;
        Ok(SessionDescription::answer(self.next_sdp("answer")))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        self.record(TransportCall::SetLocal(desc.clone())).await;
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        self.record(TransportCall::SetRemote(desc.clone())).await;
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(NegotiationError::TransportFailure(
                "remote description rejected".into(),
            ));
        }
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback_local_description(&self) -> Result<()> {
        self.record(TransportCall::Rollback).await;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.record(TransportCall::AddCandidate(candidate.clone()))
            .await;
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(NegotiationError::InvalidCandidate(
                "candidate applied before remote description".into(),
            ));
        }
        Ok(())
    }

    async fn add_local_stream(&self, stream: &MediaStream) -> Result<()> {
        self.record(TransportCall::AddStream(stream.id.clone())).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(TransportCall::Close).await;
        Ok(())
    }
}
