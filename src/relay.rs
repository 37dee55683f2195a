//! Ретранслятор в памяти и цикл, связывающий канал, транспорт и автомат согласования.
use crate::error::{NegotiationError, Result};
use crate::negotiator::Negotiator;
use crate::peer::connection::TransportEvents;
use crate::peer::state::ConnectionState;
use crate::signaling::{decode, encode, SignalingChannel, SignalingMessage};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

/// Один конец канала в памяти; сообщения доставляются по порядку
pub struct LoopbackChannel {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    shutdown: watch::Sender<bool>,
}

impl LoopbackChannel {
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Mutex::new(Some(b_tx)),
                rx: Mutex::new(a_rx),
                shutdown: watch::channel(false).0,
            },
            Self {
                tx: Mutex::new(Some(a_tx)),
                rx: Mutex::new(b_rx),
                shutdown: watch::channel(false).0,
            },
        )
    }

    /// Обрыв связи в обе стороны: `recv` отдаёт `None`, `send` с любого конца падает
    pub async fn disconnect(&self) {
        self.tx.lock().await.take();
        self.shutdown.send_replace(true);
        // встречный канал тоже закрываем, иначе второй конец продолжит отправлять
        self.rx.lock().await.close();
    }
}

#[async_trait]
impl SignalingChannel for LoopbackChannel {
    async fn send(&self, text: String) -> Result<()> {
        let tx = self.tx.lock().await;
        let tx = tx
            .as_ref()
            .ok_or_else(|| NegotiationError::TransportFailure("relay disconnected".into()))?;
        tx.send(text)
            .map_err(|_| NegotiationError::TransportFailure("relay disconnected".into()))
    }

    async fn recv(&self) -> Option<String> {
        let mut shutdown = self.shutdown.subscribe();
        let mut rx = self.rx.lock().await;
        let msg = tokio::select! {
            biased;
            _ = shutdown.wait_for(|down| *down) => None,
            msg = rx.recv() => msg,
        };
        msg
    }
}

async fn send_message(channel: &dyn SignalingChannel, msg: &SignalingMessage) -> Result<()> {
    channel.send(encode(msg)?).await
}

/// Обрабатывает один текст из ретранслятора; битые сообщения отбрасываются
async fn dispatch_inbound(
    negotiator: &Negotiator,
    channel: &dyn SignalingChannel,
    text: &str,
) -> Result<()> {
    let msg = match decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(peer = negotiator.label(), error = %e, "dropping malformed signaling message");
            return Ok(());
        }
    };
    match negotiator.on_message(msg).await {
        Ok(Some(reply)) => send_message(channel, &reply).await,
        Ok(None) => Ok(()),
        Err(NegotiationError::SessionClosed) => Err(NegotiationError::SessionClosed),
        // причина уже залогирована автоматом; сессия остаётся в прежнем состоянии
        Err(_) => Ok(()),
    }
}

/// Единственный поток управления сессии: входящие сообщения, события транспорта,
/// отправка ответов и кандидатов. Завершается, когда сессия становится `Failed` или `Closed`.
pub async fn drive_session(
    negotiator: Arc<Negotiator>,
    channel: Arc<dyn SignalingChannel>,
    mut transport_events: TransportEvents,
) -> ConnectionState {
    let mut events_open = true;
    loop {
        if negotiator.connection_state().is_terminal() {
            break;
        }
        tokio::select! {
            st = negotiator.wait_terminal() => {
                debug!(peer = negotiator.label(), state = %st, "session reached terminal state");
                break;
            }
            inbound = channel.recv() => match inbound {
                Some(text) => {
                    if let Err(e) = dispatch_inbound(&negotiator, channel.as_ref(), &text).await {
                        debug!(peer = negotiator.label(), error = %e, "stopping driver");
                        if e.is_fatal() {
                            negotiator.on_relay_disconnected().await;
                        }
                        break;
                    }
                }
                None => {
                    info!(peer = negotiator.label(), "signaling relay closed");
                    negotiator.on_relay_disconnected().await;
                    break;
                }
            },
            event = transport_events.recv(), if events_open => match event {
                Some(event) => match negotiator.on_transport_event(event).await {
                    Ok(Some(msg)) => {
                        if let Err(e) = send_message(channel.as_ref(), &msg).await {
                            warn!(peer = negotiator.label(), error = %e, "failed to relay local candidate");
                            if e.is_fatal() {
                                negotiator.on_relay_disconnected().await;
                                break;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!(peer = negotiator.label(), error = %e, "transport event ignored"),
                },
                None => events_open = false,
            },
        }
    }
    negotiator.connection_state()
}
