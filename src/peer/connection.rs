use crate::error::{NegotiationError, Result};
use crate::logger::dump_candidate;
use crate::peer::media::MediaStream;
use crate::peer::state::TransportState;
use crate::peer::types::{IceCandidate, ServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Метка data channel; канал согласуется заранее, поэтому есть у обеих сторон
pub const DATA_CHANNEL_LABEL: &str = "rtc-negotiator-data";
const DATA_CHANNEL_ID: u16 = 0;

/// События, которые транспорт отдаёт автомату согласования
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(String),
    ConnectionStateChanged(TransportState),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Внешний peer connection, от которого зависит автомат согласования
#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()>;
    /// Отбрасывает неподтверждённый локальный offer (проигрыш в glare)
    async fn rollback_local_description(&self) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Транспорт поверх `RTCPeerConnection` (trickle ICE).
///
/// webrtc-rs не умеет откатывать локальный offer, поэтому при откате
/// peer connection пересоздаётся. События старого соединения отбрасываются
/// по номеру поколения.
pub struct WebRtcTransport {
    servers: Vec<ServerConfig>,
    events: mpsc::UnboundedSender<TransportEvent>,
    generation: Arc<AtomicU64>,
    link: RwLock<PeerLink>,
    tracks: Mutex<Vec<Arc<TrackLocalStaticSample>>>,
}

struct PeerLink {
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
}

impl WebRtcTransport {
    pub async fn new(servers: Vec<ServerConfig>) -> Result<(Arc<Self>, TransportEvents)> {
        validate_ice_servers(&servers)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));
        let link = new_peer(&servers, &tx, &generation, 0).await?;

        let transport = Self {
            servers,
            events: tx,
            generation,
            link: RwLock::new(link),
            tracks: Mutex::new(Vec::new()),
        };
        Ok((Arc::new(transport), rx))
    }

    pub async fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.link.read().await.pc)
    }

    pub async fn data_channel(&self) -> Arc<RTCDataChannel> {
        Arc::clone(&self.link.read().await.data_channel)
    }

    /// Номер текущего peer connection; растёт при каждом пересоздании
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Создаёт peer connection и подписывает его на события текущего поколения
async fn new_peer(
    servers: &[ServerConfig],
    tx: &mpsc::UnboundedSender<TransportEvent>,
    generation: &Arc<AtomicU64>,
    current: u64,
) -> Result<PeerLink> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media)?;
    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(servers.to_vec())).await?);

    let cand_tx = tx.clone();
    let live = Arc::clone(generation);
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let tx = cand_tx.clone();
        let stale = live.load(Ordering::SeqCst) != current;
        Box::pin(async move {
            if stale {
                return;
            }
            let Some(c) = cand else {
                debug!("ICE candidate gathering completed");
                return;
            };
            match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate::from_init(init);
                    dump_candidate("LOCAL", &candidate);
                    let _ = tx.send(TransportEvent::LocalCandidate(candidate));
                }
                Err(e) => warn!(error = %e, "failed to serialize local candidate"),
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        debug!(?state, generation = current, "ICE gathering state changed");
        Box::pin(async {})
    }));

    let state_tx = tx.clone();
    let live = Arc::clone(generation);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        if live.load(Ordering::SeqCst) == current {
            info!(state = ?st, "peer connection state changed");
            let _ = state_tx.send(TransportEvent::ConnectionStateChanged(st.into()));
        } else {
            debug!(state = ?st, generation = current, "state change from discarded peer connection");
        }
        Box::pin(async {})
    }));

    let track_tx = tx.clone();
    let live = Arc::clone(generation);
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            if live.load(Ordering::SeqCst) == current {
                let id = track.id();
                debug!(track = %id, kind = ?track.kind(), "remote track");
                let _ = track_tx.send(TransportEvent::RemoteTrack(id));
            }
            Box::pin(async {})
        },
    ));

    let data_channel = pc
        .create_data_channel(
            DATA_CHANNEL_LABEL,
            Some(RTCDataChannelInit {
                negotiated: Some(DATA_CHANNEL_ID),
                ..Default::default()
            }),
        )
        .await?;

    Ok(PeerLink { pc, data_channel })
}

async fn attach_track(pc: &RTCPeerConnection, track: &Arc<TrackLocalStaticSample>) -> Result<()> {
    let sender = pc
        .add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
        .await?;
    // RTCP нужно вычитывать, иначе interceptors не работают
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });
    Ok(())
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection().await.create_offer(None).await?;
        SessionDescription::from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection().await.create_answer(None).await?;
        SessionDescription::from_rtc(&answer)
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        self.peer_connection()
            .await
            .set_local_description(desc.to_rtc()?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        self.peer_connection()
            .await
            .set_remote_description(desc.to_rtc()?)
            .await?;
        Ok(())
    }

    /// Пересоздаёт peer connection: новый без локального offer, с теми же
    /// обработчиками, data channel и локальными дорожками
    async fn rollback_local_description(&self) -> Result<()> {
        let mut link = self.link.write().await;
        if link.pc.signaling_state() == RTCSignalingState::Stable {
            return Ok(());
        }
        let current = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let fresh = new_peer(&self.servers, &self.events, &self.generation, current).await?;
        for track in self.tracks.lock().await.iter() {
            attach_track(&fresh.pc, track).await?;
        }
        let stale = std::mem::replace(&mut *link, fresh);
        drop(link);

        if let Err(e) = stale.pc.close().await {
            warn!(error = %e, "failed to close discarded peer connection");
        }
        info!(generation = current, "local offer discarded, peer connection recreated");
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.peer_connection()
            .await
            .add_ice_candidate(candidate.to_init())
            .await
            .map_err(|e| NegotiationError::InvalidCandidate(e.to_string()))
    }

    async fn add_local_stream(&self, stream: &MediaStream) -> Result<()> {
        let link = self.link.read().await;
        let mut tracks = self.tracks.lock().await;
        for track in &stream.tracks {
            attach_track(&link.pc, track).await?;
            tracks.push(Arc::clone(track));
        }
        debug!(stream = %stream.id, tracks = stream.tracks.len(), "local stream attached");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection().await.close().await?;
        Ok(())
    }
}

/// Создает конфигурацию для peer connection
pub fn rtc_config(servers: Vec<ServerConfig>) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: Vec<ServerConfig>) -> Vec<RTCIceServer> {
    servers
        .into_iter()
        .map(|config| {
            let url = add_ice_url_scheme(&config);

            RTCIceServer {
                urls: vec![url],
                username: config.username.unwrap_or_default(),
                credential: config.credential.unwrap_or_default(),
            }
        })
        .collect()
}

/// Проверка списка ICE серверов перед созданием peer connection
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<()> {
    for server in servers {
        if server.url.is_empty() {
            return Err(NegotiationError::InvalidState(format!(
                "ICE server {} has an empty url",
                server.id
            )));
        }
        if server.r#type != "stun" && server.r#type != "turn" {
            return Err(NegotiationError::InvalidState(format!(
                "ICE server {} has unknown type {:?}",
                server.id, server.r#type
            )));
        }
        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(NegotiationError::InvalidState(format!(
                "TURN server {} requires username and credential",
                server.id
            )));
        }
    }
    Ok(())
}
