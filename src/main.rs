//! Два участника в одном процессе договариваются через ретранслятор в памяти.
use rtc_negotiator::config::default_ice_servers;
use rtc_negotiator::peer::{
    MediaConstraints, TrackMedia, TransportState, WebRtcTransport,
};
use rtc_negotiator::{
    drive_session, encode, logger, LoopbackChannel, NegotiationError, Negotiator,
    NegotiatorConfig, SessionEvent, SessionEvents, SignalingChannel,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

async fn wait_transport_connected(label: &str, events: &mut SessionEvents) -> bool {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::TransportStateChanged(TransportState::Connected) => return true,
            SessionEvent::Failed(e) => {
                warn!(peer = label, reason = e.reason_code(), "session failed");
                return false;
            }
            SessionEvent::Closed => return false,
            other => info!(peer = label, event = ?other, "session event"),
        }
    }
    false
}

#[tokio::main]
async fn main() -> Result<(), NegotiationError> {
    logger::init();

    let (alice_transport, alice_transport_events) =
        WebRtcTransport::new(default_ice_servers()).await?;
    let (bob_transport, bob_transport_events) =
        WebRtcTransport::new(default_ice_servers()).await?;

    let (alice, mut alice_events) = Negotiator::new(
        alice_transport,
        NegotiatorConfig::new()
            .with_label("alice")
            .with_peer_ids("alice", "bob"),
    );
    let (bob, mut bob_events) = Negotiator::new(
        bob_transport,
        NegotiatorConfig::new()
            .with_label("bob")
            .with_peer_ids("bob", "alice"),
    );
    let (alice, bob) = (Arc::new(alice), Arc::new(bob));

    alice
        .acquire_local_media(&TrackMedia, MediaConstraints::default())
        .await?;
    bob.acquire_local_media(&TrackMedia, MediaConstraints::default())
        .await?;

    let (alice_relay, bob_relay) = LoopbackChannel::pair();
    let alice_relay: Arc<dyn SignalingChannel> = Arc::new(alice_relay);
    let bob_relay: Arc<dyn SignalingChannel> = Arc::new(bob_relay);

    let offer = alice.start_as_offerer().await?;
    alice_relay.send(encode(&offer)?).await?;

    let alice_driver = tokio::spawn(drive_session(
        alice.clone(),
        alice_relay,
        alice_transport_events,
    ));
    let bob_driver = tokio::spawn(drive_session(bob.clone(), bob_relay, bob_transport_events));

    let connected = timeout(CONNECT_TIMEOUT, async {
        let a = wait_transport_connected("alice", &mut alice_events).await;
        let b = wait_transport_connected("bob", &mut bob_events).await;
        a && b
    })
    .await
    .unwrap_or(false);

    if connected {
        info!("peers connected");
    } else {
        warn!("peers did not connect within {:?}", CONNECT_TIMEOUT);
    }

    alice.close().await;
    bob.close().await;
    let _ = alice_driver.await;
    let _ = bob_driver.await;
    Ok(())
}
