use rtc_negotiator::peer::mock::{MockTransport, TransportCall};
use rtc_negotiator::peer::{
    ConnectionState, DescriptionState, IceCandidate, MediaConstraints, Role, SessionDescription,
    TrackMedia, TransportEvent, TransportState, WebRtcTransport,
};
use rtc_negotiator::{
    decode, encode, FixedPriority, MessageType, NegotiationError, Negotiator, NegotiatorConfig,
    SessionEvent, SessionEvents, SignalingMessage,
};
use std::sync::Arc;

fn candidate(port: u16) -> IceCandidate {
    IceCandidate::new(format!("candidate:1 1 udp 2122260223 10.0.0.1 {port} typ host"))
}

fn candidate_msg(port: u16) -> SignalingMessage {
    SignalingMessage::candidate(&candidate(port)).unwrap()
}

fn peer(label: &str, config: NegotiatorConfig) -> (Negotiator, Arc<MockTransport>, SessionEvents) {
    let (transport, _events) = MockTransport::new(label);
    let (negotiator, events) = Negotiator::new(transport.clone(), config.with_label(label));
    (negotiator, transport, events)
}

/// Сообщение проходит через кодек, как через настоящий ретранслятор
fn over_wire(msg: SignalingMessage) -> SignalingMessage {
    decode(&encode(&msg).unwrap()).unwrap()
}

fn drain(events: &mut SessionEvents) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = events.try_recv() {
        out.push(ev);
    }
    out
}

#[tokio::test]
async fn offer_answer_exchange_connects_both_sides() {
    let (a, _, mut a_events) = peer("a", NegotiatorConfig::new());
    let (b, _, mut b_events) = peer("b", NegotiatorConfig::new());

    let offer = a.start_as_offerer().await.unwrap();
    assert_eq!(
        encode(&offer).unwrap(),
        r#"{"type":"offer","payload":"offer-a-0"}"#
    );

    let answer = b.on_message(over_wire(offer)).await.unwrap().unwrap();
    assert_eq!(answer, SignalingMessage::answer("answer-b-0"));

    assert_eq!(a.on_message(over_wire(answer)).await.unwrap(), None);

    let sa = a.snapshot().await;
    assert_eq!(sa.role, Role::Offerer);
    assert_eq!((sa.local, sa.remote), (DescriptionState::Offered, DescriptionState::Answered));
    assert_eq!(sa.connection, ConnectionState::Connected);

    let sb = b.snapshot().await;
    assert_eq!(sb.role, Role::Answerer);
    assert_eq!((sb.remote, sb.local), (DescriptionState::Offered, DescriptionState::Answered));
    assert_eq!(sb.connection, ConnectionState::Connected);

    assert_eq!(a.connection_state(), ConnectionState::Connected);
    assert_eq!(drain(&mut a_events), vec![SessionEvent::Connected]);
    assert_eq!(drain(&mut b_events), vec![SessionEvent::Connected]);
}

#[tokio::test]
async fn candidates_before_offer_are_buffered_then_applied_in_order() {
    let (b, transport, _) = peer("b", NegotiatorConfig::new());

    for port in [5001, 5002, 5003] {
        assert_eq!(b.on_message(candidate_msg(port)).await.unwrap(), None);
    }
    assert_eq!(b.snapshot().await.pending_candidates, 3);
    assert!(transport.applied_candidates().await.is_empty());

    b.on_message(SignalingMessage::offer("offer-a-0"))
        .await
        .unwrap();
    assert_eq!(b.snapshot().await.pending_candidates, 0);

    let calls = transport.calls().await;
    assert_eq!(
        calls[..5],
        [
            TransportCall::SetRemote(SessionDescription::offer("offer-a-0")),
            TransportCall::AddCandidate(candidate(5001)),
            TransportCall::AddCandidate(candidate(5002)),
            TransportCall::AddCandidate(candidate(5003)),
            TransportCall::CreateAnswer,
        ]
    );
}

#[tokio::test]
async fn candidate_after_remote_description_is_applied_immediately() {
    let (a, transport, _) = peer("a", NegotiatorConfig::new());
    a.start_as_offerer().await.unwrap();

    a.on_message(candidate_msg(6000)).await.unwrap();
    assert_eq!(a.snapshot().await.pending_candidates, 1);

    a.on_message(SignalingMessage::answer("answer-b-0"))
        .await
        .unwrap();
    a.on_message(candidate_msg(6001)).await.unwrap();

    assert_eq!(
        transport.applied_candidates().await,
        vec![candidate(6000), candidate(6001)]
    );
    assert_eq!(a.snapshot().await.pending_candidates, 0);
}

#[tokio::test]
async fn duplicate_answer_is_rejected_without_state_change() {
    let (a, transport, _) = peer("a", NegotiatorConfig::new());
    a.start_as_offerer().await.unwrap();
    a.on_message(SignalingMessage::answer("answer-b-0"))
        .await
        .unwrap();
    let before = a.snapshot().await;
    let calls_before = transport.calls().await.len();

    let err = a
        .on_message(SignalingMessage::answer("answer-b-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::UnexpectedAnswer(_)));
    assert_eq!(a.snapshot().await, before);
    assert_eq!(transport.calls().await.len(), calls_before);
}

#[tokio::test]
async fn answer_without_offer_is_unexpected() {
    let (b, _, _) = peer("b", NegotiatorConfig::new());
    let err = b
        .on_message(SignalingMessage::answer("answer-x"))
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "unexpected_answer");
    assert_eq!(b.snapshot().await.connection, ConnectionState::Idle);
}

#[tokio::test]
async fn second_offer_after_answering_is_rejected() {
    let (b, _, _) = peer("b", NegotiatorConfig::new());
    b.on_message(SignalingMessage::offer("offer-a-0"))
        .await
        .unwrap();
    let err = b
        .on_message(SignalingMessage::offer("offer-a-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::UnexpectedOffer(_)));
    assert_eq!(b.snapshot().await.connection, ConnectionState::Connected);
}

#[tokio::test]
async fn starting_twice_is_invalid_state() {
    let (a, _, _) = peer("a", NegotiatorConfig::new());
    a.start_as_offerer().await.unwrap();
    let err = a.start_as_offerer().await.unwrap_err();
    assert!(matches!(err, NegotiationError::InvalidState(_)));
    assert_eq!(a.snapshot().await.local, DescriptionState::Offered);
}

#[tokio::test]
async fn answerer_cannot_start_as_offerer() {
    let (b, _, _) = peer("b", NegotiatorConfig::new());
    b.on_message(SignalingMessage::offer("offer-a-0"))
        .await
        .unwrap();
    assert!(b.start_as_offerer().await.is_err());
}

#[tokio::test]
async fn malformed_candidate_is_dropped_and_session_continues() {
    let (b, _, _) = peer("b", NegotiatorConfig::new());
    let bad = SignalingMessage {
        kind: MessageType::Candidate,
        payload: "not a candidate".into(),
    };
    let err = b.on_message(bad).await.unwrap_err();
    assert_eq!(err.reason_code(), "invalid_candidate");
    assert_eq!(b.snapshot().await.pending_candidates, 0);

    let answer = b
        .on_message(SignalingMessage::offer("offer-a-0"))
        .await
        .unwrap();
    assert!(answer.is_some());
}

#[tokio::test]
async fn glare_resolved_by_role_priority() {
    let (a, a_transport, _) = peer(
        "a",
        NegotiatorConfig::new().with_tie_breaker(Arc::new(FixedPriority::new(true))),
    );
    let (b, b_transport, _) = peer(
        "b",
        NegotiatorConfig::new().with_tie_breaker(Arc::new(FixedPriority::new(false))),
    );

    let offer_a = a.start_as_offerer().await.unwrap();
    let offer_b = b.start_as_offerer().await.unwrap();

    // A выигрывает и игнорирует offer B
    assert_eq!(a.on_message(offer_b).await.unwrap(), None);
    let sa = a.snapshot().await;
    assert_eq!((sa.role, sa.local, sa.remote), (Role::Offerer, DescriptionState::Offered, DescriptionState::None));

    // B отбрасывает свой offer и отвечает на offer A
    let answer = b.on_message(offer_a).await.unwrap().unwrap();
    assert_eq!(answer.kind, MessageType::Answer);
    let sb = b.snapshot().await;
    assert_eq!(sb.role, Role::Answerer);
    assert_eq!((sb.local, sb.remote), (DescriptionState::Answered, DescriptionState::Offered));

    let b_calls = b_transport.calls().await;
    let rollback = b_calls
        .iter()
        .position(|c| *c == TransportCall::Rollback)
        .unwrap();
    let set_remote = b_calls
        .iter()
        .position(|c| *c == TransportCall::SetRemote(SessionDescription::offer("offer-a-0")))
        .unwrap();
    assert!(rollback < set_remote);

    a.on_message(answer).await.unwrap();
    assert_eq!(a.snapshot().await.connection, ConnectionState::Connected);
    assert!(!a_transport.calls().await.contains(&TransportCall::Rollback));
}

#[tokio::test]
async fn glare_over_webrtc_transport_loser_answers() {
    let (a_transport, _a_transport_events) = WebRtcTransport::new(Vec::new()).await.unwrap();
    let (b_transport, _b_transport_events) = WebRtcTransport::new(Vec::new()).await.unwrap();
    let (a, _) = Negotiator::new(
        a_transport.clone(),
        NegotiatorConfig::new()
            .with_label("a")
            .with_tie_breaker(Arc::new(FixedPriority::new(true))),
    );
    let (b, mut b_events) = Negotiator::new(
        b_transport.clone(),
        NegotiatorConfig::new()
            .with_label("b")
            .with_tie_breaker(Arc::new(FixedPriority::new(false))),
    );

    let offer_a = a.start_as_offerer().await.unwrap();
    let offer_b = b.start_as_offerer().await.unwrap();

    assert_eq!(a.on_message(over_wire(offer_b)).await.unwrap(), None);

    let answer = b.on_message(over_wire(offer_a)).await.unwrap().unwrap();
    assert_eq!(answer.kind, MessageType::Answer);
    assert!(answer.payload.starts_with("v=0"));
    assert_eq!(b_transport.generation(), 1);
    let sb = b.snapshot().await;
    assert_eq!(sb.role, Role::Answerer);
    assert_eq!(sb.connection, ConnectionState::Connected);

    assert_eq!(a.on_message(over_wire(answer)).await.unwrap(), None);
    assert_eq!(a.connection_state(), ConnectionState::Connected);
    assert_eq!(a_transport.generation(), 0);
    assert_eq!(drain(&mut b_events), vec![SessionEvent::Connected]);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn glare_without_policy_fails_cleanly() {
    let (a, _, _) = peer("a", NegotiatorConfig::new());
    a.start_as_offerer().await.unwrap();
    let before = a.snapshot().await;

    let err = a
        .on_message(SignalingMessage::offer("offer-b-0"))
        .await
        .unwrap_err();
    assert_eq!(err, NegotiationError::GlareUnresolved);
    assert_eq!(a.snapshot().await, before);
}

#[tokio::test]
async fn glare_with_equal_peer_ids_is_unresolved() {
    let (a, _, _) = peer("a", NegotiatorConfig::new().with_peer_ids("x", "x"));
    a.start_as_offerer().await.unwrap();
    let err = a
        .on_message(SignalingMessage::offer("offer-b-0"))
        .await
        .unwrap_err();
    assert_eq!(err, NegotiationError::GlareUnresolved);
}

#[tokio::test]
async fn close_is_idempotent_and_terminal() {
    let (a, transport, mut events) = peer("a", NegotiatorConfig::new());
    a.start_as_offerer().await.unwrap();

    a.close().await;
    a.close().await;

    assert_eq!(a.connection_state(), ConnectionState::Closed);
    assert_eq!(drain(&mut events), vec![SessionEvent::Closed]);
    let closes = transport
        .calls()
        .await
        .into_iter()
        .filter(|c| *c == TransportCall::Close)
        .count();
    assert_eq!(closes, 1);

    let err = a
        .on_message(SignalingMessage::answer("answer-b-0"))
        .await
        .unwrap_err();
    assert_eq!(err, NegotiationError::SessionClosed);
    assert!(a.on_local_candidate_generated(candidate(1)).is_err());
}

#[tokio::test]
async fn close_discards_outstanding_description_request() {
    let (transport, _) = MockTransport::new("a");
    let (a, _) = Negotiator::new(transport.clone(), NegotiatorConfig::new());
    let a = Arc::new(a);
    transport.hold_descriptions();

    let pending = tokio::spawn({
        let a = a.clone();
        async move { a.start_as_offerer().await }
    });
    while !transport.calls().await.contains(&TransportCall::CreateOffer) {
        tokio::task::yield_now().await;
    }

    a.close().await;
    transport.release_descriptions();

    let result = pending.await.unwrap();
    assert_eq!(result.unwrap_err(), NegotiationError::SessionClosed);
    assert!(!transport
        .calls()
        .await
        .iter()
        .any(|c| matches!(c, TransportCall::SetLocal(_))));
    let snapshot = a.snapshot().await;
    assert_eq!(snapshot.role, Role::Unassigned);
    assert_eq!(snapshot.connection, ConnectionState::Closed);
}

#[tokio::test]
async fn transport_failure_fails_the_session() {
    let (a, _, mut events) = peer("a", NegotiatorConfig::new());
    a.start_as_offerer().await.unwrap();
    a.on_message(SignalingMessage::answer("answer-b-0"))
        .await
        .unwrap();

    a.on_transport_event(TransportEvent::ConnectionStateChanged(TransportState::Failed))
        .await
        .unwrap();

    assert_eq!(a.connection_state(), ConnectionState::Failed);
    let events = drain(&mut events);
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Failed(NegotiationError::TransportFailure(_)))
    ));
    assert!(a.start_as_offerer().await.is_err());
}

#[tokio::test]
async fn rejected_remote_description_is_fatal() {
    let (b, transport, _) = peer("b", NegotiatorConfig::new());
    transport.reject_remote_descriptions();
    let err = b
        .on_message(SignalingMessage::offer("offer-a-0"))
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "transport_failure");
    assert_eq!(b.connection_state(), ConnectionState::Failed);
}

#[tokio::test]
async fn unavailable_media_fails_the_session() {
    let (a, _, _) = peer("a", NegotiatorConfig::new());
    let err = a
        .acquire_local_media(
            &TrackMedia,
            MediaConstraints {
                audio: false,
                video: false,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "media_unavailable");
    assert_eq!(a.connection_state(), ConnectionState::Failed);
}

#[tokio::test]
async fn acquired_media_is_attached_to_transport() {
    let (a, transport, _) = peer("a", NegotiatorConfig::new());
    let stream = a
        .acquire_local_media(&TrackMedia, MediaConstraints::default())
        .await
        .unwrap();
    assert_eq!(stream.tracks.len(), 2);
    assert!(transport
        .calls()
        .await
        .contains(&TransportCall::AddStream(stream.id.clone())));
    assert_eq!(a.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn local_candidates_are_wrapped_for_sending() {
    let (a, _, _) = peer("a", NegotiatorConfig::new());
    let msg = a
        .on_transport_event(TransportEvent::LocalCandidate(candidate(7000)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.kind, MessageType::Candidate);
    let decoded = rtc_negotiator::peer::ice::parse_candidate(&msg.payload).unwrap();
    assert_eq!(decoded, candidate(7000));
}

#[tokio::test]
async fn wait_terminal_resolves_on_close() {
    let (a, _, _) = peer("a", NegotiatorConfig::new());
    let a = Arc::new(a);
    let waiter = tokio::spawn({
        let a = a.clone();
        async move { a.wait_terminal().await }
    });
    a.start_as_offerer().await.unwrap();
    a.close().await;
    assert_eq!(waiter.await.unwrap(), ConnectionState::Closed);
    assert_eq!(a.wait_terminal().await, ConnectionState::Closed);
}
