//! Callback Dispatcher Tests
//!
//! Events raised on foreign threads, delivered through the runtime.

mod common;

use actor_runtime::Term;
use bytes::Bytes;
use common::*;
use libp2p_bridge::{
    CallbackEvent, HandleType, ProcessTarget, RegistrationKind, RegistrationState, Resource,
};
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, oneshot};

#[tokio::test]
async fn test_events_arrive_in_raise_order() {
    const EVENTS: u64 = 200;
    let fx = fixture();
    let dispatcher = fx.bridge.dispatcher().clone();

    let (registration_tx, registration_rx) = oneshot::channel();
    let (result_tx, result_rx) = oneshot::channel();
    fx.runtime.spawn(move |mut process| async move {
        let registration = dispatcher.prepare(
            RegistrationKind::StreamHandler {
                host: 1,
                protocol: Bytes::from_static(b"/echo/1.0.0"),
            },
            ProcessTarget::capture().unwrap(),
        );
        registration_tx.send(registration).ok();

        let mut streams = Vec::new();
        for _ in 0..EVENTS {
            let msg = process.recv_timeout(TIMEOUT).await.expect("event");
            let (tag, payload) = tagged(&msg);
            assert_eq!(tag, "request");
            streams.push(Resource::from_term(payload).unwrap());
        }
        result_tx.send(streams).ok();
    });

    let registration = registration_rx.await.unwrap();
    let raiser = std::thread::spawn(move || {
        (1..=EVENTS)
            .map(|h| registration.notify(CallbackEvent::InboundStream(1000 + h)))
            .all(|delivered| delivered)
    });
    let received = tokio::time::timeout(TIMEOUT, result_rx).await.unwrap().unwrap();
    assert!(raiser.join().unwrap());

    let handles: Vec<u64> = received.iter().map(Resource::raw).collect();
    let expected: Vec<u64> = (1..=EVENTS).map(|h| 1000 + h).collect();
    assert_eq!(handles, expected);
    assert!(received.iter().all(|s| s.kind() == HandleType::Stream));
}

#[tokio::test]
async fn test_dead_target_not_delivered() {
    let fx = fixture();
    let dispatcher = fx.bridge.dispatcher().clone();

    let registration = in_process(&fx.runtime, move |_process| async move {
        dispatcher.prepare(RegistrationKind::Subscription, ProcessTarget::capture().unwrap())
    })
    .await;
    let pid = registration.target().pid();
    assert!(eventually(|| !fx.runtime.is_alive(&pid)).await);

    let library = fx.library.clone();
    let delivered = std::thread::spawn(move || {
        let delivered = registration.notify(CallbackEvent::SubscriptionMessage(55));
        (delivered, registration.state())
    })
    .join()
    .unwrap();

    assert_eq!(delivered, (false, RegistrationState::ProcessGone));
    assert_eq!(library.release_count(55), 1);
    assert_eq!(fx.runtime.metrics().snapshot().messages_delivered, 0);
    assert_eq!(fx.bridge.dispatcher().metrics().undeliverable.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_inbound_streams_through_loopback_are_ordered() {
    const STREAMS: usize = 20;
    let fx = fixture();
    let server_bridge = fx.bridge.clone();

    let (ready_tx, ready_rx) = oneshot::channel();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    fx.runtime.spawn(move |mut process| async move {
        let bridge = server_bridge;
        let server = host(&bridge, Some("/ip4/127.0.0.1/tcp/7001"));
        bridge.host_set_stream_handler(&server, &Term::binary(ECHO)).unwrap();
        ready_tx.send(server.clone()).ok();

        for _ in 0..STREAMS {
            let msg = process.recv_timeout(TIMEOUT).await.expect("inbound stream");
            let (tag, stream) = tagged(&msg);
            assert_eq!(tag, "request");
            let first = bridge.stream_read(stream).await.unwrap();
            done_tx.send((Resource::from_term(stream).unwrap().raw(), first)).ok();
        }
        drop(server);
    });

    let server = ready_rx.await.unwrap();
    let client = host(&fx.bridge, None);
    let server_id = introduce(&fx.bridge, &client, &server);

    let mut opened = Vec::new();
    for i in 0..STREAMS {
        let stream = fx
            .bridge
            .host_new_stream(&client, &server_id, &Term::binary(ECHO))
            .await
            .unwrap()
            .to_term();
        fx.bridge
            .stream_write(&stream, &Term::binary(i.to_string()))
            .await
            .unwrap();
        opened.push(stream);
    }

    let mut seen = std::collections::HashSet::new();
    for i in 0..STREAMS {
        let (handle, first) = tokio::time::timeout(TIMEOUT, done_rx.recv()).await.unwrap().unwrap();
        assert!(seen.insert(handle), "stream handle {handle} delivered twice");
        assert_eq!(first.as_ref(), i.to_string().as_bytes());
    }
}
