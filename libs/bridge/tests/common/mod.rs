//! Shared fixtures for bridge integration tests

#![allow(dead_code)]

use actor_runtime::{Process, Runtime, Term};
use bridge_config::BridgeConfig;
use libp2p_bridge::{Libp2p, LoopbackLibrary};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub const TIMEOUT: Duration = Duration::from_secs(5);
pub const ECHO: &str = "/echo/1.0.0";

pub struct Fixture {
    pub library: LoopbackLibrary,
    pub runtime: Runtime,
    pub bridge: Libp2p,
}

pub fn fixture() -> Fixture {
    let library = LoopbackLibrary::new();
    let runtime = Runtime::new().unwrap();
    let bridge = Libp2p::new(Arc::new(library.clone()), runtime.clone(), BridgeConfig::default());
    Fixture {
        library,
        runtime,
        bridge,
    }
}

/// Run `body` as a runtime process and wait for its result
pub async fn in_process<T, F, Fut>(runtime: &Runtime, body: F) -> T
where
    F: FnOnce(Process) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    runtime.spawn(move |process| async move {
        tx.send(body(process).await).ok();
    });
    tokio::time::timeout(TIMEOUT, rx)
        .await
        .expect("process timed out")
        .expect("process ended without a result")
}

/// Host listening on `addr`, or on nothing
pub fn host(bridge: &Libp2p, addr: Option<&str>) -> Term {
    let options = match addr {
        Some(addr) => vec![bridge.listen_addr(&Term::binary(addr.to_string())).unwrap().to_term()],
        None => Vec::new(),
    };
    bridge.host_new(&Term::list(options)).unwrap().to_term()
}

/// Teach `dialer` where `server` listens
pub fn introduce(bridge: &Libp2p, dialer: &Term, server: &Term) -> Term {
    let peerstore = bridge.peerstore_of(dialer).unwrap().to_term();
    let id = bridge.host_id(server).unwrap().to_term();
    let addrs = bridge.host_addrs(server).unwrap().to_term();
    bridge
        .peerstore_add_addrs(&peerstore, &id, &addrs, &Term::Int(i64::MAX))
        .unwrap();
    id
}

/// Split a two-element tagged message
pub fn tagged(msg: &Term) -> (&str, &Term) {
    match msg.as_tuple() {
        Some([tag, payload]) => (tag.as_atom().expect("tag is an atom"), payload),
        _ => panic!("expected a tagged pair, got {msg}"),
    }
}

/// Poll `condition` until it holds or the timeout passes
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
