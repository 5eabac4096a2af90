//! Loopback foreign library
//!
//! A complete in-memory [`ForeignLibrary`]: hosts, streams, discovery and
//! pubsub all live in this process, with background threads standing in for
//! the real library's goroutines. Used by the tests and the demo binary.
//!
//! Failures follow the sentinel convention and leave a description in a
//! per-thread slot read back through [`ForeignLibrary::last_error`].
//!
//! Releasing the handle of a host, stream, listener or subscription shuts
//! the object down; the other handle types are plain values.

mod discovery;
mod network;
mod pubsub;
mod stream;
mod table;

use self::discovery::DiscoveryTable;
use self::network::{Network, PeerId};
use self::pubsub::{PubSubState, TopicBus};
use self::table::{HandleTable, Object};
use crate::dispatch::{CallbackEvent, Registration};
use crate::foreign::ForeignLibrary;
use crate::handle::{RawHandle, FAILED, INVALID_HANDLE};
use bytes::Bytes;
use dashmap::DashMap;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_error(message: impl Into<String>) {
    let message = message.into();
    trace!(error = %message, "Loopback call failed");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Record `message` and return the handle sentinel
fn fail_handle(message: impl Into<String>) -> RawHandle {
    set_error(message);
    INVALID_HANDLE
}

/// Record `message` and return the count sentinel
fn fail_count(message: impl Into<String>) -> i64 {
    set_error(message);
    FAILED
}

/// Copy `data` into `buffer`, returning the count
fn copy_out(data: &[u8], buffer: &mut [u8]) -> i64 {
    let n = data.len().min(buffer.len());
    buffer[..n].copy_from_slice(&data[..n]);
    n as i64
}

struct Inner {
    table: Arc<HandleTable>,
    network: Network,
    discovery: DiscoveryTable,
    bus: TopicBus,
    /// Per-handle release counts; `None` when not kept
    releases: Option<DashMap<RawHandle, u64>>,
    total_releases: AtomicU64,
}

/// In-process stand-in for the networking library.
///
/// [`LoopbackLibrary::new`] keeps a per-handle release ledger for
/// [`LoopbackLibrary::release_count`]. It gains an entry for every handle
/// ever released, so long-running users should build the library with
/// [`LoopbackLibrary::without_release_ledger`].
#[derive(Clone)]
pub struct LoopbackLibrary {
    inner: Arc<Inner>,
}

impl Default for LoopbackLibrary {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed lookups; each yields `None` for unknown or differently typed handles
macro_rules! lookup {
    ($name:ident, $variant:ident, $out:ty) => {
        fn $name(&self, handle: RawHandle) -> Option<$out> {
            match self.inner.table.get(handle) {
                Some(Object::$variant(value)) => Some(value),
                _ => None,
            }
        }
    };
}

impl LoopbackLibrary {
    pub fn new() -> Self {
        Self::build(Some(DashMap::new()))
    }

    /// Library that only counts releases in total
    pub fn without_release_ledger() -> Self {
        Self::build(None)
    }

    fn build(releases: Option<DashMap<RawHandle, u64>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Arc::new(HandleTable::new()),
                network: Network::default(),
                discovery: DiscoveryTable::default(),
                bus: TopicBus::default(),
                releases,
                total_releases: AtomicU64::new(0),
            }),
        }
    }

    /// Times `handle` was released; always 0 without the ledger
    pub fn release_count(&self, handle: RawHandle) -> u64 {
        self.inner
            .releases
            .as_ref()
            .and_then(|releases| releases.get(&handle).map(|count| *count))
            .unwrap_or(0)
    }

    pub fn total_releases(&self) -> u64 {
        self.inner.total_releases.load(Ordering::Acquire)
    }

    /// Handles minted and not yet released
    pub fn live_handles(&self) -> usize {
        self.inner.table.len()
    }

    /// Number of options a host was created with
    pub fn host_option_count(&self, host: RawHandle) -> Option<usize> {
        self.host(host).map(|host| host.option_count())
    }

    fn mint(&self, object: Object) -> RawHandle {
        let kind = object.kind();
        let handle = self.inner.table.insert(object);
        trace!(handle, kind, "Minted loopback handle");
        handle
    }

    lookup!(listen_addr, ListenAddr, String);
    lookup!(host, Host, Arc<network::HostState>);
    lookup!(peerstore, Peerstore, Arc<network::HostState>);
    lookup!(peer_id, PeerId, PeerId);
    lookup!(multiaddrs, MultiaddrList, Vec<String>);
    lookup!(stream, Stream, Arc<stream::StreamEnd>);
    lookup!(listener, Listener, Arc<discovery::DiscoveryListener>);
    lookup!(iterator, Iterator, Arc<discovery::NodeIterator>);
    lookup!(node, Node, discovery::NodeRecord);
    lookup!(pubsub, PubSub, Arc<PubSubState>);
    lookup!(topic, Topic, Arc<pubsub::TopicState>);
    lookup!(subscription, Subscription, Arc<pubsub::SubscriptionState>);
    lookup!(message, Message, Bytes);

    fn shut_down(&self, object: &Object) {
        match object {
            Object::Host(host) => self.inner.network.shutdown(host),
            Object::Stream(end) => end.close(),
            Object::Listener(listener) => self.inner.discovery.close(listener),
            Object::Subscription(subscription) => subscription.cancel(),
            _ => {}
        }
    }
}

impl ForeignLibrary for LoopbackLibrary {
    fn release(&self, handle: RawHandle) {
        if let Some(releases) = &self.inner.releases {
            *releases.entry(handle).or_insert(0) += 1;
        }
        self.inner.total_releases.fetch_add(1, Ordering::AcqRel);

        if let Some(object) = self.inner.table.remove(handle) {
            self.shut_down(&object);
            trace!(handle, kind = object.kind(), "Released loopback handle");
        }
    }

    fn last_error(&self) -> Option<String> {
        LAST_ERROR.with(|slot| slot.borrow_mut().take())
    }

    fn listen_addr_strings(&self, addr: &[u8]) -> RawHandle {
        match std::str::from_utf8(addr) {
            Ok(text) if text.starts_with('/') && text.len() > 1 => {
                self.mint(Object::ListenAddr(text.to_string()))
            }
            _ => fail_handle(format!(
                "failed to parse multiaddr {:?}",
                String::from_utf8_lossy(addr)
            )),
        }
    }

    fn host_new(&self, options: &[RawHandle]) -> RawHandle {
        let mut addrs: Vec<String> = Vec::new();
        for &option in options {
            let Some(addr) = self.listen_addr(option) else {
                return fail_handle(format!("invalid option handle {option}"));
            };
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }

        match self.inner.network.start_host(addrs, options.len()) {
            Ok(host) => self.mint(Object::Host(host)),
            Err(message) => fail_handle(message),
        }
    }

    fn host_close(&self, host: RawHandle) {
        if let Some(host) = self.host(host) {
            self.inner.network.shutdown(&host);
        }
    }

    fn host_set_stream_handler(&self, host: RawHandle, protocol: &[u8], registration: Arc<Registration>) -> i64 {
        match self.host(host) {
            Some(host) if !host.is_closed() => {
                host.set_handler(Bytes::copy_from_slice(protocol), registration);
                0
            }
            Some(_) => fail_count("host is closed"),
            None => fail_count("invalid host"),
        }
    }

    fn host_new_stream(&self, host: RawHandle, peer: RawHandle, protocol: &[u8]) -> RawHandle {
        let (Some(host), Some(peer)) = (self.host(host), self.peer_id(peer)) else {
            return fail_handle("invalid host or peer id");
        };

        let remote = match self.inner.network.dial(&host, &peer) {
            Ok(remote) => remote,
            Err(message) => return fail_handle(message),
        };
        let Some(registration) = remote.handler(protocol) else {
            return fail_handle(format!(
                "failed to negotiate protocol {}: protocol not supported",
                String::from_utf8_lossy(protocol)
            ));
        };

        let (local, inbound) = stream::pair(Bytes::copy_from_slice(protocol));
        let inbound = self.mint(Object::Stream(inbound));
        if !remote.schedule(move || {
            registration.notify(CallbackEvent::InboundStream(inbound));
        }) {
            self.release(inbound);
            return fail_handle("failed to open stream: remote host is closed");
        }

        debug!(local = %host.id(), remote = %peer, "Opened loopback stream");
        self.mint(Object::Stream(local))
    }

    fn host_connect(&self, host: RawHandle, peer: RawHandle, registration: Arc<Registration>) -> i64 {
        let (Some(host), Some(peer)) = (self.host(host), self.peer_id(peer)) else {
            return fail_count("invalid host or peer id");
        };

        let outcome = self
            .inner
            .network
            .dial(&host, &peer)
            .map(|_| ());
        if host.schedule(move || {
            registration.notify(CallbackEvent::ConnectResult(outcome));
        }) {
            0
        } else {
            fail_count("host is closed")
        }
    }

    fn host_peerstore(&self, host: RawHandle) -> RawHandle {
        match self.host(host) {
            Some(host) => self.mint(Object::Peerstore(host)),
            None => fail_handle("invalid host"),
        }
    }

    fn host_id(&self, host: RawHandle) -> RawHandle {
        match self.host(host) {
            Some(host) => self.mint(Object::PeerId(host.id().clone())),
            None => fail_handle("invalid host"),
        }
    }

    fn host_addrs(&self, host: RawHandle) -> RawHandle {
        match self.host(host) {
            Some(host) => self.mint(Object::MultiaddrList(host.addrs().to_vec())),
            None => fail_handle("invalid host"),
        }
    }

    fn peerstore_add_addrs(&self, peerstore: RawHandle, peer: RawHandle, addrs: RawHandle, ttl: u64) -> i64 {
        let (Some(peerstore), Some(peer), Some(addrs)) =
            (self.peerstore(peerstore), self.peer_id(peer), self.multiaddrs(addrs))
        else {
            return fail_count("failed to add addresses: invalid peerstore arguments");
        };
        if peerstore.is_closed() {
            return fail_count("failed to add addresses: host is closed");
        }
        if ttl > 0 {
            peerstore.add_addrs(peer, &addrs);
        }
        0
    }

    fn stream_read(&self, stream: RawHandle, buffer: &mut [u8]) -> i64 {
        match self.stream(stream) {
            Some(end) => match end.read(buffer) {
                FAILED => fail_count("failed to read: stream is closed"),
                n => n,
            },
            None => fail_count("failed to read: invalid stream"),
        }
    }

    fn stream_write(&self, stream: RawHandle, data: &[u8]) -> i64 {
        match self.stream(stream) {
            Some(end) => match end.write(data) {
                FAILED => fail_count("failed to write: stream reset"),
                n => n,
            },
            None => fail_count("failed to write: invalid stream"),
        }
    }

    fn stream_close(&self, stream: RawHandle) {
        if let Some(end) = self.stream(stream) {
            end.close();
        }
    }

    fn stream_close_write(&self, stream: RawHandle) {
        if let Some(end) = self.stream(stream) {
            end.close_write();
        }
    }

    fn stream_protocol_len(&self, stream: RawHandle) -> i64 {
        match self.stream(stream) {
            Some(end) => end.protocol().len() as i64,
            None => fail_count("invalid stream"),
        }
    }

    fn stream_protocol(&self, stream: RawHandle, buffer: &mut [u8]) -> i64 {
        match self.stream(stream) {
            Some(end) => copy_out(end.protocol(), buffer),
            None => fail_count("invalid stream"),
        }
    }

    fn listen_v5(&self, bind: &[u8], bootnodes: &[&[u8]]) -> RawHandle {
        match self.inner.discovery.listen(bind, bootnodes) {
            Ok(listener) => self.mint(Object::Listener(listener)),
            Err(message) => fail_handle(message),
        }
    }

    fn listener_close(&self, listener: RawHandle) {
        if let Some(listener) = self.listener(listener) {
            self.inner.discovery.close(&listener);
        }
    }

    fn listener_random_nodes(&self, listener: RawHandle) -> RawHandle {
        match self.listener(listener) {
            Some(listener) => {
                let iterator = self.inner.discovery.iterator(listener);
                self.mint(Object::Iterator(Arc::new(iterator)))
            }
            None => fail_handle("invalid listener"),
        }
    }

    fn iterator_next(&self, iterator: RawHandle) -> bool {
        self.iterator(iterator).is_some_and(|iterator| iterator.advance())
    }

    fn iterator_node(&self, iterator: RawHandle) -> RawHandle {
        match self.iterator(iterator).and_then(|iterator| iterator.node()) {
            Some(node) => self.mint(Object::Node(node)),
            None => fail_handle("iterator has no current node"),
        }
    }

    fn node_tcp(&self, node: RawHandle) -> i64 {
        match self.node(node) {
            Some(node) => i64::from(node.tcp),
            None => fail_count("invalid node"),
        }
    }

    fn node_multiaddr(&self, node: RawHandle) -> RawHandle {
        match self.node(node).map(|node| node.multiaddr()) {
            Some(Some(addr)) => self.mint(Object::MultiaddrList(vec![addr])),
            Some(None) => fail_handle("node advertises no address"),
            None => fail_handle("invalid node"),
        }
    }

    fn node_id(&self, node: RawHandle) -> RawHandle {
        match self.node(node) {
            Some(node) => self.mint(Object::PeerId(node.id)),
            None => fail_handle("invalid node"),
        }
    }

    fn new_gossipsub(&self, host: RawHandle) -> RawHandle {
        match self.host(host) {
            Some(host) if !host.is_closed() => {
                let pubsub = PubSubState::new(host, self.inner.bus.clone());
                self.mint(Object::PubSub(Arc::new(pubsub)))
            }
            Some(_) => fail_handle("host is closed"),
            None => fail_handle("invalid host"),
        }
    }

    fn pubsub_join(&self, pubsub: RawHandle, topic: &[u8]) -> RawHandle {
        let Some(pubsub) = self.pubsub(pubsub) else {
            return fail_handle("invalid pubsub");
        };
        match pubsub.join(topic) {
            Ok(topic) => self.mint(Object::Topic(Arc::new(topic))),
            Err(message) => fail_handle(message),
        }
    }

    fn topic_subscribe(&self, topic: RawHandle, registration: Arc<Registration>) -> RawHandle {
        let Some(topic) = self.topic(topic) else {
            return fail_handle("invalid topic");
        };
        match topic.subscribe(registration, Arc::clone(&self.inner.table)) {
            Ok(subscription) => self.mint(Object::Subscription(subscription)),
            Err(message) => fail_handle(message),
        }
    }

    fn topic_publish(&self, topic: RawHandle, data: &[u8]) -> i64 {
        match self.topic(topic) {
            Some(topic) => {
                topic.publish(data);
                0
            }
            None => fail_count("failed to publish: invalid topic"),
        }
    }

    fn subscription_cancel(&self, subscription: RawHandle) {
        if let Some(subscription) = self.subscription(subscription) {
            subscription.cancel();
        }
    }

    fn message_data_len(&self, message: RawHandle) -> i64 {
        match self.message(message) {
            Some(data) => data.len() as i64,
            None => fail_count("invalid message"),
        }
    }

    fn message_data(&self, message: RawHandle, buffer: &mut [u8]) -> i64 {
        match self.message(message) {
            Some(data) => copy_out(&data, buffer),
            None => fail_count("invalid message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_set_last_error() {
        let library = LoopbackLibrary::new();

        assert_eq!(library.listen_addr_strings(b"not-a-multiaddr"), INVALID_HANDLE);
        assert!(library.last_error().unwrap().contains("failed to parse multiaddr"));
        assert_eq!(library.last_error(), None);

        assert_eq!(library.stream_read(99, &mut [0u8; 4]), FAILED);
        assert!(library.last_error().is_some());
    }

    #[test]
    fn test_release_counts_and_removes() {
        let library = LoopbackLibrary::new();
        let option = library.listen_addr_strings(b"/ip4/127.0.0.1/tcp/4001");
        assert_ne!(option, INVALID_HANDLE);
        assert_eq!(library.live_handles(), 1);

        library.release(option);
        assert_eq!(library.release_count(option), 1);
        assert_eq!(library.live_handles(), 0);
        assert_eq!(library.host_new(&[option]), INVALID_HANDLE);
    }

    #[test]
    fn test_wrong_handle_type_rejected() {
        let library = LoopbackLibrary::new();
        let option = library.listen_addr_strings(b"/ip4/127.0.0.1/tcp/4001");
        let host = library.host_new(&[option]);

        assert_eq!(library.stream_protocol_len(host), FAILED);
        assert_eq!(library.host_option_count(host), Some(1));
        assert_eq!(library.host_option_count(option), None);
        library.release(host);
    }

    #[test]
    fn test_release_host_unbinds_address() {
        let library = LoopbackLibrary::new();
        let option = library.listen_addr_strings(b"/ip4/127.0.0.1/tcp/4001");
        let first = library.host_new(&[option]);

        assert_eq!(library.host_new(&[option]), INVALID_HANDLE);
        assert!(library.last_error().unwrap().contains("address already in use"));

        library.release(first);
        let second = library.host_new(&[option]);
        assert_ne!(second, INVALID_HANDLE);
        library.release(second);
    }

    #[test]
    fn test_without_release_ledger_counts_totals_only() {
        let library = LoopbackLibrary::without_release_ledger();
        let option = library.listen_addr_strings(b"/ip4/127.0.0.1/tcp/4001");

        library.release(option);
        assert_eq!(library.total_releases(), 1);
        assert_eq!(library.release_count(option), 0);
        assert_eq!(library.live_handles(), 0);
    }

    #[test]
    fn test_peerstore_of_closed_host_fails() {
        let library = LoopbackLibrary::new();
        let host = library.host_new(&[]);
        let peerstore = library.host_peerstore(host);
        let peer = library.host_id(host);
        let addrs = library.host_addrs(host);

        assert_eq!(library.peerstore_add_addrs(peerstore, peer, addrs, 60), 0);
        library.host_close(host);
        assert_eq!(library.peerstore_add_addrs(peerstore, peer, addrs, 60), FAILED);
        assert!(library.last_error().unwrap().contains("host is closed"));
    }
}
