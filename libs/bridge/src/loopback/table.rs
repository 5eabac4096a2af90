//! Handle table
//!
//! Monotonic ids mapped to the objects they stand for, like a cgo handle
//! table: the id is the only thing that crosses the boundary.

use super::discovery::{DiscoveryListener, NodeIterator, NodeRecord};
use super::network::{HostState, PeerId};
use super::pubsub::{PubSubState, SubscriptionState, TopicState};
use super::stream::StreamEnd;
use crate::handle::RawHandle;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub(crate) enum Object {
    /// A listen address option
    ListenAddr(String),
    Host(Arc<HostState>),
    Peerstore(Arc<HostState>),
    PeerId(PeerId),
    MultiaddrList(Vec<String>),
    Stream(Arc<StreamEnd>),
    Listener(Arc<DiscoveryListener>),
    Iterator(Arc<NodeIterator>),
    Node(NodeRecord),
    PubSub(Arc<PubSubState>),
    Topic(Arc<TopicState>),
    Subscription(Arc<SubscriptionState>),
    Message(Bytes),
}

impl Object {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Object::ListenAddr(_) => "option",
            Object::Host(_) => "host",
            Object::Peerstore(_) => "peerstore",
            Object::PeerId(_) => "peer id",
            Object::MultiaddrList(_) => "multiaddr list",
            Object::Stream(_) => "stream",
            Object::Listener(_) => "listener",
            Object::Iterator(_) => "iterator",
            Object::Node(_) => "node",
            Object::PubSub(_) => "pubsub",
            Object::Topic(_) => "topic",
            Object::Subscription(_) => "subscription",
            Object::Message(_) => "message",
        }
    }
}

pub(crate) struct HandleTable {
    next: AtomicU64,
    objects: DashMap<RawHandle, Object>,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            objects: DashMap::new(),
        }
    }

    pub(crate) fn insert(&self, object: Object) -> RawHandle {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(handle, object);
        handle
    }

    pub(crate) fn get(&self, handle: RawHandle) -> Option<Object> {
        self.objects.get(&handle).map(|entry| entry.value().clone())
    }

    pub(crate) fn remove(&self, handle: RawHandle) -> Option<Object> {
        self.objects.remove(&handle).map(|(_, object)| object)
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }
}
