//! Local topic fan-out
//!
//! A single bus per loopback library stands in for the gossip mesh: a
//! publish reaches every live subscription on the topic, the publisher's own
//! included. Each subscription has a fetch thread feeding the dispatcher.

use super::network::HostState;
use super::table::{HandleTable, Object};
use crate::dispatch::{CallbackEvent, Registration};
use bytes::Bytes;
use crossbeam_channel::Sender;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::trace;

#[derive(Clone, Default)]
pub(crate) struct TopicBus {
    subscribers: Arc<DashMap<Bytes, Vec<Weak<SubscriptionState>>>>,
}

impl TopicBus {
    /// Copies of `data` handed to live subscriptions
    pub(crate) fn publish(&self, topic: &Bytes, data: &[u8]) -> usize {
        let Some(mut subscribers) = self.subscribers.get_mut(topic) else {
            return 0;
        };

        let data = Bytes::copy_from_slice(data);
        let mut delivered = 0;
        subscribers.retain(|weak| match weak.upgrade() {
            Some(subscription) => {
                if subscription.push(data.clone()) {
                    delivered += 1;
                }
                true
            }
            None => false,
        });
        delivered
    }
}

pub(crate) struct PubSubState {
    host: Arc<HostState>,
    joined: Mutex<HashSet<Bytes>>,
    bus: TopicBus,
}

impl PubSubState {
    pub(crate) fn new(host: Arc<HostState>, bus: TopicBus) -> Self {
        Self {
            host,
            joined: Mutex::new(HashSet::new()),
            bus,
        }
    }

    /// Join `name`; joining the same topic twice is an error
    pub(crate) fn join(&self, name: &[u8]) -> Result<TopicState, String> {
        if self.host.is_closed() {
            return Err("failed to join topic: host is closed".to_string());
        }
        let name = Bytes::copy_from_slice(name);
        if !self.joined.lock().insert(name.clone()) {
            return Err("failed to join topic: topic already exists".to_string());
        }
        Ok(TopicState {
            name,
            bus: self.bus.clone(),
        })
    }
}

pub(crate) struct TopicState {
    name: Bytes,
    bus: TopicBus,
}

impl TopicState {
    pub(crate) fn publish(&self, data: &[u8]) -> usize {
        let delivered = self.bus.publish(&self.name, data);
        trace!(topic = ?self.name, delivered, "Published message");
        delivered
    }

    /// Start a subscription whose messages and final cancellation go to
    /// `registration`
    pub(crate) fn subscribe(
        &self,
        registration: Arc<Registration>,
        table: Arc<HandleTable>,
    ) -> Result<Arc<SubscriptionState>, String> {
        let (tx, rx) = crossbeam_channel::unbounded::<Bytes>();
        let subscription = Arc::new(SubscriptionState {
            sender: Mutex::new(Some(tx)),
        });
        let weak = Arc::downgrade(&subscription);

        std::thread::Builder::new()
            .name("loopback-sub".to_string())
            .spawn(move || {
                for data in rx.iter() {
                    let handle = table.insert(Object::Message(data));
                    if !registration.notify(CallbackEvent::SubscriptionMessage(handle)) {
                        if let Some(subscription) = weak.upgrade() {
                            subscription.cancel();
                        }
                    }
                }
                registration.notify(CallbackEvent::SubscriptionCancelled);
            })
            .map_err(|e| format!("failed to subscribe: {e}"))?;

        self.bus
            .subscribers
            .entry(self.name.clone())
            .or_default()
            .push(Arc::downgrade(&subscription));
        Ok(subscription)
    }
}

pub(crate) struct SubscriptionState {
    sender: Mutex<Option<Sender<Bytes>>>,
}

impl SubscriptionState {
    fn push(&self, data: Bytes) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(data).is_ok(),
            None => false,
        }
    }

    /// Stop accepting messages; the fetch thread drains and then reports
    /// the cancellation
    pub(crate) fn cancel(&self) {
        self.sender.lock().take();
    }
}
