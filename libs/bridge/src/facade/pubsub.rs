use super::{binary_arg, failure, sized_copy, Libp2p};
use crate::dispatch::RegistrationKind;
use crate::error::Result;
use crate::handle::{HandleType, FAILED, INVALID_HANDLE};
use crate::registry::Resource;
use crate::target::ProcessTarget;
use actor_runtime::Term;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

impl Libp2p {
    /// Gossip router on `host`
    pub fn new_pubsub(&self, host: &Term) -> Result<Resource> {
        let host = self.resource(host, HandleType::Host)?;
        let pubsub = self.minted("new_pubsub", HandleType::PubSub, self.library.new_gossipsub(host.raw()))?;
        info!(host = host.raw(), pubsub = pubsub.raw(), "PubSub created");
        Ok(pubsub)
    }

    pub fn pubsub_join(&self, pubsub: &Term, topic: &Term) -> Result<Resource> {
        let pubsub = self.resource(pubsub, HandleType::PubSub)?;
        let topic = binary_arg(topic, "topic")?;
        self.minted("pubsub_join", HandleType::Topic, self.library.pubsub_join(pubsub.raw(), &topic))
    }

    /// Subscribe the calling process. It receives `{sub, Message}` per
    /// message and exactly one `{sub, cancelled}` when the subscription ends.
    pub fn topic_subscribe(&self, topic: &Term) -> Result<Resource> {
        let topic = self.resource(topic, HandleType::Topic)?;
        let target = ProcessTarget::capture()?;

        let registration = self.dispatcher.prepare(RegistrationKind::Subscription, target);
        let handle = self.library.topic_subscribe(topic.raw(), Arc::clone(&registration));
        if handle == INVALID_HANDLE {
            self.dispatcher.abandon(&registration);
            return Err(failure(self.library.as_ref(), "topic_subscribe", "invalid handle returned"));
        }

        debug!(topic = topic.raw(), subscription = handle, registration = registration.id(), "Subscribed");
        self.registry
            .wrap_registered(HandleType::Subscription, handle, registration)
    }

    pub fn topic_publish(&self, topic: &Term, data: &Term) -> Result<()> {
        let topic = self.resource(topic, HandleType::Topic)?;
        let data = binary_arg(data, "data")?;

        if self.library.topic_publish(topic.raw(), &data) == FAILED {
            return Err(failure(self.library.as_ref(), "topic_publish", "failed to publish"));
        }
        Ok(())
    }

    /// End the subscription. Idempotent; a final `{sub, cancelled}` may
    /// still arrive afterwards.
    pub fn subscription_cancel(&self, subscription: &Term) -> Result<()> {
        let subscription = self.registry.lookup(subscription, HandleType::Subscription)?;
        if subscription.mark_closed() {
            if let Some(registration) = subscription.registration() {
                registration.cancel();
            }
            self.library.subscription_cancel(subscription.raw());
        }
        Ok(())
    }

    /// Payload of a received message
    pub fn message_data(&self, message: &Term) -> Result<Bytes> {
        let message = self.resource(message, HandleType::Message)?;
        let raw = message.raw();
        sized_copy(
            self.library.as_ref(),
            "message_data",
            self.library.message_data_len(raw),
            |buffer| self.library.message_data(raw, buffer),
        )
    }
}

