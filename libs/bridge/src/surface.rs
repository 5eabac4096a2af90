//! Name-based call surface
//!
//! `invoke` is how a runtime process calls the bridge with plain terms.
//! Results use the tagged protocol:
//!
//! | outcome                          | reply                 |
//! |----------------------------------|-----------------------|
//! | success without a value          | `ok`                  |
//! | success with a handle or bytes   | `{ok, Value}`         |
//! | any failure                      | `{error, Message}`    |
//! | `iterator_next`                  | `true` / `false`      |
//! | `node_tcp_port`                  | port / `nil`          |
//! | `stream_protocol`, `message_data`| binary                |

use crate::error::{BridgeError, Result};
use crate::facade::Libp2p;
use crate::registry::Resource;
use actor_runtime::Term;
use tracing::debug;

/// Every callable name with its arity
pub const FUNCTIONS: &[(&str, usize)] = &[
    ("listen_addr", 1),
    ("host_new", 1),
    ("host_close", 1),
    ("host_set_stream_handler", 2),
    ("host_new_stream", 3),
    ("host_connect", 2),
    ("host_id", 1),
    ("host_addrs", 1),
    ("peerstore_of", 1),
    ("peerstore_add_addrs", 4),
    ("stream_read", 1),
    ("stream_write", 2),
    ("stream_close", 1),
    ("stream_close_write", 1),
    ("stream_protocol", 1),
    ("listen_discovery", 2),
    ("listener_close", 1),
    ("random_nodes", 1),
    ("iterator_next", 1),
    ("iterator_node", 1),
    ("node_tcp_port", 1),
    ("node_multiaddrs", 1),
    ("node_id", 1),
    ("new_pubsub", 1),
    ("pubsub_join", 2),
    ("topic_subscribe", 1),
    ("topic_publish", 2),
    ("subscription_cancel", 1),
    ("message_data", 1),
];

fn args<'a, const N: usize>(name: &str, args: &'a [Term]) -> Result<&'a [Term; N]> {
    <&[Term; N]>::try_from(args).map_err(|_| {
        BridgeError::invalid_argument(format!("{name} expects {N} arguments, got {}", args.len()))
    })
}

fn handle(resource: Result<Resource>) -> Result<Term> {
    resource.map(|resource| Term::ok_tuple(resource.to_term()))
}

fn done(result: Result<()>) -> Result<Term> {
    result.map(|()| Term::ok())
}

impl Libp2p {
    /// Call `name` with `args` and encode the outcome as a reply term
    pub async fn invoke(&self, name: &str, args: &[Term]) -> Term {
        match self.call(name, args).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(function = name, category = e.category(), error = %e, "Call failed");
                e.to_term()
            }
        }
    }

    async fn call(&self, name: &str, argv: &[Term]) -> Result<Term> {
        match name {
            "listen_addr" => {
                let [addr] = args::<1>(name, argv)?;
                handle(self.listen_addr(addr))
            }
            "host_new" => {
                let [options] = args::<1>(name, argv)?;
                handle(self.host_new(options))
            }
            "host_close" => {
                let [host] = args::<1>(name, argv)?;
                done(self.host_close(host))
            }
            "host_set_stream_handler" => {
                let [host, protocol] = args::<2>(name, argv)?;
                done(self.host_set_stream_handler(host, protocol))
            }
            "host_new_stream" => {
                let [host, peer, protocol] = args::<3>(name, argv)?;
                handle(self.host_new_stream(host, peer, protocol).await)
            }
            "host_connect" => {
                let [host, peer] = args::<2>(name, argv)?;
                done(self.host_connect(host, peer))
            }
            "host_id" => {
                let [host] = args::<1>(name, argv)?;
                handle(self.host_id(host))
            }
            "host_addrs" => {
                let [host] = args::<1>(name, argv)?;
                handle(self.host_addrs(host))
            }
            "peerstore_of" => {
                let [host] = args::<1>(name, argv)?;
                handle(self.peerstore_of(host))
            }
            "peerstore_add_addrs" => {
                let [peerstore, peer, addrs, ttl] = args::<4>(name, argv)?;
                done(self.peerstore_add_addrs(peerstore, peer, addrs, ttl))
            }
            "stream_read" => {
                let [stream] = args::<1>(name, argv)?;
                let data = self.stream_read(stream).await?;
                Ok(Term::ok_tuple(Term::Binary(data)))
            }
            "stream_write" => {
                let [stream, data] = args::<2>(name, argv)?;
                done(self.stream_write(stream, data).await)
            }
            "stream_close" => {
                let [stream] = args::<1>(name, argv)?;
                done(self.stream_close(stream))
            }
            "stream_close_write" => {
                let [stream] = args::<1>(name, argv)?;
                done(self.stream_close_write(stream))
            }
            "stream_protocol" => {
                let [stream] = args::<1>(name, argv)?;
                self.stream_protocol(stream).map(Term::Binary)
            }
            "listen_discovery" => {
                let [bind, bootnodes] = args::<2>(name, argv)?;
                handle(self.listen_discovery(bind, bootnodes))
            }
            "listener_close" => {
                let [listener] = args::<1>(name, argv)?;
                done(self.listener_close(listener))
            }
            "random_nodes" => {
                let [listener] = args::<1>(name, argv)?;
                handle(self.random_nodes(listener))
            }
            "iterator_next" => {
                let [iterator] = args::<1>(name, argv)?;
                self.iterator_next(iterator).await.map(Term::boolean)
            }
            "iterator_node" => {
                let [iterator] = args::<1>(name, argv)?;
                handle(self.iterator_node(iterator))
            }
            "node_tcp_port" => {
                let [node] = args::<1>(name, argv)?;
                let port = self.node_tcp_port(node)?;
                Ok(port.map_or_else(Term::nil, |port| Term::Int(i64::from(port))))
            }
            "node_multiaddrs" => {
                let [node] = args::<1>(name, argv)?;
                handle(self.node_multiaddrs(node))
            }
            "node_id" => {
                let [node] = args::<1>(name, argv)?;
                handle(self.node_id(node))
            }
            "new_pubsub" => {
                let [host] = args::<1>(name, argv)?;
                handle(self.new_pubsub(host))
            }
            "pubsub_join" => {
                let [pubsub, topic] = args::<2>(name, argv)?;
                handle(self.pubsub_join(pubsub, topic))
            }
            "topic_subscribe" => {
                let [topic] = args::<1>(name, argv)?;
                handle(self.topic_subscribe(topic))
            }
            "topic_publish" => {
                let [topic, data] = args::<2>(name, argv)?;
                done(self.topic_publish(topic, data))
            }
            "subscription_cancel" => {
                let [subscription] = args::<1>(name, argv)?;
                done(self.subscription_cancel(subscription))
            }
            "message_data" => {
                let [message] = args::<1>(name, argv)?;
                self.message_data(message).map(Term::Binary)
            }
            _ => Err(BridgeError::invalid_argument(format!("unknown function {name}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackLibrary;
    use actor_runtime::Runtime;
    use bridge_config::BridgeConfig;
    use std::sync::Arc;

    fn bridge() -> Libp2p {
        let runtime = Runtime::new().unwrap();
        Libp2p::new(Arc::new(LoopbackLibrary::new()), runtime, BridgeConfig::default())
    }

    fn error_message(reply: &Term) -> String {
        let elements = reply.as_tuple().unwrap();
        assert!(elements[0].is_atom("error"));
        String::from_utf8(elements[1].as_binary().unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let reply = bridge().invoke("host_teleport", &[]).await;
        assert_eq!(error_message(&reply), "invalid argument: unknown function host_teleport");
    }

    #[tokio::test]
    async fn test_wrong_arity() {
        let reply = bridge().invoke("listen_addr", &[]).await;
        assert_eq!(
            error_message(&reply),
            "invalid argument: listen_addr expects 1 arguments, got 0"
        );
    }

    #[tokio::test]
    async fn test_every_function_is_routed() {
        let bridge = bridge();
        for (name, arity) in FUNCTIONS {
            let argv = vec![Term::Int(0); *arity];
            let reply = bridge.invoke(name, &argv).await;
            let message = error_message(&reply);
            assert!(!message.contains("unknown function"), "{name} is not routed");
            assert!(!message.contains("expects"), "{name} has the wrong arity");
        }
    }

    #[tokio::test]
    async fn test_ok_value_reply() {
        let bridge = bridge();
        let reply = bridge.invoke("listen_addr", &[Term::binary("/ip4/127.0.0.1/tcp/4001")]).await;

        let elements = reply.as_tuple().unwrap();
        assert!(elements[0].is_atom("ok"));
        assert!(elements[1].as_resource().is_some());
    }
}
