use super::{binary_arg, failure, Libp2p};
use crate::error::{BridgeError, Result};
use crate::handle::{HandleType, FAILED};
use crate::registry::Resource;
use actor_runtime::Term;
use bytes::Bytes;
use tracing::info;

impl Libp2p {
    /// Start a discovery listener on `bind` (`ip:port`), seeded with at most
    /// `max_list_len` bootnodes
    pub fn listen_discovery(&self, bind: &Term, bootnodes: &Term) -> Result<Resource> {
        let bind = binary_arg(bind, "bind address")?;
        let bootnodes = self
            .list_arg(bootnodes, "bootnodes")?
            .iter()
            .map(|node| binary_arg(node, "bootnode"))
            .collect::<Result<Vec<Bytes>>>()?;
        let views: Vec<&[u8]> = bootnodes.iter().map(Bytes::as_ref).collect();

        let listener = self.minted(
            "listen_discovery",
            HandleType::Listener,
            self.library.listen_v5(&bind, &views),
        )?;
        info!(listener = listener.raw(), bootnodes = views.len(), "Discovery listener started");
        Ok(listener)
    }

    /// Stop the listener. Idempotent; its iterators report no more nodes.
    pub fn listener_close(&self, listener: &Term) -> Result<()> {
        let listener = self.registry.lookup(listener, HandleType::Listener)?;
        if listener.mark_closed() {
            self.library.listener_close(listener.raw());
        }
        Ok(())
    }

    pub fn random_nodes(&self, listener: &Term) -> Result<Resource> {
        let listener = self.resource(listener, HandleType::Listener)?;
        self.minted(
            "random_nodes",
            HandleType::Iterator,
            self.library.listener_random_nodes(listener.raw()),
        )
    }

    /// Advance the iterator; false once discovery is exhausted. Blocks on
    /// the pool.
    pub async fn iterator_next(&self, iterator: &Term) -> Result<bool> {
        let iterator = self.resource(iterator, HandleType::Iterator)?;
        let library = self.library.clone();

        self.pool
            .run("iterator_next", move || Ok(library.iterator_next(iterator.raw())))
            .await
    }

    /// Node the iterator currently points at
    pub fn iterator_node(&self, iterator: &Term) -> Result<Resource> {
        let iterator = self.resource(iterator, HandleType::Iterator)?;
        self.minted("iterator_node", HandleType::Node, self.library.iterator_node(iterator.raw()))
    }

    /// TCP port the node advertises, if any
    pub fn node_tcp_port(&self, node: &Term) -> Result<Option<u16>> {
        let node = self.resource(node, HandleType::Node)?;
        match self.library.node_tcp(node.raw()) {
            FAILED => Err(failure(self.library.as_ref(), "node_tcp_port", "failed to get port")),
            0 => Ok(None),
            port => u16::try_from(port)
                .map(Some)
                .map_err(|_| BridgeError::foreign_call("node_tcp_port", format!("port {port} out of range"))),
        }
    }

    pub fn node_multiaddrs(&self, node: &Term) -> Result<Resource> {
        let node = self.resource(node, HandleType::Node)?;
        self.minted(
            "node_multiaddrs",
            HandleType::MultiaddrList,
            self.library.node_multiaddr(node.raw()),
        )
    }

    pub fn node_id(&self, node: &Term) -> Result<Resource> {
        let node = self.resource(node, HandleType::Node)?;
        self.minted("node_id", HandleType::PeerId, self.library.node_id(node.raw()))
    }
}
