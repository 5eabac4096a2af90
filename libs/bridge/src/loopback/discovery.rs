//! Node discovery
//!
//! Listeners bind a socket address and remember their bootnodes. An
//! iterator crawls the bootnode graph breadth-first from its listener,
//! yielding every live listener it reaches once.

use super::network::PeerId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A discovered node's record
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeRecord {
    pub(crate) id: PeerId,
    pub(crate) ip: IpAddr,
    pub(crate) tcp: u16,
    pub(crate) udp: u16,
}

impl NodeRecord {
    /// Dialable address: TCP if advertised, else QUIC over UDP
    pub(crate) fn multiaddr(&self) -> Option<String> {
        let proto = match self.ip {
            IpAddr::V4(_) => "ip4",
            IpAddr::V6(_) => "ip6",
        };
        if self.tcp != 0 {
            Some(format!("/{proto}/{}/tcp/{}", self.ip, self.tcp))
        } else if self.udp != 0 {
            Some(format!("/{proto}/{}/udp/{}/quic", self.ip, self.udp))
        } else {
            None
        }
    }
}

pub(crate) struct DiscoveryListener {
    node: NodeRecord,
    bind: SocketAddr,
    bootnodes: Vec<SocketAddr>,
    closed: AtomicBool,
}

impl DiscoveryListener {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Clone, Default)]
pub(crate) struct DiscoveryTable {
    listeners: Arc<DashMap<SocketAddr, Arc<DiscoveryListener>>>,
}

fn parse_addr(raw: &[u8]) -> Option<SocketAddr> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

impl DiscoveryTable {
    pub(crate) fn listen(&self, bind: &[u8], bootnodes: &[&[u8]]) -> Result<Arc<DiscoveryListener>, String> {
        let bind_addr = parse_addr(bind).ok_or_else(|| "failed to parse bind address".to_string())?;
        let bootnodes = bootnodes
            .iter()
            .map(|raw| parse_addr(raw).ok_or_else(|| format!("invalid bootnode {}", String::from_utf8_lossy(raw))))
            .collect::<Result<Vec<_>, _>>()?;

        if self.listeners.contains_key(&bind_addr) {
            return Err(format!("failed to listen on {bind_addr}: address already in use"));
        }

        let listener = Arc::new(DiscoveryListener {
            node: NodeRecord {
                id: PeerId::random(),
                ip: bind_addr.ip(),
                tcp: bind_addr.port(),
                udp: bind_addr.port(),
            },
            bind: bind_addr,
            bootnodes,
            closed: AtomicBool::new(false),
        });
        self.listeners.insert(bind_addr, Arc::clone(&listener));
        Ok(listener)
    }

    pub(crate) fn close(&self, listener: &Arc<DiscoveryListener>) {
        if !listener.closed.swap(true, Ordering::AcqRel) {
            self.listeners
                .remove_if(&listener.bind, |_, bound| Arc::ptr_eq(bound, listener));
        }
    }

    pub(crate) fn iterator(&self, listener: Arc<DiscoveryListener>) -> NodeIterator {
        let mut seen = HashSet::new();
        seen.insert(listener.bind);
        let queue = listener.bootnodes.iter().copied().collect();

        NodeIterator {
            table: self.clone(),
            origin: listener,
            crawl: Mutex::new(Crawl {
                queue,
                seen,
                current: None,
            }),
        }
    }
}

struct Crawl {
    queue: VecDeque<SocketAddr>,
    seen: HashSet<SocketAddr>,
    current: Option<NodeRecord>,
}

pub(crate) struct NodeIterator {
    table: DiscoveryTable,
    origin: Arc<DiscoveryListener>,
    crawl: Mutex<Crawl>,
}

impl NodeIterator {
    /// Advance to the next reachable node; false when exhausted or closed
    pub(crate) fn advance(&self) -> bool {
        let mut crawl = self.crawl.lock();
        crawl.current = None;
        if self.origin.is_closed() {
            return false;
        }

        while let Some(addr) = crawl.queue.pop_front() {
            if !crawl.seen.insert(addr) {
                continue;
            }
            let Some(listener) = self.table.listeners.get(&addr).map(|entry| Arc::clone(entry.value())) else {
                continue;
            };
            if listener.is_closed() {
                continue;
            }

            for next in &listener.bootnodes {
                if !crawl.seen.contains(next) {
                    crawl.queue.push_back(*next);
                }
            }
            crawl.current = Some(listener.node.clone());
            return true;
        }
        false
    }

    pub(crate) fn node(&self) -> Option<NodeRecord> {
        self.crawl.lock().current.clone()
    }
}
