//! In-process hosts
//!
//! Hosts bind listen addresses on a shared [`Network`]; dialing resolves a
//! peer through the dialer's own peerstore and then through the bindings.
//! Every host owns one callback worker thread, so all events a host raises
//! reach the dispatcher in the order they were produced.

use crate::dispatch::Registration;
use bytes::Bytes;
use crossbeam_channel::Sender;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Textual peer identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PeerId(String);

impl PeerId {
    pub(crate) fn random() -> Self {
        PeerId(format!("12D3KooW{}", hex::encode(Uuid::new_v4().as_bytes())))
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct HostState {
    id: PeerId,
    addrs: Vec<String>,
    option_count: usize,
    peerstore: Mutex<HashMap<PeerId, Vec<String>>>,
    handlers: DashMap<Bytes, Arc<Registration>>,
    jobs: Mutex<Option<Sender<Job>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostState")
            .field("id", &self.id)
            .field("addrs", &self.addrs)
            .finish_non_exhaustive()
    }
}

impl HostState {
    pub(crate) fn id(&self) -> &PeerId {
        &self.id
    }

    pub(crate) fn addrs(&self) -> &[String] {
        &self.addrs
    }

    pub(crate) fn option_count(&self) -> usize {
        self.option_count
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn set_handler(&self, protocol: Bytes, registration: Arc<Registration>) {
        self.handlers.insert(protocol, registration);
    }

    pub(crate) fn handler(&self, protocol: &[u8]) -> Option<Arc<Registration>> {
        self.handlers.get(protocol).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn add_addrs(&self, peer: PeerId, addrs: &[String]) {
        let mut peerstore = self.peerstore.lock();
        let known = peerstore.entry(peer).or_default();
        for addr in addrs {
            if !known.contains(addr) {
                known.push(addr.clone());
            }
        }
    }

    pub(crate) fn peer_addrs(&self, peer: &PeerId) -> Vec<String> {
        self.peerstore.lock().get(peer).cloned().unwrap_or_default()
    }

    /// Queue `job` on this host's callback worker; false once shut down
    pub(crate) fn schedule(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match self.jobs.lock().as_ref() {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        }
    }
}

/// Address bindings shared by every host of one loopback library
#[derive(Default)]
pub(crate) struct Network {
    bindings: DashMap<String, Arc<HostState>>,
}

impl Network {
    /// Start a host bound to `addrs`
    pub(crate) fn start_host(&self, addrs: Vec<String>, option_count: usize) -> Result<Arc<HostState>, String> {
        for addr in &addrs {
            if self.bindings.contains_key(addr) {
                return Err(format!("failed to listen on {addr}: address already in use"));
            }
        }

        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let host = Arc::new(HostState {
            id: PeerId::random(),
            addrs,
            option_count,
            peerstore: Mutex::new(HashMap::new()),
            handlers: DashMap::new(),
            jobs: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        });

        std::thread::Builder::new()
            .name(format!("loopback-host-{}", &host.id.as_str()[8..16]))
            .spawn(move || {
                for job in rx {
                    job();
                }
            })
            .map_err(|e| format!("failed to start host: {e}"))?;

        for addr in host.addrs() {
            self.bindings.insert(addr.clone(), Arc::clone(&host));
        }
        debug!(peer = %host.id, addrs = ?host.addrs, "Loopback host started");
        Ok(host)
    }

    /// Stop `host`; idempotent
    pub(crate) fn shutdown(&self, host: &Arc<HostState>) {
        if host.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for addr in host.addrs() {
            self.bindings.remove_if(addr, |_, bound| Arc::ptr_eq(bound, host));
        }
        host.handlers.clear();
        // Queued jobs still run; the worker exits once the queue drains
        host.jobs.lock().take();
        debug!(peer = %host.id, "Loopback host stopped");
    }

    /// Resolve `peer` the way `dialer` would dial it
    pub(crate) fn dial(&self, dialer: &HostState, peer: &PeerId) -> Result<Arc<HostState>, String> {
        if dialer.is_closed() {
            return Err("failed to dial: host is closed".to_string());
        }
        let addrs = dialer.peer_addrs(peer);
        if addrs.is_empty() {
            return Err(format!("failed to dial {peer}: no addresses"));
        }

        addrs
            .iter()
            .filter_map(|addr| self.bindings.get(addr).map(|entry| Arc::clone(entry.value())))
            .find(|host| host.id() == peer && !host.is_closed())
            .ok_or_else(|| format!("failed to dial {peer}: connection refused"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_requires_known_address() {
        let network = Network::default();
        let a = network.start_host(vec!["/ip4/127.0.0.1/tcp/4001".into()], 1).unwrap();
        let b = network.start_host(vec!["/ip4/127.0.0.1/tcp/4002".into()], 1).unwrap();

        let err = network.dial(&a, b.id()).unwrap_err();
        assert!(err.contains("no addresses"));

        a.add_addrs(b.id().clone(), b.addrs());
        assert!(Arc::ptr_eq(&network.dial(&a, b.id()).unwrap(), &b));

        network.shutdown(&b);
        assert!(network.dial(&a, b.id()).unwrap_err().contains("connection refused"));
        network.shutdown(&a);
    }

    #[test]
    fn test_address_in_use() {
        let network = Network::default();
        let addr = "/ip4/127.0.0.1/tcp/4001".to_string();
        let host = network.start_host(vec![addr.clone()], 1).unwrap();

        assert!(network.start_host(vec![addr.clone()], 1).is_err());
        network.shutdown(&host);
        let again = network.start_host(vec![addr], 1).unwrap();
        network.shutdown(&again);
    }
}
