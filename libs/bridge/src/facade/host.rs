use super::{binary_arg, failure, minted, u64_arg, Libp2p};
use crate::dispatch::RegistrationKind;
use crate::error::{BridgeError, Result};
use crate::handle::{HandleType, FAILED};
use crate::registry::Resource;
use crate::target::ProcessTarget;
use actor_runtime::Term;
use std::sync::Arc;
use tracing::{debug, info};

/// TTL for addresses that never expire (the largest duration, in nanoseconds)
pub const PERMANENT_ADDR_TTL: u64 = i64::MAX as u64;

impl Libp2p {
    /// Listen-address option for [`Libp2p::host_new`]
    pub fn listen_addr(&self, addr: &Term) -> Result<Resource> {
        let addr = binary_arg(addr, "listen address")?;
        let handle = self.library.listen_addr_strings(&addr);
        self.minted("listen_addr", HandleType::Option, handle)
    }

    /// Start a host from a list of options (at most `max_list_len` are used)
    pub fn host_new(&self, options: &Term) -> Result<Resource> {
        let options = self
            .list_arg(options, "options")?
            .iter()
            .map(|option| self.resource(option, HandleType::Option))
            .collect::<Result<Vec<_>>>()?;
        let raw: Vec<_> = options.iter().map(Resource::raw).collect();

        let host = self.minted("host_new", HandleType::Host, self.library.host_new(&raw))?;
        info!(host = host.raw(), options = raw.len(), "Host created");
        Ok(host)
    }

    /// Shut the host down. Idempotent; its stream handlers stop receiving.
    pub fn host_close(&self, host: &Term) -> Result<()> {
        let host = self.registry.lookup(host, HandleType::Host)?;
        if host.mark_closed() {
            self.library.host_close(host.raw());
            self.dispatcher.retire_host(host.raw());
            info!(host = host.raw(), "Host closed");
        }
        Ok(())
    }

    /// Route inbound streams for `protocol` to the calling process as
    /// `{request, Stream}` messages
    pub fn host_set_stream_handler(&self, host: &Term, protocol: &Term) -> Result<()> {
        let host = self.resource(host, HandleType::Host)?;
        let protocol = binary_arg(protocol, "protocol")?;
        let target = ProcessTarget::capture()?;

        let registration = self.dispatcher.prepare(
            RegistrationKind::StreamHandler {
                host: host.raw(),
                protocol: protocol.clone(),
            },
            target,
        );

        self.dispatcher.install_with(&registration, || {
            // `host_close` retires handlers only after this entry is released
            if host.is_closed() {
                return Err(BridgeError::closed(HandleType::Host));
            }
            let status = self
                .library
                .host_set_stream_handler(host.raw(), &protocol, Arc::clone(&registration));
            if status == FAILED {
                return Err(failure(self.library.as_ref(), "host_set_stream_handler", "failed to set handler"));
            }
            Ok(())
        })?;

        debug!(
            host = host.raw(),
            protocol = %String::from_utf8_lossy(&protocol),
            registration = registration.id(),
            "Stream handler installed"
        );
        Ok(())
    }

    /// Open a stream to `peer` and negotiate `protocol`. Blocks on the pool.
    pub async fn host_new_stream(&self, host: &Term, peer: &Term, protocol: &Term) -> Result<Resource> {
        let host = self.resource(host, HandleType::Host)?;
        let peer = self.resource(peer, HandleType::PeerId)?;
        let protocol = binary_arg(protocol, "protocol")?;
        let registry = self.registry.clone();

        self.pool
            .run("host_new_stream", move || {
                let library = registry.library();
                let handle = library.host_new_stream(host.raw(), peer.raw(), &protocol);
                minted(&registry, "host_new_stream", HandleType::Stream, handle)
            })
            .await
    }

    /// Start connecting to `peer`; the caller later receives
    /// `{connect, ok}` or `{connect, {error, Message}}`
    pub fn host_connect(&self, host: &Term, peer: &Term) -> Result<()> {
        let host = self.resource(host, HandleType::Host)?;
        let peer = self.resource(peer, HandleType::PeerId)?;
        let target = ProcessTarget::capture()?;

        let registration = self.dispatcher.prepare(RegistrationKind::Connect, target);
        let status = self
            .library
            .host_connect(host.raw(), peer.raw(), Arc::clone(&registration));
        if status == FAILED {
            self.dispatcher.abandon(&registration);
            return Err(failure(self.library.as_ref(), "host_connect", "failed to connect"));
        }
        Ok(())
    }

    pub fn peerstore_of(&self, host: &Term) -> Result<Resource> {
        let host = self.resource(host, HandleType::Host)?;
        self.minted("peerstore_of", HandleType::Peerstore, self.library.host_peerstore(host.raw()))
    }

    pub fn host_id(&self, host: &Term) -> Result<Resource> {
        let host = self.resource(host, HandleType::Host)?;
        self.minted("host_id", HandleType::PeerId, self.library.host_id(host.raw()))
    }

    pub fn host_addrs(&self, host: &Term) -> Result<Resource> {
        let host = self.resource(host, HandleType::Host)?;
        self.minted("host_addrs", HandleType::MultiaddrList, self.library.host_addrs(host.raw()))
    }

    /// Remember `addrs` for `peer` for `ttl` nanoseconds
    pub fn peerstore_add_addrs(&self, peerstore: &Term, peer: &Term, addrs: &Term, ttl: &Term) -> Result<()> {
        let peerstore = self.resource(peerstore, HandleType::Peerstore)?;
        let peer = self.resource(peer, HandleType::PeerId)?;
        let addrs = self.resource(addrs, HandleType::MultiaddrList)?;
        let ttl = u64_arg(ttl, "ttl")?;

        let status = self
            .library
            .peerstore_add_addrs(peerstore.raw(), peer.raw(), addrs.raw(), ttl);
        if status == FAILED {
            return Err(failure(self.library.as_ref(), "peerstore_add_addrs", "failed to add addresses"));
        }
        Ok(())
    }
}
