//! Foreign Library Surface
//!
//! The calls the bridge needs from the networking library. Every method
//! takes and returns raw handles; failure is signalled with the sentinel
//! convention ([`INVALID_HANDLE`](crate::handle::INVALID_HANDLE) for
//! handles, [`FAILED`](crate::handle::FAILED) for counts and status codes).
//! The bridge never lets those sentinels reach its own callers.
//!
//! Implementations may run any method on any thread and may invoke
//! [`Registration::notify`] from their own background threads at any time
//! after the registration was handed over.
//!
//! # Ownership
//!
//! - Every non-zero handle returned here is owned by exactly one wrapper and
//!   released through [`ForeignLibrary::release`] exactly once.
//! - Handles carried by callback events are owned by the dispatcher from the
//!   moment `notify` is called, whether or not the event is delivered.

use crate::dispatch::Registration;
use crate::handle::RawHandle;
use std::sync::Arc;

pub trait ForeignLibrary: Send + Sync + 'static {
    /// Drop the library's reference to `handle`
    fn release(&self, handle: RawHandle);

    /// Description of the most recent failure on the calling thread, if the
    /// library keeps one. Reading it clears it.
    fn last_error(&self) -> Option<String> {
        None
    }

    // Utils

    fn listen_addr_strings(&self, addr: &[u8]) -> RawHandle;

    // Host

    fn host_new(&self, options: &[RawHandle]) -> RawHandle;
    fn host_close(&self, host: RawHandle);
    /// Route inbound streams for `protocol` to `registration`; 0 or -1.
    /// Must not raise events on the calling thread.
    fn host_set_stream_handler(
        &self,
        host: RawHandle,
        protocol: &[u8],
        registration: Arc<Registration>,
    ) -> i64;
    /// Open a stream and negotiate `protocol`. Blocks.
    fn host_new_stream(&self, host: RawHandle, peer: RawHandle, protocol: &[u8]) -> RawHandle;
    /// Start dialing `peer`; the outcome arrives on `registration`. 0 or -1
    fn host_connect(&self, host: RawHandle, peer: RawHandle, registration: Arc<Registration>) -> i64;
    fn host_peerstore(&self, host: RawHandle) -> RawHandle;
    fn host_id(&self, host: RawHandle) -> RawHandle;
    fn host_addrs(&self, host: RawHandle) -> RawHandle;

    // Peerstore

    /// 0 on success, -1 on failure
    fn peerstore_add_addrs(&self, peerstore: RawHandle, peer: RawHandle, addrs: RawHandle, ttl: u64) -> i64;

    // Stream

    /// Bytes read into `buffer`, 0 at end of stream, -1 on failure. Blocks.
    fn stream_read(&self, stream: RawHandle, buffer: &mut [u8]) -> i64;
    /// Bytes written, -1 on failure. Blocks.
    fn stream_write(&self, stream: RawHandle, data: &[u8]) -> i64;
    fn stream_close(&self, stream: RawHandle);
    fn stream_close_write(&self, stream: RawHandle);
    fn stream_protocol_len(&self, stream: RawHandle) -> i64;
    fn stream_protocol(&self, stream: RawHandle, buffer: &mut [u8]) -> i64;

    // Discovery

    fn listen_v5(&self, bind: &[u8], bootnodes: &[&[u8]]) -> RawHandle;
    fn listener_close(&self, listener: RawHandle);
    fn listener_random_nodes(&self, listener: RawHandle) -> RawHandle;
    /// Advance to the next node; false when discovery is exhausted. Blocks.
    fn iterator_next(&self, iterator: RawHandle) -> bool;
    fn iterator_node(&self, iterator: RawHandle) -> RawHandle;
    /// TCP port, 0 when the node advertises none, -1 on failure
    fn node_tcp(&self, node: RawHandle) -> i64;
    fn node_multiaddr(&self, node: RawHandle) -> RawHandle;
    fn node_id(&self, node: RawHandle) -> RawHandle;

    // PubSub

    fn new_gossipsub(&self, host: RawHandle) -> RawHandle;
    fn pubsub_join(&self, pubsub: RawHandle, topic: &[u8]) -> RawHandle;
    /// Subscribe; every message and the final cancellation go to `registration`
    fn topic_subscribe(&self, topic: RawHandle, registration: Arc<Registration>) -> RawHandle;
    /// 0 on success, -1 on failure
    fn topic_publish(&self, topic: RawHandle, data: &[u8]) -> i64;
    fn subscription_cancel(&self, subscription: RawHandle);
    fn message_data_len(&self, message: RawHandle) -> i64;
    fn message_data(&self, message: RawHandle, buffer: &mut [u8]) -> i64;
}
