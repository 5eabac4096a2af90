//! Duplex in-memory streams
//!
//! Each end sends chunks to its peer over a crossbeam channel. Dropping or
//! half-closing the sending side is end-of-stream for the reader.

use bytes::{Buf, Bytes};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often a blocked reader rechecks whether its end was closed
const CLOSE_POLL: Duration = Duration::from_millis(25);

pub(crate) struct StreamEnd {
    protocol: Bytes,
    outbound: Mutex<Option<Sender<Bytes>>>,
    inbound: Receiver<Bytes>,
    pending: Mutex<Bytes>,
    closed: AtomicBool,
}

/// Two connected ends speaking `protocol`
pub(crate) fn pair(protocol: Bytes) -> (Arc<StreamEnd>, Arc<StreamEnd>) {
    let (a_tx, a_rx) = crossbeam_channel::unbounded();
    let (b_tx, b_rx) = crossbeam_channel::unbounded();

    let a = StreamEnd::new(protocol.clone(), a_tx, b_rx);
    let b = StreamEnd::new(protocol, b_tx, a_rx);
    (Arc::new(a), Arc::new(b))
}

impl StreamEnd {
    fn new(protocol: Bytes, outbound: Sender<Bytes>, inbound: Receiver<Bytes>) -> Self {
        Self {
            protocol,
            outbound: Mutex::new(Some(outbound)),
            inbound,
            pending: Mutex::new(Bytes::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn protocol(&self) -> &Bytes {
        &self.protocol
    }

    /// Bytes copied into `buffer`, 0 at end of stream, -1 once closed
    pub(crate) fn read(&self, buffer: &mut [u8]) -> i64 {
        if buffer.is_empty() {
            return 0;
        }

        let mut pending = self.pending.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return -1;
            }
            if pending.has_remaining() {
                let n = pending.len().min(buffer.len());
                buffer[..n].copy_from_slice(&pending[..n]);
                pending.advance(n);
                return n as i64;
            }

            match self.inbound.recv_timeout(CLOSE_POLL) {
                Ok(chunk) => *pending = chunk,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return 0,
            }
        }
    }

    /// Bytes accepted, -1 when this side or the peer is gone
    pub(crate) fn write(&self, data: &[u8]) -> i64 {
        if self.closed.load(Ordering::Acquire) {
            return -1;
        }
        match self.outbound.lock().as_ref() {
            Some(tx) => match tx.send(Bytes::copy_from_slice(data)) {
                Ok(()) => data.len() as i64,
                Err(_) => -1,
            },
            None => -1,
        }
    }

    pub(crate) fn close_write(&self) {
        self.outbound.lock().take();
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.close_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_transfers_in_order() {
        let (a, b) = pair(Bytes::from_static(b"/echo/1.0.0"));
        assert_eq!(a.write(b"hello "), 6);
        assert_eq!(a.write(b"world"), 5);
        a.close_write();

        let mut buffer = [0u8; 4];
        let mut received = Vec::new();
        loop {
            let n = b.read(&mut buffer);
            assert!(n >= 0);
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buffer[..n as usize]);
        }
        assert_eq!(received, b"hello world");
        assert_eq!(b.protocol().as_ref(), b"/echo/1.0.0");
    }

    #[test]
    fn test_closed_end_fails() {
        let (a, b) = pair(Bytes::from_static(b"/p"));
        a.close();

        assert_eq!(a.write(b"x"), -1);
        assert_eq!(a.read(&mut [0u8; 8]), -1);
        assert_eq!(b.read(&mut [0u8; 8]), 0);
    }

    #[test]
    fn test_write_after_peer_dropped() {
        let (a, b) = pair(Bytes::from_static(b"/p"));
        drop(b);
        assert_eq!(a.write(b"x"), -1);
    }
}
