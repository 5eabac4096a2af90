//! Process-Target Capture
//!
//! Snapshot of the calling process's identity, taken when a call installs a
//! registration for future events. The snapshot owns its bytes, so it can be
//! read later from any foreign thread.

use crate::error::{BridgeError, Result};
use actor_runtime::{current_pid, Pid};
use std::fmt;

/// Immutable identity of the process that receives a registration's events
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessTarget {
    pid: Pid,
    blob: [u8; Pid::BLOB_LEN],
}

impl ProcessTarget {
    /// Capture the process currently executing this call.
    ///
    /// Must run on the process's own task, before any hop to the blocking
    /// pool; fails with [`BridgeError::NoProcess`] anywhere else.
    pub fn capture() -> Result<Self> {
        current_pid().map(Self::from_pid).ok_or(BridgeError::NoProcess)
    }

    pub fn from_pid(pid: Pid) -> Self {
        Self {
            pid,
            blob: pid.to_bytes(),
        }
    }

    /// Rebuild a target from the blob handed to the foreign library
    pub fn from_blob(blob: &[u8]) -> Option<Self> {
        Pid::from_bytes(blob).map(Self::from_pid)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Opaque identity blob
    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }
}

impl fmt::Debug for ProcessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessTarget({})", self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actor_runtime::Runtime;
    use tokio::sync::oneshot;

    #[test]
    fn test_capture_outside_process() {
        assert_eq!(ProcessTarget::capture(), Err(BridgeError::NoProcess));
    }

    #[tokio::test]
    async fn test_capture_inside_process() {
        let runtime = Runtime::new().unwrap();
        let (tx, rx) = oneshot::channel();

        let pid = runtime.spawn(|_process| async move {
            tx.send(ProcessTarget::capture()).ok();
        });

        let target = rx.await.unwrap().unwrap();
        assert_eq!(target.pid(), pid);
    }

    #[tokio::test]
    async fn test_capture_lost_on_blocking_pool() {
        let runtime = Runtime::new().unwrap();
        let (tx, rx) = oneshot::channel();

        runtime.spawn(|_process| async move {
            let captured = tokio::task::spawn_blocking(ProcessTarget::capture).await.unwrap();
            tx.send(captured).ok();
        });

        assert_eq!(rx.await.unwrap(), Err(BridgeError::NoProcess));
    }

    #[test]
    fn test_blob_round_trip() {
        let target = ProcessTarget::from_pid(Pid::new());
        let blob = target.as_bytes().to_vec();

        assert_eq!(ProcessTarget::from_blob(&blob), Some(target));
        assert_eq!(ProcessTarget::from_blob(&blob[1..]), None);
    }
}
