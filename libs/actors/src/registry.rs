//! Process Registry
//!
//! Process identities and the table routing a `Pid` to its mailbox.

use crate::system::Mailbox;
use dashmap::DashMap;
use std::fmt;
use uuid::Uuid;

/// Unique process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid {
    id: Uuid,
}

impl Pid {
    /// Length of the identity blob produced by [`Pid::to_bytes`]
    pub const BLOB_LEN: usize = 16;

    /// Create new process ID
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Create from UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self { id }
    }

    /// Get UUID
    pub fn uuid(&self) -> Uuid {
        self.id
    }

    /// Opaque identity blob, suitable for storing outside the runtime
    pub fn to_bytes(&self) -> [u8; Self::BLOB_LEN] {
        *self.id.as_bytes()
    }

    /// Rebuild an identity from a blob; `None` if the length is wrong
    pub fn from_bytes(blob: &[u8]) -> Option<Self> {
        Uuid::from_slice(blob).ok().map(Self::from_uuid)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid-{}", self.id.simple())
    }
}

impl Default for Pid {
    fn default() -> Self {
        Self::new()
    }
}

/// Routing table from process identity to mailbox.
///
/// Lookups are lock-sharded and synchronous so that threads the runtime
/// does not own can deliver messages.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    mailboxes: DashMap<Pid, Mailbox>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            mailboxes: DashMap::new(),
        }
    }

    /// Register a live process
    pub fn register(&self, pid: Pid, mailbox: Mailbox) {
        tracing::trace!(pid = %pid, "Registering process mailbox");
        self.mailboxes.insert(pid, mailbox);
    }

    /// Unregister a process; returns false if it was already gone
    pub fn unregister(&self, pid: &Pid) -> bool {
        let removed = self.mailboxes.remove(pid).is_some();
        if removed {
            tracing::trace!(pid = %pid, "Unregistered process mailbox");
        }
        removed
    }

    /// Mailbox of a live process
    pub fn lookup(&self, pid: &Pid) -> Option<Mailbox> {
        self.mailboxes.get(pid).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, pid: &Pid) -> bool {
        self.mailboxes.contains_key(pid)
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    /// Snapshot of live process identities
    pub fn pids(&self) -> Vec<Pid> {
        self.mailboxes.iter().map(|entry| *entry.key()).collect()
    }
}
