//! Runtime Core
//!
//! Process lifecycle, mailboxes and the thread-safe send path.
//!
//! # Lock Ordering
//!
//! `processes` and `tasks` are independent sharded maps; no code path holds
//! an entry guard of one while touching the other.

use crate::error::{Result, RuntimeError};
use crate::messages::Term;
use crate::registry::{Pid, ProcessRegistry};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace};
use uuid::Uuid;

tokio::task_local! {
    /// Identity of the process whose task is currently being polled
    static CURRENT_PID: Pid;
}

/// Identity of the calling process.
///
/// Returns `None` outside of a process task, including on threads of the
/// blocking pool, so callers must capture it before leaving the process.
pub fn current_pid() -> Option<Pid> {
    CURRENT_PID.try_with(|pid| *pid).ok()
}

/// Sending side of a process mailbox
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::UnboundedSender<Term>,
}

/// Receiving side of a process mailbox, owned by the process
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::UnboundedReceiver<Term>,
}

impl Mailbox {
    pub fn new() -> (Self, MailboxReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, MailboxReceiver { rx })
    }

    /// Enqueue without blocking; the term comes back if the receiver is gone
    pub fn send(&self, msg: Term) -> std::result::Result<(), Term> {
        self.tx.send(msg).map_err(|mpsc::error::SendError(msg)| msg)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl MailboxReceiver {
    pub async fn recv(&mut self) -> Option<Term> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Term> {
        self.rx.try_recv().ok()
    }
}

/// Runtime-wide counters
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub processes_spawned: AtomicU64,
    pub processes_exited: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub messages_dropped: AtomicU64,
}

/// Point-in-time copy of [`RuntimeMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    pub processes_spawned: u64,
    pub processes_exited: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
}

impl RuntimeMetrics {
    pub fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            processes_spawned: self.processes_spawned.load(Ordering::Relaxed),
            processes_exited: self.processes_exited.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}

/// The embedding runtime: spawns processes and routes messages to them
#[derive(Debug, Clone)]
pub struct Runtime {
    processes: Arc<ProcessRegistry>,
    tasks: Arc<DashMap<Pid, AbortHandle>>,
    metrics: Arc<RuntimeMetrics>,
    handle: Handle,
    runtime_id: String,
}

/// Unregisters a process when its task ends, however it ends
struct ExitGuard {
    pid: Pid,
    processes: Arc<ProcessRegistry>,
    tasks: Arc<DashMap<Pid, AbortHandle>>,
    metrics: Arc<RuntimeMetrics>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.tasks.remove(&self.pid);
        if self.processes.unregister(&self.pid) {
            self.metrics.processes_exited.fetch_add(1, Ordering::Relaxed);
        }
        debug!(pid = %self.pid, "Process exited");
    }
}

impl Runtime {
    /// Create a runtime on the current tokio executor
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| RuntimeError::no_executor(e.to_string()))?;
        Ok(Self::with_handle(handle))
    }

    /// Create a runtime that schedules processes on `handle`
    pub fn with_handle(handle: Handle) -> Self {
        let runtime_id = format!("runtime-{}", Uuid::new_v4().simple());
        info!(runtime_id = %runtime_id, "Creating embedding runtime");

        Self {
            processes: Arc::new(ProcessRegistry::new()),
            tasks: Arc::new(DashMap::new()),
            metrics: Arc::new(RuntimeMetrics::default()),
            handle,
            runtime_id,
        }
    }

    /// Spawn a process running `body`
    pub fn spawn<F, Fut>(&self, body: F) -> Pid
    where
        F: FnOnce(Process) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let pid = Pid::new();
        let (mailbox, receiver) = Mailbox::new();
        self.processes.register(pid, mailbox);
        self.metrics.processes_spawned.fetch_add(1, Ordering::Relaxed);

        let process = Process {
            pid,
            mailbox: receiver,
            runtime: self.clone(),
        };
        let guard = ExitGuard {
            pid,
            processes: Arc::clone(&self.processes),
            tasks: Arc::clone(&self.tasks),
            metrics: Arc::clone(&self.metrics),
        };

        let task = self.handle.spawn(CURRENT_PID.scope(pid, async move {
            let _guard = guard;
            body(process).await;
        }));

        self.tasks.insert(pid, task.abort_handle());
        // The task may already have finished and cleaned up before the insert
        if !self.processes.contains(&pid) {
            self.tasks.remove(&pid);
        }

        debug!(pid = %pid, runtime_id = %self.runtime_id, "Spawned process");
        pid
    }

    /// Deliver `msg` to `pid`.
    ///
    /// Synchronous and callable from any thread. On failure the message is
    /// handed back untouched; dropping it is the caller's cleanup.
    pub fn send(&self, pid: &Pid, msg: Term) -> std::result::Result<(), Term> {
        let result = match self.processes.lookup(pid) {
            Some(mailbox) => mailbox.send(msg),
            None => Err(msg),
        };

        match &result {
            Ok(()) => {
                self.metrics.messages_delivered.fetch_add(1, Ordering::Relaxed);
                trace!(pid = %pid, "Message delivered");
            }
            Err(_) => {
                self.metrics.messages_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(pid = %pid, "Message dropped, process not alive");
            }
        }
        result
    }

    /// Terminate a process. Sends fail as soon as this returns.
    pub fn exit(&self, pid: &Pid) -> bool {
        let was_alive = self.processes.unregister(pid);
        if was_alive {
            self.metrics.processes_exited.fetch_add(1, Ordering::Relaxed);
        }
        if let Some((_, task)) = self.tasks.remove(pid) {
            task.abort();
        }
        if was_alive {
            debug!(pid = %pid, "Process exited by request");
        }
        was_alive
    }

    pub fn is_alive(&self, pid: &Pid) -> bool {
        self.processes.contains(pid)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn metrics(&self) -> Arc<RuntimeMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn runtime_id(&self) -> &str {
        &self.runtime_id
    }

    /// Executor handle processes are scheduled on
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// A running process, handed to its body by [`Runtime::spawn`]
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    mailbox: MailboxReceiver,
    runtime: Runtime,
}

impl Process {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Next message; `None` once the mailbox is closed
    pub async fn recv(&mut self) -> Option<Term> {
        self.mailbox.recv().await
    }

    /// Next message, or `None` if nothing arrives within `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Term> {
        tokio::time::timeout(timeout, self.mailbox.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_recv(&mut self) -> Option<Term> {
        self.mailbox.try_recv()
    }
}
