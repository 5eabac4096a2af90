//! Actor-Style Embedding Runtime
//!
//! Lightweight processes with private mailboxes, scheduled on tokio. This is
//! the runtime that foreign libraries deliver asynchronous events into.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐         ┌──────────────────────────┐
//! │        Runtime           │         │   Foreign thread         │
//! │                          │         │                          │
//! │  ┌────────────────────┐  │  send   │  runtime.send(pid, term) │
//! │  │ ProcessRegistry    │◄─┼─────────┼─ (sync, any thread)      │
//! │  │ Pid -> mailbox tx  │  │         └──────────────────────────┘
//! │  └─────────┬──────────┘  │
//! │            │ unbounded   │
//! │  ┌─────────▼──────────┐  │
//! │  │ Process task       │  │
//! │  │ CURRENT_PID scope  │  │
//! │  └────────────────────┘  │
//! └──────────────────────────┘
//! ```
//!
//! A process's mailbox is unregistered the moment its task finishes, panics
//! or is exited, so late senders observe the failure and get their term back.
//!
//! # Examples
//!
//! ```rust,no_run
//! use actor_runtime::{Runtime, Term};
//!
//! # async fn demo() -> actor_runtime::Result<()> {
//! let runtime = Runtime::new()?;
//! let pid = runtime.spawn(|mut process| async move {
//!     while let Some(msg) = process.recv().await {
//!         println!("{} got {}", process.pid(), msg);
//!     }
//! });
//! runtime.send(&pid, Term::atom("hello")).ok();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod messages;
pub mod registry;
pub mod system;

pub use error::{Result, RuntimeError};
pub use messages::{ResourceRef, Term};
pub use registry::{Pid, ProcessRegistry};
pub use system::{current_pid, Mailbox, MailboxReceiver, Process, Runtime, RuntimeMetrics, RuntimeStats};
