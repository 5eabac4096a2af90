//! # libp2p Bridge
//!
//! Connects runtime processes to a foreign peer-to-peer library that owns
//! its objects and raises events on its own threads.
//!
//! ```text
//!  process ── invoke / Libp2p::* ──► Façade ──► ForeignLibrary
//!     ▲                                │   ▲          │
//!     │                        wrap/unwrap  │          │ background threads
//!     │                                ▼   │          ▼
//!     │                           HandleRegistry ◄── Dispatcher ◄── Registration::notify
//!     └──────────────── Runtime::send ─────────────────┘
//! ```
//!
//! ## Components
//!
//! - [`registry`]: typed, reference-counted wrappers whose last drop
//!   releases the foreign handle exactly once
//! - [`target`]: the caller's identity captured when a registration is made
//! - [`dispatch`]: delivery of foreign events to mailboxes, tolerant of
//!   processes that have exited
//! - [`facade`]: typed entry points with sentinel translation and the
//!   blocking pool for calls that wait on peers
//! - [`surface`]: the same entry points addressed by name with tagged replies
//! - [`loopback`]: an in-memory foreign library

pub mod dispatch;
pub mod error;
pub mod facade;
pub mod foreign;
pub mod handle;
pub mod loopback;
pub mod pool;
pub mod registry;
pub mod surface;
pub mod target;

pub use dispatch::{CallbackEvent, Dispatcher, Registration, RegistrationKind, RegistrationState};
pub use error::{BridgeError, Result};
pub use facade::{Libp2p, PERMANENT_ADDR_TTL};
pub use foreign::ForeignLibrary;
pub use handle::{HandleType, RawHandle, FAILED, INVALID_HANDLE};
pub use loopback::LoopbackLibrary;
pub use pool::BlockingPool;
pub use registry::{HandleRegistry, Resource};
pub use target::ProcessTarget;
