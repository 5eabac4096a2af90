//! Callback Dispatcher
//!
//! Turns one event raised on a foreign background thread into one mailbox
//! message for the registration's target process, or drops it.
//!
//! # Registration lifecycle
//!
//! ```text
//!              notify (delivered)
//!                 ┌──────┐
//!                 ▼      │
//!  prepare ──► Registered ┴──► Cancelled   (subscription_cancel, host_close,
//!                 │                         connect result, failed install)
//!                 ├──────────► ProcessGone (first failed delivery)
//!                 └──────────► Replaced    (newer handler for host+protocol)
//! ```
//!
//! Terminal states drop the dispatcher's own reference to the registration.
//! `Cancelled` still lets the final subscription `cancelled` notice through;
//! the other terminal states suppress everything.
//!
//! # Thread safety
//!
//! `notify` may run on any thread and never blocks: it wraps payload handles,
//! consults one atomic, and performs the runtime's non-blocking `send`.

use crate::handle::{HandleType, RawHandle};
use crate::registry::HandleRegistry;
use crate::target::ProcessTarget;
use actor_runtime::{Runtime, Term};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// An asynchronous notification raised by the foreign library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    /// A peer opened a stream for a handled protocol
    InboundStream(RawHandle),
    /// Outcome of a connect attempt
    ConnectResult(std::result::Result<(), String>),
    /// A message arrived on a subscription
    SubscriptionMessage(RawHandle),
    /// The subscription ended; nothing follows
    SubscriptionCancelled,
}

impl CallbackEvent {
    fn tag(&self) -> &'static str {
        match self {
            CallbackEvent::InboundStream(_) => "request",
            CallbackEvent::ConnectResult(_) => "connect",
            CallbackEvent::SubscriptionMessage(_) | CallbackEvent::SubscriptionCancelled => "sub",
        }
    }
}

/// What a registration was installed for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationKind {
    StreamHandler { host: RawHandle, protocol: Bytes },
    Connect,
    Subscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegistrationState {
    Registered = 0,
    Cancelled = 1,
    ProcessGone = 2,
    Replaced = 3,
}

impl RegistrationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RegistrationState::Registered,
            1 => RegistrationState::Cancelled,
            2 => RegistrationState::ProcessGone,
            _ => RegistrationState::Replaced,
        }
    }
}

/// Dispatch counters
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    pub delivered: AtomicU64,
    pub undeliverable: AtomicU64,
    pub suppressed: AtomicU64,
}

struct DispatchShared {
    runtime: Runtime,
    registry: HandleRegistry,
    metrics: DispatchMetrics,
}

type HandlerTable = DashMap<(RawHandle, Bytes), Arc<Registration>>;

/// One future-event registration and the callback the foreign library
/// invokes for it
pub struct Registration {
    id: u64,
    kind: RegistrationKind,
    target: ProcessTarget,
    state: AtomicU8,
    shared: Arc<DispatchShared>,
    handlers: Weak<HandlerTable>,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> &RegistrationKind {
        &self.kind
    }

    pub fn target(&self) -> ProcessTarget {
        self.target
    }

    /// Identity blob of the target process
    pub fn identity(&self) -> &[u8] {
        self.target.as_bytes()
    }

    pub fn state(&self) -> RegistrationState {
        RegistrationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Deliver `event` to the target; false if it was dropped
    pub fn notify(&self, event: CallbackEvent) -> bool {
        dispatch(self, event)
    }

    /// Registered → Cancelled; false if the registration already ended
    pub fn cancel(&self) -> bool {
        let cancelled = self.transition(RegistrationState::Registered, RegistrationState::Cancelled);
        if cancelled {
            debug!(registration = self.id, target = %self.target.pid(), "Registration cancelled");
        }
        cancelled
    }

    fn transition(&self, from: RegistrationState, to: RegistrationState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to ProcessGone from any state that still delivers
    fn mark_process_gone(&self) -> bool {
        self.transition(RegistrationState::Registered, RegistrationState::ProcessGone)
            || self.transition(RegistrationState::Cancelled, RegistrationState::ProcessGone)
    }

    /// Drop the handler table's reference if it still points at us
    fn retire(&self) {
        let RegistrationKind::StreamHandler { host, protocol } = &self.kind else {
            return;
        };
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.remove_if(&(*host, protocol.clone()), |_, installed| installed.id == self.id);
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("state", &self.state())
            .finish()
    }
}

fn build_message(registry: &HandleRegistry, event: &CallbackEvent) -> Option<Term> {
    let payload = match event {
        CallbackEvent::InboundStream(handle) => registry.wrap(HandleType::Stream, *handle).ok()?.to_term(),
        CallbackEvent::SubscriptionMessage(handle) => {
            registry.wrap(HandleType::Message, *handle).ok()?.to_term()
        }
        CallbackEvent::ConnectResult(Ok(())) => Term::ok(),
        CallbackEvent::ConnectResult(Err(message)) => Term::error_tuple(message.as_str()),
        CallbackEvent::SubscriptionCancelled => Term::atom("cancelled"),
    };
    Some(Term::tuple2(Term::atom(event.tag()), payload))
}

fn dispatch(registration: &Registration, event: CallbackEvent) -> bool {
    let shared = &registration.shared;

    // Wrap first: from here on the payload handle is released by dropping
    // the message, whatever happens to it.
    let Some(message) = build_message(&shared.registry, &event) else {
        warn!(registration = registration.id, event = ?event, "Dropping event with invalid payload handle");
        shared.metrics.suppressed.fetch_add(1, Ordering::Relaxed);
        return false;
    };

    let state = registration.state();
    let allowed = match state {
        RegistrationState::Registered => true,
        RegistrationState::Cancelled => event == CallbackEvent::SubscriptionCancelled,
        RegistrationState::ProcessGone | RegistrationState::Replaced => false,
    };
    if !allowed {
        trace!(registration = registration.id, state = ?state, "Suppressed event for ended registration");
        shared.metrics.suppressed.fetch_add(1, Ordering::Relaxed);
        return false;
    }

    let pid = registration.target.pid();
    if let Err(undelivered) = shared.runtime.send(&pid, message) {
        shared.metrics.undeliverable.fetch_add(1, Ordering::Relaxed);
        if registration.mark_process_gone() {
            registration.retire();
            warn!(
                registration = registration.id,
                target = %pid,
                tag = event.tag(),
                "Target process is gone, dropping event"
            );
        }
        // Releases any payload handle
        drop(undelivered);
        return false;
    }

    shared.metrics.delivered.fetch_add(1, Ordering::Relaxed);
    trace!(registration = registration.id, target = %pid, tag = event.tag(), "Event delivered");

    match (&registration.kind, &event) {
        (RegistrationKind::Connect, _) | (_, CallbackEvent::SubscriptionCancelled) => {
            registration.transition(RegistrationState::Registered, RegistrationState::Cancelled);
        }
        _ => {}
    }
    true
}

/// Creates registrations and tracks installed stream handlers
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<DispatchShared>,
    handlers: Arc<HandlerTable>,
    next_id: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(runtime: Runtime, registry: HandleRegistry) -> Self {
        Self {
            shared: Arc::new(DispatchShared {
                runtime,
                registry,
                metrics: DispatchMetrics::default(),
            }),
            handlers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// New registration in `Registered`, not yet known to the library
    pub fn prepare(&self, kind: RegistrationKind, target: ProcessTarget) -> Arc<Registration> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(registration = id, kind = ?kind, target = %target.pid(), "Prepared registration");

        Arc::new(Registration {
            id,
            kind,
            target,
            state: AtomicU8::new(RegistrationState::Registered as u8),
            shared: Arc::clone(&self.shared),
            handlers: Arc::downgrade(&self.handlers),
        })
    }

    /// Hand a registration to the library and record it, as one step per key.
    ///
    /// For stream handlers `register` runs while the handler-table entry for
    /// `(host, protocol)` is held, so concurrent installs for the same key
    /// are serialised and the library's current handler is always the one
    /// recorded here. The handler it supersedes moves to `Replaced`. If
    /// `register` fails the registration is cancelled and nothing is recorded.
    pub fn install_with<E>(
        &self,
        registration: &Arc<Registration>,
        register: impl FnOnce() -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        let RegistrationKind::StreamHandler { host, protocol } = &registration.kind else {
            return register().inspect_err(|_| {
                registration.cancel();
            });
        };

        let entry = self.handlers.entry((*host, protocol.clone()));
        if let Err(e) = register() {
            registration.cancel();
            return Err(e);
        }

        let previous = match entry {
            Entry::Occupied(mut occupied) => Some(occupied.insert(Arc::clone(registration))),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(registration));
                None
            }
        };

        if let Some(previous) = previous {
            if previous.transition(RegistrationState::Registered, RegistrationState::Replaced) {
                debug!(
                    registration = previous.id,
                    replaced_by = registration.id,
                    host = *host,
                    "Stream handler replaced"
                );
            }
        }
        Ok(())
    }

    /// The foreign library refused the registration
    pub fn abandon(&self, registration: &Arc<Registration>) {
        registration.cancel();
        registration.retire();
    }

    /// Cancel every stream handler installed on `host`
    pub fn retire_host(&self, host: RawHandle) {
        self.handlers.retain(|(handler_host, _), registration| {
            if *handler_host == host {
                registration.cancel();
                false
            } else {
                true
            }
        });
    }

    /// Deliver `event` for `registration`
    pub fn dispatch(&self, registration: &Registration, event: CallbackEvent) -> bool {
        dispatch(registration, event)
    }

    pub fn installed_handlers(&self) -> usize {
        self.handlers.len()
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.shared.metrics
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.shared.registry
    }

    pub fn runtime(&self) -> &Runtime {
        &self.shared.runtime
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("installed_handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackLibrary;
    use crate::registry::Resource;
    use actor_runtime::Pid;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup() -> (LoopbackLibrary, Runtime, Dispatcher) {
        let library = LoopbackLibrary::new();
        let runtime = Runtime::new().unwrap();
        let registry = HandleRegistry::new(Arc::new(library.clone()));
        let dispatcher = Dispatcher::new(runtime.clone(), registry);
        (library, runtime, dispatcher)
    }

    /// Process forwarding every mailbox message to the test
    fn forwarder(runtime: &Runtime) -> (Pid, mpsc::UnboundedReceiver<Term>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pid = runtime.spawn(|mut process| async move {
            while let Some(msg) = process.recv().await {
                if tx.send(msg).is_err() {
                    break;
                }
            }
        });
        (pid, rx)
    }

    fn handler_kind(host: RawHandle) -> RegistrationKind {
        RegistrationKind::StreamHandler {
            host,
            protocol: Bytes::from_static(b"/echo/1.0.0"),
        }
    }

    fn accept() -> std::result::Result<(), ()> {
        Ok(())
    }

    #[tokio::test]
    async fn test_inbound_stream_delivered_as_resource() {
        let (_, runtime, dispatcher) = setup();
        let (pid, mut rx) = forwarder(&runtime);
        let registration = dispatcher.prepare(handler_kind(1), ProcessTarget::from_pid(pid));

        assert!(registration.notify(CallbackEvent::InboundStream(42)));

        let msg = rx.recv().await.unwrap();
        let elements = msg.as_tuple().unwrap();
        assert!(elements[0].is_atom("request"));
        let stream = Resource::from_term(&elements[1]).unwrap();
        assert_eq!(stream.kind(), HandleType::Stream);
        assert_eq!(stream.raw(), 42);
    }

    #[tokio::test]
    async fn test_dead_target_releases_payload() {
        let (library, runtime, dispatcher) = setup();
        let (pid, _rx) = forwarder(&runtime);
        let registration = dispatcher.prepare(RegistrationKind::Subscription, ProcessTarget::from_pid(pid));

        runtime.exit(&pid);

        assert!(!registration.notify(CallbackEvent::SubscriptionMessage(9)));
        assert_eq!(registration.state(), RegistrationState::ProcessGone);
        assert_eq!(library.release_count(9), 1);

        // Suppressed from now on, payload still released
        assert!(!registration.notify(CallbackEvent::SubscriptionMessage(10)));
        assert_eq!(library.release_count(10), 1);
        assert_eq!(dispatcher.metrics().undeliverable.load(Ordering::Relaxed), 1);
        assert_eq!(dispatcher.metrics().suppressed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_zero_payload_dropped() {
        let (_, runtime, dispatcher) = setup();
        let (pid, mut rx) = forwarder(&runtime);
        let registration = dispatcher.prepare(handler_kind(1), ProcessTarget::from_pid(pid));

        assert!(!registration.notify(CallbackEvent::InboundStream(0)));
        assert_eq!(registration.state(), RegistrationState::Registered);
        assert!(tokio::time::timeout(Duration::from_millis(20), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_is_one_shot() {
        let (_, runtime, dispatcher) = setup();
        let (pid, mut rx) = forwarder(&runtime);
        let registration = dispatcher.prepare(RegistrationKind::Connect, ProcessTarget::from_pid(pid));

        assert!(registration.notify(CallbackEvent::ConnectResult(Err("refused".into()))));
        assert!(!registration.notify(CallbackEvent::ConnectResult(Ok(()))));
        assert_eq!(registration.state(), RegistrationState::Cancelled);

        let msg = rx.recv().await.unwrap();
        assert_eq!(
            msg,
            Term::tuple2(Term::atom("connect"), Term::error_tuple("refused"))
        );
    }

    #[tokio::test]
    async fn test_cancelled_lets_final_notice_through() {
        let (_, runtime, dispatcher) = setup();
        let (pid, mut rx) = forwarder(&runtime);
        let registration = dispatcher.prepare(RegistrationKind::Subscription, ProcessTarget::from_pid(pid));

        assert!(registration.cancel());
        assert!(!registration.notify(CallbackEvent::SubscriptionMessage(3)));
        assert!(registration.notify(CallbackEvent::SubscriptionCancelled));

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, Term::tuple2(Term::atom("sub"), Term::atom("cancelled")));
    }

    #[tokio::test]
    async fn test_install_replaces_previous_handler() {
        let (_, runtime, dispatcher) = setup();
        let (pid, _rx) = forwarder(&runtime);
        let target = ProcessTarget::from_pid(pid);

        let first = dispatcher.prepare(handler_kind(7), target);
        dispatcher.install_with(&first, accept).unwrap();
        let second = dispatcher.prepare(handler_kind(7), target);
        dispatcher.install_with(&second, accept).unwrap();

        assert_eq!(first.state(), RegistrationState::Replaced);
        assert_eq!(second.state(), RegistrationState::Registered);
        assert!(!first.notify(CallbackEvent::InboundStream(5)));
        assert_eq!(dispatcher.installed_handlers(), 1);

        dispatcher.retire_host(7);
        assert_eq!(second.state(), RegistrationState::Cancelled);
        assert_eq!(dispatcher.installed_handlers(), 0);
    }

    #[tokio::test]
    async fn test_process_gone_retires_handler() {
        let (_, runtime, dispatcher) = setup();
        let (pid, _rx) = forwarder(&runtime);
        let registration = dispatcher.prepare(handler_kind(3), ProcessTarget::from_pid(pid));
        dispatcher.install_with(&registration, accept).unwrap();

        runtime.exit(&pid);
        assert!(!registration.notify(CallbackEvent::InboundStream(11)));
        assert_eq!(dispatcher.installed_handlers(), 0);
    }

    #[tokio::test]
    async fn test_refused_install_records_nothing() {
        let (_, runtime, dispatcher) = setup();
        let (pid, _rx) = forwarder(&runtime);
        let registration = dispatcher.prepare(handler_kind(4), ProcessTarget::from_pid(pid));

        assert_eq!(dispatcher.install_with(&registration, || Err("refused")), Err("refused"));
        assert_eq!(registration.state(), RegistrationState::Cancelled);
        assert_eq!(dispatcher.installed_handlers(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_installs_follow_library_order() {
        let (_, runtime, dispatcher) = setup();
        let (pid, _rx) = forwarder(&runtime);
        let target = ProcessTarget::from_pid(pid);
        let first = dispatcher.prepare(handler_kind(9), target);
        let second = dispatcher.prepare(handler_kind(9), target);
        // Registration id the library currently routes to
        let routed = Arc::new(parking_lot::Mutex::new(0u64));

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let slow = {
            let dispatcher = dispatcher.clone();
            let first = Arc::clone(&first);
            let routed = Arc::clone(&routed);
            std::thread::spawn(move || {
                dispatcher.install_with(&first, || {
                    entered_tx.send(()).ok();
                    std::thread::sleep(Duration::from_millis(50));
                    *routed.lock() = first.id();
                    Ok::<(), ()>(())
                })
            })
        };

        entered_rx.recv().unwrap();
        dispatcher
            .install_with(&second, || {
                *routed.lock() = second.id();
                Ok::<(), ()>(())
            })
            .unwrap();
        slow.join().unwrap().unwrap();

        assert_eq!(*routed.lock(), second.id());
        assert_eq!(second.state(), RegistrationState::Registered);
        assert_eq!(first.state(), RegistrationState::Replaced);
        assert_eq!(dispatcher.installed_handlers(), 1);
    }
}
