//! Handle Registry
//!
//! Pairs a raw foreign handle with its declared type inside a
//! runtime-tracked wrapper. The foreign library stays the single owner of
//! the real object; the wrapper is a reference-counted proxy whose only
//! finalizer action is "release upstream".
//!
//! ```text
//!  Term::Resource ──┐
//!  Term::Resource ──┼──► Arc<HandleResource { kind, handle }> ──drop──► library.release(handle)
//!  blocking call  ──┘         (last reference)
//! ```
//!
//! Release happens exactly once per wrapper because it lives in `Drop` of
//! the shared object: the runtime's own reference counting is the guard, and
//! no registry-wide lock sits on the release path.

use crate::dispatch::Registration;
use crate::error::{BridgeError, Result};
use crate::foreign::ForeignLibrary;
use crate::handle::{HandleType, RawHandle, INVALID_HANDLE};
use actor_runtime::{ResourceRef, Term};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Wrap/release counters
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    pub wrapped: AtomicU64,
    pub released: AtomicU64,
}

impl RegistryMetrics {
    /// Wrappers created but not yet finalized
    pub fn live(&self) -> u64 {
        let wrapped = self.wrapped.load(Ordering::Acquire);
        let released = self.released.load(Ordering::Acquire);
        wrapped.saturating_sub(released)
    }
}

struct RegistryShared {
    library: Arc<dyn ForeignLibrary>,
    metrics: RegistryMetrics,
}

/// The object a wrapper term points at
pub struct HandleResource {
    kind: HandleType,
    handle: RawHandle,
    closed: AtomicBool,
    registration: Option<Arc<Registration>>,
    owner: Arc<RegistryShared>,
}

impl Drop for HandleResource {
    fn drop(&mut self) {
        self.owner.library.release(self.handle);
        self.owner.metrics.released.fetch_add(1, Ordering::AcqRel);
        debug!(kind = %self.kind, handle = self.handle, "Released foreign handle");
    }
}

/// Cloneable reference to a wrapped handle
#[derive(Clone)]
pub struct Resource(Arc<HandleResource>);

impl Resource {
    pub fn kind(&self) -> HandleType {
        self.0.kind
    }

    /// Raw handle; only valid while this wrapper is alive
    pub fn raw(&self) -> RawHandle {
        self.0.handle
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// Mark closed; true only for the call that performed the transition
    pub fn mark_closed(&self) -> bool {
        !self.0.closed.swap(true, Ordering::AcqRel)
    }

    /// Callback registration attached at creation (subscriptions)
    pub fn registration(&self) -> Option<&Arc<Registration>> {
        self.0.registration.as_ref()
    }

    pub fn to_term(&self) -> Term {
        let object: ResourceRef = self.0.clone();
        Term::Resource(object)
    }

    /// Recover the wrapper from a term, whatever its declared type
    pub fn from_term(term: &Term) -> Result<Self> {
        let object = term.as_resource().ok_or_else(|| {
            BridgeError::invalid_argument(format!("expected a handle resource, got {}", term.type_name()))
        })?;

        Arc::clone(object)
            .downcast::<HandleResource>()
            .map(Resource)
            .map_err(|_| BridgeError::invalid_argument("resource is not a foreign handle"))
    }

    /// True when both wrappers are the same proxy
    pub fn ptr_eq(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Resource> for Term {
    fn from(resource: Resource) -> Self {
        resource.to_term()
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("kind", &self.0.kind)
            .field("handle", &self.0.handle)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Creates wrappers and unwraps them at the call boundary
#[derive(Clone)]
pub struct HandleRegistry {
    shared: Arc<RegistryShared>,
}

impl HandleRegistry {
    pub fn new(library: Arc<dyn ForeignLibrary>) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                library,
                metrics: RegistryMetrics::default(),
            }),
        }
    }

    /// Wrap a freshly minted handle. Zero is rejected and nothing is created.
    pub fn wrap(&self, kind: HandleType, handle: RawHandle) -> Result<Resource> {
        self.create(kind, handle, None)
    }

    /// Wrap a handle that owns a callback registration
    pub fn wrap_registered(
        &self,
        kind: HandleType,
        handle: RawHandle,
        registration: Arc<Registration>,
    ) -> Result<Resource> {
        self.create(kind, handle, Some(registration))
    }

    fn create(
        &self,
        kind: HandleType,
        handle: RawHandle,
        registration: Option<Arc<Registration>>,
    ) -> Result<Resource> {
        if handle == INVALID_HANDLE {
            return Err(BridgeError::invalid_handle(kind, "invalid handle returned"));
        }

        self.shared.metrics.wrapped.fetch_add(1, Ordering::AcqRel);
        debug!(kind = %kind, handle, "Wrapped foreign handle");

        Ok(Resource(Arc::new(HandleResource {
            kind,
            handle,
            closed: AtomicBool::new(false),
            registration,
            owner: Arc::clone(&self.shared),
        })))
    }

    /// Typed wrapper from a term, ignoring the closed flag
    pub fn lookup(&self, term: &Term, expected: HandleType) -> Result<Resource> {
        let resource = Resource::from_term(term)?;
        if resource.kind() != expected {
            return Err(BridgeError::type_mismatch(expected, resource.kind()));
        }
        Ok(resource)
    }

    /// Typed, still-open wrapper from a term
    pub fn resource(&self, term: &Term, expected: HandleType) -> Result<Resource> {
        let resource = self.lookup(term, expected)?;
        if resource.is_closed() {
            return Err(BridgeError::closed(expected));
        }
        Ok(resource)
    }

    /// Raw handle of a typed, still-open wrapper.
    ///
    /// The handle is only guaranteed valid while the term is alive; calls
    /// that outlive the borrow should hold the [`Resource`] instead.
    pub fn unwrap(&self, term: &Term, expected: HandleType) -> Result<RawHandle> {
        self.resource(term, expected).map(|resource| resource.raw())
    }

    pub fn metrics(&self) -> &RegistryMetrics {
        &self.shared.metrics
    }

    pub fn library(&self) -> &Arc<dyn ForeignLibrary> {
        &self.shared.library
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("wrapped", &self.shared.metrics.wrapped.load(Ordering::Relaxed))
            .field("released", &self.shared.metrics.released.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackLibrary;

    fn registry() -> (LoopbackLibrary, HandleRegistry) {
        let library = LoopbackLibrary::new();
        let registry = HandleRegistry::new(Arc::new(library.clone()));
        (library, registry)
    }

    #[test]
    fn test_wrap_zero_rejected() {
        let (_, registry) = registry();

        let err = registry.wrap(HandleType::Host, 0).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHandle { kind: HandleType::Host, .. }));
        assert_eq!(registry.metrics().wrapped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_unwrap_checks_type() {
        let (_, registry) = registry();
        let term = registry.wrap(HandleType::Stream, 41).unwrap().to_term();

        assert_eq!(registry.unwrap(&term, HandleType::Stream).unwrap(), 41);
        assert_eq!(
            registry.unwrap(&term, HandleType::Topic).unwrap_err(),
            BridgeError::type_mismatch(HandleType::Topic, HandleType::Stream)
        );
    }

    #[test]
    fn test_unwrap_non_wrapper() {
        let (_, registry) = registry();

        let err = registry.unwrap(&Term::Int(41), HandleType::Stream).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument { .. }));

        let foreign_resource = Term::resource(Arc::new("not a handle"));
        let err = registry.unwrap(&foreign_resource, HandleType::Stream).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument { .. }));
    }

    #[test]
    fn test_release_on_last_drop() {
        let (library, registry) = registry();
        let resource = registry.wrap(HandleType::Message, 77).unwrap();
        let term = resource.to_term();
        let copy = term.clone();

        drop(resource);
        drop(term);
        assert_eq!(library.release_count(77), 0);

        drop(copy);
        assert_eq!(library.release_count(77), 1);
        assert_eq!(registry.metrics().live(), 0);
    }

    #[test]
    fn test_closed_wrapper() {
        let (_, registry) = registry();
        let resource = registry.wrap(HandleType::Stream, 5).unwrap();
        let term = resource.to_term();

        assert!(resource.mark_closed());
        assert!(!resource.mark_closed());
        assert_eq!(
            registry.unwrap(&term, HandleType::Stream).unwrap_err(),
            BridgeError::closed(HandleType::Stream)
        );
        assert!(registry.lookup(&term, HandleType::Stream).is_ok());
    }
}
