//! Owned handles to managed objects.
//!
//! A [`ManagedReference`] owns exactly one runtime reference and releases
//! it when dropped. Local references are additionally bound to the thread
//! and frame that created them; using one anywhere else is an error rather
//! than undefined behavior.

use std::fmt;
use std::sync::Arc;
use std::thread;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::frame::FrameToken;
use crate::runtime::ManagedRuntime;
use crate::types::ObjectHandle;

/// Lifetime scope of a runtime reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefScope {
    /// Valid on the creating thread until its frame closes.
    Local,
    /// Valid on any thread until released.
    Global,
    /// Does not keep the object alive; may observe collection.
    Weak,
}

impl fmt::Display for RefScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefScope::Local => "local",
            RefScope::Global => "global",
            RefScope::Weak => "weak",
        };
        write!(f, "{}", s)
    }
}

/// An owned reference to a managed object.
///
/// The wrapper may hold null, which is a valid value distinct from a
/// released reference. After [`release`](Self::release) or
/// [`take`](Self::take) every access fails with
/// [`BridgeError::UseAfterRelease`].
pub struct ManagedReference {
    runtime: Arc<dyn ManagedRuntime>,
    /// `None` once released or moved out.
    handle: Option<ObjectHandle>,
    scope: RefScope,
    /// Creating thread and frame, for locals.
    origin: Option<FrameToken>,
}

impl ManagedReference {
    /// Takes ownership of a non-null runtime reference.
    pub fn wrap(
        runtime: Arc<dyn ManagedRuntime>,
        handle: ObjectHandle,
        scope: RefScope,
    ) -> BridgeResult<Self> {
        if handle.is_null() {
            return Err(BridgeError::invalid_handle(format!(
                "cannot wrap a null {} reference",
                scope
            )));
        }
        Ok(Self::wrap_nullable(runtime, handle, scope))
    }

    /// Takes ownership of a runtime reference that may be null.
    pub fn wrap_nullable(
        runtime: Arc<dyn ManagedRuntime>,
        handle: ObjectHandle,
        scope: RefScope,
    ) -> Self {
        let origin = match scope {
            RefScope::Local => Some(FrameToken::current()),
            RefScope::Global | RefScope::Weak => None,
        };
        Self {
            runtime,
            handle: Some(handle),
            scope,
            origin,
        }
    }

    /// A null reference of the given scope.
    pub fn null(runtime: Arc<dyn ManagedRuntime>, scope: RefScope) -> Self {
        Self::wrap_nullable(runtime, ObjectHandle::NULL, scope)
    }

    /// Returns the reference scope.
    pub fn scope(&self) -> RefScope {
        self.scope
    }

    /// Returns the runtime that owns the reference.
    pub fn runtime(&self) -> &Arc<dyn ManagedRuntime> {
        &self.runtime
    }

    /// Returns true once the reference was released or moved out.
    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Returns the raw handle after checking that it may be used here.
    pub fn get(&self) -> BridgeResult<ObjectHandle> {
        let handle = self.handle.ok_or(BridgeError::UseAfterRelease)?;
        if let Some(origin) = &self.origin {
            if !origin.is_current_thread() {
                return Err(BridgeError::CrossThreadReference {
                    owner: format!("{:?}", origin.thread),
                    current: format!("{:?}", thread::current().id()),
                });
            }
            if !origin.is_live() {
                return Err(BridgeError::UseAfterRelease);
            }
        }
        Ok(handle)
    }

    /// Returns true if the reference holds null.
    pub fn is_null(&self) -> BridgeResult<bool> {
        Ok(self.get()?.is_null())
    }

    /// Returns true if a weak reference's object has been collected.
    ///
    /// Local and global references report true only when they hold null.
    pub fn is_collected(&self) -> BridgeResult<bool> {
        let handle = self.get()?;
        if handle.is_null() {
            return Ok(true);
        }
        match self.scope {
            RefScope::Weak => self.runtime.is_same_object(handle, ObjectHandle::NULL),
            RefScope::Local | RefScope::Global => Ok(false),
        }
    }

    /// Returns true if both references denote the same object.
    pub fn is_same(&self, other: &ManagedReference) -> BridgeResult<bool> {
        self.runtime.is_same_object(self.get()?, other.get()?)
    }

    /// Creates an independent reference of `scope` to the same object.
    pub fn new_ref(&self, scope: RefScope) -> BridgeResult<ManagedReference> {
        let handle = self.get()?;
        if handle.is_null() {
            return Ok(Self::null(self.runtime.clone(), scope));
        }
        let created = self.runtime.new_ref(scope, handle)?;
        if created.is_null() {
            if self.scope == RefScope::Weak && self.is_collected()? {
                return Err(BridgeError::invalid_handle(
                    "weak reference target has been collected",
                ));
            }
            return Err(BridgeError::reference_leak(scope, "new reference"));
        }
        Ok(Self::wrap_nullable(self.runtime.clone(), created, scope))
    }

    /// Returns a global reference to the same object.
    pub fn to_global(&self) -> BridgeResult<ManagedReference> {
        self.new_ref(RefScope::Global)
    }

    /// Returns a weak reference to the same object.
    pub fn to_weak(&self) -> BridgeResult<ManagedReference> {
        self.new_ref(RefScope::Weak)
    }

    /// Returns a local reference to the same object, bound to the calling
    /// thread's current frame.
    pub fn to_local(&self) -> BridgeResult<ManagedReference> {
        self.new_ref(RefScope::Local)
    }

    /// Duplicates the reference with the same scope.
    pub fn try_clone(&self) -> BridgeResult<ManagedReference> {
        self.new_ref(self.scope)
    }

    /// Converts this reference in place to `scope`, releasing the old one.
    ///
    /// Promoting to global makes the reference usable from any thread.
    pub fn promote(&mut self, scope: RefScope) -> BridgeResult<()> {
        if scope == self.scope {
            self.get()?;
            return Ok(());
        }
        let mut promoted = self.new_ref(scope)?;
        self.release()?;
        self.handle = promoted.handle.take();
        self.scope = promoted.scope;
        self.origin = promoted.origin;
        Ok(())
    }

    /// Moves ownership into a new wrapper, leaving this one released.
    pub fn take(&mut self) -> ManagedReference {
        ManagedReference {
            runtime: self.runtime.clone(),
            handle: self.handle.take(),
            scope: self.scope,
            origin: self.origin,
        }
    }

    /// Releases the reference now. Further access fails.
    pub fn release(&mut self) -> BridgeResult<()> {
        let handle = self.get()?;
        self.handle = None;
        if handle.is_null() {
            return Ok(());
        }
        self.runtime.delete_ref(self.scope, handle)
    }

    /// Gives up ownership and returns the raw handle. The caller becomes
    /// responsible for releasing it, typically by returning it to the
    /// runtime from an exported native.
    pub fn into_raw(mut self) -> BridgeResult<ObjectHandle> {
        let handle = self.get()?;
        self.handle = None;
        Ok(handle)
    }

    /// Drops ownership without deleting the runtime reference.
    pub(crate) fn forget(&mut self) {
        self.handle = None;
    }

    fn release_on_drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.is_null() {
            return;
        }
        if let Some(origin) = &self.origin {
            if !origin.is_current_thread() {
                warn!(
                    "Local reference {} dropped on a foreign thread; left to its frame",
                    handle
                );
                return;
            }
            if !origin.is_live() {
                // Already freed by the runtime when the frame closed.
                return;
            }
        }
        if let Err(e) = self.runtime.delete_ref(self.scope, handle) {
            debug!("Failed to release {} reference {}: {}", self.scope, handle, e);
        }
    }
}

impl Drop for ManagedReference {
    fn drop(&mut self) {
        self.release_on_drop();
    }
}

/// Identity comparison. A reference that cannot be compared (released,
/// or a local used off its thread) is unequal to everything.
impl PartialEq for ManagedReference {
    fn eq(&self, other: &Self) -> bool {
        match self.is_same(other) {
            Ok(same) => same,
            Err(e) => {
                warn!("Cannot compare {:?} with {:?}: {}", self, other, e);
                false
            }
        }
    }
}

impl fmt::Debug for ManagedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ManagedReference");
        match self.handle {
            Some(h) => s.field("handle", &h),
            None => s.field("handle", &"<released>"),
        };
        s.field("scope", &self.scope).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRuntime;

    fn runtime() -> Arc<SimRuntime> {
        let sim = Arc::new(SimRuntime::new());
        sim.attach_current_thread(None).unwrap();
        sim
    }

    fn new_local(sim: &Arc<SimRuntime>, text: &str) -> ManagedReference {
        let handle = sim.new_string(text).unwrap();
        ManagedReference::wrap(sim.clone(), handle, RefScope::Local).unwrap()
    }

    #[test]
    fn test_wrap_rejects_null() {
        let sim = runtime();
        let err = ManagedReference::wrap(sim.clone(), ObjectHandle::NULL, RefScope::Global)
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHandle { .. }));
        let null = ManagedReference::null(sim, RefScope::Global);
        assert!(null.is_null().unwrap());
    }

    #[test]
    fn test_release_then_use_fails() {
        let sim = runtime();
        let mut r = new_local(&sim, "x");
        r.release().unwrap();
        assert!(r.is_released());
        assert!(matches!(r.get(), Err(BridgeError::UseAfterRelease)));
        assert!(matches!(r.release(), Err(BridgeError::UseAfterRelease)));
    }

    #[test]
    fn test_take_moves_ownership() {
        let sim = runtime();
        let mut a = new_local(&sim, "x");
        let b = a.take();
        assert!(matches!(a.get(), Err(BridgeError::UseAfterRelease)));
        assert!(!b.is_null().unwrap());
        drop(a);
        assert_eq!(sim.stats().live_locals, 1);
        drop(b);
        assert_eq!(sim.stats().live_locals, 0);
    }

    #[test]
    fn test_drop_releases_global() {
        let sim = runtime();
        let local = new_local(&sim, "x");
        let global = local.to_global().unwrap();
        assert_eq!(sim.stats().live_globals, 1);
        assert!(global.is_same(&local).unwrap());
        drop(global);
        assert_eq!(sim.stats().live_globals, 0);
    }

    #[test]
    fn test_promote_keeps_identity() {
        let sim = runtime();
        let mut r = new_local(&sim, "x");
        let copy = r.try_clone().unwrap();
        r.promote(RefScope::Global).unwrap();
        assert_eq!(r.scope(), RefScope::Global);
        assert!(r.is_same(&copy).unwrap());
        assert_eq!(sim.stats().live_locals, 1);
    }

    #[test]
    fn test_weak_observes_collection() {
        let sim = runtime();
        let mut local = new_local(&sim, "short-lived");
        let weak = local.to_weak().unwrap();
        assert!(!weak.is_collected().unwrap());

        local.release().unwrap();
        sim.collect_garbage();
        assert!(weak.is_collected().unwrap());
        assert!(matches!(
            weak.to_global(),
            Err(BridgeError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_equality_is_identity() {
        let sim = runtime();
        let a = new_local(&sim, "same");
        let global = a.to_global().unwrap();
        let other = new_local(&sim, "same");
        assert!(a == global);
        assert!(a != other);

        let mut released = a.try_clone().unwrap();
        released.release().unwrap();
        // Not comparable, so unequal; the failure is logged, not raised.
        assert!(released != a);
        assert_eq!(sim.stats().invalid_handle_uses, 0);
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(RefScope::Local.to_string(), "local");
        assert_eq!(RefScope::Weak.to_string(), "weak");
    }
}
