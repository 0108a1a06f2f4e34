//! Thread attachment.
//!
//! A native thread must be attached to the runtime before it can make any
//! call. [`Bridge::with_attached_thread`] attaches on entry and detaches on
//! exit, but only if it did the attaching: nested scopes and threads the
//! runtime attached itself are left alone.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::bridge::Bridge;
use crate::env::Env;
use crate::error::{BridgeError, BridgeResult};
use crate::frame;
use crate::runtime::ManagedRuntime;

/// Who attached the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOrigin {
    /// The bridge attached it and will detach it.
    Bridge,
    /// The runtime owns the attachment (a managed thread, or one attached
    /// outside the bridge). Never detached here.
    Runtime,
}

thread_local! {
    // One entry per open attachment scope: (bridge identity, origin).
    static SCOPES: RefCell<Vec<(usize, AttachOrigin)>> = const { RefCell::new(Vec::new()) };
}

fn bridge_id(bridge: &Bridge) -> usize {
    bridge as *const Bridge as usize
}

/// Bookkeeping for one attachment scope, undone on drop.
struct AttachScope {
    id: usize,
    runtime: Arc<dyn ManagedRuntime>,
    base_frame: Option<u64>,
    detach: bool,
}

impl AttachScope {
    fn enter(bridge: &Bridge, origin: AttachOrigin, track_frame: bool) -> Self {
        let id = bridge_id(bridge);
        SCOPES.with(|s| s.borrow_mut().push((id, origin)));
        Self {
            id,
            runtime: bridge.runtime().clone(),
            base_frame: track_frame.then(|| frame::push_frame(false)),
            detach: origin == AttachOrigin::Bridge,
        }
    }
}

impl Drop for AttachScope {
    fn drop(&mut self) {
        if let Some(serial) = self.base_frame {
            frame::pop_frame(serial);
        }
        SCOPES.with(|s| {
            let mut scopes = s.borrow_mut();
            if let Some(pos) = scopes.iter().rposition(|(id, _)| *id == self.id) {
                scopes.remove(pos);
            }
        });
        if self.detach {
            match self.runtime.detach_current_thread() {
                Ok(()) => debug!("Detached thread {:?}", thread::current().name()),
                Err(e) => warn!("Failed to detach thread: {}", e),
            }
        }
    }
}

impl Bridge {
    /// Returns how the current thread is attached through this bridge, if
    /// an attachment scope is open.
    pub fn attach_origin(&self) -> Option<AttachOrigin> {
        let id = bridge_id(self);
        SCOPES.with(|s| {
            s.borrow()
                .iter()
                .rev()
                .find(|(scope_id, _)| *scope_id == id)
                .map(|(_, origin)| *origin)
        })
    }

    /// Returns true if the current thread may call into the runtime.
    pub fn is_current_thread_attached(&self) -> BridgeResult<bool> {
        if self.attach_origin().is_some() {
            return Ok(true);
        }
        self.runtime().is_thread_attached()
    }

    /// Runs `f` with the current thread attached.
    ///
    /// Attaches first if needed and detaches afterwards only in that case.
    /// Fails with [`BridgeError::Attachment`] if the runtime refuses.
    pub fn with_attached_thread<R>(
        &self,
        f: impl FnOnce(&Env<'_>) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        if self.attach_origin().is_some() {
            return f(&Env::new(self));
        }
        if self.runtime().is_thread_attached()? {
            let _scope = AttachScope::enter(self, AttachOrigin::Runtime, false);
            return f(&Env::new(self));
        }

        let current = thread::current();
        let name = current.name();
        self.runtime()
            .attach_current_thread(name)
            .map_err(|e| match e {
                BridgeError::Attachment { .. } => e,
                other => BridgeError::attachment(other.to_string()),
            })?;
        debug!("Attached thread {:?}", name);
        let _scope = AttachScope::enter(self, AttachOrigin::Bridge, true);
        f(&Env::new(self))
    }

    /// Runs `f` for a native method invoked by managed code. The runtime
    /// owns the attachment and frees the method's locals when it returns.
    pub fn enter_from_managed<R>(&self, f: impl FnOnce(&Env<'_>) -> R) -> R {
        let _scope = AttachScope::enter(self, AttachOrigin::Runtime, true);
        f(&Env::new(self))
    }

    /// Returns an interface handle for a thread that is already attached.
    pub fn attached_env(&self) -> BridgeResult<Env<'_>> {
        if self.is_current_thread_attached()? {
            Ok(Env::new(self))
        } else {
            Err(BridgeError::attachment("current thread is not attached"))
        }
    }

    /// Spawns a named native thread that runs `f` attached.
    pub fn spawn<F, R>(self: &Arc<Self>, name: &str, f: F) -> BridgeResult<JoinHandle<BridgeResult<R>>>
    where
        F: FnOnce(&Env<'_>) -> BridgeResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let bridge = Arc::clone(self);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || bridge.with_attached_thread(f))
            .map_err(|e| BridgeError::attachment(format!("failed to spawn {}: {}", name, e)))
    }
}
