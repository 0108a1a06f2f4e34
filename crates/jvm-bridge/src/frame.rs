//! Local reference frames.
//!
//! Local references are only valid inside the frame that created them and
//! only on the creating thread. Each thread keeps a stack of frame serials;
//! a [`FrameToken`] records the thread and serial a local was created in,
//! so a reference can tell whether its frame has been popped.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use log::warn;

use crate::error::{BridgeError, BridgeResult};
use crate::reference::{ManagedReference, RefScope};
use crate::runtime::ManagedRuntime;
use crate::types::ObjectHandle;

/// Serial for references created outside any tracked frame.
const UNTRACKED: u64 = 0;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// One open frame on the calling thread's stack.
#[derive(Debug, Clone, Copy)]
struct Tracked {
    serial: u64,
    /// False for the bookkeeping-only base frame of an attachment scope.
    runtime: bool,
}

thread_local! {
    static FRAMES: RefCell<Vec<Tracked>> = const { RefCell::new(Vec::new()) };
}

/// Thread and frame a local reference belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken {
    pub(crate) thread: ThreadId,
    pub(crate) serial: u64,
}

impl FrameToken {
    /// Token for the innermost frame on the calling thread.
    pub(crate) fn current() -> Self {
        let serial = FRAMES.with(|f| f.borrow().last().map_or(UNTRACKED, |t| t.serial));
        FrameToken {
            thread: thread::current().id(),
            serial,
        }
    }

    /// Returns true if the token belongs to the calling thread.
    pub(crate) fn is_current_thread(&self) -> bool {
        self.thread == thread::current().id()
    }

    /// Returns true if the frame is still open. Only meaningful on the
    /// owning thread.
    pub(crate) fn is_live(&self) -> bool {
        self.serial == UNTRACKED || FRAMES.with(|f| f.borrow().iter().any(|t| t.serial == self.serial))
    }
}

/// Opens a tracked frame on the calling thread and returns its serial.
/// `runtime` is true when a runtime local frame was pushed with it.
pub(crate) fn push_frame(runtime: bool) -> u64 {
    let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
    FRAMES.with(|f| f.borrow_mut().push(Tracked { serial, runtime }));
    serial
}

/// Closes the frame with `serial` and anything opened above it.
///
/// Returns how many runtime frames that closed, innermost included, or
/// `None` if the frame was already closed by an enclosing one.
pub(crate) fn pop_frame(serial: u64) -> Option<usize> {
    FRAMES.with(|f| {
        let mut frames = f.borrow_mut();
        let pos = frames.iter().rposition(|t| t.serial == serial)?;
        let runtime_frames = frames[pos..].iter().filter(|t| t.runtime).count();
        frames.truncate(pos);
        Some(runtime_frames)
    })
}

fn is_innermost(serial: u64) -> bool {
    FRAMES.with(|f| f.borrow().last().is_some_and(|t| t.serial == serial))
}

#[cfg(test)]
fn depth() -> usize {
    FRAMES.with(|f| f.borrow().len())
}

/// A scoped local reference frame.
///
/// Every local reference created while the frame is open is released when
/// it closes. Use [`LocalFrame::pop_with`] to carry one result out.
pub struct LocalFrame<'env> {
    runtime: Arc<dyn ManagedRuntime>,
    serial: u64,
    closed: bool,
    _env: PhantomData<&'env ()>,
    _not_send: PhantomData<*const ()>,
}

impl<'env> LocalFrame<'env> {
    pub(crate) fn push(runtime: Arc<dyn ManagedRuntime>, capacity: i32) -> BridgeResult<Self> {
        runtime.push_local_frame(capacity)?;
        let serial = push_frame(true);
        Ok(Self {
            runtime,
            serial,
            closed: false,
            _env: PhantomData,
            _not_send: PhantomData,
        })
    }

    /// Closes the frame, keeping `result` alive in the enclosing frame.
    ///
    /// Global and weak references pass through unchanged. A local result
    /// is re-created as a local of the enclosing frame.
    pub fn pop_with(mut self, mut result: ManagedReference) -> BridgeResult<ManagedReference> {
        if result.scope() != RefScope::Local {
            self.close(ObjectHandle::NULL)?;
            return Ok(result);
        }
        let raw = result.get()?;
        if !is_innermost(self.serial) {
            drop(result);
            return Err(BridgeError::invalid_handle(
                "pop_with on a local frame that is not the innermost open frame",
            ));
        }
        // The runtime frees the original handle when the frame pops.
        result.forget();
        let outer = self.close(raw)?;
        Ok(ManagedReference::wrap_nullable(
            self.runtime.clone(),
            outer,
            RefScope::Local,
        ))
    }

    /// Closes the frame, releasing every local created inside it.
    pub fn pop(mut self) -> BridgeResult<()> {
        self.close(ObjectHandle::NULL).map(|_| ())
    }

    /// Frames are strictly nested in the runtime, so closing this one also
    /// closes every frame still open inside it.
    fn close(&mut self, result: ObjectHandle) -> BridgeResult<ObjectHandle> {
        self.closed = true;
        let Some(count) = pop_frame(self.serial) else {
            return Ok(ObjectHandle::NULL);
        };
        if count > 1 {
            warn!(
                "Local frame closed before {} frame(s) nested in it; closing them too",
                count - 1
            );
            for _ in 1..count {
                self.runtime.pop_local_frame(ObjectHandle::NULL)?;
            }
        }
        self.runtime.pop_local_frame(result)
    }
}

impl Drop for LocalFrame<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close(ObjectHandle::NULL) {
                warn!("Failed to pop local frame: {}", e);
            }
        }
    }
}
