//! Translation of pending managed exceptions.
//!
//! After every boundary call the pending-exception flag is checked. If set,
//! the exception is cleared first (so later runtime calls are legal), then
//! described through reflection into a [`ManagedException`] carrying its
//! class, message and cause chain with stack frames.

use std::fmt;
use std::sync::Arc;

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::error::BridgeResult;
use crate::reference::RefScope;
use crate::runtime::{InvokeTarget, ManagedRuntime};
use crate::signature::{internal_to_class_name, ValueKind};
use crate::types::ObjectHandle;
use crate::value::BoundaryValue;

/// Upper bound on causes walked, guarding against cyclic chains.
const MAX_CAUSE_DEPTH: usize = 16;

/// Local capacity reserved while describing an exception.
const DESCRIBE_FRAME_CAPACITY: i32 = 32;

/// One link of an exception's cause chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExceptionCause {
    /// Dotted class name of the throwable.
    pub class_name: String,
    /// Message, empty if the throwable had none.
    pub message: String,
    /// Stack frames, innermost first.
    pub frames: Vec<String>,
}

/// A managed exception converted into native form.
///
/// `causes[0]` describes the thrown exception itself, followed by its
/// causes in order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManagedException {
    /// Dotted class name of the thrown exception.
    pub class_name: String,
    /// Exception message, empty if none.
    pub message: String,
    /// The exception followed by its causes.
    pub causes: Vec<ExceptionCause>,
}

impl ManagedException {
    /// Creates an exception with no recorded stack.
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        let class_name = class_name.into();
        let message = message.into();
        Self {
            causes: vec![ExceptionCause {
                class_name: class_name.clone(),
                message: message.clone(),
                frames: Vec::new(),
            }],
            class_name,
            message,
        }
    }

    /// Returns the innermost cause (the exception itself if it has none).
    pub fn root_cause(&self) -> Option<&ExceptionCause> {
        self.causes.last()
    }

    /// Returns true if the exception or any cause has this dotted class name.
    pub fn is_caused_by(&self, class_name: &str) -> bool {
        self.causes.iter().any(|c| c.class_name == class_name)
    }

    /// Formats the chain the way the runtime prints a stack trace.
    pub fn stack_trace(&self) -> String {
        let mut out = String::new();
        for (i, cause) in self.causes.iter().enumerate() {
            if i > 0 {
                out.push_str("Caused by: ");
            }
            out.push_str(&cause.class_name);
            if !cause.message.is_empty() {
                out.push_str(": ");
                out.push_str(&cause.message);
            }
            out.push('\n');
            for frame in &cause.frames {
                out.push_str("\tat ");
                out.push_str(frame);
                out.push('\n');
            }
        }
        out
    }
}

impl fmt::Display for ManagedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.class_name)
        } else {
            write!(f, "{}: {}", self.class_name, self.message)
        }
    }
}

/// Hook invoked for every translated exception.
pub trait ExceptionReporter: Send + Sync {
    fn report(&self, exception: &ManagedException);
}

/// Checks for a pending exception and translates it.
///
/// Returns `Ok(())` if nothing is pending. Otherwise the exception is
/// cleared, logged at error level with its cause chain, passed to
/// `reporter`, and returned as [`BridgeError::ManagedRuntime`].
pub(crate) fn check(
    runtime: &Arc<dyn ManagedRuntime>,
    reporter: Option<&Arc<dyn ExceptionReporter>>,
) -> BridgeResult<()> {
    match take_pending(runtime)? {
        None => Ok(()),
        Some(exception) => {
            error!("Managed exception crossed the boundary: {}", exception.stack_trace().trim_end());
            if let Some(reporter) = reporter {
                reporter.report(&exception);
            }
            Err(exception.into())
        }
    }
}

/// Clears and describes the pending exception, if any.
///
/// Description holds only a few locals at a time, so when the runtime
/// cannot reserve a frame it runs without one and cleans up as it goes.
pub(crate) fn take_pending(
    runtime: &Arc<dyn ManagedRuntime>,
) -> BridgeResult<Option<ManagedException>> {
    if !runtime.exception_check()? {
        return Ok(None);
    }
    let framed = match runtime.push_local_frame(DESCRIBE_FRAME_CAPACITY) {
        Ok(()) => true,
        Err(e) => {
            debug!("Describing exception without a local frame: {}", e);
            false
        }
    };
    let throwable = runtime.exception_occurred();
    // Clear before any reflection call; calls with a pending exception are illegal.
    let cleared = runtime.exception_clear();
    let described = match (throwable, cleared) {
        (Ok(throwable), Ok(())) => {
            let exception = describe(runtime.as_ref(), throwable);
            if !framed {
                delete_local(runtime.as_ref(), throwable);
            }
            Ok(exception)
        }
        (Ok(throwable), Err(e)) => {
            if !framed {
                delete_local(runtime.as_ref(), throwable);
            }
            Err(e)
        }
        (Err(e), _) => Err(e),
    };
    if framed {
        runtime.pop_local_frame(ObjectHandle::NULL)?;
    }
    described.map(Some)
}

/// Builds the native description of `throwable` through reflection.
///
/// Reflection failures degrade to placeholder text instead of erroring; the
/// original exception is what the caller needs to see.
fn describe(runtime: &dyn ManagedRuntime, throwable: ObjectHandle) -> ManagedException {
    let mut causes = Vec::new();
    let mut current = throwable;
    while !current.is_null() && causes.len() < MAX_CAUSE_DEPTH {
        causes.push(ExceptionCause {
            class_name: class_name_of(runtime, current)
                .unwrap_or_else(|| "<unknown exception>".to_string()),
            message: string_call(runtime, current, "getMessage").unwrap_or_default(),
            frames: stack_frames(runtime, current),
        });
        let next = object_call(
            runtime,
            current,
            "getCause",
            "()Ljava/lang/Throwable;",
        )
        .unwrap_or(ObjectHandle::NULL);
        let last = next.is_null() || runtime.is_same_object(next, current).unwrap_or(true);
        if current != throwable {
            delete_local(runtime, current);
        }
        if last {
            delete_local(runtime, next);
            break;
        }
        current = next;
    }
    let (class_name, message) = causes
        .first()
        .map(|c| (c.class_name.clone(), c.message.clone()))
        .unwrap_or_default();
    ManagedException {
        class_name,
        message,
        causes,
    }
}

/// Clears a failed reflection step so the next step is legal.
fn swallow(runtime: &dyn ManagedRuntime, step: &str) -> bool {
    match runtime.exception_check() {
        Ok(true) => {
            debug!("Reflection step '{}' threw while describing an exception", step);
            let _ = runtime.exception_clear();
            true
        }
        Ok(false) => false,
        Err(_) => true,
    }
}

fn delete_local(runtime: &dyn ManagedRuntime, handle: ObjectHandle) {
    if !handle.is_null() {
        let _ = runtime.delete_ref(RefScope::Local, handle);
    }
}

fn object_call(
    runtime: &dyn ManagedRuntime,
    target: ObjectHandle,
    name: &str,
    signature: &str,
) -> Option<ObjectHandle> {
    let class = runtime.get_object_class(target).ok()?;
    if class.is_null() {
        swallow(runtime, name);
        return None;
    }
    let method = runtime.method_id(class, name, signature, false);
    delete_local(runtime, class);
    let method = match method {
        Ok(m) if !m.is_null() => m,
        _ => {
            swallow(runtime, name);
            return None;
        }
    };
    let value = runtime
        .call_method(InvokeTarget::Instance(target), method, ValueKind::Object, &[])
        .ok();
    if swallow(runtime, name) {
        return None;
    }
    match value {
        Some(BoundaryValue::Object(h)) if !h.is_null() => Some(h),
        _ => None,
    }
}

/// Calls a string-returning method and releases the returned local.
fn string_call(runtime: &dyn ManagedRuntime, target: ObjectHandle, name: &str) -> Option<String> {
    let s = object_call(runtime, target, name, "()Ljava/lang/String;")?;
    let text = runtime.string_value(s);
    if text.is_err() {
        swallow(runtime, name);
    }
    delete_local(runtime, s);
    text.ok()
}

fn class_name_of(runtime: &dyn ManagedRuntime, object: ObjectHandle) -> Option<String> {
    let class = runtime.get_object_class(object).ok()?;
    if class.is_null() {
        swallow(runtime, "getClass");
        return None;
    }
    let name = string_call(runtime, class, "getName");
    delete_local(runtime, class);
    name.map(|n| internal_to_class_name(&n))
}

/// Every element is released before the next is fetched, so deep traces
/// need no more locals than shallow ones.
fn stack_frames(runtime: &dyn ManagedRuntime, throwable: ObjectHandle) -> Vec<String> {
    let Some(trace) = object_call(
        runtime,
        throwable,
        "getStackTrace",
        "()[Ljava/lang/StackTraceElement;",
    ) else {
        return Vec::new();
    };
    let len = runtime.array_length(trace).unwrap_or(0);
    let mut frames = Vec::with_capacity(len.max(0) as usize);
    for i in 0..len {
        let element = match runtime.object_array_element(trace, i) {
            Ok(e) if !e.is_null() => e,
            _ => {
                swallow(runtime, "getStackTrace");
                break;
            }
        };
        if let Some(text) = string_call(runtime, element, "toString") {
            frames.push(text);
        }
        delete_local(runtime, element);
    }
    delete_local(runtime, trace);
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ManagedException {
        ManagedException {
            class_name: "java.lang.IllegalStateException".to_string(),
            message: "outer".to_string(),
            causes: vec![
                ExceptionCause {
                    class_name: "java.lang.IllegalStateException".to_string(),
                    message: "outer".to_string(),
                    frames: vec!["com.example.A.run(A.java:10)".to_string()],
                },
                ExceptionCause {
                    class_name: "java.io.IOException".to_string(),
                    message: String::new(),
                    frames: vec!["com.example.B.read(B.java:3)".to_string()],
                },
            ],
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            sample().to_string(),
            "java.lang.IllegalStateException: outer"
        );
        assert_eq!(
            ManagedException::new("java.lang.NullPointerException", "").to_string(),
            "java.lang.NullPointerException"
        );
    }

    #[test]
    fn test_stack_trace_format() {
        assert_eq!(
            sample().stack_trace(),
            "java.lang.IllegalStateException: outer\n\
             \tat com.example.A.run(A.java:10)\n\
             Caused by: java.io.IOException\n\
             \tat com.example.B.read(B.java:3)\n"
        );
    }

    #[test]
    fn test_cause_queries() {
        let e = sample();
        assert!(e.is_caused_by("java.io.IOException"));
        assert!(!e.is_caused_by("java.lang.Error"));
        assert_eq!(
            e.root_cause().map(|c| c.class_name.as_str()),
            Some("java.io.IOException")
        );
    }
}
