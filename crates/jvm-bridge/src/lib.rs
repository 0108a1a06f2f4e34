//! Safe native/managed interop for JVM-style runtimes.
//!
//! This crate wraps a managed runtime's native interface so that native
//! code can hold managed objects, call managed methods and fields, and
//! export native functions back to managed code without the usual
//! hazards: leaked or dangling references, unchecked pending exceptions,
//! mismatched signatures and calls from unattached threads.
//!
//! # Architecture
//!
//! - [`reference`]: scoped, RAII [`ManagedReference`]s (local, global, weak)
//! - [`signature`] and [`value`]: type descriptors and argument marshaling
//! - [`resolver`]: class and member lookup, memoized per bridge
//! - [`member`]: typed call sites built on the resolver
//! - [`exception`]: translation of pending managed exceptions
//! - [`attach`]: thread attachment scopes
//! - [`export`]: native method registration and the singleton registry
//! - [`runtime`]: the [`ManagedRuntime`] seam every operation goes through
//! - [`sim`]: an in-process runtime for tests and embedding
//!
//! The JNI backend and the library entry points live in `jvm-bridge-ffi`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use jvm_bridge::sim::{SimClass, SimRuntime, SimValue};
//! use jvm_bridge::{Arg, Bridge, BridgeConfig};
//!
//! let sim = Arc::new(SimRuntime::new());
//! sim.define_class(SimClass::new("com.example.Calc").static_method(
//!     "add",
//!     "(II)I",
//!     |_, args| Ok(SimValue::Int(args[0].int()? + args[1].int()?)),
//! ));
//!
//! let bridge = Bridge::new(sim, BridgeConfig::default());
//! let sum: i32 = bridge
//!     .with_attached_thread(|env| {
//!         env.call_static("com.example.Calc", "add", "(II)I", &[Arg::Int(40), Arg::Int(2)])
//!     })
//!     .unwrap();
//! assert_eq!(sum, 42);
//! ```

pub mod attach;
pub mod boxed;
pub mod bridge;
pub mod config;
pub mod env;
pub mod error;
pub mod exception;
pub mod export;
pub mod frame;
mod invoke;
pub mod logging;
pub mod member;
pub mod reference;
pub mod resolver;
pub mod runtime;
pub mod signature;
pub mod sim;
pub mod status;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use attach::AttachOrigin;
pub use boxed::BoxedPrimitive;
pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use env::Env;
pub use error::{BridgeError, BridgeResult};
pub use exception::{ExceptionCause, ExceptionReporter, ManagedException};
pub use export::{ExportTable, ExportTableBuilder, ManagedSingletons, NativeFn, NativeMethod};
pub use frame::{FrameToken, LocalFrame};
pub use logging::{LogLevel, LogSink};
pub use member::{Constructor, InstanceField, InstanceMethod, StaticField, StaticMethod};
pub use reference::{ManagedReference, RefScope};
pub use resolver::{ExportPolicy, MemberDescriptor, MemberKey, MemberKind, MemberResolver};
pub use runtime::{InvokeTarget, ManagedRuntime, MemberHandle};
pub use signature::{JavaType, MethodSignature, ValueKind};
pub use status::{JniStatus, JniVersion};
pub use types::{FieldId, MethodId, ObjectHandle};
pub use value::{Arg, BoundaryValue, FromManaged};
