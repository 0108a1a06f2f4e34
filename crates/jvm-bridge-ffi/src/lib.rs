//! JNI backend for `jvm-bridge`.
//!
//! This crate connects the runtime-agnostic core to a real JVM:
//!
//! - [`JniRuntime`] implements [`jvm_bridge::ManagedRuntime`] over the JNI
//!   function tables.
//! - `JNI_OnLoad` builds the process-wide bridge when the JVM loads this
//!   library, and the native methods of the support class are bound there.
//! - [`create_vm`] starts a JVM inside a native process. It needs libjvm at
//!   link time and is only functional with the `jvm-link` feature.
//!
//! ```text
//! System.loadLibrary("jvm_bridge_ffi")
//!     -> JNI_OnLoad(vm)
//!         -> JniRuntime::from_raw(vm)
//!         -> Bridge::on_load(runtime, config, support_exports)
//! ```
//!
//! # Safety
//!
//! Every entry point uses the `extern "system"` ABI. Pointers received from
//! the JVM are checked for null before use, strings cross in modified UTF-8,
//! and no panic is allowed to unwind into the JVM.

mod exports;
mod jni_runtime;
mod vm;

pub use exports::*;
pub use jni_runtime::JniRuntime;
pub use vm::{create_vm, JvmOptions, VmError, VmResult};
