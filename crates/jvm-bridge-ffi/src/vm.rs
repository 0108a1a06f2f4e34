//! In-process JVM creation.
//!
//! A native host that is not itself loaded by a JVM can start one with
//! [`create_vm`]. This needs libjvm at link time, so the real implementation
//! is behind the `jvm-link` feature; without it [`create_vm`] fails with
//! [`VmError::LinkDisabled`].

#[cfg(feature = "jvm-link")]
use std::ffi::{c_char, c_void, CString};
#[cfg(feature = "jvm-link")]
use std::ptr;

#[cfg(feature = "jvm-link")]
use jni_sys::{jint, JavaVM, JavaVMInitArgs, JavaVMOption, JNI_OK};
use thiserror::Error;

use jvm_bridge::{BridgeError, JniStatus, JniVersion};

use crate::jni_runtime::JniRuntime;

/// Errors from JVM creation.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("Built without the jvm-link feature; cannot create a JVM")]
    LinkDisabled,

    #[error("Invalid JVM option '{option}': contains a NUL byte")]
    InvalidOption { option: String },

    #[error("JNI_CreateJavaVM failed: {status}")]
    CreateFailed { status: JniStatus },

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Result type for JVM creation.
pub type VmResult<T> = Result<T, VmError>;

/// Options passed to `JNI_CreateJavaVM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JvmOptions {
    version: JniVersion,
    options: Vec<String>,
    ignore_unrecognized: bool,
}

impl Default for JvmOptions {
    fn default() -> Self {
        Self {
            version: JniVersion::V1_8,
            options: Vec::new(),
            ignore_unrecognized: false,
        }
    }
}

impl JvmOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: JniVersion) -> Self {
        self.version = version;
        self
    }

    /// Adds a raw option such as `-Xmx256m` or `-Dkey=value`.
    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Sets `java.class.path` from the given entries.
    pub fn class_path<I, S>(self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let separator = if cfg!(windows) { ";" } else { ":" };
        let joined = entries
            .into_iter()
            .map(|e| e.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(separator);
        self.option(format!("-Djava.class.path={}", joined))
    }

    /// Lets the JVM skip options it does not recognize.
    pub fn ignore_unrecognized(mut self, ignore: bool) -> Self {
        self.ignore_unrecognized = ignore;
        self
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn jni_version(&self) -> JniVersion {
        self.version
    }
}

#[cfg(feature = "jvm-link")]
#[link(name = "jvm")]
extern "system" {
    fn JNI_CreateJavaVM(pvm: *mut *mut JavaVM, penv: *mut *mut c_void, args: *mut c_void) -> jint;
}

/// Creates a JVM in this process. The calling thread comes back attached.
///
/// A process can host at most one JVM, and it cannot be recreated once
/// destroyed.
#[cfg(feature = "jvm-link")]
pub fn create_vm(options: &JvmOptions) -> VmResult<JniRuntime> {
    let strings = options
        .options
        .iter()
        .map(|o| {
            CString::new(o.as_str()).map_err(|_| VmError::InvalidOption { option: o.clone() })
        })
        .collect::<VmResult<Vec<_>>>()?;
    let mut raw: Vec<JavaVMOption> = strings
        .iter()
        .map(|s| JavaVMOption {
            optionString: s.as_ptr() as *mut c_char,
            extraInfo: ptr::null_mut(),
        })
        .collect();
    let mut args = JavaVMInitArgs {
        version: options.version.as_raw(),
        nOptions: raw.len() as jint,
        options: raw.as_mut_ptr(),
        ignoreUnrecognized: crate::jni_runtime::jbool(options.ignore_unrecognized),
    };

    let mut vm: *mut JavaVM = ptr::null_mut();
    let mut env: *mut c_void = ptr::null_mut();
    // SAFETY: `args`, `raw` and `strings` outlive the call.
    let status = unsafe {
        JNI_CreateJavaVM(
            &mut vm,
            &mut env,
            &mut args as *mut JavaVMInitArgs as *mut c_void,
        )
    };
    if status != JNI_OK {
        return Err(VmError::CreateFailed {
            status: JniStatus::from_raw(status),
        });
    }
    log::info!("Created JVM with {} options", options.options.len());
    // SAFETY: the JVM just created lives for the rest of the process.
    Ok(unsafe { JniRuntime::from_raw(vm, options.version) }?)
}

/// Stub implementation when libjvm linking is not enabled.
#[cfg(not(feature = "jvm-link"))]
pub fn create_vm(options: &JvmOptions) -> VmResult<JniRuntime> {
    log::warn!(
        "create_vm called with {} options without jvm-link feature",
        options.options.len()
    );
    Err(VmError::LinkDisabled)
}
