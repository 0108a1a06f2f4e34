//! Error types for boundary operations.
//!
//! Every failure the bridge can report is a variant of [`BridgeError`].
//! None of them are swallowed: operations return them to the immediate
//! caller, and translated managed exceptions always correspond to a
//! pending-exception state that has already been cleared.

use thiserror::Error;

use crate::exception::ManagedException;
use crate::reference::RefScope;
use crate::status::JniStatus;

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while crossing the native/managed boundary.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// A null handle was supplied where a live object was required.
    #[error("Invalid handle: {context}")]
    InvalidHandle {
        /// What the handle was being used for.
        context: String,
    },

    /// The reference was released or moved out before use.
    #[error("Managed reference used after release")]
    UseAfterRelease,

    /// The runtime could not allocate a reference of the requested scope.
    #[error("Failed to allocate {scope} reference: {context}")]
    ReferenceLeak {
        /// Scope that could not be allocated.
        scope: RefScope,
        /// Operation that needed the reference.
        context: String,
    },

    /// A native value did not match the expected boundary type.
    #[error("Type mismatch at {location}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Where the mismatch occurred ("argument 1", "return value").
        location: String,
        /// Expected type descriptor.
        expected: String,
        /// Supplied type descriptor.
        found: String,
    },

    /// Argument count does not match the member signature.
    #[error("Arity mismatch calling {member}: expected {expected} arguments, found {found}")]
    Arity {
        /// The member being called.
        member: String,
        /// Parameter count from the signature.
        expected: usize,
        /// Supplied argument count.
        found: usize,
    },

    /// The class could not be located by the runtime.
    #[error("Class not found: {class}")]
    ClassNotFound {
        /// Dotted class name.
        class: String,
    },

    /// The runtime has no member with this name and signature.
    #[error("Member not found: {class}.{name}{signature}")]
    MemberNotFound {
        /// Dotted owner class name.
        class: String,
        /// Member name.
        name: String,
        /// Type signature used for the lookup.
        signature: String,
    },

    /// The member exists but its package requires an export marker it lacks.
    #[error("Member {class}.{name} is not exported to native code")]
    MemberNotExported {
        /// Dotted owner class name.
        class: String,
        /// Member name.
        name: String,
    },

    /// A type signature could not be parsed.
    #[error("Invalid signature '{signature}': {message}")]
    InvalidSignature {
        /// The offending signature text.
        signature: String,
        /// Parse error description.
        message: String,
    },

    /// A managed exception was pending after a boundary call.
    #[error("Managed exception: {0}")]
    ManagedRuntime(Box<ManagedException>),

    /// The runtime refused to attach the current thread, or the thread is
    /// not attached when it must be.
    #[error("Thread attachment failed: {message}")]
    Attachment {
        /// Error message.
        message: String,
    },

    /// A local reference was used from a thread other than its creator.
    #[error("Local reference created on thread {owner} used from thread {current}")]
    CrossThreadReference {
        /// Debug name of the owning thread.
        owner: String,
        /// Debug name of the offending thread.
        current: String,
    },

    /// The module load entry point has not completed.
    #[error("Bridge not loaded")]
    NotLoaded,

    /// The module load entry point already ran.
    #[error("Bridge already loaded")]
    AlreadyLoaded,

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    Config {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// The runtime returned a failing status code.
    #[error("Runtime call failed: {status}")]
    Status {
        /// The status code.
        status: JniStatus,
    },
}

impl BridgeError {
    /// Creates an invalid handle error.
    pub fn invalid_handle(context: impl Into<String>) -> Self {
        BridgeError::InvalidHandle {
            context: context.into(),
        }
    }

    /// Creates a reference allocation error.
    pub fn reference_leak(scope: RefScope, context: impl Into<String>) -> Self {
        BridgeError::ReferenceLeak {
            scope,
            context: context.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(
        location: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        BridgeError::TypeMismatch {
            location: location.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a member not found error.
    pub fn member_not_found(
        class: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        BridgeError::MemberNotFound {
            class: class.into(),
            name: name.into(),
            signature: signature.into(),
        }
    }

    /// Creates a signature parse error.
    pub fn invalid_signature(signature: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::InvalidSignature {
            signature: signature.into(),
            message: message.into(),
        }
    }

    /// Creates an attachment error.
    pub fn attachment(message: impl Into<String>) -> Self {
        BridgeError::Attachment {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the translated managed exception, if this is one.
    pub fn managed_exception(&self) -> Option<&ManagedException> {
        match self {
            BridgeError::ManagedRuntime(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if this error came from resource exhaustion and the
    /// operation may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::ReferenceLeak { .. }
                | BridgeError::Status {
                    status: JniStatus::NoMemory
                }
        )
    }
}

impl From<ManagedException> for BridgeError {
    fn from(e: ManagedException) -> Self {
        BridgeError::ManagedRuntime(Box::new(e))
    }
}
