//! The boundary seam.
//!
//! [`ManagedRuntime`] lists every primitive operation the bridge performs on
//! the managed side. The JNI backend lives in `jvm-bridge-ffi`; the
//! simulated runtime in [`crate::sim`] implements the same trait in process.
//!
//! Operations mirror the runtime's own rules: they act on the calling
//! thread, a failing managed operation returns a null/zero value and leaves
//! a pending exception, and nothing here checks for that exception. The
//! layers above (see [`crate::exception`]) are responsible for the check.

use crate::error::BridgeResult;
use crate::export::NativeMethod;
use crate::reference::RefScope;
use crate::signature::ValueKind;
use crate::types::{FieldId, MethodId, ObjectHandle};
use crate::value::BoundaryValue;

/// Receiver of a method call or field access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeTarget {
    /// An object instance.
    Instance(ObjectHandle),
    /// A class object, for static members.
    Static(ObjectHandle),
}

/// A resolved member identifier, for export-marker queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberHandle {
    Method(MethodId),
    Field(FieldId),
}

/// Primitive operations of a managed runtime.
///
/// Implementations must be usable from any thread; each call acts on the
/// calling thread's interface pointer.
pub trait ManagedRuntime: Send + Sync {
    /// Short backend name used in diagnostics.
    fn name(&self) -> &str;

    // ---- threads -------------------------------------------------------

    /// Returns true if the calling thread already has an interface pointer.
    fn is_thread_attached(&self) -> BridgeResult<bool>;

    /// Attaches the calling thread.
    fn attach_current_thread(&self, thread_name: Option<&str>) -> BridgeResult<()>;

    /// Detaches the calling thread.
    fn detach_current_thread(&self) -> BridgeResult<()>;

    // ---- classes and members ---------------------------------------------

    /// Looks up a class by slash-delimited internal name. Returns a local
    /// reference, or null with a pending exception.
    fn find_class(&self, internal_name: &str) -> BridgeResult<ObjectHandle>;

    /// Returns a local reference to the class of `object`.
    fn get_object_class(&self, object: ObjectHandle) -> BridgeResult<ObjectHandle>;

    /// Looks up a method or constructor. Null with a pending exception if absent.
    fn method_id(
        &self,
        class: ObjectHandle,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> BridgeResult<MethodId>;

    /// Looks up a field. Null with a pending exception if absent.
    fn field_id(
        &self,
        class: ObjectHandle,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> BridgeResult<FieldId>;

    /// Returns true if the member or its declaring class carries the
    /// runtime's export marker.
    fn has_export_marker(
        &self,
        class: ObjectHandle,
        member: MemberHandle,
        is_static: bool,
    ) -> BridgeResult<bool>;

    // ---- invocation ------------------------------------------------------

    /// Calls a method, returning a value of `ret`'s kind.
    fn call_method(
        &self,
        target: InvokeTarget,
        method: MethodId,
        ret: ValueKind,
        args: &[BoundaryValue],
    ) -> BridgeResult<BoundaryValue>;

    /// Allocates an object and runs the constructor. Returns a local reference.
    fn new_object(
        &self,
        class: ObjectHandle,
        constructor: MethodId,
        args: &[BoundaryValue],
    ) -> BridgeResult<ObjectHandle>;

    /// Reads a field of `kind`.
    fn get_field(
        &self,
        target: InvokeTarget,
        field: FieldId,
        kind: ValueKind,
    ) -> BridgeResult<BoundaryValue>;

    /// Writes a field.
    fn set_field(&self, target: InvokeTarget, field: FieldId, value: BoundaryValue)
        -> BridgeResult<()>;

    // ---- references ------------------------------------------------------

    /// Creates a new reference of `scope` to the object behind `object`.
    /// Null if `object` is null, a collected weak referent, or the runtime
    /// is out of memory.
    fn new_ref(&self, scope: RefScope, object: ObjectHandle) -> BridgeResult<ObjectHandle>;

    /// Releases a reference of the given scope.
    fn delete_ref(&self, scope: RefScope, object: ObjectHandle) -> BridgeResult<()>;

    /// Compares object identity. Null equals a collected weak referent.
    fn is_same_object(&self, a: ObjectHandle, b: ObjectHandle) -> BridgeResult<bool>;

    /// Opens a local reference frame with room for `capacity` references.
    fn push_local_frame(&self, capacity: i32) -> BridgeResult<()>;

    /// Closes the innermost local frame, returning `result` as a local
    /// reference valid in the enclosing frame.
    fn pop_local_frame(&self, result: ObjectHandle) -> BridgeResult<ObjectHandle>;

    // ---- strings and arrays ----------------------------------------------

    /// Encodes a string. Returns a local reference.
    fn new_string(&self, value: &str) -> BridgeResult<ObjectHandle>;

    /// Decodes a string object.
    fn string_value(&self, string: ObjectHandle) -> BridgeResult<String>;

    /// Returns the length of an array.
    fn array_length(&self, array: ObjectHandle) -> BridgeResult<i32>;

    /// Returns one element of an object array as a local reference.
    fn object_array_element(&self, array: ObjectHandle, index: i32) -> BridgeResult<ObjectHandle>;

    // ---- exceptions ------------------------------------------------------

    /// Returns true if an exception is pending on the calling thread.
    fn exception_check(&self) -> BridgeResult<bool>;

    /// Returns a local reference to the pending exception (null if none).
    fn exception_occurred(&self) -> BridgeResult<ObjectHandle>;

    /// Clears the pending exception.
    fn exception_clear(&self) -> BridgeResult<()>;

    /// Raises a new exception of `class` with `message` on the calling thread.
    fn throw_new(&self, class: ObjectHandle, message: &str) -> BridgeResult<()>;

    // ---- native registration ---------------------------------------------

    /// Binds native implementations to methods declared `native` in `class`.
    fn register_natives(&self, class: ObjectHandle, methods: &[NativeMethod]) -> BridgeResult<()>;
}
