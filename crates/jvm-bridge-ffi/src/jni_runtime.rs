//! [`ManagedRuntime`] over the JNI function tables.

use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;

use jni_sys::{
    jboolean, jclass, jfieldID, jint, jmethodID, jobject, jvalue, JNIEnv, JNINativeMethod, JavaVM,
    JavaVMAttachArgs, JNI_EDETACHED, JNI_FALSE, JNI_OK, JNI_TRUE,
};
use log::{debug, warn};

use jvm_bridge::config::defaults;
use jvm_bridge::signature::class_name_to_internal;
use jvm_bridge::status::JniStatusExt;
use jvm_bridge::{
    BoundaryValue, BridgeError, BridgeResult, FieldId, InvokeTarget, JniStatus, JniVersion,
    ManagedRuntime, MemberHandle, MethodId, NativeMethod, ObjectHandle, RefScope, ValueKind,
};

/// Calls a `JNIEnv` function, failing if the table has no entry for it.
macro_rules! jni_call {
    ($env:expr, $name:ident $(, $arg:expr)* $(,)?) => {{
        let env: *mut JNIEnv = $env;
        match (**env).$name {
            Some(f) => f(env $(, $arg)*),
            None => return Err(missing_function(stringify!($name))),
        }
    }};
}

/// Calls a `JavaVM` invocation-interface function.
macro_rules! vm_call {
    ($vm:expr, $name:ident $(, $arg:expr)* $(,)?) => {{
        let vm: *mut JavaVM = $vm;
        match (**vm).$name {
            Some(f) => f(vm $(, $arg)*),
            None => return Err(missing_function(stringify!($name))),
        }
    }};
}

fn missing_function(name: &str) -> BridgeError {
    warn!("JNI function table has no entry for {}", name);
    BridgeError::Status {
        status: JniStatus::Error,
    }
}

pub(crate) fn obj(handle: ObjectHandle) -> jobject {
    handle.as_raw() as jobject
}

pub(crate) fn handle(object: jobject) -> ObjectHandle {
    ObjectHandle::from_raw_unchecked(object as usize)
}

fn mid(id: MethodId) -> jmethodID {
    id.as_raw() as jmethodID
}

fn fid(id: FieldId) -> jfieldID {
    id.as_raw() as jfieldID
}

pub(crate) fn jbool(value: bool) -> jboolean {
    if value {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

fn to_jvalue(value: &BoundaryValue) -> jvalue {
    match *value {
        BoundaryValue::Void => jvalue { j: 0 },
        BoundaryValue::Boolean(z) => jvalue { z: jbool(z) },
        BoundaryValue::Byte(b) => jvalue { b },
        BoundaryValue::Char(c) => jvalue { c },
        BoundaryValue::Short(s) => jvalue { s },
        BoundaryValue::Int(i) => jvalue { i },
        BoundaryValue::Long(j) => jvalue { j },
        BoundaryValue::Float(f) => jvalue { f },
        BoundaryValue::Double(d) => jvalue { d },
        BoundaryValue::Object(h) => jvalue { l: obj(h) },
    }
}

/// Encodes a string in the JVM's modified UTF-8, NUL-terminated.
pub(crate) fn java_cstring(value: &str) -> BridgeResult<CString> {
    // Modified UTF-8 encodes U+0000 as two bytes, so no interior NUL remains.
    CString::new(cesu8::to_java_cesu8(value).into_owned()).map_err(|_| BridgeError::Status {
        status: JniStatus::InvalidArgument,
    })
}

/// Decodes modified UTF-8 received from the JVM.
pub(crate) fn from_java_bytes(bytes: &[u8]) -> BridgeResult<String> {
    cesu8::from_java_cesu8(bytes)
        .map(Cow::into_owned)
        .map_err(|_| BridgeError::invalid_handle("malformed modified UTF-8 from the JVM"))
}

/// A JVM reached through its invocation interface.
///
/// Every operation looks up the calling thread's `JNIEnv` with `GetEnv`, so
/// one instance serves all threads.
#[derive(Debug)]
pub struct JniRuntime {
    vm: *mut JavaVM,
    version: JniVersion,
    export_marker: String,
}

// SAFETY: the JavaVM pointer is process-wide and its invocation interface
// may be used from any thread. Per-thread state is fetched on each call.
unsafe impl Send for JniRuntime {}
// SAFETY: as above.
unsafe impl Sync for JniRuntime {}

impl JniRuntime {
    /// Wraps a JavaVM pointer.
    ///
    /// # Safety
    ///
    /// `vm` must point to a live JavaVM that outlives the returned runtime.
    pub unsafe fn from_raw(vm: *mut JavaVM, version: JniVersion) -> BridgeResult<Self> {
        if vm.is_null() {
            return Err(BridgeError::invalid_handle("null JavaVM"));
        }
        Ok(Self {
            vm,
            version,
            export_marker: class_name_to_internal(defaults::EXPORT_MARKER),
        })
    }

    /// Uses another annotation as the export marker.
    pub fn with_export_marker(mut self, annotation: &str) -> Self {
        self.export_marker = class_name_to_internal(annotation);
        self
    }

    pub fn as_raw(&self) -> *mut JavaVM {
        self.vm
    }

    pub fn version(&self) -> JniVersion {
        self.version
    }

    /// Returns the calling thread's `JNIEnv`, or None if it is detached.
    fn try_env(&self) -> BridgeResult<Option<*mut JNIEnv>> {
        let mut env: *mut c_void = ptr::null_mut();
        // SAFETY: `vm` is live per the constructor's contract.
        let status = unsafe { vm_call!(self.vm, GetEnv, &mut env, self.version.as_raw()) };
        match status {
            JNI_OK if !env.is_null() => Ok(Some(env as *mut JNIEnv)),
            JNI_OK | JNI_EDETACHED => Ok(None),
            other => Err(BridgeError::Status {
                status: JniStatus::from_raw(other),
            }),
        }
    }

    fn env(&self) -> BridgeResult<*mut JNIEnv> {
        self.try_env()?
            .ok_or_else(|| BridgeError::attachment("current thread is not attached to the JVM"))
    }
}

/// Returns true if `element` (a reflected member or a class) carries `marker`.
///
/// Reflection failures count as "not annotated" and leave no pending
/// exception behind.
unsafe fn annotation_present(
    env: *mut JNIEnv,
    element: jobject,
    marker: jclass,
) -> BridgeResult<bool> {
    if element.is_null() {
        jni_call!(env, ExceptionClear);
        return Ok(false);
    }
    let element_class = jni_call!(env, GetObjectClass, element);
    let method = jni_call!(
        env,
        GetMethodID,
        element_class,
        b"isAnnotationPresent\0".as_ptr() as *const c_char,
        b"(Ljava/lang/Class;)Z\0".as_ptr() as *const c_char,
    );
    jni_call!(env, DeleteLocalRef, element_class);
    if method.is_null() {
        jni_call!(env, ExceptionClear);
        return Ok(false);
    }
    let args = [jvalue { l: marker }];
    let present = jni_call!(env, CallBooleanMethodA, element, method, args.as_ptr());
    if jni_call!(env, ExceptionCheck) != JNI_FALSE {
        jni_call!(env, ExceptionClear);
        return Ok(false);
    }
    Ok(present != JNI_FALSE)
}

unsafe fn delete_on(env: *mut JNIEnv, scope: RefScope, object: jobject) -> BridgeResult<()> {
    match scope {
        RefScope::Local => jni_call!(env, DeleteLocalRef, object),
        RefScope::Global => jni_call!(env, DeleteGlobalRef, object),
        RefScope::Weak => jni_call!(env, DeleteWeakGlobalRef, object),
    }
    Ok(())
}

impl ManagedRuntime for JniRuntime {
    fn name(&self) -> &str {
        "jni"
    }

    fn is_thread_attached(&self) -> BridgeResult<bool> {
        Ok(self.try_env()?.is_some())
    }

    fn attach_current_thread(&self, thread_name: Option<&str>) -> BridgeResult<()> {
        let name = thread_name.map(java_cstring).transpose()?;
        let mut args = JavaVMAttachArgs {
            version: self.version.as_raw(),
            name: name
                .as_ref()
                .map_or(ptr::null_mut(), |n| n.as_ptr() as *mut c_char),
            group: ptr::null_mut(),
        };
        let mut env: *mut c_void = ptr::null_mut();
        // SAFETY: `args` and `name` outlive the call.
        let status = unsafe {
            vm_call!(
                self.vm,
                AttachCurrentThread,
                &mut env,
                &mut args as *mut JavaVMAttachArgs as *mut c_void,
            )
        };
        status
            .to_result()
            .map_err(|e| BridgeError::attachment(format!("AttachCurrentThread: {}", e)))
    }

    fn detach_current_thread(&self) -> BridgeResult<()> {
        // SAFETY: `vm` is live.
        let status = unsafe { vm_call!(self.vm, DetachCurrentThread) };
        status
            .to_result()
            .map_err(|e| BridgeError::attachment(format!("DetachCurrentThread: {}", e)))
    }

    fn find_class(&self, internal_name: &str) -> BridgeResult<ObjectHandle> {
        let env = self.env()?;
        let name = java_cstring(internal_name)?;
        // SAFETY: `env` belongs to this thread and `name` is NUL-terminated.
        Ok(handle(unsafe { jni_call!(env, FindClass, name.as_ptr()) }))
    }

    fn get_object_class(&self, object: ObjectHandle) -> BridgeResult<ObjectHandle> {
        let env = self.env()?;
        // SAFETY: callers pass handles valid on this thread.
        Ok(handle(unsafe { jni_call!(env, GetObjectClass, obj(object)) }))
    }

    fn method_id(
        &self,
        class: ObjectHandle,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> BridgeResult<MethodId> {
        let env = self.env()?;
        let (name, signature) = (java_cstring(name)?, java_cstring(signature)?);
        // SAFETY: as for `find_class`.
        let id = unsafe {
            if is_static {
                jni_call!(env, GetStaticMethodID, obj(class), name.as_ptr(), signature.as_ptr())
            } else {
                jni_call!(env, GetMethodID, obj(class), name.as_ptr(), signature.as_ptr())
            }
        };
        Ok(MethodId::from_raw_unchecked(id as usize))
    }

    fn field_id(
        &self,
        class: ObjectHandle,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> BridgeResult<FieldId> {
        let env = self.env()?;
        let (name, signature) = (java_cstring(name)?, java_cstring(signature)?);
        // SAFETY: as for `find_class`.
        let id = unsafe {
            if is_static {
                jni_call!(env, GetStaticFieldID, obj(class), name.as_ptr(), signature.as_ptr())
            } else {
                jni_call!(env, GetFieldID, obj(class), name.as_ptr(), signature.as_ptr())
            }
        };
        Ok(FieldId::from_raw_unchecked(id as usize))
    }

    fn has_export_marker(
        &self,
        class: ObjectHandle,
        member: MemberHandle,
        is_static: bool,
    ) -> BridgeResult<bool> {
        let env = self.env()?;
        let marker_name = java_cstring(&self.export_marker)?;
        // SAFETY: every local created here is deleted before returning.
        unsafe {
            let marker = jni_call!(env, FindClass, marker_name.as_ptr());
            if marker.is_null() {
                jni_call!(env, ExceptionClear);
                debug!("Export marker {} is not loaded", self.export_marker);
                return Ok(false);
            }
            let reflected = match member {
                MemberHandle::Method(m) => {
                    jni_call!(env, ToReflectedMethod, obj(class), mid(m), jbool(is_static))
                }
                MemberHandle::Field(f) => {
                    jni_call!(env, ToReflectedField, obj(class), fid(f), jbool(is_static))
                }
            };
            let on_member = annotation_present(env, reflected, marker);
            if !reflected.is_null() {
                jni_call!(env, DeleteLocalRef, reflected);
            }
            let exported = match on_member {
                Ok(true) => Ok(true),
                Ok(false) => annotation_present(env, obj(class), marker),
                Err(e) => Err(e),
            };
            jni_call!(env, DeleteLocalRef, marker);
            exported
        }
    }

    fn call_method(
        &self,
        target: InvokeTarget,
        method: MethodId,
        ret: ValueKind,
        args: &[BoundaryValue],
    ) -> BridgeResult<BoundaryValue> {
        let env = self.env()?;
        let args: Vec<jvalue> = args.iter().map(to_jvalue).collect();
        let (method, args) = (mid(method), args.as_ptr());

        macro_rules! dispatch {
            ($instance:ident, $static_:ident) => {
                match target {
                    InvokeTarget::Instance(o) => jni_call!(env, $instance, obj(o), method, args),
                    InvokeTarget::Static(c) => jni_call!(env, $static_, obj(c), method, args),
                }
            };
        }

        // SAFETY: the method id was resolved against this target's class and
        // the arguments were checked against its signature.
        let value = unsafe {
            match ret {
                ValueKind::Void => {
                    dispatch!(CallVoidMethodA, CallStaticVoidMethodA);
                    BoundaryValue::Void
                }
                ValueKind::Boolean => BoundaryValue::Boolean(
                    dispatch!(CallBooleanMethodA, CallStaticBooleanMethodA) != JNI_FALSE,
                ),
                ValueKind::Byte => {
                    BoundaryValue::Byte(dispatch!(CallByteMethodA, CallStaticByteMethodA))
                }
                ValueKind::Char => {
                    BoundaryValue::Char(dispatch!(CallCharMethodA, CallStaticCharMethodA))
                }
                ValueKind::Short => {
                    BoundaryValue::Short(dispatch!(CallShortMethodA, CallStaticShortMethodA))
                }
                ValueKind::Int => {
                    BoundaryValue::Int(dispatch!(CallIntMethodA, CallStaticIntMethodA))
                }
                ValueKind::Long => {
                    BoundaryValue::Long(dispatch!(CallLongMethodA, CallStaticLongMethodA))
                }
                ValueKind::Float => {
                    BoundaryValue::Float(dispatch!(CallFloatMethodA, CallStaticFloatMethodA))
                }
                ValueKind::Double => {
                    BoundaryValue::Double(dispatch!(CallDoubleMethodA, CallStaticDoubleMethodA))
                }
                ValueKind::Object => BoundaryValue::Object(handle(dispatch!(
                    CallObjectMethodA,
                    CallStaticObjectMethodA
                ))),
            }
        };
        Ok(value)
    }

    fn new_object(
        &self,
        class: ObjectHandle,
        constructor: MethodId,
        args: &[BoundaryValue],
    ) -> BridgeResult<ObjectHandle> {
        let env = self.env()?;
        let args: Vec<jvalue> = args.iter().map(to_jvalue).collect();
        // SAFETY: as for `call_method`.
        let object = unsafe { jni_call!(env, NewObjectA, obj(class), mid(constructor), args.as_ptr()) };
        Ok(handle(object))
    }

    fn get_field(
        &self,
        target: InvokeTarget,
        field: FieldId,
        kind: ValueKind,
    ) -> BridgeResult<BoundaryValue> {
        let env = self.env()?;
        let field = fid(field);

        macro_rules! read {
            ($instance:ident, $static_:ident) => {
                match target {
                    InvokeTarget::Instance(o) => jni_call!(env, $instance, obj(o), field),
                    InvokeTarget::Static(c) => jni_call!(env, $static_, obj(c), field),
                }
            };
        }

        // SAFETY: the field id was resolved against this target's class.
        let value = unsafe {
            match kind {
                ValueKind::Void => {
                    return Err(BridgeError::type_mismatch("field read", "a value type", "void"))
                }
                ValueKind::Boolean => {
                    BoundaryValue::Boolean(read!(GetBooleanField, GetStaticBooleanField) != JNI_FALSE)
                }
                ValueKind::Byte => BoundaryValue::Byte(read!(GetByteField, GetStaticByteField)),
                ValueKind::Char => BoundaryValue::Char(read!(GetCharField, GetStaticCharField)),
                ValueKind::Short => BoundaryValue::Short(read!(GetShortField, GetStaticShortField)),
                ValueKind::Int => BoundaryValue::Int(read!(GetIntField, GetStaticIntField)),
                ValueKind::Long => BoundaryValue::Long(read!(GetLongField, GetStaticLongField)),
                ValueKind::Float => BoundaryValue::Float(read!(GetFloatField, GetStaticFloatField)),
                ValueKind::Double => {
                    BoundaryValue::Double(read!(GetDoubleField, GetStaticDoubleField))
                }
                ValueKind::Object => {
                    BoundaryValue::Object(handle(read!(GetObjectField, GetStaticObjectField)))
                }
            }
        };
        Ok(value)
    }

    fn set_field(
        &self,
        target: InvokeTarget,
        field: FieldId,
        value: BoundaryValue,
    ) -> BridgeResult<()> {
        let env = self.env()?;
        let field = fid(field);

        macro_rules! store {
            ($instance:ident, $static_:ident, $value:expr) => {
                match target {
                    InvokeTarget::Instance(o) => jni_call!(env, $instance, obj(o), field, $value),
                    InvokeTarget::Static(c) => jni_call!(env, $static_, obj(c), field, $value),
                }
            };
        }

        // SAFETY: the value kind was checked against the field descriptor.
        unsafe {
            match value {
                BoundaryValue::Void => {
                    return Err(BridgeError::type_mismatch("field write", "a value", "void"))
                }
                BoundaryValue::Boolean(z) => {
                    store!(SetBooleanField, SetStaticBooleanField, jbool(z))
                }
                BoundaryValue::Byte(b) => store!(SetByteField, SetStaticByteField, b),
                BoundaryValue::Char(c) => store!(SetCharField, SetStaticCharField, c),
                BoundaryValue::Short(s) => store!(SetShortField, SetStaticShortField, s),
                BoundaryValue::Int(i) => store!(SetIntField, SetStaticIntField, i),
                BoundaryValue::Long(j) => store!(SetLongField, SetStaticLongField, j),
                BoundaryValue::Float(f) => store!(SetFloatField, SetStaticFloatField, f),
                BoundaryValue::Double(d) => store!(SetDoubleField, SetStaticDoubleField, d),
                BoundaryValue::Object(h) => store!(SetObjectField, SetStaticObjectField, obj(h)),
            }
        }
        Ok(())
    }

    fn new_ref(&self, scope: RefScope, object: ObjectHandle) -> BridgeResult<ObjectHandle> {
        let env = self.env()?;
        // SAFETY: `object` is a valid reference or null.
        let created = unsafe {
            match scope {
                RefScope::Local => jni_call!(env, NewLocalRef, obj(object)),
                RefScope::Global => jni_call!(env, NewGlobalRef, obj(object)),
                RefScope::Weak => jni_call!(env, NewWeakGlobalRef, obj(object)),
            }
        };
        Ok(handle(created))
    }

    fn delete_ref(&self, scope: RefScope, object: ObjectHandle) -> BridgeResult<()> {
        if object.is_null() {
            return Ok(());
        }
        match self.try_env()? {
            // SAFETY: the reference belongs to this scope and is released once.
            Some(env) => unsafe { delete_on(env, scope, obj(object)) },
            None if scope == RefScope::Local => Err(BridgeError::attachment(
                "local reference released on a detached thread",
            )),
            None => {
                // Global references may be dropped on threads the bridge never
                // attached; attach just long enough to release them.
                self.attach_current_thread(None)?;
                let result = self
                    .env()
                    .and_then(|env| unsafe { delete_on(env, scope, obj(object)) });
                self.detach_current_thread()?;
                result
            }
        }
    }

    fn is_same_object(&self, a: ObjectHandle, b: ObjectHandle) -> BridgeResult<bool> {
        let env = self.env()?;
        // SAFETY: both handles are valid references or null.
        let same = unsafe { jni_call!(env, IsSameObject, obj(a), obj(b)) };
        Ok(same != JNI_FALSE)
    }

    fn push_local_frame(&self, capacity: i32) -> BridgeResult<()> {
        let env = self.env()?;
        // SAFETY: `env` belongs to this thread.
        let status: jint = unsafe { jni_call!(env, PushLocalFrame, capacity) };
        status.to_result()
    }

    fn pop_local_frame(&self, result: ObjectHandle) -> BridgeResult<ObjectHandle> {
        let env = self.env()?;
        // SAFETY: a frame was pushed by the caller.
        Ok(handle(unsafe { jni_call!(env, PopLocalFrame, obj(result)) }))
    }

    fn new_string(&self, value: &str) -> BridgeResult<ObjectHandle> {
        let env = self.env()?;
        let text = java_cstring(value)?;
        // SAFETY: `text` is NUL-terminated modified UTF-8.
        Ok(handle(unsafe { jni_call!(env, NewStringUTF, text.as_ptr()) }))
    }

    fn string_value(&self, string: ObjectHandle) -> BridgeResult<String> {
        let env = self.env()?;
        // SAFETY: the chars are copied out before being released.
        let bytes = unsafe {
            let chars = jni_call!(env, GetStringUTFChars, obj(string), ptr::null_mut());
            if chars.is_null() {
                return Err(BridgeError::Status {
                    status: JniStatus::NoMemory,
                });
            }
            let bytes = CStr::from_ptr(chars).to_bytes().to_vec();
            jni_call!(env, ReleaseStringUTFChars, obj(string), chars);
            bytes
        };
        from_java_bytes(&bytes)
    }

    fn array_length(&self, array: ObjectHandle) -> BridgeResult<i32> {
        let env = self.env()?;
        // SAFETY: callers pass array handles.
        Ok(unsafe { jni_call!(env, GetArrayLength, obj(array)) })
    }

    fn object_array_element(&self, array: ObjectHandle, index: i32) -> BridgeResult<ObjectHandle> {
        let env = self.env()?;
        // SAFETY: out-of-range indexes raise a managed exception.
        Ok(handle(unsafe { jni_call!(env, GetObjectArrayElement, obj(array), index) }))
    }

    fn exception_check(&self) -> BridgeResult<bool> {
        let env = self.env()?;
        // SAFETY: safe to call with a pending exception.
        Ok(unsafe { jni_call!(env, ExceptionCheck) } != JNI_FALSE)
    }

    fn exception_occurred(&self) -> BridgeResult<ObjectHandle> {
        let env = self.env()?;
        // SAFETY: as above.
        Ok(handle(unsafe { jni_call!(env, ExceptionOccurred) }))
    }

    fn exception_clear(&self) -> BridgeResult<()> {
        let env = self.env()?;
        // SAFETY: as above.
        unsafe { jni_call!(env, ExceptionClear) };
        Ok(())
    }

    fn throw_new(&self, class: ObjectHandle, message: &str) -> BridgeResult<()> {
        let env = self.env()?;
        let message = java_cstring(message)?;
        // SAFETY: `class` is a Throwable subclass resolved by the caller.
        let status: jint = unsafe { jni_call!(env, ThrowNew, obj(class), message.as_ptr()) };
        status.to_result()
    }

    fn register_natives(&self, class: ObjectHandle, methods: &[NativeMethod]) -> BridgeResult<()> {
        let env = self.env()?;
        let names = methods
            .iter()
            .map(|m| Ok((java_cstring(&m.name)?, java_cstring(&m.signature)?)))
            .collect::<BridgeResult<Vec<_>>>()?;
        let table: Vec<JNINativeMethod> = methods
            .iter()
            .zip(&names)
            .map(|(m, (name, signature))| JNINativeMethod {
                name: name.as_ptr() as *mut c_char,
                signature: signature.as_ptr() as *mut c_char,
                fnPtr: m.fn_ptr.as_ptr(),
            })
            .collect();
        // SAFETY: `names` keeps the strings alive for the duration of the call.
        let status: jint = unsafe {
            jni_call!(env, RegisterNatives, obj(class), table.as_ptr(), table.len() as jint)
        };
        status.to_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jni_sys::{JNIInvokeInterface_, JNI_ERR};
    use pretty_assertions::assert_eq;

    unsafe extern "system" fn detached_get_env(
        _vm: *mut JavaVM,
        env: *mut *mut c_void,
        _version: jint,
    ) -> jint {
        *env = ptr::null_mut();
        JNI_EDETACHED
    }

    unsafe extern "system" fn refuse_attach(
        _vm: *mut JavaVM,
        _env: *mut *mut c_void,
        _args: *mut c_void,
    ) -> jint {
        JNI_ERR
    }

    fn invoke_table() -> JNIInvokeInterface_ {
        JNIInvokeInterface_ {
            reserved0: ptr::null_mut(),
            reserved1: ptr::null_mut(),
            reserved2: ptr::null_mut(),
            DestroyJavaVM: None,
            AttachCurrentThread: Some(refuse_attach),
            DetachCurrentThread: None,
            GetEnv: Some(detached_get_env),
            AttachCurrentThreadAsDaemon: None,
        }
    }

    #[test]
    fn test_from_raw_rejects_null() {
        let result = unsafe { JniRuntime::from_raw(ptr::null_mut(), JniVersion::V1_8) };
        assert!(matches!(result, Err(BridgeError::InvalidHandle { .. })));
    }

    #[test]
    fn test_detached_thread() {
        let table = invoke_table();
        let mut vm: JavaVM = &table;
        let runtime = unsafe { JniRuntime::from_raw(&mut vm, JniVersion::V1_8) }.unwrap();

        assert_eq!(runtime.name(), "jni");
        assert!(!runtime.is_thread_attached().unwrap());
        assert!(matches!(
            runtime.find_class("java/lang/String"),
            Err(BridgeError::Attachment { .. })
        ));
        assert!(matches!(
            runtime.attach_current_thread(Some("worker")),
            Err(BridgeError::Attachment { .. })
        ));
        // No DetachCurrentThread entry in the table.
        assert!(matches!(
            runtime.detach_current_thread(),
            Err(BridgeError::Status {
                status: JniStatus::Error
            })
        ));
        // Null handles are never released.
        assert!(runtime.delete_ref(RefScope::Global, ObjectHandle::NULL).is_ok());
    }

    #[test]
    fn test_modified_utf8() {
        let encoded = java_cstring("a\0b").unwrap();
        assert_eq!(encoded.as_bytes(), &[b'a', 0xc0, 0x80, b'b']);
        assert_eq!(from_java_bytes(encoded.as_bytes()).unwrap(), "a\0b");

        // Supplementary characters travel as surrogate pairs.
        let encoded = java_cstring("\u{1F600}").unwrap();
        assert_eq!(encoded.as_bytes().len(), 6);
        assert_eq!(from_java_bytes(encoded.as_bytes()).unwrap(), "\u{1F600}");

        assert!(from_java_bytes(&[0xff]).is_err());
    }

    #[test]
    fn test_jvalue_conversion() {
        let v = to_jvalue(&BoundaryValue::Boolean(true));
        assert_eq!(unsafe { v.z }, JNI_TRUE);
        let v = to_jvalue(&BoundaryValue::Int(-7));
        assert_eq!(unsafe { v.i }, -7);
        let v = to_jvalue(&BoundaryValue::Object(ObjectHandle::NULL));
        assert!(unsafe { v.l }.is_null());
    }
}
