//! The per-thread interface handle.
//!
//! An [`Env`] proves that the current thread is attached to the runtime. It
//! is only handed out by the attachment manager and cannot leave the
//! thread it was created on.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::exception;
use crate::frame::LocalFrame;
use crate::invoke::{self, Receiver};
use crate::reference::{ManagedReference, RefScope};
use crate::resolver::{MemberDescriptor, MemberKind, CONSTRUCTOR_NAME};
use crate::runtime::ManagedRuntime;
use crate::signature::{internal_to_class_name, JavaType, MethodSignature};
use crate::types::ObjectHandle;
use crate::value::{Arg, FromManaged};

/// Thread-bound access to the managed runtime.
pub struct Env<'b> {
    bridge: &'b Bridge,
    _not_send: PhantomData<*const ()>,
}

impl<'b> Env<'b> {
    pub(crate) fn new(bridge: &'b Bridge) -> Self {
        Self {
            bridge,
            _not_send: PhantomData,
        }
    }

    pub fn bridge(&self) -> &'b Bridge {
        self.bridge
    }

    pub fn runtime(&self) -> &Arc<dyn ManagedRuntime> {
        self.bridge.runtime()
    }

    /// Takes ownership of a local reference handed over by the runtime.
    pub fn wrap_local(&self, handle: ObjectHandle) -> ManagedReference {
        ManagedReference::wrap_nullable(self.runtime().clone(), handle, RefScope::Local)
    }

    /// Checks for a pending exception, translating and clearing it.
    pub fn exception_check(&self) -> BridgeResult<()> {
        let reporter = self.bridge.exception_reporter();
        exception::check(self.runtime(), reporter.as_ref())
    }

    /// Opens a local frame with the configured capacity.
    pub fn local_frame(&self) -> BridgeResult<LocalFrame<'_>> {
        self.local_frame_with_capacity(self.bridge.config().local_frame_capacity)
    }

    /// Opens a local frame with room for `capacity` references.
    pub fn local_frame_with_capacity(&self, capacity: i32) -> BridgeResult<LocalFrame<'_>> {
        LocalFrame::push(self.runtime().clone(), capacity).map_err(|e| match e {
            BridgeError::Status { .. } => {
                BridgeError::reference_leak(RefScope::Local, format!("frame of {}", capacity))
            }
            other => other,
        })
    }

    /// Runs `f` inside a local frame, releasing every local it creates.
    ///
    /// Locals created by `f` are dead once this returns; carry objects out
    /// with [`LocalFrame::pop_with`] or as global references instead.
    pub fn with_local_frame<R>(
        &self,
        f: impl FnOnce(&Env<'b>) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        let frame = self.local_frame()?;
        let result = f(self);
        frame.pop()?;
        result
    }

    /// Returns a cached global reference to a class.
    pub fn find_class(&self, name: &str) -> BridgeResult<Arc<ManagedReference>> {
        self.bridge.resolver().class(self, name)
    }

    /// Resolves a member through the bridge's cache.
    pub fn resolve(
        &self,
        class: &str,
        name: &str,
        signature: &str,
        kind: MemberKind,
    ) -> BridgeResult<Arc<MemberDescriptor>> {
        self.bridge
            .resolver()
            .resolve(self, class, name, signature, kind)
    }

    /// Creates a managed string.
    pub fn new_string(&self, value: &str) -> BridgeResult<ManagedReference> {
        let raw = self.runtime().new_string(value);
        self.exception_check()?;
        let handle = raw?;
        if handle.is_null() {
            return Err(BridgeError::reference_leak(RefScope::Local, "new string"));
        }
        Ok(self.wrap_local(handle))
    }

    /// Decodes a managed string.
    pub fn read_string(&self, string: &ManagedReference) -> BridgeResult<String> {
        let handle = string.get()?;
        if handle.is_null() {
            return Err(BridgeError::invalid_handle("null string"));
        }
        let value = self.runtime().string_value(handle);
        self.exception_check()?;
        value
    }

    /// Returns every element of an object array as a local reference.
    pub fn read_object_array(&self, array: &ManagedReference) -> BridgeResult<Vec<ManagedReference>> {
        let handle = array.get()?;
        if handle.is_null() {
            return Err(BridgeError::invalid_handle("null array"));
        }
        let len = self.runtime().array_length(handle)?;
        let mut out = Vec::with_capacity(len.max(0) as usize);
        for i in 0..len {
            let raw = self.runtime().object_array_element(handle, i);
            self.exception_check()?;
            out.push(self.wrap_local(raw?));
        }
        Ok(out)
    }

    /// Raises a managed exception on this thread. It becomes visible to
    /// managed code when the current native method returns.
    pub fn throw_new(&self, class: &str, message: &str) -> BridgeResult<()> {
        let class = self.find_class(class)?;
        self.runtime().throw_new(class.get()?, message)
    }

    /// Calls a static method.
    pub fn call_static<R: FromManaged>(
        &self,
        class: &str,
        name: &str,
        signature: &str,
        args: &[Arg<'_>],
    ) -> BridgeResult<R> {
        prevalidate::<R>(class, name, signature, args)?;
        let member = self.resolve(class, name, signature, MemberKind::StaticMethod)?;
        invoke::call(self, &member, Receiver::Static, args)
    }

    /// Calls a static method, inferring the signature from the arguments
    /// and `R`. Object arguments are typed as `java.lang.Object`.
    pub fn call_static_inferred<R: FromManaged>(
        &self,
        class: &str,
        name: &str,
        args: &[Arg<'_>],
    ) -> BridgeResult<R> {
        let signature = infer_signature::<R>(args);
        self.call_static(class, name, &signature.descriptor(), args)
    }

    /// Calls an instance method declared by `class`.
    pub fn call_method<R: FromManaged>(
        &self,
        target: &ManagedReference,
        class: &str,
        name: &str,
        signature: &str,
        args: &[Arg<'_>],
    ) -> BridgeResult<R> {
        prevalidate::<R>(class, name, signature, args)?;
        let member = self.resolve(class, name, signature, MemberKind::Method)?;
        invoke::call(self, &member, Receiver::Instance(target), args)
    }

    /// Constructs a new object.
    pub fn new_object(
        &self,
        class: &str,
        signature: &str,
        args: &[Arg<'_>],
    ) -> BridgeResult<ManagedReference> {
        prevalidate::<()>(class, CONSTRUCTOR_NAME, signature, args)?;
        let member = self.resolve(class, CONSTRUCTOR_NAME, signature, MemberKind::Constructor)?;
        invoke::construct(self, &member, args)
    }

    /// Reads an instance field.
    pub fn get_field<T: FromManaged>(
        &self,
        target: &ManagedReference,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> BridgeResult<T> {
        prevalidate_read::<T>(class, name, descriptor)?;
        let member = self.resolve(class, name, descriptor, MemberKind::Field)?;
        invoke::read_field(self, &member, Receiver::Instance(target))
    }

    /// Writes an instance field.
    pub fn set_field<'a>(
        &self,
        target: &ManagedReference,
        class: &str,
        name: &str,
        descriptor: &str,
        value: impl Into<Arg<'a>>,
    ) -> BridgeResult<()> {
        let value = value.into();
        prevalidate_write(class, name, descriptor, &value)?;
        let member = self.resolve(class, name, descriptor, MemberKind::Field)?;
        invoke::write_field(self, &member, Receiver::Instance(target), value)
    }

    /// Reads a static field.
    pub fn get_static_field<T: FromManaged>(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> BridgeResult<T> {
        prevalidate_read::<T>(class, name, descriptor)?;
        let member = self.resolve(class, name, descriptor, MemberKind::StaticField)?;
        invoke::read_field(self, &member, Receiver::Static)
    }

    /// Writes a static field.
    pub fn set_static_field<'a>(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
        value: impl Into<Arg<'a>>,
    ) -> BridgeResult<()> {
        let value = value.into();
        prevalidate_write(class, name, descriptor, &value)?;
        let member = self.resolve(class, name, descriptor, MemberKind::StaticField)?;
        invoke::write_field(self, &member, Receiver::Static, value)
    }
}

/// Builds a signature from the runtime types of `args` and the return type
/// of `R`.
pub fn infer_signature<R: FromManaged>(args: &[Arg<'_>]) -> MethodSignature {
    MethodSignature::new(
        args.iter().map(Arg::inferred_type).collect(),
        R::return_type(),
    )
}

fn member_name(class: &str, name: &str, signature: &str) -> String {
    format!("{}.{}{}", internal_to_class_name(class), name, signature)
}

/// Parses the signature and checks the arguments and the return type
/// before anything reaches the runtime, including the member lookup.
pub(crate) fn prevalidate<R: FromManaged>(
    class: &str,
    name: &str,
    signature: &str,
    args: &[Arg<'_>],
) -> BridgeResult<()> {
    let parsed = MethodSignature::parse(signature)?;
    let member = member_name(class, name, signature);
    invoke::validate_args(&member, &parsed, args)?;
    if name == CONSTRUCTOR_NAME && parsed.ret != JavaType::Void {
        return Err(BridgeError::invalid_signature(
            signature,
            "constructors return void",
        ));
    }
    invoke::validate_return::<R>(&member, &parsed.ret)
}

/// Checks that a field of type `descriptor` can be read as `T`.
pub(crate) fn prevalidate_read<T: FromManaged>(
    class: &str,
    name: &str,
    descriptor: &str,
) -> BridgeResult<()> {
    let ty = JavaType::parse(descriptor)?;
    invoke::validate_return::<T>(&member_name(class, name, descriptor), &ty)
}

/// Checks that `value` can be stored in a field of type `descriptor`.
pub(crate) fn prevalidate_write(
    class: &str,
    name: &str,
    descriptor: &str,
    value: &Arg<'_>,
) -> BridgeResult<()> {
    let ty = JavaType::parse(descriptor)?;
    invoke::validate_value(&member_name(class, name, descriptor), &ty, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_signature() {
        let sig = infer_signature::<i32>(&[Arg::Int(1), Arg::Str("x"), Arg::Double(2.0)]);
        assert_eq!(sig.descriptor(), "(ILjava/lang/String;D)I");
        let sig = infer_signature::<()>(&[]);
        assert_eq!(sig.descriptor(), "()V");
    }

    #[test]
    fn test_prevalidate_rejects_before_lookup() {
        let args = [Arg::Str("1"), Arg::Int(2)];
        let err = prevalidate::<i32>("com.example.Calc", "add", "(II)I", &args).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));
        let err =
            prevalidate::<()>("com.example.Calc", "<init>", "(I)I", &[Arg::Int(1)]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidSignature { .. }));
        assert!(prevalidate::<i32>("com.example.Calc", "add", "(II", &[]).is_err());
    }

    #[test]
    fn test_prevalidate_return_type() {
        let err = prevalidate::<String>("com.example.Calc", "answer", "()I", &[]).unwrap_err();
        match err {
            BridgeError::TypeMismatch {
                location,
                expected,
                found,
            } => {
                assert_eq!(location, "return value of com.example.Calc.answer()I");
                assert_eq!(expected, "Ljava/lang/String;");
                assert_eq!(found, "I");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(prevalidate::<i32>("com.example.Calc", "answer", "()I", &[]).is_ok());
    }

    #[test]
    fn test_prevalidate_fields() {
        assert!(prevalidate_read::<i32>("com.example.Calc", "value", "I").is_ok());
        assert!(prevalidate_read::<String>("com.example.Calc", "value", "I").is_err());
        assert!(prevalidate_read::<i32>("com.example.Calc", "value", "V").is_err());
        assert!(prevalidate_write("com.example.Calc", "value", "I", &Arg::Int(3)).is_ok());
        let err =
            prevalidate_write("com.example.Calc", "value", "I", &Arg::Str("3")).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));
    }
}
