//! The invocation engine.
//!
//! Every call follows the same sequence: validate the native arguments
//! against the member signature, marshal them into boundary values,
//! perform the call, check for a pending exception, then convert the
//! result. Validation failures never reach the runtime.

use crate::env::Env;
use crate::error::{BridgeError, BridgeResult};
use crate::reference::{ManagedReference, RefScope};
use crate::resolver::MemberDescriptor;
use crate::runtime::InvokeTarget;
use crate::signature::{JavaType, MethodSignature};
use crate::types::ObjectHandle;
use crate::value::{Arg, BoundaryValue, FromManaged};

/// Receiver for an instance or static member.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Receiver<'r> {
    Instance(&'r ManagedReference),
    Static,
}

/// Checks argument count and types against `signature`.
pub(crate) fn validate_args(
    member: &str,
    signature: &MethodSignature,
    args: &[Arg<'_>],
) -> BridgeResult<()> {
    if args.len() != signature.arity() {
        return Err(BridgeError::Arity {
            member: member.to_string(),
            expected: signature.arity(),
            found: args.len(),
        });
    }
    for (i, (arg, param)) in args.iter().zip(&signature.params).enumerate() {
        if !arg.accepts(param) {
            return Err(BridgeError::type_mismatch(
                format!("argument {} of {}", i, member),
                param.descriptor(),
                arg.type_name(),
            ));
        }
    }
    Ok(())
}

/// Checks that the declared return type can be read as `R`.
pub(crate) fn validate_return<R: FromManaged>(member: &str, ty: &JavaType) -> BridgeResult<()> {
    if R::accepts(ty) {
        Ok(())
    } else {
        Err(BridgeError::type_mismatch(
            format!("return value of {}", member),
            R::return_type().descriptor(),
            ty.descriptor(),
        ))
    }
}

/// Checks that `value` can be stored in a field of type `ty`.
pub(crate) fn validate_value(member: &str, ty: &JavaType, value: &Arg<'_>) -> BridgeResult<()> {
    if value.accepts(ty) {
        Ok(())
    } else {
        Err(BridgeError::type_mismatch(
            format!("value of {}", member),
            ty.descriptor(),
            value.type_name(),
        ))
    }
}

/// Arguments converted for one call. Temporary locals are released when
/// this is dropped.
struct Marshaled {
    values: Vec<BoundaryValue>,
    _temps: Vec<ManagedReference>,
}

fn marshal(env: &Env<'_>, args: &[Arg<'_>]) -> BridgeResult<Marshaled> {
    let mut values = Vec::with_capacity(args.len());
    let mut temps = Vec::new();
    for arg in args {
        let value = match *arg {
            Arg::Boolean(v) => BoundaryValue::Boolean(v),
            Arg::Byte(v) => BoundaryValue::Byte(v),
            Arg::Char(v) => BoundaryValue::Char(v),
            Arg::Short(v) => BoundaryValue::Short(v),
            Arg::Int(v) => BoundaryValue::Int(v),
            Arg::Long(v) => BoundaryValue::Long(v),
            Arg::Float(v) => BoundaryValue::Float(v),
            Arg::Double(v) => BoundaryValue::Double(v),
            Arg::Str(s) => {
                let string = env.new_string(s)?;
                let handle = string.get()?;
                temps.push(string);
                BoundaryValue::Object(handle)
            }
            Arg::Object(r) => BoundaryValue::Object(r.get()?),
            Arg::Null => BoundaryValue::Object(ObjectHandle::NULL),
        };
        values.push(value);
    }
    Ok(Marshaled {
        values,
        _temps: temps,
    })
}

fn target_of(descriptor: &MemberDescriptor, receiver: Receiver<'_>) -> BridgeResult<InvokeTarget> {
    match receiver {
        Receiver::Instance(obj) => {
            let handle = obj.get()?;
            if handle.is_null() {
                return Err(BridgeError::invalid_handle(format!(
                    "null receiver for {}",
                    descriptor.key()
                )));
            }
            Ok(InvokeTarget::Instance(handle))
        }
        Receiver::Static => Ok(InvokeTarget::Static(descriptor.class().get()?)),
    }
}

fn method_signature(descriptor: &MemberDescriptor) -> BridgeResult<&MethodSignature> {
    descriptor.method_signature().ok_or_else(|| {
        BridgeError::invalid_handle(format!("{} is not a method", descriptor.key()))
    })
}

fn field_type(descriptor: &MemberDescriptor) -> BridgeResult<&JavaType> {
    descriptor
        .field_type()
        .ok_or_else(|| BridgeError::invalid_handle(format!("{} is not a field", descriptor.key())))
}

/// Calls a resolved method and converts the result to `R`.
pub(crate) fn call<R: FromManaged>(
    env: &Env<'_>,
    descriptor: &MemberDescriptor,
    receiver: Receiver<'_>,
    args: &[Arg<'_>],
) -> BridgeResult<R> {
    let member = descriptor.key().to_string();
    let signature = method_signature(descriptor)?;
    validate_args(&member, signature, args)?;
    validate_return::<R>(&member, &signature.ret)?;

    let target = target_of(descriptor, receiver)?;
    let method = descriptor.method_id()?;
    let marshaled = marshal(env, args)?;
    let raw = env
        .runtime()
        .call_method(target, method, signature.ret.value_kind(), &marshaled.values);
    drop(marshaled);
    env.exception_check()?;
    R::from_boundary(env, raw?)
}

/// Allocates an object through a resolved constructor.
pub(crate) fn construct(
    env: &Env<'_>,
    descriptor: &MemberDescriptor,
    args: &[Arg<'_>],
) -> BridgeResult<ManagedReference> {
    let member = descriptor.key().to_string();
    let signature = method_signature(descriptor)?;
    validate_args(&member, signature, args)?;

    let class = descriptor.class().get()?;
    let constructor = descriptor.method_id()?;
    let marshaled = marshal(env, args)?;
    let raw = env
        .runtime()
        .new_object(class, constructor, &marshaled.values);
    drop(marshaled);
    env.exception_check()?;
    let handle = raw?;
    if handle.is_null() {
        return Err(BridgeError::reference_leak(
            RefScope::Local,
            format!("constructing {}", descriptor.key().class),
        ));
    }
    Ok(env.wrap_local(handle))
}

/// Reads a resolved field as `T`.
pub(crate) fn read_field<T: FromManaged>(
    env: &Env<'_>,
    descriptor: &MemberDescriptor,
    receiver: Receiver<'_>,
) -> BridgeResult<T> {
    let member = descriptor.key().to_string();
    let ty = field_type(descriptor)?;
    validate_return::<T>(&member, ty)?;

    let target = target_of(descriptor, receiver)?;
    let raw = env
        .runtime()
        .get_field(target, descriptor.field_id()?, ty.value_kind());
    env.exception_check()?;
    T::from_boundary(env, raw?)
}

/// Writes a resolved field.
pub(crate) fn write_field(
    env: &Env<'_>,
    descriptor: &MemberDescriptor,
    receiver: Receiver<'_>,
    value: Arg<'_>,
) -> BridgeResult<()> {
    let member = descriptor.key().to_string();
    let ty = field_type(descriptor)?;
    validate_value(&member, ty, &value)?;

    let target = target_of(descriptor, receiver)?;
    let marshaled = marshal(env, std::slice::from_ref(&value))?;
    let raw = env
        .runtime()
        .set_field(target, descriptor.field_id()?, marshaled.values[0]);
    drop(marshaled);
    env.exception_check()?;
    raw
}
