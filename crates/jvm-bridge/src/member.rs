//! Typed member handles.
//!
//! A handle names one member with its signature and fixes the native
//! return or field type at compile time. Handles are cheap to build and
//! are usually kept in statics; the bridge caches the resolution.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::env::{prevalidate, prevalidate_read, prevalidate_write, Env};
use crate::error::BridgeResult;
use crate::invoke::{self, Receiver};
use crate::reference::ManagedReference;
use crate::resolver::{MemberDescriptor, MemberKind, CONSTRUCTOR_NAME};
use crate::value::{Arg, FromManaged};

#[derive(Debug, Clone, PartialEq, Eq)]
struct MemberName {
    class: String,
    name: String,
    signature: String,
}

impl MemberName {
    fn new(class: &str, name: &str, signature: &str) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            signature: signature.to_string(),
        }
    }

    fn resolve(&self, env: &Env<'_>, kind: MemberKind) -> BridgeResult<Arc<MemberDescriptor>> {
        env.resolve(&self.class, &self.name, &self.signature, kind)
    }
}

/// A static method returning `R`.
///
/// ```no_run
/// use jvm_bridge::{Env, StaticMethod};
///
/// fn answer(env: &Env<'_>) -> jvm_bridge::BridgeResult<i32> {
///     let m = StaticMethod::<i32>::new("com.example.Calc", "answer", "()I");
///     m.call(env, &[])
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticMethod<R> {
    member: MemberName,
    _ret: PhantomData<fn() -> R>,
}

impl<R: FromManaged> StaticMethod<R> {
    pub fn new(class: &str, name: &str, signature: &str) -> Self {
        Self {
            member: MemberName::new(class, name, signature),
            _ret: PhantomData,
        }
    }

    /// Resolves the method without calling it.
    pub fn resolve(&self, env: &Env<'_>) -> BridgeResult<Arc<MemberDescriptor>> {
        self.member.resolve(env, MemberKind::StaticMethod)
    }

    pub fn call(&self, env: &Env<'_>, args: &[Arg<'_>]) -> BridgeResult<R> {
        let m = &self.member;
        prevalidate::<R>(&m.class, &m.name, &m.signature, args)?;
        let descriptor = self.resolve(env)?;
        invoke::call(env, &descriptor, Receiver::Static, args)
    }
}

/// An instance method returning `R`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMethod<R> {
    member: MemberName,
    _ret: PhantomData<fn() -> R>,
}

impl<R: FromManaged> InstanceMethod<R> {
    pub fn new(class: &str, name: &str, signature: &str) -> Self {
        Self {
            member: MemberName::new(class, name, signature),
            _ret: PhantomData,
        }
    }

    pub fn resolve(&self, env: &Env<'_>) -> BridgeResult<Arc<MemberDescriptor>> {
        self.member.resolve(env, MemberKind::Method)
    }

    pub fn call(
        &self,
        env: &Env<'_>,
        target: &ManagedReference,
        args: &[Arg<'_>],
    ) -> BridgeResult<R> {
        let m = &self.member;
        prevalidate::<R>(&m.class, &m.name, &m.signature, args)?;
        let descriptor = self.resolve(env)?;
        invoke::call(env, &descriptor, Receiver::Instance(target), args)
    }
}

/// A constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constructor {
    member: MemberName,
}

impl Constructor {
    pub fn new(class: &str, signature: &str) -> Self {
        Self {
            member: MemberName::new(class, CONSTRUCTOR_NAME, signature),
        }
    }

    pub fn resolve(&self, env: &Env<'_>) -> BridgeResult<Arc<MemberDescriptor>> {
        self.member.resolve(env, MemberKind::Constructor)
    }

    /// Allocates and initializes a new object, returned as a local.
    pub fn new_object(&self, env: &Env<'_>, args: &[Arg<'_>]) -> BridgeResult<ManagedReference> {
        let m = &self.member;
        prevalidate::<()>(&m.class, &m.name, &m.signature, args)?;
        let descriptor = self.resolve(env)?;
        invoke::construct(env, &descriptor, args)
    }
}

/// A static field of type `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticField<T> {
    member: MemberName,
    _ty: PhantomData<fn() -> T>,
}

impl<T: FromManaged> StaticField<T> {
    pub fn new(class: &str, name: &str, descriptor: &str) -> Self {
        Self {
            member: MemberName::new(class, name, descriptor),
            _ty: PhantomData,
        }
    }

    pub fn get(&self, env: &Env<'_>) -> BridgeResult<T> {
        let m = &self.member;
        prevalidate_read::<T>(&m.class, &m.name, &m.signature)?;
        let descriptor = self.member.resolve(env, MemberKind::StaticField)?;
        invoke::read_field(env, &descriptor, Receiver::Static)
    }

    pub fn set<'a>(&self, env: &Env<'_>, value: impl Into<Arg<'a>>) -> BridgeResult<()> {
        let m = &self.member;
        let value = value.into();
        prevalidate_write(&m.class, &m.name, &m.signature, &value)?;
        let descriptor = m.resolve(env, MemberKind::StaticField)?;
        invoke::write_field(env, &descriptor, Receiver::Static, value)
    }
}

/// An instance field of type `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceField<T> {
    member: MemberName,
    _ty: PhantomData<fn() -> T>,
}

impl<T: FromManaged> InstanceField<T> {
    pub fn new(class: &str, name: &str, descriptor: &str) -> Self {
        Self {
            member: MemberName::new(class, name, descriptor),
            _ty: PhantomData,
        }
    }

    pub fn get(&self, env: &Env<'_>, target: &ManagedReference) -> BridgeResult<T> {
        let m = &self.member;
        prevalidate_read::<T>(&m.class, &m.name, &m.signature)?;
        let descriptor = self.member.resolve(env, MemberKind::Field)?;
        invoke::read_field(env, &descriptor, Receiver::Instance(target))
    }

    pub fn set<'a>(
        &self,
        env: &Env<'_>,
        target: &ManagedReference,
        value: impl Into<Arg<'a>>,
    ) -> BridgeResult<()> {
        let m = &self.member;
        let value = value.into();
        prevalidate_write(&m.class, &m.name, &m.signature, &value)?;
        let descriptor = m.resolve(env, MemberKind::Field)?;
        invoke::write_field(env, &descriptor, Receiver::Instance(target), value)
    }
}
