//! Boxed primitive conversion.
//!
//! Managed collections hold primitives as wrapper objects
//! (`java.lang.Integer` and friends). These helpers box a native value
//! through the wrapper's `valueOf` and unbox it through its `xxxValue`
//! accessor.

use crate::env::Env;
use crate::error::BridgeResult;
use crate::reference::ManagedReference;
use crate::signature::{class_descriptor, JavaType};
use crate::value::{Arg, FromManaged};

/// A primitive with a managed wrapper class.
pub trait BoxedPrimitive: FromManaged + Into<Arg<'static>> + Copy {
    /// Dotted wrapper class name.
    const CLASS: &'static str;
    /// Name of the unboxing accessor.
    const UNBOX: &'static str;

    fn primitive_type() -> JavaType;
}

macro_rules! boxed_primitive {
    ($($ty:ty => $class:literal, $unbox:literal, $jt:ident);* $(;)?) => {
        $(
            impl BoxedPrimitive for $ty {
                const CLASS: &'static str = $class;
                const UNBOX: &'static str = $unbox;

                fn primitive_type() -> JavaType {
                    JavaType::$jt
                }
            }
        )*
    };
}

boxed_primitive! {
    bool => "java.lang.Boolean", "booleanValue", Boolean;
    i8 => "java.lang.Byte", "byteValue", Byte;
    u16 => "java.lang.Character", "charValue", Char;
    i16 => "java.lang.Short", "shortValue", Short;
    i32 => "java.lang.Integer", "intValue", Int;
    i64 => "java.lang.Long", "longValue", Long;
    f32 => "java.lang.Float", "floatValue", Float;
    f64 => "java.lang.Double", "doubleValue", Double;
}

/// Signature of the wrapper's `valueOf`.
fn value_of_signature<T: BoxedPrimitive>() -> String {
    format!(
        "({}){}",
        T::primitive_type().descriptor(),
        class_descriptor(T::CLASS)
    )
}

/// Signature of the wrapper's unboxing accessor.
fn unbox_signature<T: BoxedPrimitive>() -> String {
    format!("(){}", T::primitive_type().descriptor())
}

impl Env<'_> {
    /// Boxes a primitive into its wrapper object.
    pub fn box_value<T: BoxedPrimitive>(&self, value: T) -> BridgeResult<ManagedReference> {
        self.call_static(
            T::CLASS,
            "valueOf",
            &value_of_signature::<T>(),
            &[value.into()],
        )
    }

    /// Unboxes a wrapper object.
    pub fn unbox<T: BoxedPrimitive>(&self, boxed: &ManagedReference) -> BridgeResult<T> {
        self.call_method(boxed, T::CLASS, T::UNBOX, &unbox_signature::<T>(), &[])
    }
}
