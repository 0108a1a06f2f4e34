//! Values crossing the boundary.
//!
//! [`Arg`] is what native callers pass in, [`BoundaryValue`] is the raw
//! runtime representation, and [`FromManaged`] converts results back into
//! native types. Type checking happens on the native side before a call is
//! made, so a mismatch never reaches the runtime.

use crate::env::Env;
use crate::error::{BridgeError, BridgeResult};
use crate::reference::ManagedReference;
use crate::signature::{JavaType, ValueKind, OBJECT_CLASS, STRING_CLASS};
use crate::types::ObjectHandle;

/// A value in the runtime's calling convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryValue {
    Void,
    Boolean(bool),
    Byte(i8),
    /// UTF-16 code unit.
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(ObjectHandle),
}

impl BoundaryValue {
    /// Returns the value category.
    pub fn kind(&self) -> ValueKind {
        match self {
            BoundaryValue::Void => ValueKind::Void,
            BoundaryValue::Boolean(_) => ValueKind::Boolean,
            BoundaryValue::Byte(_) => ValueKind::Byte,
            BoundaryValue::Char(_) => ValueKind::Char,
            BoundaryValue::Short(_) => ValueKind::Short,
            BoundaryValue::Int(_) => ValueKind::Int,
            BoundaryValue::Long(_) => ValueKind::Long,
            BoundaryValue::Float(_) => ValueKind::Float,
            BoundaryValue::Double(_) => ValueKind::Double,
            BoundaryValue::Object(_) => ValueKind::Object,
        }
    }

    /// The zero value of a kind, as returned alongside a pending exception.
    pub fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Void => BoundaryValue::Void,
            ValueKind::Boolean => BoundaryValue::Boolean(false),
            ValueKind::Byte => BoundaryValue::Byte(0),
            ValueKind::Char => BoundaryValue::Char(0),
            ValueKind::Short => BoundaryValue::Short(0),
            ValueKind::Int => BoundaryValue::Int(0),
            ValueKind::Long => BoundaryValue::Long(0),
            ValueKind::Float => BoundaryValue::Float(0.0),
            ValueKind::Double => BoundaryValue::Double(0.0),
            ValueKind::Object => BoundaryValue::Object(ObjectHandle::NULL),
        }
    }
}

/// Short descriptor of a value kind for error messages.
pub(crate) fn kind_code(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Void => "V",
        ValueKind::Boolean => "Z",
        ValueKind::Byte => "B",
        ValueKind::Char => "C",
        ValueKind::Short => "S",
        ValueKind::Int => "I",
        ValueKind::Long => "J",
        ValueKind::Float => "F",
        ValueKind::Double => "D",
        ValueKind::Object => "object",
    }
}

/// A native argument for a managed call.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Encoded as a temporary managed string for the duration of the call.
    Str(&'a str),
    Object(&'a ManagedReference),
    Null,
}

impl Arg<'_> {
    /// Descriptor-like name of the argument's native type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Arg::Boolean(_) => "Z",
            Arg::Byte(_) => "B",
            Arg::Char(_) => "C",
            Arg::Short(_) => "S",
            Arg::Int(_) => "I",
            Arg::Long(_) => "J",
            Arg::Float(_) => "F",
            Arg::Double(_) => "D",
            Arg::Str(_) => "Ljava/lang/String;",
            Arg::Object(_) => "object",
            Arg::Null => "null",
        }
    }

    /// Returns true if the argument can be passed for a parameter of `ty`.
    ///
    /// Primitives must match exactly. Strings are accepted for `String`,
    /// `CharSequence` and `Object` parameters. Object references and null
    /// are accepted for any reference type; the runtime checks the class.
    pub fn accepts(&self, ty: &JavaType) -> bool {
        match (self, ty) {
            (Arg::Boolean(_), JavaType::Boolean)
            | (Arg::Byte(_), JavaType::Byte)
            | (Arg::Char(_), JavaType::Char)
            | (Arg::Short(_), JavaType::Short)
            | (Arg::Int(_), JavaType::Int)
            | (Arg::Long(_), JavaType::Long)
            | (Arg::Float(_), JavaType::Float)
            | (Arg::Double(_), JavaType::Double) => true,
            (Arg::Str(_), JavaType::Object(name)) => {
                name == STRING_CLASS || name == OBJECT_CLASS || name == "java/lang/CharSequence"
            }
            (Arg::Object(_) | Arg::Null, ty) => ty.is_reference(),
            _ => false,
        }
    }

    /// Returns the parameter type this argument maps to when a signature is
    /// inferred from the arguments.
    pub fn inferred_type(&self) -> JavaType {
        match self {
            Arg::Boolean(_) => JavaType::Boolean,
            Arg::Byte(_) => JavaType::Byte,
            Arg::Char(_) => JavaType::Char,
            Arg::Short(_) => JavaType::Short,
            Arg::Int(_) => JavaType::Int,
            Arg::Long(_) => JavaType::Long,
            Arg::Float(_) => JavaType::Float,
            Arg::Double(_) => JavaType::Double,
            Arg::Str(_) => JavaType::string(),
            Arg::Object(_) | Arg::Null => JavaType::Object(OBJECT_CLASS.to_string()),
        }
    }
}

macro_rules! arg_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Arg<'_> {
                fn from(v: $ty) -> Self {
                    Arg::$variant(v)
                }
            }
        )*
    };
}

arg_from! {
    bool => Boolean,
    i8 => Byte,
    u16 => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(v: &'a str) -> Self {
        Arg::Str(v)
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(v: &'a String) -> Self {
        Arg::Str(v.as_str())
    }
}

impl<'a> From<&'a ManagedReference> for Arg<'a> {
    fn from(v: &'a ManagedReference) -> Self {
        Arg::Object(v)
    }
}

impl<'a> From<Option<&'a ManagedReference>> for Arg<'a> {
    fn from(v: Option<&'a ManagedReference>) -> Self {
        v.map_or(Arg::Null, Arg::Object)
    }
}

/// Conversion from a managed return value or field value.
pub trait FromManaged: Sized {
    /// Return type used when a signature is inferred.
    fn return_type() -> JavaType;

    /// Returns true if a member of type `ty` can be read as `Self`.
    fn accepts(ty: &JavaType) -> bool;

    /// Converts the raw value. Object handles are owned locals.
    fn from_boundary(env: &Env<'_>, value: BoundaryValue) -> BridgeResult<Self>;
}

macro_rules! primitive_from_managed {
    ($($ty:ty => $variant:ident, $jt:ident);* $(;)?) => {
        $(
            impl FromManaged for $ty {
                fn return_type() -> JavaType {
                    JavaType::$jt
                }

                fn accepts(ty: &JavaType) -> bool {
                    *ty == JavaType::$jt
                }

                fn from_boundary(_env: &Env<'_>, value: BoundaryValue) -> BridgeResult<Self> {
                    match value {
                        BoundaryValue::$variant(v) => Ok(v),
                        other => Err(BridgeError::type_mismatch(
                            "return value",
                            kind_code(ValueKind::$variant),
                            kind_code(other.kind()),
                        )),
                    }
                }
            }
        )*
    };
}

primitive_from_managed! {
    bool => Boolean, Boolean;
    i8 => Byte, Byte;
    u16 => Char, Char;
    i16 => Short, Short;
    i32 => Int, Int;
    i64 => Long, Long;
    f32 => Float, Float;
    f64 => Double, Double;
}

impl FromManaged for () {
    fn return_type() -> JavaType {
        JavaType::Void
    }

    fn accepts(ty: &JavaType) -> bool {
        *ty == JavaType::Void
    }

    fn from_boundary(_env: &Env<'_>, value: BoundaryValue) -> BridgeResult<Self> {
        match value {
            BoundaryValue::Void => Ok(()),
            other => Err(BridgeError::type_mismatch(
                "return value",
                "V",
                kind_code(other.kind()),
            )),
        }
    }
}

fn object_handle(value: BoundaryValue) -> BridgeResult<ObjectHandle> {
    match value {
        BoundaryValue::Object(h) => Ok(h),
        other => Err(BridgeError::type_mismatch(
            "return value",
            "object",
            kind_code(other.kind()),
        )),
    }
}

impl FromManaged for Option<ManagedReference> {
    fn return_type() -> JavaType {
        JavaType::Object(OBJECT_CLASS.to_string())
    }

    fn accepts(ty: &JavaType) -> bool {
        ty.is_reference()
    }

    fn from_boundary(env: &Env<'_>, value: BoundaryValue) -> BridgeResult<Self> {
        let handle = object_handle(value)?;
        if handle.is_null() {
            Ok(None)
        } else {
            Ok(Some(env.wrap_local(handle)))
        }
    }
}

impl FromManaged for ManagedReference {
    fn return_type() -> JavaType {
        JavaType::Object(OBJECT_CLASS.to_string())
    }

    fn accepts(ty: &JavaType) -> bool {
        ty.is_reference()
    }

    /// A null result is an error; use `Option<ManagedReference>` for
    /// members that may return null.
    fn from_boundary(env: &Env<'_>, value: BoundaryValue) -> BridgeResult<Self> {
        Option::<ManagedReference>::from_boundary(env, value)?
            .ok_or_else(|| BridgeError::invalid_handle("null object returned"))
    }
}

impl FromManaged for Option<String> {
    fn return_type() -> JavaType {
        JavaType::string()
    }

    fn accepts(ty: &JavaType) -> bool {
        ty.is_string()
    }

    fn from_boundary(env: &Env<'_>, value: BoundaryValue) -> BridgeResult<Self> {
        match Option::<ManagedReference>::from_boundary(env, value)? {
            Some(r) => env.read_string(&r).map(Some),
            None => Ok(None),
        }
    }
}

impl FromManaged for String {
    fn return_type() -> JavaType {
        JavaType::string()
    }

    fn accepts(ty: &JavaType) -> bool {
        ty.is_string()
    }

    fn from_boundary(env: &Env<'_>, value: BoundaryValue) -> BridgeResult<Self> {
        Option::<String>::from_boundary(env, value)?
            .ok_or_else(|| BridgeError::invalid_handle("null string returned"))
    }
}
