//! Type-safe identifiers for managed-runtime entities.
//!
//! The runtime hands out three kinds of opaque pointer-sized values: object
//! handles, method identifiers and field identifiers. They share a
//! representation but must never be mixed, so each is a distinct
//! instantiation of [`ManagedId`].

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw identifier type (matches the pointer-sized `jobject`/`jmethodID`).
pub type RawId = usize;

/// Marker trait for identifier kinds.
pub trait IdKind: Send + Sync + 'static {
    /// Returns the kind name for debugging.
    fn type_name() -> &'static str;
}

/// A type-safe runtime identifier.
///
/// ```
/// use jvm_bridge::{FieldId, MethodId};
///
/// let m = MethodId::from_raw(0x10).unwrap();
/// let f = FieldId::from_raw(0x10).unwrap();
/// assert_eq!(m.as_raw(), f.as_raw());
/// // fn takes_method(m: MethodId) {}
/// // takes_method(f); // Error: expected MethodId, found FieldId
/// ```
pub struct ManagedId<T: IdKind> {
    raw: RawId,
    _marker: PhantomData<T>,
}

impl<T: IdKind> ManagedId<T> {
    /// The null identifier.
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    /// Creates an identifier from a raw value.
    ///
    /// Returns `None` for the null value.
    pub fn from_raw(raw: RawId) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self {
                raw,
                _marker: PhantomData,
            })
        }
    }

    /// Creates an identifier from a raw value, including null.
    pub const fn from_raw_unchecked(raw: RawId) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Returns the raw value.
    pub const fn as_raw(&self) -> RawId {
        self.raw
    }

    /// Returns true if this is the null identifier.
    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }
}

// Manual impls so that `T` does not need to be Clone/Eq itself.
impl<T: IdKind> Clone for ManagedId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdKind> Copy for ManagedId<T> {}

impl<T: IdKind> fmt::Debug for ManagedId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:x})", T::type_name(), self.raw)
    }
}

impl<T: IdKind> fmt::Display for ManagedId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.raw)
    }
}

impl<T: IdKind> PartialEq for ManagedId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: IdKind> Eq for ManagedId<T> {}

impl<T: IdKind> Hash for ManagedId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: IdKind> Default for ManagedId<T> {
    fn default() -> Self {
        Self::NULL
    }
}

macro_rules! define_id_kind {
    ($name:ident, $type_name:literal, $alias:ident) => {
        #[doc = concat!("Marker type for ", $type_name, " identifiers.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl IdKind for $name {
            fn type_name() -> &'static str {
                $type_name
            }
        }

        #[doc = concat!("Type alias for ", $type_name, " identifiers.")]
        pub type $alias = ManagedId<$name>;
    };
}

define_id_kind!(ObjectKind, "Object", ObjectHandle);
define_id_kind!(MethodKind, "Method", MethodId);
define_id_kind!(FieldKind, "Field", FieldId);
