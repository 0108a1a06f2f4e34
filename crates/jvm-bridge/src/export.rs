//! The export surface.
//!
//! Native functions made callable from managed code are collected into an
//! [`ExportTable`] and registered with the runtime at module load. The
//! bridge's own support class exports logging and a singleton registry
//! through which managed code hands objects to native code by name.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::env::Env;
use crate::error::{BridgeError, BridgeResult};
use crate::reference::ManagedReference;
use crate::signature::{internal_to_class_name, MethodSignature};

/// Pointer to a native function implementing a managed `native` method.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NativeFn(*mut c_void);

// SAFETY: the pointer names immutable code; it is never dereferenced as data.
unsafe impl Send for NativeFn {}
// SAFETY: as above.
unsafe impl Sync for NativeFn {}

impl NativeFn {
    pub fn new(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({:p})", self.0)
    }
}

/// One native method binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeMethod {
    pub name: String,
    pub signature: String,
    pub fn_ptr: NativeFn,
}

/// Native methods to register, grouped by dotted class name. Immutable once
/// built.
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    classes: BTreeMap<String, Vec<NativeMethod>>,
}

impl ExportTable {
    pub fn builder() -> ExportTableBuilder {
        ExportTableBuilder::default()
    }

    /// A table with no exports.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Total number of native methods.
    pub fn len(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Methods exported for `class`.
    pub fn methods(&self, class: &str) -> &[NativeMethod] {
        self.classes
            .get(&internal_to_class_name(class))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Binds every class's natives through the runtime.
    pub fn register(&self, env: &Env<'_>) -> BridgeResult<()> {
        for (class, methods) in &self.classes {
            let owner = env.find_class(class)?;
            let result = env.runtime().register_natives(owner.get()?, methods);
            env.exception_check()?;
            result?;
            info!("Registered {} native methods on {}", methods.len(), class);
        }
        Ok(())
    }
}

/// Builder for [`ExportTable`].
#[derive(Debug, Default)]
pub struct ExportTableBuilder {
    classes: BTreeMap<String, Vec<NativeMethod>>,
}

impl ExportTableBuilder {
    /// Adds a native method to `class`.
    pub fn export(mut self, class: &str, name: &str, signature: &str, fn_ptr: NativeFn) -> Self {
        self.classes
            .entry(internal_to_class_name(class))
            .or_default()
            .push(NativeMethod {
                name: name.to_string(),
                signature: signature.to_string(),
                fn_ptr,
            });
        self
    }

    /// Validates signatures and uniqueness, then freezes the table.
    pub fn build(self) -> BridgeResult<ExportTable> {
        for (class, methods) in &self.classes {
            for (i, m) in methods.iter().enumerate() {
                MethodSignature::parse(&m.signature)?;
                if m.fn_ptr.is_null() {
                    return Err(BridgeError::config(
                        format!("{}.{}", class, m.name),
                        "null function pointer",
                    ));
                }
                let duplicate = methods[..i]
                    .iter()
                    .any(|o| o.name == m.name && o.signature == m.signature);
                if duplicate {
                    return Err(BridgeError::config(
                        format!("{}.{}{}", class, m.name, m.signature),
                        "exported twice",
                    ));
                }
            }
        }
        Ok(ExportTable {
            classes: self.classes,
        })
    }
}

/// Managed objects registered by name, held as global references.
#[derive(Default)]
pub struct ManagedSingletons {
    entries: Mutex<HashMap<String, ManagedReference>>,
}

impl ManagedSingletons {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `object` under `name`.
    ///
    /// Registering the object already held is a no-op. Registering a
    /// different object replaces and releases the previous one.
    pub fn register(&self, _env: &Env<'_>, name: &str, object: &ManagedReference) -> BridgeResult<()> {
        if object.is_null()? {
            return Err(BridgeError::invalid_handle(format!(
                "null singleton for '{}'",
                name
            )));
        }
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(name) {
            if existing.is_same(object)? {
                return Ok(());
            }
        }
        let global = object.to_global()?;
        let previous = entries.insert(name.to_string(), global);
        drop(entries);
        if previous.is_some() {
            debug!("Replaced singleton '{}'", name);
        }
        Ok(())
    }

    /// Removes `name` only if it currently holds `object`. Returns true if
    /// an entry was removed.
    pub fn unregister(&self, name: &str, object: &ManagedReference) -> BridgeResult<bool> {
        let mut entries = self.entries.lock();
        let matches = match entries.get(name) {
            Some(existing) => existing.is_same(object)?,
            None => false,
        };
        let removed = if matches { entries.remove(name) } else { None };
        drop(entries);
        Ok(removed.is_some())
    }

    /// Removes every entry, returning how many were held.
    pub fn unregister_all(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        drained.len()
    }

    /// Returns a new global reference to the object registered as `name`.
    pub fn get(&self, _env: &Env<'_>, name: &str) -> BridgeResult<Option<ManagedReference>> {
        let entries = self.entries.lock();
        entries.get(name).map(ManagedReference::try_clone).transpose()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

type NativeObject = Arc<dyn Any + Send + Sync>;

static NATIVE_OBJECTS: Lazy<RwLock<HashMap<String, NativeObject>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a native object under a well-known name, replacing any
/// previous one.
pub fn register_native<T: Any + Send + Sync>(name: &str, object: Arc<T>) {
    NATIVE_OBJECTS.write().insert(name.to_string(), object);
}

/// Looks up a native object registered under `name` with type `T`.
pub fn native<T: Any + Send + Sync>(name: &str) -> Option<Arc<T>> {
    let object = NATIVE_OBJECTS.read().get(name)?.clone();
    object.downcast::<T>().ok()
}

/// Removes the native object registered under `name`.
pub fn unregister_native(name: &str) -> bool {
    NATIVE_OBJECTS.write().remove(name).is_some()
}

/// Core of the support class's native methods, independent of the
/// runtime's calling convention.
pub mod natives {
    use super::*;
    use crate::logging::{self, LogLevel};

    /// Native methods of the support class as (name, signature).
    pub const SUPPORT_METHODS: &[(&str, &str)] = &[
        ("nativeLog", "(ILjava/lang/String;)V"),
        ("registerSingleton", "(Ljava/lang/String;Ljava/lang/Object;)V"),
        ("unregisterSingleton", "(Ljava/lang/String;Ljava/lang/Object;)V"),
        ("unregisterAllSingletons", "()V"),
    ];

    /// Forwards a managed log call to the native sink.
    pub fn native_log(level: i32, message: &str) {
        logging::log(LogLevel::from_raw(level), &logging::tag(), message);
    }

    pub fn register_singleton(
        env: &Env<'_>,
        name: &ManagedReference,
        object: &ManagedReference,
    ) -> BridgeResult<()> {
        let name = env.read_string(name)?;
        env.bridge().singletons().register(env, &name, object)
    }

    pub fn unregister_singleton(
        env: &Env<'_>,
        name: &ManagedReference,
        object: &ManagedReference,
    ) -> BridgeResult<()> {
        let name = env.read_string(name)?;
        if !env.bridge().singletons().unregister(&name, object)? {
            debug!("Singleton '{}' not held by the given object", name);
        }
        Ok(())
    }

    pub fn unregister_all_singletons(env: &Env<'_>) -> BridgeResult<()> {
        let removed = env.bridge().singletons().unregister_all();
        debug!("Released {} singletons", removed);
        Ok(())
    }

    /// Reports a native failure to managed code by raising an exception
    /// that surfaces when the native method returns.
    pub fn throw_error(env: &Env<'_>, err: &BridgeError) {
        let (class, message) = match err.managed_exception() {
            Some(e) => (e.class_name.clone(), e.message.clone()),
            None => (
                "java.lang.IllegalStateException".to_string(),
                err.to_string(),
            ),
        };
        if let Err(e) = env.throw_new(&class, &message) {
            warn!("Could not raise {} in managed code: {}", class, e);
            if let Err(e) = env.throw_new("java.lang.RuntimeException", &message) {
                warn!("Could not raise fallback exception: {}", e);
            }
        }
    }
}
