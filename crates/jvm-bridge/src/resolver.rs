//! Member resolution and caching.
//!
//! Looking up classes and members through the runtime is expensive, so
//! every successful lookup is memoized for the life of the bridge. Class
//! lookups are cached as global references. Concurrent first resolutions of
//! the same key may both reach the runtime, but the first insert wins and
//! every caller receives that same descriptor.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::env::Env;
use crate::error::{BridgeError, BridgeResult};
use crate::exception;
use crate::reference::{ManagedReference, RefScope};
use crate::runtime::{ManagedRuntime, MemberHandle};
use crate::signature::{
    class_name_to_internal, internal_to_class_name, package_of, JavaType, MethodSignature,
};
use crate::types::{FieldId, MethodId, ObjectHandle};

/// Name of the constructor pseudo-method.
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// What kind of member a key names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    StaticMethod,
    Constructor,
    Field,
    StaticField,
}

impl MemberKind {
    /// Returns true for static methods and static fields.
    pub fn is_static(self) -> bool {
        matches!(self, MemberKind::StaticMethod | MemberKind::StaticField)
    }

    /// Returns true for fields.
    pub fn is_field(self) -> bool {
        matches!(self, MemberKind::Field | MemberKind::StaticField)
    }
}

/// Cache key for a member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberKey {
    /// Dotted owner class name.
    pub class: String,
    pub name: String,
    /// Method signature or field descriptor.
    pub signature: String,
    pub kind: MemberKind,
}

impl MemberKey {
    pub fn new(
        class: &str,
        name: impl Into<String>,
        signature: impl Into<String>,
        kind: MemberKind,
    ) -> Self {
        Self {
            class: internal_to_class_name(class),
            name: name.into(),
            signature: signature.into(),
            kind,
        }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.signature)
    }
}

/// Type information of a resolved member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberType {
    Method(MethodSignature),
    Field(JavaType),
}

/// Runtime identifier of a resolved member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberIdentity {
    Method(MethodId),
    Field(FieldId),
}

/// A resolved, cached member. Shared between callers via `Arc`.
#[derive(Debug)]
pub struct MemberDescriptor {
    key: MemberKey,
    class: Arc<ManagedReference>,
    identity: MemberIdentity,
    ty: MemberType,
}

impl MemberDescriptor {
    pub fn key(&self) -> &MemberKey {
        &self.key
    }

    /// Global reference to the owning class.
    pub fn class(&self) -> &Arc<ManagedReference> {
        &self.class
    }

    pub fn kind(&self) -> MemberKind {
        self.key.kind
    }

    pub fn identity(&self) -> MemberIdentity {
        self.identity
    }

    pub fn member_type(&self) -> &MemberType {
        &self.ty
    }

    /// Parsed method signature; `None` for fields.
    pub fn method_signature(&self) -> Option<&MethodSignature> {
        match &self.ty {
            MemberType::Method(sig) => Some(sig),
            MemberType::Field(_) => None,
        }
    }

    /// Field type; `None` for methods.
    pub fn field_type(&self) -> Option<&JavaType> {
        match &self.ty {
            MemberType::Field(ty) => Some(ty),
            MemberType::Method(_) => None,
        }
    }

    pub(crate) fn method_id(&self) -> BridgeResult<MethodId> {
        match self.identity {
            MemberIdentity::Method(id) => Ok(id),
            MemberIdentity::Field(_) => Err(BridgeError::invalid_handle(format!(
                "{} is a field, not a method",
                self.key
            ))),
        }
    }

    pub(crate) fn field_id(&self) -> BridgeResult<FieldId> {
        match self.identity {
            MemberIdentity::Field(id) => Ok(id),
            MemberIdentity::Method(_) => Err(BridgeError::invalid_handle(format!(
                "{} is a method, not a field",
                self.key
            ))),
        }
    }
}

/// Which packages require members to carry an export marker.
///
/// Each entry maps a package prefix to whether it requires the marker; the
/// longest matching prefix decides. Packages matching no entry do not
/// require it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportPolicy {
    packages: BTreeMap<String, bool>,
}

impl ExportPolicy {
    pub fn new(packages: BTreeMap<String, bool>) -> Self {
        Self { packages }
    }

    /// Sets whether `package` (and packages below it) requires the marker.
    pub fn set(&mut self, package: impl Into<String>, required: bool) {
        self.packages.insert(package.into(), required);
    }

    /// Returns true if members of classes in `package` need the marker.
    pub fn requires_export(&self, package: &str) -> bool {
        self.packages
            .iter()
            .filter(|(prefix, _)| {
                prefix.is_empty()
                    || package == prefix.as_str()
                    || (package.starts_with(prefix.as_str())
                        && package[prefix.len()..].starts_with('.'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, required)| *required)
            .unwrap_or(false)
    }
}

/// Memoizing resolver for classes and members.
pub struct MemberResolver {
    runtime: Arc<dyn ManagedRuntime>,
    policy: ExportPolicy,
    /// Class exempt from the export check (the bridge's own support class).
    support_class: String,
    classes: RwLock<HashMap<String, Arc<ManagedReference>>>,
    members: RwLock<HashMap<MemberKey, Arc<MemberDescriptor>>>,
    resolutions: AtomicU64,
}

impl MemberResolver {
    pub fn new(runtime: Arc<dyn ManagedRuntime>, policy: ExportPolicy, support_class: &str) -> Self {
        Self {
            runtime,
            policy,
            support_class: internal_to_class_name(support_class),
            classes: RwLock::new(HashMap::new()),
            members: RwLock::new(HashMap::new()),
            resolutions: AtomicU64::new(0),
        }
    }

    /// Number of member lookups that reached the runtime.
    pub fn resolution_count(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    /// Number of cached member descriptors.
    pub fn cached_members(&self) -> usize {
        self.members.read().len()
    }

    /// Number of cached classes.
    pub fn cached_classes(&self) -> usize {
        self.classes.read().len()
    }

    pub fn export_policy(&self) -> &ExportPolicy {
        &self.policy
    }

    /// Returns a cached global reference to the class.
    pub fn class(&self, _env: &Env<'_>, name: &str) -> BridgeResult<Arc<ManagedReference>> {
        let dotted = internal_to_class_name(name);
        if let Some(class) = self.classes.read().get(&dotted) {
            return Ok(class.clone());
        }

        let local = self.runtime.find_class(&class_name_to_internal(&dotted))?;
        if local.is_null() {
            if let Some(e) = exception::take_pending(&self.runtime)? {
                debug!("Class lookup for {} failed: {}", dotted, e);
            }
            return Err(BridgeError::ClassNotFound { class: dotted });
        }
        let local = ManagedReference::wrap(self.runtime.clone(), local, RefScope::Local)?;
        let global = Arc::new(local.to_global()?);

        let mut classes = self.classes.write();
        Ok(classes.entry(dotted).or_insert(global).clone())
    }

    /// Resolves a member, returning the cached descriptor when available.
    pub fn resolve(
        &self,
        env: &Env<'_>,
        class: &str,
        name: &str,
        signature: &str,
        kind: MemberKind,
    ) -> BridgeResult<Arc<MemberDescriptor>> {
        let key = MemberKey::new(class, name, signature, kind);
        if let Some(found) = self.members.read().get(&key) {
            return Ok(found.clone());
        }

        let ty = if kind.is_field() {
            MemberType::Field(JavaType::parse(signature)?)
        } else {
            let sig = MethodSignature::parse(signature)?;
            if kind == MemberKind::Constructor && sig.ret != JavaType::Void {
                return Err(BridgeError::invalid_signature(
                    signature,
                    "constructors return void",
                ));
            }
            MemberType::Method(sig)
        };

        let owner = self.class(env, &key.class)?;
        let class_handle = owner.get()?;
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        let identity = if kind.is_field() {
            let id = self
                .runtime
                .field_id(class_handle, name, signature, kind.is_static())?;
            (!id.is_null()).then_some(MemberIdentity::Field(id))
        } else {
            let id = self
                .runtime
                .method_id(class_handle, name, signature, kind.is_static())?;
            (!id.is_null()).then_some(MemberIdentity::Method(id))
        };
        let Some(identity) = identity else {
            if let Some(e) = exception::take_pending(&self.runtime)? {
                debug!("Member lookup for {} failed: {}", key, e);
            }
            return Err(BridgeError::member_not_found(&key.class, name, signature));
        };

        self.check_export(class_handle, &key, identity)?;

        debug!("Resolved {}", key);
        let descriptor = Arc::new(MemberDescriptor {
            key: key.clone(),
            class: owner,
            identity,
            ty,
        });
        let mut members = self.members.write();
        Ok(members.entry(key).or_insert(descriptor).clone())
    }

    fn check_export(
        &self,
        class: ObjectHandle,
        key: &MemberKey,
        identity: MemberIdentity,
    ) -> BridgeResult<()> {
        if key.class == self.support_class || !self.policy.requires_export(&package_of(&key.class)) {
            return Ok(());
        }
        let member = match identity {
            MemberIdentity::Method(id) => MemberHandle::Method(id),
            MemberIdentity::Field(id) => MemberHandle::Field(id),
        };
        if self.runtime.has_export_marker(class, member, key.kind.is_static())? {
            Ok(())
        } else {
            Err(BridgeError::MemberNotExported {
                class: key.class.clone(),
                name: key.name.clone(),
            })
        }
    }

    /// Drops every cached class and member.
    pub fn clear(&self) {
        self.members.write().clear();
        self.classes.write().clear();
    }
}
