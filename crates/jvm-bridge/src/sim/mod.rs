//! An in-process managed runtime.
//!
//! [`SimRuntime`] implements [`ManagedRuntime`] over a small object heap so
//! the bridge can be exercised without a JVM. It follows the runtime's
//! rules closely enough to catch misuse: failing operations leave a pending
//! exception and return null, local references belong to one thread and
//! one frame, and every call made while an exception is pending, or from a
//! thread that is not attached, is counted in [`SimStats`].

mod builtins;
mod heap;

pub use heap::{ObjId, Payload, SimClass, SimHeap, SimObject, SimResult, SimThrow, SimValue};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use log::{debug, trace};
use parking_lot::{Mutex, MutexGuard};

use crate::error::{BridgeError, BridgeResult};
use crate::export::NativeMethod;
use crate::reference::RefScope;
use crate::runtime::{InvokeTarget, ManagedRuntime, MemberHandle};
use crate::signature::{
    class_name_to_internal, internal_to_class_name, MethodSignature, ValueKind,
};
use crate::status::JniStatus;
use crate::types::{FieldId, MethodId, ObjectHandle, RawId};
use crate::value::BoundaryValue;

/// Counters and reference census of a [`SimRuntime`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Every runtime operation.
    pub ops: u64,
    /// Method calls, constructions and field accesses.
    pub boundary_calls: u64,
    /// Method and field id lookups.
    pub member_lookups: u64,
    pub attaches: u64,
    pub detaches: u64,
    /// Operations given a released, foreign or unknown handle.
    pub invalid_handle_uses: u64,
    /// Operations other than exception handling and reference release made
    /// while an exception was pending.
    pub calls_with_pending_exception: u64,
    /// Operations made from a thread that was not attached.
    pub unattached_calls: u64,
    pub live_locals: usize,
    pub live_globals: usize,
    pub live_weaks: usize,
}

/// A native method bound by registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredNative {
    /// Dotted class name.
    pub class: String,
    pub name: String,
    pub signature: String,
}

/// An exception that reached managed code when a native method returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrownToManaged {
    /// Dotted class name.
    pub class: String,
    pub message: Option<String>,
}

#[derive(Default)]
struct Counters {
    ops: AtomicU64,
    boundary_calls: AtomicU64,
    member_lookups: AtomicU64,
    attaches: AtomicU64,
    detaches: AtomicU64,
    invalid_handle_uses: AtomicU64,
    calls_with_pending_exception: AtomicU64,
    unattached_calls: AtomicU64,
}

struct RefEntry {
    object: ObjId,
    scope: RefScope,
    thread: ThreadId,
}

#[derive(Default)]
struct ThreadState {
    attached: bool,
    /// Attached because managed code called into native code.
    in_managed_call: bool,
    frames: Vec<Vec<RawId>>,
    pending: Option<ObjId>,
}

/// Declaring class and index of a method or field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemberSlot {
    class: String,
    index: usize,
}

#[derive(Default)]
struct SimState {
    heap: SimHeap,
    refs: HashMap<RawId, RefEntry>,
    next_handle: RawId,
    threads: HashMap<ThreadId, ThreadState>,
    methods: Vec<MemberSlot>,
    method_ids: HashMap<MemberSlot, RawId>,
    fields: Vec<MemberSlot>,
    field_ids: HashMap<MemberSlot, RawId>,
    natives: Vec<RegisteredNative>,
    shutting_down: bool,
    reference_budget: Option<usize>,
    /// Most locals a thread may hold at once.
    local_limit: Option<usize>,
    fail_next_decode: bool,
    thrown_to_managed: Vec<ThrownToManaged>,
}

/// How an operation relates to the pending-exception rule.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    /// Legal while an exception is pending.
    ExceptionSafe,
    /// Must not run while an exception is pending.
    Checked,
}

/// The simulated runtime.
pub struct SimRuntime {
    state: Mutex<SimState>,
    counters: Counters,
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRuntime {
    /// Creates a runtime with the core library classes installed.
    pub fn new() -> Self {
        let mut state = SimState {
            next_handle: 0x1000,
            ..Default::default()
        };
        builtins::install(&mut state.heap);
        Self {
            state: Mutex::new(state),
            counters: Counters::default(),
        }
    }

    /// Installs an application class.
    pub fn define_class(&self, class: SimClass) {
        debug!("Defining simulated class {}", internal_to_class_name(class.name()));
        self.state.lock().heap.define(class);
    }

    pub fn stats(&self) -> SimStats {
        let state = self.state.lock();
        let count = |scope: RefScope| state.refs.values().filter(|r| r.scope == scope).count();
        SimStats {
            ops: self.counters.ops.load(Ordering::Relaxed),
            boundary_calls: self.counters.boundary_calls.load(Ordering::Relaxed),
            member_lookups: self.counters.member_lookups.load(Ordering::Relaxed),
            attaches: self.counters.attaches.load(Ordering::Relaxed),
            detaches: self.counters.detaches.load(Ordering::Relaxed),
            invalid_handle_uses: self.counters.invalid_handle_uses.load(Ordering::Relaxed),
            calls_with_pending_exception: self
                .counters
                .calls_with_pending_exception
                .load(Ordering::Relaxed),
            unattached_calls: self.counters.unattached_calls.load(Ordering::Relaxed),
            live_locals: count(RefScope::Local),
            live_globals: count(RefScope::Global),
            live_weaks: count(RefScope::Weak),
        }
    }

    /// Frees objects reachable only through weak references. Returns the
    /// number of objects freed.
    pub fn collect_garbage(&self) -> usize {
        let mut state = self.state.lock();
        let state = &mut *state;
        let roots: Vec<ObjId> = state
            .refs
            .values()
            .filter(|r| r.scope != RefScope::Weak)
            .map(|r| r.object)
            .chain(state.threads.values().filter_map(|t| t.pending))
            .collect();
        let freed = state.heap.collect(roots);
        debug!("Simulated collection freed {} objects", freed);
        freed
    }

    /// Makes every later attach request fail, as a runtime does once it has
    /// begun shutting down.
    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
    }

    /// Limits how many more references may be created. `None` removes the
    /// limit.
    pub fn limit_references(&self, remaining: Option<usize>) {
        self.state.lock().reference_budget = remaining;
    }

    /// Caps the number of locals a single thread may hold at once, like a
    /// fixed-size local reference table. `None` removes the cap.
    pub fn limit_live_locals(&self, limit: Option<usize>) {
        self.state.lock().local_limit = limit;
    }

    /// Makes the next string decode fail the way it does when the runtime
    /// cannot allocate the UTF-8 copy: an `OutOfMemoryError` is raised.
    pub fn fail_next_string_decode(&self) {
        self.state.lock().fail_next_decode = true;
    }

    /// Natives bound so far, in registration order.
    pub fn registered_natives(&self) -> Vec<RegisteredNative> {
        self.state.lock().natives.clone()
    }

    /// Exceptions that native methods left pending for managed code.
    pub fn thrown_to_managed(&self) -> Vec<ThrownToManaged> {
        self.state.lock().thrown_to_managed.clone()
    }

    /// Reads a static field directly from the heap.
    pub fn static_value(&self, class: &str, name: &str) -> SimValue {
        self.state.lock().heap.get_static(class, name)
    }

    /// Runs `f` as a native method invoked by managed code on the current
    /// thread.
    ///
    /// The thread counts as attached by the runtime for the duration, and
    /// locals created inside are freed on return. An exception still
    /// pending afterwards is recorded as thrown to managed code.
    pub fn call_from_managed<R>(&self, f: impl FnOnce() -> R) -> R {
        let tid = thread::current().id();
        let previous = {
            let mut state = self.state.lock();
            let t = state.threads.entry(tid).or_default();
            let previous = (t.attached, t.in_managed_call);
            t.attached = true;
            t.in_managed_call = true;
            t.frames.push(Vec::new());
            previous
        };

        let result = f();

        let mut state = self.state.lock();
        let state = &mut *state;
        let t = state.threads.entry(tid).or_default();
        let freed = t.frames.pop().unwrap_or_default();
        let pending = t.pending.take();
        (t.attached, t.in_managed_call) = previous;
        if !t.attached {
            t.frames.clear();
        }
        for handle in freed {
            state.refs.remove(&handle);
        }
        if let Some(exc) = pending {
            let thrown = ThrownToManaged {
                class: internal_to_class_name(state.heap.class_of(exc).unwrap_or("?")),
                message: match state.heap.get_field(exc, "message") {
                    SimValue::Object(Some(id)) => state.heap.string(id).map(str::to_string),
                    _ => None,
                },
            };
            debug!("Native method returned with {} pending", thrown.class);
            state.thrown_to_managed.push(thrown);
        }
        result
    }

    /// Common bookkeeping for every operation on the calling thread.
    fn enter(&self, access: Access) -> (MutexGuard<'_, SimState>, ThreadId) {
        self.counters.ops.fetch_add(1, Ordering::Relaxed);
        let tid = thread::current().id();
        let state = self.state.lock();
        match state.threads.get(&tid) {
            Some(t) if t.attached => {
                if access == Access::Checked && t.pending.is_some() {
                    self.counters
                        .calls_with_pending_exception
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
            _ => {
                self.counters.unattached_calls.fetch_add(1, Ordering::Relaxed);
            }
        }
        (state, tid)
    }

    fn invalid(&self, what: &str, handle: RawId) {
        self.counters.invalid_handle_uses.fetch_add(1, Ordering::Relaxed);
        debug!("Invalid {} handle 0x{:x}", what, handle);
    }
}

impl SimState {
    /// Looks up the object behind a handle. Null, collected weak referents
    /// and invalid handles all resolve to `None`; invalid ones are reported
    /// through `invalid`.
    fn object(&self, handle: ObjectHandle, tid: ThreadId, invalid: impl Fn()) -> Option<ObjId> {
        if handle.is_null() {
            return None;
        }
        match self.refs.get(&handle.as_raw()) {
            Some(r) if r.scope == RefScope::Local && r.thread != tid => {
                invalid();
                None
            }
            Some(r) => self.heap.contains(r.object).then_some(r.object),
            None => {
                invalid();
                None
            }
        }
    }

    fn thread(&mut self, tid: ThreadId) -> &mut ThreadState {
        self.threads.entry(tid).or_default()
    }

    fn take_budget(&mut self) -> bool {
        match self.reference_budget.as_mut() {
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
            None => true,
        }
    }

    fn new_handle(
        &mut self,
        object: ObjId,
        scope: RefScope,
        tid: ThreadId,
    ) -> Option<ObjectHandle> {
        if scope == RefScope::Local {
            if let Some(limit) = self.local_limit {
                let live: usize = self.thread(tid).frames.iter().map(Vec::len).sum();
                if live >= limit {
                    return None;
                }
            }
        }
        if !self.take_budget() {
            return None;
        }
        self.next_handle += 8;
        let raw = self.next_handle;
        self.refs.insert(
            raw,
            RefEntry {
                object,
                scope,
                thread: tid,
            },
        );
        if scope == RefScope::Local {
            let t = self.thread(tid);
            if t.frames.is_empty() {
                t.frames.push(Vec::new());
            }
            if let Some(top) = t.frames.last_mut() {
                top.push(raw);
            }
        }
        Some(ObjectHandle::from_raw_unchecked(raw))
    }

    /// Returns a new local reference, or null if `object` is null or the
    /// reference budget is spent.
    fn local(&mut self, object: Option<ObjId>, tid: ThreadId) -> ObjectHandle {
        match object {
            Some(id) => match self.new_handle(id, RefScope::Local, tid) {
                Some(handle) => handle,
                None => {
                    let oom =
                        SimThrow::new("java/lang/OutOfMemoryError", "local reference table overflow");
                    self.raise(tid, &oom, "<runtime>");
                    ObjectHandle::NULL
                }
            },
            None => ObjectHandle::NULL,
        }
    }

    fn raise(&mut self, tid: ThreadId, thrown: &SimThrow, frame: &str) {
        trace!("Raising {} at {}", thrown.class, frame);
        let exc = self.heap.new_throwable(thrown, frame);
        self.thread(tid).pending = Some(exc);
    }

    fn class_name(&self, class: ObjectHandle, tid: ThreadId, invalid: impl Fn()) -> Option<String> {
        let id = self.object(class, tid, invalid)?;
        self.heap.class_name(id).map(str::to_string)
    }

    fn to_sim(&self, value: BoundaryValue, tid: ThreadId, invalid: impl Fn()) -> SimValue {
        match value {
            BoundaryValue::Void => SimValue::Void,
            BoundaryValue::Boolean(v) => SimValue::Boolean(v),
            BoundaryValue::Byte(v) => SimValue::Byte(v),
            BoundaryValue::Char(v) => SimValue::Char(v),
            BoundaryValue::Short(v) => SimValue::Short(v),
            BoundaryValue::Int(v) => SimValue::Int(v),
            BoundaryValue::Long(v) => SimValue::Long(v),
            BoundaryValue::Float(v) => SimValue::Float(v),
            BoundaryValue::Double(v) => SimValue::Double(v),
            BoundaryValue::Object(h) => SimValue::Object(self.object(h, tid, invalid)),
        }
    }

    fn to_boundary(&mut self, value: SimValue, tid: ThreadId) -> BoundaryValue {
        match value {
            SimValue::Void => BoundaryValue::Void,
            SimValue::Boolean(v) => BoundaryValue::Boolean(v),
            SimValue::Byte(v) => BoundaryValue::Byte(v),
            SimValue::Char(v) => BoundaryValue::Char(v),
            SimValue::Short(v) => BoundaryValue::Short(v),
            SimValue::Int(v) => BoundaryValue::Int(v),
            SimValue::Long(v) => BoundaryValue::Long(v),
            SimValue::Float(v) => BoundaryValue::Float(v),
            SimValue::Double(v) => BoundaryValue::Double(v),
            SimValue::Object(o) => BoundaryValue::Object(self.local(o, tid)),
        }
    }

    fn member_id(
        slots: &mut Vec<MemberSlot>,
        ids: &mut HashMap<MemberSlot, RawId>,
        slot: MemberSlot,
    ) -> RawId {
        if let Some(id) = ids.get(&slot) {
            return *id;
        }
        slots.push(slot.clone());
        let id = slots.len();
        ids.insert(slot, id);
        id
    }

    fn method_slot(&self, method: MethodId) -> BridgeResult<MemberSlot> {
        method
            .as_raw()
            .checked_sub(1)
            .and_then(|i| self.methods.get(i))
            .cloned()
            .ok_or_else(|| BridgeError::invalid_handle(format!("unknown method id {}", method)))
    }

    fn field_slot(&self, field: FieldId) -> BridgeResult<MemberSlot> {
        field
            .as_raw()
            .checked_sub(1)
            .and_then(|i| self.fields.get(i))
            .cloned()
            .ok_or_else(|| BridgeError::invalid_handle(format!("unknown field id {}", field)))
    }

    /// Runs a method body, turning a throw into a pending exception.
    fn run(
        &mut self,
        tid: ThreadId,
        slot: &MemberSlot,
        this: Option<ObjId>,
        args: &[SimValue],
    ) -> Option<SimValue> {
        let Some(class) = self.heap.class(&slot.class).cloned() else {
            return None;
        };
        let method = &class.methods[slot.index];
        let dotted = internal_to_class_name(&class.name);
        let simple = dotted.rsplit('.').next().unwrap_or(&dotted).to_string();
        let frame = format!("{}.{}({}.java)", dotted, method.name, simple);
        let registered = method.native
            && self.natives.iter().any(|n| {
                n.class == dotted && n.name == method.name && n.signature == method.signature
            });
        if registered {
            // Registered natives run outside the simulation.
            return Some(SimValue::zero(
                MethodSignature::parse(&method.signature)
                    .map(|s| s.ret.value_kind())
                    .unwrap_or(ValueKind::Void),
            ));
        }
        match (method.body)(&mut self.heap, this, args) {
            Ok(value) => Some(value),
            Err(thrown) => {
                self.raise(tid, &thrown, &frame);
                None
            }
        }
    }

    /// Finds the override of `slot` for an object's runtime class.
    fn dispatch(&self, slot: &MemberSlot, object: ObjId) -> MemberSlot {
        let Some(def) = self.heap.class(&slot.class) else {
            return slot.clone();
        };
        let method = &def.methods[slot.index];
        let runtime_class = self.heap.class_of(object).unwrap_or(&slot.class);
        self.heap
            .find_method(runtime_class, &method.name, &method.signature, false)
            .map(|(class, index)| MemberSlot { class, index })
            .unwrap_or_else(|| slot.clone())
    }

    fn free_locals(&mut self, handles: Vec<RawId>) {
        for handle in handles {
            self.refs.remove(&handle);
        }
    }
}

impl ManagedRuntime for SimRuntime {
    fn name(&self) -> &str {
        "sim"
    }

    fn is_thread_attached(&self) -> BridgeResult<bool> {
        let tid = thread::current().id();
        Ok(self
            .state
            .lock()
            .threads
            .get(&tid)
            .map(|t| t.attached)
            .unwrap_or(false))
    }

    fn attach_current_thread(&self, thread_name: Option<&str>) -> BridgeResult<()> {
        let tid = thread::current().id();
        let mut state = self.state.lock();
        if state.shutting_down {
            return Err(BridgeError::attachment("runtime is shutting down"));
        }
        let t = state.thread(tid);
        if t.attached {
            return Ok(());
        }
        t.attached = true;
        t.frames = vec![Vec::new()];
        self.counters.attaches.fetch_add(1, Ordering::Relaxed);
        debug!("Simulated attach of {:?}", thread_name);
        Ok(())
    }

    fn detach_current_thread(&self) -> BridgeResult<()> {
        let tid = thread::current().id();
        let mut state = self.state.lock();
        let t = state.thread(tid);
        if !t.attached {
            return Ok(());
        }
        if t.in_managed_call {
            return Err(BridgeError::attachment(
                "cannot detach a thread running managed code",
            ));
        }
        t.attached = false;
        t.pending = None;
        let frames = std::mem::take(&mut t.frames);
        state.free_locals(frames.into_iter().flatten().collect());
        self.counters.detaches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn find_class(&self, internal_name: &str) -> BridgeResult<ObjectHandle> {
        let (mut state, tid) = self.enter(Access::Checked);
        let internal = class_name_to_internal(internal_name);
        if state.heap.is_defined(&internal) || internal.starts_with('[') {
            let id = state.heap.class_object(&internal);
            return Ok(state.local(Some(id), tid));
        }
        state.raise(
            tid,
            &SimThrow::new("java/lang/NoClassDefFoundError", internal),
            "<runtime>",
        );
        Ok(ObjectHandle::NULL)
    }

    fn get_object_class(&self, object: ObjectHandle) -> BridgeResult<ObjectHandle> {
        let (mut state, tid) = self.enter(Access::Checked);
        let id = state
            .object(object, tid, || self.invalid("object", object.as_raw()))
            .ok_or_else(|| BridgeError::invalid_handle("class of null object"))?;
        let class = state.heap.class_of(id).unwrap_or("java/lang/Object").to_string();
        let class_id = state.heap.class_object(&class);
        Ok(state.local(Some(class_id), tid))
    }

    fn method_id(
        &self,
        class: ObjectHandle,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> BridgeResult<MethodId> {
        self.counters.member_lookups.fetch_add(1, Ordering::Relaxed);
        let (mut state, tid) = self.enter(Access::Checked);
        let state = &mut *state;
        let owner = state
            .class_name(class, tid, || self.invalid("class", class.as_raw()))
            .ok_or_else(|| BridgeError::invalid_handle("method lookup on null class"))?;
        match state.heap.find_method(&owner, name, signature, is_static) {
            Some((class, index)) => {
                let id = SimState::member_id(
                    &mut state.methods,
                    &mut state.method_ids,
                    MemberSlot { class, index },
                );
                Ok(MethodId::from_raw_unchecked(id))
            }
            None => {
                state.raise(tid, &SimThrow::new("java/lang/NoSuchMethodError", name), "<runtime>");
                Ok(MethodId::NULL)
            }
        }
    }

    fn field_id(
        &self,
        class: ObjectHandle,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> BridgeResult<FieldId> {
        self.counters.member_lookups.fetch_add(1, Ordering::Relaxed);
        let (mut state, tid) = self.enter(Access::Checked);
        let state = &mut *state;
        let owner = state
            .class_name(class, tid, || self.invalid("class", class.as_raw()))
            .ok_or_else(|| BridgeError::invalid_handle("field lookup on null class"))?;
        match state.heap.find_field(&owner, name, signature, is_static) {
            Some((class, index)) => {
                let id = SimState::member_id(
                    &mut state.fields,
                    &mut state.field_ids,
                    MemberSlot { class, index },
                );
                Ok(FieldId::from_raw_unchecked(id))
            }
            None => {
                state.raise(tid, &SimThrow::new("java/lang/NoSuchFieldError", name), "<runtime>");
                Ok(FieldId::NULL)
            }
        }
    }

    fn has_export_marker(
        &self,
        _class: ObjectHandle,
        member: MemberHandle,
        _is_static: bool,
    ) -> BridgeResult<bool> {
        let (state, _) = self.enter(Access::Checked);
        let slot = match member {
            MemberHandle::Method(m) => state.method_slot(m)?,
            MemberHandle::Field(f) => state.field_slot(f)?,
        };
        let Some(def) = state.heap.class(&slot.class) else {
            return Ok(false);
        };
        let member_marked = match member {
            MemberHandle::Method(_) => def.methods[slot.index].exported,
            MemberHandle::Field(_) => def.fields[slot.index].exported,
        };
        Ok(def.exported || member_marked)
    }

    fn call_method(
        &self,
        target: InvokeTarget,
        method: MethodId,
        ret: ValueKind,
        args: &[BoundaryValue],
    ) -> BridgeResult<BoundaryValue> {
        self.counters.boundary_calls.fetch_add(1, Ordering::Relaxed);
        let (mut state, tid) = self.enter(Access::Checked);
        let state = &mut *state;
        let slot = state.method_slot(method)?;
        let invalid = || self.invalid("argument", 0);
        let args: Vec<SimValue> = args.iter().map(|a| state.to_sim(*a, tid, invalid)).collect();

        let (slot, this) = match target {
            InvokeTarget::Instance(h) => {
                match state.object(h, tid, || self.invalid("receiver", h.as_raw())) {
                    Some(obj) => (state.dispatch(&slot, obj), Some(obj)),
                    None => {
                        let npe = builtins::null_pointer("method call on null receiver");
                        state.raise(tid, &npe, "<runtime>");
                        return Ok(BoundaryValue::zero(ret));
                    }
                }
            }
            InvokeTarget::Static(_) => (slot, None),
        };

        match state.run(tid, &slot, this, &args) {
            Some(value) if value.kind() == ret => Ok(state.to_boundary(value, tid)),
            Some(value) => Err(BridgeError::type_mismatch(
                "simulated return value",
                format!("{:?}", ret),
                format!("{:?}", value.kind()),
            )),
            None => Ok(BoundaryValue::zero(ret)),
        }
    }

    fn new_object(
        &self,
        class: ObjectHandle,
        constructor: MethodId,
        args: &[BoundaryValue],
    ) -> BridgeResult<ObjectHandle> {
        self.counters.boundary_calls.fetch_add(1, Ordering::Relaxed);
        let (mut state, tid) = self.enter(Access::Checked);
        let state = &mut *state;
        let slot = state.method_slot(constructor)?;
        let owner = state
            .class_name(class, tid, || self.invalid("class", class.as_raw()))
            .ok_or_else(|| BridgeError::invalid_handle("construct with null class"))?;
        let invalid = || self.invalid("argument", 0);
        let args: Vec<SimValue> = args.iter().map(|a| state.to_sim(*a, tid, invalid)).collect();
        let object = state.heap.new_object(&owner);
        match state.run(tid, &slot, Some(object), &args) {
            Some(_) => Ok(state.local(Some(object), tid)),
            None => Ok(ObjectHandle::NULL),
        }
    }

    fn get_field(
        &self,
        target: InvokeTarget,
        field: FieldId,
        kind: ValueKind,
    ) -> BridgeResult<BoundaryValue> {
        self.counters.boundary_calls.fetch_add(1, Ordering::Relaxed);
        let (mut state, tid) = self.enter(Access::Checked);
        let state = &mut *state;
        let slot = state.field_slot(field)?;
        let name = match state.heap.class(&slot.class) {
            Some(def) => def.fields[slot.index].name.clone(),
            None => return Err(BridgeError::invalid_handle("field of unknown class")),
        };
        let value = match target {
            InvokeTarget::Instance(h) => {
                match state.object(h, tid, || self.invalid("receiver", h.as_raw())) {
                    Some(obj) => state.heap.get_field(obj, &name),
                    None => {
                        let npe = builtins::null_pointer("field read on null receiver");
                        state.raise(tid, &npe, "<runtime>");
                        return Ok(BoundaryValue::zero(kind));
                    }
                }
            }
            InvokeTarget::Static(_) => state.heap.get_static(&slot.class, &name),
        };
        if value.kind() != kind {
            return Err(BridgeError::type_mismatch(
                format!("field {}", name),
                format!("{:?}", kind),
                format!("{:?}", value.kind()),
            ));
        }
        Ok(state.to_boundary(value, tid))
    }

    fn set_field(
        &self,
        target: InvokeTarget,
        field: FieldId,
        value: BoundaryValue,
    ) -> BridgeResult<()> {
        self.counters.boundary_calls.fetch_add(1, Ordering::Relaxed);
        let (mut state, tid) = self.enter(Access::Checked);
        let state = &mut *state;
        let slot = state.field_slot(field)?;
        let name = match state.heap.class(&slot.class) {
            Some(def) => def.fields[slot.index].name.clone(),
            None => return Err(BridgeError::invalid_handle("field of unknown class")),
        };
        let value = state.to_sim(value, tid, || self.invalid("value", 0));
        match target {
            InvokeTarget::Instance(h) => {
                match state.object(h, tid, || self.invalid("receiver", h.as_raw())) {
                    Some(obj) => state.heap.set_field(obj, &name, value),
                    None => {
                        let npe = builtins::null_pointer("field write on null receiver");
                        state.raise(tid, &npe, "<runtime>");
                    }
                }
            }
            InvokeTarget::Static(_) => state.heap.set_static(&slot.class, &name, value),
        }
        Ok(())
    }

    fn new_ref(&self, scope: RefScope, object: ObjectHandle) -> BridgeResult<ObjectHandle> {
        let (mut state, tid) = self.enter(Access::Checked);
        let Some(id) = state.object(object, tid, || self.invalid("object", object.as_raw())) else {
            return Ok(ObjectHandle::NULL);
        };
        Ok(state
            .new_handle(id, scope, tid)
            .unwrap_or(ObjectHandle::NULL))
    }

    fn delete_ref(&self, scope: RefScope, object: ObjectHandle) -> BridgeResult<()> {
        if object.is_null() {
            return Ok(());
        }
        let (mut state, tid) = self.enter(Access::ExceptionSafe);
        let raw = object.as_raw();
        let valid = matches!(
            state.refs.get(&raw),
            Some(r) if r.scope == scope && (scope != RefScope::Local || r.thread == tid)
        );
        if !valid {
            self.invalid("deleted", raw);
            return Ok(());
        }
        state.refs.remove(&raw);
        if scope == RefScope::Local {
            for frame in state.thread(tid).frames.iter_mut() {
                frame.retain(|h| *h != raw);
            }
        }
        Ok(())
    }

    fn is_same_object(&self, a: ObjectHandle, b: ObjectHandle) -> BridgeResult<bool> {
        let (state, tid) = self.enter(Access::Checked);
        let a = state.object(a, tid, || self.invalid("object", a.as_raw()));
        let b = state.object(b, tid, || self.invalid("object", b.as_raw()));
        Ok(a == b)
    }

    fn push_local_frame(&self, capacity: i32) -> BridgeResult<()> {
        let (mut state, tid) = self.enter(Access::ExceptionSafe);
        if capacity < 0 {
            return Err(BridgeError::Status {
                status: JniStatus::InvalidArgument,
            });
        }
        if state.reference_budget.is_some_and(|n| n < capacity as usize) {
            return Err(BridgeError::Status {
                status: JniStatus::NoMemory,
            });
        }
        state.thread(tid).frames.push(Vec::new());
        Ok(())
    }

    fn pop_local_frame(&self, result: ObjectHandle) -> BridgeResult<ObjectHandle> {
        let (mut state, tid) = self.enter(Access::ExceptionSafe);
        let object = state.object(result, tid, || self.invalid("result", result.as_raw()));
        let t = state.thread(tid);
        if t.frames.len() < 2 {
            return Err(BridgeError::invalid_handle("no local frame to pop"));
        }
        let freed = t.frames.pop().unwrap_or_default();
        state.free_locals(freed);
        Ok(state.local(object, tid))
    }

    fn new_string(&self, value: &str) -> BridgeResult<ObjectHandle> {
        let (mut state, tid) = self.enter(Access::Checked);
        let id = state.heap.new_string(value);
        Ok(state.local(Some(id), tid))
    }

    fn string_value(&self, string: ObjectHandle) -> BridgeResult<String> {
        let (mut state, tid) = self.enter(Access::Checked);
        let id = state
            .object(string, tid, || self.invalid("string", string.as_raw()))
            .ok_or_else(|| BridgeError::invalid_handle("null string"))?;
        if std::mem::take(&mut state.fail_next_decode) {
            let oom = SimThrow::new("java/lang/OutOfMemoryError", "string chars");
            state.raise(tid, &oom, "<runtime>");
            return Err(BridgeError::Status {
                status: JniStatus::NoMemory,
            });
        }
        match state.heap.string(id) {
            Some(s) => Ok(s.to_string()),
            None => Err(BridgeError::type_mismatch(
                "string value",
                "Ljava/lang/String;",
                format!("L{};", state.heap.class_of(id).unwrap_or("?")),
            )),
        }
    }

    fn array_length(&self, array: ObjectHandle) -> BridgeResult<i32> {
        let (state, tid) = self.enter(Access::Checked);
        let id = state
            .object(array, tid, || self.invalid("array", array.as_raw()))
            .ok_or_else(|| BridgeError::invalid_handle("null array"))?;
        state
            .heap
            .array(id)
            .map(|a| a.len() as i32)
            .ok_or_else(|| BridgeError::type_mismatch("array length", "array", "object"))
    }

    fn object_array_element(&self, array: ObjectHandle, index: i32) -> BridgeResult<ObjectHandle> {
        let (mut state, tid) = self.enter(Access::Checked);
        let id = state
            .object(array, tid, || self.invalid("array", array.as_raw()))
            .ok_or_else(|| BridgeError::invalid_handle("null array"))?;
        let element = state
            .heap
            .array(id)
            .ok_or_else(|| BridgeError::type_mismatch("array element", "array", "object"))?
            .get(index.max(0) as usize)
            .copied()
            .filter(|_| index >= 0);
        match element {
            Some(SimValue::Object(o)) => Ok(state.local(o, tid)),
            Some(_) => Err(BridgeError::type_mismatch("array element", "object", "primitive")),
            None => {
                state.raise(
                    tid,
                    &SimThrow::new(
                        "java/lang/ArrayIndexOutOfBoundsException",
                        format!("Index {} out of bounds", index),
                    ),
                    "<runtime>",
                );
                Ok(ObjectHandle::NULL)
            }
        }
    }

    fn exception_check(&self) -> BridgeResult<bool> {
        let (mut state, tid) = self.enter(Access::ExceptionSafe);
        Ok(state.thread(tid).pending.is_some())
    }

    fn exception_occurred(&self) -> BridgeResult<ObjectHandle> {
        let (mut state, tid) = self.enter(Access::ExceptionSafe);
        let pending = state.thread(tid).pending;
        Ok(state.local(pending, tid))
    }

    fn exception_clear(&self) -> BridgeResult<()> {
        let (mut state, tid) = self.enter(Access::ExceptionSafe);
        state.thread(tid).pending = None;
        Ok(())
    }

    fn throw_new(&self, class: ObjectHandle, message: &str) -> BridgeResult<()> {
        let (mut state, tid) = self.enter(Access::Checked);
        let name = state
            .class_name(class, tid, || self.invalid("class", class.as_raw()))
            .ok_or_else(|| BridgeError::invalid_handle("throw with null class"))?;
        state.raise(tid, &SimThrow::new(&name, message), "<native>");
        Ok(())
    }

    fn register_natives(&self, class: ObjectHandle, methods: &[NativeMethod]) -> BridgeResult<()> {
        let (mut state, tid) = self.enter(Access::Checked);
        let internal = state
            .class_name(class, tid, || self.invalid("class", class.as_raw()))
            .ok_or_else(|| BridgeError::invalid_handle("register on null class"))?;
        let dotted = internal_to_class_name(&internal);
        for m in methods {
            let declared = state.heap.class(&internal).is_some_and(|def| {
                def.methods
                    .iter()
                    .any(|d| d.native && d.name == m.name && d.signature == m.signature)
            });
            if !declared {
                state.raise(
                    tid,
                    &SimThrow::new(
                        "java/lang/NoSuchMethodError",
                        format!("{}.{}{}", dotted, m.name, m.signature),
                    ),
                    "<runtime>",
                );
                return Ok(());
            }
        }
        for m in methods {
            state.natives.push(RegisteredNative {
                class: dotted.clone(),
                name: m.name.clone(),
                signature: m.signature.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn attached() -> SimRuntime {
        let sim = SimRuntime::new();
        sim.attach_current_thread(Some("test")).unwrap();
        sim
    }

    #[test]
    fn test_missing_class_leaves_pending_exception() {
        let sim = attached();
        let handle = sim.find_class("com/example/Missing").unwrap();
        assert!(handle.is_null());
        assert!(sim.exception_check().unwrap());
        sim.exception_clear().unwrap();
        assert!(!sim.exception_check().unwrap());
    }

    #[test]
    fn test_calls_with_pending_exception_are_counted() {
        let sim = attached();
        sim.find_class("com/example/Missing").unwrap();
        sim.new_string("x").unwrap();
        assert_eq!(sim.stats().calls_with_pending_exception, 1);
        sim.exception_clear().unwrap();
        sim.new_string("y").unwrap();
        assert_eq!(sim.stats().calls_with_pending_exception, 1);
    }

    #[test]
    fn test_unattached_calls_are_counted() {
        let sim = SimRuntime::new();
        sim.new_string("x").unwrap();
        assert_eq!(sim.stats().unattached_calls, 1);
    }

    #[test]
    fn test_local_frames_free_their_references() {
        let sim = attached();
        sim.new_string("outer").unwrap();
        sim.push_local_frame(4).unwrap();
        let inner = sim.new_string("inner").unwrap();
        sim.new_string("dropped").unwrap();
        assert_eq!(sim.stats().live_locals, 3);
        let kept = sim.pop_local_frame(inner).unwrap();
        assert_eq!(sim.stats().live_locals, 2);
        assert_eq!(sim.string_value(kept).unwrap(), "inner");
        assert!(sim.pop_local_frame(ObjectHandle::NULL).is_err());
    }

    #[test]
    fn test_local_from_other_thread_is_invalid() {
        let sim = Arc::new(attached());
        let local = sim.new_string("mine").unwrap();
        let other = sim.clone();
        std::thread::spawn(move || {
            other.attach_current_thread(None).unwrap();
            assert!(other.string_value(local).is_err());
        })
        .join()
        .unwrap();
        assert_eq!(sim.stats().invalid_handle_uses, 1);
    }

    #[test]
    fn test_shutdown_rejects_attach() {
        let sim = SimRuntime::new();
        sim.shutdown();
        assert!(matches!(
            sim.attach_current_thread(None),
            Err(BridgeError::Attachment { .. })
        ));
    }

    #[test]
    fn test_reference_budget() {
        let sim = attached();
        sim.limit_references(Some(1));
        assert!(!sim.new_string("a").unwrap().is_null());
        assert!(sim.new_string("b").unwrap().is_null());
        assert!(sim.exception_check().unwrap());
    }

    #[test]
    fn test_live_local_limit() {
        let sim = attached();
        sim.limit_live_locals(Some(2));
        let a = sim.new_string("a").unwrap();
        sim.new_string("b").unwrap();
        assert!(sim.new_string("c").unwrap().is_null());
        sim.exception_clear().unwrap();

        // Deleting a local frees a slot.
        sim.delete_ref(RefScope::Local, a).unwrap();
        assert!(!sim.new_string("d").unwrap().is_null());
    }
}
