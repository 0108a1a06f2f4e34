//! Objects, classes and values of the simulated runtime.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::signature::{internal_to_class_name, JavaType, ValueKind};

/// Identity of a heap object. Never reused.
pub type ObjId = u64;

/// A managed value inside the simulated heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimValue {
    Void,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(Option<ObjId>),
}

impl SimValue {
    pub const NULL: SimValue = SimValue::Object(None);

    pub fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Void => SimValue::Void,
            ValueKind::Boolean => SimValue::Boolean(false),
            ValueKind::Byte => SimValue::Byte(0),
            ValueKind::Char => SimValue::Char(0),
            ValueKind::Short => SimValue::Short(0),
            ValueKind::Int => SimValue::Int(0),
            ValueKind::Long => SimValue::Long(0),
            ValueKind::Float => SimValue::Float(0.0),
            ValueKind::Double => SimValue::Double(0.0),
            ValueKind::Object => SimValue::NULL,
        }
    }

    /// Default value of a field with this descriptor.
    pub fn default_for(descriptor: &str) -> Self {
        JavaType::parse(descriptor)
            .map(|t| SimValue::zero(t.value_kind()))
            .unwrap_or(SimValue::NULL)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            SimValue::Void => ValueKind::Void,
            SimValue::Boolean(_) => ValueKind::Boolean,
            SimValue::Byte(_) => ValueKind::Byte,
            SimValue::Char(_) => ValueKind::Char,
            SimValue::Short(_) => ValueKind::Short,
            SimValue::Int(_) => ValueKind::Int,
            SimValue::Long(_) => ValueKind::Long,
            SimValue::Float(_) => ValueKind::Float,
            SimValue::Double(_) => ValueKind::Double,
            SimValue::Object(_) => ValueKind::Object,
        }
    }

    fn expect<T>(self, kind: &str, v: Option<T>) -> Result<T, SimThrow> {
        v.ok_or_else(|| {
            SimThrow::new(
                "java/lang/IllegalArgumentException",
                format!("expected {}, got {:?}", kind, self),
            )
        })
    }

    pub fn boolean(self) -> Result<bool, SimThrow> {
        let v = match self {
            SimValue::Boolean(v) => Some(v),
            _ => None,
        };
        self.expect("boolean", v)
    }

    pub fn int(self) -> Result<i32, SimThrow> {
        let v = match self {
            SimValue::Int(v) => Some(v),
            _ => None,
        };
        self.expect("int", v)
    }

    pub fn long(self) -> Result<i64, SimThrow> {
        let v = match self {
            SimValue::Long(v) => Some(v),
            _ => None,
        };
        self.expect("long", v)
    }

    pub fn double(self) -> Result<f64, SimThrow> {
        let v = match self {
            SimValue::Double(v) => Some(v),
            _ => None,
        };
        self.expect("double", v)
    }

    pub fn object(self) -> Result<Option<ObjId>, SimThrow> {
        let v = match self {
            SimValue::Object(v) => Some(v),
            _ => None,
        };
        self.expect("object", v)
    }
}

/// An exception raised by a simulated method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimThrow {
    /// Internal or dotted class name.
    pub class: String,
    pub message: Option<String>,
    pub cause: Option<Box<SimThrow>>,
    /// Frames below the throwing method, innermost first.
    pub frames: Vec<String>,
}

impl SimThrow {
    pub fn new(class: &str, message: impl Into<String>) -> Self {
        Self {
            class: class.replace('.', "/"),
            message: Some(message.into()),
            cause: None,
            frames: Vec::new(),
        }
    }

    pub fn without_message(class: &str) -> Self {
        Self {
            class: class.replace('.', "/"),
            message: None,
            cause: None,
            frames: Vec::new(),
        }
    }

    pub fn caused_by(mut self, cause: SimThrow) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Adds stack frames, innermost first, above the method that threw.
    pub fn with_frames<I, S>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frames.extend(frames.into_iter().map(Into::into));
        self
    }
}

/// Result of a simulated method body.
pub type SimResult = Result<SimValue, SimThrow>;

pub(crate) type MethodBody =
    Arc<dyn Fn(&mut SimHeap, Option<ObjId>, &[SimValue]) -> SimResult + Send + Sync>;

#[derive(Clone)]
pub(crate) struct SimMethod {
    pub(crate) name: String,
    pub(crate) signature: String,
    pub(crate) is_static: bool,
    pub(crate) exported: bool,
    /// Declared `native`; callable only after registration.
    pub(crate) native: bool,
    pub(crate) body: MethodBody,
}

#[derive(Debug, Clone)]
pub(crate) struct SimField {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) is_static: bool,
    pub(crate) exported: bool,
    pub(crate) initial: SimValue,
}

/// A class definition, built fluently and installed with
/// [`SimRuntime::define_class`](super::SimRuntime::define_class).
#[derive(Clone)]
pub struct SimClass {
    pub(crate) name: String,
    pub(crate) superclass: Option<String>,
    pub(crate) exported: bool,
    pub(crate) methods: Vec<SimMethod>,
    pub(crate) fields: Vec<SimField>,
}

impl fmt::Debug for SimClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimClass")
            .field("name", &self.name)
            .field("superclass", &self.superclass)
            .field("methods", &self.methods.len())
            .field("fields", &self.fields)
            .finish()
    }
}

impl SimClass {
    /// Starts a class extending `java.lang.Object`.
    pub fn new(name: &str) -> Self {
        let name = name.replace('.', "/");
        let superclass = (name != "java/lang/Object").then(|| "java/lang/Object".to_string());
        Self {
            name,
            superclass,
            exported: false,
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extends(mut self, superclass: &str) -> Self {
        self.superclass = Some(superclass.replace('.', "/"));
        self
    }

    /// Marks the whole class with the export marker.
    pub fn exported(mut self) -> Self {
        self.exported = true;
        self
    }

    /// Marks every member called `name` with the export marker.
    pub fn export_member(mut self, name: &str) -> Self {
        for m in self.methods.iter_mut().filter(|m| m.name == name) {
            m.exported = true;
        }
        for f in self.fields.iter_mut().filter(|f| f.name == name) {
            f.exported = true;
        }
        self
    }

    fn push_method(mut self, name: &str, signature: &str, is_static: bool, body: MethodBody) -> Self {
        self.methods.push(SimMethod {
            name: name.to_string(),
            signature: signature.to_string(),
            is_static,
            exported: false,
            native: false,
            body,
        });
        self
    }

    /// Adds an instance method. The body receives the receiver's id.
    pub fn method<F>(self, name: &str, signature: &str, body: F) -> Self
    where
        F: Fn(&mut SimHeap, ObjId, &[SimValue]) -> SimResult + Send + Sync + 'static,
    {
        let body: MethodBody = Arc::new(move |heap, this, args| match this {
            Some(this) => body(heap, this, args),
            None => Err(SimThrow::without_message("java/lang/NullPointerException")),
        });
        self.push_method(name, signature, false, body)
    }

    pub fn static_method<F>(self, name: &str, signature: &str, body: F) -> Self
    where
        F: Fn(&mut SimHeap, &[SimValue]) -> SimResult + Send + Sync + 'static,
    {
        let body: MethodBody = Arc::new(move |heap, _this, args| body(heap, args));
        self.push_method(name, signature, true, body)
    }

    /// Adds a constructor. The body receives the freshly allocated object.
    pub fn constructor<F>(self, signature: &str, body: F) -> Self
    where
        F: Fn(&mut SimHeap, ObjId, &[SimValue]) -> Result<(), SimThrow> + Send + Sync + 'static,
    {
        self.method("<init>", signature, move |heap, this, args| {
            body(heap, this, args).map(|()| SimValue::Void)
        })
    }

    /// Declares a `native` method to be bound by native registration.
    pub fn native_method(mut self, name: &str, signature: &str, is_static: bool) -> Self {
        let owner = internal_to_class_name(&self.name);
        let method = name.to_string();
        let body: MethodBody = Arc::new(move |_, _, _| {
            Err(SimThrow::new(
                "java/lang/UnsatisfiedLinkError",
                format!("{}.{}", owner, method),
            ))
        });
        self = self.push_method(name, signature, is_static, body);
        if let Some(last) = self.methods.last_mut() {
            last.native = true;
        }
        self
    }

    pub fn field(mut self, name: &str, descriptor: &str) -> Self {
        self.fields.push(SimField {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static: false,
            exported: false,
            initial: SimValue::default_for(descriptor),
        });
        self
    }

    pub fn static_field(mut self, name: &str, descriptor: &str, initial: SimValue) -> Self {
        self.fields.push(SimField {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static: true,
            exported: false,
            initial,
        });
        self
    }
}

/// Extra data carried by built-in object kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Str(String),
    Array(Vec<SimValue>),
    /// A class object, holding the internal class name.
    Class(String),
    /// A throwable's stack frames.
    Frames(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct SimObject {
    /// Internal class name (descriptor for arrays).
    pub class: String,
    pub fields: HashMap<String, SimValue>,
    pub payload: Payload,
}

/// The object heap and class table.
#[derive(Default)]
pub struct SimHeap {
    objects: HashMap<ObjId, SimObject>,
    next_id: ObjId,
    classes: HashMap<String, Arc<SimClass>>,
    class_objects: HashMap<String, ObjId>,
    statics: HashMap<(String, String), SimValue>,
}

impl SimHeap {
    pub(crate) fn define(&mut self, class: SimClass) {
        for f in class.fields.iter().filter(|f| f.is_static) {
            self.statics
                .insert((class.name.clone(), f.name.clone()), f.initial);
        }
        self.classes.insert(class.name.clone(), Arc::new(class));
    }

    pub fn class(&self, name: &str) -> Option<&Arc<SimClass>> {
        self.classes.get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Returns true if `class` is `ancestor` or inherits from it.
    pub fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.classes.get(&name).and_then(|c| c.superclass.clone());
        }
        false
    }

    /// Finds a method, walking superclasses. Constructors are not inherited.
    pub(crate) fn find_method(
        &self,
        class: &str,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Option<(String, usize)> {
        let mut current = Some(class.to_string());
        while let Some(owner) = current {
            let def = self.classes.get(&owner)?;
            let found = def.methods.iter().position(|m| {
                m.name == name && m.signature == signature && m.is_static == is_static
            });
            if let Some(index) = found {
                return Some((owner, index));
            }
            if name == "<init>" {
                return None;
            }
            current = def.superclass.clone();
        }
        None
    }

    pub(crate) fn find_field(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> Option<(String, usize)> {
        let mut current = Some(class.to_string());
        while let Some(owner) = current {
            let def = self.classes.get(&owner)?;
            let found = def.fields.iter().position(|f| {
                f.name == name && f.descriptor == descriptor && f.is_static == is_static
            });
            if let Some(index) = found {
                return Some((owner, index));
            }
            current = def.superclass.clone();
        }
        None
    }

    fn alloc(&mut self, class: &str, payload: Payload) -> ObjId {
        self.next_id += 1;
        let id = self.next_id;
        self.objects.insert(
            id,
            SimObject {
                class: class.to_string(),
                fields: HashMap::new(),
                payload,
            },
        );
        id
    }

    /// Allocates an instance with every declared field at its default.
    pub fn new_object(&mut self, class: &str) -> ObjId {
        let class = class.replace('.', "/");
        let mut fields = HashMap::new();
        let mut current = Some(class.clone());
        while let Some(name) = current {
            let Some(def) = self.classes.get(&name) else {
                break;
            };
            for f in def.fields.iter().filter(|f| !f.is_static) {
                fields.entry(f.name.clone()).or_insert(f.initial);
            }
            current = def.superclass.clone();
        }
        let id = self.alloc(&class, Payload::None);
        if let Some(obj) = self.objects.get_mut(&id) {
            obj.fields = fields;
        }
        id
    }

    pub fn new_string(&mut self, value: &str) -> ObjId {
        self.alloc("java/lang/String", Payload::Str(value.to_string()))
    }

    /// Allocates an object array with elements of class `element`.
    pub fn new_object_array(&mut self, element: &str, values: Vec<SimValue>) -> ObjId {
        let class = format!("[L{};", element.replace('.', "/"));
        self.alloc(&class, Payload::Array(values))
    }

    pub fn object(&self, id: ObjId) -> Option<&SimObject> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: ObjId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn class_of(&self, id: ObjId) -> Option<&str> {
        self.objects.get(&id).map(|o| o.class.as_str())
    }

    /// Returns the text of a string object.
    pub fn string(&self, id: ObjId) -> Option<&str> {
        match self.objects.get(&id) {
            Some(SimObject {
                class,
                payload: Payload::Str(s),
                ..
            }) if class == "java/lang/String" => Some(s),
            _ => None,
        }
    }

    pub fn array(&self, id: ObjId) -> Option<&[SimValue]> {
        match self.objects.get(&id).map(|o| &o.payload) {
            Some(Payload::Array(values)) => Some(values),
            _ => None,
        }
    }

    pub fn replace_payload(&mut self, id: ObjId, payload: Payload) {
        if let Some(obj) = self.objects.get_mut(&id) {
            obj.payload = payload;
        }
    }

    pub fn get_field(&self, id: ObjId, name: &str) -> SimValue {
        self.objects
            .get(&id)
            .and_then(|o| o.fields.get(name).copied())
            .unwrap_or(SimValue::NULL)
    }

    pub fn set_field(&mut self, id: ObjId, name: &str, value: SimValue) {
        if let Some(obj) = self.objects.get_mut(&id) {
            obj.fields.insert(name.to_string(), value);
        }
    }

    pub fn get_static(&self, class: &str, name: &str) -> SimValue {
        self.statics
            .get(&(class.replace('.', "/"), name.to_string()))
            .copied()
            .unwrap_or(SimValue::NULL)
    }

    pub fn set_static(&mut self, class: &str, name: &str, value: SimValue) {
        self.statics
            .insert((class.replace('.', "/"), name.to_string()), value);
    }

    /// Returns the unique class object for `class`, creating it on first use.
    pub fn class_object(&mut self, class: &str) -> ObjId {
        if let Some(id) = self.class_objects.get(class) {
            return *id;
        }
        let id = self.alloc("java/lang/Class", Payload::Class(class.to_string()));
        self.class_objects.insert(class.to_string(), id);
        id
    }

    /// Internal name held by a class object.
    pub fn class_name(&self, class_object: ObjId) -> Option<&str> {
        match self.objects.get(&class_object).map(|o| &o.payload) {
            Some(Payload::Class(name)) => Some(name),
            _ => None,
        }
    }

    /// Materializes a thrown exception, recording `frame` as the outermost
    /// frame of its trace.
    pub fn new_throwable(&mut self, thrown: &SimThrow, frame: &str) -> ObjId {
        let cause = thrown
            .cause
            .as_deref()
            .map(|c| self.new_throwable(c, frame));
        if !self.is_defined(&thrown.class) {
            self.define(SimClass::new(&thrown.class).extends("java/lang/RuntimeException"));
        }
        let id = self.new_object(&thrown.class);
        let message = thrown.message.as_deref().map(|m| self.new_string(m));
        self.set_field(id, "message", SimValue::Object(message));
        self.set_field(id, "cause", SimValue::Object(cause));
        let mut frames = thrown.frames.clone();
        frames.push(frame.to_string());
        self.replace_payload(id, Payload::Frames(frames));
        id
    }

    /// Removes objects unreachable from `roots`. Returns the number freed.
    pub(crate) fn collect(&mut self, roots: impl IntoIterator<Item = ObjId>) -> usize {
        let mut marked = HashSet::new();
        let mut stack: Vec<ObjId> = roots.into_iter().collect();
        stack.extend(self.class_objects.values().copied());
        stack.extend(self.statics.values().filter_map(|v| match v {
            SimValue::Object(Some(id)) => Some(*id),
            _ => None,
        }));
        while let Some(id) = stack.pop() {
            if !marked.insert(id) {
                continue;
            }
            let Some(obj) = self.objects.get(&id) else {
                continue;
            };
            let children = obj.fields.values().chain(match &obj.payload {
                Payload::Array(values) => values.as_slice(),
                _ => &[],
            });
            stack.extend(children.filter_map(|v| match v {
                SimValue::Object(Some(child)) => Some(*child),
                _ => None,
            }));
        }
        let before = self.objects.len();
        self.objects.retain(|id, _| marked.contains(id));
        before - self.objects.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}
