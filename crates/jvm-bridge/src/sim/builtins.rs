//! Core library classes preinstalled in every simulated runtime.

use crate::config::defaults;
use crate::export::natives::SUPPORT_METHODS;
use crate::signature::{class_name_to_internal, internal_to_class_name};

use super::heap::{ObjId, Payload, SimClass, SimHeap, SimThrow, SimValue};

const THROWABLE: &str = "java/lang/Throwable";

/// Throwable subclasses as (class, superclass).
const EXCEPTIONS: &[(&str, &str)] = &[
    ("java/lang/Exception", THROWABLE),
    ("java/lang/Error", THROWABLE),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/NumberFormatException", "java/lang/IllegalArgumentException"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    (
        "java/lang/ArrayIndexOutOfBoundsException",
        "java/lang/IndexOutOfBoundsException",
    ),
    ("java/io/IOException", "java/lang/Exception"),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/NoClassDefFoundError", "java/lang/LinkageError"),
    ("java/lang/UnsatisfiedLinkError", "java/lang/LinkageError"),
    ("java/lang/IncompatibleClassChangeError", "java/lang/LinkageError"),
    ("java/lang/NoSuchMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/NoSuchFieldError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
];

/// Boxed primitives as (class, primitive descriptor, unbox method).
const BOXES: &[(&str, &str, &str)] = &[
    ("java/lang/Boolean", "Z", "booleanValue"),
    ("java/lang/Byte", "B", "byteValue"),
    ("java/lang/Character", "C", "charValue"),
    ("java/lang/Short", "S", "shortValue"),
    ("java/lang/Integer", "I", "intValue"),
    ("java/lang/Long", "J", "longValue"),
    ("java/lang/Float", "F", "floatValue"),
    ("java/lang/Double", "D", "doubleValue"),
];

pub(crate) fn install(heap: &mut SimHeap) {
    heap.define(object_class());
    heap.define(SimClass::new("java/lang/Class").method(
        "getName",
        "()Ljava/lang/String;",
        |heap, this, _| {
            let name = heap
                .class_name(this)
                .map(internal_to_class_name)
                .unwrap_or_default();
            Ok(string_value(heap, &name))
        },
    ));
    heap.define(
        SimClass::new("java/lang/String").method("length", "()I", |heap, this, _| {
            let len = heap.string(this).map(|s| s.encode_utf16().count()).unwrap_or(0);
            Ok(SimValue::Int(len as i32))
        }),
    );
    heap.define(SimClass::new("java/lang/Number"));
    heap.define(SimClass::new("java/lang/StackTraceElement").method(
        "toString",
        "()Ljava/lang/String;",
        |heap, this, _| {
            let text = match heap.object(this).map(|o| &o.payload) {
                Some(Payload::Str(s)) => s.clone(),
                _ => String::new(),
            };
            Ok(string_value(heap, &text))
        },
    ));
    heap.define(throwable_class());
    for (class, superclass) in EXCEPTIONS {
        heap.define(with_throwable_constructors(
            SimClass::new(class).extends(superclass),
        ));
    }
    for (class, descriptor, unbox) in BOXES {
        heap.define(box_class(class, descriptor, unbox));
    }
    heap.define(support_class());
}

fn string_value(heap: &mut SimHeap, text: &str) -> SimValue {
    SimValue::Object(Some(heap.new_string(text)))
}

fn object_class() -> SimClass {
    SimClass::new("java/lang/Object")
        .constructor("()V", |_, _, _| Ok(()))
        .method("hashCode", "()I", |_, this, _| Ok(SimValue::Int(this as i32)))
        .method("equals", "(Ljava/lang/Object;)Z", |_, this, args| {
            Ok(SimValue::Boolean(args[0].object()? == Some(this)))
        })
        .method("getClass", "()Ljava/lang/Class;", |heap, this, _| {
            let class = heap.class_of(this).unwrap_or("java/lang/Object").to_string();
            Ok(SimValue::Object(Some(heap.class_object(&class))))
        })
        .method("toString", "()Ljava/lang/String;", |heap, this, _| {
            let text = match heap.string(this) {
                Some(s) => s.to_string(),
                None => format!(
                    "{}@{:x}",
                    internal_to_class_name(heap.class_of(this).unwrap_or("java/lang/Object")),
                    this
                ),
            };
            Ok(string_value(heap, &text))
        })
}

fn message_of(heap: &SimHeap, this: ObjId) -> Option<String> {
    match heap.get_field(this, "message") {
        SimValue::Object(Some(id)) => heap.string(id).map(str::to_string),
        _ => None,
    }
}

fn throwable_class() -> SimClass {
    with_throwable_constructors(SimClass::new(THROWABLE))
        .field("message", "Ljava/lang/String;")
        .field("cause", "Ljava/lang/Throwable;")
        .method("getMessage", "()Ljava/lang/String;", |heap, this, _| {
            Ok(heap.get_field(this, "message"))
        })
        .method("getCause", "()Ljava/lang/Throwable;", |heap, this, _| {
            Ok(heap.get_field(this, "cause"))
        })
        .method(
            "getStackTrace",
            "()[Ljava/lang/StackTraceElement;",
            |heap, this, _| {
                let frames = match heap.object(this).map(|o| &o.payload) {
                    Some(Payload::Frames(frames)) => frames.clone(),
                    _ => Vec::new(),
                };
                let elements = frames
                    .into_iter()
                    .map(|frame| {
                        let id = heap.new_object("java/lang/StackTraceElement");
                        heap.replace_payload(id, Payload::Str(frame));
                        SimValue::Object(Some(id))
                    })
                    .collect();
                let array = heap.new_object_array("java/lang/StackTraceElement", elements);
                Ok(SimValue::Object(Some(array)))
            },
        )
        .method("toString", "()Ljava/lang/String;", |heap, this, _| {
            let class = internal_to_class_name(heap.class_of(this).unwrap_or(THROWABLE));
            let text = match message_of(heap, this) {
                Some(m) => format!("{}: {}", class, m),
                None => class,
            };
            Ok(string_value(heap, &text))
        })
}

fn with_throwable_constructors(class: SimClass) -> SimClass {
    class
        .constructor("()V", |_, _, _| Ok(()))
        .constructor("(Ljava/lang/String;)V", |heap, this, args| {
            heap.set_field(this, "message", args[0]);
            Ok(())
        })
        .constructor(
            "(Ljava/lang/String;Ljava/lang/Throwable;)V",
            |heap, this, args| {
                heap.set_field(this, "message", args[0]);
                heap.set_field(this, "cause", args[1]);
                Ok(())
            },
        )
}

fn box_class(class: &str, descriptor: &str, unbox: &str) -> SimClass {
    let boxed = class.to_string();
    let superclass = match descriptor {
        "Z" | "C" => "java/lang/Object",
        _ => "java/lang/Number",
    };
    SimClass::new(class)
        .extends(superclass)
        .field("value", descriptor)
        .static_method(
            "valueOf",
            &format!("({})L{};", descriptor, class),
            move |heap, args| {
                let id = heap.new_object(&boxed);
                heap.set_field(id, "value", args[0]);
                Ok(SimValue::Object(Some(id)))
            },
        )
        .method(unbox, &format!("(){}", descriptor), |heap, this, _| {
            Ok(heap.get_field(this, "value"))
        })
}

/// The bridge's own support class, declaring the natives it implements.
fn support_class() -> SimClass {
    let mut class = SimClass::new(&class_name_to_internal(defaults::SUPPORT_CLASS)).exported();
    for (name, signature) in SUPPORT_METHODS {
        class = class.native_method(name, signature, true);
    }
    class
}

/// Raised when a method body is called on a null receiver.
pub(crate) fn null_pointer(detail: &str) -> SimThrow {
    SimThrow::new("java/lang/NullPointerException", detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        let mut heap = SimHeap::default();
        install(&mut heap);
        assert!(heap.is_subclass("java/lang/NoSuchMethodError", "java/lang/LinkageError"));
        assert!(heap.is_subclass("java/lang/ArithmeticException", THROWABLE));
        assert!(!heap.is_subclass("java/lang/Integer", THROWABLE));
        assert!(heap
            .find_method("java/lang/ArithmeticException", "getMessage", "()Ljava/lang/String;", false)
            .is_some());
        assert!(heap
            .find_method("java/lang/ArithmeticException", "<init>", "(Ljava/lang/String;)V", false)
            .is_some());
    }

    #[test]
    fn test_throwable_fields_default_to_null() {
        let mut heap = SimHeap::default();
        install(&mut heap);
        let id = heap.new_object("java/lang/IllegalStateException");
        assert_eq!(heap.get_field(id, "message"), SimValue::NULL);
        assert_eq!(heap.get_field(id, "cause"), SimValue::NULL);
    }
}
