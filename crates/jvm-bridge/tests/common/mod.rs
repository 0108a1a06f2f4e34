//! Shared fixtures for bridge integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use jvm_bridge::sim::{SimClass, SimRuntime, SimThrow, SimValue};
use jvm_bridge::{Bridge, BridgeConfig};

/// Test fixture: a simulated runtime with the example classes and a
/// private bridge over it.
pub struct TestSetup {
    pub sim: Arc<SimRuntime>,
    pub bridge: Arc<Bridge>,
}

impl TestSetup {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        init_logging();
        let sim = Arc::new(SimRuntime::new());
        define_example_classes(&sim);
        let bridge = Bridge::new(sim.clone(), config);
        Self { sim, bridge }
    }
}

/// Sends the crate's `log` output to the test harness. Run with
/// `RUST_LOG=debug` to see it.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Reads the text of a string object, or None for null.
fn text(heap: &jvm_bridge::sim::SimHeap, value: SimValue) -> Option<String> {
    match value {
        SimValue::Object(Some(id)) => heap.string(id).map(str::to_string),
        _ => None,
    }
}

/// Installs `com.example.Calc`, its subclass `com.example.LoudCalc` and
/// `com.example.secure.Vault`.
pub fn define_example_classes(sim: &SimRuntime) {
    sim.define_class(
        SimClass::new("com.example.Calc")
            .field("value", "I")
            .field("label", "Ljava/lang/String;")
            .static_field("count", "I", SimValue::Int(0))
            .constructor("(I)V", |heap, this, args| {
                heap.set_field(this, "value", args[0]);
                let count = heap.get_static("com/example/Calc", "count").int()?;
                heap.set_static("com/example/Calc", "count", SimValue::Int(count + 1));
                Ok(())
            })
            .static_method("answer", "()I", |_, _| Ok(SimValue::Int(42)))
            .static_method("add", "(II)I", |_, args| {
                Ok(SimValue::Int(args[0].int()? + args[1].int()?))
            })
            .static_method("divide", "(II)I", |_, args| {
                let (a, b) = (args[0].int()?, args[1].int()?);
                if b == 0 {
                    return Err(SimThrow::new("java/lang/ArithmeticException", "/ by zero"));
                }
                Ok(SimValue::Int(a / b))
            })
            .static_method("failWithCause", "()V", |_, _| {
                Err(SimThrow::new("java/lang/IllegalStateException", "outer")
                    .caused_by(SimThrow::new("java/io/IOException", "disk")))
            })
            .static_method(
                "greet",
                "(Ljava/lang/String;)Ljava/lang/String;",
                |heap, args| {
                    let name = text(heap, args[0]).unwrap_or_else(|| "nobody".to_string());
                    Ok(SimValue::Object(Some(heap.new_string(&format!("Hello, {}", name)))))
                },
            )
            .static_method("nothing", "()Ljava/lang/Object;", |_, _| Ok(SimValue::NULL))
            .method("value", "()I", |heap, this, _| Ok(heap.get_field(this, "value")))
            .method("describe", "()Ljava/lang/String;", |heap, this, _| {
                let value = heap.get_field(this, "value").int()?;
                Ok(SimValue::Object(Some(heap.new_string(&format!("calc {}", value)))))
            }),
    );
    sim.define_class(
        SimClass::new("com.example.LoudCalc")
            .extends("com.example.Calc")
            .constructor("(I)V", |heap, this, args| {
                heap.set_field(this, "value", args[0]);
                Ok(())
            })
            .method("describe", "()Ljava/lang/String;", |heap, this, _| {
                let value = heap.get_field(this, "value").int()?;
                Ok(SimValue::Object(Some(heap.new_string(&format!("CALC {}!", value)))))
            }),
    );
    sim.define_class(
        SimClass::new("com.example.secure.Vault")
            .static_method("open", "()I", |_, _| Ok(SimValue::Int(1)))
            .static_method("peek", "()I", |_, _| Ok(SimValue::Int(2)))
            .export_member("peek"),
    );
}
