//! Integration tests for module load, native registration, the singleton
//! registry and managed logging.

mod common;

use std::ffi::c_void;
use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serial_test::serial;

use common::TestSetup;
use jvm_bridge::bridge;
use jvm_bridge::export::natives;
use jvm_bridge::logging::{self, LogLevel, LogSink, ManagedLogSink};
use jvm_bridge::sim::{RegisteredNative, SimClass, SimRuntime, SimValue, ThrownToManaged};
use jvm_bridge::{
    Arg, Bridge, BridgeConfig, BridgeError, ExportTable, ManagedException, ManagedReference,
    NativeFn, RefScope,
};

const CALC: &str = "com.example.Calc";

extern "C" fn placeholder() {}

fn native_fn() -> NativeFn {
    NativeFn::new(placeholder as *mut c_void)
}

fn support_exports() -> ExportTable {
    natives::SUPPORT_METHODS
        .iter()
        .fold(ExportTable::builder(), |b, (name, sig)| {
            b.export("dev.jvmbridge.NativeExporter", name, sig, native_fn())
        })
        .build()
        .expect("support exports are valid")
}

#[test]
#[serial]
fn test_module_load_lifecycle() {
    assert!(matches!(bridge::global(), Err(BridgeError::NotLoaded)));
    assert!(!bridge::is_loaded());

    let sim = Arc::new(SimRuntime::new());
    let loaded = Bridge::on_load(sim.clone(), BridgeConfig::default(), &support_exports())
        .expect("module load failed");

    assert!(bridge::is_loaded());
    assert!(Arc::ptr_eq(&bridge::global().unwrap(), &loaded));
    let registered = sim.registered_natives();
    assert_eq!(registered.len(), 4);
    assert_eq!(
        registered[0],
        RegisteredNative {
            class: "dev.jvmbridge.NativeExporter".to_string(),
            name: "nativeLog".to_string(),
            signature: "(ILjava/lang/String;)V".to_string(),
        }
    );
    // Load attaches only for its own duration.
    assert_eq!((sim.stats().attaches, sim.stats().detaches), (1, 1));

    let again = Bridge::on_load(sim, BridgeConfig::default(), &ExportTable::empty());
    assert!(matches!(again, Err(BridgeError::AlreadyLoaded)));
}

#[test]
fn test_registering_undeclared_native_fails() {
    let setup = TestSetup::new();
    let table = ExportTable::builder()
        .export(CALC, "nativeSum", "([I)I", native_fn())
        .build()
        .unwrap();
    let err = setup
        .bridge
        .with_attached_thread(|env| table.register(env))
        .unwrap_err();
    assert_eq!(
        err.managed_exception().map(|e| e.class_name.as_str()),
        Some("java.lang.NoSuchMethodError")
    );
    assert!(setup.sim.registered_natives().is_empty());
}

#[test]
fn test_singleton_registry() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let singletons = env.bridge().singletons();
            let first = env.new_object(CALC, "(I)V", &[Arg::Int(1)])?;
            let second = env.new_object(CALC, "(I)V", &[Arg::Int(2)])?;

            singletons.register(env, "calc", &first)?;
            singletons.register(env, "calc", &first)?;
            assert_eq!(singletons.len(), 1);
            assert_eq!(setup.sim.stats().live_globals, 2); // calc + its class

            let held = singletons.get(env, "calc")?.expect("registered");
            assert!(held.is_same(&first)?);
            drop(held);

            // Unregistering with a different object leaves the entry alone.
            assert!(!singletons.unregister("calc", &second)?);
            assert!(singletons.contains("calc"));

            singletons.register(env, "calc", &second)?;
            let held = singletons.get(env, "calc")?.expect("replaced");
            assert!(held.is_same(&second)?);
            drop(held);

            assert!(singletons.unregister("calc", &second)?);
            assert!(singletons.get(env, "calc")?.is_none());

            let null = ManagedReference::null(env.runtime().clone(), RefScope::Local);
            assert!(matches!(
                singletons.register(env, "none", &null),
                Err(BridgeError::InvalidHandle { .. })
            ));
            Ok(())
        })
        .unwrap();
    assert_eq!(setup.sim.stats().live_globals, 1);
}

#[test]
fn test_singleton_natives_from_managed() {
    let setup = TestSetup::new();
    let result = setup.sim.call_from_managed(|| {
        setup.bridge.enter_from_managed(|env| {
            let name = env.new_string("answer")?;
            let object = env.box_value(42_i32)?;
            natives::register_singleton(env, &name, &object)?;
            natives::unregister_singleton(env, &name, &name)?;
            assert!(env.bridge().singletons().contains("answer"));
            let held = env.bridge().singletons().get(env, "answer")?.expect("held");
            assert_eq!(env.unbox::<i32>(&held)?, 42);
            natives::unregister_all_singletons(env)
        })
    });
    result.unwrap();
    assert!(setup.bridge.singletons().is_empty());
    assert!(setup.sim.thrown_to_managed().is_empty());
}

#[test]
fn test_errors_surface_as_managed_exceptions() {
    let setup = TestSetup::new();
    setup.sim.call_from_managed(|| {
        setup
            .bridge
            .enter_from_managed(|env| natives::throw_error(env, &BridgeError::NotLoaded))
    });
    setup.sim.call_from_managed(|| {
        setup.bridge.enter_from_managed(|env| {
            let err: BridgeError =
                ManagedException::new("java.lang.ArithmeticException", "/ by zero").into();
            natives::throw_error(env, &err)
        })
    });
    assert_eq!(
        setup.sim.thrown_to_managed(),
        vec![
            ThrownToManaged {
                class: "java.lang.IllegalStateException".to_string(),
                message: Some("Bridge not loaded".to_string()),
            },
            ThrownToManaged {
                class: "java.lang.ArithmeticException".to_string(),
                message: Some("/ by zero".to_string()),
            },
        ]
    );
}

#[derive(Default)]
struct Capture(Mutex<Vec<(LogLevel, String)>>);

impl LogSink for Capture {
    fn log(&self, level: LogLevel, _tag: &str, message: &str) {
        self.0.lock().push((level, message.to_string()));
    }
}

#[test]
#[serial]
fn test_native_log_reaches_sink() {
    let capture = Arc::new(Capture::default());
    logging::set_sink(capture.clone());
    logging::set_min_level(LogLevel::Info);

    natives::native_log(2, "from managed");
    natives::native_log(0, "too quiet");
    assert_eq!(
        capture.0.lock().clone(),
        vec![(LogLevel::Warn, "from managed".to_string())]
    );
    logging::reset_sink();
}

#[test]
#[serial]
fn test_managed_log_sink() {
    let setup = TestSetup::new();
    setup.sim.define_class(
        SimClass::new("com.example.Log")
            .static_field("last", "Ljava/lang/String;", SimValue::NULL)
            .static_field("level", "I", SimValue::Int(-1))
            .static_method("log", "(ILjava/lang/String;)V", |heap, args| {
                heap.set_static("com/example/Log", "level", args[0]);
                heap.set_static("com/example/Log", "last", args[1]);
                Ok(SimValue::Void)
            }),
    );
    logging::set_min_level(LogLevel::Debug);
    logging::set_sink(Arc::new(ManagedLogSink::new(
        setup.bridge.clone(),
        "com.example.Log",
        "log",
    )));
    logging::log(LogLevel::Error, "app", "disk full");
    logging::reset_sink();

    assert_eq!(setup.sim.static_value("com.example.Log", "level"), SimValue::Int(3));
    let text = setup
        .bridge
        .with_attached_thread(|env| {
            env.get_static_field::<String>("com.example.Log", "last", "Ljava/lang/String;")
        })
        .unwrap();
    assert_eq!(text, "app: disk full");
}
