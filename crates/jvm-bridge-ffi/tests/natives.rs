//! Drives the exported support natives through their raw function pointers,
//! with the simulated runtime standing in for the JVM.

use std::mem;
use std::ptr;
use std::sync::Arc;

use jni_sys::{jclass, jint, jobject, jstring, JNIEnv};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use jvm_bridge::bridge;
use jvm_bridge::config::defaults;
use jvm_bridge::logging::{self, LogLevel, LogSink};
use jvm_bridge::sim::{SimRuntime, ThrownToManaged};
use jvm_bridge::{Bridge, BridgeConfig, ManagedRuntime, NativeFn, ObjectHandle};
use jvm_bridge_ffi::{support_exports, JNI_OnUnload};

type LogFn = extern "system" fn(*mut JNIEnv, jclass, jint, jstring);
type SingletonFn = extern "system" fn(*mut JNIEnv, jclass, jstring, jobject);
type ClearFn = extern "system" fn(*mut JNIEnv, jclass);

fn raw(handle: ObjectHandle) -> jobject {
    handle.as_raw() as jobject
}

fn lookup(table: &jvm_bridge::ExportTable, name: &str) -> NativeFn {
    table
        .methods(defaults::SUPPORT_CLASS)
        .iter()
        .find(|m| m.name == name)
        .map(|m| m.fn_ptr)
        .expect("native is exported")
}

#[derive(Default)]
struct Capture(Mutex<Vec<(LogLevel, String)>>);

impl LogSink for Capture {
    fn log(&self, level: LogLevel, _tag: &str, message: &str) {
        self.0.lock().push((level, message.to_string()));
    }
}

// One test: the bridge is installed process-wide and loads once at a time.
#[test]
fn test_support_natives_against_simulated_runtime() {
    let sim = Arc::new(SimRuntime::new());
    let table = support_exports(defaults::SUPPORT_CLASS).unwrap();
    let bridge = Bridge::on_load(sim.clone(), BridgeConfig::default(), &table).unwrap();
    assert_eq!(sim.registered_natives().len(), 4);

    let null_env: *mut JNIEnv = ptr::null_mut();
    let null_class: jclass = ptr::null_mut();

    // SAFETY: the pointers were taken from these exact functions.
    let native_log: LogFn = unsafe { mem::transmute(lookup(&table, "nativeLog").as_ptr()) };
    let register: SingletonFn =
        unsafe { mem::transmute(lookup(&table, "registerSingleton").as_ptr()) };
    let unregister: SingletonFn =
        unsafe { mem::transmute(lookup(&table, "unregisterSingleton").as_ptr()) };
    let clear: ClearFn =
        unsafe { mem::transmute(lookup(&table, "unregisterAllSingletons").as_ptr()) };

    let capture = Arc::new(Capture::default());
    logging::set_sink(capture.clone());
    sim.call_from_managed(|| {
        let message = sim.new_string("from managed").unwrap();
        native_log(null_env, null_class, 2, raw(message));
    });
    logging::reset_sink();
    assert_eq!(
        capture.0.lock().clone(),
        vec![(LogLevel::Warn, "from managed".to_string())]
    );

    let globals_before = sim.stats().live_globals;
    sim.call_from_managed(|| {
        let name = sim.new_string("config").unwrap();
        let value = sim.new_string("value").unwrap();
        register(null_env, null_class, raw(name), raw(value));
    });
    assert!(bridge.singletons().contains("config"));

    // Unregistering with an object that is not the registered one is ignored.
    sim.call_from_managed(|| {
        let name = sim.new_string("config").unwrap();
        let other = sim.new_string("other").unwrap();
        unregister(null_env, null_class, raw(name), raw(other));
    });
    assert!(bridge.singletons().contains("config"));

    sim.call_from_managed(|| clear(null_env, null_class));
    assert!(bridge.singletons().is_empty());
    assert_eq!(sim.stats().live_globals, globals_before);

    // A null name surfaces as an exception in managed code.
    sim.call_from_managed(|| register(null_env, null_class, ptr::null_mut(), ptr::null_mut()));
    assert_eq!(
        sim.thrown_to_managed(),
        vec![ThrownToManaged {
            class: "java.lang.IllegalStateException".to_string(),
            message: Some("Invalid handle: null string".to_string()),
        }]
    );
    assert_eq!(sim.stats().live_locals, 0);

    // Unload releases what the bridge holds and allows a fresh load.
    sim.call_from_managed(|| {
        let name = sim.new_string("config").unwrap();
        let value = sim.new_string("value").unwrap();
        register(null_env, null_class, raw(name), raw(value));
    });
    JNI_OnUnload(ptr::null_mut(), ptr::null_mut());
    assert!(!bridge::is_loaded());
    assert!(bridge.singletons().is_empty());
    assert_eq!(bridge.resolver().cached_classes(), 0);
    assert_eq!(sim.stats().live_globals, 0);

    let reloaded = Bridge::on_load(sim.clone(), BridgeConfig::default(), &table).unwrap();
    assert!(!Arc::ptr_eq(&bridge, &reloaded));
    assert!(Arc::ptr_eq(&bridge::global().unwrap(), &reloaded));
}
