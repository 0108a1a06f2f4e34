//! Functions exported to the JVM.
//!
//! `JNI_OnLoad` creates the process-wide bridge. The support class's native
//! methods are bound with `RegisterNatives`, so their symbol names do not
//! follow the `Java_...` mangling scheme.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use jni_sys::{jclass, jint, jobject, jstring, JNIEnv, JavaVM, JNI_ERR};
use log::{debug, error, info};

use jvm_bridge::bridge;
use jvm_bridge::export::natives;
use jvm_bridge::logging;
use jvm_bridge::{Bridge, BridgeConfig, BridgeError, BridgeResult, Env, ExportTable, NativeFn};

use crate::jni_runtime::{handle, JniRuntime};

/// Runs a native method body against the loaded bridge.
///
/// Errors become managed exceptions and panics are contained; both return
/// `R::default()` to the JVM.
fn enter<R: Default>(method: &str, f: impl FnOnce(&Env<'_>) -> BridgeResult<R>) -> R {
    let bridge = match bridge::global() {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("{} called before the bridge loaded: {}", method, e);
            return R::default();
        }
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        bridge.enter_from_managed(|env| match f(env) {
            Ok(value) => value,
            Err(e) => {
                debug!("{} failed: {}", method, e);
                natives::throw_error(env, &e);
                R::default()
            }
        })
    }));
    outcome.unwrap_or_else(|_| {
        error!("Panic in native method {}", method);
        R::default()
    })
}

extern "system" fn native_log(_env: *mut JNIEnv, _class: jclass, level: jint, message: jstring) {
    enter("nativeLog", |env| {
        let message = env.wrap_local(handle(message));
        let text = env.read_string(&message)?;
        natives::native_log(level, &text);
        Ok(())
    })
}

extern "system" fn register_singleton(
    _env: *mut JNIEnv,
    _class: jclass,
    name: jstring,
    object: jobject,
) {
    enter("registerSingleton", |env| {
        let name = env.wrap_local(handle(name));
        let object = env.wrap_local(handle(object));
        natives::register_singleton(env, &name, &object)
    })
}

extern "system" fn unregister_singleton(
    _env: *mut JNIEnv,
    _class: jclass,
    name: jstring,
    object: jobject,
) {
    enter("unregisterSingleton", |env| {
        let name = env.wrap_local(handle(name));
        let object = env.wrap_local(handle(object));
        natives::unregister_singleton(env, &name, &object)
    })
}

extern "system" fn unregister_all_singletons(_env: *mut JNIEnv, _class: jclass) {
    enter("unregisterAllSingletons", natives::unregister_all_singletons)
}

fn support_fn(name: &str) -> Option<NativeFn> {
    let ptr = match name {
        "nativeLog" => native_log as *mut c_void,
        "registerSingleton" => register_singleton as *mut c_void,
        "unregisterSingleton" => unregister_singleton as *mut c_void,
        "unregisterAllSingletons" => unregister_all_singletons as *mut c_void,
        _ => return None,
    };
    Some(NativeFn::new(ptr))
}

/// Export table binding the support class's natives to this library.
pub fn support_exports(support_class: &str) -> BridgeResult<ExportTable> {
    natives::SUPPORT_METHODS
        .iter()
        .try_fold(ExportTable::builder(), |builder, (name, signature)| {
            let f = support_fn(name).ok_or_else(|| {
                BridgeError::member_not_found(support_class, *name, *signature)
            })?;
            Ok::<_, BridgeError>(builder.export(support_class, name, signature, f))
        })?
        .build()
}

fn load(vm: *mut JavaVM) -> BridgeResult<Arc<Bridge>> {
    if let Err(e) = logging::init() {
        debug!("Keeping the existing logger: {}", e);
    }
    let config = BridgeConfig::default().with_env_overrides()?;
    // SAFETY: the JVM passes its own live JavaVM pointer to JNI_OnLoad.
    let runtime = unsafe { JniRuntime::from_raw(vm, config.version) }?;
    let exports = support_exports(&config.support_class)?;
    Bridge::on_load(Arc::new(runtime), config, &exports)
}

/// Called by the JVM when the library is loaded.
///
/// Returns the interface version the bridge needs, or `JNI_ERR`.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn JNI_OnLoad(vm: *mut JavaVM, _reserved: *mut c_void) -> jint {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| load(vm)));
    match outcome {
        Ok(Ok(bridge)) => bridge.config().version.as_raw(),
        Ok(Err(e)) => {
            error!("Bridge load failed: {}", e);
            JNI_ERR
        }
        Err(_) => {
            error!("Panic during bridge load");
            JNI_ERR
        }
    }
}

/// Called by the JVM when the library's class loader is collected.
/// Uninstalls the bridge and releases the managed references it holds, so
/// a later `JNI_OnLoad` starts fresh.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn JNI_OnUnload(_vm: *mut JavaVM, _reserved: *mut c_void) {
    let Some(bridge) = bridge::unload() else {
        return;
    };
    let result = bridge.with_attached_thread(|env| {
        let released = env.bridge().singletons().unregister_all();
        env.bridge().resolver().clear();
        Ok(released)
    });
    match result {
        Ok(released) => info!("Released {} singletons on unload", released),
        Err(e) => error!("Bridge unload failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_support_exports_cover_every_native() {
        let table = support_exports("dev.jvmbridge.NativeExporter").unwrap();
        assert_eq!(table.class_count(), 1);
        let methods = table.methods("dev.jvmbridge.NativeExporter");
        let names: Vec<_> = methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            ["nativeLog", "registerSingleton", "unregisterSingleton", "unregisterAllSingletons"]
        );
        assert!(methods.iter().all(|m| !m.fn_ptr.is_null()));
    }

    #[test]
    fn test_natives_before_load_are_harmless() {
        // No bridge is loaded in this test binary.
        unregister_all_singletons(std::ptr::null_mut(), std::ptr::null_mut());
        native_log(std::ptr::null_mut(), std::ptr::null_mut(), 1, std::ptr::null_mut());
        JNI_OnUnload(std::ptr::null_mut(), std::ptr::null_mut());
    }
}
