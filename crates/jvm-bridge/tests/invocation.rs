//! Integration tests for member resolution, invocation and exception
//! translation against the simulated runtime.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use common::TestSetup;
use jvm_bridge::sim::{SimClass, SimThrow};
use jvm_bridge::{
    Arg, BridgeConfig, BridgeError, Constructor, ExceptionReporter, InstanceField, InstanceMethod,
    ManagedException, ManagedReference, MemberKind, RefScope, StaticField, StaticMethod,
};

const CALC: &str = "com.example.Calc";

#[test]
fn test_static_call_returns_value() {
    let setup = TestSetup::new();
    let (answer, sum) = setup
        .bridge
        .with_attached_thread(|env| {
            let answer: i32 = env.call_static(CALC, "answer", "()I", &[])?;
            let sum: i32 = env.call_static(CALC, "add", "(II)I", &[Arg::Int(40), Arg::Int(2)])?;
            Ok((answer, sum))
        })
        .expect("static calls failed");
    assert_eq!(answer, 42);
    assert_eq!(sum, 42);
}

#[test]
fn test_typed_static_method() {
    let setup = TestSetup::new();
    let add = StaticMethod::<i32>::new(CALC, "add", "(II)I");
    let result = setup
        .bridge
        .with_attached_thread(|env| add.call(env, &[1.into(), 2.into()]))
        .expect("typed call failed");
    assert_eq!(result, 3);
}

#[test]
fn test_inferred_signature() {
    let setup = TestSetup::new();
    let sum: i32 = setup
        .bridge
        .with_attached_thread(|env| {
            env.call_static_inferred(CALC, "add", &[Arg::Int(2), Arg::Int(3)])
        })
        .unwrap();
    assert_eq!(sum, 5);
}

#[test]
fn test_type_mismatch_fails_before_crossing() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let before = setup.sim.stats().ops;

            let err = env
                .call_static::<i32>(CALC, "add", "(II)I", &[Arg::Str("40"), Arg::Int(2)])
                .unwrap_err();
            assert!(matches!(err, BridgeError::TypeMismatch { .. }), "{}", err);

            let err = env
                .call_static::<i32>(CALC, "add", "(II)I", &[Arg::Int(1)])
                .unwrap_err();
            assert!(matches!(
                err,
                BridgeError::Arity {
                    expected: 2,
                    found: 1,
                    ..
                }
            ));

            let err = env.call_static::<i32>(CALC, "add", "(II", &[]).unwrap_err();
            assert!(matches!(err, BridgeError::InvalidSignature { .. }));

            assert_eq!(setup.sim.stats().ops, before);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_return_type_mismatch() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let before = setup.sim.stats().ops;
            let err = env
                .call_static::<String>(CALC, "answer", "()I", &[])
                .unwrap_err();
            match err {
                BridgeError::TypeMismatch {
                    location,
                    expected,
                    found,
                } => {
                    assert_eq!(location, "return value of com.example.Calc.answer()I");
                    assert_eq!(expected, "Ljava/lang/String;");
                    assert_eq!(found, "I");
                }
                other => panic!("unexpected error: {other}"),
            }
            let err = StaticMethod::<i64>::new(CALC, "answer", "()I")
                .call(env, &[])
                .unwrap_err();
            assert!(matches!(err, BridgeError::TypeMismatch { .. }));
            // Neither the class nor the method was looked up.
            assert_eq!(setup.sim.stats().ops, before);
            assert_eq!(setup.bridge.resolver().cached_members(), 0);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_field_type_mismatch_fails_before_crossing() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let calc = env.new_object(CALC, "(I)V", &[Arg::Int(1)])?;
            let before = setup.sim.stats().ops;

            let err = env
                .get_field::<String>(&calc, CALC, "value", "I")
                .unwrap_err();
            assert!(matches!(err, BridgeError::TypeMismatch { .. }));
            let err = env
                .set_static_field(CALC, "count", "I", "many")
                .unwrap_err();
            assert!(matches!(err, BridgeError::TypeMismatch { .. }));
            let err = StaticField::<bool>::new(CALC, "count", "I").get(env).unwrap_err();
            assert!(matches!(err, BridgeError::TypeMismatch { .. }));
            let err = env.get_field::<i32>(&calc, CALC, "value", "V").unwrap_err();
            assert!(matches!(err, BridgeError::InvalidSignature { .. }));

            assert_eq!(setup.sim.stats().ops, before);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_exception_translated_with_causes() {
    let setup = TestSetup::new();
    let err = setup
        .bridge
        .with_attached_thread(|env| env.call_static::<()>(CALC, "failWithCause", "()V", &[]))
        .unwrap_err();

    let exception = err.managed_exception().expect("expected a managed exception");
    assert_eq!(exception.class_name, "java.lang.IllegalStateException");
    assert_eq!(exception.message, "outer");
    assert_eq!(exception.causes.len(), 2);
    assert!(exception.is_caused_by("java.io.IOException"));
    assert_eq!(
        exception.root_cause().map(|c| c.message.as_str()),
        Some("disk")
    );
    assert_eq!(
        exception.causes[0].frames,
        vec!["com.example.Calc.failWithCause(Calc.java)".to_string()]
    );
    assert!(exception
        .stack_trace()
        .contains("Caused by: java.io.IOException: disk"));
}

#[test]
fn test_deep_stack_trace_is_described_in_full() {
    let setup = TestSetup::new();
    setup.sim.define_class(SimClass::new("com.example.Deep").static_method(
        "recurse",
        "()V",
        |_, _| {
            Err(SimThrow::new("java/lang/StackOverflowError", "deep")
                .with_frames((0..200).map(|i| format!("com.example.Deep.recurse(Deep.java:{})", i))))
        },
    ));
    setup
        .bridge
        .with_attached_thread(|env| {
            let before = setup.sim.stats().live_locals;
            // A small local table: describing must release as it goes.
            setup.sim.limit_live_locals(Some(before + 12));
            let err = env
                .call_static::<()>("com.example.Deep", "recurse", "()V", &[])
                .unwrap_err();
            setup.sim.limit_live_locals(None);

            let exception = err.managed_exception().expect("expected a managed exception");
            assert_eq!(exception.class_name, "java.lang.StackOverflowError");
            assert_eq!(exception.message, "deep");
            let frames = &exception.causes[0].frames;
            assert_eq!(frames.len(), 201);
            assert_eq!(frames[0], "com.example.Deep.recurse(Deep.java:0)");
            assert_eq!(frames[199], "com.example.Deep.recurse(Deep.java:199)");
            assert_eq!(frames[200], "com.example.Deep.recurse(Deep.java)");

            assert_eq!(setup.sim.stats().live_locals, before);
            assert!(!env.runtime().exception_check()?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_exception_described_when_no_frame_fits() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            // Warm the caches so the failing call needs no new references.
            let _: i32 = env.call_static(CALC, "divide", "(II)I", &[Arg::Int(4), Arg::Int(2)])?;
            let before = setup.sim.stats().live_locals;
            // Too few references left for a describe frame, enough to walk it.
            setup.sim.limit_references(Some(20));
            let err = env
                .call_static::<i32>(CALC, "divide", "(II)I", &[Arg::Int(1), Arg::Int(0)])
                .unwrap_err();
            setup.sim.limit_references(None);

            let exception = err.managed_exception().expect("expected a managed exception");
            assert_eq!(exception.to_string(), "java.lang.ArithmeticException: / by zero");
            assert_eq!(
                exception.causes[0].frames,
                vec!["com.example.Calc.divide(Calc.java)".to_string()]
            );
            assert_eq!(setup.sim.stats().live_locals, before);
            assert!(!env.runtime().exception_check()?);
            Ok(())
        })
        .unwrap();
    assert_eq!(setup.sim.stats().calls_with_pending_exception, 0);
}

#[test]
fn test_failed_string_decode_surfaces_exception() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let text = env.new_string("text")?;
            setup.sim.fail_next_string_decode();
            let err = env.read_string(&text).unwrap_err();
            assert_eq!(
                err.managed_exception().map(|e| e.class_name.as_str()),
                Some("java.lang.OutOfMemoryError")
            );
            assert!(!env.runtime().exception_check()?);
            assert_eq!(env.read_string(&text)?, "text");
            Ok(())
        })
        .unwrap();
    assert_eq!(setup.sim.stats().calls_with_pending_exception, 0);
}

#[test]
fn test_exception_is_cleared_after_translation() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let err = env
                .call_static::<i32>(CALC, "divide", "(II)I", &[Arg::Int(1), Arg::Int(0)])
                .unwrap_err();
            assert_eq!(
                err.managed_exception().map(|e| e.to_string()),
                Some("java.lang.ArithmeticException: / by zero".to_string())
            );
            let quotient: i32 =
                env.call_static(CALC, "divide", "(II)I", &[Arg::Int(9), Arg::Int(3)])?;
            assert_eq!(quotient, 3);
            Ok(())
        })
        .unwrap();
    assert_eq!(setup.sim.stats().calls_with_pending_exception, 0);
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl ExceptionReporter for Recorder {
    fn report(&self, exception: &ManagedException) {
        self.seen.lock().push(exception.class_name.clone());
    }
}

#[test]
fn test_exception_reporter_is_called() {
    let setup = TestSetup::new();
    let recorder = Arc::new(Recorder::default());
    setup
        .bridge
        .set_exception_reporter(Some(recorder.clone() as Arc<dyn ExceptionReporter>));
    let _ = setup.bridge.with_attached_thread(|env| {
        env.call_static::<i32>(CALC, "divide", "(II)I", &[Arg::Int(1), Arg::Int(0)])
    });
    assert_eq!(
        *recorder.seen.lock(),
        vec!["java.lang.ArithmeticException".to_string()]
    );
}

#[test]
fn test_resolution_is_memoized() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let resolver = env.bridge().resolver();
            let lookups = setup.sim.stats().member_lookups;
            let count = resolver.resolution_count();

            let first = env.resolve(CALC, "add", "(II)I", MemberKind::StaticMethod)?;
            let second =
                env.resolve("com/example/Calc", "add", "(II)I", MemberKind::StaticMethod)?;

            assert!(Arc::ptr_eq(&first, &second));
            assert_eq!(resolver.resolution_count(), count + 1);
            assert_eq!(setup.sim.stats().member_lookups, lookups + 1);
            assert_eq!(first.key().to_string(), "com.example.Calc.add(II)I");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_missing_class_and_member() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let err = env
                .resolve("com.example.Missing", "run", "()V", MemberKind::StaticMethod)
                .unwrap_err();
            assert!(matches!(
                err,
                BridgeError::ClassNotFound { ref class } if class == "com.example.Missing"
            ));

            let err = env
                .resolve(CALC, "subtract", "(II)I", MemberKind::StaticMethod)
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                "Member not found: com.example.Calc.subtract(II)I"
            );

            // Static and instance members do not resolve as each other.
            assert!(env.resolve(CALC, "add", "(II)I", MemberKind::Method).is_err());
            assert!(!env.runtime().exception_check()?);
            Ok(())
        })
        .unwrap();
    assert_eq!(setup.sim.stats().calls_with_pending_exception, 0);
}

#[test]
fn test_constructor_and_virtual_dispatch() {
    let setup = TestSetup::new();
    let describe = InstanceMethod::<String>::new(CALC, "describe", "()Ljava/lang/String;");
    let (plain, loud, value) = setup
        .bridge
        .with_attached_thread(|env| {
            let calc = env.new_object(CALC, "(I)V", &[Arg::Int(7)])?;
            let loud = Constructor::new("com.example.LoudCalc", "(I)V")
                .new_object(env, &[Arg::Int(8)])?;
            let value: i32 = env.call_method(&calc, CALC, "value", "()I", &[])?;
            Ok((describe.call(env, &calc, &[])?, describe.call(env, &loud, &[])?, value))
        })
        .unwrap();
    assert_eq!(plain, "calc 7");
    assert_eq!(loud, "CALC 8!");
    assert_eq!(value, 7);
}

#[test]
fn test_constructor_must_return_void() {
    let setup = TestSetup::new();
    let err = setup
        .bridge
        .with_attached_thread(|env| env.new_object(CALC, "(I)I", &[Arg::Int(1)]))
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidSignature { .. }));
}

#[test]
fn test_null_receiver_is_rejected() {
    let setup = TestSetup::new();
    let err = setup
        .bridge
        .with_attached_thread(|env| {
            let null = ManagedReference::null(env.runtime().clone(), RefScope::Local);
            env.call_method::<i32>(&null, CALC, "value", "()I", &[])
        })
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidHandle { .. }));
}

#[test]
fn test_fields() {
    let setup = TestSetup::new();
    let label = InstanceField::<Option<String>>::new(CALC, "label", "Ljava/lang/String;");
    let count = StaticField::<i32>::new(CALC, "count", "I");
    setup
        .bridge
        .with_attached_thread(|env| {
            let calc = env.new_object(CALC, "(I)V", &[Arg::Int(1)])?;
            assert_eq!(env.get_field::<i32>(&calc, CALC, "value", "I")?, 1);
            env.set_field(&calc, CALC, "value", "I", 5)?;
            assert_eq!(env.get_field::<i32>(&calc, CALC, "value", "I")?, 5);

            assert_eq!(label.get(env, &calc)?, None);
            label.set(env, &calc, "primary")?;
            assert_eq!(label.get(env, &calc)?, Some("primary".to_string()));

            assert_eq!(count.get(env)?, 1);
            count.set(env, 10)?;
            assert_eq!(env.get_static_field::<i32>(CALC, "count", "I")?, 10);

            let err = env.set_field(&calc, CALC, "value", "I", "five").unwrap_err();
            assert!(matches!(err, BridgeError::TypeMismatch { .. }));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_strings_cross_without_leaking_locals() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let before = setup.sim.stats().live_locals;
            let greeting: String = env.call_static(
                CALC,
                "greet",
                "(Ljava/lang/String;)Ljava/lang/String;",
                &[Arg::Str("world")],
            )?;
            assert_eq!(greeting, "Hello, world");

            let nobody: Option<String> = env.call_static(
                CALC,
                "greet",
                "(Ljava/lang/String;)Ljava/lang/String;",
                &[Arg::Null],
            )?;
            assert_eq!(nobody.as_deref(), Some("Hello, nobody"));

            let nothing: Option<ManagedReference> =
                env.call_static(CALC, "nothing", "()Ljava/lang/Object;", &[])?;
            assert!(nothing.is_none());

            // Class references are cached as globals, not locals.
            assert_eq!(setup.sim.stats().live_locals, before);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_boxing_round_trip() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let boxed = env.box_value(5_i32)?;
            assert_eq!(env.unbox::<i32>(&boxed)?, 5);
            let flag = env.box_value(true)?;
            assert!(env.unbox::<bool>(&flag)?);
            let class: String = env.call_method(
                &boxed,
                "java.lang.Object",
                "toString",
                "()Ljava/lang/String;",
                &[],
            )?;
            assert!(class.starts_with("java.lang.Integer@"));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_export_policy() {
    let config = BridgeConfig {
        export_required: BTreeMap::from([("com.example.secure".to_string(), true)]),
        ..BridgeConfig::default()
    };
    let setup = TestSetup::with_config(config);
    setup
        .bridge
        .with_attached_thread(|env| {
            let err = env
                .call_static::<i32>("com.example.secure.Vault", "open", "()I", &[])
                .unwrap_err();
            assert!(matches!(err, BridgeError::MemberNotExported { .. }));
            let peek: i32 = env.call_static("com.example.secure.Vault", "peek", "()I", &[])?;
            assert_eq!(peek, 2);
            // Packages outside the policy are unaffected.
            let answer: i32 = env.call_static(CALC, "answer", "()I", &[])?;
            assert_eq!(answer, 42);
            Ok(())
        })
        .unwrap();
}
