//! Integration tests for reference scopes and local frames.

mod common;

use std::thread;

use pretty_assertions::assert_eq;

use common::TestSetup;
use jvm_bridge::{Arg, BridgeError, RefScope};

#[test]
fn test_local_frame_releases_locals() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let before = setup.sim.stats().live_locals;
            let escaped = env.with_local_frame(|env| {
                env.new_string("scratch")?;
                env.new_string("inside")
            })?;
            assert_eq!(setup.sim.stats().live_locals, before);
            assert!(matches!(escaped.get(), Err(BridgeError::UseAfterRelease)));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_pop_with_carries_result_out() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let before = setup.sim.stats().live_locals;
            let frame = env.local_frame()?;
            let temp = env.new_string("temp")?;
            let kept = env.new_string("kept")?;
            let kept = frame.pop_with(kept)?;

            assert_eq!(env.read_string(&kept)?, "kept");
            assert_eq!(kept.scope(), RefScope::Local);
            assert!(matches!(temp.get(), Err(BridgeError::UseAfterRelease)));
            assert_eq!(setup.sim.stats().live_locals, before + 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_frames_closed_out_of_order_stay_consistent() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let before = setup.sim.stats().live_locals;
            let outer = env.local_frame()?;
            let in_outer = env.new_string("outer")?;
            let inner = env.local_frame()?;
            let in_inner = env.new_string("inner")?;

            // Closing the outer frame closes the inner one with it.
            drop(outer);
            assert!(matches!(in_outer.get(), Err(BridgeError::UseAfterRelease)));
            assert!(matches!(in_inner.get(), Err(BridgeError::UseAfterRelease)));
            assert_eq!(setup.sim.stats().live_locals, before);

            // New locals belong to the enclosing scope, not the closed frames.
            let after = env.new_string("after")?;
            drop(inner);
            assert_eq!(env.read_string(&after)?, "after");
            assert_eq!(setup.sim.stats().live_locals, before + 1);
            Ok(())
        })
        .unwrap();
    assert_eq!(setup.sim.stats().invalid_handle_uses, 0);
}

#[test]
fn test_pop_with_requires_innermost_frame() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let before = setup.sim.stats().live_locals;
            let outer = env.local_frame()?;
            let _inner = env.local_frame()?;
            let value = env.new_string("nested")?;
            let err = outer.pop_with(value).unwrap_err();
            assert!(matches!(err, BridgeError::InvalidHandle { .. }));
            assert_eq!(setup.sim.stats().live_locals, before);
            Ok(())
        })
        .unwrap();
    assert_eq!(setup.sim.stats().invalid_handle_uses, 0);
}

#[test]
fn test_promoted_global_is_usable_from_another_thread() {
    let setup = TestSetup::new();
    let calc = setup
        .bridge
        .with_attached_thread(|env| {
            let mut calc = env.new_object("com.example.Calc", "(I)V", &[Arg::Int(7)])?;
            calc.promote(RefScope::Global)?;
            Ok(calc)
        })
        .unwrap();
    assert_eq!(calc.scope(), RefScope::Global);

    thread::scope(|s| {
        s.spawn(|| {
            setup
                .bridge
                .with_attached_thread(|env| {
                    let value: i32 = env.call_method(&calc, "com.example.Calc", "value", "()I", &[])?;
                    assert_eq!(value, 7);

                    let fresh = calc.to_local()?;
                    assert_eq!(fresh.scope(), RefScope::Local);
                    assert!(fresh.is_same(&calc)?);
                    let text: String = env.call_method(
                        &fresh,
                        "com.example.Calc",
                        "describe",
                        "()Ljava/lang/String;",
                        &[],
                    )?;
                    assert_eq!(text, "calc 7");
                    Ok(())
                })
                .unwrap();
        })
        .join()
        .unwrap();
    });

    assert_eq!(setup.sim.stats().attaches, 2);
    assert_eq!(setup.sim.stats().live_locals, 0);
    assert_eq!(setup.sim.stats().invalid_handle_uses, 0);
    drop(calc);
    // The class stays cached as a global.
    assert_eq!(setup.sim.stats().live_globals, setup.bridge.resolver().cached_classes());
}

#[test]
fn test_global_survives_attach_scope() {
    let setup = TestSetup::new();
    let global = setup
        .bridge
        .with_attached_thread(|env| {
            let mut s = env.new_string("keep")?;
            s.promote(RefScope::Global)?;
            Ok(s)
        })
        .unwrap();
    assert_eq!(setup.sim.stats().live_locals, 0);
    assert_eq!(setup.sim.stats().live_globals, 1);

    let text = setup
        .bridge
        .with_attached_thread(|env| env.read_string(&global))
        .unwrap();
    assert_eq!(text, "keep");

    drop(global);
    assert_eq!(setup.sim.stats().live_globals, 0);
}

#[test]
fn test_local_escaping_attach_scope_is_dead() {
    let setup = TestSetup::new();
    let local = setup
        .bridge
        .with_attached_thread(|env| env.new_string("gone"))
        .unwrap();
    assert!(matches!(local.get(), Err(BridgeError::UseAfterRelease)));
    let invalid_before = setup.sim.stats().invalid_handle_uses;
    drop(local);
    // Dropping a dead local must not touch the runtime.
    assert_eq!(setup.sim.stats().invalid_handle_uses, invalid_before);
}

#[test]
fn test_local_is_bound_to_its_thread() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let local = env.new_string("mine")?;
            let global = local.to_global()?;
            thread::scope(|s| {
                s.spawn(|| {
                    assert!(matches!(
                        local.get(),
                        Err(BridgeError::CrossThreadReference { .. })
                    ));
                    assert!(global.get().is_ok());
                })
                .join()
                .unwrap();
            });
            assert!(local.is_same(&global)?);
            Ok(())
        })
        .unwrap();
    assert_eq!(setup.sim.stats().invalid_handle_uses, 0);
}

#[test]
fn test_reference_exhaustion() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let local = env.new_string("x")?;
            setup.sim.limit_references(Some(0));

            let err = local.to_global().unwrap_err();
            assert!(matches!(
                err,
                BridgeError::ReferenceLeak {
                    scope: RefScope::Global,
                    ..
                }
            ));
            assert!(err.is_retryable());

            let err = env.local_frame_with_capacity(8).map(|_| ()).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::ReferenceLeak {
                    scope: RefScope::Local,
                    ..
                }
            ));

            assert!(env.new_string("y").unwrap_err().is_retryable());
            assert!(!env.runtime().exception_check()?);

            setup.sim.limit_references(None);
            assert_eq!(env.read_string(&local.to_global()?)?, "x");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_weak_reference_follows_collection() {
    let setup = TestSetup::new();
    setup
        .bridge
        .with_attached_thread(|env| {
            let mut strong = env.new_string("ephemeral")?.to_global()?;
            let weak = strong.to_weak()?;
            setup.sim.collect_garbage();
            assert!(!weak.is_collected()?);
            assert_eq!(env.read_string(&weak.to_local()?)?, "ephemeral");

            strong.release()?;
            setup.sim.collect_garbage();
            assert!(weak.is_collected()?);
            assert!(matches!(
                weak.to_local(),
                Err(BridgeError::InvalidHandle { .. })
            ));
            Ok(())
        })
        .unwrap();
}
