//! End-to-end scenarios over derived atoms: sequence (tuple) dependency
//! ordering, chained recomputation after invalidation, and diamond
//! dependency graphs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use effectate::atom::{atom, atom_value};
use effectate::scope::{Scope, ScopeOptions};

#[tokio::test]
async fn sequence_dependency_preserves_position_regardless_of_latency() {
    let scope = Scope::new(ScopeOptions::default());

    let b = atom((), |_ctl, ()| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(1)
        })
    });
    let c = atom((), |_ctl, ()| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(2)
        })
    });
    let d = atom((b.clone(), c.clone()), |_ctl, (x, y): (i32, i32)| {
        Box::pin(async move { Ok((x, y)) })
    });

    assert_eq!(scope.resolve(&d).await.unwrap(), (1, 2));
}

#[tokio::test]
async fn chained_dependents_recompute_in_order_after_invalidation() {
    let scope = Scope::new(ScopeOptions::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let base = atom_value(1);
    let calls_for_d1 = calls.clone();
    let derived1 = atom(base.clone(), move |_ctl, v: i32| {
        calls_for_d1.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(v + 1) })
    });
    let derived2 = atom(derived1.clone(), |_ctl, v: i32| Box::pin(async move { Ok(v + 1) }));
    let derived3 = atom(derived2.clone(), |_ctl, v: i32| Box::pin(async move { Ok(v + 1) }));

    assert_eq!(scope.resolve(&derived3).await.unwrap(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    scope.invalidate(&base).await;

    assert_eq!(scope.resolve(&derived1).await.unwrap(), 2);
    assert_eq!(scope.resolve(&derived2).await.unwrap(), 3);
    assert_eq!(scope.resolve(&derived3).await.unwrap(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn diamond_dependency_resolves_each_branch_once() {
    let scope = Scope::new(ScopeOptions::default());
    let plus_one_calls = Arc::new(AtomicUsize::new(0));
    let plus_two_calls = Arc::new(AtomicUsize::new(0));

    let count = atom_value(10);

    let calls_a = plus_one_calls.clone();
    let plus_one = atom(count.clone(), move |_ctl, c: i32| {
        calls_a.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(c + 1) })
    });
    let calls_b = plus_two_calls.clone();
    let plus_two = atom(count.clone(), move |_ctl, c: i32| {
        calls_b.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(c + 2) })
    });
    let sum = atom((plus_one.clone(), plus_two.clone()), |_ctl, (a, b): (i32, i32)| {
        Box::pin(async move { Ok(a + b) })
    });

    assert_eq!(scope.resolve(&sum).await.unwrap(), 23);
    assert_eq!(plus_one_calls.load(Ordering::SeqCst), 1);
    assert_eq!(plus_two_calls.load(Ordering::SeqCst), 1);

    scope.invalidate(&count).await;
    assert_eq!(scope.resolve(&sum).await.unwrap(), 23);
    assert_eq!(plus_one_calls.load(Ordering::SeqCst), 2);
    assert_eq!(plus_two_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cached_resolution_does_not_rerun_the_factory() {
    let scope = Scope::new(ScopeOptions::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_for_factory = calls.clone();

    let a = atom_value(1);
    let b = atom_value(2);
    let sum = atom((a.clone(), b.clone()), move |_ctl, (x, y): (i32, i32)| {
        let calls = calls_for_factory.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(x + y)
        })
    });

    assert_eq!(scope.resolve(&sum).await.unwrap(), 3);
    assert_eq!(scope.resolve(&sum).await.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    scope.invalidate(&a).await;
    assert_eq!(scope.resolve(&sum).await.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
