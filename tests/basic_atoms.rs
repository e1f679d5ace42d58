//! End-to-end scenarios over a bare `Scope` and plain atoms: singleton
//! sharing, cleanup ordering, and GC with `keep_alive` cascades.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use effectate::atom::{atom, atom_with_config, AtomConfig};
use effectate::scope::{AtomEvent, AtomLifecycle, Scope, ScopeOptions};

#[tokio::test]
async fn singleton_sharing_runs_factory_once_for_concurrent_resolves() {
    let scope = Scope::new(ScopeOptions::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_for_factory = calls.clone();
    let a = atom((), move |_ctl, ()| {
        let calls = calls_for_factory.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(42)
        })
    });

    let (r1, r2) = tokio::join!(scope.resolve(&a), scope.resolve(&a));
    assert_eq!(r1.unwrap(), 42);
    assert_eq!(r2.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalidate_runs_cleanups_lifo_and_reruns_factory() {
    let scope = Scope::new(ScopeOptions::default());
    let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    let order_for_factory = order.clone();
    let calls_for_factory = calls.clone();
    let a = atom((), move |ctl, ()| {
        let order_a = order_for_factory.clone();
        let order_b = order_for_factory.clone();
        let calls = calls_for_factory.clone();
        Box::pin(async move {
            ctl.cleanup(move || {
                let order_a = order_a.clone();
                async move { order_a.lock().unwrap().push("A") }
            });
            ctl.cleanup(move || {
                let order_b = order_b.clone();
                async move { order_b.lock().unwrap().push("B") }
            });
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
    });

    scope.resolve(&a).await.unwrap();
    scope.invalidate(&a).await;
    assert_eq!(*order.lock().unwrap(), vec!["B", "A"]);

    scope.resolve(&a).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn gc_releases_unsubscribed_atoms_after_grace_but_keeps_keep_alive() {
    let scope = Scope::new(ScopeOptions { gc_grace: Duration::from_millis(30), ..Default::default() });

    let config = atom_with_config((), |_ctl, ()| Box::pin(async { Ok("cfg".to_string()) }), AtomConfig::new().keep_alive());
    let db = atom(config.clone(), |_ctl, c: String| Box::pin(async move { Ok(format!("db:{c}")) }));
    let svc = atom(db.clone(), |_ctl, d: String| Box::pin(async move { Ok(format!("svc:{d}")) }));

    let controller = scope.controller(&svc);
    let unsub = controller.on(AtomEvent::Resolved, || {});
    scope.resolve(&svc).await.unwrap();
    unsub();

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(scope.controller(&svc).state(), AtomLifecycle::Idle);
    assert_eq!(scope.controller(&db).state(), AtomLifecycle::Idle);
    assert_eq!(scope.controller(&config).state(), AtomLifecycle::Resolved);
}
