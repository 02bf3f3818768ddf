//! First-use initialization through `PinnedClient`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use certpin_core::{BarrierState, Hook};

use crate::support::{client_over, Hop, ScriptedTransport, FP_A};

#[tokio::test]
async fn test_hooks_finish_before_first_request() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_A, "ok")]);
    let client = client_over(transport.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    let sync_log = Arc::clone(&log);
    client.register_hook(Hook::sync(move || sync_log.lock().unwrap().push("sync")));

    // The deferred hook registers the pin, so the request can only pass if
    // it ran to completion first.
    let deferred_log = Arc::clone(&log);
    let registry = Arc::clone(client.registry());
    client.register_hook(Hook::deferred(move |done| {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            registry.register("a.example.com", FP_A).unwrap();
            deferred_log.lock().unwrap().push("deferred");
            done.resume();
        });
    }));

    client.get("https://a.example.com/").await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["sync", "deferred"]);
    assert_eq!(client.barrier().state(), BarrierState::Closed);
}

#[tokio::test]
async fn test_hook_after_close_runs_immediately() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_A, "ok")]);
    let client = client_over(transport);
    client.registry().register("a.example.com", FP_A).unwrap();
    client.register_hook(Hook::sync(|| {}));
    client.get("https://a.example.com/").await.unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    client.register_hook(Hook::sync(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(client.barrier().pending_hooks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_requests_drain_once() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_A, "ok")]);
    let client = client_over(transport.clone());
    client.registry().register("a.example.com", FP_A).unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    client.register_hook(Hook::future(move || async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.get("https://a.example.com/").await.map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls(), 8);
}

#[tokio::test]
async fn test_hook_may_issue_pinned_requests() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_A, "ok")]);
    let client = client_over(transport.clone());
    client.registry().register("a.example.com", FP_A).unwrap();

    let inner = client.clone();
    client.register_hook(Hook::future(move || async move {
        inner.get("https://a.example.com/warmup").await.unwrap();
    }));

    client.get("https://a.example.com/").await.unwrap();

    assert_eq!(
        transport.seen_urls(),
        vec![
            "https://a.example.com/warmup".to_string(),
            "https://a.example.com/".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_no_hooks_leaves_barrier_open() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_A, "ok")]);
    let client = client_over(transport);
    client.registry().register("a.example.com", FP_A).unwrap();

    client.get("https://a.example.com/").await.unwrap();
    assert_eq!(client.barrier().state(), BarrierState::Idle);

    // Hooks registered later still run before the next request.
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    client.register_hook(Hook::sync(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    client.get("https://a.example.com/").await.unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(client.barrier().state(), BarrierState::Closed);
}
