//! Gateway end to end: directory, backend and gateway on loopback

mod common;

use roster::common::{Error, NewRecord, METRICS};
use roster::gateway::{Dispatcher, GatewayClient};
use roster::{Directory, LocalDirectory};
use std::sync::Arc;
use std::time::Duration;

fn client(addr: std::net::SocketAddr) -> GatewayClient {
    GatewayClient::new(format!("http://{}", addr), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_records_through_gateway() {
    let directory = Arc::new(LocalDirectory::new());
    let monitor = common::spawn_monitor(directory.clone());
    let backend = common::spawn_backend(directory.clone(), None).await;
    common::wait_healthy(directory.as_ref(), "grpcServer", backend.addr.port()).await;
    let gateway = common::spawn_gateway(directory.clone()).await;
    // The gateway itself becomes discoverable through its HTTP check
    common::wait_healthy(directory.as_ref(), "httpServer", gateway.addr.port()).await;

    let c = client(gateway.addr);
    assert!(c.check_alive().await.unwrap());

    let alice = c.create("Alice", 20, "Software Engineering").await.unwrap();
    let bob = c.create("Bob", 30, "Computer Science").await.unwrap();

    let record = c.get(&alice).await.unwrap();
    assert_eq!(record.name, "Alice");
    assert_eq!(record.category, "Software Engineering");

    assert!(c.set_category(&alice, "Computer Science").await.unwrap());
    assert_eq!(c.get(&alice).await.unwrap().category, "Computer Science");

    let all = c.list().await.unwrap();
    assert_eq!(all.len(), 2);
    let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
    assert!(ids.contains(&alice.as_str()) && ids.contains(&bob.as_str()));

    assert!(c.delete(&alice).await.unwrap());
    assert!(matches!(c.get(&alice).await, Err(Error::NotFound(_))));
    assert!(matches!(c.delete(&alice).await, Err(Error::NotFound(_))));

    gateway.stop().await.unwrap();
    backend.stop().await.unwrap();
    let _ = monitor.send(true);
}

#[tokio::test]
async fn test_invalid_input_rejected_before_dispatch() {
    let directory = Arc::new(LocalDirectory::new());
    let monitor = common::spawn_monitor(directory.clone());
    let backend = common::spawn_backend(directory.clone(), None).await;
    common::wait_healthy(directory.as_ref(), "grpcServer", backend.addr.port()).await;
    let gateway = common::spawn_gateway(directory.clone()).await;
    let c = client(gateway.addr);

    let err = c.create("1", 5, "X").await.unwrap_err();
    assert_eq!(err.invalid_fields(), vec!["name", "age", "category"]);
    assert!(c.list().await.unwrap().is_empty());

    let id = c.create("Carol", 40, "Computer Science").await.unwrap();
    let err = c.set_category(&id, "Basket Weaving").await.unwrap_err();
    assert_eq!(err.invalid_fields(), vec!["category"]);
    assert_eq!(c.get(&id).await.unwrap().category, "Computer Science");

    gateway.stop().await.unwrap();
    backend.stop().await.unwrap();
    let _ = monitor.send(true);
}

#[tokio::test]
async fn test_no_backend_is_reported_distinctly() {
    let directory = Arc::new(LocalDirectory::new());
    let gateway = common::spawn_gateway(directory.clone()).await;
    let c = client(gateway.addr);

    // Gateway liveness does not depend on any backend
    assert!(c.check_alive().await.unwrap());
    let err = c.list().await.unwrap_err();
    assert!(matches!(err, Error::NoHealthyInstance(_)));

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn test_stale_cache_retried_against_fresh_instance() {
    let directory = Arc::new(LocalDirectory::new());
    let monitor = common::spawn_monitor(directory.clone());

    let first = common::spawn_backend(directory.clone(), None).await;
    common::wait_healthy(directory.as_ref(), "grpcServer", first.addr.port()).await;

    let config = roster::Config::default();
    let dispatcher = Dispatcher::new(directory.clone(), config.gateway, config.rules);
    dispatcher
        .register(NewRecord::new("Alice", 20, "Software Engineering"))
        .await
        .unwrap();
    let cached = dispatcher.cached_instance().unwrap();
    assert_eq!(cached.port, first.addr.port());

    // A second backend appears elsewhere, then the cached one goes away
    let second = common::spawn_backend(directory.clone(), None).await;
    common::wait_healthy(directory.as_ref(), "grpcServer", second.addr.port()).await;
    first.stop().await.unwrap();
    assert_eq!(dispatcher.cached_instance(), Some(cached));

    let retries_before = METRICS.dispatch_retries.get();
    let records = dispatcher.list_all().await.unwrap();
    // Fresh backend, fresh store
    assert!(records.is_empty());
    assert!(METRICS.dispatch_retries.get() > retries_before);
    assert_eq!(
        dispatcher.cached_instance().map(|i| i.port),
        Some(second.addr.port())
    );

    second.stop().await.unwrap();
    let _ = monitor.send(true);
}

#[tokio::test]
async fn test_dispatcher_waits_for_backend() {
    let directory = Arc::new(LocalDirectory::new());
    let monitor = common::spawn_monitor(directory.clone());
    let config = roster::Config::default();
    let dispatcher = Arc::new(Dispatcher::new(
        directory.clone() as Arc<dyn Directory>,
        config.gateway,
        config.rules,
    ));

    let waiter = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.wait_for_backend(Duration::from_secs(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let backend = common::spawn_backend(directory.clone(), None).await;

    let instance = waiter.await.unwrap().unwrap();
    assert_eq!(instance.port, backend.addr.port());
    assert!(dispatcher.backend_serving().await.unwrap());

    backend.stop().await.unwrap();
    let _ = monitor.send(true);
}
