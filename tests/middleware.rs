//! End-to-end requests through local stand-in proxies.

use reqwest_middleware::ClientBuilder;
use rotating_proxy_pool::{
    ClientFactory, Endpoint, EndpointId, HealthProbe, HttpProbe, ListProvisioner, ProxyPool,
    ProxyPoolMiddleware,
};
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{fake_proxy, fast_config, healthy};

#[tokio::test]
async fn test_blocked_status_rotates_to_next_proxy() {
    let blocked = fake_proxy(429, "slow down").await;
    let working = fake_proxy(200, "ok").await;

    let provisioner = Arc::new(ListProvisioner::new(vec![
        format!("http://{}", blocked),
        format!("http://{}", working),
    ]));
    let middleware = ProxyPoolMiddleware::start(fast_config(1), provisioner.clone(), healthy())
        .await
        .unwrap();
    let pool = Arc::clone(middleware.pool());

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(middleware)
        .build();
    let response = client.get("http://target.test/ip").send().await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
    assert!(provisioner.is_retired(&EndpointId::from_address(&blocked.to_string())));
    assert_eq!(pool.snapshot()[0].request_count(), 1);
    assert_eq!(provisioner.remaining(), 0);
}

#[tokio::test]
async fn test_gives_up_when_every_proxy_is_blocked() {
    let mut addresses = Vec::new();
    for _ in 0..4 {
        addresses.push(format!("http://{}", fake_proxy(403, "denied").await));
    }

    let provisioner = Arc::new(ListProvisioner::new(addresses));
    let middleware = ProxyPoolMiddleware::start(fast_config(1), provisioner.clone(), healthy())
        .await
        .unwrap();
    let pool = Arc::clone(middleware.pool());

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(middleware)
        .build();
    let err = client
        .get("http://target.test/ip")
        .send()
        .await
        .unwrap_err();

    assert!(matches!(err, reqwest_middleware::Error::Middleware(_)));
    // Three attempts retire three proxies; the fourth is the replacement.
    assert!(pool.wait_ready(1, Duration::from_secs(2)).await);
    assert_eq!(provisioner.remaining(), 0);
    assert_eq!(pool.snapshot()[0].request_count(), 0);
}

#[tokio::test]
async fn test_http_probe_through_proxy() {
    let clients = ClientFactory::from_config(&fast_config(1));
    let probe = HttpProbe::new("http://probe.test/ip", clients);

    let good = fake_proxy(200, "203.0.113.7").await;
    let empty = fake_proxy(200, "").await;
    let failing = fake_proxy(502, "bad gateway").await;

    assert!(probe.probe(&Endpoint::new(format!("http://{}", good))).await);
    assert!(!probe.probe(&Endpoint::new(format!("http://{}", empty))).await);
    assert!(!probe.probe(&Endpoint::new(format!("http://{}", failing))).await);
}

#[tokio::test]
async fn test_pool_with_http_probe_admits_only_working_proxies() {
    let broken = fake_proxy(502, "bad gateway").await;
    let working = fake_proxy(200, "203.0.113.7").await;

    let config = fast_config(1);
    let probe = HttpProbe::new(
        "http://probe.test/ip",
        ClientFactory::from_config(&config),
    );
    let provisioner = Arc::new(ListProvisioner::new(vec![
        format!("http://{}", broken),
        format!("http://{}", working),
    ]));
    let pool = ProxyPool::new(config, provisioner.clone(), Arc::new(probe));

    let first = pool.ensure(1).await.unwrap().wait().await;
    assert!(first[0].is_err());
    let second = pool.ensure(1).await.unwrap().wait().await;
    assert_eq!(
        second[0].as_ref().unwrap(),
        &EndpointId::from_address(&working.to_string())
    );
    assert!(provisioner.is_retired(&EndpointId::from_address(&broken.to_string())));
}
