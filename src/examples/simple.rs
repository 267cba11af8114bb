//! Simple example of using rotating-proxy-pool.

use reqwest_middleware::ClientBuilder;
use rotating_proxy_pool::{
    ClientFactory, HttpProbe, ListProvisioner, ProxyPoolConfig, ProxyPoolMiddleware, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Loading proxy list...");

    // free socks5 proxy urls, format like `Free-Proxy`
    let provisioner = ListProvisioner::from_sources(
        &[
            "https://cdn.jsdelivr.net/gh/dpangestuw/Free-Proxy@main/socks5_proxies.txt",
            "https://cdn.jsdelivr.net/gh/proxifly/free-proxy-list@main/proxies/protocols/socks5/data.txt",
        ],
        "socks5",
    )
    .await;

    let config = ProxyPoolConfig::builder()
        .target_pool_size(3)
        .health_check_url("https://httpbin.org/ip")
        .health_gate(RetryPolicy::new(2, Duration::from_secs(1)))
        .retry(RetryPolicy::new(5, Duration::from_millis(500)).with_backoff_multiplier(2.0))
        .wait_timeout(Duration::from_secs(60))
        // rate limit for each proxy, lower performance but avoid banned
        .max_requests_per_second(3.0)
        .build();

    let probe = HttpProbe::new(
        config.health_check_url.clone(),
        ClientFactory::from_config(&config).with_request_timeout(Duration::from_secs(5)),
    );

    let middleware =
        ProxyPoolMiddleware::start(config, Arc::new(provisioner), Arc::new(probe)).await?;
    let pool = Arc::clone(middleware.pool());
    let supervisor = pool.supervise(Duration::from_secs(30));

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(middleware)
        .build();

    println!("Sending request...");
    let response = client.get("https://httpbin.org/ip").send().await?;

    println!("Status: {}", response.status());
    println!("Response: {}", response.text().await?);

    pool.shutdown().await;
    supervisor.await?;

    Ok(())
}
