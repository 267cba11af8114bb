//! Block-and-retry behaviour of the executor and sessions.

use rotating_proxy_pool::{
    EndpointId, ExecuteError, OperationError, PoolError, ProxyError, ProxyPool, ProxySession,
    RetryExecutor, RetryPolicy,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod common;
use common::{fast_config, healthy, MockProvisioner};

async fn ready_pool(target: usize) -> (Arc<ProxyPool>, Arc<MockProvisioner>) {
    let provisioner = Arc::new(MockProvisioner::new());
    let pool = ProxyPool::new(fast_config(target), provisioner.clone(), healthy());
    for result in pool.ensure(target).await.unwrap().wait().await {
        result.unwrap();
    }
    (pool, provisioner)
}

fn total_requests(pool: &ProxyPool) -> u64 {
    pool.snapshot().iter().map(|e| e.request_count()).sum()
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let (pool, provisioner) = ready_pool(2).await;
    let executor = pool.executor();

    let mut calls = 0;
    let mut used = Vec::new();
    let result = executor
        .execute(|endpoint| {
            calls += 1;
            used.push(endpoint.id().clone());
            async { Err::<(), OperationError<String>>(ProxyError::new("status 403").into()) }
        })
        .await;

    match result {
        Err(ExecuteError::ExhaustedRetries { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last.reason(), "status 403");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(calls, 3);
    assert_eq!(provisioner.deprovisions(), 3);

    // Every attempt ran on a different endpoint.
    let distinct: HashSet<&EndpointId> = used.iter().collect();
    assert_eq!(distinct.len(), 3);
}

#[tokio::test]
async fn test_application_error_is_not_retried() {
    let (pool, provisioner) = ready_pool(2).await;
    let executor = pool.executor();

    let mut calls = 0;
    let result = executor
        .execute(|_| {
            calls += 1;
            async { Err::<(), _>(OperationError::Application("parse failure".to_string())) }
        })
        .await;

    assert_eq!(result.unwrap_err().into_application().as_deref(), Some("parse failure"));
    assert_eq!(calls, 1);
    assert_eq!(provisioner.deprovisions(), 0);
    assert_eq!(pool.ready_count(), 2);
}

#[tokio::test]
async fn test_success_counts_request() {
    let (pool, _) = ready_pool(1).await;
    let executor = pool.executor();

    let value = executor
        .execute(|endpoint| async move { Ok::<_, OperationError<String>>(endpoint.id().clone()) })
        .await
        .unwrap();

    let members = pool.snapshot();
    assert_eq!(members[0].id(), &value);
    assert_eq!(members[0].request_count(), 1);
}

#[tokio::test]
async fn test_recovers_on_next_endpoint() {
    let (pool, provisioner) = ready_pool(2).await;
    let executor = pool.executor();

    let mut calls = 0;
    let value = executor
        .execute(|endpoint| {
            calls += 1;
            let first = calls == 1;
            async move {
                if first {
                    Err(OperationError::<String>::Proxy(ProxyError::new("captcha")))
                } else {
                    Ok(endpoint.id().clone())
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(calls, 2);
    assert_eq!(provisioner.deprovisions(), 1);
    assert!(!provisioner.deprovisioned().contains(&value));
    assert!(pool.wait_ready(2, Duration::from_secs(2)).await);
    assert_eq!(total_requests(&pool), 1);
}

#[tokio::test]
async fn test_backoff_between_attempts() {
    let (pool, _) = ready_pool(2).await;
    let policy = RetryPolicy::new(3, Duration::from_millis(40)).with_backoff_multiplier(2.0);
    let executor = RetryExecutor::new(Arc::clone(&pool), policy);

    let start = Instant::now();
    let result = executor
        .execute(|_| async { Err::<(), OperationError<String>>(ProxyError::new("429").into()) })
        .await;

    assert!(matches!(result, Err(ExecuteError::ExhaustedRetries { attempts: 3, .. })));
    // 40ms after the first failure, 80ms after the second, none after the last.
    assert!(start.elapsed() >= Duration::from_millis(120));
}

#[tokio::test]
async fn test_empty_pool_surfaces_pool_error() {
    let provisioner = Arc::new(MockProvisioner::new());
    let config = {
        let mut config = fast_config(1);
        config.wait_timeout = Duration::from_millis(50);
        config
    };
    let pool = ProxyPool::new(config, provisioner, healthy());

    let mut calls = 0;
    let result = pool
        .executor()
        .execute(|_| {
            calls += 1;
            async { Ok::<(), OperationError<String>>(()) }
        })
        .await;

    assert!(matches!(
        result,
        Err(ExecuteError::Pool(PoolError::NoProxyAvailable))
    ));
    assert_eq!(calls, 0);
}

#[tokio::test]
async fn test_concurrent_executors_count_every_success() {
    let (pool, _) = ready_pool(3).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let executor = pool.executor();
        handles.push(tokio::spawn(async move {
            for _ in 0..25 {
                executor
                    .execute(|_| async { Ok::<(), OperationError<String>>(()) })
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(total_requests(&pool), 100);
    // Rotation spreads the load evenly.
    for endpoint in pool.snapshot() {
        assert!((33..=34).contains(&endpoint.request_count()));
    }
}

#[tokio::test]
async fn test_execute_bound_hands_out_routed_client() {
    let (pool, _) = ready_pool(1).await;

    let id = pool
        .executor()
        .execute_bound(|bound| async move {
            Ok::<_, OperationError<String>>(bound.endpoint.id().clone())
        })
        .await
        .unwrap();

    assert_eq!(pool.snapshot()[0].id(), &id);
}

#[tokio::test]
async fn test_session_replace_moves_to_fresh_endpoint() {
    let (pool, provisioner) = ready_pool(1).await;

    let mut session = ProxySession::new(Arc::clone(&pool)).await.unwrap();
    let first = session.endpoint().id().clone();

    session.replace().await.unwrap();
    let second = session.endpoint().id().clone();

    assert_ne!(first, second);
    assert_eq!(provisioner.deprovisioned(), vec![first]);
    assert_eq!(pool.snapshot()[0].id(), &second);
}
