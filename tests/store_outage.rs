mod common;

use common::test_helpers::{addr, docs, fixture};
use docshield::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn requests_are_served_while_the_store_is_down() {
    let f = fixture();
    f.store.set_down(true);

    for _ in 0..40 {
        let response = f.gateway.handle(docs("react")).await.expect("fails open");
        assert_eq!(response.cache, CacheStatus::Miss);
        assert_eq!(response.rate.remaining, response.rate.limit);
    }
    assert_eq!(f.provider.calls(), 40);

    let degraded: Vec<_> = f
        .sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            GatewayEvent::StoreDegraded { component } => Some(component),
            _ => None,
        })
        .collect();
    assert!(degraded.contains(&"abuse_detector"));
    assert!(degraded.contains(&"rate_limiter"));
    assert!(degraded.contains(&"edge_cache"));
}

#[tokio::test]
async fn clear_cache_reports_store_errors() {
    let f = fixture();
    f.store.set_down(true);
    let err = f.gateway.clear_cache(Some("premium_admin"), addr(7)).await.unwrap_err();
    assert!(matches!(err, GatewayError::InternalStore { .. }));
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn recovery_resumes_caching() {
    let f = fixture();
    f.store.set_down(true);
    f.gateway.handle(docs("react")).await.unwrap();

    f.store.set_down(false);
    f.clock.advance(Duration::from_secs(1));
    assert_eq!(f.gateway.handle(docs("react")).await.unwrap().cache, CacheStatus::Miss);
    f.clock.advance(Duration::from_secs(1));
    assert_eq!(f.gateway.handle(docs("react")).await.unwrap().cache, CacheStatus::Hit);
}
