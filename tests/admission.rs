//! Admission rate limiting through the full HTTP stack.

use serde_json::Value;

mod common;

#[tokio::test]
async fn test_rate_limit_per_identity() {
    let downstream = common::start_programmable_backend(|_, _| async { (200, "[]".into()) }).await;
    let mut config = common::test_config(&downstream);
    config.rate_limit.enabled = true;
    config.rate_limit.limit = 2;
    config.rate_limit.window_secs = 3600;
    config.cache.enabled = false;
    let (addr, shutdown) = common::spawn_gateway(config).await;
    let client = common::client();

    for _ in 0..2 {
        let res = client
            .get(format!("http://{}/v1/devices", addr))
            .header("x-api-key", "tenant-a")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
    }

    let res = client
        .get(format!("http://{}/v1/devices", addr))
        .header("x-api-key", "tenant-a")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "rate_limited");

    // Same key presented as a bearer token is the same caller.
    let res = client
        .get(format!("http://{}/v1/devices", addr))
        .header("authorization", "Bearer tenant-a")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);

    // Another caller has its own window.
    let res = client
        .get(format!("http://{}/v1/devices", addr))
        .header("x-api-key", "tenant-b")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    // Rejected requests never reach downstream.
    assert_eq!(downstream.calls(), 3);

    shutdown.trigger();
}

#[tokio::test]
async fn test_healthz_bypasses_admission() {
    let downstream = common::start_programmable_backend(|_, _| async { (200, "[]".into()) }).await;
    let mut config = common::test_config(&downstream);
    config.rate_limit.enabled = true;
    config.rate_limit.limit = 1;
    config.rate_limit.window_secs = 3600;
    let (addr, shutdown) = common::spawn_gateway(config).await;
    let client = common::client();

    for _ in 0..5 {
        let res = client.get(format!("http://{}/healthz", addr)).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.headers().contains_key("x-request-id"));
    }

    shutdown.trigger();
}

#[tokio::test]
async fn test_sdk_reports_rate_limit() {
    let downstream = common::start_programmable_backend(|_, _| async { (200, r#"{"ok":true}"#.into()) }).await;
    let mut config = common::test_config(&downstream);
    config.rate_limit.enabled = true;
    config.rate_limit.limit = 1;
    config.rate_limit.window_secs = 3600;
    let (addr, shutdown) = common::spawn_gateway(config).await;

    let sdk = gateway_sdk::GatewayClient::new(&format!("http://{}", addr)).with_api_key("sdk-key");
    assert!(matches!(sdk.devices().await.unwrap(), gateway_sdk::GatewayResponse::Ok(_)));

    match sdk.devices().await.unwrap() {
        gateway_sdk::GatewayResponse::Failed { status, error } => {
            assert_eq!(status, 429);
            assert_eq!(error.error, "rate_limited");
        }
        other => panic!("expected rate limit, got {:?}", other),
    }

    shutdown.trigger();
}
