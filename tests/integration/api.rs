use crate::*;
use parley_api::{router, ApiState};
use parley_tracker::local_client;
use serde_json::json;

/// Serve the bridge on an ephemeral port in front of `tracker`.
async fn start_bridge(tracker: SocketAddr) -> Result<SocketAddr> {
    let client = local_client(tracker, Duration::from_secs(2));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(ApiState::new(client))).await;
    });
    Ok(addr)
}

/// POST `body` verbatim and parse the JSON reply.
async fn post(bridge: SocketAddr, path: &str, body: &str) -> Result<Value> {
    let url = format!("http://{bridge}{path}");
    let resp = reqwest::Client::new()
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .send()
        .await
        .with_context(|| format!("failed to reach bridge at {url}"))?;
    anyhow::ensure!(resp.status().is_success(), "unexpected status: {}", resp.status());
    resp.json::<Value>().await.context("failed to parse response")
}

async fn get(bridge: SocketAddr, path: &str) -> Result<Value> {
    let url = format!("http://{bridge}{path}");
    reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach bridge at {url}"))?
        .json::<Value>()
        .await
        .context("failed to parse response")
}

#[tokio::test]
async fn test_bridge_relays_tracker_replies() -> Result<()> {
    let tracker = start_tracker().await?;
    let bridge = start_bridge(tracker.addr).await?;

    let body = json!({ "peer_id": "a1", "ip": "127.0.0.1", "port": 9001, "username": "Alice" });
    let resp = post(bridge, "/register-peer", &body.to_string()).await?;
    assert_eq!(resp["message"], "Peer registered successfully");

    let body = json!({ "peer_id": "a1", "channel": "general" });
    let resp = post(bridge, "/join-channel", &body.to_string()).await?;
    assert_eq!(resp["message"], "Joined channel: general");

    let resp = post(bridge, "/get-peers", r#"{"channel":"general"}"#).await?;
    assert_eq!(resp["count"], 1);
    assert_eq!(resp["peers"]["a1"]["username"], "Alice");

    let resp = post(bridge, "/get-channels", r#"{"peer_id":"a1"}"#).await?;
    assert_eq!(resp["channels"], json!(["general"]));

    let resp = post(bridge, "/leave-channel", &body.to_string()).await?;
    assert_eq!(resp["message"], "Left channel: general");

    let resp = post(bridge, "/logout", r#"{"peer_id":"a1"}"#).await?;
    assert_eq!(resp["message"], "Logged out successfully");
    assert_eq!(tracker.state.lock().await.peer_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_bridge_passes_tracker_errors_through() -> Result<()> {
    let tracker = start_tracker().await?;
    let bridge = start_bridge(tracker.addr).await?;

    let resp = post(bridge, "/join-channel", r#"{"peer_id":"a1"}"#).await?;
    assert_eq!(resp["status"], "error");
    assert!(resp["message"].as_str().unwrap().starts_with("Missing required"));
    Ok(())
}

#[tokio::test]
async fn test_login_and_health() -> Result<()> {
    let tracker = start_tracker().await?;
    let bridge = start_bridge(tracker.addr).await?;

    let resp = post(bridge, "/login", r#"{"username":"alice","password":"pw"}"#).await?;
    assert_eq!(resp["token"], "token_alice");

    let resp = get(bridge, "/health").await?;
    assert_eq!(resp["status"], "success");
    assert_eq!(resp["tracker"], format!("127.0.0.1:{}", tracker.addr.port()));
    Ok(())
}
