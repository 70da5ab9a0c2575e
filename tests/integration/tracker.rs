use crate::*;
use serde_json::json;

fn register(peer_id: &str, port: u16, username: &str) -> Value {
    json!({
        "method": "register",
        "peer_id": peer_id,
        "ip": "127.0.0.1",
        "port": port,
        "username": username,
    })
}

#[tokio::test]
async fn test_register_and_list_peers() -> Result<()> {
    let tracker = start_tracker().await?;

    let resp = tracker_call(tracker.addr, register("a1", 9001, "Alice")).await?;
    assert_eq!(resp["status"], "success");
    assert_eq!(resp["message"], "Peer registered successfully");

    let resp = tracker_call(tracker.addr, json!({ "method": "get_peers" })).await?;
    assert_eq!(resp["count"], 1);
    assert!(resp.as_object().unwrap().contains_key("channel"));
    assert!(resp["channel"].is_null());
    assert_eq!(resp["peers"]["a1"]["username"], "Alice");
    assert_eq!(resp["peers"]["a1"]["port"], 9001);
    assert!(resp["peers"]["a1"]["registered_at"].as_u64().unwrap() > 0);
    Ok(())
}

#[tokio::test]
async fn test_reregistration_overwrites_record() -> Result<()> {
    let tracker = start_tracker().await?;
    tracker_call(tracker.addr, register("a1", 9001, "Alice")).await?;
    tracker_call(tracker.addr, register("a1", 9002, "Alicia")).await?;

    let resp = tracker_call(tracker.addr, json!({ "method": "get_peers" })).await?;
    assert_eq!(resp["count"], 1);
    assert_eq!(resp["peers"]["a1"]["port"], 9002);
    assert_eq!(resp["peers"]["a1"]["username"], "Alicia");
    Ok(())
}

#[tokio::test]
async fn test_join_is_idempotent_and_empty_channels_vanish() -> Result<()> {
    let tracker = start_tracker().await?;
    tracker_call(tracker.addr, register("a1", 9001, "Alice")).await?;

    let join = json!({ "method": "join_channel", "peer_id": "a1", "channel": "general" });
    for _ in 0..2 {
        let resp = tracker_call(tracker.addr, join.clone()).await?;
        assert_eq!(resp["message"], "Joined channel: general");
    }
    assert_eq!(
        tracker.state.lock().await.members("general").map(|m| m.len()),
        Some(1)
    );

    let leave = json!({ "method": "leave_channel", "peer_id": "a1", "channel": "general" });
    let resp = tracker_call(tracker.addr, leave).await?;
    assert_eq!(resp["message"], "Left channel: general");
    assert_eq!(tracker.state.lock().await.channel_count(), 0);

    let resp = tracker_call(tracker.addr, json!({ "method": "get_channels", "peer_id": "a1" })).await?;
    assert_eq!(resp["channels"], json!([]));
    Ok(())
}

#[tokio::test]
async fn test_logout_removes_every_membership() -> Result<()> {
    let tracker = start_tracker().await?;
    tracker_call(tracker.addr, register("a1", 9001, "Alice")).await?;
    tracker_call(tracker.addr, register("b1", 9002, "Bob")).await?;
    for (peer, channel) in [("a1", "general"), ("a1", "random"), ("b1", "general")] {
        tracker_call(
            tracker.addr,
            json!({ "method": "join_channel", "peer_id": peer, "channel": channel }),
        )
        .await?;
    }

    let resp = tracker_call(tracker.addr, json!({ "method": "logout", "peer_id": "a1" })).await?;
    assert_eq!(resp["message"], "Logged out successfully");

    let state = tracker.state.lock().await;
    assert!(state.record("a1").is_none());
    assert!(state.members("random").is_none());
    assert_eq!(state.members("general").map(|m| m.len()), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_joins_are_all_recorded() -> Result<()> {
    let tracker = start_tracker().await?;
    let mut tasks = Vec::new();
    for i in 0..50 {
        let addr = tracker.addr;
        tasks.push(tokio::spawn(async move {
            let peer_id = format!("p{i}");
            tracker_call(addr, register(&peer_id, 10_000 + i, "Anon")).await?;
            tracker_call(
                addr,
                json!({ "method": "join_channel", "peer_id": peer_id, "channel": "busy" }),
            )
            .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await??["status"], "success");
    }

    let resp = tracker_call(tracker.addr, json!({ "method": "get_peers", "channel": "busy" })).await?;
    assert_eq!(resp["count"], 50);
    Ok(())
}

#[tokio::test]
async fn test_unterminated_request_is_served() -> Result<()> {
    let tracker = start_tracker().await?;
    let resp = raw_exchange(tracker.addr, br#"{"method":"get_peers"}"#).await?;
    assert_eq!(resp["status"], "success");
    assert_eq!(resp["count"], 0);
    Ok(())
}

#[tokio::test]
async fn test_bad_requests_get_error_documents() -> Result<()> {
    let tracker = start_tracker().await?;

    let resp = tracker_call(tracker.addr, json!({ "method": "teleport" })).await?;
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["message"], "Unknown method: teleport");

    let resp = tracker_call(tracker.addr, json!({ "peer_id": "a1" })).await?;
    assert_eq!(resp["message"], "Missing required field: method");

    let resp = tracker_call(tracker.addr, json!({ "method": "join_channel", "peer_id": "a1" })).await?;
    assert_eq!(resp["status"], "error");
    assert!(resp["message"].as_str().unwrap().starts_with("Missing required"));

    let resp = raw_exchange(tracker.addr, b"{{{\n").await?;
    assert_eq!(resp["message"], "Invalid JSON");

    // The tracker keeps serving after rejected requests.
    let resp = tracker_call(tracker.addr, json!({ "method": "get_peers" })).await?;
    assert_eq!(resp["status"], "success");
    Ok(())
}
