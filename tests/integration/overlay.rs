use crate::*;
use parley_peer::OverlayError;

const SETTLE: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_two_peers_chat_in_a_channel() -> Result<()> {
    let tracker = start_tracker().await?;
    let (alice, _alice_rx) = start_peer(tracker.addr, "a1", "Alice").await?;
    let (bob, mut bob_rx) = start_peer(tracker.addr, "b1", "Bob").await?;

    assert_eq!(bob.join_channel("general").await?, 0);
    assert_eq!(alice.join_channel("general").await?, 1);

    let resp = tracker_call(tracker.addr, serde_json::json!({ "method": "get_peers", "channel": "general" })).await?;
    assert_eq!(resp["count"], 2);
    assert_eq!(resp["peers"]["b1"]["username"], "Bob");

    assert!(wait_until(SETTLE, || bob.is_connected("a1")).await);
    assert_eq!(bob.connected_peers()[0].username, "Alice");
    assert_eq!(alice.connected_peers()[0].username, "Bob");

    assert_eq!(alice.send_message("general", "hi").await?, 1);
    let chat = next_chat(&mut bob_rx, SETTLE).await.context("bob got nothing")?;
    assert_eq!(chat.display_line(), "[Alice @general]> hi");
    assert_eq!(chat.peer_id, "a1");

    alice.stop().await;
    bob.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_chat_for_other_channel_is_not_shown() -> Result<()> {
    let tracker = start_tracker().await?;
    let (alice, _alice_rx) = start_peer(tracker.addr, "a1", "Alice").await?;
    let (bob, mut bob_rx) = start_peer(tracker.addr, "b1", "Bob").await?;

    alice.join_channel("general").await?;
    bob.join_channel("general").await?;
    bob.join_channel("random").await?;
    assert_eq!(bob.current_channel().await.as_deref(), Some("random"));
    assert!(wait_until(SETTLE, || alice.is_connected("b1")).await);

    alice.send_message("general", "not for random").await?;
    assert!(next_chat(&mut bob_rx, Duration::from_millis(300)).await.is_none());

    assert!(bob.switch_channel("general").await);
    alice.send_message("general", "now visible").await?;
    let chat = next_chat(&mut bob_rx, SETTLE).await.context("bob got nothing")?;
    assert_eq!(chat.content, "now visible");

    alice.stop().await;
    bob.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_dead_peer_is_dropped_and_others_still_hear() -> Result<()> {
    let tracker = start_tracker().await?;
    let (alice, _alice_rx) = start_peer(tracker.addr, "a1", "Alice").await?;
    let (bob, _bob_rx) = start_peer(tracker.addr, "b1", "Bob").await?;
    let (carol, mut carol_rx) = start_peer(tracker.addr, "c1", "Carol").await?;

    alice.join_channel("general").await?;
    bob.join_channel("general").await?;
    carol.join_channel("general").await?;
    assert!(wait_until(SETTLE, || alice.connected_peers().len() == 2).await);

    bob.stop().await;
    assert!(wait_until(SETTLE, || !alice.is_connected("b1")).await);
    assert!(tracker.state.lock().await.record("b1").is_none());

    assert_eq!(alice.send_message("general", "still here").await?, 1);
    let chat = next_chat(&mut carol_rx, SETTLE).await.context("carol got nothing")?;
    assert_eq!(chat.content, "still here");

    alice.stop().await;
    carol.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_simultaneous_dial_settles_on_one_link() -> Result<()> {
    let tracker = start_tracker().await?;
    let (alice, _alice_rx) = start_peer(tracker.addr, "a1", "Alice").await?;
    let (bob, mut bob_rx) = start_peer(tracker.addr, "b1", "Bob").await?;

    let alice_addr = format!("127.0.0.1:{}", alice.local_addr().port());
    let bob_addr = format!("127.0.0.1:{}", bob.local_addr().port());
    let (_, _) = tokio::join!(
        alice.connect_to_peer("b1", &bob_addr, "Bob"),
        bob.connect_to_peer("a1", &alice_addr, "Alice"),
    );

    assert!(wait_until(SETTLE, || alice.is_connected("b1") && bob.is_connected("a1")).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(alice.connected_peers().len(), 1);
    assert_eq!(bob.connected_peers().len(), 1);

    bob.join_channel("general").await?;
    assert_eq!(alice.send_message("general", "once").await?, 1);
    let chat = next_chat(&mut bob_rx, SETTLE).await.context("bob got nothing")?;
    assert_eq!(chat.content, "once");

    alice.stop().await;
    bob.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_leave_falls_back_to_previous_channel() -> Result<()> {
    let tracker = start_tracker().await?;
    let (alice, _rx) = start_peer(tracker.addr, "a1", "Alice").await?;

    alice.join_channel("general").await?;
    alice.join_channel("random").await?;
    assert_eq!(alice.tracker_channels().await?, vec!["general", "random"]);

    alice.leave_channel("random").await?;
    assert_eq!(alice.current_channel().await.as_deref(), Some("general"));
    assert_eq!(alice.joined_channels().await, vec!["general"]);
    assert_eq!(alice.tracker_channels().await?, vec!["general"]);

    alice.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_join_before_register_is_refused() -> Result<()> {
    let tracker = start_tracker().await?;
    let (sink, _rx) = ChannelSink::new();
    let overlay = PeerOverlay::start(peer_settings(tracker.addr, "a1", "Alice"), Arc::new(sink)).await?;

    let err = overlay.join_channel("general").await.unwrap_err();
    assert!(matches!(err, OverlayError::NotRegistered));
    assert_eq!(tracker.state.lock().await.channel_count(), 0);

    overlay.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_unreachable_tracker_reports_connect_failure() -> Result<()> {
    let tracker = start_tracker().await?;
    let addr = tracker.addr;
    drop(tracker);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (sink, _rx) = ChannelSink::new();
    let overlay = PeerOverlay::start(peer_settings(addr, "a1", "Alice"), Arc::new(sink)).await?;
    let err = overlay.register().await.unwrap_err();
    assert!(matches!(err, OverlayError::Tracker(_)));
    assert!(err.to_string().starts_with("Failed to connect to tracker"));

    overlay.stop().await;
    Ok(())
}
