use crate::*;

use bytes::Bytes;
use txmule_core::encoding::Identity;
use txmule_services::{SendTarget, Transport};

// ══════════════════════════════════════════════════════════════════════════════
//  Malformed input, loss, and eviction
// ══════════════════════════════════════════════════════════════════════════════

/// Garbage between valid segments is dropped; the payload still completes.
#[tokio::test(start_paused = true)]
async fn test_malformed_messages_ignored() -> Result<()> {
    let hub = LoopbackHub::new();
    let sink = Arc::new(MemorySink::default());
    let gateway = spawn_gateway(&hub, &Identity, None, {
        let sink = sink.clone();
        move |g| g.with_sink(sink)
    });
    let (noisy, _noisy_inbox) = hub.attach(0x0BAD);

    let segments = txmule_core::Chunker::new(&Identity).segment(
        SENDER_GID,
        1,
        &hex_payload(250),
        "",
        NetworkKind::Data,
    )?;
    assert_eq!(segments.len(), 2);

    let junk: [&[u8]; 4] = [b"not json", b"[1,2]", br#"{"i":"x","t":"y","s":3}"#, br#"{"t":"no id"}"#];
    noisy.send(SendTarget::Broadcast, Bytes::from(segments[1].to_bytes())).await?;
    for j in junk {
        noisy.send(SendTarget::Broadcast, Bytes::from_static(j)).await?;
    }
    noisy.send(SendTarget::Broadcast, Bytes::from(segments[0].to_bytes())).await?;

    assert!(wait_until(100, || async { !sink.delivered().is_empty() }).await);
    assert_eq!(sink.delivered()[0].1, hex_payload(250));
    assert!(!gateway.task.is_finished());

    gateway.stop().await;
    Ok(())
}

/// A payload that loses a segment is evicted once it goes stale.
#[tokio::test(start_paused = true)]
async fn test_partial_payload_evicted() -> Result<()> {
    let hub = LoopbackHub::new();
    let gateway = spawn_gateway(&hub, &Identity, None, |g| {
        g.with_eviction(Duration::from_secs(30), Duration::from_secs(5))
    });
    let (lossy, _inbox) = hub.attach(SENDER_GID);

    let segments = txmule_core::Chunker::new(&Identity).segment(
        SENDER_GID,
        7,
        &hex_payload(500),
        &"ee".repeat(32),
        NetworkKind::Mainnet,
    )?;
    assert_eq!(segments.len(), 4);
    let payload_id = segments[0].payload_id.clone();

    for seg in segments.iter().filter(|s| s.sequence_num != 2) {
        lossy.send(SendTarget::Broadcast, Bytes::from(seg.to_bytes())).await?;
    }

    let store = gateway.store.clone();
    assert!(wait_until(20, || async { store.get(&payload_id).await.is_some() }).await);
    assert!(!store.is_complete(&payload_id).await);
    assert!(store.get_by_hash(&"ee".repeat(32)).await.is_some());

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(store.get(&payload_id).await.is_none());
    assert!(store.get_by_hash(&"ee".repeat(32)).await.is_none());

    gateway.stop().await;
    Ok(())
}

/// Node failures are retried, then given up on without stalling the gateway.
#[tokio::test(start_paused = true)]
async fn test_node_rejection_does_not_block() -> Result<()> {
    let hub = LoopbackHub::new();
    // No expected hash: every submission fails.
    let node = MockNode::new();
    let gateway = spawn_gateway(&hub, &Identity, Some(node.clone()), |g| g);
    let (sender, _inbox) = attach_sender(&hub, SENDER_GID, &Identity);

    let first = sender
        .send_payload(SendTarget::Broadcast, &hex_payload(120), &"01".repeat(32), NetworkKind::Mainnet)
        .await?;

    assert!(wait_until(200, || async { node.submissions().len() >= 3 }).await);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(node.submissions().len(), 3);
    assert!(gateway.store.is_complete(&first.payload_id).await);

    node.expect_hash(&"02".repeat(32));
    sender
        .send_payload(SendTarget::Broadcast, &hex_payload(90), &"02".repeat(32), NetworkKind::Mainnet)
        .await?;
    assert!(wait_until(100, || async { node.submissions().len() == 4 }).await);

    gateway.stop().await;
    Ok(())
}
