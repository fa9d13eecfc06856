use crate::*;

use txmule_core::encoding::{Identity, Z85};
use txmule_services::SendTarget;

// ══════════════════════════════════════════════════════════════════════════════
//  Transactions
// ══════════════════════════════════════════════════════════════════════════════

/// A three-segment testnet transaction is reassembled, submitted once, and
/// the sender hears back twice: mempool, then confirmed.
#[tokio::test(start_paused = true)]
async fn test_testnet_transaction_round_trip() -> Result<()> {
    let hub = LoopbackHub::new();
    let node = MockNode::new();
    let gateway = spawn_gateway(&hub, &Identity, Some(node.clone()), |g| g);
    let (sender, mut inbox) = attach_sender(&hub, SENDER_GID, &Identity);

    let raw_tx = hex_payload(310);
    let tx_hash = "9f".repeat(32);
    node.expect_hash(&tx_hash);

    let report = sender
        .send_payload(SendTarget::Broadcast, &raw_tx, &tx_hash, NetworkKind::Testnet)
        .await?;
    assert_eq!(report.segments, 3);

    let mempool = next_segment(&mut inbox, 30).await?;
    assert_eq!(mempool, Segment::confirmation(&tx_hash, 0));

    node.mine(&tx_hash, 1);
    let confirmed = next_segment(&mut inbox, 30).await?;
    assert_eq!(confirmed, Segment::confirmation(&tx_hash, 1));

    assert_eq!(node.submissions(), vec![(raw_tx, NetworkKind::Testnet)]);
    assert!(gateway.store.is_complete(&report.payload_id).await);
    assert!(!gateway.store.mark_dispatched(&report.payload_id).await);

    gateway.stop().await;
    Ok(())
}

/// Resending every segment of a completed payload does not resubmit it.
#[tokio::test(start_paused = true)]
async fn test_duplicate_resend_submits_once() -> Result<()> {
    let hub = LoopbackHub::new();
    let node = MockNode::new();
    let gateway = spawn_gateway(&hub, &Identity, Some(node.clone()), |g| g);
    let (sender, _inbox) = attach_sender(&hub, SENDER_GID, &Identity);

    let raw_tx = hex_payload(250);
    let tx_hash = "ab".repeat(32);
    node.expect_hash(&tx_hash);

    // Same message index twice: identical payload id and segments.
    let first = sender
        .with_start_index(42)
        .send_payload(SendTarget::Broadcast, &raw_tx, &tx_hash, NetworkKind::Mainnet)
        .await?;
    let (sender, _inbox2) = attach_sender(&hub, SENDER_GID, &Identity);
    let second = sender
        .with_start_index(42)
        .send_payload(SendTarget::Broadcast, &raw_tx, &tx_hash, NetworkKind::Mainnet)
        .await?;
    assert_eq!(first.payload_id, second.payload_id);

    assert!(wait_until(100, || async { !node.submissions().is_empty() }).await);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(node.submissions().len(), 1);
    assert_eq!(gateway.store.len().await, 1);
    gateway.stop().await;
    Ok(())
}

/// Two senders interleaving their segments are kept apart by payload id.
#[tokio::test(start_paused = true)]
async fn test_interleaved_senders() -> Result<()> {
    let hub = LoopbackHub::new();
    // No expected hash: each submission is recorded, then rejected.
    let node = MockNode::new();
    let gateway = spawn_gateway(&hub, &Identity, Some(node.clone()), |g| {
        g.with_retry(RetryPolicy {
            delay: Duration::from_millis(100),
            max_attempts: 1,
        })
    });
    let (a, _a_inbox) = attach_sender(&hub, 0xA, &Identity);
    let (b, _b_inbox) = attach_sender(&hub, 0xB, &Identity);

    let tx_a = hex_payload(400);
    let tx_b: String = hex_payload(420).chars().rev().collect();

    let hash_a = "aa".repeat(32);
    let hash_b = "bb".repeat(32);

    let (ra, rb) = tokio::join!(
        a.send_payload(SendTarget::Broadcast, &tx_a, &hash_a, NetworkKind::Mainnet),
        b.send_payload(SendTarget::Broadcast, &tx_b, &hash_b, NetworkKind::Mainnet),
    );
    assert_ne!(ra?.payload_id, rb?.payload_id);

    assert!(wait_until(100, || async { node.submissions().len() == 2 }).await);
    let mut raws: Vec<String> = node.submissions().into_iter().map(|(raw, _)| raw).collect();
    raws.sort();
    let mut expected = vec![tx_a, tx_b];
    expected.sort();
    assert_eq!(raws, expected);

    gateway.stop().await;
    Ok(())
}

/// Z85 on both ends: compact id and hash on the wire, hex to the node.
#[tokio::test(start_paused = true)]
async fn test_z85_transaction() -> Result<()> {
    let hub = LoopbackHub::new();
    let node = MockNode::new();
    let gateway = spawn_gateway(&hub, &Z85, Some(node.clone()), |g| g);
    let (sender, mut inbox) = attach_sender(&hub, SENDER_GID, &Z85);

    let raw_tx = hex_payload(400);
    let tx_hash = "c3".repeat(32);
    node.expect_hash(&tx_hash);

    let report = sender
        .send_payload(SendTarget::Broadcast, &raw_tx, &tx_hash, NetworkKind::Mainnet)
        .await?;
    assert_eq!(report.payload_id.len(), 20);

    assert_eq!(next_segment(&mut inbox, 30).await?, Segment::confirmation(&tx_hash, 0));
    assert_eq!(node.submissions(), vec![(raw_tx, NetworkKind::Mainnet)]);

    gateway.stop().await;
    Ok(())
}
