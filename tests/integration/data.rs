use crate::*;

use txmule_core::encoding::{Identity, Z85};
use txmule_services::{FileSink, SendTarget};

// ══════════════════════════════════════════════════════════════════════════════
//  Message data
// ══════════════════════════════════════════════════════════════════════════════

/// A data payload is written to the dump directory, never submitted.
#[tokio::test]
async fn test_data_payload_dumped_to_file() -> Result<()> {
    let dir = std::env::temp_dir().join(format!("txmule-it-dump-{}", std::process::id()));
    let sink = FileSink::new(&dir);
    let node = MockNode::new();

    let hub = LoopbackHub::new();
    let gateway = spawn_gateway(&hub, &Identity, Some(node.clone()), {
        let sink = sink.clone();
        move |g| g.with_sink(Arc::new(sink))
    });
    let (sender, _inbox) = attach_sender(&hub, SENDER_GID, &Identity);

    let text = "meet at the north ridge\tat dawn \"bring water\"\n".repeat(8);
    let report = sender
        .send_payload(SendTarget::Broadcast, &text, "content-hash", NetworkKind::Data)
        .await?;
    assert!(report.segments > 1);

    let path = sink.path_for(&report.payload_id);
    assert!(wait_until(100, || async { path.exists() }).await, "no dump file");
    assert_eq!(tokio::fs::read_to_string(&path).await?, text);
    assert!(node.submissions().is_empty());

    gateway.stop().await;
    let _ = tokio::fs::remove_dir_all(&dir).await;
    Ok(())
}

/// Private delivery reaches only the addressed gateway.
#[tokio::test(start_paused = true)]
async fn test_private_data_payload() -> Result<()> {
    let hub = LoopbackHub::new();
    let sink = Arc::new(MemorySink::default());
    let gateway = spawn_gateway(&hub, &Z85, None, {
        let sink = sink.clone();
        move |g| g.with_sink(sink)
    });
    let (bystander, mut bystander_inbox) = hub.attach(0xBEEF);
    let (sender, _inbox) = attach_sender(&hub, SENDER_GID, &Z85);

    let text = "0123456789abcdef".repeat(20);
    let report = sender
        .send_payload(SendTarget::Private { gid: GATEWAY_GID }, &text, &"00".repeat(32), NetworkKind::Data)
        .await?;

    assert!(wait_until(100, || async { !sink.delivered().is_empty() }).await);
    assert_eq!(sink.delivered(), vec![(report.payload_id, text)]);
    assert!(bystander_inbox.try_recv().is_err());
    drop(bystander);

    gateway.stop().await;
    Ok(())
}
