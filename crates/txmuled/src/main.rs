//! txmuled: mesh transaction mule.
//!
//! `txmuled [run]` listens for segments, reassembles payloads and submits
//! them to the node. `txmuled broadcast RAW_TX TX_HASH m|t|d [GID]` sends
//! one payload into the mesh.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use txmule_core::config::MuleConfig;
use txmule_core::encoding::{self, PayloadEncoding};
use txmule_core::{NetworkKind, SegmentLimits};
use txmule_services::{
    BitcoinRpc, ConfirmationTracker, FileSink, Gateway, Gid, HttpRelay, RetryPolicy, SegmentSender,
    SegmentStore, SendTarget, Transport,
};

mod udp;

use udp::UdpTransport;

/// goTenna GIDs are 48 bits.
const GID_MASK: u64 = 0xFFFF_FFFF_FFFF;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MuleConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = MuleConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MuleConfig::default()
    });

    let gid = config
        .identity
        .gid
        .unwrap_or_else(|| rand::random::<u64>() & GID_MASK);

    let encoding = encoding::by_name(&config.segmenting.encoding)
        .with_context(|| format!("unknown encoding {:?}", config.segmenting.encoding))?;
    let limits = config
        .segmenting
        .limits(encoding)
        .validate()
        .context("invalid segmenting capacities")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("run") => run(config, gid, encoding).await,
        Some("broadcast") => broadcast(config, gid, encoding, limits, &args[1..]).await,
        Some(other) => anyhow::bail!(
            "unknown command {other:?}; usage: txmuled [run] | broadcast RAW_TX TX_HASH m|t|d [GID]"
        ),
    }
}

// ── run ───────────────────────────────────────────────────────────────────────

async fn run(config: MuleConfig, gid: Gid, encoding: &'static dyn PayloadEncoding) -> Result<()> {
    tracing::info!(gid, encoding = encoding.name(), "txmuled starting");

    let transport =
        UdpTransport::bind(&config.transport.bind, gid, &config.transport.peers).await?;
    let shared: Arc<dyn Transport> = Arc::new(transport.clone());

    let store = SegmentStore::with_capacity(config.store.max_entries);
    let mut gateway = Gateway::new(store.clone())
        .with_encoding(encoding)
        .with_sink(Arc::new(FileSink::new(&config.sink.dump_dir)))
        .with_retry(RetryPolicy {
            delay: Duration::from_secs(config.downstream.retry_delay_secs),
            max_attempts: config.downstream.max_attempts,
        })
        .with_eviction(
            Duration::from_secs(config.store.stale_after_secs),
            Duration::from_secs(config.store.sweep_interval_secs.max(1)),
        );

    if !config.node.rpc_url.is_empty() {
        let rpc = Arc::new(BitcoinRpc::new(
            &config.node.rpc_url,
            &config.node.rpc_user,
            &config.node.rpc_password,
        )?);
        gateway = gateway.with_submitter(rpc.clone());
        if config.confirmation.enabled {
            let tracker = ConfirmationTracker::new(rpc, shared.clone()).with_polling(
                Duration::from_secs(config.confirmation.poll_interval_secs),
                config.confirmation.max_attempts,
            );
            gateway = gateway.with_confirmations(tracker);
        }
        tracing::info!(url = %config.node.rpc_url, "node rpc configured");
    }

    if let Some(url) = &config.relay.url {
        gateway = gateway.with_relay(Arc::new(HttpRelay::new(url)?));
        tracing::info!(url = %url, "relay configured");
    }

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────
    let (inbound_tx, inbound_rx) = mpsc::channel(256);

    let receiver_task = tokio::spawn(transport.recv_loop(inbound_tx, shutdown_tx.subscribe()));
    let gateway_task = tokio::spawn(gateway.run(inbound_rx, shutdown_tx.subscribe()));

    let status_printer = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let pending = store.in_progress().await;
                if pending.is_empty() {
                    continue;
                }
                tracing::info!(count = pending.len(), "payloads in progress");
                for p in pending {
                    tracing::info!(
                        payload_id = %p.payload_id,
                        have = p.have,
                        expected = ?p.expected,
                        "  payload"
                    );
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = receiver_task       => tracing::error!("udp receiver exited: {:?}", r),
        r = gateway_task        => tracing::error!("gateway exited: {:?}", r),
        r = status_printer      => tracing::error!("status printer exited: {:?}", r),
    }

    Ok(())
}

// ── broadcast ─────────────────────────────────────────────────────────────────

async fn broadcast(
    config: MuleConfig,
    gid: Gid,
    encoding: &'static dyn PayloadEncoding,
    limits: SegmentLimits,
    args: &[String],
) -> Result<()> {
    let [raw, tx_hash, flag, rest @ ..] = args else {
        anyhow::bail!("usage: txmuled broadcast RAW_TX TX_HASH m|t|d [GID]");
    };
    let network = NetworkKind::from_flag(flag)
        .with_context(|| format!("network must be m, t or d, got {flag:?}"))?;
    let target = match rest.first() {
        Some(g) => SendTarget::Private {
            gid: g.parse().with_context(|| format!("bad gid {g:?}"))?,
        },
        None => SendTarget::Broadcast,
    };

    let transport = UdpTransport::bind(
        &udp::ephemeral_bind(&config.transport.bind),
        gid,
        &config.transport.peers,
    )
    .await?;
    let sender = SegmentSender::new(Arc::new(transport), encoding)
        .with_limits(limits)
        .with_interval(Duration::from_millis(config.segmenting.send_interval_ms))
        .with_start_index(rand::random::<u32>());

    let report = sender
        .send_payload(target, raw, tx_hash, network)
        .await
        .context("broadcast failed")?;
    tracing::info!(
        payload_id = %report.payload_id,
        segments = report.segments,
        "payload sent"
    );
    Ok(())
}
