//! Liveness publication and health probes for a site.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::{SiteId, dates};
use crate::transport::{Publisher, RequestHandler};
use crate::wire::{Heartbeat, HealthProbe, HealthReply};

/// Topic heartbeats are published on.
pub const TOPIC_HEARTBEAT: &str = "HEARTBEAT";

/// Heartbeat publisher plus health responder state for one site.
pub struct HealthMonitor {
    node_id: SiteId,
    interval: Duration,
    heartbeats_sent: Arc<AtomicU64>,
    probes_handled: Arc<AtomicU64>,
}

impl HealthMonitor {
    pub fn new(node_id: SiteId, interval: Duration) -> Self {
        Self {
            node_id,
            interval,
            heartbeats_sent: Arc::new(AtomicU64::new(0)),
            probes_handled: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Periodic `alive` publication until shutdown.
    pub fn spawn_heartbeat(
        &self,
        publisher: Publisher,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let node_id = self.node_id;
        let interval = self.interval;
        let heartbeats_sent = Arc::clone(&self.heartbeats_sent);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let sequence = heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                        let heartbeat = Heartbeat {
                            node: node_id,
                            ts: dates::now_ms(),
                            status: "alive".to_string(),
                            sequence,
                        };
                        if let Err(error) = publisher.publish(TOPIC_HEARTBEAT, &heartbeat) {
                            tracing::warn!(%error, "heartbeat publish failed");
                        } else {
                            tracing::trace!(node = %node_id, sequence, "heartbeat published");
                        }
                    }
                }
            }
            tracing::info!(node = %node_id, "heartbeat loop stopped");
        })
    }

    /// Handler for the health request/reply endpoint; shares the counters.
    pub fn handler(&self) -> HealthHandler {
        HealthHandler {
            node_id: self.node_id,
            heartbeats_sent: Arc::clone(&self.heartbeats_sent),
            probes_handled: Arc::clone(&self.probes_handled),
        }
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    pub fn probes_handled(&self) -> u64 {
        self.probes_handled.load(Ordering::Relaxed)
    }
}

pub struct HealthHandler {
    node_id: SiteId,
    heartbeats_sent: Arc<AtomicU64>,
    probes_handled: Arc<AtomicU64>,
}

#[async_trait]
impl RequestHandler for HealthHandler {
    type Request = HealthProbe;
    type Reply = HealthReply;

    async fn handle(&self, _probe: HealthProbe) -> HealthReply {
        let probes_handled = self.probes_handled.fetch_add(1, Ordering::Relaxed) + 1;
        HealthReply {
            status: "ok".to_string(),
            node: self.node_id,
            ts: dates::now_ms(),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            probes_handled,
        }
    }

    fn reject(&self, _raw: &str, error: String) -> HealthReply {
        HealthReply {
            status: format!("error: {error}"),
            node: self.node_id,
            ts: dates::now_ms(),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            probes_handled: self.probes_handled.load(Ordering::Relaxed),
        }
    }
}
