//! Asynchronous cross-site replication.
//!
//! Each site publishes its locally applied operations on an outbound
//! endpoint and subscribes to the peer's. Inbound operations are re-applied
//! through the local storage manager, journaled with a `remote` marker, and
//! never re-published, so an operation crosses the link exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::{OpKind, SiteId, dates};
use crate::storage::{OpLog, StorageManager};
use crate::transport::{Publisher, Subscriber};
use crate::wire::{OpLogEntry, ReplicatedOp};

/// Topic the journal stream is published on. The inbound side subscribes
/// with a wildcard, so the name only matters for debugging.
const TOPIC_OPLOG: &str = "OPLOG";

/// Poll period of the inbound loop; shutdown is observed within one period.
const POLL_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationStats {
    pub node_id: SiteId,
    pub operations_sent: u64,
    pub operations_received: u64,
}

pub struct Replicator {
    node_id: SiteId,
    publisher: Publisher,
    oplog: Arc<OpLog>,
    snapshot_interval_ops: u64,
    retain_last_n: usize,
    operations_sent: AtomicU64,
    operations_received: AtomicU64,
    last_snapshot_total: AtomicU64,
}

impl Replicator {
    pub fn new(
        node_id: SiteId,
        publisher: Publisher,
        oplog: Arc<OpLog>,
        snapshot_interval_ops: u64,
        retain_last_n: usize,
    ) -> Self {
        Self {
            node_id,
            publisher,
            oplog,
            snapshot_interval_ops,
            retain_last_n,
            operations_sent: AtomicU64::new(0),
            operations_received: AtomicU64::new(0),
            last_snapshot_total: AtomicU64::new(0),
        }
    }

    /// Endpoint the peer site subscribes to.
    pub fn publish_addr(&self) -> std::net::SocketAddr {
        self.publisher.local_addr()
    }

    /// Number of peer connections currently attached to the outbound
    /// endpoint.
    pub fn peer_count(&self) -> usize {
        self.publisher.subscriber_count()
    }

    /// Publish a locally applied journal entry to the peer site.
    pub async fn replicate(&self, entry: &OpLogEntry) {
        let mut outbound = entry.clone();
        outbound.source_node = Some(self.node_id);
        let message = ReplicatedOp {
            entry: outbound,
            replication_ts: dates::now_ms(),
        };

        match self.publisher.publish(TOPIC_OPLOG, &message) {
            Ok(()) => {
                self.operations_sent.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(id = %entry.id, op = %entry.op, "operation published to peer");
            }
            Err(error) => {
                tracing::warn!(id = %entry.id, %error, "replication publish failed");
            }
        }
        self.maybe_truncate().await;
    }

    /// Spawn the inbound applier over an established peer subscription.
    /// `peer_addr` is kept for reconnecting if the link drops.
    pub fn spawn_inbound(
        self: Arc<Self>,
        storage: Arc<StorageManager>,
        subscriber: Subscriber,
        peer_addr: String,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.inbound_loop(storage, subscriber, peer_addr, shutdown)
                .await;
        })
    }

    /// Connect to the peer's outbound endpoint (retrying until reachable)
    /// and run the inbound applier.
    pub fn spawn_inbound_connect(
        self: Arc<Self>,
        storage: Arc<StorageManager>,
        peer_addr: String,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let Some(subscriber) =
                Subscriber::connect_with_retry(&peer_addr, &[], &shutdown).await
            else {
                return;
            };
            self.inbound_loop(storage, subscriber, peer_addr, shutdown)
                .await;
        })
    }

    async fn inbound_loop(
        &self,
        storage: Arc<StorageManager>,
        mut subscriber: Subscriber,
        peer_addr: String,
        shutdown: CancellationToken,
    ) {
        tracing::info!(node = %self.node_id, peer = %peer_addr, "replication subscription established");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match subscriber.recv_timeout(POLL_PERIOD).await {
                Ok(None) => continue,
                Ok(Some((_topic, payload))) => match serde_json::from_str::<ReplicatedOp>(&payload)
                {
                    Ok(message) => self.apply_remote(&storage, message).await,
                    Err(error) => {
                        tracing::warn!(%error, "undecodable replication message dropped");
                    }
                },
                Err(error) => {
                    tracing::warn!(%error, peer = %peer_addr, "replication link lost, reconnecting");
                    match Subscriber::connect_with_retry(&peer_addr, &[], &shutdown).await {
                        Some(fresh) => subscriber = fresh,
                        None => break,
                    }
                }
            }
        }
        tracing::info!(node = %self.node_id, "replication inbound loop stopped");
    }

    async fn apply_remote(&self, storage: &StorageManager, message: ReplicatedOp) {
        let entry = message.entry;

        if self.oplog.is_applied(&entry.id).await {
            tracing::debug!(id = %entry.id, "remote operation already applied, skipping");
            return;
        }

        let outcome = match entry.op {
            OpKind::Prestar => storage
                .check_and_loan(&entry.id, &entry.code, &entry.user_id)
                .await
                .map(|_| ()),
            OpKind::Renovar => match entry.due_date_new {
                Some(due_date_new) => storage
                    .renovar(&entry.id, &entry.code, &entry.user_id, due_date_new)
                    .await
                    .map(|_| ()),
                None => {
                    tracing::warn!(id = %entry.id, "remote renewal without dueDateNew dropped");
                    return;
                }
            },
            OpKind::Devolver => storage
                .devolver(&entry.id, &entry.code, &entry.user_id)
                .await
                .map(|_| ()),
        };

        match outcome {
            Ok(()) => {
                let record = OpLogEntry {
                    remote: true,
                    ..entry
                };
                let id = record.id.clone();
                let op = record.op;
                if let Err(error) = self.oplog.append(record).await {
                    tracing::error!(id = %id, %error, "journal append failed for remote operation");
                }
                self.operations_received.fetch_add(1, Ordering::Relaxed);
                self.maybe_truncate().await;
                tracing::info!(id = %id, op = %op, "remote operation applied");
            }
            Err(error) if error.is_rule() => {
                // Divergence under concurrent edits is accepted; the local
                // state stays authoritative for this site.
                tracing::warn!(id = %entry.id, op = %entry.op, %error, "remote operation rejected, dropped");
            }
            Err(error) => {
                tracing::error!(id = %entry.id, op = %entry.op, %error, "remote operation failed, dropped");
            }
        }
    }

    /// Truncate the journal once it has grown by the configured interval
    /// since the last trigger.
    async fn maybe_truncate(&self) {
        if self.snapshot_interval_ops == 0 {
            return;
        }
        let total = self.oplog.total().await as u64;
        let last = self.last_snapshot_total.load(Ordering::Relaxed);
        if total >= last + self.snapshot_interval_ops {
            if let Err(error) = self.oplog.truncate(self.retain_last_n).await {
                tracing::warn!(%error, "journal truncation failed");
            }
            let after = self.oplog.total().await as u64;
            self.last_snapshot_total.store(after, Ordering::Relaxed);
            tracing::info!(total_before = total, total_after = after, "snapshot trigger fired");
        }
    }

    pub fn stats(&self) -> ReplicationStats {
        ReplicationStats {
            node_id: self.node_id,
            operations_sent: self.operations_sent.load(Ordering::Relaxed),
            operations_received: self.operations_received.load(Ordering::Relaxed),
        }
    }
}
