use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::StorageConfig;
use crate::health::HealthMonitor;
use crate::ports::BoxError;
use crate::replication::Replicator;
use crate::transport::{Publisher, ReqRepListener, RequestHandler, Subscriber};
use crate::wire::{OpLogEntry, SmReply, SmRequest};

use super::{OpLog, StorageManager};

/// Request handler of the storage endpoint.
///
/// Dispatches by method, applies the mutation, journals it, and hands the
/// entry to replication. Duplicate deliveries of an already-applied request
/// are acknowledged without re-applying anything.
pub struct SmHandler {
    storage: Arc<StorageManager>,
    oplog: Arc<OpLog>,
    replicator: Arc<Replicator>,
    /// Consecutive storage I/O failures; past the limit the process shuts
    /// down rather than keep answering from a store it cannot persist.
    io_failures: AtomicU32,
    shutdown: CancellationToken,
}

/// Consecutive I/O failures tolerated before the site gives up.
const MAX_CONSECUTIVE_IO_FAILURES: u32 = 5;

#[async_trait]
impl RequestHandler for SmHandler {
    type Request = SmRequest;
    type Reply = SmReply;

    async fn handle(&self, request: SmRequest) -> SmReply {
        let id = request.id().clone();
        let op = request.op();

        if self.oplog.is_applied(&id).await {
            tracing::info!(id = %id, op = %op, "duplicate request acknowledged without re-apply");
            return SmReply::already_applied();
        }

        let outcome = match &request {
            SmRequest::CheckAndLoan {
                id,
                libro_codigo,
                user_id,
            } => self.storage.check_and_loan(id, libro_codigo, user_id).await,
            SmRequest::Renovar {
                id,
                libro_codigo,
                user_id,
                due_date_new,
            } => {
                self.storage
                    .renovar(id, libro_codigo, user_id, *due_date_new)
                    .await
            }
            SmRequest::Devolver {
                id,
                libro_codigo,
                user_id,
            } => self.storage.devolver(id, libro_codigo, user_id).await,
        };

        match outcome {
            Ok(metadata) => {
                self.io_failures.store(0, Ordering::Relaxed);
                let entry = OpLogEntry {
                    id: id.clone(),
                    op,
                    code: request.code().clone(),
                    user_id: request.user_id().clone(),
                    due_date_new: request.due_date_new(),
                    ts: Some(crate::domain::dates::now_ms()),
                    source_node: None,
                    remote: false,
                };
                match self.oplog.append(entry.clone()).await {
                    Ok(true) => self.replicator.replicate(&entry).await,
                    Ok(false) => {}
                    // The mutation is already persisted; the store runs
                    // ahead of the journal until the next reconcile.
                    Err(error) => {
                        tracing::error!(id = %id, %error, "journal append failed after apply");
                    }
                }
                SmReply::applied(metadata)
            }
            Err(error) if error.is_rule() => {
                tracing::info!(id = %id, op = %op, reason = %error, "request rejected");
                SmReply::rejected(error.reply_reason())
            }
            Err(error) => {
                tracing::error!(id = %id, op = %op, %error, "mutation failed");
                let failures = self.io_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= MAX_CONSECUTIVE_IO_FAILURES {
                    tracing::error!(failures, "persistent storage failure, shutting down");
                    self.shutdown.cancel();
                }
                SmReply::rejected(error.reply_reason())
            }
        }
    }

    fn reject(&self, _raw: &str, error: String) -> SmReply {
        SmReply::rejected(format!("invalid request: {error}"))
    }
}

/// One running storage site: manager, journal, replication, and health,
/// all bound and serving.
pub struct StorageSite {
    pub storage: Arc<StorageManager>,
    pub oplog: Arc<OpLog>,
    pub replicator: Arc<Replicator>,
    pub health: Arc<HealthMonitor>,
    pub rep_addr: SocketAddr,
    pub repl_pub_addr: SocketAddr,
    pub health_addr: SocketAddr,
    pub heartbeat_addr: SocketAddr,
}

impl StorageSite {
    /// Bind every endpoint and spawn the serving tasks. The inbound
    /// replication leg is attached separately with [`connect_peer`]
    /// because the peer may not be up yet.
    ///
    /// [`connect_peer`]: StorageSite::connect_peer
    pub async fn start(
        config: &StorageConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, BoxError> {
        let storage = Arc::new(
            StorageManager::open(
                &config.data_dir,
                config.loan_duration_days,
                config.max_renewals,
            )
            .await?,
        );
        let oplog = Arc::new(OpLog::open(&config.data_dir).await?);

        let repl_publisher = Publisher::bind(&config.repl_pub_bind, shutdown.clone()).await?;
        let repl_pub_addr = repl_publisher.local_addr();
        let replicator = Arc::new(Replicator::new(
            config.node_id,
            repl_publisher,
            Arc::clone(&oplog),
            config.snapshot_interval_ops,
            config.retain_last_n,
        ));

        let health = Arc::new(HealthMonitor::new(config.node_id, config.heartbeat_interval));
        let heartbeat_publisher =
            Publisher::bind(&config.heartbeat_pub_bind, shutdown.clone()).await?;
        let heartbeat_addr = heartbeat_publisher.local_addr();
        health.spawn_heartbeat(heartbeat_publisher, shutdown.clone());

        let health_listener = ReqRepListener::bind(&config.health_rep_bind).await?;
        let health_addr = health_listener.local_addr();
        let health_handler = Arc::new(health.handler());
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                if let Err(error) = health_listener.serve(health_handler, shutdown).await {
                    tracing::error!(%error, "health endpoint stopped");
                }
            }
        });

        let rep_listener = ReqRepListener::bind(&config.rep_bind).await?;
        let rep_addr = rep_listener.local_addr();
        let handler = Arc::new(SmHandler {
            storage: Arc::clone(&storage),
            oplog: Arc::clone(&oplog),
            replicator: Arc::clone(&replicator),
            io_failures: AtomicU32::new(0),
            shutdown: shutdown.clone(),
        });
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                if let Err(error) = rep_listener.serve(handler, shutdown).await {
                    tracing::error!(%error, "storage endpoint stopped");
                }
            }
        });

        tracing::info!(
            node = %config.node_id,
            rep = %rep_addr,
            repl_pub = %repl_pub_addr,
            health = %health_addr,
            heartbeat = %heartbeat_addr,
            "storage site started"
        );

        Ok(Self {
            storage,
            oplog,
            replicator,
            health,
            rep_addr,
            repl_pub_addr,
            health_addr,
            heartbeat_addr,
        })
    }

    /// Subscribe to the peer's replication stream and start applying it.
    /// Returns once the subscription is established (or shutdown fired).
    pub async fn connect_peer(&self, peer_addr: &str, shutdown: CancellationToken) -> bool {
        let Some(subscriber) = Subscriber::connect_with_retry(peer_addr, &[], &shutdown).await
        else {
            return false;
        };
        Arc::clone(&self.replicator).spawn_inbound(
            Arc::clone(&self.storage),
            subscriber,
            peer_addr.to_string(),
            shutdown,
        );
        true
    }

    /// Like [`connect_peer`] but fully in the background, retrying until
    /// the peer is reachable.
    ///
    /// [`connect_peer`]: StorageSite::connect_peer
    pub fn connect_peer_background(&self, peer_addr: String, shutdown: CancellationToken) {
        Arc::clone(&self.replicator).spawn_inbound_connect(
            Arc::clone(&self.storage),
            peer_addr,
            shutdown,
        );
    }
}

/// Entry point of the storage site process; serves until shutdown.
pub async fn run(config: StorageConfig, shutdown: CancellationToken) -> Result<(), BoxError> {
    let site = StorageSite::start(&config, shutdown.clone()).await?;
    site.connect_peer_background(config.repl_sub_connect.clone(), shutdown.clone());
    shutdown.cancelled().await;
    tracing::info!(node = %config.node_id, "storage site stopped");
    Ok(())
}
