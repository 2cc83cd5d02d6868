use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::LoanActorConfig;
use crate::ports::{BoxError, StorageApi};
use crate::storage::SmClient;
use crate::transport::{ReqRepListener, RequestHandler};
use crate::wire::{LoanRequest, OpMetadata, SmReply};

/// Synchronous loan processor.
///
/// Bridges the coordinator's request to the storage manager and maps the
/// outcome back. The storage connection handles one request at a time, so
/// the actor processes loans strictly one by one.
pub struct LoanHandler {
    storage: Arc<dyn StorageApi>,
}

impl LoanHandler {
    pub fn new(storage: Arc<dyn StorageApi>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl RequestHandler for LoanHandler {
    type Request = LoanRequest;
    type Reply = SmReply;

    async fn handle(&self, request: LoanRequest) -> SmReply {
        tracing::info!(id = %request.id, code = %request.libro_codigo, user = %request.user_id, "loan request received");

        match self
            .storage
            .check_and_loan(&request.id, &request.libro_codigo, &request.user_id)
            .await
        {
            Ok(reply) => {
                if reply.ok {
                    tracing::info!(id = %request.id, "loan applied");
                } else {
                    tracing::warn!(
                        id = %request.id,
                        reason = reply.reason.as_deref().unwrap_or("unknown"),
                        "loan rejected"
                    );
                }
                // Only the due date travels upstream.
                SmReply {
                    ok: reply.ok,
                    reason: reply.reason,
                    metadata: reply.metadata.map(|metadata| OpMetadata {
                        due_date: metadata.due_date,
                        ..OpMetadata::default()
                    }),
                }
            }
            Err(error) => {
                tracing::error!(id = %request.id, %error, "storage unreachable");
                SmReply::rejected(format!("storage unavailable: {error}"))
            }
        }
    }

    fn reject(&self, _raw: &str, error: String) -> SmReply {
        SmReply::rejected(format!("invalid request: {error}"))
    }
}

/// Bind the actor endpoint and start serving. Returns the bound address.
pub async fn start(
    config: &LoanActorConfig,
    shutdown: CancellationToken,
) -> Result<SocketAddr, BoxError> {
    let storage = SmClient::connect_with_retry(&config.sm_connect, &shutdown)
        .await
        .ok_or("shutdown before the storage endpoint became reachable")?;
    let listener = ReqRepListener::bind(&config.rep_bind).await?;
    let addr = listener.local_addr();
    let handler = Arc::new(LoanHandler::new(Arc::new(storage)));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(error) = listener.serve(handler, shutdown).await {
                tracing::error!(%error, "loan actor endpoint stopped");
            }
        }
    });

    tracing::info!(rep = %addr, sm = %config.sm_connect, "loan actor started");
    Ok(addr)
}

/// Entry point of the loan actor process; serves until shutdown.
pub async fn run(config: LoanActorConfig, shutdown: CancellationToken) -> Result<(), BoxError> {
    start(&config, shutdown.clone()).await?;
    shutdown.cancelled().await;
    tracing::info!("loan actor stopped");
    Ok(())
}
