use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{CcMode, CoordinatorConfig};
use crate::domain::RequestId;
use crate::ports::BoxError;
use crate::transport::{Publisher, ReqRepClient, ReqRepListener, RequestHandler};
use crate::wire::{CcReply, ClientRequest, LoanRequest, SmReply};

use super::router::{Routed, Router};

/// Loans must complete within this window or the client gets an error.
const LOAN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Round-robin pool of connections to the loan actor.
///
/// In serial mode the pool has one slot; in threaded mode it has one slot
/// per worker so loans can be in flight concurrently. A slot that fails is
/// reconnected before reuse, so a late reply can never pair with the next
/// request on that connection.
struct LoanClientPool {
    addr: String,
    slots: Vec<Mutex<ReqRepClient>>,
    next: AtomicUsize,
}

impl LoanClientPool {
    async fn connect(addr: &str, size: usize, shutdown: &CancellationToken) -> Option<Self> {
        let mut slots = Vec::with_capacity(size);
        for _ in 0..size.max(1) {
            let client = ReqRepClient::connect_with_retry(addr, shutdown).await?;
            slots.push(Mutex::new(client));
        }
        Some(Self {
            addr: addr.to_string(),
            slots,
            next: AtomicUsize::new(0),
        })
    }

    async fn forward(&self, request: &LoanRequest) -> CcReply {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut client = self.slots[slot].lock().await;

        match client
            .request_timeout::<LoanRequest, SmReply>(request, LOAN_REQUEST_TIMEOUT)
            .await
        {
            Ok(reply) if reply.ok => {
                let due_date = reply.metadata.and_then(|metadata| metadata.due_date);
                tracing::info!(id = %request.id, ?due_date, "loan confirmed");
                CcReply::ok(request.id.clone(), due_date)
            }
            Ok(reply) => {
                let reason = reply.reason.unwrap_or_else(|| "loan rejected".to_string());
                tracing::warn!(id = %request.id, %reason, "loan refused");
                CcReply::error(request.id.clone(), reason)
            }
            Err(error) => {
                tracing::error!(id = %request.id, %error, "loan actor unreachable");
                if let Ok(fresh) = ReqRepClient::connect(&self.addr).await {
                    *client = fresh;
                }
                CcReply::error(request.id.clone(), format!("loan actor unavailable: {error}"))
            }
        }
    }
}

/// Client-facing request handler; the execution mode decides how much of
/// it runs concurrently.
struct CcHandler {
    router: Router,
    loans: LoanClientPool,
    /// Present in serial mode: serializes every request end to end.
    serial: Option<Mutex<()>>,
    requests_handled: AtomicU64,
}

#[async_trait]
impl RequestHandler for CcHandler {
    type Request = ClientRequest;
    type Reply = CcReply;

    async fn handle(&self, request: ClientRequest) -> CcReply {
        let _serial_guard = match &self.serial {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        let sequence = self.requests_handled.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            id = %request.id,
            op = %request.op,
            site = %request.site_id,
            sequence,
            "client request received"
        );

        match self.router.route(&request) {
            Routed::Reply(reply) => reply,
            Routed::Loan(loan_request) => self.loans.forward(&loan_request).await,
        }
    }

    /// Even an undecodable request gets a correlated error reply when the
    /// payload still carries a usable id.
    fn reject(&self, raw: &str, error: String) -> CcReply {
        let id = serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|value| {
                value
                    .get("id")
                    .and_then(|id| id.as_str())
                    .map(RequestId::from)
            })
            .unwrap_or_else(|| RequestId::from("unknown"));
        CcReply::error(id, format!("invalid request: {error}"))
    }
}

/// A running coordinator with its bound endpoints.
pub struct Coordinator {
    pub client_addr: SocketAddr,
    pub pub_addr: SocketAddr,
    publisher: Publisher,
}

impl Coordinator {
    /// Number of actors currently attached to the publication endpoint.
    pub fn subscriber_count(&self) -> usize {
        self.publisher.subscriber_count()
    }
}

/// Bind the coordinator endpoints, connect to the loan actor, and start
/// serving. Returns the bound addresses.
pub async fn start(
    config: &CoordinatorConfig,
    shutdown: CancellationToken,
) -> Result<Coordinator, BoxError> {
    let publisher = Publisher::bind(&config.pub_bind, shutdown.clone()).await?;
    let pub_addr = publisher.local_addr();
    let router = Router::new(publisher.clone(), config.renew_duration_days);

    let pool_size = match config.mode {
        CcMode::Serial => 1,
        CcMode::Threaded => config.workers.max(1),
    };
    let loans = LoanClientPool::connect(&config.loan_connect, pool_size, &shutdown)
        .await
        .ok_or("shutdown before the loan actor became reachable")?;

    let listener = ReqRepListener::bind(&config.client_bind).await?;
    let client_addr = listener.local_addr();

    let handler = Arc::new(CcHandler {
        router,
        loans,
        serial: matches!(config.mode, CcMode::Serial).then(|| Mutex::new(())),
        requests_handled: AtomicU64::new(0),
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(error) = listener.serve(handler, shutdown).await {
                tracing::error!(%error, "client endpoint stopped");
            }
        }
    });

    tracing::info!(
        mode = %config.mode,
        workers = pool_size,
        client = %client_addr,
        topics = %pub_addr,
        "coordinator started"
    );

    Ok(Coordinator {
        client_addr,
        pub_addr,
        publisher,
    })
}

/// Entry point of the coordinator process; serves until shutdown.
pub async fn run(config: CoordinatorConfig, shutdown: CancellationToken) -> Result<(), BoxError> {
    start(&config, shutdown.clone()).await?;
    shutdown.cancelled().await;
    tracing::info!("coordinator stopped");
    Ok(())
}
