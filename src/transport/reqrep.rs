use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use super::TransportError;

/// Delay between connect attempts while a peer endpoint is still coming up.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Application side of a request/reply endpoint.
///
/// `reject` produces the reply for frames that cannot be decoded, so the
/// endpoint answers every request exactly once even on malformed input.
/// It receives the raw frame so handlers can still correlate the reply
/// (for instance by fishing the request id out of an otherwise invalid
/// payload).
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Send;
    type Reply: Serialize + Send;

    async fn handle(&self, request: Self::Request) -> Self::Reply;

    fn reject(&self, raw: &str, error: String) -> Self::Reply;
}

/// Bound request/reply endpoint.
pub struct ReqRepListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ReqRepListener {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop. Every connection gets its own task; within a connection
    /// requests are answered strictly in arrival order, which preserves the
    /// one-reply-per-request wire discipline.
    pub async fn serve<H: RequestHandler>(
        self,
        handler: Arc<H>,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::debug!(%peer, "connection accepted");
                    let handler = Arc::clone(&handler);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(error) = serve_connection(stream, handler, shutdown).await {
                            tracing::debug!(%error, %peer, "connection ended");
                        }
                    });
                }
            }
        }
        Ok(())
    }
}

async fn serve_connection<H: RequestHandler>(
    stream: TcpStream,
    handler: Arc<H>,
    shutdown: CancellationToken,
) -> Result<(), TransportError> {
    let mut framed = Framed::new(stream, LinesCodec::new());
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = framed.next() => match next {
                Some(line) => line?,
                None => break,
            },
        };

        let reply = match serde_json::from_str::<H::Request>(&line) {
            Ok(request) => handler.handle(request).await,
            Err(error) => handler.reject(&line, error.to_string()),
        };
        framed.send(serde_json::to_string(&reply)?).await?;
    }
    Ok(())
}

/// Client side of a request/reply endpoint. One request may be in flight
/// at a time; the reply to a request is the next frame on the connection.
pub struct ReqRepClient {
    framed: Framed<TcpStream, LinesCodec>,
}

impl ReqRepClient {
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new()),
        })
    }

    /// Connect, retrying until the endpoint is reachable or shutdown is
    /// requested. Component start order is not fixed, so the first connect
    /// routinely races the peer's bind.
    pub async fn connect_with_retry(addr: &str, shutdown: &CancellationToken) -> Option<Self> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            match Self::connect(addr).await {
                Ok(client) => return Some(client),
                Err(error) => {
                    tracing::debug!(%addr, %error, "connect failed, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(CONNECT_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    pub async fn request<Req, Rep>(&mut self, request: &Req) -> Result<Rep, TransportError>
    where
        Req: Serialize,
        Rep: DeserializeOwned,
    {
        self.framed.send(serde_json::to_string(request)?).await?;
        match self.framed.next().await {
            Some(line) => Ok(serde_json::from_str(&line?)?),
            None => Err(TransportError::Closed),
        }
    }

    pub async fn request_timeout<Req, Rep>(
        &mut self,
        request: &Req,
        limit: Duration,
    ) -> Result<Rep, TransportError>
    where
        Req: Serialize,
        Rep: DeserializeOwned,
    {
        timeout(limit, self.request(request))
            .await
            .map_err(|_| TransportError::Timeout(limit))?
    }
}
