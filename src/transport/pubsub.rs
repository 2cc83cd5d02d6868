use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;

use super::TransportError;

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Fan-out publisher bound to one endpoint.
///
/// The handle is cheap to clone and `publish` never blocks: each subscriber
/// connection drains its own unbounded queue on a dedicated writer task, and
/// subscribers that fall away are pruned on the next publish.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    local_addr: SocketAddr,
    subscribers: Mutex<Vec<UnboundedSender<String>>>,
}

impl Publisher {
    pub async fn bind(addr: &str, shutdown: CancellationToken) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let inner = Arc::new(PublisherInner {
            local_addr,
            subscribers: Mutex::new(Vec::new()),
        });

        let accept_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else { break };
                        tracing::debug!(%peer, "subscriber attached");
                        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                        accept_inner
                            .subscribers
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(tx);
                        let mut writer = FramedWrite::new(stream, LinesCodec::new());
                        tokio::spawn(async move {
                            while let Some(line) = rx.recv().await {
                                if writer.send(line).await.is_err() {
                                    break;
                                }
                            }
                        });
                    }
                }
            }
        });

        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Current number of attached subscriber connections.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Non-blocking fan-out send of `TOPIC <json>`.
    pub fn publish<T: Serialize>(&self, topic: &str, message: &T) -> Result<(), TransportError> {
        let line = format!("{topic} {}", serde_json::to_string(message)?);
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(line.clone()).is_ok());
        Ok(())
    }
}

/// Subscriber side of a topic endpoint.
///
/// Topic matching is by prefix; an empty topic list subscribes to
/// everything (the replication link listens this way).
pub struct Subscriber {
    reader: FramedRead<TcpStream, LinesCodec>,
    topics: Vec<String>,
}

impl Subscriber {
    pub async fn connect(addr: &str, topics: &[&str]) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            reader: FramedRead::new(stream, LinesCodec::new()),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        })
    }

    /// Connect, retrying until the publisher is reachable or shutdown is
    /// requested.
    pub async fn connect_with_retry(
        addr: &str,
        topics: &[&str],
        shutdown: &CancellationToken,
    ) -> Option<Self> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            match Self::connect(addr, topics).await {
                Ok(subscriber) => return Some(subscriber),
                Err(error) => {
                    tracing::debug!(%addr, %error, "subscribe failed, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(CONNECT_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    /// Next matching `(topic, payload)` message, or `None` when the poll
    /// period elapses without one. Consumers call this in a loop so they
    /// observe shutdown within one period.
    pub async fn recv_timeout(
        &mut self,
        limit: Duration,
    ) -> Result<Option<(String, String)>, TransportError> {
        loop {
            let line = match timeout(limit, self.reader.next()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Err(TransportError::Closed),
                Ok(Some(line)) => line?,
            };

            let (topic, payload) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            if self.matches(topic) {
                return Ok(Some((topic.to_string(), payload.to_string())));
            }
        }
    }

    fn matches(&self, topic: &str) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|t| topic.starts_with(t.as_str()))
    }
}
