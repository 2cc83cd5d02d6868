//! Message-oriented endpoints over TCP.
//!
//! Two patterns cover every endpoint in the system: strict request/reply
//! and topic-based publish/subscribe. Frames are newline-delimited UTF-8
//! JSON; topic messages carry the topic name before the payload, separated
//! by a single space.

pub mod pubsub;
pub mod reqrep;

pub use pubsub::{Publisher, Subscriber};
pub use reqrep::{ReqRepClient, ReqRepListener, RequestHandler};

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport io: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport framing: {0}")]
    Framing(#[from] tokio_util::codec::LinesCodecError),
    #[error("transport encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed by peer")]
    Closed,
}
