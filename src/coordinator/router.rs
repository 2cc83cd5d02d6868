use crate::domain::{OpKind, dates};
use crate::transport::Publisher;
use crate::wire::{
    ActorEnvelope, CcReply, ClientRequest, LoanRequest, TOPIC_DEVOLUCION, TOPIC_RENOVACION,
};

/// Outcome of routing one client request.
#[derive(Debug)]
pub enum Routed {
    /// The reply is already determined: a validation error, a publish
    /// failure, or the immediate acknowledgement of an async operation.
    Reply(CcReply),
    /// A loan to forward synchronously to the loan actor.
    Loan(LoanRequest),
}

/// Validation and dispatch of client requests.
pub struct Router {
    publisher: Publisher,
    renew_duration_days: i64,
}

impl Router {
    pub fn new(publisher: Publisher, renew_duration_days: i64) -> Self {
        Self {
            publisher,
            renew_duration_days,
        }
    }

    /// Route one request.
    ///
    /// The schema itself guarantees a known operation and site id; what
    /// remains is rejecting empty identifiers. Async operations are
    /// published and acknowledged here; the ack says "accepted", not
    /// "applied".
    pub fn route(&self, request: &ClientRequest) -> Routed {
        if request.user_id.as_str().is_empty() {
            return Routed::Reply(CcReply::error(request.id.clone(), "userId must not be empty"));
        }
        if request.libro_codigo.as_str().is_empty() {
            return Routed::Reply(CcReply::error(
                request.id.clone(),
                "libroCodigo must not be empty",
            ));
        }

        match request.op {
            OpKind::Prestar => Routed::Loan(LoanRequest {
                id: request.id.clone(),
                libro_codigo: request.libro_codigo.clone(),
                user_id: request.user_id.clone(),
            }),
            OpKind::Renovar => {
                let due_date_new = dates::today_plus_days(self.renew_duration_days);
                let envelope = ActorEnvelope {
                    id: request.id.clone(),
                    site_id: request.site_id,
                    user_id: request.user_id.clone(),
                    libro_codigo: request.libro_codigo.clone(),
                    op: OpKind::Renovar,
                    due_date_new: Some(due_date_new),
                };
                self.publish(TOPIC_RENOVACION, &envelope)
            }
            OpKind::Devolver => {
                let envelope = ActorEnvelope {
                    id: request.id.clone(),
                    site_id: request.site_id,
                    user_id: request.user_id.clone(),
                    libro_codigo: request.libro_codigo.clone(),
                    op: OpKind::Devolver,
                    due_date_new: None,
                };
                self.publish(TOPIC_DEVOLUCION, &envelope)
            }
        }
    }

    fn publish(&self, topic: &str, envelope: &ActorEnvelope) -> Routed {
        match self.publisher.publish(topic, envelope) {
            Ok(()) => {
                tracing::info!(id = %envelope.id, op = %envelope.op, topic, "published to topic");
                Routed::Reply(CcReply::recibido(envelope.id.clone()))
            }
            Err(error) => {
                tracing::error!(id = %envelope.id, %error, "topic publish failed");
                Routed::Reply(CcReply::error(
                    envelope.id.clone(),
                    format!("publish failed: {error}"),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BookCode, RequestId, SiteId, UserId};
    use crate::transport::Subscriber;
    use crate::wire::ReplyStatus;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn request(op: OpKind, user: &str, code: &str) -> ClientRequest {
        ClientRequest {
            id: RequestId::from("r1"),
            site_id: SiteId::A,
            user_id: UserId::from(user),
            op,
            libro_codigo: BookCode::from(code),
            timestamp: dates::now_ms(),
        }
    }

    async fn router_with_publisher(shutdown: &CancellationToken) -> (Router, String) {
        let publisher = Publisher::bind("127.0.0.1:0", shutdown.clone())
            .await
            .unwrap();
        let addr = publisher.local_addr().to_string();
        (Router::new(publisher, 7), addr)
    }

    #[tokio::test]
    async fn test_prestar_is_forwarded_not_published() {
        let shutdown = CancellationToken::new();
        let (router, _) = router_with_publisher(&shutdown).await;

        match router.route(&request(OpKind::Prestar, "u-1", "ISBN-0001")) {
            Routed::Loan(loan) => {
                assert_eq!(loan.id, RequestId::from("r1"));
                assert_eq!(loan.libro_codigo, BookCode::from("ISBN-0001"));
            }
            other => panic!("expected a loan forward, got {other:?}"),
        }
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_renovar_publishes_envelope_and_acks() {
        let shutdown = CancellationToken::new();
        let (router, addr) = router_with_publisher(&shutdown).await;

        let mut subscriber = Subscriber::connect(&addr, &[TOPIC_RENOVACION]).await.unwrap();
        // The accept task registers the subscriber asynchronously.
        tokio::time::sleep(Duration::from_millis(30)).await;

        let routed = router.route(&request(OpKind::Renovar, "u-1", "ISBN-0001"));
        match routed {
            Routed::Reply(reply) => assert_eq!(reply.status, ReplyStatus::Recibido),
            other => panic!("expected an immediate ack, got {other:?}"),
        }

        let (topic, payload) = subscriber
            .recv_timeout(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("envelope expected");
        assert_eq!(topic, TOPIC_RENOVACION);
        let envelope: ActorEnvelope = serde_json::from_str(&payload).unwrap();
        assert_eq!(envelope.op, OpKind::Renovar);
        assert_eq!(envelope.due_date_new, Some(dates::today_plus_days(7)));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_devolver_envelope_has_no_due_date() {
        let shutdown = CancellationToken::new();
        let (router, addr) = router_with_publisher(&shutdown).await;

        let mut subscriber = Subscriber::connect(&addr, &[TOPIC_DEVOLUCION]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let routed = router.route(&request(OpKind::Devolver, "u-1", "ISBN-0001"));
        assert!(matches!(
            routed,
            Routed::Reply(CcReply {
                status: ReplyStatus::Recibido,
                ..
            })
        ));

        let (_, payload) = subscriber
            .recv_timeout(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("envelope expected");
        let envelope: ActorEnvelope = serde_json::from_str(&payload).unwrap();
        assert_eq!(envelope.due_date_new, None);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_empty_fields_are_rejected() {
        let shutdown = CancellationToken::new();
        let (router, _) = router_with_publisher(&shutdown).await;

        for bad in [
            request(OpKind::Prestar, "", "ISBN-0001"),
            request(OpKind::Renovar, "u-1", ""),
        ] {
            match router.route(&bad) {
                Routed::Reply(reply) => {
                    assert_eq!(reply.status, ReplyStatus::Error);
                    assert!(reply.reason.is_some());
                }
                other => panic!("expected a validation error, got {other:?}"),
            }
        }
        shutdown.cancel();
    }
}
