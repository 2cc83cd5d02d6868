use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ConsumerConfig;
use crate::domain::OpKind;
use crate::ports::{BoxError, StorageApi};
use crate::storage::SmClient;
use crate::transport::Subscriber;
use crate::wire::{ActorEnvelope, TOPIC_DEVOLUCION, TOPIC_RENOVACION};

/// Poll period of the consume loop; shutdown is observed within one period.
const POLL_PERIOD: Duration = Duration::from_secs(1);

/// Renew actor: consumes the RENOVACION topic.
pub async fn run_renew_actor(
    config: ConsumerConfig,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    run_consumer("renew", TOPIC_RENOVACION, OpKind::Renovar, config, shutdown).await
}

/// Return actor: consumes the DEVOLUCION topic.
pub async fn run_return_actor(
    config: ConsumerConfig,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    run_consumer(
        "return",
        TOPIC_DEVOLUCION,
        OpKind::Devolver,
        config,
        shutdown,
    )
    .await
}

/// Shared topic-consumer loop.
///
/// Subscribes to one topic, validates each envelope, invokes storage, and
/// logs the outcome. There is no reply channel: business failures and
/// malformed envelopes are logged and dropped, never retried.
async fn run_consumer(
    name: &'static str,
    topic: &'static str,
    expected: OpKind,
    config: ConsumerConfig,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    let Some(storage) = SmClient::connect_with_retry(&config.sm_connect, &shutdown).await else {
        return Ok(());
    };
    let Some(mut subscriber) =
        Subscriber::connect_with_retry(&config.pub_connect, &[topic], &shutdown).await
    else {
        return Ok(());
    };

    tracing::info!(actor = name, topic, pub_connect = %config.pub_connect, "actor started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match subscriber.recv_timeout(POLL_PERIOD).await {
            Ok(None) => continue,
            Ok(Some((_topic, payload))) => {
                process_envelope(name, expected, &storage, &payload).await;
            }
            Err(error) => {
                tracing::warn!(actor = name, %error, "subscription lost, reconnecting");
                match Subscriber::connect_with_retry(&config.pub_connect, &[topic], &shutdown).await
                {
                    Some(fresh) => subscriber = fresh,
                    None => break,
                }
            }
        }
    }

    tracing::info!(actor = name, "actor stopped");
    Ok(())
}

/// Validate and apply one topic envelope.
async fn process_envelope(name: &str, expected: OpKind, storage: &dyn StorageApi, payload: &str) {
    let envelope: ActorEnvelope = match serde_json::from_str(payload) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(actor = name, %error, "malformed envelope dropped");
            return;
        }
    };

    if envelope.op != expected {
        tracing::warn!(actor = name, id = %envelope.id, op = %envelope.op, "unexpected operation dropped");
        return;
    }

    let outcome = match expected {
        OpKind::Renovar => {
            let Some(due_date_new) = envelope.due_date_new else {
                tracing::warn!(actor = name, id = %envelope.id, "renewal without dueDateNew dropped");
                return;
            };
            storage
                .renovar(
                    &envelope.id,
                    &envelope.libro_codigo,
                    &envelope.user_id,
                    due_date_new,
                )
                .await
        }
        OpKind::Devolver => {
            storage
                .devolver(&envelope.id, &envelope.libro_codigo, &envelope.user_id)
                .await
        }
        OpKind::Prestar => {
            tracing::warn!(actor = name, id = %envelope.id, "loans are not topic-driven, dropped");
            return;
        }
    };

    match outcome {
        Ok(reply) if reply.ok => {
            tracing::info!(actor = name, id = %envelope.id, op = %envelope.op, "operation applied");
        }
        Ok(reply) => {
            tracing::warn!(
                actor = name,
                id = %envelope.id,
                op = %envelope.op,
                reason = reply.reason.as_deref().unwrap_or("unknown"),
                "operation rejected"
            );
        }
        Err(error) => {
            tracing::error!(actor = name, id = %envelope.id, %error, "storage unreachable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BookCode, RequestId, SiteId, UserId, dates};
    use crate::ports;
    use crate::wire::SmReply;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    enum Call {
        Renovar(RequestId, NaiveDate),
        Devolver(RequestId),
    }

    #[derive(Default)]
    struct RecordingStorage {
        calls: Mutex<Vec<Call>>,
    }

    #[async_trait]
    impl StorageApi for RecordingStorage {
        async fn check_and_loan(
            &self,
            _id: &RequestId,
            _code: &BookCode,
            _user: &UserId,
        ) -> ports::Result<SmReply> {
            unimplemented!("consumers never loan")
        }

        async fn renovar(
            &self,
            id: &RequestId,
            _code: &BookCode,
            _user: &UserId,
            due_date_new: NaiveDate,
        ) -> ports::Result<SmReply> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Renovar(id.clone(), due_date_new));
            Ok(SmReply::already_applied())
        }

        async fn devolver(
            &self,
            id: &RequestId,
            _code: &BookCode,
            _user: &UserId,
        ) -> ports::Result<SmReply> {
            self.calls.lock().unwrap().push(Call::Devolver(id.clone()));
            Ok(SmReply::already_applied())
        }
    }

    fn envelope(op: OpKind, due: Option<NaiveDate>) -> String {
        serde_json::to_string(&ActorEnvelope {
            id: RequestId::from("r1"),
            site_id: SiteId::A,
            user_id: UserId::from("u-1"),
            libro_codigo: BookCode::from("ISBN-0001"),
            op,
            due_date_new: due,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_renew_envelope_invokes_storage() {
        let storage = RecordingStorage::default();
        let due = dates::today_plus_days(7);

        process_envelope(
            "renew",
            OpKind::Renovar,
            &storage,
            &envelope(OpKind::Renovar, Some(due)),
        )
        .await;

        assert_eq!(
            *storage.calls.lock().unwrap(),
            vec![Call::Renovar(RequestId::from("r1"), due)]
        );
    }

    #[tokio::test]
    async fn test_return_envelope_invokes_storage() {
        let storage = RecordingStorage::default();

        process_envelope(
            "return",
            OpKind::Devolver,
            &storage,
            &envelope(OpKind::Devolver, None),
        )
        .await;

        assert_eq!(
            *storage.calls.lock().unwrap(),
            vec![Call::Devolver(RequestId::from("r1"))]
        );
    }

    #[tokio::test]
    async fn test_mismatched_operation_is_dropped() {
        let storage = RecordingStorage::default();

        process_envelope(
            "renew",
            OpKind::Renovar,
            &storage,
            &envelope(OpKind::Devolver, None),
        )
        .await;

        assert!(storage.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_renewal_without_due_date_is_dropped() {
        let storage = RecordingStorage::default();

        process_envelope(
            "renew",
            OpKind::Renovar,
            &storage,
            &envelope(OpKind::Renovar, None),
        )
        .await;

        assert!(storage.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_dropped() {
        let storage = RecordingStorage::default();

        process_envelope("renew", OpKind::Renovar, &storage, "{{ not json").await;

        assert!(storage.calls.lock().unwrap().is_empty());
    }
}
