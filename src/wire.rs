//! Wire and journal message schemas.
//!
//! Every message exchanged between components is UTF-8 JSON with a closed,
//! typed schema. Field names follow the external contract (`libroCodigo`,
//! `siteId`, ...) so payloads stay interoperable with the existing clients
//! and tooling of both sites.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{BookCode, OpKind, RequestId, SiteId, UserId};

/// Topic carrying renewal envelopes from the coordinator to the renew actor.
pub const TOPIC_RENOVACION: &str = "RENOVACION";
/// Topic carrying return envelopes from the coordinator to the return actor.
pub const TOPIC_DEVOLUCION: &str = "DEVOLUCION";

/// Client request as received on the coordinator's client-facing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequest {
    pub id: RequestId,
    pub site_id: SiteId,
    pub user_id: UserId,
    pub op: OpKind,
    pub libro_codigo: BookCode,
    /// Client-side send time, millis since epoch.
    pub timestamp: i64,
}

/// Status of a coordinator reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplyStatus {
    /// Accepted for asynchronous processing; says nothing about the outcome.
    Recibido,
    Ok,
    Error,
}

/// Coordinator reply to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CcReply {
    pub id: RequestId,
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

impl CcReply {
    pub fn recibido(id: RequestId) -> Self {
        Self {
            id,
            status: ReplyStatus::Recibido,
            reason: None,
            due_date: None,
        }
    }

    pub fn ok(id: RequestId, due_date: Option<NaiveDate>) -> Self {
        Self {
            id,
            status: ReplyStatus::Ok,
            reason: None,
            due_date,
        }
    }

    pub fn error(id: RequestId, reason: impl Into<String>) -> Self {
        Self {
            id,
            status: ReplyStatus::Error,
            reason: Some(reason.into()),
            due_date: None,
        }
    }
}

/// Topic payload published by the coordinator for the asynchronous actors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorEnvelope {
    pub id: RequestId,
    pub site_id: SiteId,
    pub user_id: UserId,
    pub libro_codigo: BookCode,
    pub op: OpKind,
    /// Present for renewals only; computed by the coordinator so the same
    /// due date replicates deterministically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date_new: Option<NaiveDate>,
}

/// Request from the coordinator to the loan actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanRequest {
    pub id: RequestId,
    pub libro_codigo: BookCode,
    pub user_id: UserId,
}

/// Request from an actor to the storage manager, dispatched by method name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "payload")]
pub enum SmRequest {
    #[serde(rename = "checkAndLoan", rename_all = "camelCase")]
    CheckAndLoan {
        id: RequestId,
        libro_codigo: BookCode,
        user_id: UserId,
    },
    #[serde(rename = "renovar", rename_all = "camelCase")]
    Renovar {
        id: RequestId,
        libro_codigo: BookCode,
        user_id: UserId,
        due_date_new: NaiveDate,
    },
    #[serde(rename = "devolver", rename_all = "camelCase")]
    Devolver {
        id: RequestId,
        libro_codigo: BookCode,
        user_id: UserId,
    },
}

impl SmRequest {
    pub fn id(&self) -> &RequestId {
        match self {
            SmRequest::CheckAndLoan { id, .. }
            | SmRequest::Renovar { id, .. }
            | SmRequest::Devolver { id, .. } => id,
        }
    }

    pub fn op(&self) -> OpKind {
        match self {
            SmRequest::CheckAndLoan { .. } => OpKind::Prestar,
            SmRequest::Renovar { .. } => OpKind::Renovar,
            SmRequest::Devolver { .. } => OpKind::Devolver,
        }
    }

    pub fn code(&self) -> &BookCode {
        match self {
            SmRequest::CheckAndLoan { libro_codigo, .. }
            | SmRequest::Renovar { libro_codigo, .. }
            | SmRequest::Devolver { libro_codigo, .. } => libro_codigo,
        }
    }

    pub fn user_id(&self) -> &UserId {
        match self {
            SmRequest::CheckAndLoan { user_id, .. }
            | SmRequest::Renovar { user_id, .. }
            | SmRequest::Devolver { user_id, .. } => user_id,
        }
    }

    pub fn due_date_new(&self) -> Option<NaiveDate> {
        match self {
            SmRequest::Renovar { due_date_new, .. } => Some(*due_date_new),
            _ => None,
        }
    }
}

/// Outcome metadata attached to successful storage replies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewals: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
}

/// Reply envelope shared by the storage manager and the loan actor.
///
/// Business failures travel here as `ok = false` plus a reason; they are
/// values, not transport errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<OpMetadata>,
}

impl SmReply {
    pub fn applied(metadata: OpMetadata) -> Self {
        Self {
            ok: true,
            reason: None,
            metadata: Some(metadata),
        }
    }

    /// Positive acknowledgement without metadata, used for duplicate
    /// deliveries of an already-applied request.
    pub fn already_applied() -> Self {
        Self {
            ok: true,
            reason: None,
            metadata: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            metadata: None,
        }
    }
}

/// One applied mutation in the operation journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpLogEntry {
    pub id: RequestId,
    pub op: OpKind,
    pub code: BookCode,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date_new: Option<NaiveDate>,
    /// Millis since epoch; assigned on append when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    /// Site that originated the mutation, present on replicated entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node: Option<SiteId>,
    /// True when the entry arrived through replication rather than from a
    /// local actor. Remote entries are never re-published.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub remote: bool,
}

/// Journal entry as published to the peer site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedOp {
    #[serde(flatten)]
    pub entry: OpLogEntry,
    pub replication_ts: i64,
}

/// Periodic liveness publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node: SiteId,
    pub ts: i64,
    pub status: String,
    pub sequence: u64,
}

/// Health probe request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthProbe {
    pub status: String,
}

impl HealthProbe {
    pub fn check() -> Self {
        Self {
            status: "check".to_string(),
        }
    }
}

/// Health probe reply with liveness counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReply {
    pub status: String,
    pub node: SiteId,
    pub ts: i64,
    pub heartbeats_sent: u64,
    pub probes_handled: u64,
}
