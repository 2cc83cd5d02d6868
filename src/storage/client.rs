use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::domain::{BookCode, RequestId, UserId};
use crate::ports::{Result, StorageApi};
use crate::transport::{ReqRepClient, TransportError};
use crate::wire::{SmReply, SmRequest};

/// Wire client for the storage endpoint of a site.
///
/// The connection is strict request/reply, so calls are serialized through
/// an internal lock; one request is in flight at a time.
pub struct SmClient {
    inner: Mutex<ReqRepClient>,
}

impl SmClient {
    pub async fn connect(addr: &str) -> std::result::Result<Self, TransportError> {
        let client = ReqRepClient::connect(addr).await?;
        Ok(Self {
            inner: Mutex::new(client),
        })
    }

    pub async fn connect_with_retry(addr: &str, shutdown: &CancellationToken) -> Option<Self> {
        let client = ReqRepClient::connect_with_retry(addr, shutdown).await?;
        Some(Self {
            inner: Mutex::new(client),
        })
    }

    async fn call(&self, request: SmRequest) -> Result<SmReply> {
        let mut client = self.inner.lock().await;
        Ok(client.request(&request).await?)
    }
}

#[async_trait]
impl StorageApi for SmClient {
    async fn check_and_loan(
        &self,
        id: &RequestId,
        code: &BookCode,
        user: &UserId,
    ) -> Result<SmReply> {
        self.call(SmRequest::CheckAndLoan {
            id: id.clone(),
            libro_codigo: code.clone(),
            user_id: user.clone(),
        })
        .await
    }

    async fn renovar(
        &self,
        id: &RequestId,
        code: &BookCode,
        user: &UserId,
        due_date_new: NaiveDate,
    ) -> Result<SmReply> {
        self.call(SmRequest::Renovar {
            id: id.clone(),
            libro_codigo: code.clone(),
            user_id: user.clone(),
            due_date_new,
        })
        .await
    }

    async fn devolver(&self, id: &RequestId, code: &BookCode, user: &UserId) -> Result<SmReply> {
        self.call(SmRequest::Devolver {
            id: id.clone(),
            libro_codigo: code.clone(),
            user_id: user.clone(),
        })
        .await
    }
}
