//! Seams between components that live in different processes.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{BookCode, RequestId, UserId};
use crate::wire::SmReply;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, BoxError>;

/// Access to the storage manager of a site.
///
/// Actors reach the one storage endpoint of their site through this trait;
/// the production implementation speaks the request/reply wire protocol,
/// tests substitute an in-memory double. Business failures come back inside
/// the [`SmReply`]; only transport and I/O trouble surfaces as `Err`.
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn check_and_loan(
        &self,
        id: &RequestId,
        code: &BookCode,
        user: &UserId,
    ) -> Result<SmReply>;

    async fn renovar(
        &self,
        id: &RequestId,
        code: &BookCode,
        user: &UserId,
        due_date_new: NaiveDate,
    ) -> Result<SmReply>;

    async fn devolver(&self, id: &RequestId, code: &BookCode, user: &UserId) -> Result<SmReply>;
}
