use thiserror::Error;

use super::value_objects::{BookCode, UserId};

/// Business-rule violations of the loan lifecycle.
///
/// These are ordinary outcomes carried as values inside reply envelopes,
/// never retried and never treated as infrastructure failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoanRuleError {
    /// The catalog has no book with this code.
    #[error("book {0} not found")]
    BookNotFound(BookCode),
    /// The book exists but is currently loaned out.
    #[error("book {0} is not available")]
    NotAvailable(BookCode),
    /// The same user already holds this exact book.
    #[error("book {code} already loaned to user {user}")]
    AlreadyLoaned { code: BookCode, user: UserId },
    /// Renewal or return on a pair with no active loan.
    #[error("no active loan for book {code} and user {user}")]
    NoActiveLoan { code: BookCode, user: UserId },
    /// The renewal cap has been reached for this loan.
    #[error("max renewals reached ({max}) for book {code}")]
    MaxRenewals { code: BookCode, max: u8 },
}
