use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::domain::{
    Book, BookCode, Loan, LoanRuleError, RenewalCount, RequestId, UserId, dates,
};
use crate::wire::OpMetadata;

use super::{StorageError, read_json_or_default, write_json_atomic};

const BOOKS_FILE: &str = "books.json";
const LOANS_FILE: &str = "loans.json";

/// Authoritative, serializable mutator of the books and loans of one site.
///
/// Books and loans form a single transactional unit guarded by one lock.
/// Every mutation runs against a staged copy of the state and persists it
/// before the in-memory state is replaced, so an I/O failure aborts the
/// operation without partial visible state.
pub struct StorageManager {
    books_file: PathBuf,
    loans_file: PathBuf,
    loan_duration_days: i64,
    max_renewals: u8,
    state: Mutex<StoreState>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    books: Vec<Book>,
    loans: Vec<Loan>,
}

impl StorageManager {
    /// Open the store rooted at `data_dir`, creating the directory and the
    /// data files when absent. Corrupt files are treated as empty.
    pub async fn open(
        data_dir: &Path,
        loan_duration_days: i64,
        max_renewals: u8,
    ) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|source| StorageError::Io {
                path: data_dir.to_path_buf(),
                source,
            })?;

        let books_file = data_dir.join(BOOKS_FILE);
        let loans_file = data_dir.join(LOANS_FILE);
        let books: Vec<Book> = read_json_or_default(&books_file).await;
        let loans: Vec<Loan> = read_json_or_default(&loans_file).await;

        if !tokio::fs::try_exists(&books_file).await.unwrap_or(false) {
            write_json_atomic(&books_file, &books).await?;
        }
        if !tokio::fs::try_exists(&loans_file).await.unwrap_or(false) {
            write_json_atomic(&loans_file, &loans).await?;
        }

        Ok(Self {
            books_file,
            loans_file,
            loan_duration_days,
            max_renewals,
            state: Mutex::new(StoreState { books, loans }),
        })
    }

    /// Check availability and create a loan.
    ///
    /// Rules: the book must exist, be available, and not already be loaned
    /// to this user. The due date is today plus the configured duration.
    pub async fn check_and_loan(
        &self,
        id: &RequestId,
        code: &BookCode,
        user: &UserId,
    ) -> Result<OpMetadata, StorageError> {
        let mut state = self.state.lock().await;

        let book = state
            .books
            .iter()
            .find(|book| &book.code == code)
            .ok_or_else(|| LoanRuleError::BookNotFound(code.clone()))?;
        if !book.available {
            return Err(LoanRuleError::NotAvailable(code.clone()).into());
        }
        if state
            .loans
            .iter()
            .any(|loan| &loan.code == code && &loan.user_id == user)
        {
            return Err(LoanRuleError::AlreadyLoaned {
                code: code.clone(),
                user: user.clone(),
            }
            .into());
        }

        let due_date = dates::today_plus_days(self.loan_duration_days);

        let mut staged = state.clone();
        staged.loans.push(Loan {
            code: code.clone(),
            user_id: user.clone(),
            due_date,
            renewals: RenewalCount::default(),
        });
        set_availability(&mut staged.books, code, false);
        self.persist(&staged, true, true).await?;
        *state = staged;

        tracing::info!(id = %id, code = %code, user = %user, due = %due_date, "loan applied");
        Ok(OpMetadata {
            due_date: Some(due_date),
            ..OpMetadata::default()
        })
    }

    /// Renew an active loan with the due date carried by the request.
    ///
    /// The new due date was computed upstream; it is applied verbatim so
    /// the same event produces the same state on both sites.
    pub async fn renovar(
        &self,
        id: &RequestId,
        code: &BookCode,
        user: &UserId,
        due_date_new: NaiveDate,
    ) -> Result<OpMetadata, StorageError> {
        let mut state = self.state.lock().await;

        let position = state
            .loans
            .iter()
            .position(|loan| &loan.code == code && &loan.user_id == user)
            .ok_or_else(|| LoanRuleError::NoActiveLoan {
                code: code.clone(),
                user: user.clone(),
            })?;
        if !state.loans[position].renewals.can_renew(self.max_renewals) {
            return Err(LoanRuleError::MaxRenewals {
                code: code.clone(),
                max: self.max_renewals,
            }
            .into());
        }

        let mut staged = state.clone();
        let loan = &mut staged.loans[position];
        loan.due_date = due_date_new;
        loan.renewals = loan.renewals.incremented();
        let renewals = loan.renewals.value();
        self.persist(&staged, false, true).await?;
        *state = staged;

        tracing::info!(id = %id, code = %code, user = %user, due = %due_date_new, renewals, "renewal applied");
        Ok(OpMetadata {
            due_date: Some(due_date_new),
            renewals: Some(renewals),
            ..OpMetadata::default()
        })
    }

    /// Return a book: remove the loan and mark the book available again.
    pub async fn devolver(
        &self,
        id: &RequestId,
        code: &BookCode,
        user: &UserId,
    ) -> Result<OpMetadata, StorageError> {
        let mut state = self.state.lock().await;

        if !state
            .loans
            .iter()
            .any(|loan| &loan.code == code && &loan.user_id == user)
        {
            return Err(LoanRuleError::NoActiveLoan {
                code: code.clone(),
                user: user.clone(),
            }
            .into());
        }

        let mut staged = state.clone();
        staged
            .loans
            .retain(|loan| !(&loan.code == code && &loan.user_id == user));
        set_availability(&mut staged.books, code, true);
        self.persist(&staged, true, true).await?;
        *state = staged;

        tracing::info!(id = %id, code = %code, user = %user, "return applied");
        Ok(OpMetadata {
            available: Some(true),
            ..OpMetadata::default()
        })
    }

    /// Snapshot of the catalog.
    pub async fn books(&self) -> Vec<Book> {
        self.state.lock().await.books.clone()
    }

    /// Snapshot of the active loans.
    pub async fn loans(&self) -> Vec<Loan> {
        self.state.lock().await.loans.clone()
    }

    /// Add a book to the catalog (seeding surface). An existing book with
    /// the same code is replaced.
    pub async fn add_book(&self, book: Book) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();
        staged.books.retain(|existing| existing.code != book.code);
        staged.books.push(book);
        self.persist(&staged, true, false).await?;
        *state = staged;
        Ok(())
    }

    async fn persist(
        &self,
        staged: &StoreState,
        books_changed: bool,
        loans_changed: bool,
    ) -> Result<(), StorageError> {
        if books_changed {
            write_json_atomic(&self.books_file, &staged.books).await?;
        }
        if loans_changed {
            write_json_atomic(&self.loans_file, &staged.loans).await?;
        }
        Ok(())
    }
}

fn set_availability(books: &mut [Book], code: &BookCode, available: bool) {
    if let Some(book) = books.iter_mut().find(|book| &book.code == code) {
        book.available = available;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_with_book(dir: &TempDir, code: &str) -> StorageManager {
        let storage = StorageManager::open(dir.path(), 14, 2).await.unwrap();
        storage
            .add_book(Book {
                code: BookCode::from(code),
                title: "El Aleph".to_string(),
                available: true,
            })
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_loan_marks_book_unavailable_and_sets_due_date() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_book(&dir, "ISBN-0001").await;

        let metadata = storage
            .check_and_loan(
                &RequestId::from("r1"),
                &BookCode::from("ISBN-0001"),
                &UserId::from("u-1"),
            )
            .await
            .unwrap();

        assert_eq!(metadata.due_date, Some(dates::today_plus_days(14)));
        let books = storage.books().await;
        assert!(!books[0].available);
        let loans = storage.loans().await;
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].renewals.value(), 0);
    }

    #[tokio::test]
    async fn test_loan_rejected_when_book_unknown() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::open(dir.path(), 14, 2).await.unwrap();

        let error = storage
            .check_and_loan(
                &RequestId::from("r1"),
                &BookCode::from("ISBN-9999"),
                &UserId::from("u-1"),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            StorageError::Rule(LoanRuleError::BookNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_loan_rejected_when_book_unavailable() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_book(&dir, "ISBN-0001").await;
        let code = BookCode::from("ISBN-0001");

        storage
            .check_and_loan(&RequestId::from("r1"), &code, &UserId::from("u-1"))
            .await
            .unwrap();

        let error = storage
            .check_and_loan(&RequestId::from("r2"), &code, &UserId::from("u-2"))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            StorageError::Rule(LoanRuleError::NotAvailable(_))
        ));
        assert!(error.reply_reason().contains("not available"));
        // No state change on rejection.
        assert_eq!(storage.loans().await.len(), 1);
    }

    #[tokio::test]
    async fn test_renewal_applies_carried_due_date_and_counts() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_book(&dir, "ISBN-0001").await;
        let code = BookCode::from("ISBN-0001");
        let user = UserId::from("u-1");

        storage
            .check_and_loan(&RequestId::from("r1"), &code, &user)
            .await
            .unwrap();

        let new_due = dates::today_plus_days(7);
        let metadata = storage
            .renovar(&RequestId::from("r2"), &code, &user, new_due)
            .await
            .unwrap();

        assert_eq!(metadata.due_date, Some(new_due));
        assert_eq!(metadata.renewals, Some(1));
        assert_eq!(storage.loans().await[0].due_date, new_due);
    }

    #[tokio::test]
    async fn test_renewal_cap_is_enforced() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_book(&dir, "ISBN-0002").await;
        let code = BookCode::from("ISBN-0002");
        let user = UserId::from("u-3");

        storage
            .check_and_loan(&RequestId::from("r1"), &code, &user)
            .await
            .unwrap();
        let due = dates::today_plus_days(7);
        storage
            .renovar(&RequestId::from("r2"), &code, &user, due)
            .await
            .unwrap();
        storage
            .renovar(&RequestId::from("r3"), &code, &user, due)
            .await
            .unwrap();

        let error = storage
            .renovar(&RequestId::from("r4"), &code, &user, due)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            StorageError::Rule(LoanRuleError::MaxRenewals { max: 2, .. })
        ));
        assert_eq!(storage.loans().await[0].renewals.value(), 2);
    }

    #[tokio::test]
    async fn test_renewal_without_loan_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_book(&dir, "ISBN-0001").await;

        let error = storage
            .renovar(
                &RequestId::from("r1"),
                &BookCode::from("ISBN-0001"),
                &UserId::from("u-1"),
                dates::today_plus_days(7),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            StorageError::Rule(LoanRuleError::NoActiveLoan { .. })
        ));
    }

    #[tokio::test]
    async fn test_return_then_reloan_restores_and_regrants() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_book(&dir, "ISBN-0001").await;
        let code = BookCode::from("ISBN-0001");

        storage
            .check_and_loan(&RequestId::from("r1"), &code, &UserId::from("u-1"))
            .await
            .unwrap();
        storage
            .devolver(&RequestId::from("r2"), &code, &UserId::from("u-1"))
            .await
            .unwrap();

        // Round trip back to the pre-loan state.
        assert!(storage.books().await[0].available);
        assert!(storage.loans().await.is_empty());

        storage
            .check_and_loan(&RequestId::from("r3"), &code, &UserId::from("u-2"))
            .await
            .unwrap();
        let loans = storage.loans().await;
        assert_eq!(loans[0].user_id, UserId::from("u-2"));
        assert_eq!(loans[0].renewals.value(), 0);
    }

    #[tokio::test]
    async fn test_availability_stays_coherent_with_loans() {
        let dir = TempDir::new().unwrap();
        let storage = open_with_book(&dir, "ISBN-0001").await;
        let code = BookCode::from("ISBN-0001");
        let user = UserId::from("u-1");

        for round in 0..3 {
            storage
                .check_and_loan(&RequestId::from(format!("loan-{round}").as_str()), &code, &user)
                .await
                .unwrap();
            assert!(!storage.books().await[0].available);
            storage
                .devolver(&RequestId::from(format!("ret-{round}").as_str()), &code, &user)
                .await
                .unwrap();
            assert!(storage.books().await[0].available);
            assert!(storage.loans().await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let code = BookCode::from("ISBN-0001");
        {
            let storage = open_with_book(&dir, "ISBN-0001").await;
            storage
                .check_and_loan(&RequestId::from("r1"), &code, &UserId::from("u-1"))
                .await
                .unwrap();
        }

        let reopened = StorageManager::open(dir.path(), 14, 2).await.unwrap();
        assert_eq!(reopened.loans().await.len(), 1);
        assert!(!reopened.books().await[0].available);
    }

    #[tokio::test]
    async fn test_corrupt_files_start_empty() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("books.json"), b"{{{not json")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("loans.json"), b"also broken")
            .await
            .unwrap();

        let storage = StorageManager::open(dir.path(), 14, 2).await.unwrap();
        assert!(storage.books().await.is_empty());
        assert!(storage.loans().await.is_empty());
    }
}
