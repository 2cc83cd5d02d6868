use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::value_objects::{BookCode, RenewalCount, UserId};

/// A book copy in the site catalog.
///
/// `available` is true exactly when no active loan references the code;
/// the storage manager maintains that coherence under its lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub code: BookCode,
    pub title: String,
    pub available: bool,
}

/// An active loan, identified by the `(code, user_id)` pair.
///
/// Created by a successful loan, mutated by renewal, removed by return.
/// At most one loan may exist per book code at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub code: BookCode,
    pub user_id: UserId,
    pub due_date: NaiveDate,
    pub renewals: RenewalCount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loan_file_schema_field_names() {
        let loan = Loan {
            code: BookCode::from("ISBN-0001"),
            user_id: UserId::from("u-1"),
            due_date: NaiveDate::from_ymd_opt(2026, 8, 15).unwrap(),
            renewals: RenewalCount::default(),
        };

        let json = serde_json::to_value(&loan).unwrap();
        assert_eq!(json["code"], "ISBN-0001");
        assert_eq!(json["userId"], "u-1");
        assert_eq!(json["dueDate"], "2026-08-15");
        assert_eq!(json["renewals"], 0);
    }

    #[test]
    fn test_book_file_schema_round_trip() {
        let book = Book {
            code: BookCode::from("ISBN-0002"),
            title: "Cien años de soledad".to_string(),
            available: true,
        };

        let json = serde_json::to_string(&book).unwrap();
        let back: Book = serde_json::from_str(&json).unwrap();
        assert_eq!(back, book);
    }
}
