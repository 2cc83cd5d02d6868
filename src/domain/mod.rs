pub mod dates;
pub mod errors;
pub mod model;
pub mod value_objects;

pub use errors::LoanRuleError;
pub use model::{Book, Loan};
pub use value_objects::{BookCode, OpKind, RenewalCount, RequestId, SiteId, UserId};
