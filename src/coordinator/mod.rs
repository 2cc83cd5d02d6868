//! Central coordinator: the entry point of a site.
//!
//! Validates client requests and dispatches them: loans go synchronously to
//! the loan actor and the final outcome travels back to the client;
//! renewals and returns are published to their topics and acknowledged
//! immediately, before any actor processes them.

pub mod modes;
pub mod router;

pub use modes::{Coordinator, run, start};
pub use router::{Routed, Router};
