//! In-memory fakes for testing.
//!
//! [`InMemoryRepository`] behaves like a backend table including its change
//! feed: every write is echoed to subscribers, so views see their own
//! writes arrive through the subscription exactly as they do in production.

mod auth;
mod repository;

pub use auth::MockAuthProvider;
pub use repository::{InMemoryRepository, InMemoryTable};
