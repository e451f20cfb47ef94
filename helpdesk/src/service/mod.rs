//! Services the views call.
//!
//! Ticket creation is validated before anything reaches the backend; every
//! other operation is handed straight to the repository.

pub mod auth;
pub mod items;
pub mod tickets;

pub use auth::{AuthProvider, SignUpOutcome, SupabaseAuth, CONFIRMATION_SENT};
pub use items::ItemService;
pub use tickets::{TicketCreation, TicketService};
