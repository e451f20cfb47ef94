//! # Helpdesk
//!
//! Client for a small helpdesk backed by a hosted table store with a
//! realtime change feed. Users sign in by emailed one-time link (or
//! password), then manage coating tickets on a kanban board and a list of
//! free-text items. Every list is kept in sync by the change feed rather
//! than by refetching.
//!
//! ## Layers
//!
//! - [`domain`]: tickets, items, ticket validation
//! - [`repository`]: the [`repository::Repository`] contract and its
//!   backend implementation
//! - [`service`]: ticket, item and auth services over those contracts
//! - [`features`]: reducers for the session, tickets and items views
//! - [`shell`]: the terminal front end wiring the views to stores
//! - `mocks` (feature `test-utils`): in-memory repository and auth fakes
//!
//! ## Example
//!
//! ```ignore
//! let tickets = TicketService::new(InMemoryRepository::<Ticket>::new());
//! let store = Store::new(
//!     TicketsState::default(),
//!     TicketsReducer::new(),
//!     TicketsEnvironment::new(Arc::new(tickets)),
//! );
//! store.send(TicketsAction::Subscribe).await?;
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod features;
pub mod repository;
pub mod service;
pub mod shell;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use config::Config;
pub use domain::{
    CoatingFinish, Item, NewItem, NewTicket, RecordId, Ticket, TicketDraft, TicketPatch,
    TicketStatus,
};
pub use error::{AuthError, ConfigError, StoreError, ValidationErrors};
pub use repository::{Repository, SupabaseRepository, Table};
pub use service::{AuthProvider, ItemService, SupabaseAuth, TicketCreation, TicketService};
pub use helpdesk_supabase::User;
