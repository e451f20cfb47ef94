//! Feature reducers: the state machines behind each view.
//!
//! Each feature has its own state, action, environment and reducer, and runs
//! in its own [`helpdesk_runtime::Store`]. Nothing here performs I/O directly;
//! backend calls and change feeds are returned as effects.

pub mod items;
pub mod session;
pub mod tickets;

pub use items::{ItemsAction, ItemsEnvironment, ItemsReducer, ItemsState};
pub use session::{SessionAction, SessionEnvironment, SessionReducer, SessionState};
pub use tickets::{FormField, TicketsAction, TicketsEnvironment, TicketsReducer, TicketsState};
