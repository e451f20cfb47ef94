//! # Helpdesk Supabase
//!
//! Client for the hosted backend the helpdesk runs on: table access over
//! the REST service, email auth, and the realtime change feed.
//!
//! ## Example
//!
//! ```no_run
//! use helpdesk_supabase::{
//!     AuthClient, MemorySessionStorage, RealtimeClient, SupabaseClient, SupabaseConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), helpdesk_supabase::SupabaseError> {
//! let client = SupabaseClient::new(SupabaseConfig::new("https://abc.supabase.co", "anon-key"));
//!
//! let auth = AuthClient::new(client.clone(), Arc::new(MemorySessionStorage::new()));
//! auth.sign_in_with_password("ops@example.com", "secret").await?;
//!
//! let rows: Vec<serde_json::Value> = client.select_all("tickets", "created_at", false).await?;
//! println!("{} tickets", rows.len());
//!
//! let feed = RealtimeClient::new(client).subscribe("tickets-changes", "tickets").await?;
//! # drop(feed);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod realtime;

// Re-export main types for convenience
pub use auth::{
    AuthClient, FileSessionStorage, MemorySessionStorage, Session, SessionStorage, SignUp, User,
};
pub use client::SupabaseClient;
pub use config::SupabaseConfig;
pub use error::SupabaseError;
pub use realtime::{ChangeStream, PostgresChange, RealtimeClient, RealtimeSubscription};
