//! Table access.
//!
//! [`Repository`] is the contract the services depend on: plain CRUD on one
//! table plus its change feed. [`SupabaseRepository`] talks to the hosted
//! backend; tests use the in-memory fake from [`crate::mocks`].

use crate::domain::{Item, ItemPatch, NewItem, NewTicket, RecordId, Ticket, TicketPatch};
use crate::error::StoreError;
use helpdesk_core::{ListOrder, Record, Subscription};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;

pub mod supabase;

pub use supabase::{decode_change, SupabaseRepository};

/// A backend table holding records of `Self`.
pub trait Table: Record<Id = RecordId> + Serialize + DeserializeOwned + Debug {
    /// Table name
    const NAME: &'static str;

    /// Realtime channel the change feed joins
    const CHANNEL: &'static str;

    /// Order of the local list; the full fetch sorts to match
    const ORDER: ListOrder;

    /// Insert payload
    type New: Serialize + Clone + Debug + Send + Sync + 'static;

    /// Update payload
    type Patch: Serialize + Clone + Debug + Send + Sync + 'static;
}

/// Record storage for one table.
///
/// Implementations are shared between concurrently running effects, so
/// every future must be `Send`.
pub trait Repository<T: Table>: Send + Sync {
    /// Insert a row and return it as stored, with backend-assigned fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    fn create(&self, new: &T::New) -> impl Future<Output = Result<T, StoreError>> + Send;

    /// Every row, in [`Table::ORDER`]. An empty table is an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn get_all(&self) -> impl Future<Output = Result<Vec<T>, StoreError>> + Send;

    /// Apply a partial update and return the row as stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no row has `id`, or another
    /// [`StoreError`] if the update fails.
    fn update(
        &self,
        id: &RecordId,
        patch: &T::Patch,
    ) -> impl Future<Output = Result<T, StoreError>> + Send;

    /// Delete a row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    fn delete(&self, id: &RecordId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Start receiving a change event for every insert, update and delete on
    /// the table, whoever made it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Subscription`] if the feed cannot be set up.
    fn subscribe_to_changes(
        &self,
    ) -> impl Future<Output = Result<Subscription<T>, StoreError>> + Send;
}

impl Record for Ticket {
    type Id = RecordId;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

impl Table for Ticket {
    const NAME: &'static str = "tickets";
    const CHANNEL: &'static str = "tickets-changes";
    const ORDER: ListOrder = ListOrder::NewestFirst;

    type New = NewTicket;
    type Patch = TicketPatch;
}

impl Record for Item {
    type Id = RecordId;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

impl Table for Item {
    const NAME: &'static str = "items";
    const CHANNEL: &'static str = "items-changes";
    const ORDER: ListOrder = ListOrder::OldestFirst;

    type New = NewItem;
    type Patch = ItemPatch;
}
