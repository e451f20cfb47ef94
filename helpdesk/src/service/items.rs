//! Item service.

use crate::domain::{Item, ItemPatch, NewItem, RecordId};
use crate::error::StoreError;
use crate::repository::Repository;
use helpdesk_core::Subscription;

/// Items over any [`Repository`].
#[derive(Debug, Clone)]
pub struct ItemService<R> {
    repository: R,
}

impl<R: Repository<Item>> ItemService<R> {
    /// Create a service over `repository`
    #[must_use]
    pub const fn new(repository: R) -> Self {
        Self { repository }
    }

    /// The underlying repository
    #[must_use]
    pub const fn repository(&self) -> &R {
        &self.repository
    }

    /// Every item, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn get_items(&self) -> Result<Vec<Item>, StoreError> {
        self.repository.get_all().await
    }

    /// Store a new item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    pub async fn create_item(&self, value: impl Into<String>) -> Result<Item, StoreError> {
        let new = NewItem {
            value: value.into(),
        };
        self.repository.create(&new).await
    }

    /// Replace an item's text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn update_item(
        &self,
        id: &RecordId,
        value: impl Into<String>,
    ) -> Result<Item, StoreError> {
        let patch = ItemPatch {
            value: value.into(),
        };
        self.repository.update(id, &patch).await
    }

    /// Delete an item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    pub async fn delete_item(&self, id: &RecordId) -> Result<(), StoreError> {
        self.repository.delete(id).await
    }

    /// Receive every change to the items table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Subscription`] if the feed cannot be set up.
    pub async fn subscribe_to_items(&self) -> Result<Subscription<Item>, StoreError> {
        self.repository.subscribe_to_changes().await
    }
}
