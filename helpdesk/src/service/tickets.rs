//! Ticket service.

use crate::domain::{RecordId, Ticket, TicketDraft, TicketPatch};
use crate::error::{StoreError, ValidationErrors};
use crate::repository::Repository;
use helpdesk_core::Subscription;

/// Result of a create request that reached the service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TicketCreation {
    /// Stored; carries the row with backend-assigned fields
    Created(Ticket),
    /// Not sent to the backend; carries every failed rule
    Rejected(ValidationErrors),
}

/// Tickets over any [`Repository`].
#[derive(Debug, Clone)]
pub struct TicketService<R> {
    repository: R,
}

impl<R: Repository<Ticket>> TicketService<R> {
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

    /// Validate `draft` and store it.
    ///
    /// Invalid input is returned as [`TicketCreation::Rejected`] without
    /// calling the backend.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    pub async fn create_ticket(&self, draft: &TicketDraft) -> Result<TicketCreation, StoreError> {
        let new = match draft.validate() {
            Ok(new) => new,
            Err(errors) => {
                tracing::debug!(errors = %errors, "Ticket rejected by validation");
                return Ok(TicketCreation::Rejected(errors));
            },
        };
        self.repository.create(&new).await.map(TicketCreation::Created)
    }

    /// Every ticket, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn get_all_tickets(&self) -> Result<Vec<Ticket>, StoreError> {
        self.repository.get_all().await
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn update(&self, id: &RecordId, patch: &TicketPatch) -> Result<Ticket, StoreError> {
        self.repository.update(id, patch).await
    }

    /// Delete a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    pub async fn delete_ticket(&self, id: &RecordId) -> Result<(), StoreError> {
        self.repository.delete(id).await
    }

    /// Receive every change to the tickets table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Subscription`] if the feed cannot be set up.
    pub async fn subscribe_to_tickets(&self) -> Result<Subscription<Ticket>, StoreError> {
        self.repository.subscribe_to_changes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::validation::{EMAIL_INVALID, NAME_REQUIRED};
    use crate::domain::TicketStatus;
    use crate::mocks::InMemoryRepository;

    fn service() -> TicketService<InMemoryRepository<Ticket>> {
        TicketService::new(InMemoryRepository::new())
    }

    #[tokio::test]
    async fn invalid_draft_never_reaches_the_backend() {
        let service = service();
        let draft = TicketDraft::new("", "not-an-email", "black");

        let Ok(TicketCreation::Rejected(errors)) = service.create_ticket(&draft).await else {
            unreachable!("draft is invalid");
        };
        assert_eq!(errors.messages(), [NAME_REQUIRED, EMAIL_INVALID]);
        assert_eq!(service.repository().calls("create"), 0);
    }

    #[tokio::test]
    async fn valid_draft_is_stored_with_backend_defaults() {
        let service = service();
        let draft = TicketDraft::new("John", "john@x.com", "black");

        let Ok(TicketCreation::Created(ticket)) = service.create_ticket(&draft).await else {
            unreachable!("draft is valid");
        };
        assert_eq!(ticket.status, TicketStatus::OrderReceived);
        assert!(ticket.order_number.is_some());
        assert_eq!(service.repository().calls("create"), 1);
    }

    #[tokio::test]
    async fn other_operations_pass_through() {
        let service = service();
        let Ok(TicketCreation::Created(ticket)) = service
            .create_ticket(&TicketDraft::new("John", "john@x.com", "black"))
            .await
        else {
            unreachable!("draft is valid");
        };

        let moved = service
            .update(&ticket.id, &TicketPatch::status(TicketStatus::InProgress))
            .await;
        assert_eq!(moved.map(|t| t.status), Ok(TicketStatus::InProgress));

        assert_eq!(service.delete_ticket(&ticket.id).await, Ok(()));
        assert_eq!(service.get_all_tickets().await, Ok(Vec::new()));
        assert_eq!(
            service.update(&ticket.id, &TicketPatch::default()).await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn store_failures_surface_as_errors() {
        let service = service();
        service.repository().fail_next(StoreError::Request("offline".to_string()));

        let result = service
            .create_ticket(&TicketDraft::new("John", "john@x.com", "black"))
            .await;
        assert_eq!(result, Err(StoreError::Request("offline".to_string())));
    }
}
