//! Tickets view: list, create form, kanban board, live updates.
//!
//! The list is only ever changed by the change feed. Creating, moving and
//! deleting a ticket issue the backend call and wait for the feed's echo,
//! so the local list and the table cannot drift apart.
//!
//! Changes that arrive while the initial fetch is in flight are applied and
//! also kept aside, then replayed over the fetched list, so a fetch that
//! started before a change cannot erase it.

use crate::domain::{RecordId, Ticket, TicketDraft, TicketPatch, TicketStatus};
use crate::error::{StoreError, ValidationErrors};
use crate::repository::{Repository, Table};
use crate::service::{TicketCreation, TicketService};
use futures::StreamExt;
use helpdesk_core::effect::{Effect, EffectId};
use helpdesk_core::reducer::Reducer;
use helpdesk_core::{reconcile, smallvec, Change, SmallVec};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// Effect id of the tickets change feed
pub const FEED: &str = "tickets-feed";

/// Kanban error for an id that is not on the board
pub const NOT_FOUND: &str = "Ticket not found";

/// Kanban error for advancing a completed ticket
pub const ALREADY_FINAL: &str = "Ticket is already in final status";

/// A field of the create form
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormField {
    /// Customer name
    CustomerName,
    /// Customer email
    CustomerEmail,
    /// Coating color
    CoatingColor,
    /// Coating finish
    CoatingFinish,
}

/// State of the tickets view
#[derive(Clone, Debug, Default)]
pub struct TicketsState {
    /// Local list, newest first
    pub tickets: Vec<Ticket>,
    /// Initial fetch in flight
    pub loading: bool,
    /// Changes received while the fetch is in flight
    pub buffered: Vec<Change<Ticket>>,
    /// Change feed delivering
    pub live: bool,
    /// Create form input
    pub form: TicketDraft,
    /// Why the last submission was rejected
    pub form_errors: ValidationErrors,
    /// Create request in flight
    pub submitting: bool,
    /// Tickets with a move or delete in flight
    pub pending: HashSet<RecordId>,
    /// Last failure, shown inline
    pub error: Option<String>,
}

impl TicketsState {
    /// Ticket by id
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&Ticket> {
        self.tickets.iter().find(|t| &t.id == id)
    }

    /// Tickets grouped by stage, in board order; empty stages included
    #[must_use]
    pub fn board(&self) -> Vec<(TicketStatus, Vec<&Ticket>)> {
        TicketStatus::ALL
            .into_iter()
            .map(|status| {
                let column = self.tickets.iter().filter(|t| t.status == status).collect();
                (status, column)
            })
            .collect()
    }
}

/// Actions of the tickets view
#[derive(Clone, Debug)]
pub enum TicketsAction {
    // Lifecycle
    /// Fetch the full list
    Load,
    /// Full list arrived
    Loaded(Result<Vec<Ticket>, StoreError>),
    /// Start the change feed, replacing a running one
    Subscribe,
    /// The feed is delivering
    Subscribed,
    /// The feed could not be set up
    SubscriptionFailed(StoreError),
    /// Stop the change feed
    Unsubscribe,
    /// One change from the feed
    ChangeReceived(Change<Ticket>),
    /// The feed closed on the far side
    FeedEnded,

    // Create form
    /// Edit one form field
    EditForm(FormField, String),
    /// Replace the whole form
    FillForm(TicketDraft),
    /// Submit the form
    Submit,
    /// Create finished
    Submitted(Result<TicketCreation, StoreError>),

    // Board
    /// Advance a ticket one stage
    MoveToNextStage(RecordId),
    /// Put a ticket into a stage
    MoveToStatus(RecordId, TicketStatus),
    /// Move finished
    Moved(RecordId, Result<Ticket, StoreError>),
    /// Delete a ticket
    Delete(RecordId),
    /// Delete finished
    Deleted(RecordId, Result<(), StoreError>),
    /// Clear the inline error
    DismissError,
}

/// Environment of the tickets view
pub struct TicketsEnvironment<R> {
    /// Ticket service
    pub tickets: Arc<TicketService<R>>,
}

impl<R> TicketsEnvironment<R> {
    /// Creates a new `TicketsEnvironment`
    #[must_use]
    pub const fn new(tickets: Arc<TicketService<R>>) -> Self {
        Self { tickets }
    }
}

impl<R> Clone for TicketsEnvironment<R> {
    fn clone(&self) -> Self {
        Self {
            tickets: Arc::clone(&self.tickets),
        }
    }
}

/// Reducer of the tickets view
pub struct TicketsReducer<R> {
    repository: PhantomData<fn() -> R>,
}

impl<R> TicketsReducer<R> {
    /// Creates a new `TicketsReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            repository: PhantomData,
        }
    }
}

impl<R> Default for TicketsReducer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for TicketsReducer<R> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for TicketsReducer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TicketsReducer")
    }
}

impl<R: Repository<Ticket> + 'static> TicketsReducer<R> {
    /// Feed effect: subscribe, then forward every change until cancelled
    fn feed(service: Arc<TicketService<R>>) -> Effect<TicketsAction> {
        let actions = async_stream::stream! {
            match service.subscribe_to_tickets().await {
                Ok(mut feed) => {
                    yield TicketsAction::Subscribed;
                    while let Some(change) = feed.next().await {
                        yield TicketsAction::ChangeReceived(change);
                    }
                    yield TicketsAction::FeedEnded;
                },
                Err(error) => yield TicketsAction::SubscriptionFailed(error),
            }
        };
        Effect::cancellable(EffectId::new(FEED), Effect::Stream(Box::pin(actions)))
    }

    /// Move effect with pending marker
    fn move_to(
        state: &mut TicketsState,
        env: &TicketsEnvironment<R>,
        id: RecordId,
        status: TicketStatus,
    ) -> SmallVec<[Effect<TicketsAction>; 4]> {
        state.error = None;
        state.pending.insert(id.clone());

        let service = Arc::clone(&env.tickets);
        smallvec![Effect::future(async move {
            let result = service.update(&id, &TicketPatch::status(status)).await;
            Some(TicketsAction::Moved(id, result))
        })]
    }
}

impl<R: Repository<Ticket> + 'static> Reducer for TicketsReducer<R> {
    type State = TicketsState;
    type Action = TicketsAction;
    type Environment = TicketsEnvironment<R>;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Lifecycle ==========
            TicketsAction::Load => {
                state.loading = true;
                state.buffered.clear();
                let service = Arc::clone(&env.tickets);
                smallvec![Effect::future(async move {
                    Some(TicketsAction::Loaded(service.get_all_tickets().await))
                })]
            },

            TicketsAction::Loaded(Ok(tickets)) => {
                state.loading = false;
                state.tickets = tickets;
                let buffered = std::mem::take(&mut state.buffered);
                if !buffered.is_empty() {
                    tracing::debug!(count = buffered.len(), "Replaying changes from during load");
                }
                for change in buffered {
                    reconcile(&mut state.tickets, change, Ticket::ORDER);
                }
                smallvec![Effect::None]
            },

            TicketsAction::Loaded(Err(error)) => {
                tracing::warn!(%error, "Loading tickets failed");
                state.loading = false;
                state.buffered.clear();
                state.error = Some(error.to_string());
                smallvec![Effect::None]
            },

            TicketsAction::Subscribe => smallvec![Self::feed(Arc::clone(&env.tickets))],

            TicketsAction::Subscribed => {
                state.live = true;
                smallvec![Effect::None]
            },

            TicketsAction::SubscriptionFailed(error) => {
                tracing::warn!(%error, "Tickets feed unavailable");
                state.live = false;
                state.error = Some(error.to_string());
                smallvec![Effect::None]
            },

            TicketsAction::Unsubscribe => {
                state.live = false;
                smallvec![Effect::Cancel(EffectId::new(FEED))]
            },

            TicketsAction::ChangeReceived(change) => {
                if state.loading {
                    state.buffered.push(change.clone());
                }
                let outcome = reconcile(&mut state.tickets, change, Ticket::ORDER);
                tracing::trace!(?outcome, "Applied ticket change");
                smallvec![Effect::None]
            },

            TicketsAction::FeedEnded => {
                tracing::info!("Tickets feed closed");
                state.live = false;
                smallvec![Effect::None]
            },

            // ========== Create form ==========
            TicketsAction::EditForm(field, value) => {
                let slot = match field {
                    FormField::CustomerName => &mut state.form.customer_name,
                    FormField::CustomerEmail => &mut state.form.customer_email,
                    FormField::CoatingColor => &mut state.form.coating_color,
                    FormField::CoatingFinish => &mut state.form.coating_finish,
                };
                *slot = Some(value);
                smallvec![Effect::None]
            },

            TicketsAction::FillForm(draft) => {
                state.form = draft;
                state.form_errors = ValidationErrors::new();
                smallvec![Effect::None]
            },

            TicketsAction::Submit => {
                if state.submitting {
                    return smallvec![Effect::None];
                }
                if let Err(errors) = state.form.validate() {
                    state.form_errors = errors;
                    return smallvec![Effect::None];
                }

                state.form_errors = ValidationErrors::new();
                state.error = None;
                state.submitting = true;

                let service = Arc::clone(&env.tickets);
                let draft = state.form.clone();
                smallvec![Effect::future(async move {
                    Some(TicketsAction::Submitted(service.create_ticket(&draft).await))
                })]
            },

            TicketsAction::Submitted(result) => {
                state.submitting = false;
                match result {
                    // The row arrives through the feed
                    Ok(TicketCreation::Created(ticket)) => {
                        tracing::info!(id = %ticket.id, "Ticket created");
                        state.form = TicketDraft::default();
                    },
                    Ok(TicketCreation::Rejected(errors)) => state.form_errors = errors,
                    Err(error) => state.error = Some(error.to_string()),
                }
                smallvec![Effect::None]
            },

            // ========== Board ==========
            TicketsAction::MoveToNextStage(id) => {
                if state.pending.contains(&id) {
                    return smallvec![Effect::None];
                }
                let Some(ticket) = state.get(&id) else {
                    state.error = Some(NOT_FOUND.to_string());
                    return smallvec![Effect::None];
                };
                let Some(next) = ticket.status.next() else {
                    state.error = Some(ALREADY_FINAL.to_string());
                    return smallvec![Effect::None];
                };
                Self::move_to(state, env, id, next)
            },

            TicketsAction::MoveToStatus(id, status) => {
                if state.pending.contains(&id) {
                    return smallvec![Effect::None];
                }
                if state.get(&id).is_none() {
                    state.error = Some(NOT_FOUND.to_string());
                    return smallvec![Effect::None];
                }
                Self::move_to(state, env, id, status)
            },

            TicketsAction::Moved(id, result) => {
                state.pending.remove(&id);
                if let Err(error) = result {
                    tracing::warn!(%id, %error, "Moving ticket failed");
                    state.error = Some(error.to_string());
                }
                smallvec![Effect::None]
            },

            TicketsAction::Delete(id) => {
                if !state.pending.insert(id.clone()) {
                    return smallvec![Effect::None];
                }
                state.error = None;

                let service = Arc::clone(&env.tickets);
                smallvec![Effect::future(async move {
                    let result = service.delete_ticket(&id).await;
                    Some(TicketsAction::Deleted(id, result))
                })]
            },

            TicketsAction::Deleted(id, result) => {
                state.pending.remove(&id);
                if let Err(error) = result {
                    tracing::warn!(%id, %error, "Deleting ticket failed");
                    state.error = Some(error.to_string());
                }
                smallvec![Effect::None]
            },

            TicketsAction::DismissError => {
                state.error = None;
                smallvec![Effect::None]
            },
        }
    }
}
