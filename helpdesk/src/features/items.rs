//! Items view: a live list of free-text rows with debounced editing.
//!
//! Typing into an item updates it locally at once; the backend write is
//! issued after the edit has been quiet for the configured delay. Until
//! then the local text wins over updates arriving on the feed. A failed
//! write leaves the item unsaved, so the next edit tries again.
//!
//! Changes received during the initial fetch are replayed over the fetched
//! list once it arrives.

use crate::domain::{Item, RecordId};
use crate::error::StoreError;
use crate::repository::{Repository, Table};
use crate::service::ItemService;
use futures::StreamExt;
use helpdesk_core::effect::{Effect, EffectId};
use helpdesk_core::reducer::Reducer;
use helpdesk_core::{reconcile, smallvec, Change, SmallVec};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Effect id of the items change feed
pub const FEED: &str = "items-feed";

/// Effect id of the pending save for `id`
#[must_use]
pub fn save_id(id: &RecordId) -> EffectId {
    EffectId::scoped("item-save", id)
}

/// State of the items view
#[derive(Clone, Debug, Default)]
pub struct ItemsState {
    /// Local list, oldest first
    pub items: Vec<Item>,
    /// Text of the item being added
    pub draft: String,
    /// Create request in flight
    pub creating: bool,
    /// Initial fetch in flight
    pub loading: bool,
    /// Changes received while the fetch is in flight
    pub buffered: Vec<Change<Item>>,
    /// Change feed delivering
    pub live: bool,
    /// Items edited locally and not yet written
    pub unsaved: HashSet<RecordId>,
    /// Last failure, shown inline
    pub error: Option<String>,
}

impl ItemsState {
    /// Item by id
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&Item> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Apply one feed change; local text wins over remote updates
    fn apply(&mut self, change: Change<Item>) {
        match &change {
            Change::Updated(item) if self.unsaved.contains(&item.id) => {
                tracing::debug!(id = %item.id, "Ignoring remote update over a local edit");
                return;
            },
            Change::Deleted(id) => {
                self.unsaved.remove(id);
            },
            _ => {},
        }
        let outcome = reconcile(&mut self.items, change, Item::ORDER);
        tracing::trace!(?outcome, "Applied item change");
    }
}

/// Actions of the items view
#[derive(Clone, Debug)]
pub enum ItemsAction {
    // Lifecycle
    /// Fetch the full list
    Load,
    /// Full list arrived
    Loaded(Result<Vec<Item>, StoreError>),
    /// Start the change feed, replacing a running one
    Subscribe,
    /// The feed is delivering
    Subscribed,
    /// The feed could not be set up
    SubscriptionFailed(StoreError),
    /// Stop the change feed
    Unsubscribe,
    /// One change from the feed
    ChangeReceived(Change<Item>),
    /// The feed closed on the far side
    FeedEnded,

    // Create
    /// Replace the new-item text
    SetDraft(String),
    /// Store the draft as a new item
    Create,
    /// Create finished
    Created(Result<Item, StoreError>),

    // Edit
    /// The user changed an item's text
    Edit {
        /// Item being edited
        id: RecordId,
        /// Full new text
        value: String,
    },
    /// Write the current local text of an item
    Save(RecordId),
    /// Save finished
    Saved(RecordId, Result<Item, StoreError>),

    // Delete
    /// Delete an item
    Delete(RecordId),
    /// Delete finished
    Deleted(RecordId, Result<(), StoreError>),
}

/// Environment of the items view
pub struct ItemsEnvironment<R> {
    /// Item service
    pub items: Arc<ItemService<R>>,
    /// Quiet time before an edit is written
    pub edit_debounce: Duration,
}

impl<R> ItemsEnvironment<R> {
    /// Creates a new `ItemsEnvironment`
    #[must_use]
    pub const fn new(items: Arc<ItemService<R>>, edit_debounce: Duration) -> Self {
        Self {
            items,
            edit_debounce,
        }
    }
}

impl<R> Clone for ItemsEnvironment<R> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            edit_debounce: self.edit_debounce,
        }
    }
}

/// Reducer of the items view
pub struct ItemsReducer<R> {
    repository: PhantomData<fn() -> R>,
}

impl<R> ItemsReducer<R> {
    /// Creates a new `ItemsReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            repository: PhantomData,
        }
    }
}

impl<R> Default for ItemsReducer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for ItemsReducer<R> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for ItemsReducer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ItemsReducer")
    }
}

impl<R: Repository<Item> + 'static> ItemsReducer<R> {
    fn feed(service: Arc<ItemService<R>>) -> Effect<ItemsAction> {
        let actions = async_stream::stream! {
            match service.subscribe_to_items().await {
                Ok(mut feed) => {
                    yield ItemsAction::Subscribed;
                    while let Some(change) = feed.next().await {
                        yield ItemsAction::ChangeReceived(change);
                    }
                    yield ItemsAction::FeedEnded;
                },
                Err(error) => yield ItemsAction::SubscriptionFailed(error),
            }
        };
        Effect::cancellable(EffectId::new(FEED), Effect::Stream(Box::pin(actions)))
    }
}

impl<R: Repository<Item> + 'static> Reducer for ItemsReducer<R> {
    type State = ItemsState;
    type Action = ItemsAction;
    type Environment = ItemsEnvironment<R>;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Lifecycle ==========
            ItemsAction::Load => {
                state.loading = true;
                state.buffered.clear();
                let service = Arc::clone(&env.items);
                smallvec![Effect::future(async move {
                    Some(ItemsAction::Loaded(service.get_items().await))
                })]
            },

            ItemsAction::Loaded(Ok(items)) => {
                state.loading = false;
                // Keep text the user is still typing
                let edits: Vec<Item> = state
                    .items
                    .iter()
                    .filter(|item| state.unsaved.contains(&item.id))
                    .cloned()
                    .collect();
                state.items = items;
                for change in std::mem::take(&mut state.buffered) {
                    state.apply(change);
                }
                for edit in edits {
                    if let Some(item) = state.items.iter_mut().find(|item| item.id == edit.id) {
                        *item = edit;
                    }
                }
                smallvec![Effect::None]
            },

            ItemsAction::Loaded(Err(error)) => {
                tracing::warn!(%error, "Loading items failed");
                state.loading = false;
                state.buffered.clear();
                state.error = Some(error.to_string());
                smallvec![Effect::None]
            },

            ItemsAction::Subscribe => smallvec![Self::feed(Arc::clone(&env.items))],

            ItemsAction::Subscribed => {
                state.live = true;
                smallvec![Effect::None]
            },

            ItemsAction::SubscriptionFailed(error) => {
                tracing::warn!(%error, "Items feed unavailable");
                state.live = false;
                state.error = Some(error.to_string());
                smallvec![Effect::None]
            },

            ItemsAction::Unsubscribe => {
                state.live = false;
                smallvec![Effect::Cancel(EffectId::new(FEED))]
            },

            ItemsAction::ChangeReceived(change) => {
                if state.loading {
                    state.buffered.push(change.clone());
                }
                state.apply(change);
                smallvec![Effect::None]
            },

            ItemsAction::FeedEnded => {
                tracing::info!("Items feed closed");
                state.live = false;
                smallvec![Effect::None]
            },

            // ========== Create ==========
            ItemsAction::SetDraft(value) => {
                state.draft = value;
                smallvec![Effect::None]
            },

            ItemsAction::Create => {
                let value = state.draft.trim().to_string();
                if value.is_empty() || state.creating {
                    return smallvec![Effect::None];
                }
                state.creating = true;
                state.error = None;

                let service = Arc::clone(&env.items);
                smallvec![Effect::future(async move {
                    Some(ItemsAction::Created(service.create_item(value).await))
                })]
            },

            ItemsAction::Created(result) => {
                state.creating = false;
                match result {
                    // The row arrives through the feed
                    Ok(_) => state.draft.clear(),
                    Err(error) => state.error = Some(error.to_string()),
                }
                smallvec![Effect::None]
            },

            // ========== Edit ==========
            ItemsAction::Edit { id, value } => {
                let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
                    return smallvec![Effect::None];
                };
                item.value = value;
                state.unsaved.insert(id.clone());
                smallvec![Effect::debounce(save_id(&id), env.edit_debounce, ItemsAction::Save(id))]
            },

            ItemsAction::Save(id) => {
                let Some(value) = state.get(&id).map(|item| item.value.clone()) else {
                    state.unsaved.remove(&id);
                    return smallvec![Effect::None];
                };
                state.unsaved.remove(&id);

                let service = Arc::clone(&env.items);
                smallvec![Effect::future(async move {
                    let result = service.update_item(&id, value).await;
                    Some(ItemsAction::Saved(id, result))
                })]
            },

            ItemsAction::Saved(id, result) => {
                if let Err(error) = result {
                    tracing::warn!(%id, %error, "Saving item failed");
                    state.error = Some(error.to_string());
                    // The local text was never written
                    if state.get(&id).is_some() {
                        state.unsaved.insert(id);
                    }
                }
                smallvec![Effect::None]
            },

            // ========== Delete ==========
            ItemsAction::Delete(id) => {
                state.unsaved.remove(&id);
                state.error = None;

                let service = Arc::clone(&env.items);
                let cancel = Effect::Cancel(save_id(&id));
                smallvec![
                    cancel,
                    Effect::future(async move {
                        let result = service.delete_item(&id).await;
                        Some(ItemsAction::Deleted(id, result))
                    })
                ]
            },

            ItemsAction::Deleted(id, result) => {
                if let Err(error) = result {
                    tracing::warn!(%id, %error, "Deleting item failed");
                    state.error = Some(error.to_string());
                }
                smallvec![Effect::None]
            },
        }
    }
}
