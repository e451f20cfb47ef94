//! In-memory table with a change feed.

use crate::domain::{
    Item, ItemPatch, NewItem, NewTicket, RecordId, Ticket, TicketPatch, TicketStatus,
};
use crate::error::StoreError;
use crate::repository::{Repository, Table};
use chrono::{DateTime, Utc};
use helpdesk_core::environment::{Clock, SystemClock};
use helpdesk_core::{reconcile, Change, ListOrder, Subscription};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

/// How the fake fills in what the backend would assign.
pub trait InMemoryTable: Table {
    /// Build the stored row for an insert
    fn materialize(sequence: u64, new: &Self::New, now: DateTime<Utc>) -> Self;

    /// Apply an update payload
    fn apply(&mut self, patch: &Self::Patch, now: DateTime<Utc>);
}

impl InMemoryTable for Ticket {
    fn materialize(sequence: u64, new: &NewTicket, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(uuid::Uuid::new_v4().to_string()),
            order_number: Some(format!("CK-{sequence:04}")),
            customer_name: new.customer_name.clone(),
            customer_email: new.customer_email.clone(),
            coating_color: new.coating_color.clone(),
            coating_finish: new.coating_finish.unwrap_or_default(),
            status: TicketStatus::default(),
            date_received: Some(now.date_naive().to_string()),
            last_updated: Some(now),
            created_at: now,
        }
    }

    fn apply(&mut self, patch: &TicketPatch, now: DateTime<Utc>) {
        patch.apply_to(self);
        self.last_updated = Some(now);
    }
}

impl InMemoryTable for Item {
    fn materialize(sequence: u64, new: &NewItem, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(sequence.to_string()),
            value: new.value.clone(),
            created_at: now,
        }
    }

    fn apply(&mut self, patch: &ItemPatch, _now: DateTime<Utc>) {
        self.value.clone_from(&patch.value);
    }
}

struct Inner<T: Table> {
    /// Rows in insertion order
    rows: Mutex<Vec<T>>,
    changes: broadcast::Sender<Change<T>>,
    failures: Mutex<VecDeque<StoreError>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    sequence: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl<T: InMemoryTable> Inner<T> {
    /// Count the call and pop an injected failure, if any
    fn begin(&self, operation: &'static str) -> Result<(), StoreError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(operation)
            .or_default() += 1;
        match self.failures.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, change: Change<T>) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }

    fn create(&self, new: &T::New) -> Result<T, StoreError> {
        self.begin("create")?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let row = T::materialize(sequence, new, self.clock.now());
        self.rows().push(row.clone());
        self.publish(Change::Inserted(row.clone()));
        Ok(row)
    }

    fn get_all(&self) -> Result<Vec<T>, StoreError> {
        self.begin("get_all")?;
        let mut rows = self.rows().clone();
        if T::ORDER == ListOrder::NewestFirst {
            rows.reverse();
        }
        Ok(rows)
    }

    fn update(&self, id: &RecordId, patch: &T::Patch) -> Result<T, StoreError> {
        self.begin("update")?;
        let updated = {
            let mut rows = self.rows();
            let row = rows
                .iter_mut()
                .find(|row| row.id() == id)
                .ok_or(StoreError::NotFound)?;
            row.apply(patch, self.clock.now());
            row.clone()
        };
        self.publish(Change::Updated(updated.clone()));
        Ok(updated)
    }

    fn delete(&self, id: &RecordId) -> Result<(), StoreError> {
        self.begin("delete")?;
        let removed = {
            let mut rows = self.rows();
            let before = rows.len();
            rows.retain(|row| row.id() != id);
            rows.len() != before
        };
        if removed {
            self.publish(Change::Deleted(id.clone()));
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<Subscription<T>, StoreError> {
        self.begin("subscribe")?;
        let mut receiver = self.changes.subscribe();
        let changes = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(change) => yield change,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(table = T::NAME, skipped, "Change feed lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Subscription::new(T::CHANNEL, changes, || {}))
    }
}

/// In-memory [`Repository`].
///
/// Assigns ids and defaults the way the backend does, echoes every write on
/// the change feed, counts calls per operation, and can be told to fail the
/// next call.
pub struct InMemoryRepository<T: Table> {
    inner: Arc<Inner<T>>,
}

impl<T: InMemoryTable> InMemoryRepository<T> {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty table whose timestamps come from `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                rows: Mutex::new(Vec::new()),
                changes,
                failures: Mutex::new(VecDeque::new()),
                calls: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(0),
                clock,
            }),
        }
    }

    /// Store rows without announcing them, as if they predate the feed
    pub fn seed(&self, rows: impl IntoIterator<Item = T>) {
        self.inner.rows().extend(rows);
    }

    /// Apply and announce a change made by some other writer
    pub fn emit(&self, change: Change<T>) {
        reconcile(&mut self.inner.rows(), change.clone(), ListOrder::OldestFirst);
        self.inner.publish(change);
    }

    /// Make the next call fail with `error`
    pub fn fail_next(&self, error: StoreError) {
        self.inner
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// How many times `operation` was called (`create`, `get_all`,
    /// `update`, `delete` or `subscribe`)
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Number of live change-feed subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.changes.receiver_count()
    }

    /// Snapshot of the stored rows in insertion order
    #[must_use]
    pub fn rows(&self) -> Vec<T> {
        self.inner.rows().clone()
    }
}

impl<T: InMemoryTable> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Table> Clone for InMemoryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Table> std::fmt::Debug for InMemoryRepository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("table", &T::NAME)
            .finish_non_exhaustive()
    }
}

impl<T: InMemoryTable> Repository<T> for InMemoryRepository<T> {
    fn create(&self, new: &T::New) -> impl Future<Output = Result<T, StoreError>> + Send {
        let inner = Arc::clone(&self.inner);
        let new = new.clone();

        async move { inner.create(&new) }
    }

    fn get_all(&self) -> impl Future<Output = Result<Vec<T>, StoreError>> + Send {
        let inner = Arc::clone(&self.inner);

        async move { inner.get_all() }
    }

    fn update(
        &self,
        id: &RecordId,
        patch: &T::Patch,
    ) -> impl Future<Output = Result<T, StoreError>> + Send {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        let patch = patch.clone();

        async move { inner.update(&id, &patch) }
    }

    fn delete(&self, id: &RecordId) -> impl Future<Output = Result<(), StoreError>> + Send {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();

        async move { inner.delete(&id) }
    }

    fn subscribe_to_changes(
        &self,
    ) -> impl Future<Output = Result<Subscription<T>, StoreError>> + Send {
        let inner = Arc::clone(&self.inner);

        async move { inner.subscribe() }
    }
}
