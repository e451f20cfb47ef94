//! [`Repository`] over the hosted backend.

use super::{Repository, Table};
use crate::domain::RecordId;
use crate::error::StoreError;
use futures::StreamExt;
use helpdesk_core::{Change, Subscription};
use helpdesk_runtime::retry::{retry_with_predicate, RetryPolicy};
use helpdesk_supabase::{PostgresChange, RealtimeClient, SupabaseClient, SupabaseError};
use std::future::Future;
use std::marker::PhantomData;

/// Column every list is sorted by
const CREATED_AT: &str = "created_at";

/// Table access through the backend's REST service and realtime feed.
///
/// Holds a handle to the shared client, so the signed-in user's token is
/// used for every call.
pub struct SupabaseRepository<T> {
    client: SupabaseClient,
    realtime: RealtimeClient,
    subscribe_retry: RetryPolicy,
    table: PhantomData<fn() -> T>,
}

impl<T: Table> SupabaseRepository<T> {
    /// Create a repository for `T`'s table
    #[must_use]
    pub fn new(client: SupabaseClient) -> Self {
        Self {
            realtime: RealtimeClient::new(client.clone()),
            client,
            subscribe_retry: RetryPolicy::default(),
            table: PhantomData,
        }
    }

    /// Override how change-feed setup is retried
    #[must_use]
    pub fn with_subscribe_retry(mut self, policy: RetryPolicy) -> Self {
        self.subscribe_retry = policy;
        self
    }
}

impl<T> Clone for SupabaseRepository<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            realtime: self.realtime.clone(),
            subscribe_retry: self.subscribe_retry.clone(),
            table: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for SupabaseRepository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseRepository")
            .field("client", &self.client)
            .field("subscribe_retry", &self.subscribe_retry)
            .finish_non_exhaustive()
    }
}

impl<T: Table> Repository<T> for SupabaseRepository<T> {
    fn create(&self, new: &T::New) -> impl Future<Output = Result<T, StoreError>> + Send {
        async move {
            let row: T = self.client.insert(T::NAME, new).await.map_err(|e| {
                tracing::warn!(table = T::NAME, error = %e, "Insert failed");
                StoreError::from(e)
            })?;
            tracing::debug!(table = T::NAME, id = %row.id(), "Inserted");
            Ok(row)
        }
    }

    fn get_all(&self) -> impl Future<Output = Result<Vec<T>, StoreError>> + Send {
        async move {
            let rows: Vec<T> = self
                .client
                .select_all(T::NAME, CREATED_AT, T::ORDER.ascending())
                .await?;
            tracing::debug!(table = T::NAME, count = rows.len(), "Fetched");
            Ok(rows)
        }
    }

    fn update(
        &self,
        id: &RecordId,
        patch: &T::Patch,
    ) -> impl Future<Output = Result<T, StoreError>> + Send {
        async move {
            let row: T = self.client.update(T::NAME, id.as_str(), patch).await.map_err(|e| {
                tracing::warn!(table = T::NAME, %id, error = %e, "Update failed");
                StoreError::from(e)
            })?;
            Ok(row)
        }
    }

    fn delete(&self, id: &RecordId) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            self.client.delete(T::NAME, id.as_str()).await.map_err(|e| {
                tracing::warn!(table = T::NAME, %id, error = %e, "Delete failed");
                StoreError::from(e)
            })
        }
    }

    fn subscribe_to_changes(
        &self,
    ) -> impl Future<Output = Result<Subscription<T>, StoreError>> + Send {
        async move {
            let feed = retry_with_predicate(
                &self.subscribe_retry,
                "subscribe",
                || self.realtime.subscribe(T::CHANNEL, T::NAME),
                SupabaseError::is_transient,
            )
            .await
            .map_err(|e| StoreError::Subscription(e.to_string()))?;

            tracing::info!(table = T::NAME, channel = T::CHANNEL, "Change feed active");
            let (changes, stop) = feed.into_parts();
            Ok(Subscription::new(
                T::CHANNEL,
                changes.map(decode_change::<T>),
                move || {
                    tracing::info!(channel = T::CHANNEL, "Change feed stopped");
                    let _ = stop.send(());
                },
            ))
        }
    }
}

/// Turn a raw feed event into a typed [`Change`].
///
/// Anything that does not decode (unknown kind, a row that does not match
/// `T`, a delete without an `id`) becomes [`Change::Other`] so the list
/// ignores it.
#[must_use]
pub fn decode_change<T: Table>(raw: PostgresChange) -> Change<T> {
    let decoded = match raw.event_type.as_str() {
        "INSERT" => raw
            .new
            .clone()
            .and_then(|row| serde_json::from_value(row).ok())
            .map(Change::Inserted),
        "UPDATE" => raw
            .new
            .clone()
            .and_then(|row| serde_json::from_value(row).ok())
            .map(Change::Updated),
        "DELETE" => raw
            .old
            .as_ref()
            .and_then(|row| row.get("id").cloned())
            .and_then(|id| serde_json::from_value(id).ok())
            .map(Change::Deleted),
        _ => None,
    };

    decoded.unwrap_or_else(|| {
        tracing::warn!(table = %raw.table, kind = %raw.event_type, "Ignoring undecodable change");
        Change::Other {
            kind: raw.event_type,
        }
    })
}
