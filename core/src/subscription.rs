//! Change-feed handles.
//!
//! A [`Subscription`] is a stream of [`Change`] events for one table plus a
//! stop operation. Lifecycle per handle:
//!
//! ```text
//! Unsubscribed ──subscribe──> Active ──unsubscribe / drop──> Unsubscribed (terminal)
//! ```
//!
//! Re-subscribing yields a new handle. `unsubscribe` is idempotent and is a
//! no-op on a handle whose setup never succeeded.

use crate::change::Change;
use crate::record::Record;
use futures::stream::{BoxStream, Stream};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Callback run once when a subscription stops.
type StopHook = Box<dyn FnOnce() + Send>;

/// Lifecycle state of a subscription handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Delivering change events
    Active,
    /// Not delivering, and never will again
    Unsubscribed,
}

/// A cancellable stream of change events.
pub struct Subscription<T: Record> {
    channel: String,
    changes: Option<BoxStream<'static, Change<T>>>,
    stop: Option<StopHook>,
}

impl<T: Record> Subscription<T> {
    /// Create an active subscription.
    ///
    /// `stop` runs exactly once, on the first `unsubscribe` or on drop, and
    /// should tear down the transport behind `changes`.
    pub fn new<S, F>(channel: impl Into<String>, changes: S, stop: F) -> Self
    where
        S: Stream<Item = Change<T>> + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        Self {
            channel: channel.into(),
            changes: Some(Box::pin(changes)),
            stop: Some(Box::new(stop)),
        }
    }

    /// A handle that never delivers anything, for a feed whose setup failed.
    #[must_use]
    pub fn inactive(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            changes: None,
            stop: None,
        }
    }

    /// Channel name this handle listens on
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> SubscriptionState {
        if self.changes.is_some() {
            SubscriptionState::Active
        } else {
            SubscriptionState::Unsubscribed
        }
    }

    /// Whether events are still being delivered
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state(), SubscriptionState::Active)
    }

    /// Stop delivery. Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        self.changes = None;
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl<T: Record> Stream for Subscription<T> {
    type Item = Change<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(changes) = this.changes.as_mut() else {
            return Poll::Ready(None);
        };
        match changes.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                // Feed ended on the far side
                this.unsubscribe();
                Poll::Ready(None)
            },
            other => other,
        }
    }
}

impl<T: Record> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T: Record> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Row {
        id: u32,
    }

    impl Record for Row {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }
    }

    fn counting_stop(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn delivers_until_unsubscribed() {
        let stops = Arc::new(AtomicUsize::new(0));
        let feed = futures::stream::iter(vec![
            Change::Inserted(Row { id: 1 }),
            Change::Deleted(1),
        ]);
        let mut subscription = Subscription::new("rows", feed, counting_stop(&stops));

        assert!(subscription.is_active());
        assert_eq!(subscription.next().await, Some(Change::Inserted(Row { id: 1 })));

        subscription.unsubscribe();
        assert_eq!(subscription.state(), SubscriptionState::Unsubscribed);
        assert_eq!(subscription.next().await, None);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut subscription: Subscription<Row> =
            Subscription::new("rows", futures::stream::pending(), counting_stop(&stops));

        subscription.unsubscribe();
        subscription.unsubscribe();
        drop(subscription);

        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inactive_handle_is_inert() {
        let mut subscription: Subscription<Row> = Subscription::inactive("rows");
        assert!(!subscription.is_active());
        subscription.unsubscribe();
        assert_eq!(subscription.next().await, None);
        assert_eq!(subscription.channel(), "rows");
    }

    #[tokio::test]
    async fn ended_feed_runs_stop_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut subscription: Subscription<Row> =
            Subscription::new("rows", futures::stream::empty(), counting_stop(&stops));

        assert_eq!(subscription.next().await, None);
        assert!(!subscription.is_active());
        drop(subscription);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
