//! Integration tests for change-feed style `Effect::Stream` execution
//!
//! Streams run until they end or are cancelled by id. Starting a stream
//! under an id that is already running replaces the old one, so a feed is
//! never delivered twice.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use helpdesk_core::{effect::Effect, effect::EffectId, reducer::Reducer, smallvec, SmallVec};
use helpdesk_runtime::Store;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Clone, Debug, PartialEq)]
enum FeedAction {
    /// Start forwarding the shared channel
    Subscribe,
    /// Stop forwarding
    Unsubscribe,
    /// Forward a finite list, then end
    Replay(Vec<String>),
    /// One delivered row
    Received(String),
    /// The feed closed
    Ended,
}

#[derive(Clone, Debug, Default)]
struct FeedState {
    received: Vec<String>,
    ended: bool,
}

#[derive(Clone)]
struct FeedEnvironment {
    source: broadcast::Sender<String>,
}

#[derive(Clone)]
struct FeedReducer;

fn feed_id() -> EffectId {
    EffectId::new("feed")
}

impl Reducer for FeedReducer {
    type State = FeedState;
    type Action = FeedAction;
    type Environment = FeedEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            FeedAction::Subscribe => {
                let mut source = env.source.subscribe();
                let actions = async_stream::stream! {
                    while let Ok(row) = source.recv().await {
                        yield FeedAction::Received(row);
                    }
                    yield FeedAction::Ended;
                };
                smallvec![Effect::cancellable(feed_id(), Effect::Stream(Box::pin(actions)))]
            },
            FeedAction::Unsubscribe => smallvec![Effect::Cancel(feed_id())],
            FeedAction::Replay(rows) => smallvec![Effect::Stream(Box::pin(futures::stream::iter(
                rows.into_iter()
                    .map(FeedAction::Received)
                    .chain(std::iter::once(FeedAction::Ended)),
            )))],
            FeedAction::Received(row) => {
                state.received.push(row);
                smallvec![Effect::None]
            },
            FeedAction::Ended => {
                state.ended = true;
                smallvec![Effect::None]
            },
        }
    }
}

fn store() -> (Store<FeedState, FeedAction, FeedEnvironment, FeedReducer>, broadcast::Sender<String>) {
    let (source, _) = broadcast::channel(16);
    let env = FeedEnvironment {
        source: source.clone(),
    };
    (Store::new(FeedState::default(), FeedReducer, env), source)
}

/// Wait until the feed task has subscribed to the source
async fn wait_for_receivers(source: &broadcast::Sender<String>, count: usize) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while source.receiver_count() != count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_finite_stream_delivers_in_order() {
    let (store, _source) = store();

    let mut handle = store
        .send(FeedAction::Replay(vec!["a".to_string(), "b".to_string(), "c".to_string()]))
        .await
        .unwrap();
    handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

    let (received, ended) = store.state(|s| (s.received.clone(), s.ended)).await;
    assert_eq!(received, ["a", "b", "c"]);
    assert!(ended);
}

#[tokio::test]
async fn test_feed_forwards_until_cancelled() {
    let (store, source) = store();
    let mut actions = store.subscribe_actions();

    store.send(FeedAction::Subscribe).await.unwrap();
    wait_for_receivers(&source, 1).await;

    source.send("one".to_string()).unwrap();
    assert_eq!(actions.recv().await.unwrap(), FeedAction::Received("one".to_string()));

    store.send(FeedAction::Unsubscribe).await.unwrap();
    assert!(!store.is_running(&feed_id()));
    wait_for_receivers(&source, 0).await;

    // Nobody is listening any more
    assert!(source.send("two".to_string()).is_err());
    assert_eq!(store.state(|s| s.received.clone()).await, ["one"]);
}

#[tokio::test]
async fn test_resubscribe_replaces_running_feed() {
    let (store, source) = store();
    let mut actions = store.subscribe_actions();

    store.send(FeedAction::Subscribe).await.unwrap();
    store.send(FeedAction::Subscribe).await.unwrap();
    wait_for_receivers(&source, 1).await;

    source.send("once".to_string()).unwrap();
    assert_eq!(actions.recv().await.unwrap(), FeedAction::Received("once".to_string()));

    store.send(FeedAction::Unsubscribe).await.unwrap();
    assert_eq!(store.state(|s| s.received.clone()).await, ["once"]);
}

#[tokio::test]
async fn test_teardown_stops_feed() {
    let (store, source) = store();

    store.send(FeedAction::Subscribe).await.unwrap();
    wait_for_receivers(&source, 1).await;

    store.teardown();
    wait_for_receivers(&source, 0).await;
    assert!(!store.is_running(&feed_id()));
}
