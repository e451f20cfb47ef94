//! # Helpdesk Runtime
//!
//! Runtime for the helpdesk reducers.
//!
//! This crate provides the Store that coordinates reducer execution and
//! effect handling for one view (the tickets list, the items list, the
//! session).
//!
//! ## Core Components
//!
//! - **Store**: Holds view state and executes effects
//! - **Effect Executor**: Runs effect descriptions and feeds resulting actions back
//! - **Cancellation**: Effects started under an [`EffectId`] can be replaced
//!   or cancelled, which is how debounced saves and change feeds are managed
//! - **Teardown**: Once a view goes away, late results are dropped instead
//!   of touching its state
//!
//! ## Example
//!
//! ```ignore
//! use helpdesk_runtime::Store;
//!
//! let store = Store::new(TicketsState::default(), TicketsReducer::new(), env);
//!
//! store.send(TicketsAction::Load).await?;
//! let count = store.state(|s| s.tickets.len()).await;
//!
//! // View closed
//! store.teardown();
//! ```

use helpdesk_core::effect::{Effect, EffectId};
use helpdesk_core::reducer::Reducer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::{AbortHandle, JoinHandle};

/// Retry logic with exponential backoff
pub mod retry;

pub use error::StoreError;
pub use store::Store;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store has been torn down and is not accepting new actions
        ///
        /// Returned when `send()` is called after `teardown()`.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Timeout waiting for terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`] to allow waiting for the effects started by
/// that action. Actions fed back by those effects are not tracked.
///
/// Change feeds never complete on their own, so waiting on the handle of an
/// action that starts one only returns after the feed is cancelled.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(Action::Load).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };

        let tracking = EffectTracking {
            counter,
            notifier: Arc::new(tx),
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (handle, _tracking) = Self::new();
        handle
    }

    /// Number of tracked effects still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.effects.load(Ordering::SeqCst)
    }

    /// Wait for all tracked effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                // Every tracker is gone, so nothing can still be running
                break;
            }
        }
    }

    /// Wait for all tracked effects to complete with a timeout
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the timeout expires before all
    /// effects complete.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: counter shared between a handle and the tasks it tracks
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl EffectTracking {
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements the effect counter on drop
///
/// Runs on normal completion, on panic, and when the task is aborted.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::{
        AbortHandle, Arc, AtomicBool, AtomicU64, DecrementGuard, Duration, Effect, EffectHandle,
        EffectId, EffectTracking, HashMap, JoinHandle, Mutex, Ordering, PoisonError, Reducer,
        RwLock, StoreError,
    };
    use futures::StreamExt;
    use std::future::Future;
    use std::pin::Pin;
    use tokio::sync::broadcast;

    /// Running cancellable effects: id → (generation, abort handle)
    type Running = Mutex<HashMap<EffectId, (u64, AbortHandle)>>;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock` for concurrent access)
    /// 2. Reducer (view logic)
    /// 3. Environment (injected services)
    /// 4. Effect execution (with feedback loop and id-keyed cancellation)
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    /// - `E`: Environment type
    /// - `R`: Reducer implementation
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: Arc<R>,
        environment: Arc<E>,
        shutdown: Arc<AtomicBool>,
        running: Arc<Running>,
        generation: Arc<AtomicU64>,
        /// Every action fed back by an effect, after it has been reduced
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        ///
        /// Action broadcast capacity defaults to 16 (increase with
        /// `with_broadcast_capacity`).
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_broadcast_capacity(initial_state, reducer, environment, 16)
        }

        /// Create a store with a custom action broadcast capacity
        ///
        /// Slow observers of [`Store::subscribe_actions`] skip actions once
        /// they fall more than `capacity` behind.
        #[must_use]
        pub fn with_broadcast_capacity(
            initial_state: S,
            reducer: R,
            environment: E,
            capacity: usize,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(capacity);

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer: Arc::new(reducer),
                environment: Arc::new(environment),
                shutdown: Arc::new(AtomicBool::new(false)),
                running: Arc::new(Mutex::new(HashMap::new())),
                generation: Arc::new(AtomicU64::new(0)),
                action_broadcast,
            }
        }

        /// Send an action to the store
        ///
        /// 1. Acquires write lock on state
        /// 2. Calls reducer with (state, action, environment)
        /// 3. Starts the returned effects in spawned tasks
        ///
        /// `Cancel` and the replacement half of `Cancellable` take effect
        /// before this returns, so a superseded debounce or feed never
        /// delivers another action.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] after [`Store::teardown`].
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::debug!("Rejected action: store is torn down");
                return Err(StoreError::ShutdownInProgress);
            }

            metrics::counter!("store.actions.total").increment(1);

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;
                self.reducer
                    .reduce(&mut *state, action, &self.environment)
            };

            tracing::trace!("Reducer returned {} effects", effects.len());
            for effect in effects {
                self.start_effect(effect, &tracking);
            }

            Ok(handle)
        }

        /// Send an action and wait for a matching action fed back by an effect
        ///
        /// Subscribes before sending so the result cannot be missed.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: Timeout expired before a matching action arrived
        /// - [`StoreError::ChannelClosed`]: Action broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: Store is torn down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to every action fed back by effects
        ///
        /// Actions are broadcast after they have been reduced, so reading
        /// state on receipt observes their result. Actions passed directly
        /// to `send` are not broadcast.
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let count = store.state(|s| s.tickets.len()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Whether the store still accepts actions
        #[must_use]
        pub fn is_active(&self) -> bool {
            !self.shutdown.load(Ordering::Acquire)
        }

        /// Whether a cancellable effect is currently running under `id`
        #[must_use]
        pub fn is_running(&self, id: &EffectId) -> bool {
            self.running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(id)
        }

        /// Tear the store down
        ///
        /// Rejects further actions, cancels every running cancellable effect
        /// (closing change feeds and dropping pending debounced saves), and
        /// discards results of in-flight requests when they arrive.
        /// Idempotent.
        pub fn teardown(&self) {
            if self.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }

            let running: Vec<_> = self
                .running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain()
                .collect();

            for (id, (_, task)) in &running {
                tracing::debug!(effect_id = %id, "Cancelling effect on teardown");
                task.abort();
            }
            metrics::counter!("store.effects.cancelled").increment(running.len() as u64);
            tracing::info!(cancelled = running.len(), "Store torn down");
        }

        /// Start a top-level effect returned by the reducer
        fn start_effect(&self, effect: Effect<A>, tracking: &EffectTracking) {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Cancel(id) => self.cancel(&id),
                Effect::Cancellable { id, effect } => {
                    tracking.increment();
                    let guard = DecrementGuard(tracking.clone());
                    // Detached; the entry in `running` owns its lifetime
                    drop(self.start_cancellable(id, *effect, guard));
                },
                effect => {
                    tracking.increment();
                    let guard = DecrementGuard(tracking.clone());
                    let store = self.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        store.run_effect(effect).await;
                    });
                },
            }
        }

        /// Spawn `effect` under `id`, aborting whatever was running under it
        ///
        /// `guard` is held by the task and dropped when it finishes or is aborted.
        fn start_cancellable<G>(&self, id: EffectId, effect: Effect<A>, guard: G) -> JoinHandle<()>
        where
            G: Send + 'static,
        {
            metrics::counter!("store.effects.executed", "type" => "cancellable").increment(1);
            let generation = self.generation.fetch_add(1, Ordering::Relaxed);

            // Lock held across spawn so the task cannot finish and deregister
            // before it has been registered
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some((_, previous)) = running.remove(&id) {
                tracing::trace!(effect_id = %id, "Replacing running effect");
                previous.abort();
                metrics::counter!("store.effects.cancelled").increment(1);
            }

            let store = self.clone();
            let task_id = id.clone();
            let task = tokio::spawn(async move {
                let _guard = guard;
                store.clone().run_effect(effect).await;
                store.finished(&task_id, generation);
            });

            running.insert(id, (generation, task.abort_handle()));
            task
        }

        /// Remove the registration of a task that ran to completion
        fn finished(&self, id: &EffectId, generation: u64) {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if running.get(id).is_some_and(|(current, _)| *current == generation) {
                running.remove(id);
            }
        }

        /// Abort the effect running under `id`, if any
        fn cancel(&self, id: &EffectId) {
            let removed = self
                .running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(id);

            if let Some((_, task)) = removed {
                tracing::debug!(effect_id = %id, "Cancelling effect");
                task.abort();
                metrics::counter!("store.effects.cancelled").increment(1);
            }
        }

        /// Execute an effect to completion inside the current task
        fn run_effect(self, effect: Effect<A>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(async move {
                match effect {
                    Effect::None => {},
                    Effect::Future(fut) => {
                        metrics::counter!("store.effects.executed", "type" => "future")
                            .increment(1);
                        if let Some(action) = fut.await {
                            self.feed_back(action).await;
                        }
                    },
                    Effect::Delay { duration, action } => {
                        metrics::counter!("store.effects.executed", "type" => "delay")
                            .increment(1);
                        tokio::time::sleep(duration).await;
                        self.feed_back(*action).await;
                    },
                    Effect::Stream(mut stream) => {
                        metrics::counter!("store.effects.executed", "type" => "stream")
                            .increment(1);
                        while let Some(action) = stream.next().await {
                            if !self.feed_back(action).await {
                                break;
                            }
                        }
                        tracing::trace!("Effect::Stream completed");
                    },
                    Effect::Cancellable { id, effect } => {
                        // A cancelled child is not an error for the parent
                        let _ = self.start_cancellable(id, *effect, ()).await;
                    },
                    Effect::Cancel(id) => self.cancel(&id),
                }
            })
        }

        /// Deliver an effect's action to the reducer, then to observers
        ///
        /// Returns `false` once the store is torn down; the action is dropped.
        async fn feed_back(&self, action: A) -> bool {
            match self.send(action.clone()).await {
                Ok(_) => {
                    let _ = self.action_broadcast.send(action);
                    true
                },
                Err(_) => {
                    tracing::debug!("Dropping effect result: store is torn down");
                    false
                },
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: Arc::clone(&self.reducer),
                environment: Arc::clone(&self.environment),
                shutdown: Arc::clone(&self.shutdown),
                running: Arc::clone(&self.running),
                generation: Arc::clone(&self.generation),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}
