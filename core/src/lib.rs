//! # Helpdesk Core
//!
//! Core traits and types for the helpdesk client.
//!
//! The client keeps a local list of rows (tickets or items) in sync with a
//! hosted table. All list logic lives in pure reducers; I/O is described as
//! [`effect::Effect`] values and executed by the runtime crate.
//!
//! ## Core Concepts
//!
//! - **State**: What a view holds (the local list, form input, errors)
//! - **Action**: Every input to a reducer (user intents, store results, change events)
//! - **Reducer**: Pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions (not execution)
//! - **Record / Change**: A row with a stable identifier and the tagged
//!   insert/update/delete notification about it
//! - **Reconciler**: Folds one [`change::Change`] into the local list
//!
//! ## Example
//!
//! ```ignore
//! use helpdesk_core::*;
//!
//! impl Reducer for TicketsReducer {
//!     type State = TicketsState;
//!     type Action = TicketsAction;
//!     type Environment = TicketsEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut TicketsState,
//!         action: TicketsAction,
//!         env: &TicketsEnvironment,
//!     ) -> SmallVec<[Effect<TicketsAction>; 4]> {
//!         match action {
//!             TicketsAction::ChangeReceived(change) => {
//!                 reconcile(&mut state.tickets, change, ListOrder::NewestFirst);
//!                 smallvec![Effect::None]
//!             }
//!             _ => smallvec![Effect::None],
//!         }
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

/// Change events delivered by a table feed
pub mod change;

/// Rows with stable identifiers
pub mod record;

/// Folding change events into a local list
pub mod reconcile;

/// Cancellable change-feed handles
pub mod subscription;

pub use change::Change;
pub use record::Record;
pub use reconcile::{reconcile, ListOrder, Reconciled};
pub use subscription::{Subscription, SubscriptionState};

/// Reducer module - The core trait for view logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They hold all decision making (validation gating, list reconciliation,
/// pending markers) and are deterministic and testable without a backend.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for view logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The view state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Updates state in place
        /// 2. Returns effect descriptions to be executed
        ///
        /// Reducers never fail. Input they cannot use degrades to a no-op.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution) and can be cancelled by id.
pub mod effect {
    use futures::Stream;
    use std::fmt;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Identifier for a cancellable effect.
    ///
    /// At most one effect runs per id: starting a new cancellable effect with
    /// an id that is already running cancels the running one first.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct EffectId(String);

    impl EffectId {
        /// Create an effect id
        #[must_use]
        pub fn new(id: impl Into<String>) -> Self {
            Self(id.into())
        }

        /// Create an id scoped to a key, e.g. `item-save:42`
        #[must_use]
        pub fn scoped(prefix: &str, key: impl fmt::Display) -> Self {
            Self(format!("{prefix}:{key}"))
        }

        /// The id as a string slice
        #[must_use]
        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl fmt::Display for EffectId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the Store runtime.
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Delayed action (for debouncing, retries)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

        /// Long-lived source of actions (change feeds)
        ///
        /// Every item is fed back into the reducer until the stream ends or
        /// the effect is cancelled.
        Stream(Pin<Box<dyn Stream<Item = Action> + Send>>),

        /// Run an effect under an id so it can be replaced or cancelled
        Cancellable {
            /// Identifier of the running effect
            id: EffectId,
            /// The effect to run
            effect: Box<Effect<Action>>,
        },

        /// Cancel the running effect with this id (no-op when none is running)
        Cancel(EffectId),
    }

    impl<Action> fmt::Debug for Effect<Action>
    where
        Action: fmt::Debug,
    {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::Stream(_) => write!(f, "Effect::Stream(<stream>)"),
                Effect::Cancellable { id, effect } => f
                    .debug_struct("Effect::Cancellable")
                    .field("id", id)
                    .field("effect", effect)
                    .finish(),
                Effect::Cancel(id) => f.debug_tuple("Effect::Cancel").field(id).finish(),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Wrap an async computation
        #[must_use]
        pub fn future<F>(future: F) -> Effect<Action>
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(future))
        }

        /// Run `effect` under `id`, replacing any effect already running under it
        #[must_use]
        pub fn cancellable(id: EffectId, effect: Effect<Action>) -> Effect<Action> {
            Effect::Cancellable {
                id,
                effect: Box::new(effect),
            }
        }

        /// Dispatch `action` once `duration` passes without another debounce
        /// under the same id.
        #[must_use]
        pub fn debounce(id: EffectId, duration: Duration, action: Action) -> Effect<Action> {
            Self::cancellable(
                id,
                Effect::Delay {
                    duration,
                    action: Box::new(action),
                },
            )
        }

        /// Whether this is the no-op effect
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
