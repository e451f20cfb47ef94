//! # Helpdesk Testing
//!
//! Testing utilities for helpdesk reducers.
//!
//! This crate provides:
//! - [`ReducerTest`]: Given-When-Then harness for reducers
//! - [`assertions`]: Checks over returned effects
//! - [`helpers::collect_actions`]: Runs an effect without a Store and
//!   returns the actions it would feed back
//! - [`FixedClock`]: Deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use helpdesk_testing::{ReducerTest, assertions};
//!
//! ReducerTest::new(TicketsReducer::new())
//!     .with_env(test_environment())
//!     .given_state(TicketsState::default())
//!     .when_action(TicketsAction::ChangeReceived(Change::Deleted(id)))
//!     .then_state(|state| assert!(state.tickets.is_empty()))
//!     .then_effects(assertions::assert_no_effects)
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use helpdesk_core::environment::Clock;


pub use reducer_test::{assertions, ReducerTest};

/// Mock implementations of core Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// # Example
    ///
    /// ```
    /// use helpdesk_testing::mocks::FixedClock;
    /// use helpdesk_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// A fixed clock at 2025-01-01 00:00:00 UTC
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is a constant.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Running effects outside a Store
pub mod helpers {
    use futures::StreamExt;
    use helpdesk_core::effect::Effect;
    use std::future::Future;
    use std::pin::Pin;

    /// Execute `effect` and collect every action it would feed back.
    ///
    /// - `Delay` yields its action without waiting
    /// - `Stream` is read for at most `stream_limit` items, so endless change
    ///   feeds can be sampled
    /// - `Cancellable` runs its inner effect; `Cancel` yields nothing
    pub fn collect_actions<A>(
        effect: Effect<A>,
        stream_limit: usize,
    ) -> Pin<Box<dyn Future<Output = Vec<A>> + Send>>
    where
        A: Send + 'static,
    {
        Box::pin(async move {
            match effect {
                Effect::None | Effect::Cancel(_) => Vec::new(),
                Effect::Future(fut) => fut.await.into_iter().collect(),
                Effect::Delay { action, .. } => vec![*action],
                Effect::Stream(stream) => stream.take(stream_limit).collect().await,
                Effect::Cancellable { effect, .. } => collect_actions(*effect, stream_limit).await,
            }
        })
    }
}

pub use helpers::collect_actions;
pub use mocks::{test_clock, FixedClock};
