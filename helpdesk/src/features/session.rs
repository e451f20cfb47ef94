//! Session view: who is signed in, and the sign-in forms.

use crate::error::AuthError;
use crate::service::{AuthProvider, SignUpOutcome, CONFIRMATION_SENT};
use futures::StreamExt;
use helpdesk_core::effect::{Effect, EffectId};
use helpdesk_core::reducer::Reducer;
use helpdesk_core::{smallvec, SmallVec};
use helpdesk_supabase::User;
use std::marker::PhantomData;
use std::sync::Arc;

/// Effect id of the session-change watcher
pub const WATCH: &str = "session-watch";

/// Shown after a sign-in link was sent
pub const LINK_SENT: &str = "Check your email for the login link";

/// State of the session view
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    /// The signed-in user
    pub user: Option<User>,
    /// Whether the stored session has been looked up
    pub checked: bool,
    /// An auth request is in flight
    pub busy: bool,
    /// Informational message, e.g. after a link was sent
    pub info: Option<String>,
    /// Last failure, shown inline
    pub error: Option<String>,
}

impl SessionState {
    /// Whether someone is signed in
    #[must_use]
    pub const fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }
}

/// Actions of the session view
#[derive(Clone, Debug)]
pub enum SessionAction {
    /// Look up the stored session
    Restore,
    /// Stored session looked up
    Restored(Option<User>),
    /// Follow sign-ins and sign-outs from now on
    WatchSession,
    /// The session changed
    SessionChanged(Option<User>),

    /// Email a one-time sign-in link
    RequestLink {
        /// Address to sign in
        email: String,
    },
    /// Link request finished
    LinkSent(Result<(), AuthError>),
    /// Complete a one-time sign-in with the emailed code
    VerifyCode {
        /// Address the link was sent to
        email: String,
        /// Code from the email
        code: String,
    },
    /// Sign in with a password
    SignInWithPassword {
        /// Account email
        email: String,
        /// Account password
        password: String,
    },
    /// Sign-in finished
    SignedIn(Result<User, AuthError>),
    /// Create an account
    SignUp {
        /// Account email
        email: String,
        /// Account password
        password: String,
    },
    /// Sign-up finished
    SignedUp(Result<SignUpOutcome, AuthError>),
    /// Sign out
    SignOut,
    /// Sign-out finished
    SignedOut(Result<(), AuthError>),
}

/// Environment of the session view
pub struct SessionEnvironment<A> {
    /// Auth provider
    pub auth: Arc<A>,
}

impl<A> SessionEnvironment<A> {
    /// Creates a new `SessionEnvironment`
    #[must_use]
    pub const fn new(auth: Arc<A>) -> Self {
        Self { auth }
    }
}

impl<A> Clone for SessionEnvironment<A> {
    fn clone(&self) -> Self {
        Self {
            auth: Arc::clone(&self.auth),
        }
    }
}

/// Reducer of the session view
pub struct SessionReducer<A> {
    provider: PhantomData<fn() -> A>,
}

impl<A> SessionReducer<A> {
    /// Creates a new `SessionReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            provider: PhantomData,
        }
    }
}

impl<A> Default for SessionReducer<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for SessionReducer<A> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for SessionReducer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionReducer")
    }
}

/// Clear messages and mark a request in flight; `false` if one already is
fn begin(state: &mut SessionState) -> bool {
    if state.busy {
        return false;
    }
    state.busy = true;
    state.info = None;
    state.error = None;
    true
}

impl<A: AuthProvider + 'static> Reducer for SessionReducer<A> {
    type State = SessionState;
    type Action = SessionAction;
    type Environment = SessionEnvironment<A>;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            SessionAction::Restore => {
                let auth = Arc::clone(&env.auth);
                smallvec![Effect::future(async move {
                    Some(SessionAction::Restored(auth.current_user().await))
                })]
            },

            SessionAction::Restored(user) | SessionAction::SessionChanged(user) => {
                state.checked = true;
                state.user = user;
                smallvec![Effect::None]
            },

            SessionAction::WatchSession => {
                let changes = env.auth.session_changes().map(SessionAction::SessionChanged);
                smallvec![Effect::cancellable(
                    EffectId::new(WATCH),
                    Effect::Stream(Box::pin(changes))
                )]
            },

            SessionAction::RequestLink { email } => {
                let email = email.trim().to_string();
                if email.is_empty() || !begin(state) {
                    return smallvec![Effect::None];
                }
                let auth = Arc::clone(&env.auth);
                smallvec![Effect::future(async move {
                    Some(SessionAction::LinkSent(auth.request_link(&email).await))
                })]
            },

            SessionAction::LinkSent(result) => {
                state.busy = false;
                match result {
                    Ok(()) => state.info = Some(LINK_SENT.to_string()),
                    Err(error) => state.error = Some(error.to_string()),
                }
                smallvec![Effect::None]
            },

            SessionAction::VerifyCode { email, code } => {
                if !begin(state) {
                    return smallvec![Effect::None];
                }
                let auth = Arc::clone(&env.auth);
                smallvec![Effect::future(async move {
                    let result = auth.verify_code(email.trim(), code.trim()).await;
                    Some(SessionAction::SignedIn(result))
                })]
            },

            SessionAction::SignInWithPassword { email, password } => {
                if !begin(state) {
                    return smallvec![Effect::None];
                }
                let auth = Arc::clone(&env.auth);
                smallvec![Effect::future(async move {
                    let result = auth.sign_in_with_password(email.trim(), &password).await;
                    Some(SessionAction::SignedIn(result))
                })]
            },

            SessionAction::SignedIn(result) => {
                state.busy = false;
                match result {
                    Ok(user) => {
                        tracing::info!(user = %user.id, "Signed in");
                        state.checked = true;
                        state.user = Some(user);
                    },
                    Err(error) => state.error = Some(error.to_string()),
                }
                smallvec![Effect::None]
            },

            SessionAction::SignUp { email, password } => {
                if !begin(state) {
                    return smallvec![Effect::None];
                }
                let auth = Arc::clone(&env.auth);
                smallvec![Effect::future(async move {
                    Some(SessionAction::SignedUp(auth.sign_up(email.trim(), &password).await))
                })]
            },

            SessionAction::SignedUp(result) => {
                state.busy = false;
                match result {
                    Ok(SignUpOutcome::SignedIn(user)) => state.user = Some(user),
                    Ok(SignUpOutcome::ConfirmationSent) => {
                        state.info = Some(CONFIRMATION_SENT.to_string());
                    },
                    Err(error) => state.error = Some(error.to_string()),
                }
                smallvec![Effect::None]
            },

            SessionAction::SignOut => {
                if !begin(state) {
                    return smallvec![Effect::None];
                }
                let auth = Arc::clone(&env.auth);
                smallvec![Effect::future(async move {
                    Some(SessionAction::SignedOut(auth.sign_out().await))
                })]
            },

            SessionAction::SignedOut(result) => {
                state.busy = false;
                match result {
                    Ok(()) => state.user = None,
                    Err(error) => state.error = Some(error.to_string()),
                }
                smallvec![Effect::None]
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockAuthProvider;
    use helpdesk_testing::{assertions, collect_actions, ReducerTest};

    fn env(auth: MockAuthProvider) -> SessionEnvironment<MockAuthProvider> {
        SessionEnvironment::new(Arc::new(auth))
    }

    fn user(email: &str) -> User {
        User {
            id: format!("user:{email}"),
            email: Some(email.to_string()),
            email_confirmed_at: None,
            created_at: None,
        }
    }

    #[test]
    fn blank_email_sends_no_link() {
        ReducerTest::new(SessionReducer::new())
            .with_env(env(MockAuthProvider::new()))
            .given_state(SessionState::default())
            .when_action(SessionAction::RequestLink {
                email: "  ".to_string(),
            })
            .then_state(|state| assert!(!state.busy))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn link_sent_shows_instructions() {
        ReducerTest::new(SessionReducer::new())
            .with_env(env(MockAuthProvider::new()))
            .given_state(SessionState {
                busy: true,
                ..SessionState::default()
            })
            .when_action(SessionAction::LinkSent(Ok(())))
            .then_state(|state| {
                assert!(!state.busy);
                assert_eq!(state.info.as_deref(), Some(LINK_SENT));
            })
            .run();
    }

    #[test]
    fn storage_failure_on_sign_in_is_shown() {
        ReducerTest::new(SessionReducer::new())
            .with_env(env(MockAuthProvider::new()))
            .given_state(SessionState::default())
            .when_action(SessionAction::LinkSent(Err(AuthError::StorageUnavailable(
                "read-only".to_string(),
            ))))
            .then_state(|state| {
                let shown = state.error.clone().unwrap_or_default();
                assert!(shown.contains("HELPDESK_SESSION_FILE"));
            })
            .run();
    }

    #[test]
    fn sign_up_with_confirmation_stays_signed_out() {
        ReducerTest::new(SessionReducer::new())
            .with_env(env(MockAuthProvider::new()))
            .given_state(SessionState::default())
            .when_action(SessionAction::SignedUp(Ok(SignUpOutcome::ConfirmationSent)))
            .then_state(|state| {
                assert!(!state.is_signed_in());
                assert_eq!(state.info.as_deref(), Some(CONFIRMATION_SENT));
            })
            .run();
    }

    #[test]
    fn requests_are_not_stacked() {
        ReducerTest::new(SessionReducer::new())
            .with_env(env(MockAuthProvider::new()))
            .given_state(SessionState {
                busy: true,
                ..SessionState::default()
            })
            .when_action(SessionAction::SignOut)
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn session_change_replaces_the_user() {
        ReducerTest::new(SessionReducer::new())
            .with_env(env(MockAuthProvider::new()))
            .given_state(SessionState {
                user: Some(user("a@b.com")),
                ..SessionState::default()
            })
            .when_action(SessionAction::SessionChanged(None))
            .then_state(|state| {
                assert!(state.checked);
                assert!(!state.is_signed_in());
            })
            .run();
    }

    #[tokio::test]
    async fn link_then_code_signs_in() {
        let auth = MockAuthProvider::new();
        let env = env(auth.clone());
        let reducer = SessionReducer::new();
        let mut state = SessionState::default();

        let mut actions = Vec::new();
        let effects = reducer.reduce(
            &mut state,
            SessionAction::RequestLink {
                email: "ops@example.com".to_string(),
            },
            &env,
        );
        for effect in effects {
            actions.extend(collect_actions(effect, 1).await);
        }
        for action in actions.drain(..) {
            reducer.reduce(&mut state, action, &env);
        }
        assert!(auth.link_pending("ops@example.com"));

        let effects = reducer.reduce(
            &mut state,
            SessionAction::VerifyCode {
                email: "ops@example.com".to_string(),
                code: MockAuthProvider::CODE.to_string(),
            },
            &env,
        );
        for effect in effects {
            actions.extend(collect_actions(effect, 1).await);
        }
        for action in actions {
            reducer.reduce(&mut state, action, &env);
        }

        assert_eq!(state.user.map(|u| u.id), Some("user:ops@example.com".to_string()));
        assert!(state.error.is_none());
    }
}
