//! Mock auth provider.

use crate::error::AuthError;
use crate::service::{AuthProvider, SignUpOutcome};
use futures::stream::BoxStream;
use helpdesk_supabase::User;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

#[derive(Debug)]
struct Inner {
    /// email -> password
    accounts: Mutex<HashMap<String, String>>,
    /// email -> code from the last link
    codes: Mutex<HashMap<String, String>>,
    confirm_sign_ups: AtomicBool,
    storage_available: AtomicBool,
    current: watch::Sender<Option<User>>,
}

/// Mock auth provider.
///
/// Keeps accounts in memory. Every requested link carries
/// [`MockAuthProvider::CODE`].
#[derive(Debug, Clone)]
pub struct MockAuthProvider {
    inner: Arc<Inner>,
}

impl MockAuthProvider {
    /// Code delivered with every sign-in link
    pub const CODE: &'static str = "123456";

    /// Create a provider with no accounts and working storage
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                accounts: Mutex::new(HashMap::new()),
                codes: Mutex::new(HashMap::new()),
                confirm_sign_ups: AtomicBool::new(true),
                storage_available: AtomicBool::new(true),
                current,
            }),
        }
    }

    /// Add an account that can sign in with a password
    #[must_use]
    pub fn with_account(self, email: &str, password: &str) -> Self {
        self.inner
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(email.to_string(), password.to_string());
        self
    }

    /// Whether sign-ups need email confirmation (default true)
    #[must_use]
    pub fn confirm_sign_ups(self, confirm: bool) -> Self {
        self.inner.confirm_sign_ups.store(confirm, Ordering::SeqCst);
        self
    }

    /// Make session storage fail from now on
    pub fn break_storage(&self) {
        self.inner.storage_available.store(false, Ordering::SeqCst);
    }

    /// Whether a link was requested for `email` and not used yet
    #[must_use]
    pub fn link_pending(&self, email: &str) -> bool {
        self.codes().contains_key(email)
    }

    fn codes(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.inner.codes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn storage(&self) -> Result<(), AuthError> {
        if self.inner.storage_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AuthError::StorageUnavailable("storage disabled".to_string()))
        }
    }

    fn sign_in(&self, email: &str) -> User {
        let user = User {
            id: format!("user:{email}"),
            email: Some(email.to_string()),
            email_confirmed_at: None,
            created_at: None,
        };
        self.inner.current.send_replace(Some(user.clone()));
        user
    }
}

impl Default for MockAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for MockAuthProvider {
    fn request_link(&self, email: &str) -> impl Future<Output = Result<(), AuthError>> + Send {
        let result = self.storage().map(|()| {
            self.codes().insert(email.to_string(), Self::CODE.to_string());
        });

        async move { result }
    }

    fn verify_code(
        &self,
        email: &str,
        code: &str,
    ) -> impl Future<Output = Result<User, AuthError>> + Send {
        let expected = self.codes().get(email).cloned();
        let result = if expected.as_deref() == Some(code) {
            self.codes().remove(email);
            Ok(self.sign_in(email))
        } else {
            Err(AuthError::Rejected("Token has expired or is invalid".to_string()))
        };

        async move { result }
    }

    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<User, AuthError>> + Send {
        let known = self
            .inner
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(email)
            .is_some_and(|stored| stored == password);
        let result = self.storage().and_then(|()| {
            if known {
                Ok(self.sign_in(email))
            } else {
                Err(AuthError::Rejected("Invalid login credentials".to_string()))
            }
        });

        async move { result }
    }

    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<SignUpOutcome, AuthError>> + Send {
        let inserted = self
            .inner
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(email.to_string(), password.to_string())
            .is_none();
        let result = if !inserted {
            Err(AuthError::Rejected("User already registered".to_string()))
        } else if self.inner.confirm_sign_ups.load(Ordering::SeqCst) {
            Ok(SignUpOutcome::ConfirmationSent)
        } else {
            Ok(SignUpOutcome::SignedIn(self.sign_in(email)))
        };

        async move { result }
    }

    fn sign_out(&self) -> impl Future<Output = Result<(), AuthError>> + Send {
        self.inner.current.send_replace(None);

        async move { Ok(()) }
    }

    fn current_user(&self) -> impl Future<Output = Option<User>> + Send {
        let user = self
            .storage()
            .ok()
            .and_then(|()| self.inner.current.borrow().clone());

        async move { user }
    }

    fn session_changes(&self) -> BoxStream<'static, Option<User>> {
        let mut sessions = self.inner.current.subscribe();
        Box::pin(async_stream::stream! {
            while sessions.changed().await.is_ok() {
                let user = sessions.borrow_and_update().clone();
                yield user;
            }
        })
    }
}
