//! Sign-in and session lookup.

use crate::error::AuthError;
use futures::stream::BoxStream;
use helpdesk_supabase::{AuthClient, SignUp, SupabaseError, User};
use std::future::Future;

/// Shown after a sign-up that needs email confirmation
pub const CONFIRMATION_SENT: &str = "Check your email for the confirmation link";

/// Outcome of a sign-up
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// Confirmation is off; the user is signed in
    SignedIn(User),
    /// A confirmation link was sent
    ConfirmationSent,
}

/// Authentication provider.
///
/// Storage problems are soft: signing out still succeeds locally and
/// looking up the current user reports nobody, while starting a sign-in
/// fails with [`AuthError::StorageUnavailable`] so the user can fix it first.
pub trait AuthProvider: Send + Sync {
    /// Email a one-time sign-in link, creating the user if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the session could not be kept or the
    /// request is refused.
    fn request_link(&self, email: &str) -> impl Future<Output = Result<(), AuthError>> + Send;

    /// Complete a one-time sign-in with the code from the email.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] for a wrong or expired code.
    fn verify_code(
        &self,
        email: &str,
        code: &str,
    ) -> impl Future<Output = Result<User, AuthError>> + Send;

    /// Sign in with a password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] for wrong credentials.
    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<User, AuthError>> + Send;

    /// Create an account.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the account cannot be created.
    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<SignUpOutcome, AuthError>> + Send;

    /// Sign out. Always forgets the local session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] only for failures other than session storage.
    fn sign_out(&self) -> impl Future<Output = Result<(), AuthError>> + Send;

    /// The signed-in user, or `None` when nobody is or it cannot be told.
    fn current_user(&self) -> impl Future<Output = Option<User>> + Send;

    /// The user after every sign-in and sign-out, from now on.
    ///
    /// A refreshed session for the same user is not announced again.
    fn session_changes(&self) -> BoxStream<'static, Option<User>>;
}

/// [`AuthProvider`] over the backend's auth service.
#[derive(Debug, Clone)]
pub struct SupabaseAuth {
    client: AuthClient,
    redirect_to: Option<String>,
}

impl SupabaseAuth {
    /// Create a provider; sign-in links point at `redirect_to` when given
    #[must_use]
    pub const fn new(client: AuthClient, redirect_to: Option<String>) -> Self {
        Self {
            client,
            redirect_to,
        }
    }
}

impl AuthProvider for SupabaseAuth {
    fn request_link(&self, email: &str) -> impl Future<Output = Result<(), AuthError>> + Send {
        async move {
            self.client
                .sign_in_with_otp(email, self.redirect_to.as_deref())
                .await
                .map_err(AuthError::from)
        }
    }

    fn verify_code(
        &self,
        email: &str,
        code: &str,
    ) -> impl Future<Output = Result<User, AuthError>> + Send {
        async move {
            let session = self.client.verify_otp(email, code).await?;
            Ok(session.user)
        }
    }

    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<User, AuthError>> + Send {
        async move {
            let session = self.client.sign_in_with_password(email, password).await?;
            Ok(session.user)
        }
    }

    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<SignUpOutcome, AuthError>> + Send {
        async move {
            match self.client.sign_up(email, password).await? {
                SignUp::SignedIn(session) => Ok(SignUpOutcome::SignedIn(session.user)),
                SignUp::ConfirmationSent(_) => Ok(SignUpOutcome::ConfirmationSent),
            }
        }
    }

    fn sign_out(&self) -> impl Future<Output = Result<(), AuthError>> + Send {
        async move {
            match self.client.sign_out().await {
                Ok(()) => Ok(()),
                Err(SupabaseError::Storage(reason)) => {
                    tracing::warn!(
                        %reason,
                        "Signed out, but the stored session could not be removed"
                    );
                    Ok(())
                },
                Err(error) => Err(error.into()),
            }
        }
    }

    fn current_user(&self) -> impl Future<Output = Option<User>> + Send {
        async move {
            match self.client.get_user().await {
                Ok(user) => user,
                Err(error) => {
                    tracing::warn!(%error, "Could not determine the current user");
                    None
                },
            }
        }
    }

    fn session_changes(&self) -> BoxStream<'static, Option<User>> {
        let mut sessions = self.client.session_changes();
        Box::pin(async_stream::stream! {
            let mut announced: Option<Option<String>> = None;
            while sessions.changed().await.is_ok() {
                let user = sessions.borrow_and_update().as_ref().map(|s| s.user.clone());
                let id = user.as_ref().map(|u| u.id.clone());
                if announced.as_ref() == Some(&id) {
                    tracing::trace!(user_id = ?id, "Session renewed for the same user");
                    continue;
                }
                announced = Some(id);
                yield user;
            }
        })
    }
}
