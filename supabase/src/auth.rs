//! Email auth: one-time links, passwords, sessions
//!
//! Sessions are kept in the shared [`SupabaseClient`] (so table and realtime
//! calls carry the user's token) and persisted through a [`SessionStorage`].

use crate::client::{decode, send, SupabaseClient};
use crate::error::SupabaseError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// A session this close to `expires_at` is refreshed before use
const EXPIRY_MARGIN_SECS: i64 = 30;

/// An authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user id
    pub id: String,
    /// Email address, when the account has one
    #[serde(default)]
    pub email: Option<String>,
    /// When the address was confirmed
    #[serde(default)]
    pub email_confirmed_at: Option<String>,
    /// Account creation time
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Tokens for a signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token for table and realtime access
    pub access_token: String,
    /// Token used to mint a new access token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Usually `bearer`
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Expiry as a unix timestamp
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// The signed-in user
    pub user: User,
}

impl Session {
    /// Whether the access token is expired or about to expire.
    ///
    /// A session without `expires_at` is never considered expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX));
        self.expires_at.is_some_and(|at| at.saturating_sub(EXPIRY_MARGIN_SECS) <= now)
    }
}

/// Outcome of a sign-up request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUp {
    /// Email confirmation is disabled; the user is signed in
    SignedIn(Session),
    /// A confirmation link was sent; the user is not signed in yet
    ConfirmationSent(User),
}

/// Where the serialized session lives between runs.
///
/// Implementations report failures as [`SupabaseError::Storage`].
pub trait SessionStorage: Send + Sync {
    /// Read the stored session, `None` when nothing is stored
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Storage`] when the storage cannot be read.
    fn load(&self) -> Result<Option<String>, SupabaseError>;

    /// Replace the stored session
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Storage`] when the storage cannot be written.
    fn save(&self, session: &str) -> Result<(), SupabaseError>;

    /// Forget the stored session
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Storage`] when the storage cannot be written.
    fn clear(&self) -> Result<(), SupabaseError>;
}

/// Session stored as a JSON file
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    /// Store the session at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn storage_error(&self, error: &std::io::Error) -> SupabaseError {
        SupabaseError::Storage(format!("{}: {error}", self.path.display()))
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<Option<String>, SupabaseError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.storage_error(&e)),
        }
    }

    fn save(&self, session: &str) -> Result<(), SupabaseError> {
        std::fs::write(&self.path, session).map_err(|e| self.storage_error(&e))
    }

    fn clear(&self) -> Result<(), SupabaseError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.storage_error(&e)),
        }
    }
}

/// Session kept in memory only (lost on exit)
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    value: Mutex<Option<String>>,
    unavailable: bool,
}

impl MemorySessionStorage {
    /// Empty in-memory storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that rejects every access
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            value: Mutex::new(None),
            unavailable: true,
        }
    }

    fn check(&self) -> Result<(), SupabaseError> {
        if self.unavailable {
            return Err(SupabaseError::Storage("storage access denied".to_string()));
        }
        Ok(())
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<String>, SupabaseError> {
        self.check()?;
        Ok(self.value.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, session: &str) -> Result<(), SupabaseError> {
        self.check()?;
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), SupabaseError> {
        self.check()?;
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Auth operations against the backend's auth service
#[derive(Clone)]
pub struct AuthClient {
    client: SupabaseClient,
    storage: Arc<dyn SessionStorage>,
}

impl AuthClient {
    /// Create an auth client sharing `client`'s session
    #[must_use]
    pub fn new(client: SupabaseClient, storage: Arc<dyn SessionStorage>) -> Self {
        client.keep_sessions_in(Arc::clone(&storage));
        Self { client, storage }
    }

    /// The shared backend client
    #[must_use]
    pub const fn client(&self) -> &SupabaseClient {
        &self.client
    }

    /// Observe session changes
    #[must_use]
    pub fn session_changes(&self) -> watch::Receiver<Option<Session>> {
        self.client.session_changes()
    }

    /// Load a previously stored session into the client
    ///
    /// A stored session that no longer decodes is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Storage`] when the storage cannot be read.
    pub fn restore_session(&self) -> Result<Option<Session>, SupabaseError> {
        let Some(raw) = self.storage.load()? else {
            return Ok(None);
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => {
                tracing::debug!(user_id = %session.user.id, "Restored stored session");
                self.client.set_session(Some(session.clone()));
                Ok(Some(session))
            },
            Err(error) => {
                tracing::warn!(%error, "Discarding unreadable stored session");
                self.storage.clear()?;
                Ok(None)
            },
        }
    }

    /// Email a one-time sign-in link (and code), creating the user if needed
    ///
    /// Storage is checked first: a link is useless if the resulting session
    /// cannot be kept.
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Storage`] when session storage is unusable,
    /// and request errors when the auth service rejects the address.
    pub async fn sign_in_with_otp(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), SupabaseError> {
        self.storage.load()?;

        let mut request = self
            .client
            .http()
            .post(self.client.config().auth_url("otp"))
            .json(&json!({ "email": email, "create_user": true }));
        if let Some(redirect_to) = redirect_to {
            request = request.query(&[("redirect_to", redirect_to)]);
        }

        send(self.with_api_key(request)).await?;
        tracing::info!(email, "Sign-in link sent");
        Ok(())
    }

    /// Exchange the emailed code for a session
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Unauthorized`] for a wrong or expired code,
    /// and [`SupabaseError::Storage`] if the session cannot be stored (the
    /// user is still signed in for this run).
    pub async fn verify_otp(&self, email: &str, token: &str) -> Result<Session, SupabaseError> {
        let request = self
            .client
            .http()
            .post(self.client.config().auth_url("verify"))
            .json(&json!({ "type": "email", "email": email, "token": token }));

        let session: Session = decode(send(self.with_api_key(request)).await?).await?;
        self.persist(session)
    }

    /// Sign in with email and password
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Unauthorized`] or an API error for bad
    /// credentials, and [`SupabaseError::Storage`] if the session cannot be
    /// stored.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, SupabaseError> {
        let request = self
            .client
            .http()
            .post(self.client.config().auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));

        let session: Session = decode(send(self.with_api_key(request)).await?).await?;
        self.persist(session)
    }

    /// Create an account with email and password
    ///
    /// # Errors
    ///
    /// Returns request errors when the auth service rejects the sign-up.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUp, SupabaseError> {
        let request = self
            .client
            .http()
            .post(self.client.config().auth_url("signup"))
            .json(&json!({ "email": email, "password": password }));

        let body: serde_json::Value = decode(send(self.with_api_key(request)).await?).await?;

        if body.get("access_token").is_some() {
            let session: Session = serde_json::from_value(body)
                .map_err(|e| SupabaseError::ResponseParseFailed(e.to_string()))?;
            return self.persist(session).map(SignUp::SignedIn);
        }

        let user = body.get("user").cloned().unwrap_or(body);
        let user: User = serde_json::from_value(user)
            .map_err(|e| SupabaseError::ResponseParseFailed(e.to_string()))?;
        Ok(SignUp::ConfirmationSent(user))
    }

    /// Sign out
    ///
    /// The local session is always dropped. A failed token revocation is
    /// logged and not reported.
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Storage`] when the stored session cannot be
    /// removed.
    pub async fn sign_out(&self) -> Result<(), SupabaseError> {
        if let Some(session) = self.client.session() {
            let request = self
                .client
                .http()
                .post(self.client.config().auth_url("logout"))
                .header("apikey", &self.client.config().anon_key)
                .bearer_auth(&session.access_token);

            match send(request).await {
                Ok(_) | Err(SupabaseError::Unauthorized(_) | SupabaseError::NotFound) => {},
                Err(error) => tracing::warn!(%error, "Token revocation failed"),
            }
        }

        self.client.set_session(None);
        self.storage.clear()
    }

    /// The signed-in user, checked against the auth service
    ///
    /// Restores a stored session first when the client has none. An expired
    /// session is refreshed before the check, and a rejected token is
    /// refreshed once. When no refresh succeeds the user is signed out
    /// locally.
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Storage`] when the storage cannot be read,
    /// and request errors other than a rejected token.
    pub async fn get_user(&self) -> Result<Option<User>, SupabaseError> {
        let mut session = match self.client.session() {
            Some(session) => session,
            None => match self.restore_session()? {
                Some(session) => session,
                None => return Ok(None),
            },
        };

        let mut refreshed = false;
        if session.is_expired() {
            tracing::debug!(user_id = %session.user.id, "Stored session expired, refreshing");
            let Some(fresh) = self.refresh_or_sign_out().await? else {
                return Ok(None);
            };
            session = fresh;
            refreshed = true;
        }

        loop {
            let request = self
                .client
                .http()
                .get(self.client.config().auth_url("user"))
                .header("apikey", &self.client.config().anon_key)
                .bearer_auth(&session.access_token);

            match send(request).await {
                Ok(response) => return decode(response).await.map(Some),
                Err(SupabaseError::Unauthorized(reason)) if !refreshed => {
                    tracing::debug!(%reason, "Access token rejected, refreshing");
                    let Some(fresh) = self.refresh_or_sign_out().await? else {
                        return Ok(None);
                    };
                    session = fresh;
                    refreshed = true;
                },
                Err(SupabaseError::Unauthorized(reason)) => {
                    self.sign_out_locally(&reason);
                    return Ok(None);
                },
                Err(error) => return Err(error),
            }
        }
    }

    /// Refresh the session; a missing or rejected refresh token signs out
    /// locally and yields `None`
    async fn refresh_or_sign_out(&self) -> Result<Option<Session>, SupabaseError> {
        match self.client.refresh_session().await {
            Ok(session) => Ok(Some(session)),
            Err(SupabaseError::Unauthorized(reason)) => {
                self.sign_out_locally(&reason);
                Ok(None)
            },
            Err(error) => Err(error),
        }
    }

    fn sign_out_locally(&self, reason: &str) {
        tracing::info!(%reason, "Stored session rejected, signing out locally");
        self.client.set_session(None);
        if let Err(error) = self.storage.clear() {
            tracing::debug!(%error, "Could not clear rejected session");
        }
    }

    fn with_api_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("apikey", &self.client.config().anon_key)
    }

    /// Make `session` current, then store it
    fn persist(&self, session: Session) -> Result<Session, SupabaseError> {
        tracing::info!(user_id = %session.user.id, "Signed in");
        self.client.set_session(Some(session.clone()));

        let raw = serde_json::to_string(&session)
            .map_err(|e| SupabaseError::Storage(e.to_string()))?;
        self.storage.save(&raw)?;
        Ok(session)
    }
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_round_trips_and_can_refuse() {
        let storage = MemorySessionStorage::new();
        assert_eq!(storage.load(), Ok(None));
        assert_eq!(storage.save("{}"), Ok(()));
        assert_eq!(storage.load(), Ok(Some("{}".to_string())));
        assert_eq!(storage.clear(), Ok(()));
        assert_eq!(storage.load(), Ok(None));

        let denied = MemorySessionStorage::unavailable();
        assert!(matches!(denied.load(), Err(SupabaseError::Storage(_))));
        assert!(matches!(denied.save("{}"), Err(SupabaseError::Storage(_))));
    }

    #[test]
    fn file_storage_treats_a_missing_file_as_empty() {
        let path =
            std::env::temp_dir().join(format!("helpdesk-session-{}.json", std::process::id()));
        let storage = FileSessionStorage::new(&path);

        assert_eq!(storage.clear(), Ok(()));
        assert_eq!(storage.load(), Ok(None));
        assert_eq!(storage.save("token"), Ok(()));
        assert_eq!(storage.load(), Ok(Some("token".to_string())));
        assert_eq!(storage.clear(), Ok(()));
    }

    #[test]
    fn session_expiry_honours_the_margin() {
        let session = |expires_at: Option<i64>| Session {
            access_token: "jwt".to_string(),
            refresh_token: None,
            token_type: None,
            expires_in: None,
            expires_at,
            user: User {
                id: "u1".to_string(),
                email: None,
                email_confirmed_at: None,
                created_at: None,
            },
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX));

        assert!(session(Some(1)).is_expired());
        assert!(session(Some(now + 5)).is_expired());
        assert!(!session(Some(now + 3600)).is_expired());
        assert!(!session(None).is_expired());
    }

    #[test]
    fn session_decodes_with_optional_fields_missing() {
        let session: Result<Session, _> = serde_json::from_str(
            r#"{"access_token":"jwt","user":{"id":"u1","email":"a@b.co"}}"#,
        );
        assert!(session.is_ok_and(|s| s.user.email.as_deref() == Some("a@b.co")));
    }
}
