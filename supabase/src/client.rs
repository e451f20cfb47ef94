//! Backend client and REST table operations

use crate::auth::{Session, SessionStorage};
use crate::config::SupabaseConfig;
use crate::error::{error_message, SupabaseError};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tokio::sync::{watch, Mutex};

/// Accept header asking the REST service for a single object instead of an array
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Shared handle to one backend project.
///
/// Cheap to clone. Constructed once at startup and injected wherever table
/// access is needed. Holds the current session, so every clone sends the
/// signed-in user's token once auth succeeds.
#[derive(Clone)]
pub struct SupabaseClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    config: SupabaseConfig,
    session: watch::Sender<Option<Session>>,
    /// Where refreshed sessions are written
    storage: OnceLock<Arc<dyn SessionStorage>>,
    /// One refresh at a time; refresh tokens are single use
    refreshing: Mutex<()>,
}

impl SupabaseClient {
    /// Create a client for the given project
    #[must_use]
    pub fn new(config: SupabaseConfig) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                http: Client::new(),
                config,
                session,
                storage: OnceLock::new(),
                refreshing: Mutex::new(()),
            }),
        }
    }

    /// Connection settings
    #[must_use]
    pub fn config(&self) -> &SupabaseConfig {
        &self.inner.config
    }

    /// The current session, if signed in
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.inner.session.borrow().clone()
    }

    /// Observe session changes (sign-in, sign-out, restore)
    #[must_use]
    pub fn session_changes(&self) -> watch::Receiver<Option<Session>> {
        self.inner.session.subscribe()
    }

    /// Token sent as `Authorization: Bearer`: the session's access token, or
    /// the anonymous key when signed out
    #[must_use]
    pub fn bearer_token(&self) -> String {
        self.inner
            .session
            .borrow()
            .as_ref()
            .map_or_else(|| self.inner.config.anon_key.clone(), |s| s.access_token.clone())
    }

    pub(crate) fn set_session(&self, session: Option<Session>) {
        self.inner.session.send_replace(session);
    }

    /// Persist sessions minted by [`SupabaseClient::refresh_session`] to `storage`
    pub(crate) fn keep_sessions_in(&self, storage: Arc<dyn SessionStorage>) {
        if self.inner.storage.set(storage).is_err() {
            tracing::debug!("Session storage already attached");
        }
    }

    /// Exchange the refresh token for a new session.
    ///
    /// The new session becomes current (observers of
    /// [`SupabaseClient::session_changes`] see it) and is written to the
    /// attached storage. A storage failure is logged; the refreshed session
    /// still applies for this run.
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Unauthorized`] when there is no refresh token
    /// or the auth service rejects it, and request errors otherwise.
    pub async fn refresh_session(&self) -> Result<Session, SupabaseError> {
        let refresh_token = self
            .session()
            .and_then(|session| session.refresh_token)
            .ok_or_else(|| SupabaseError::Unauthorized("no refresh token".to_string()))?;

        let request = self
            .http()
            .post(self.config().auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.inner.config.anon_key)
            .json(&json!({ "refresh_token": refresh_token }));

        let session: Session = match send(request).await {
            Ok(response) => decode(response).await?,
            // invalid_grant and friends
            Err(SupabaseError::ApiError { status, message }) if (400..500).contains(&status) => {
                return Err(SupabaseError::Unauthorized(message));
            },
            Err(error) => return Err(error),
        };

        tracing::info!(user_id = %session.user.id, "Session refreshed");
        self.set_session(Some(session.clone()));
        self.store_session(&session);
        Ok(session)
    }

    /// Refresh unless another caller already replaced the `stale` token
    async fn refresh_after(&self, stale: &str) -> Result<(), SupabaseError> {
        let _turn = self.inner.refreshing.lock().await;
        if self.bearer_token() != stale {
            return Ok(());
        }
        self.refresh_session().await.map(|_| ())
    }

    fn can_refresh(&self) -> bool {
        self.inner
            .session
            .borrow()
            .as_ref()
            .is_some_and(|session| session.refresh_token.is_some())
    }

    fn store_session(&self, session: &Session) {
        let Some(storage) = self.inner.storage.get() else {
            return;
        };
        let saved = serde_json::to_string(session)
            .map_err(|e| SupabaseError::Storage(e.to_string()))
            .and_then(|raw| storage.save(&raw));
        if let Err(error) = saved {
            tracing::warn!(%error, "Could not store refreshed session");
        }
    }

    /// Send a request built by `build` with the current token.
    ///
    /// An expired session is refreshed first. A token the backend rejects is
    /// refreshed once and the request repeated.
    async fn execute<F>(&self, build: F) -> Result<Response, SupabaseError>
    where
        F: Fn() -> RequestBuilder,
    {
        if self.session().is_some_and(|session| session.is_expired()) && self.can_refresh() {
            if let Err(error) = self.refresh_after(&self.bearer_token()).await {
                tracing::warn!(%error, "Refreshing expired session failed");
            }
        }

        let token = self.bearer_token();
        match send(self.authorize(build())).await {
            Err(SupabaseError::Unauthorized(reason)) if self.can_refresh() => {
                tracing::debug!(%reason, "Token rejected, refreshing session");
                if let Err(error) = self.refresh_after(&token).await {
                    tracing::warn!(%error, "Session refresh failed");
                    return Err(SupabaseError::Unauthorized(reason));
                }
                send(self.authorize(build())).await
            },
            result => result,
        }
    }

    pub(crate) fn http(&self) -> &Client {
        &self.inner.http
    }

    /// Attach the API key and bearer token
    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.inner.config.anon_key)
            .bearer_auth(self.bearer_token())
    }

    /// Fetch every visible row of `table`, ordered by `order_column`
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, rejected queries, or rows that
    /// do not decode as `T`.
    pub async fn select_all<T: DeserializeOwned>(
        &self,
        table: &str,
        order_column: &str,
        ascending: bool,
    ) -> Result<Vec<T>, SupabaseError> {
        let direction = if ascending { "asc" } else { "desc" };
        let order = format!("{order_column}.{direction}");

        let response = self
            .execute(|| {
                self.http()
                    .get(self.config().rest_url(table))
                    .query(&[("select", "*"), ("order", order.as_str())])
            })
            .await?;
        decode(response).await
    }

    /// Insert one row and return it as stored (with server-assigned fields)
    ///
    /// # Errors
    ///
    /// Returns errors for network failures or a rejected insert.
    pub async fn insert<B, T>(&self, table: &str, row: &B) -> Result<T, SupabaseError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(|| {
                self.http()
                    .post(self.config().rest_url(table))
                    .header("Prefer", "return=representation")
                    .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
                    .json(row)
            })
            .await?;
        decode(response).await
    }

    /// Apply a partial update to the row with `id` and return the new row
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::NotFound`] when no row matched, and other
    /// errors for network failures or a rejected update.
    pub async fn update<B, T>(&self, table: &str, id: &str, patch: &B) -> Result<T, SupabaseError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let filter = format!("eq.{id}");
        let response = self
            .execute(|| {
                self.http()
                    .patch(self.config().rest_url(table))
                    .query(&[("id", filter.as_str())])
                    .header("Prefer", "return=representation")
                    .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
                    .json(patch)
            })
            .await?;
        decode(response).await
    }

    /// Delete the row with `id`
    ///
    /// # Errors
    ///
    /// Returns errors for network failures or a rejected delete.
    pub async fn delete(&self, table: &str, id: &str) -> Result<(), SupabaseError> {
        let filter = format!("eq.{id}");
        self.execute(|| {
            self.http()
                .delete(self.config().rest_url(table))
                .query(&[("id", filter.as_str())])
        })
        .await?;
        Ok(())
    }
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("url", &self.inner.config.url)
            .field("signed_in", &self.inner.session.borrow().is_some())
            .finish_non_exhaustive()
    }
}

/// Send a request and map non-success statuses to errors
pub(crate) async fn send(request: RequestBuilder) -> Result<Response, SupabaseError> {
    let response = request
        .send()
        .await
        .map_err(|e| SupabaseError::RequestFailed(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!(status = status.as_u16(), body = %body, "Backend rejected request");

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(SupabaseError::Unauthorized(error_message(&body)))
        },
        // 406: single-object request matched zero rows
        StatusCode::NOT_FOUND | StatusCode::NOT_ACCEPTABLE => Err(SupabaseError::NotFound),
        status => Err(SupabaseError::ApiError {
            status: status.as_u16(),
            message: error_message(&body),
        }),
    }
}

/// Decode a JSON response body
pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, SupabaseError> {
    response
        .json::<T>()
        .await
        .map_err(|e| SupabaseError::ResponseParseFailed(e.to_string()))
}
