// crates/client/src/session.rs
//! Session token lifecycle.
//!
//! `Session` owns the single bearer credential used by every outgoing
//! request. It restores the persisted credential once per process, keeps it
//! fresh with a timer that fires `margin` before expiry, and collapses
//! concurrent refreshes into one in-flight request.
//!
//! ## Epochs
//!
//! Every local clear (logout, failed refresh) and every fresh login bumps an
//! epoch counter. A refresh remembers the epoch it started under and only
//! commits if that epoch is still current, so a response that lands after a
//! logout cannot resurrect the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;

use explainer_core::{
    refresh_delay, AuthError, Credential, LoginCredentials, RegisterCredentials, User,
};

use crate::api::AuthApi;
use crate::error::ApiError;
use crate::store::{clear_credential, save_credential, CredentialStore, PersistedEntries, REFRESH_TOKEN_KEY};

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential, AuthError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// `initialize()` has not completed yet.
    Initializing,
    Authenticated,
    Unauthenticated,
}

/// What UI collaborators observe about the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub user: Option<User>,
}

impl SessionSnapshot {
    fn initializing() -> Self {
        Self {
            status: SessionStatus::Initializing,
            user: None,
        }
    }

    fn unauthenticated() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            user: None,
        }
    }

    fn authenticated(user: User) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            user: Some(user),
        }
    }
}

/// Cheaply cloneable handle to the process-wide session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn CredentialStore>,
    margin: Duration,
    credential: RwLock<Option<Credential>>,
    status_tx: watch::Sender<SessionSnapshot>,
    token_tx: watch::Sender<Option<String>>,
    refresh_timer: Mutex<Option<JoinHandle<()>>>,
    /// Lock order: `inflight` before `refresh_timer` before `credential`.
    inflight: Mutex<Option<SharedRefresh>>,
    epoch: AtomicU64,
    init: OnceCell<()>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Mutex poisoned guarding {what}");
            poisoned.into_inner()
        }
    }
}

impl Session {
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<dyn CredentialStore>, margin: Duration) -> Self {
        let (status_tx, _) = watch::channel(SessionSnapshot::initializing());
        let (token_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(SessionInner {
                api,
                store,
                margin,
                credential: RwLock::new(None),
                status_tx,
                token_tx,
                refresh_timer: Mutex::new(None),
                inflight: Mutex::new(None),
                epoch: AtomicU64::new(0),
                init: OnceCell::new(),
            }),
        }
    }

    // ── Observation ─────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.status_tx.subscribe()
    }

    /// Receiver that changes whenever the access token does.
    pub fn watch_token(&self) -> watch::Receiver<Option<String>> {
        self.inner.token_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot().status == SessionStatus::Authenticated
    }

    pub fn user(&self) -> Option<User> {
        self.snapshot().user
    }

    /// The access token as of now, without waiting for `initialize()`.
    pub fn current_token(&self) -> Option<String> {
        self.inner.token_tx.borrow().clone()
    }

    /// The access token as of now, once `initialize()` has completed.
    pub async fn access_token(&self) -> Option<String> {
        self.initialize().await;
        self.current_token()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Restore the persisted credential. Runs once per `Session`; later and
    /// concurrent callers wait for the first run to finish.
    pub async fn initialize(&self) {
        self.inner.init.get_or_init(|| self.restore()).await;
    }

    async fn restore(&self) {
        let entries = match PersistedEntries::load(self.inner.store.as_ref()) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read persisted session");
                PersistedEntries::default()
            }
        };

        if entries.access_token.is_none() {
            self.inner.publish(None);
            return;
        }

        let Some(credential) = entries.into_credential() else {
            tracing::warn!("Persisted session is incomplete; clearing it");
            self.inner.clear_local();
            return;
        };

        if credential.is_expired() {
            tracing::info!(user_id = %credential.user.id, "Persisted token expired; refreshing");
            *self.inner.write_credential() = Some(credential);
            if let Err(e) = self.refresh().await {
                tracing::info!(error = %e, "Could not refresh persisted session");
            }
            return;
        }

        tracing::info!(user_id = %credential.user.id, "Restored persisted session");
        self.inner.commit(credential);
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, AuthError> {
        self.initialize().await;
        let response = self
            .inner
            .api
            .login(credentials)
            .await
            .map_err(credential_error)?;
        let user = self.inner.begin_new_session(Credential::from(response));
        tracing::info!(user_id = %user.id, "Signed in");
        Ok(user)
    }

    pub async fn register(&self, credentials: &RegisterCredentials) -> Result<User, AuthError> {
        self.initialize().await;
        let response = self
            .inner
            .api
            .register(credentials)
            .await
            .map_err(credential_error)?;
        let user = self.inner.begin_new_session(Credential::from(response));
        tracing::info!(user_id = %user.id, "Registered");
        Ok(user)
    }

    /// Notify the server (failure ignored), then clear local state.
    pub async fn logout(&self) {
        self.initialize().await;
        if let Some(token) = self.current_token() {
            if let Err(e) = self.inner.api.logout(&token).await {
                tracing::warn!(error = %e, "Server logout failed; clearing local session anyway");
            }
        }
        self.inner.clear_local();
        tracing::info!("Signed out");
    }

    /// Exchange the stored refresh token for a new credential.
    ///
    /// Concurrent callers share one request. Failure clears the session.
    pub async fn refresh(&self) -> Result<Credential, AuthError> {
        let pending = {
            let mut slot = lock(&self.inner.inflight, "in-flight refresh");
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let pending = run_refresh(Arc::clone(&self.inner)).boxed().shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Arm the refresh timer for `credential`, replacing any earlier one.
    pub fn schedule_refresh(&self, credential: &Credential) {
        self.inner.schedule_refresh(credential);
    }

    /// Ask the server whether the current token is still valid.
    pub async fn check_auth_status(&self) -> Result<User, AuthError> {
        self.initialize().await;
        let Some(credential) = self.inner.read_credential() else {
            self.inner.publish(None);
            return Err(AuthError::NotAuthenticated);
        };

        if credential.is_expired() {
            return self.refresh().await.map(|c| c.user);
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        match self.inner.api.verify(&credential.access_token).await {
            Ok(_) => {
                let _slot = lock(&self.inner.inflight, "in-flight refresh");
                if self.inner.epoch.load(Ordering::SeqCst) != epoch {
                    // Signed out or in again meanwhile; leave that session's timer alone.
                    return self
                        .inner
                        .read_credential()
                        .map(|c| c.user)
                        .ok_or(AuthError::NotAuthenticated);
                }
                // The stored user is authoritative; the server's echo only
                // confirms the token.
                self.inner.schedule_refresh(&credential);
                Ok(credential.user)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token verification failed");
                if self.inner.epoch.load(Ordering::SeqCst) == epoch {
                    self.inner.clear_local();
                }
                Err(AuthError::VerificationFailed(e.to_string()))
            }
        }
    }
}

fn credential_error(err: ApiError) -> AuthError {
    match err {
        ApiError::Network(msg) => AuthError::Network(msg),
        other => AuthError::InvalidCredentials(other.to_string()),
    }
}

async fn run_refresh(inner: Arc<SessionInner>) -> Result<Credential, AuthError> {
    let epoch = inner.epoch.load(Ordering::SeqCst);
    let result = exchange_refresh_token(&inner).await;

    let mut slot = lock(&inner.inflight, "in-flight refresh");
    if inner.epoch.load(Ordering::SeqCst) != epoch {
        // The slot already belongs to whatever bumped the epoch.
        tracing::debug!("Discarding refresh result from an ended session");
        return Err(AuthError::SessionEnded);
    }
    *slot = None;

    match result {
        Ok(credential) => {
            tracing::info!(user_id = %credential.user.id, "Session token refreshed");
            inner.commit(credential.clone());
            Ok(credential)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Token refresh failed; signing out");
            inner.epoch.fetch_add(1, Ordering::SeqCst);
            inner.clear_state();
            Err(e)
        }
    }
}

async fn exchange_refresh_token(inner: &SessionInner) -> Result<Credential, AuthError> {
    let refresh_token = match inner.read_credential() {
        Some(credential) => Some(credential.refresh_token),
        None => inner.store.get(REFRESH_TOKEN_KEY)?,
    };
    let Some(refresh_token) = refresh_token.filter(|t| !t.is_empty()) else {
        return Err(AuthError::MissingRefreshToken);
    };

    inner
        .api
        .refresh(&refresh_token)
        .await
        .map(Credential::from)
        .map_err(|e| match e {
            ApiError::Network(msg) => AuthError::Network(msg),
            other => AuthError::RefreshRejected(other.to_string()),
        })
}

impl SessionInner {
    fn read_credential(&self) -> Option<Credential> {
        match self.credential.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                tracing::error!("RwLock poisoned guarding session credential");
                poisoned.into_inner().clone()
            }
        }
    }

    fn write_credential(&self) -> std::sync::RwLockWriteGuard<'_, Option<Credential>> {
        match self.credential.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("RwLock poisoned guarding session credential");
                poisoned.into_inner()
            }
        }
    }

    fn publish(&self, credential: Option<&Credential>) {
        let snapshot = match credential {
            Some(c) => SessionSnapshot::authenticated(c.user.clone()),
            None => SessionSnapshot::unauthenticated(),
        };
        self.status_tx.send_replace(snapshot);

        let token = credential.map(|c| c.access_token.clone());
        self.token_tx.send_if_modified(|current| {
            if *current == token {
                false
            } else {
                *current = token;
                true
            }
        });
    }

    /// Install `credential`, persist it, publish it and arm the timer.
    fn commit(self: &Arc<Self>, credential: Credential) {
        if let Err(e) = save_credential(self.store.as_ref(), &credential) {
            tracing::warn!(error = %e, "Failed to persist session credential");
        }
        self.schedule_refresh(&credential);
        *self.write_credential() = Some(credential.clone());
        self.publish(Some(&credential));
    }

    fn begin_new_session(self: &Arc<Self>, credential: Credential) -> User {
        let user = credential.user.clone();
        let mut slot = lock(&self.inflight, "in-flight refresh");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *slot = None;
        self.commit(credential);
        user
    }

    fn clear_local(&self) {
        let mut slot = lock(&self.inflight, "in-flight refresh");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *slot = None;
        self.clear_state();
    }

    /// Drop the credential everywhere. Callers hold `inflight`.
    fn clear_state(&self) {
        if let Some(timer) = lock(&self.refresh_timer, "refresh timer").take() {
            timer.abort();
        }
        *self.write_credential() = None;
        if let Err(e) = clear_credential(self.store.as_ref()) {
            tracing::warn!(error = %e, "Failed to clear persisted session");
        }
        self.publish(None);
    }

    fn schedule_refresh(self: &Arc<Self>, credential: &Credential) {
        let mut timer = lock(&self.refresh_timer, "refresh timer");
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let Some(expires_at) = credential.expires_at else {
            tracing::debug!("Token carries no expiry; refresh not scheduled");
            return;
        };
        let delay = refresh_delay(expires_at, Utc::now(), self.margin);
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Scheduled token refresh");

        let weak: Weak<SessionInner> = Arc::downgrade(self);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Detached so that re-arming the timer never cancels a refresh
            // that is already running.
            let session = Session { inner };
            tokio::spawn(async move {
                if let Err(e) = session.refresh().await {
                    tracing::debug!(error = %e, "Scheduled refresh did not complete");
                }
            });
        }));
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let timer = match self.refresh_timer.get_mut() {
            Ok(timer) => timer.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(timer) = timer {
            timer.abort();
        }
    }
}
