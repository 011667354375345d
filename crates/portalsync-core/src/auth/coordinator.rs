//! Serialization of login attempts across concurrent crawl workers.
//!
//! Workers follow a fixed protocol:
//!
//! 1. call [`AuthCoordinator::observe_epoch`] before a request that needs a session;
//! 2. if the response shows the session is gone, call
//!    [`AuthCoordinator::ensure_authenticated_since`] with that epoch;
//! 3. re-issue the request once.
//!
//! The epoch names a generation of authentication. Comparing the caller's
//! epoch with the current one under the auth lock is what collapses any number
//! of simultaneous "session expired" reports into a single login: the first
//! caller through the lock logs in and advances the epoch, everyone queued
//! behind it finds a newer epoch and returns straight away.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{AuthError, CredentialSource, LoginStrategy, SessionState};
use crate::http::{HttpSession, Page};
use crate::store::SessionStore;

/// Generation counter, advanced once per successful login
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Epoch(u64);

impl Epoch {
    pub const INITIAL: Epoch = Epoch(0);

    pub fn value(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Epoch {
    fn from(value: u64) -> Self {
        Epoch(value)
    }
}

/// Everything the auth lock protects
#[derive(Default)]
struct AuthState {
    epoch: Epoch,
    session: Option<Arc<SessionState>>,
    /// Set by the first failed login; the run is over after that
    failure: Option<AuthError>,
}

struct Shared {
    state: Mutex<AuthState>,
    http: HttpSession,
    strategy: Arc<dyn LoginStrategy>,
    credentials: Arc<dyn CredentialSource>,
    store: SessionStore,
    requests: AtomicU64,
    observed: AtomicBool,
}

impl Shared {
    /// Runs with the auth lock held for its whole duration
    async fn reauthenticate(self: Arc<Self>, observed: Epoch) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;

        if !self.observed.load(Ordering::Acquire) {
            return Err(AuthError::EpochNotObserved);
        }
        if observed > state.epoch {
            return Err(AuthError::InvalidEpoch {
                observed,
                current: state.epoch,
            });
        }
        if let Some(ref failure) = state.failure {
            debug!(%observed, "Earlier login failed, not retrying");
            return Err(failure.clone());
        }
        if observed < state.epoch {
            debug!(%observed, current = %state.epoch, "Session already renewed by another worker");
            return Ok(());
        }

        info!(epoch = %state.epoch, "Session not valid, logging in");
        match self.strategy.login(&self.http, self.credentials.as_ref()).await {
            Ok(()) => {
                let snapshot = Arc::new(self.http.capture());
                state.session = Some(Arc::clone(&snapshot));
                state.epoch = state.epoch.next();
                info!(epoch = %state.epoch, cookies = snapshot.cookies().len(), "Authenticated");
                // Saving right away means a crash later in the run won't cost
                // another login next time
                self.persist(snapshot).await;
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Login failed");
                state.failure = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Save on the blocking pool: sealing runs Argon2 and the write is fsynced
    async fn persist(self: &Arc<Self>, snapshot: Arc<SessionState>) {
        let shared = Arc::clone(self);
        match tokio::task::spawn_blocking(move || shared.store.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(path = %self.store.path().display(), error = %e, "Failed to save session")
            }
            Err(e) => warn!(error = %e, "Session save task failed"),
        }
    }

    async fn load(self: &Arc<Self>) -> Option<SessionState> {
        let shared = Arc::clone(self);
        match tokio::task::spawn_blocking(move || shared.store.load()).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "Session load task failed");
                None
            }
        }
    }
}

/// Owner of the epoch counter and the session snapshot.
/// Clone is cheap - all clones share one lock and one session.
#[derive(Clone)]
pub struct AuthCoordinator {
    shared: Arc<Shared>,
}

impl AuthCoordinator {
    pub fn new(
        http: HttpSession,
        strategy: Arc<dyn LoginStrategy>,
        credentials: Arc<dyn CredentialSource>,
        store: SessionStore,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(AuthState::default()),
                http,
                strategy,
                credentials,
                store,
                requests: AtomicU64::new(0),
                observed: AtomicBool::new(false),
            }),
        }
    }

    /// Session shared by all workers
    pub fn http(&self) -> &HttpSession {
        &self.shared.http
    }

    pub fn store(&self) -> &SessionStore {
        &self.shared.store
    }

    /// Restore the persisted session into the cookie jar.
    ///
    /// Called once at the start of a run, before the first request. Returns
    /// whether a session was found. The epoch is not advanced.
    pub async fn restore_session(&self) -> bool {
        let mut state = self.shared.state.lock().await;
        match self.shared.load().await {
            Some(snapshot) => {
                self.shared.http.restore(&snapshot);
                state.session = Some(Arc::new(snapshot));
                true
            }
            None => false,
        }
    }

    /// Current epoch, once any login in progress has finished.
    ///
    /// Must be called before every request that might need re-authentication.
    pub async fn observe_epoch(&self) -> Epoch {
        let state = self.shared.state.lock().await;
        self.shared.requests.fetch_add(1, Ordering::Relaxed);
        self.shared.observed.store(true, Ordering::Release);
        state.epoch
    }

    /// Make sure the session has been (re-)established since `observed`.
    ///
    /// Logs in only if no other caller already did so after `observed` was
    /// taken. The login itself runs on its own task, so cancelling the caller
    /// never leaves a half-finished handshake behind.
    pub async fn ensure_authenticated_since(&self, observed: Epoch) -> Result<(), AuthError> {
        let task = tokio::spawn(Arc::clone(&self.shared).reauthenticate(observed));
        match task.await {
            Ok(result) => result,
            Err(e) => Err(AuthError::Aborted(e.to_string())),
        }
    }

    /// Log in unconditionally, unless another caller is doing so right now
    pub async fn force_login(&self) -> Result<(), AuthError> {
        let epoch = self.observe_epoch().await;
        self.ensure_authenticated_since(epoch).await
    }

    /// Whether the strategy classifies this page as "logged out"
    pub fn session_expired(&self, page: &Page) -> bool {
        self.shared.strategy.session_expired(page)
    }

    pub fn request_count(&self) -> u64 {
        self.shared.requests.load(Ordering::Relaxed)
    }

    pub async fn epoch(&self) -> Epoch {
        self.shared.state.lock().await.epoch
    }

    /// Latest session snapshot (restored or produced by a login)
    pub async fn current_session(&self) -> Option<Arc<SessionState>> {
        self.shared.state.lock().await.session.clone()
    }

    /// Final checkpoint of a run.
    ///
    /// Waits for any login in flight, then saves the live cookie jar so that
    /// cookies the portal rotated during the run survive. Nothing is saved
    /// when no session was ever established or when a login failed.
    pub async fn shutdown(&self) {
        let state = self.shared.state.lock().await;

        if state.failure.is_some() {
            debug!("Not saving session after failed login");
        } else if state.session.is_some() {
            self.shared
                .persist(Arc::new(self.shared.http.capture()))
                .await;
        } else {
            debug!("No session established, nothing to save");
        }

        info!(requests = self.request_count(), epoch = %state.epoch, "Total HTTP requests");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_ordering_and_display() {
        assert_eq!(Epoch::INITIAL.value(), 0);
        assert!(Epoch::INITIAL.next() > Epoch::INITIAL);
        assert_eq!(Epoch::from(3).next(), Epoch::from(4));
        assert_eq!(Epoch::from(7).to_string(), "7");
    }
}
