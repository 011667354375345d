//! Session-scoped crawl runs.
//!
//! A [`Crawler`] ties one configured portal to its coordinator. `run` restores
//! the saved session, hands the body a [`CrawlContext`] and always performs the
//! final session checkpoint afterwards, whether the body succeeded or not.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::auth::{AuthCoordinator, CredentialSource, FormLoginStrategy, LoginStrategy};
use crate::config::Config;
use crate::http::{FetchError, HttpSession, Page};
use crate::store::{SessionCipher, SessionStore};

pub struct Crawler {
    name: String,
    coordinator: AuthCoordinator,
}

impl Crawler {
    pub fn new(name: impl Into<String>, coordinator: AuthCoordinator) -> Self {
        Self {
            name: name.into(),
            coordinator,
        }
    }

    /// Build a crawler for a configured form-login portal
    pub fn from_config(
        config: &Config,
        name: &str,
        credentials: Arc<dyn CredentialSource>,
        cipher: Option<SessionCipher>,
    ) -> Result<Self> {
        let crawler = config.crawler(name)?;
        if crawler.encrypt_session && cipher.is_none() {
            anyhow::bail!(
                "Crawler '{}' encrypts its session but no session key was provided",
                name
            );
        }

        let settings = crawler
            .session_settings()
            .with_context(|| format!("Crawler '{}' is misconfigured", name))?;
        let http = HttpSession::new(&settings).context("Failed to build HTTP client")?;
        let mut store = SessionStore::new(config.state_dir(name)?);
        if let Some(cipher) = cipher.filter(|_| crawler.encrypt_session) {
            store = store.with_cipher(cipher);
        }
        let strategy: Arc<dyn LoginStrategy> =
            Arc::new(FormLoginStrategy::new(crawler.login.clone()));

        Ok(Self::new(
            name,
            AuthCoordinator::new(http, strategy, credentials, store),
        ))
    }

    pub fn coordinator(&self) -> &AuthCoordinator {
        &self.coordinator
    }

    pub fn context(&self) -> CrawlContext {
        CrawlContext {
            coordinator: self.coordinator.clone(),
        }
    }

    /// Run `body` inside this crawler's session scope
    pub async fn run<F, Fut, T, E>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(CrawlContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let restored = self.coordinator.restore_session().await;
        info!(crawler = %self.name, restored, "Starting crawl");

        let result = body(self.context()).await;

        self.coordinator.shutdown().await;
        info!(crawler = %self.name, ok = result.is_ok(), "Crawl finished");
        result
    }
}

/// Handle given to crawl workers. Clone freely, one per task.
#[derive(Clone)]
pub struct CrawlContext {
    coordinator: AuthCoordinator,
}

impl CrawlContext {
    pub fn coordinator(&self) -> &AuthCoordinator {
        &self.coordinator
    }

    /// GET `url` with the shared session, logging in again if needed
    pub async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        self.authenticated(url, move |http| async move { http.get(url).await })
            .await
    }

    /// Issue `request` following the observe / request / re-auth / retry-once protocol.
    ///
    /// `label` only names the request in logs and errors.
    pub async fn authenticated<F, Fut>(&self, label: &str, request: F) -> Result<Page, FetchError>
    where
        F: Fn(HttpSession) -> Fut,
        Fut: Future<Output = Result<Page, reqwest::Error>>,
    {
        let epoch = self.coordinator.observe_epoch().await;
        let page = request(self.coordinator.http().clone()).await?;
        if !self.coordinator.session_expired(&page) {
            return Ok(page);
        }

        debug!(%label, %epoch, "Session expired, re-authenticating");
        self.coordinator.ensure_authenticated_since(epoch).await?;

        let page = request(self.coordinator.http().clone()).await?;
        if self.coordinator.session_expired(&page) {
            return Err(FetchError::SessionExpired(label.to_string()));
        }
        Ok(page)
    }
}
