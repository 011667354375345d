//! Session-bound HTTP client.
//!
//! `HttpSession` wraps a reqwest client whose cookie store is the shared
//! [`CookieJar`], so every request issued through it (by crawl workers and by
//! login strategies alike) carries the current session cookies.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, StatusCode, Url};
use tracing::debug;

use super::{CookieJar, FetchError};
use crate::auth::SessionState;

/// Default request timeout in seconds.
/// Portals behind single sign-on can be slow to answer the login POST.
pub const DEFAULT_HTTP_TIMEOUT_SECS: f64 = 20.0;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("portalsync/", env!("CARGO_PKG_VERSION"));

/// Shared per-run request settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs_f64(DEFAULT_HTTP_TIMEOUT_SECS),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// A fully-read response
#[derive(Debug, Clone)]
pub struct Page {
    url: Url,
    status: StatusCode,
    body: Vec<u8>,
}

impl Page {
    pub fn new(url: Url, status: StatusCode, body: Vec<u8>) -> Self {
        Self { url, status, body }
    }

    /// Final URL after redirects
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn contains(&self, marker: &str) -> bool {
        self.text().contains(marker)
    }

    /// Turn a non-success status into an error carrying the (truncated) body
    pub fn error_for_status(self) -> Result<Page, FetchError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(FetchError::from_status(self.status, &self.text()))
        }
    }
}

/// HTTP client bound to one crawl's cookie jar.
/// Clone is cheap - reqwest::Client and the jar are both behind an Arc.
#[derive(Clone)]
pub struct HttpSession {
    client: Client,
    jar: Arc<CookieJar>,
}

impl HttpSession {
    pub fn new(settings: &SessionSettings) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(CookieJar::new());
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        Ok(Self { client, jar })
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    pub async fn get(&self, url: &str) -> Result<Page, reqwest::Error> {
        let response = self.client.get(url).send().await?;
        Self::read_page(response).await
    }

    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
    ) -> Result<Page, reqwest::Error> {
        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "text/html,application/xhtml+xml,*/*")
            .form(fields)
            .send()
            .await?;
        Self::read_page(response).await
    }

    async fn read_page(response: reqwest::Response) -> Result<Page, reqwest::Error> {
        let url = response.url().clone();
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        debug!(%url, %status, bytes = body.len(), "Response received");
        Ok(Page { url, status, body })
    }

    /// Capture the current jar as an immutable snapshot
    pub fn capture(&self) -> SessionState {
        SessionState::new(self.jar.snapshot())
    }

    /// Replace the jar's contents with a snapshot
    pub fn restore(&self, state: &SessionState) {
        self.jar.restore(state.cookies().to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(status: u16, body: &str) -> Page {
        Page::new(
            Url::parse("https://portal.example.edu/goto.php").expect("url"),
            StatusCode::from_u16(status).expect("status"),
            body.as_bytes().to_vec(),
        )
    }

    #[test]
    fn test_user_agent_carries_version() {
        assert!(USER_AGENT.starts_with("portalsync/"));
        assert_eq!(SessionSettings::default().timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_page_markers() {
        let p = page(200, "<div class=\"custom-login-page\">");
        assert!(p.contains("custom-login-page"));
        assert!(!p.contains("logout"));
    }

    #[test]
    fn test_error_for_status() {
        assert!(page(200, "ok").error_for_status().is_ok());
        assert!(matches!(
            page(404, "missing").error_for_status(),
            Err(FetchError::NotFound(_))
        ));
    }

    #[test]
    fn test_capture_and_restore() {
        let session = HttpSession::new(&SessionSettings::default()).expect("client");
        let url = Url::parse("https://portal.example.edu/").expect("url");
        assert!(session.jar().set_cookie("sid=1; Path=/", &url));

        let state = session.capture();
        session.jar().clear();
        assert!(session.jar().is_empty());

        session.restore(&state);
        assert_eq!(session.jar().header_for(&url), Some("sid=1".to_string()));
    }
}
