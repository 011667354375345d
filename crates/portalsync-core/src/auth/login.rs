//! Login strategies.
//!
//! A [`LoginStrategy`] performs one complete login handshake through the
//! shared [`HttpSession`] and verifies that it worked. The coordinator treats
//! it as an opaque operation; everything portal-specific lives here.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{AuthError, CredentialSource};
use crate::http::{HttpSession, Page};

#[async_trait]
pub trait LoginStrategy: Send + Sync {
    /// Establish an authenticated session, or fail with a terminal error.
    ///
    /// Must only return `Ok` once the portal confirmed the login. Calling it
    /// again simply re-establishes the session.
    async fn login(
        &self,
        session: &HttpSession,
        credentials: &dyn CredentialSource,
    ) -> Result<(), AuthError>;

    /// Whether a fetched page shows that the session is no longer valid
    fn session_expired(&self, page: &Page) -> bool {
        page.status() == StatusCode::UNAUTHORIZED
    }
}

/// How to tell that a login attempt actually succeeded.
///
/// `url: None` inspects the response of the login POST itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuccessProbe {
    /// The page must not contain `marker` (e.g. the login form's container)
    AbsentMarker { url: Option<String>, marker: String },
    /// The page must contain `marker` (e.g. a logout link)
    PresentMarker { url: Option<String>, marker: String },
    /// The final URL after redirects must start with `prefix` (e.g. a dashboard)
    RedirectsTo { url: Option<String>, prefix: String },
}

impl SuccessProbe {
    fn url(&self) -> Option<&str> {
        match self {
            SuccessProbe::AbsentMarker { url, .. }
            | SuccessProbe::PresentMarker { url, .. }
            | SuccessProbe::RedirectsTo { url, .. } => url.as_deref(),
        }
    }

    fn check(&self, page: &Page) -> Result<(), AuthError> {
        match self {
            SuccessProbe::AbsentMarker { marker, .. } if page.contains(marker) => Err(
                AuthError::ProbeFailed(format!("{} still shows '{}'", page.url(), marker)),
            ),
            SuccessProbe::PresentMarker { marker, .. } if !page.contains(marker) => Err(
                AuthError::ProbeFailed(format!("{} does not show '{}'", page.url(), marker)),
            ),
            SuccessProbe::RedirectsTo { prefix, .. } if !page.url().as_str().starts_with(prefix) => {
                Err(AuthError::ProbeFailed(format!(
                    "ended on {} instead of {}",
                    page.url(),
                    prefix
                )))
            }
            _ => Ok(()),
        }
    }
}

fn default_username_field() -> String {
    "username".to_string()
}

fn default_password_field() -> String {
    "password".to_string()
}

/// Settings for a portal that logs in through a single form POST
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormLoginConfig {
    pub login_url: String,
    #[serde(default = "default_username_field")]
    pub username_field: String,
    #[serde(default = "default_password_field")]
    pub password_field: String,
    /// Static fields posted along with the credentials (submit buttons, commands)
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
    pub success: SuccessProbe,
    /// Text that only appears on pages served to logged-out visitors
    #[serde(default)]
    pub expired_marker: Option<String>,
}

/// Config-driven login for form-post portals
#[derive(Debug, Clone)]
pub struct FormLoginStrategy {
    config: FormLoginConfig,
    login_path: Option<String>,
}

impl FormLoginStrategy {
    pub fn new(config: FormLoginConfig) -> Self {
        let login_path = Url::parse(&config.login_url)
            .ok()
            .map(|url| url.path().to_string())
            .filter(|path| path != "/");
        Self { config, login_path }
    }

    pub fn config(&self) -> &FormLoginConfig {
        &self.config
    }

    fn form_fields(&self, username: String, password: String) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self
            .config
            .extra_fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        fields.push((self.config.username_field.clone(), username));
        fields.push((self.config.password_field.clone(), password));
        fields
    }
}

#[async_trait]
impl LoginStrategy for FormLoginStrategy {
    async fn login(
        &self,
        session: &HttpSession,
        credentials: &dyn CredentialSource,
    ) -> Result<(), AuthError> {
        let creds = credentials.credentials().await?;
        let username = creds.username.clone();
        debug!(%username, url = %self.config.login_url, "Posting login form");

        let fields = self.form_fields(creds.username, creds.password);
        let response = session.post_form(&self.config.login_url, &fields).await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::Rejected(format!(
                    "login form answered {}",
                    response.status()
                )));
            }
            status if status.is_server_error() => {
                return Err(AuthError::Handshake(format!("login form answered {}", status)));
            }
            _ => {}
        }

        let probe_page = match self.config.success.url() {
            Some(url) => session.get(url).await?,
            None => response,
        };
        self.config.success.check(&probe_page)?;

        info!(%username, "Login successful");
        Ok(())
    }

    fn session_expired(&self, page: &Page) -> bool {
        if matches!(
            page.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return true;
        }
        if let Some(ref login_path) = self.login_path {
            if page.url().path() == login_path {
                return true;
            }
        }
        self.config
            .expired_marker
            .as_deref()
            .map(|marker| page.contains(marker))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, status: u16, body: &str) -> Page {
        Page::new(
            Url::parse(url).expect("url"),
            StatusCode::from_u16(status).expect("status"),
            body.as_bytes().to_vec(),
        )
    }

    fn strategy(success: SuccessProbe) -> FormLoginStrategy {
        FormLoginStrategy::new(FormLoginConfig {
            login_url: "https://ilias.example.edu/login.php?target=root".to_string(),
            username_field: default_username_field(),
            password_field: default_password_field(),
            extra_fields: BTreeMap::from([(
                "cmd[doStandardAuthentication]".to_string(),
                "Login".to_string(),
            )]),
            success,
            expired_marker: Some("custom-login-page".to_string()),
        })
    }

    #[test]
    fn test_absent_marker_probe() {
        let probe = SuccessProbe::AbsentMarker {
            url: None,
            marker: "custom-login-page".to_string(),
        };
        assert!(probe
            .check(&page("https://ilias.example.edu/", 200, "<p>Dashboard</p>"))
            .is_ok());
        assert!(matches!(
            probe.check(&page(
                "https://ilias.example.edu/",
                200,
                "<div class=\"custom-login-page\">"
            )),
            Err(AuthError::ProbeFailed(_))
        ));
    }

    #[test]
    fn test_present_marker_probe() {
        let probe = SuccessProbe::PresentMarker {
            url: None,
            marker: "logout.php".to_string(),
        };
        assert!(probe
            .check(&page("https://ilias.example.edu/", 200, "<a href=\"logout.php\">"))
            .is_ok());
        assert!(probe
            .check(&page("https://ilias.example.edu/", 200, "<form>"))
            .is_err());
    }

    #[test]
    fn test_redirect_probe() {
        let probe = SuccessProbe::RedirectsTo {
            url: Some("https://portal.example.edu/".to_string()),
            prefix: "https://portal.example.edu/dashboard".to_string(),
        };
        assert!(probe
            .check(&page("https://portal.example.edu/dashboard/my", 200, ""))
            .is_ok());
        assert!(probe
            .check(&page("https://portal.example.edu/login", 200, ""))
            .is_err());
    }

    #[test]
    fn test_form_fields_include_extras_and_credentials() {
        let s = strategy(SuccessProbe::PresentMarker {
            url: None,
            marker: "logout".to_string(),
        });
        let fields = s.form_fields("student".to_string(), "pw".to_string());
        assert_eq!(
            fields,
            vec![
                ("cmd[doStandardAuthentication]".to_string(), "Login".to_string()),
                ("username".to_string(), "student".to_string()),
                ("password".to_string(), "pw".to_string()),
            ]
        );
    }

    #[test]
    fn test_session_expired_signals() {
        let s = strategy(SuccessProbe::PresentMarker {
            url: None,
            marker: "logout".to_string(),
        });
        assert!(s.session_expired(&page("https://ilias.example.edu/file.pdf", 401, "")));
        assert!(s.session_expired(&page("https://ilias.example.edu/login.php?x=1", 200, "")));
        assert!(s.session_expired(&page(
            "https://ilias.example.edu/goto.php",
            200,
            "<div class=\"custom-login-page\">"
        )));
        assert!(!s.session_expired(&page("https://ilias.example.edu/goto.php", 200, "%PDF")));
    }

    #[test]
    fn test_config_deserializes_from_json() {
        let json = r#"{
            "login_url": "https://portal.example.edu/login",
            "success": { "kind": "redirects_to", "url": null, "prefix": "https://portal.example.edu/dashboard" }
        }"#;
        let config: FormLoginConfig = serde_json::from_str(json).expect("config");
        assert_eq!(config.username_field, "username");
        assert_eq!(config.password_field, "password");
        assert!(config.extra_fields.is_empty());
        assert!(config.expired_marker.is_none());
    }
}
