// Interactive credential lookup: environment, then keychain, then a prompt.

use std::io::{self, BufRead, Write};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use portalsync_core::auth::{
    AuthError, CredentialSource, CredentialStore, Credentials, KeyringCredentials,
};
use tracing::debug;

const USERNAME_ENV: &str = "PORTALSYNC_USERNAME";
const PASSWORD_ENV: &str = "PORTALSYNC_PASSWORD";

pub struct InteractiveCredentials {
    crawler: String,
    username: Option<String>,
    /// Last credentials handed out, kept so `remember` can store them
    last: Mutex<Option<Credentials>>,
}

impl InteractiveCredentials {
    pub fn new(crawler: impl Into<String>, configured_username: Option<String>) -> Self {
        let username = std::env::var(USERNAME_ENV)
            .ok()
            .filter(|u| !u.is_empty())
            .or(configured_username);
        Self {
            crawler: crawler.into(),
            username,
            last: Mutex::new(None),
        }
    }

    /// Store the credentials of the last login in the OS keychain
    pub fn remember(&self) -> Result<bool> {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match last {
            Some(creds) => {
                CredentialStore::store(&self.crawler, &creds.username, &creds.password)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn resolve(&self) -> Result<Credentials, AuthError> {
        let username = match self.username.clone() {
            Some(username) => username,
            None => {
                let prompt = format!("Username for {}: ", self.crawler);
                blocking(move || prompt_line(&prompt)).await?
            }
        };
        if username.is_empty() {
            return Err(AuthError::Credentials("empty username".to_string()));
        }

        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            debug!(%username, "Using password from environment");
            return Ok(Credentials::new(username, password));
        }

        match KeyringCredentials::new(&self.crawler, &username).credentials().await {
            Ok(creds) => {
                debug!(%username, "Using password from keychain");
                Ok(creds)
            }
            Err(e) => {
                debug!(%username, error = %e, "No keychain password, prompting");
                let prompt = format!("Password for {}@{}: ", username, self.crawler);
                let password = blocking(move || rpassword::prompt_password(prompt)).await?;
                Ok(Credentials::new(username, password))
            }
        }
    }
}

#[async_trait]
impl CredentialSource for InteractiveCredentials {
    async fn credentials(&self) -> Result<Credentials, AuthError> {
        let creds = self.resolve().await?;
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(creds.clone());
        Ok(creds)
    }
}

/// Terminal reads block, so they run off the runtime's worker threads
async fn blocking<F>(read: F) -> Result<String, AuthError>
where
    F: FnOnce() -> io::Result<String> + Send + 'static,
{
    tokio::task::spawn_blocking(read)
        .await
        .map_err(|e| AuthError::Credentials(e.to_string()))?
        .map_err(|e| AuthError::Credentials(e.to_string()))
}

fn prompt_line(prompt: &str) -> io::Result<String> {
    let mut stderr = io::stderr();
    stderr.write_all(prompt.as_bytes())?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
