use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use keyring::Entry;

use super::AuthError;

const SERVICE_NAME: &str = "portalsync";

/// Username and secret for one login attempt. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Supplies credentials on demand, once per login attempt.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(&self) -> Result<Credentials, AuthError>;
}

/// Credentials known up front (environment, config, tests)
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(username, password),
        }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credentials(&self) -> Result<Credentials, AuthError> {
        Ok(self.credentials.clone())
    }
}

/// Password looked up in the OS keychain for one crawler's username
#[derive(Debug, Clone)]
pub struct KeyringCredentials {
    crawler: String,
    username: String,
}

impl KeyringCredentials {
    pub fn new(crawler: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            crawler: crawler.into(),
            username: username.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for KeyringCredentials {
    async fn credentials(&self) -> Result<Credentials, AuthError> {
        let (crawler, username) = (self.crawler.clone(), self.username.clone());
        let password = tokio::task::spawn_blocking(move || {
            CredentialStore::get_password(&crawler, &username)
        })
        .await
        .map_err(|e| AuthError::Credentials(e.to_string()))?
        .map_err(|e| AuthError::Credentials(format!("{:#}", e)))?;

        Ok(Credentials::new(self.username.clone(), password))
    }
}

/// OS keychain access.
///
/// Entries live under the `portalsync` service with a `<crawler>:<username>`
/// account, so two portals sharing a username keep separate passwords.
pub struct CredentialStore;

impl CredentialStore {
    fn account(crawler: &str, username: &str) -> String {
        format!("{}:{}", crawler, username)
    }

    fn entry(crawler: &str, username: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &Self::account(crawler, username))
            .context("Failed to create keyring entry")
    }

    /// Store a crawler's password in the OS keychain
    pub fn store(crawler: &str, username: &str, password: &str) -> Result<()> {
        Self::entry(crawler, username)?
            .set_password(password)
            .context("Failed to store password in keychain")?;
        Ok(())
    }

    /// Retrieve a crawler's password from the OS keychain
    pub fn get_password(crawler: &str, username: &str) -> Result<String> {
        Self::entry(crawler, username)?
            .get_password()
            .context("Failed to retrieve password from keychain")
    }

    /// Delete a crawler's stored password
    pub fn delete(crawler: &str, username: &str) -> Result<()> {
        Self::entry(crawler, username)?
            .delete_credential()
            .context("Failed to delete credential from keychain")?;
        Ok(())
    }
}
