//! Durable storage of session cookies between runs.
//!
//! Each crawler owns one session file in its private state directory. The
//! file is a small versioned JSON envelope around a [`SessionState`], sealed
//! with a passphrase when a [`SessionCipher`] is configured.
//!
//! Loading never fails a run: a missing, corrupt or undecryptable file only
//! means the next request will trigger a fresh login.

pub mod crypto;

use std::fs::OpenOptions;
use std::io::Write as _;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::SessionState;
pub use crypto::{Sealed, SessionCipher};

/// Session file name inside a crawler's state directory
pub const SESSION_FILE: &str = "session.json";

/// Bumped whenever the envelope layout changes; older files are ignored
pub const SESSION_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed session file: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Unsupported session file version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("Session file is encrypted but no passphrase is configured")]
    MissingKey,

    #[error("Session encryption error: {0}")]
    Crypto(String),
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    version: u32,
    saved_at: DateTime<Utc>,
    payload: Payload,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
enum Payload {
    Plain {
        session: SessionState,
    },
    Sealed {
        salt: String,
        nonce: String,
        ciphertext: String,
    },
}

pub struct SessionStore {
    path: PathBuf,
    cipher: Option<SessionCipher>,
}

impl SessionStore {
    /// Store backed by `<state_dir>/session.json`
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(SESSION_FILE),
            cipher: None,
        }
    }

    /// Seal the session file with this cipher
    pub fn with_cipher(mut self, cipher: SessionCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted session, treating every failure as "no session"
    pub fn load(&self) -> Option<SessionState> {
        match self.try_load() {
            Ok(Some(state)) => {
                debug!(
                    path = %self.path.display(),
                    cookies = state.cookies().len(),
                    age_minutes = state.age_minutes(),
                    "Session restored"
                );
                Some(state)
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "No saved session");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable session file");
                None
            }
        }
    }

    /// Load the persisted session, reporting why it could not be read
    pub fn try_load(&self) -> Result<Option<SessionState>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let header: VersionHeader = serde_json::from_str(&contents)?;
        if header.version != SESSION_FORMAT_VERSION {
            return Err(StoreError::Version {
                found: header.version,
                expected: SESSION_FORMAT_VERSION,
            });
        }

        let file: SessionFile = serde_json::from_str(&contents)?;
        let state = match file.payload {
            Payload::Plain { session } => session,
            Payload::Sealed {
                salt,
                nonce,
                ciphertext,
            } => {
                let cipher = self.cipher.as_ref().ok_or(StoreError::MissingKey)?;
                let sealed = Sealed {
                    salt: decode(&salt)?,
                    nonce: decode(&nonce)?,
                    ciphertext: decode(&ciphertext)?,
                };
                serde_json::from_slice(&cipher.open(&sealed)?)?
            }
        };
        Ok(Some(state))
    }

    /// Persist a session snapshot. Callers log and discard the error.
    pub fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        let payload = match &self.cipher {
            None => Payload::Plain {
                session: state.clone(),
            },
            Some(cipher) => {
                let sealed = cipher.seal(&serde_json::to_vec(state)?)?;
                Payload::Sealed {
                    salt: STANDARD.encode(sealed.salt),
                    nonce: STANDARD.encode(sealed.nonce),
                    ciphertext: STANDARD.encode(sealed.ciphertext),
                }
            }
        };
        let file = SessionFile {
            version: SESSION_FORMAT_VERSION,
            saved_at: Utc::now(),
            payload,
        };
        let contents = serde_json::to_string_pretty(&file)?;

        self.write_atomic(contents.as_bytes())
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), cookies = state.cookies().len(), "Session saved");
        Ok(())
    }

    /// Remove the persisted session. Returns whether a file was removed.
    pub fn clear(&self) -> Result<bool, StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Write to a sibling temp file, then rename over the real one, so an
    /// interrupted save never leaves a half-written session behind.
    fn write_atomic(&self, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");

        let result = write_private(&tmp_path, contents)
            .and_then(|()| std::fs::rename(&tmp_path, &self.path));
        if result.is_err() {
            // Best effort; the original error is what the caller needs
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }
}

/// Create or truncate `path` readable by the owner only and flush it to disk
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.truncate(true).write(true).create(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn decode(value: &str) -> Result<Vec<u8>, StoreError> {
    STANDARD
        .decode(value)
        .map_err(|e| StoreError::Crypto(format!("invalid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StoredCookie;
    use reqwest::Url;

    fn sample_state() -> SessionState {
        let url = Url::parse("https://ilias.example.edu/").expect("url");
        SessionState::new(vec![
            StoredCookie::parse("PHPSESSID=abc; Path=/; HttpOnly", &url).expect("cookie"),
            StoredCookie::parse("ilClientId=portal; Path=/", &url).expect("cookie"),
        ])
    }

    #[test]
    fn test_save_then_load_plain() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        let state = sample_state();

        store.save(&state).expect("save");
        let loaded = SessionStore::new(dir.path()).load();
        assert_eq!(loaded, Some(state));
    }

    #[test]
    fn test_save_then_load_sealed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path()).with_cipher(SessionCipher::new("pass"));
        let state = sample_state();
        store.save(&state).expect("save");

        let raw = std::fs::read_to_string(store.path()).expect("read");
        assert!(!raw.contains("PHPSESSID"));

        let reopened = SessionStore::new(dir.path()).with_cipher(SessionCipher::new("pass"));
        assert_eq!(reopened.load(), Some(state));

        let wrong = SessionStore::new(dir.path()).with_cipher(SessionCipher::new("nope"));
        assert!(wrong.load().is_none());
        assert!(matches!(
            SessionStore::new(dir.path()).try_load(),
            Err(StoreError::MissingKey)
        ));
    }

    #[test]
    fn test_missing_file_is_no_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().join("never-created"));
        assert!(matches!(store.try_load(), Ok(None)));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_corrupt_and_foreign_version_are_no_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());

        std::fs::write(store.path(), "{ not json").expect("write");
        assert!(matches!(store.try_load(), Err(StoreError::Format(_))));
        assert!(store.load().is_none());

        std::fs::write(store.path(), r#"{"version": 99, "anything": true}"#).expect("write");
        assert!(matches!(
            store.try_load(),
            Err(StoreError::Version { found: 99, .. })
        ));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        assert!(!store.clear().expect("clear"));
        store.save(&sample_state()).expect("save");
        assert!(store.clear().expect("clear"));
        assert!(store.load().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_session_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        store.save(&sample_state()).expect("save");
        let mode = std::fs::metadata(store.path()).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        // A directory in the way makes the final rename fail
        std::fs::create_dir(store.path()).expect("mkdir");
        std::fs::write(store.path().join("keep"), "x").expect("write");

        assert!(matches!(
            store.save(&sample_state()),
            Err(StoreError::Io { .. })
        ));
        assert!(!dir.path().join("session.json.tmp").exists());
    }
}
