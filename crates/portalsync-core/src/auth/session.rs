use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::StoredCookie;

/// Immutable snapshot of an authenticated session.
///
/// A snapshot is never edited in place: it is either restored from disk at
/// the start of a run or captured from the live cookie jar right after a
/// successful login, and then replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    cookies: Vec<StoredCookie>,
    captured_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(cookies: Vec<StoredCookie>) -> Self {
        Self {
            cookies,
            captured_at: Utc::now(),
        }
    }

    pub fn cookies(&self) -> &[StoredCookie] {
        &self.cookies
    }

    /// Minutes since the snapshot was taken (for log output)
    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.captured_at).num_minutes().max(0)
    }
}
