//! Cookie jar shared by every request of a crawl.
//!
//! reqwest's built-in jar cannot be enumerated, which makes it impossible to
//! persist. `CookieJar` plugs a `cookie_store::CookieStore` into the same
//! `reqwest::cookie::CookieStore` seam and exposes its cookies so a whole jar
//! can be captured into a [`SessionState`](crate::auth::SessionState) and
//! restored on the next run.
//!
//! `cookie_store` only rejects public-suffix domains when handed a suffix
//! list, so `Domain` attributes are checked against `psl` before insertion.

use std::convert::Infallible;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cookie_store::{CookieStore as Store, RawCookie};
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use reqwest::Url;
use tracing::{debug, trace};

/// A cookie as kept in the jar and in saved sessions
pub type StoredCookie = cookie_store::Cookie<'static>;

/// Thread-safe cookie jar plugged into the reqwest client.
#[derive(Debug, Default)]
pub struct CookieJar {
    store: RwLock<Store>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one `Set-Cookie` header received from `url`.
    ///
    /// Returns false when the header was ignored: malformed, scoped to a
    /// foreign domain or a public suffix, or already expired.
    pub fn set_cookie(&self, header: &str, url: &Url) -> bool {
        let Ok(mut raw) = RawCookie::parse(header) else {
            trace!(%url, "Ignoring malformed Set-Cookie");
            return false;
        };

        let domain = raw
            .domain()
            .map(|d| d.trim_start_matches('.').to_ascii_lowercase());
        if let Some(domain) = domain {
            if is_public_suffix(&domain) {
                let same_host = url
                    .host_str()
                    .is_some_and(|host| host.eq_ignore_ascii_case(&domain));
                if !same_host {
                    debug!(
                        cookie = raw.name(),
                        %domain,
                        %url,
                        "Ignoring cookie scoped to a public suffix"
                    );
                    return false;
                }
                // A suffix that is itself the host gets a host-only cookie
                raw.unset_domain();
            }
        }

        match self.write().insert_raw(&raw, url) {
            Ok(action) => {
                trace!(cookie = raw.name(), ?action, "Stored cookie");
                true
            }
            Err(e) => {
                trace!(cookie = raw.name(), error = %e, "Ignoring cookie");
                false
            }
        }
    }

    /// All unexpired cookies, session cookies included
    pub fn snapshot(&self) -> Vec<StoredCookie> {
        self.read().iter_unexpired().cloned().collect()
    }

    /// Replace the whole jar. Expired cookies are dropped.
    pub fn restore(&self, cookies: Vec<StoredCookie>) {
        let cookies = cookies.into_iter().map(Ok::<_, Infallible>);
        let restored = match Store::from_cookies(cookies, false) {
            Ok(store) => store,
            Err(never) => match never {},
        };
        *self.write() = restored;
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().iter_unexpired().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of the `Cookie` header for a request to `url`
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let store = self.read();
        let mut matching = store.matches(url);
        if matching.is_empty() {
            return None;
        }
        // More specific paths first
        matching.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then_with(|| a.name().cmp(b.name()))
        });
        Some(
            matching
                .iter()
                .map(|c| format!("{}={}", c.name(), c.value()))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for header in cookie_headers {
            if let Ok(raw) = header.to_str() {
                self.set_cookie(raw, url);
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.header_for(url)
            .and_then(|value| HeaderValue::from_str(&value).ok())
    }
}

/// Whether `domain` is listed as a public suffix (`edu`, `co.uk`, ...)
fn is_public_suffix(domain: &str) -> bool {
    psl::suffix(domain.as_bytes())
        .filter(|suffix| suffix.is_known())
        .is_some_and(|suffix| suffix.as_bytes() == domain.as_bytes())
}
