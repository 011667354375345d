//! HTTP layer shared by crawl workers and login strategies.
//!
//! This module provides:
//! - `HttpSession`: reqwest client bound to the run's cookie jar, timeout and user agent
//! - `CookieJar`: persistable cookie store plugged into reqwest
//! - `FetchError`: errors surfaced to crawl workers

pub mod client;
pub mod cookies;
pub mod error;

pub use client::{HttpSession, Page, SessionSettings, DEFAULT_HTTP_TIMEOUT_SECS, USER_AGENT};
pub use cookies::{CookieJar, StoredCookie};
pub use error::FetchError;
