//! portalsync core - keeps one authenticated portal session alive for many
//! concurrent crawl workers.
//!
//! The pieces, leaves first:
//! - [`http`]: cookie jar and session-bound HTTP client
//! - [`store`]: session file persistence, optionally encrypted
//! - [`auth`]: credentials, login strategies and the [`auth::AuthCoordinator`]
//! - [`crawler`]: session-scoped runs and the worker fetch protocol

pub mod auth;
pub mod config;
pub mod crawler;
pub mod http;
pub mod store;

pub use auth::{AuthCoordinator, AuthError, Epoch};
pub use config::{Config, CrawlerConfig};
pub use crawler::{CrawlContext, Crawler};
pub use http::{FetchError, HttpSession, Page};
pub use store::{SessionStore, StoreError};
