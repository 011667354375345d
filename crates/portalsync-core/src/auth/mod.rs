//! Authentication module for keeping one portal session alive across many workers.
//!
//! This module provides:
//! - `AuthCoordinator`: epoch-based serialization of login attempts
//! - `LoginStrategy`: portal-specific login handshake and success probe
//! - `CredentialSource`: on-demand credentials (static, OS keychain, prompt)
//! - `SessionState`: immutable cookie snapshot persisted between runs

pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod login;
pub mod session;

pub use coordinator::{AuthCoordinator, Epoch};
pub use credentials::{
    CredentialSource, CredentialStore, Credentials, KeyringCredentials, StaticCredentials,
};
pub use error::AuthError;
pub use login::{FormLoginConfig, FormLoginStrategy, LoginStrategy, SuccessProbe};
pub use session::SessionState;
