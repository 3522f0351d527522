//! Provider account linking through the engine's OAuth endpoints.
//!
//! The engine performs the actual authorization; this module starts a
//! flow, opens the provider page and polls until credentials are stored.

mod authority;
mod credentials;
mod manager;
mod opener;
mod provider;

pub use authority::{AuthAuthority, ManagementAuthority};
pub use credentials::{AuthStatus, disconnect_provider, import_vertex_credential, scan_auth_dir};
pub use manager::{OAuthManager, PollOutcome, SessionToken};
pub use opener::{SystemOpener, UrlOpener};
pub use provider::OAuthProvider;
