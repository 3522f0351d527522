use crate::error::OAuthError;

/// Shows an authorization page to the user.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), OAuthError>;
}

/// Opens URLs in the system browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl UrlOpener for SystemOpener {
    fn open(&self, url: &str) -> Result<(), OAuthError> {
        open::that_detached(url).map_err(|e| OAuthError::Open(e.to_string()))
    }
}
