use super::authority::AuthAuthority;
use super::opener::UrlOpener;
use super::provider::OAuthProvider;
use crate::config::OAuthConfig;
use crate::error::OAuthError;
use crate::status::{EntityKind, StatusBus, StatusEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Opaque handle for one in-flight authorization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    Pending { attempts: u32, remaining: u32 },
    /// The attempt ceiling was reached; the session is gone.
    TimedOut,
}

struct Session {
    provider: OAuthProvider,
    state: String,
    attempts: u32,
    created_at: DateTime<Utc>,
}

/// Drives account linking for every provider through one authority.
pub struct OAuthManager {
    authority: Arc<dyn AuthAuthority>,
    opener: Arc<dyn UrlOpener>,
    bus: StatusBus,
    sessions: Mutex<HashMap<SessionToken, Session>>,
    max_attempts: u32,
    poll_interval: Duration,
    session_linger: Duration,
}

impl OAuthManager {
    pub fn new(
        authority: Arc<dyn AuthAuthority>,
        opener: Arc<dyn UrlOpener>,
        bus: StatusBus,
        config: &OAuthConfig,
    ) -> Self {
        Self {
            authority,
            opener,
            bus,
            sessions: Mutex::new(HashMap::new()),
            max_attempts: config.max_attempts.max(1),
            poll_interval: config.poll_interval(),
            session_linger: config.session_linger(),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionToken, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn pending_count(&self) -> usize {
        self.sessions().len()
    }

    /// Start linking `provider`: fetch the authorization page, open it and
    /// record a pending session.
    pub async fn begin(&self, provider: &str) -> Result<SessionToken, OAuthError> {
        let provider = OAuthProvider::parse(provider)?;
        if !self.authority.is_ready() {
            return Err(OAuthError::ProxyNotRunning(provider.to_string()));
        }

        let auth = self.authority.auth_url(provider).await?;
        self.opener.open(&auth.url)?;

        let token = SessionToken::generate();
        self.sessions().insert(
            token.clone(),
            Session {
                provider,
                state: auth.state,
                attempts: 0,
                created_at: Utc::now(),
            },
        );
        tracing::info!(%provider, session = %token, "oauth flow started");
        self.publish(&token, "pending", format!("authorize {provider} at {}", auth.url));
        Ok(token)
    }

    /// Check once whether the flow finished. Each unconfirmed check counts
    /// as an attempt; the one that reaches the ceiling ends the session.
    pub async fn poll(&self, token: &SessionToken) -> Result<PollOutcome, OAuthError> {
        let state = self
            .sessions()
            .get(token)
            .map(|session| session.state.clone())
            .ok_or(OAuthError::UnknownSession)?;

        let authorized = match self.authority.is_authorized(&state).await {
            Ok(authorized) => authorized,
            Err(e) => {
                tracing::debug!(session = %token, "auth status check failed: {e}");
                false
            }
        };

        let mut sessions = self.sessions();
        let session = sessions.get_mut(token).ok_or(OAuthError::UnknownSession)?;
        let provider = session.provider;
        let elapsed_secs = (Utc::now() - session.created_at).num_seconds();

        if authorized {
            sessions.remove(token);
            drop(sessions);
            tracing::info!(%provider, session = %token, elapsed_secs, "oauth flow completed");
            self.publish_final(token, "completed", format!("{provider} linked"));
            return Ok(PollOutcome::Completed);
        }

        session.attempts += 1;
        let attempts = session.attempts;
        if attempts >= self.max_attempts {
            sessions.remove(token);
            drop(sessions);
            tracing::warn!(
                %provider,
                session = %token,
                attempts,
                elapsed_secs,
                "oauth flow timed out"
            );
            self.publish_final(
                token,
                "timeout",
                format!("{provider} authorization not confirmed after {attempts} attempts"),
            );
            return Ok(PollOutcome::TimedOut);
        }

        Ok(PollOutcome::Pending {
            attempts,
            remaining: self.max_attempts - attempts,
        })
    }

    pub fn cancel(&self, token: &SessionToken) -> Result<(), OAuthError> {
        let session = self
            .sessions()
            .remove(token)
            .ok_or(OAuthError::UnknownSession)?;
        tracing::info!(provider = %session.provider, session = %token, "oauth flow cancelled");
        self.publish_final(token, "cancelled", format!("{} cancelled", session.provider));
        Ok(())
    }

    /// Drop every pending session.
    pub fn cancel_all(&self) {
        let drained: Vec<(SessionToken, Session)> = self.sessions().drain().collect();
        for (token, session) in drained {
            self.publish_final(&token, "cancelled", format!("{} cancelled", session.provider));
        }
    }

    /// Poll every `interval` until the flow completes, times out or
    /// `cancel` fires.
    pub async fn wait_for_completion(
        &self,
        token: &SessionToken,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), OAuthError> {
        loop {
            match self.poll(token).await? {
                PollOutcome::Completed => return Ok(()),
                PollOutcome::TimedOut => {
                    return Err(OAuthError::Timeout {
                        attempts: self.max_attempts,
                    });
                }
                PollOutcome::Pending { .. } => {}
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = self.cancel(token);
                    return Err(OAuthError::Cancelled);
                }
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    fn publish(&self, token: &SessionToken, state: &str, message: String) {
        self.bus
            .publish(StatusEvent::new(EntityKind::OAuth, token.as_str(), state).with_message(message));
    }

    /// Terminal states only linger briefly in the snapshot; session tokens
    /// are never reused.
    fn publish_final(&self, token: &SessionToken, state: &str, message: String) {
        self.bus.publish_final(
            StatusEvent::new(EntityKind::OAuth, token.as_str(), state).with_message(message),
            self.session_linger,
        );
    }
}
