use crate::error::OAuthError;

/// Providers the engine can link through a browser flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OAuthProvider {
    Claude,
    #[strum(serialize = "openai")]
    OpenAi,
    Gemini,
    Qwen,
    #[strum(serialize = "iflow")]
    IFlow,
    Antigravity,
}

impl OAuthProvider {
    /// Resolve a user-facing provider name.
    ///
    /// `vertex` is rejected with [`OAuthError::CredentialImportOnly`]: it is
    /// linked by importing a service account file instead.
    pub fn parse(name: &str) -> Result<Self, OAuthError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Self::Claude),
            "openai" | "codex" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            "qwen" => Ok(Self::Qwen),
            "iflow" => Ok(Self::IFlow),
            "antigravity" => Ok(Self::Antigravity),
            "vertex" => Err(OAuthError::CredentialImportOnly("vertex".into())),
            other => Err(OAuthError::UnsupportedProvider(other.to_string())),
        }
    }

    /// Management API path that issues the authorization URL.
    pub fn auth_endpoint(self) -> &'static str {
        match self {
            Self::Claude => "anthropic-auth-url",
            Self::OpenAi => "codex-auth-url",
            Self::Gemini => "gemini-cli-auth-url",
            Self::Qwen => "qwen-auth-url",
            Self::IFlow => "iflow-auth-url",
            Self::Antigravity => "antigravity-auth-url",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve() {
        assert_eq!(OAuthProvider::parse("Anthropic").unwrap(), OAuthProvider::Claude);
        assert_eq!(OAuthProvider::parse("codex").unwrap(), OAuthProvider::OpenAi);
        assert_eq!(OAuthProvider::parse(" gemini ").unwrap(), OAuthProvider::Gemini);
    }

    #[test]
    fn endpoints_match_engine_routes() {
        assert_eq!(OAuthProvider::Claude.auth_endpoint(), "anthropic-auth-url");
        assert_eq!(OAuthProvider::OpenAi.auth_endpoint(), "codex-auth-url");
        assert_eq!(OAuthProvider::Gemini.auth_endpoint(), "gemini-cli-auth-url");
        assert_eq!(OAuthProvider::IFlow.to_string(), "iflow");
    }

    #[test]
    fn vertex_and_unknown_are_rejected() {
        assert!(matches!(
            OAuthProvider::parse("vertex"),
            Err(OAuthError::CredentialImportOnly(_))
        ));
        assert!(matches!(
            OAuthProvider::parse("myspace"),
            Err(OAuthError::UnsupportedProvider(name)) if name == "myspace"
        ));
    }
}
