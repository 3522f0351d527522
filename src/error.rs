use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for the ProxyPal control core.
///
/// Each subsystem defines its own error enum. Callers match on these (or on
/// [`ErrorClass`]) to decide whether to offer "try again", ask the user to
/// edit settings, or just report. Loading and CLI code keeps using
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum ControlError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Process handle ───────────────────────────────────────────────────
    #[error("process: {0}")]
    Process(#[from] ProcessError),

    // ── Proxy supervisor ─────────────────────────────────────────────────
    #[error("proxy: {0}")]
    Proxy(#[from] ProxyError),

    // ── Tunnels ──────────────────────────────────────────────────────────
    #[error("tunnel: {0}")]
    Tunnel(#[from] TunnelError),

    // ── OAuth ────────────────────────────────────────────────────────────
    #[error("oauth: {0}")]
    OAuth(#[from] OAuthError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse failure taxonomy shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    /// Bad credentials or malformed settings. Needs a user edit, never retried.
    FatalConfiguration,
    /// Unreachable host or dropped session. Retried with backoff.
    TransientNetwork,
    /// Port in use, already running, not running. Reported immediately.
    ResourceConflict,
    /// Proxy start or OAuth polling ran out of time.
    Timeout,
}

impl ControlError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) => ErrorClass::FatalConfiguration,
            Self::Process(e) => e.class(),
            Self::Proxy(e) => e.class(),
            Self::Tunnel(e) => e.class(),
            Self::OAuth(e) => e.class(),
            Self::Other(_) => ErrorClass::TransientNetwork,
        }
    }
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("failed to persist config: {0}")]
    Persist(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Process handle errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("executable not found: {program}")]
    NotFound { program: String },

    #[error("executable not runnable (permission denied): {program}")]
    PermissionDenied { program: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal {program}: {message}")]
    Signal { program: String, message: String },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } | Self::PermissionDenied { .. } => {
                ErrorClass::FatalConfiguration
            }
            Self::Spawn { .. } | Self::Signal { .. } | Self::Wait { .. } => {
                ErrorClass::ResourceConflict
            }
        }
    }

    /// Spawn failures caused by the binary itself rather than the system.
    pub fn is_missing_binary(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::PermissionDenied { .. })
    }
}

// ─── Proxy supervisor errors ─────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy is already running")]
    AlreadyRunning,

    #[error("proxy is not running")]
    NotRunning,

    #[error("port {0} is already in use")]
    PortInUse(u16),

    #[error("proxy did not accept connections on port {port} within {secs}s")]
    StartTimeout { port: u16, secs: u64 },

    #[error("proxy engine exited during startup ({0})")]
    ExitedDuringStartup(String),

    #[error("failed to launch proxy engine: {0}")]
    Spawn(#[from] ProcessError),

    #[error("failed to write engine config: {0}")]
    EngineConfig(String),

    #[error("management api: {0}")]
    Management(String),

    #[error("health check failed: {0}")]
    Health(String),
}

impl ProxyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyRunning | Self::NotRunning | Self::PortInUse(_) => {
                ErrorClass::ResourceConflict
            }
            Self::StartTimeout { .. } => ErrorClass::Timeout,
            Self::Spawn(e) => e.class(),
            Self::ExitedDuringStartup(_) | Self::EngineConfig(_) => ErrorClass::FatalConfiguration,
            Self::Management(_) | Self::Health(_) => ErrorClass::TransientNetwork,
        }
    }
}

// ─── Tunnel errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel {0} already exists")]
    DuplicateId(String),

    #[error("tunnel {0} not found")]
    NotFound(String),

    #[error("invalid tunnel config: {0}")]
    InvalidConfig(String),

    #[error("tunnel store: {0}")]
    Store(String),
}

impl TunnelError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateId(_) | Self::NotFound(_) => ErrorClass::ResourceConflict,
            Self::InvalidConfig(_) | Self::Store(_) => ErrorClass::FatalConfiguration,
        }
    }
}

// ─── OAuth errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("proxy is not running; start it before connecting {0}")]
    ProxyNotRunning(String),

    #[error("unsupported OAuth provider '{0}'")]
    UnsupportedProvider(String),

    #[error("{0} uses service account import, not OAuth")]
    CredentialImportOnly(String),

    #[error("authorization request failed: {0}")]
    Authority(String),

    #[error("failed to open authorization page: {0}")]
    Open(String),

    #[error("unknown or expired OAuth session")]
    UnknownSession,

    #[error("OAuth flow timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("OAuth flow cancelled")]
    Cancelled,

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl OAuthError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ProxyNotRunning(_) | Self::UnknownSession | Self::Cancelled => {
                ErrorClass::ResourceConflict
            }
            Self::UnsupportedProvider(_)
            | Self::CredentialImportOnly(_)
            | Self::InvalidCredential(_)
            | Self::Io(_) => ErrorClass::FatalConfiguration,
            Self::Authority(_) | Self::Open(_) => ErrorClass::TransientNetwork,
            Self::Timeout { .. } => ErrorClass::Timeout,
        }
    }
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, ControlError>;
