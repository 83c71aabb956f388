use std::fmt;

/// The category of a failure, per the propagation policy: transient errors are
/// retried with backoff, fatal errors fail the current deployment, `Aborted`
/// skips retries entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// Required configuration is missing, contradictory, or malformed.
    Config,
    /// The server rejected the last request with 401; caller should clear the
    /// cached token and re-authorize.
    NotAuthorized,
    /// Worth retrying with backoff (network errors, 5xx).
    Transient,
    /// Not worth retrying; the current deployment must be abandoned.
    Fatal,
    /// The server returned 409: the deployment was aborted remotely.
    Aborted,
    /// `commitUpdate` called with no pending update.
    NothingToCommit,
    /// Payload larger than the destination partition.
    NoSpace,
    /// Malformed input (boot-env lines, JSON, key=value helper output, ...).
    Parse,
    /// Filesystem or subprocess I/O failure.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: &'static str = self.into();
        write!(f, "{s}")
    }
}

/// Crate-wide error type. Carries the routing `kind` plus an optional source
/// chain, the way the teacher's `TridentError` wraps a category enum with a
/// `#[source]` chain rather than a single flat string.
#[derive(Debug)]
pub struct AgentError {
    kind: ErrorKind,
    message: String,
    source: Option<anyhow::Error>,
}

impl AgentError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient)
    }

    pub fn is_not_authorized(&self) -> bool {
        matches!(self.kind, ErrorKind::NotAuthorized)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.kind, ErrorKind::Aborted)
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::with_source(ErrorKind::Io, "I/O failure", err)
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::with_source(ErrorKind::Parse, "failed to parse JSON", err)
    }
}

/// Extension trait for attaching an `AgentError` kind/message to any error,
/// mirroring the teacher's `TridentResultExt::message`/`structured` helpers.
pub trait ResultExt<T> {
    fn agent_err(self, kind: ErrorKind, message: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn agent_err(self, kind: ErrorKind, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| AgentError::with_source(kind, message, e.into()))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
