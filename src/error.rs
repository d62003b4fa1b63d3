use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

/// Coarse classification of everything that can go wrong in this crate.
///
/// This mirrors the error-handling taxonomy of spec §7: each `Kind` maps to
/// exactly one recovery policy at the call site (scheduler, health monitor,
/// or poller), never to an error message format.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Network error, 5xx, or explicit 429 from a provider. The next
    /// scheduler tick retries; connection status is unaffected.
    Transient,
    /// Token refresh came back `invalid_grant`/revoked, or the provider
    /// responded with revoke semantics. The health monitor has already
    /// transitioned the connection by the time this is observed.
    Auth,
    /// A distributed lock, rate limit, or per-subscription sync cooldown is
    /// currently held by someone else.
    RateLimited,
    /// Referenced content (show, channel, item) is gone from the provider.
    Unavailable,
    /// Caller-supplied input failed validation.
    Validation,
    /// Row/entity could not be found, or caller does not own it.
    NotFound,
    /// Anything else: serialization, internal invariants, dependency errors.
    Internal,
}

/// Crate-wide error type. Carries a [`Kind`] for branching, an opaque
/// source for diagnostics, and a captured backtrace.
#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            source: None,
            backtrace: Backtrace::capture(),
        }
    }

    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.as_deref()?.downcast_ref::<E>()
    }

    #[must_use]
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        NotFound {
            reason: message.into(),
        }
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct NotFound {
    pub reason: String,
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not found: {}", self.reason)
    }
}

impl StdError for NotFound {}

impl From<NotFound> for Error {
    fn from(err: NotFound) -> Self {
        Error::with_source(Kind::NotFound, err)
    }
}

/// A distributed lock, rate limiter, or per-sync cooldown is currently held.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RateLimited {
    pub resource: String,
}

impl fmt::Display for RateLimited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate limited: {}", self.resource)
    }
}

impl StdError for RateLimited {}

impl From<RateLimited> for Error {
    fn from(err: RateLimited) -> Self {
        Error::with_source(Kind::RateLimited, err)
    }
}

/// No active [`crate::domain::ProviderConnection`] exists for `(user, provider)`.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct NoConnection;

impl fmt::Display for NoConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no active provider connection")
    }
}

impl StdError for NoConnection {}

impl From<NoConnection> for Error {
    fn from(err: NoConnection) -> Self {
        Error::with_source(Kind::Auth, err)
    }
}

/// Refresh responded with `invalid_grant` / `refresh_token_revoked`: no
/// inline recovery, the health monitor marks the connection `EXPIRED`.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RefreshInvalid;

impl fmt::Display for RefreshInvalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "refresh token is invalid or revoked")
    }
}

impl StdError for RefreshInvalid {}

impl From<RefreshInvalid> for Error {
    fn from(err: RefreshInvalid) -> Self {
        Error::with_source(Kind::Auth, err)
    }
}

/// Provider responded with 403 / revoke semantics: health monitor marks
/// the connection `REVOKED`.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct AccessRevoked;

impl fmt::Display for AccessRevoked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "access has been revoked")
    }
}

impl StdError for AccessRevoked {}

impl From<AccessRevoked> for Error {
    fn from(err: AccessRevoked) -> Self {
        Error::with_source(Kind::Auth, err)
    }
}

/// Referenced content (show, channel, video, episode) no longer exists on
/// the provider.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Unavailable {
    pub reason: String,
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unavailable: {}", self.reason)
    }
}

impl StdError for Unavailable {}

impl From<Unavailable> for Error {
    fn from(err: Unavailable) -> Self {
        Error::with_source(Kind::Unavailable, err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::with_source(Kind::Transient, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}
