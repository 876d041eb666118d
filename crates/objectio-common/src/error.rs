//! Error types for ObjectIO
//!
//! This module defines the error taxonomy shared by the disk gateway, the
//! storage engine and the internode client, together with the classification
//! that maps a (possibly wrapped) error onto a transport status and a
//! fatal/retryable verdict.

use thiserror::Error;

/// Common result type for ObjectIO operations
pub type Result<T> = std::result::Result<T, Error>;

/// Non-standard status used when the caller went away or its deadline passed
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

/// Common error type for ObjectIO
#[derive(Debug, Error)]
pub enum Error {
    // Drive addressing and identity
    #[error("drive not found")]
    DiskNotFound,

    #[error("drive stale")]
    DiskStale,

    // Volume errors
    #[error("volume not found: {0}")]
    VolumeNotFound(String),

    #[error("volume already exists: {0}")]
    VolumeExists(String),

    #[error("volume is not empty: {0}")]
    VolumeNotEmpty(String),

    // File errors
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file version not found: {0}")]
    FileVersionNotFound(String),

    #[error("file is corrupted: {0}")]
    FileCorrupt(String),

    #[error("file access denied: {0}")]
    FileAccessDenied(String),

    // Drive attach errors
    #[error("drive access denied: {0}")]
    DiskAccessDenied(String),

    #[error("drive does not support O_DIRECT: {0}")]
    UnsupportedDisk(String),

    #[error("drive is not a directory: {0}")]
    DiskNotDir(String),

    #[error("drive is faulty: {0}")]
    FaultyDisk(String),

    #[error("drive is full")]
    DiskFull,

    #[error("unexpected backend format: {0}")]
    BackendFormat(String),

    // Validation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Authentication
    #[error("no authentication token in request")]
    NoAuthToken,

    #[error("malformed authentication: {0}")]
    MalformedAuth(String),

    #[error("authentication failed")]
    Authentication,

    #[error("request time is skewed by more than the allowed tolerance")]
    SkewedAuthTime,

    // Cancellation
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    // Everything else
    #[error("drive I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// Root condition of an error, with all added context stripped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DiskNotFound,
    DiskStale,
    VolumeNotFound,
    VolumeExists,
    VolumeNotEmpty,
    FileNotFound,
    FileVersionNotFound,
    FileCorrupt,
    FileAccessDenied,
    DiskAccessDenied,
    UnsupportedDisk,
    DiskNotDir,
    FaultyDisk,
    DiskFull,
    BackendFormat,
    InvalidArgument,
    NoAuthToken,
    MalformedAuth,
    Authentication,
    SkewedAuthTime,
    Cancelled,
    DeadlineExceeded,
    DiskIo,
    Serialization,
    Internal,
}

/// Whether a condition may take the whole process down at startup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Systemic when every drive reports it; see the bootstrap aggregate rule
    Fatal,
    /// Transient or drive-local; the drive is retried
    Retryable,
}

/// Outcome of classifying an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub status: u16,
    pub verdict: Verdict,
}

impl ErrorKind {
    /// HTTP status used when this condition is reported to a caller
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::DiskNotFound
            | Self::VolumeNotFound
            | Self::FileNotFound
            | Self::FileVersionNotFound => 404,
            Self::DiskStale => 412,
            Self::NoAuthToken | Self::MalformedAuth | Self::Authentication | Self::SkewedAuthTime => {
                401
            }
            Self::Cancelled | Self::DeadlineExceeded => STATUS_CLIENT_CLOSED_REQUEST,
            Self::InvalidArgument => 400,
            _ => 403,
        }
    }

    #[must_use]
    pub const fn verdict(self) -> Verdict {
        match self {
            Self::UnsupportedDisk
            | Self::DiskNotDir
            | Self::DiskAccessDenied
            | Self::FileAccessDenied
            | Self::FaultyDisk
            | Self::BackendFormat => Verdict::Fatal,
            _ => Verdict::Retryable,
        }
    }

    /// Key used when comparing drive attach failures against each other.
    ///
    /// A file-level permission failure during attach is the same remediation
    /// as a drive-level one.
    #[must_use]
    pub const fn attach_key(self) -> Self {
        match self {
            Self::FileAccessDenied => Self::DiskAccessDenied,
            other => other,
        }
    }

    #[must_use]
    pub const fn is_auth(self) -> bool {
        matches!(
            self,
            Self::NoAuthToken | Self::MalformedAuth | Self::Authentication | Self::SkewedAuthTime
        )
    }
}

impl Error {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Wrap this error with additional context
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip every layer of added context
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut err = self;
        while let Self::Context { source, .. } = err {
            err = source;
        }
        err
    }

    /// Consume the error and return its root condition
    #[must_use]
    pub fn into_root(self) -> Self {
        let mut err = self;
        while let Self::Context { source, .. } = err {
            err = *source;
        }
        err
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::DiskNotFound => ErrorKind::DiskNotFound,
            Self::DiskStale => ErrorKind::DiskStale,
            Self::VolumeNotFound(_) => ErrorKind::VolumeNotFound,
            Self::VolumeExists(_) => ErrorKind::VolumeExists,
            Self::VolumeNotEmpty(_) => ErrorKind::VolumeNotEmpty,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::FileVersionNotFound(_) => ErrorKind::FileVersionNotFound,
            Self::FileCorrupt(_) => ErrorKind::FileCorrupt,
            Self::FileAccessDenied(_) => ErrorKind::FileAccessDenied,
            Self::DiskAccessDenied(_) => ErrorKind::DiskAccessDenied,
            Self::UnsupportedDisk(_) => ErrorKind::UnsupportedDisk,
            Self::DiskNotDir(_) => ErrorKind::DiskNotDir,
            Self::FaultyDisk(_) => ErrorKind::FaultyDisk,
            Self::DiskFull => ErrorKind::DiskFull,
            Self::BackendFormat(_) => ErrorKind::BackendFormat,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NoAuthToken => ErrorKind::NoAuthToken,
            Self::MalformedAuth(_) => ErrorKind::MalformedAuth,
            Self::Authentication => ErrorKind::Authentication,
            Self::SkewedAuthTime => ErrorKind::SkewedAuthTime,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::DiskIo(_) => ErrorKind::DiskIo,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Configuration(_) | Self::Internal(_) | Self::Context { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Classify by root condition
    #[must_use]
    pub fn classify(&self) -> Classification {
        let kind = self.kind();
        Classification {
            kind,
            status: kind.http_status(),
            verdict: kind.verdict(),
        }
    }

    /// Get HTTP status code
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        self.kind().http_status()
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind().http_status() == 404
    }

    /// Message of the root condition, as written to callers
    #[must_use]
    pub fn root_message(&self) -> String {
        self.root().to_string()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Attach context to the error side of a result
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }
}
