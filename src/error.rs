//! Error types for the entity registry.
//!
//! All errors are strongly typed using thiserror. The four families mirror
//! how the batch reacts to them:
//!
//! - [`ExternalError`]: a collaborator (LLM, NER backend) failed. Always
//!   recoverable by falling through to the next classification tier.
//! - [`InputError`]: a single mention is malformed. Skipped and reported.
//! - [`ConfigError`]: deployment configuration is unusable. Fatal at startup.
//! - [`CheckpointError`]: persisted progress cannot be trusted. The batch
//!   refuses to resume until the operator picks a fresh start.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of external collaborators (`TransientExternalFailure`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    /// The call exceeded its timeout.
    #[error("{backend} request timed out after {duration_ms}ms")]
    Timeout {
        /// Backend id
        backend: String,
        /// Timeout that elapsed
        duration_ms: u64,
    },

    /// The service asked the caller to back off.
    #[error("{backend} rejected the request as rate limited")]
    RateLimited {
        /// Backend id
        backend: String,
    },

    /// The credential was rejected; retrying will not help.
    #[error("{backend} rejected the credential (status {status})")]
    Unauthorized {
        /// Backend id
        backend: String,
        /// HTTP status
        status: u16,
    },

    /// Transport failure before a response arrived.
    #[error("{backend} network failure: {message}")]
    Network {
        /// Backend id
        backend: String,
        /// Transport error
        message: String,
    },

    /// A response arrived but could not be used.
    #[error("{backend} returned an unusable response: {message}")]
    InvalidResponse {
        /// Backend id
        backend: String,
        /// What was wrong with it
        message: String,
    },

    /// The backend is not configured or not running.
    #[error("{backend} is unavailable")]
    Unavailable {
        /// Backend id
        backend: String,
    },
}

impl ExternalError {
    /// Returns true if repeating the call later could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unauthorized { .. })
    }
}

/// Per-mention input problems (`MalformedInput`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// Nothing remains of the name after normalization.
    #[error("Entity name is empty after normalization (raw: {raw:?})")]
    EmptyName {
        /// Name as given
        raw: String,
    },

    /// The name is punctuation or whitespace only.
    #[error("Entity name has no alphanumeric characters (raw: {raw:?})")]
    NoAlphanumeric {
        /// Name as given
        raw: String,
    },

    /// The mention does not say which document it came from.
    #[error("Mention of {raw:?} has no document id")]
    EmptyDocumentId {
        /// Name as given
        raw: String,
    },

    /// An input line is not a mention record.
    #[error("Mention line {line} is not valid JSON: {message}")]
    UnparseableMention {
        /// 1-based input line
        line: usize,
        /// Parser error
        message: String,
    },
}

/// Configuration problems (`ConfigurationError`).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An enabled tier has no credential.
    #[error("The {tier} tier is enabled but credential variable '{variable}' is not set")]
    MissingCredential {
        /// Tier that needs it
        tier: String,
        /// Environment variable expected to hold it
        variable: String,
    },

    /// A setting could not be parsed or is out of range.
    #[error("Invalid value for '{key}': {value:?} ({reason})")]
    InvalidValue {
        /// Setting name
        key: String,
        /// Value as given
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// The build cannot provide a requested feature.
    #[error("Unsupported configuration: {reason}")]
    Unsupported {
        /// What is missing
        reason: String,
    },

    /// The taxonomy file is missing or invalid.
    #[error("Failed to load taxonomy from {path}: {message}")]
    Taxonomy {
        /// Taxonomy file
        path: PathBuf,
        /// Read or parse error
        message: String,
    },
}

/// Persisted progress that cannot be trusted (`DataCorruption`).
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The file exists but is not a checkpoint.
    #[error("Checkpoint {path} is unreadable: {message}")]
    Unreadable {
        /// Checkpoint file
        path: PathBuf,
        /// Read or parse error
        message: String,
    },

    /// The payload does not match its stored checksum.
    #[error("Checkpoint {path} failed its checksum (stored {stored:08x}, computed {computed:08x})")]
    ChecksumMismatch {
        /// Checkpoint file
        path: PathBuf,
        /// Checksum recorded in the file
        stored: u32,
        /// Checksum of the payload as read
        computed: u32,
    },

    /// The checkpoint was written by an incompatible format.
    #[error("Checkpoint {path} has unsupported format version {version}")]
    UnsupportedVersion {
        /// Checkpoint file
        path: PathBuf,
        /// Version found in the file
        version: u32,
    },

    /// The checkpoint could not be written.
    #[error("Failed to write checkpoint {path}: {message}")]
    WriteFailed {
        /// Checkpoint file
        path: PathBuf,
        /// Failing step
        message: String,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A collaborator failed.
    #[error("External failure: {0}")]
    External(#[from] ExternalError),

    /// A mention is malformed.
    #[error("Malformed input: {0}")]
    Input(#[from] InputError),

    /// Configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Persisted progress cannot be trusted.
    #[error("Data corruption: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A registry store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A bug or broken invariant.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong
        message: String,
    },
}

impl RegistryError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is an external collaborator failure.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }

    /// Returns true if this is a malformed-input error.
    #[must_use]
    pub const fn is_input(&self) -> bool {
        matches!(self, Self::Input(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if persisted state is corrupt.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Checkpoint(CheckpointError::Unreadable { .. })
            | Self::Checkpoint(CheckpointError::ChecksumMismatch { .. })
            | Self::Checkpoint(CheckpointError::UnsupportedVersion { .. }))
    }

    /// Returns true if the batch must stop rather than skip the item.
    ///
    /// Per-mention errors never abort a batch.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::External(_) | Self::Input(_) => false,
            Self::Config(_) | Self::Checkpoint(_) | Self::Storage(_) | Self::Io(_) => true,
            Self::Internal { .. } => true,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::External(e) => e.is_retryable(),
            Self::Input(_) | Self::Config(_) | Self::Checkpoint(_) => false,
            Self::Storage(_) | Self::Io(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
