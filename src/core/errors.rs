//! KSL-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, KslError>;

/// Top-level error type for kbuild_slim.
#[derive(Debug, Error)]
pub enum KslError {
    #[error("[KSL-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[KSL-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[KSL-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[KSL-2001] {operation} failed: {} (errno {errno})", describe_errno(.errno))]
    Resource { operation: &'static str, errno: i32 },

    #[error("[KSL-2002] cannot watch {path}: {} (errno {errno})", describe_errno(.errno))]
    Path { path: PathBuf, errno: i32 },

    #[error(
        "[KSL-2101] event stream corrupt at offset {offset}: record declares {declared} bytes, {available} available"
    )]
    ProtocolCorruption {
        offset: usize,
        declared: usize,
        available: usize,
    },

    #[error("[KSL-2102] watch descriptor {descriptor} is not registered in this session")]
    UnknownDescriptor { descriptor: i32 },

    #[error(
        "[KSL-2103] kernel dropped file events ({details}); results cannot be trusted, re-run the build with fewer parallel jobs"
    )]
    EventsLost { details: String },

    #[error("[KSL-3001] failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[KSL-3002] build command exited with status {code}")]
    ChildFailed { code: i32 },

    #[error("[KSL-3003] {failed} file(s) could not be deleted; first failure at {path}: {details}")]
    Deletion {
        failed: usize,
        path: PathBuf,
        details: String,
    },

    #[error("[KSL-3101] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[KSL-3102] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },
}

impl KslError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "KSL-1001",
            Self::MissingConfig { .. } => "KSL-1002",
            Self::ConfigParse { .. } => "KSL-1003",
            Self::Resource { .. } => "KSL-2001",
            Self::Path { .. } => "KSL-2002",
            Self::ProtocolCorruption { .. } => "KSL-2101",
            Self::UnknownDescriptor { .. } => "KSL-2102",
            Self::EventsLost { .. } => "KSL-2103",
            Self::Spawn { .. } => "KSL-3001",
            Self::ChildFailed { .. } => "KSL-3002",
            Self::Deletion { .. } => "KSL-3003",
            Self::Io { .. } => "KSL-3101",
            Self::Serialization { .. } => "KSL-3102",
        }
    }

    /// Whether the failure indicates a bug in event handling rather than an
    /// environmental problem.
    #[must_use]
    pub const fn is_defect(&self) -> bool {
        matches!(
            self,
            Self::ProtocolCorruption { .. } | Self::UnknownDescriptor { .. }
        )
    }

    /// Process exit status for this failure.
    ///
    /// A failed build propagates its own status; everything else maps onto
    /// the small fixed set used by the CLI.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ChildFailed { code } => *code,
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. } => 1,
            Self::ProtocolCorruption { .. } | Self::UnknownDescriptor { .. } => 3,
            _ => 2,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn describe_errno(errno: &i32) -> String {
    let text = std::io::Error::from_raw_os_error(*errno).to_string();
    match text.rfind(" (os error") {
        Some(idx) => text[..idx].to_string(),
        None => text,
    }
}

impl From<serde_json::Error> for KslError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for KslError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
