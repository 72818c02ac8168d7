use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("UNSD request failed: {0}")]
    SourceHttp(String),

    #[error("UNSD returned status {status}: {message}")]
    SourceStatus { status: u16, message: String },

    #[error("malformed SDMX response: {0}")]
    MalformedResponse(String),

    #[error("code {code} not found in codelist {codelist}")]
    UnknownCode { codelist: String, code: String },

    #[error("no ISO3 code for area name: {0}")]
    UnknownCountry(String),

    #[error("document store unavailable ({applied} records applied before failure): {message}")]
    StoreConnection { message: String, applied: u64 },

    #[error("failed to encode document: {0}")]
    DocumentEncode(String),

    #[error("index build failed on {collection}: {message}")]
    Index { collection: String, message: String },

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("invalid snapshot file {path}: {message}")]
    SnapshotFormat { path: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to install signal handler: {0}")]
    Signal(String),
}

impl SyncError {
    pub fn store(message: impl Into<String>) -> Self {
        SyncError::StoreConnection {
            message: message.into(),
            applied: 0,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            SyncError::ConfigRead(_) | SyncError::ConfigParse(_) | SyncError::InvalidConfig(_) => {
                FailureClass::Config
            }
            SyncError::SourceHttp(_)
            | SyncError::SourceStatus { .. }
            | SyncError::MalformedResponse(_) => FailureClass::Fetch,
            SyncError::UnknownCode { .. }
            | SyncError::UnknownCountry(_)
            | SyncError::DocumentEncode(_) => FailureClass::Decode,
            SyncError::StoreConnection { .. } => FailureClass::Store,
            SyncError::Index { .. } => FailureClass::Index,
            SyncError::SnapshotNotFound(_)
            | SyncError::SnapshotFormat { .. }
            | SyncError::Filesystem(_)
            | SyncError::Signal(_) => FailureClass::Filesystem,
        }
    }
}

/// Coarse failure taxonomy used for retry decisions and operator logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    Fetch,
    Decode,
    Store,
    Index,
    Config,
    Filesystem,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureClass::Fetch | FailureClass::Store)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Fetch => "fetch",
            FailureClass::Decode => "decode",
            FailureClass::Store => "store",
            FailureClass::Index => "index",
            FailureClass::Config => "config",
            FailureClass::Filesystem => "filesystem",
        }
    }
}
