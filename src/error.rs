use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SleuthError {
    #[error("missing config file houndsleuth.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid job identity: {0}")]
    InvalidJobId(String),

    #[error("bucket credentials rejected: {0}")]
    Credentials(String),

    #[error("bucket request failed: {0}")]
    BucketHttp(String),

    #[error("bucket returned status {status}: {message}")]
    BucketStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("failed to start handler: {0}")]
    HandlerSpawn(String),

    #[error("object key escapes its job folder: {0}")]
    UnsafeObjectKey(String),
}

impl SleuthError {
    /// Credential failures abort the whole run; everything else is recovered
    /// per prefix or per job.
    pub fn is_credential(&self) -> bool {
        matches!(self, SleuthError::Credentials(_))
    }
}
