pub mod command;

pub use command::CommandUploader;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::Path;

static CONFLICT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b409\b|conflict").expect("valid conflict pattern"));

static STATUS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([45]\d\d)\b").expect("valid status pattern"));

/// Failure reported by an uploader adapter.
#[derive(Debug, Clone)]
pub struct UploadError {
    pub status: Option<u16>,
    pub message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Build from free text, picking up the first 4xx/5xx code in it.
    pub fn from_output(message: impl Into<String>) -> Self {
        let message = message.into();
        let status = STATUS_PATTERN
            .captures(&message)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        Self { status, message }
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "status {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for UploadError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The remote already has this activity.
    Conflict,
    Other,
}

/// Classifier used when an adapter does not override `classify`.
pub fn default_classify(error: &UploadError) -> FailureKind {
    if error.status == Some(409) || CONFLICT_PATTERN.is_match(&error.message) {
        FailureKind::Conflict
    } else {
        FailureKind::Other
    }
}

/// Remote upload capability. The wire protocol lives entirely behind this.
#[async_trait]
pub trait ActivityUploader: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<(), UploadError>;

    fn classify(&self, error: &UploadError) -> FailureKind {
        default_classify(error)
    }
}

/// Opaque login material handed to an uploader.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> anyhow::Result<Credentials>;
}

/// Reads `GARMIN_USER` and `GARMIN_PASSWORD` from the environment.
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn credentials(&self) -> anyhow::Result<Credentials> {
        let username = std::env::var("GARMIN_USER")
            .map_err(|_| anyhow::anyhow!("GARMIN_USER is not set"))?;
        let password = std::env::var("GARMIN_PASSWORD")
            .map_err(|_| anyhow::anyhow!("GARMIN_PASSWORD is not set"))?;
        Ok(Credentials { username, password })
    }
}
