use super::{ActivityUploader, Credentials, UploadError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Uploads by running an external tool: `<program> <args...> <file>`.
///
/// Credentials travel in `UPLOADER_USERNAME` / `UPLOADER_PASSWORD`. A
/// non-zero exit becomes an `UploadError` built from stderr (or stdout when
/// stderr is empty).
#[derive(Debug, Clone)]
pub struct CommandUploader {
    program: String,
    args: Vec<String>,
    credentials: Option<Credentials>,
}

impl CommandUploader {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

#[async_trait]
impl ActivityUploader for CommandUploader {
    async fn upload(&self, path: &Path) -> Result<(), UploadError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(credentials) = &self.credentials {
            cmd.env("UPLOADER_USERNAME", &credentials.username)
                .env("UPLOADER_PASSWORD", &credentials.password);
        }

        debug!("Running upload command {} for {}", self.program, path.display());

        let output = cmd
            .output()
            .await
            .map_err(|e| UploadError::new(format!("failed to run {}: {}", self.program, e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let text = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        let text = if text.is_empty() {
            format!("{} exited with {}", self.program, output.status)
        } else {
            text
        };

        Err(UploadError::from_output(text))
    }
}
