use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Optional config file name (any format the `config` crate recognizes).
pub const CONFIG_FILE: &str = "uploader";

/// Prefix for environment overrides, e.g. `UPLOADER_WATCH_FOLDER`.
pub const ENV_PREFIX: &str = "UPLOADER";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Continuously synced folder (watched for new files)
    pub watch_folder: PathBuf,

    /// Single-slot cache folder owned by another application (polled)
    pub cache_folder: Option<PathBuf>,

    /// Local copies of cache files that finished uploading
    pub cache_archive_folder: PathBuf,

    /// Signatures already bridged from the cache folder
    pub processed_file: PathBuf,

    /// Recognized activity file extension
    pub extension: String,

    /// Wait after a creation event before uploading
    pub grace_period_ms: u64,

    /// Wait after copying a cache file into the watched folder
    pub bridge_delay_ms: u64,

    /// Cache folder polling interval
    pub poll_interval_secs: u64,

    /// Full rescan of the watched folder (0 = never)
    pub rescan_interval_secs: u64,

    /// Control API port
    pub port: u16,

    /// Sync history database
    pub database_url: String,

    /// External upload tool and its leading arguments; the file path is appended
    pub upload_command: String,
    pub upload_args: Vec<String>,

    /// Daily rolling log files go here when set
    pub log_dir: Option<PathBuf>,

    /// Status messages kept in memory
    pub log_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("activity-uploader");

        Self {
            watch_folder: dirs::home_dir()
                .map(|home| home.join("Dropbox").join("Apps").join("WahooFitness"))
                .unwrap_or_default(),
            cache_folder: None,
            cache_archive_folder: state_dir.join("cache_uploaded"),
            processed_file: state_dir.join("cache_processed.txt"),
            extension: crate::sync::DEFAULT_EXTENSION.to_string(),
            grace_period_ms: 1000,
            bridge_delay_ms: 1000,
            poll_interval_secs: 300,
            rescan_interval_secs: 300,
            port: 8787,
            database_url: format!("sqlite://{}", state_dir.join("history.db").display()),
            upload_command: "gupload".to_string(),
            upload_args: Vec::new(),
            log_dir: Some(state_dir.join("logs")),
            log_buffer_size: 200,
        }
    }
}

impl Config {
    /// Defaults, then `uploader.{toml,json,...}`, then `UPLOADER_*` environment.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Config::default())?)
            .add_source(::config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("upload_args"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.watch_folder.as_os_str().is_empty() {
            bail!("watch_folder must be set");
        }
        if self.extension.trim().is_empty() {
            bail!("extension must not be empty");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than zero");
        }
        if self.upload_command.trim().is_empty() {
            bail!("upload_command must be set");
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn bridge_delay(&self) -> Duration {
        Duration::from_millis(self.bridge_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rescan_interval(&self) -> Option<Duration> {
        (self.rescan_interval_secs > 0).then(|| Duration::from_secs(self.rescan_interval_secs))
    }
}

pub fn load_config() -> Result<Config> {
    Config::load()
}
