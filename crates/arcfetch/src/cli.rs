use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arcfetch_core::Credential;
use arcfetch_fetch::FetchConfig;
use clap::Parser;
use serde::Deserialize;
use url::Url;

#[derive(Clone, Debug, Parser)]
#[command(name = "arcfetch", version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
pub struct App {
    #[arg(required = true, help = "URLs to fetch")]
    pub urls: Vec<Url>,

    #[arg(short, long, help = "TOML settings file")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Digest history snapshot, loaded before and saved after the run")]
    pub history: Option<PathBuf>,

    #[arg(short, long, help = "Concurrent fetches")]
    pub workers: Option<usize>,

    #[arg(long, help = "Per-request length cap in bytes (0 = none)")]
    pub max_length: Option<u64>,

    #[arg(long, help = "Whole-transfer timeout in seconds (0 = none)")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Throughput cap in KB/s (0 = none)")]
    pub max_rate: Option<u64>,

    #[arg(long, help = "Also emit request records")]
    pub request_records: bool,

    #[arg(short, long, action = clap::ArgAction::Count, help = "More logging (-v debug, -vv trace)")]
    pub verbose: u8,
}

/// Contents of the `--config` file.
///
/// ```toml
/// workers = 4
///
/// [fetch]
/// max_length_bytes = 1048576
/// midfetch_rule = { rule = "reject-mime-prefix", prefixes = ["video/"] }
///
/// [[credentials]]
/// domain = "example.org"
/// login = "user"
/// password = "secret"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workers:         usize,
    pub key_by_length:   bool,
    pub request_records: bool,
    pub history:         Option<PathBuf>,
    pub fetch:           FetchConfig,
    pub credentials:     Vec<Credential>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers:         4,
            key_by_length:   false,
            request_records: false,
            history:         None,
            fetch:           FetchConfig::default(),
            credentials:     Vec::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Flags win over the file.
    pub fn apply(&mut self, app: &App) {
        if let Some(workers) = app.workers {
            self.workers = workers;
        }
        if let Some(history) = &app.history {
            self.history = Some(history.clone());
        }
        if let Some(max) = app.max_length {
            self.fetch.max_length_bytes = max;
        }
        if let Some(timeout) = app.timeout {
            self.fetch.timeout_seconds = timeout;
        }
        if let Some(rate) = app.max_rate {
            self.fetch.max_fetch_kb_sec = rate;
        }
        self.request_records |= app.request_records;
        self.workers = self.workers.max(1);
    }
}
