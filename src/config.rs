//! Engine configuration
//!
//! Priority: environment variables > `config.toml` in the app data
//! directory > built-in defaults.
//!
//! ```toml
//! [search]
//! executable = "/usr/local/bin/rg"
//! batch_size = 50
//! memory_ceiling_mb = 512
//! ```

use crate::aggregate::batch::{AggregatorConfig, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL};
use crate::aggregate::cache::DEFAULT_METADATA_CACHE_SIZE;
use crate::aggregate::memory::DEFAULT_MEMORY_CEILING;
use crate::search::command::{CommandBuilder, DEFAULT_EXECUTABLE};
use crate::search::process::{DEFAULT_CANCEL_GRACE, DEFAULT_POLL_INTERVAL, ProcessRunner};
use crate::search::types::{DEFAULT_MAX_RESULTS, OutputFormat, SearchParameters};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const APP_NAME: &str = "rgstream";
const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "RGSTREAM_";

/// Top level of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub search: SearchConfigFile,
}

/// `[search]` section; every key is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchConfigFile {
    pub executable: Option<String>,
    pub output_format: Option<OutputFormat>,
    pub batch_size: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    pub memory_ceiling_mb: Option<u64>,
    pub context_lines: Option<u32>,
    pub max_results: Option<usize>,
    pub cancel_grace_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub metadata_cache_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    /// Search tool to run, a name on `PATH` or a full path
    pub executable: String,
    pub output_format: OutputFormat,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub memory_ceiling_mb: u64,
    /// Context lines for searches that do not ask for a specific count
    pub context_lines: u32,
    pub max_results: usize,
    pub cancel_grace_ms: u64,
    pub poll_interval_ms: u64,
    pub metadata_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            output_format: OutputFormat::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
            memory_ceiling_mb: DEFAULT_MEMORY_CEILING / (1024 * 1024),
            context_lines: 0,
            max_results: DEFAULT_MAX_RESULTS,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            metadata_cache_size: DEFAULT_METADATA_CACHE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Load config with priority: environment variables > config file > defaults
    pub fn load() -> Self {
        let file = config_path()
            .ok()
            .and_then(|path| Self::load_from_file(&path));
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Parse a config file. Returns None if it doesn't exist or can't be parsed.
    pub fn load_from_file(path: &Path) -> Option<ConfigFile> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(file) => {
                debug!(path = %path.display(), "loaded config file");
                Some(file)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
                None
            }
        }
    }

    /// Layer file values and then variables from `env` over the defaults
    pub fn resolve(file: Option<ConfigFile>, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(file) = file {
            let s = file.search;
            if let Some(v) = s.executable {
                config.executable = v;
            }
            if let Some(v) = s.output_format {
                config.output_format = v;
            }
            if let Some(v) = s.batch_size {
                config.batch_size = v;
            }
            if let Some(v) = s.flush_interval_ms {
                config.flush_interval_ms = v;
            }
            if let Some(v) = s.memory_ceiling_mb {
                config.memory_ceiling_mb = v;
            }
            if let Some(v) = s.context_lines {
                config.context_lines = v;
            }
            if let Some(v) = s.max_results {
                config.max_results = v;
            }
            if let Some(v) = s.cancel_grace_ms {
                config.cancel_grace_ms = v;
            }
            if let Some(v) = s.poll_interval_ms {
                config.poll_interval_ms = v;
            }
            if let Some(v) = s.metadata_cache_size {
                config.metadata_cache_size = v;
            }
        }

        let var = |name: &str| env(&format!("{}{}", ENV_PREFIX, name));
        if let Some(v) = var("RG_PATH") {
            config.executable = v;
        }
        override_parsed(&mut config.output_format, var("FORMAT"));
        override_parsed(&mut config.batch_size, var("BATCH_SIZE"));
        override_parsed(&mut config.flush_interval_ms, var("FLUSH_MS"));
        override_parsed(&mut config.memory_ceiling_mb, var("MEMORY_CEILING_MB"));
        override_parsed(&mut config.context_lines, var("CONTEXT"));
        override_parsed(&mut config.max_results, var("MAX_RESULTS"));
        override_parsed(&mut config.cancel_grace_ms, var("CANCEL_GRACE_MS"));
        override_parsed(&mut config.poll_interval_ms, var("POLL_MS"));
        override_parsed(&mut config.metadata_cache_size, var("CACHE_SIZE"));

        config.batch_size = config.batch_size.max(1);
        config.max_results = config.max_results.max(1);
        config.poll_interval_ms = config.poll_interval_ms.max(1);
        config
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn memory_ceiling_bytes(&self) -> u64 {
        self.memory_ceiling_mb.saturating_mul(1024 * 1024)
    }

    pub fn aggregator(&self, max_results: usize) -> AggregatorConfig {
        AggregatorConfig {
            batch_size: self.batch_size,
            flush_interval: self.flush_interval(),
            memory_ceiling: self.memory_ceiling_bytes(),
            max_results,
        }
    }

    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(self.cancel_grace(), self.poll_interval())
    }

    pub fn command_builder(&self) -> CommandBuilder {
        CommandBuilder::new(&self.executable, self.output_format)
    }

    /// Parameters carrying this config's defaults
    pub fn parameters(&self, pattern: impl Into<String>, root: impl Into<PathBuf>) -> SearchParameters {
        SearchParameters::new(pattern, root)
            .with_context(self.context_lines)
            .with_max_results(self.max_results)
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, value: Option<String>) {
    if let Some(parsed) = value.and_then(|v| v.trim().parse().ok()) {
        *target = parsed;
    }
}

/// Get the application data directory
pub fn app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        // Linux/Unix: XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.context("Could not determine app data directory")?;
    Ok(base.join(APP_NAME))
}

/// Get the path to the config file
pub fn config_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join(CONFIG_FILE))
}
