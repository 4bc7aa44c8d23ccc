//! Configuration for the `glasstodo` command-line client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/glasstodo/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.
//! [`AppConfig::load_or_skip_file`] lets the binary carry on without a broken
//! file while still honoring CLI and environment values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;

use glasstodo_proto::{Category, Priority};

use crate::persistence::STORAGE_KEY;
use crate::storage::file::{ChangeDetection, DEFAULT_POLL_INTERVAL};
use crate::view::{Filter, UnknownFilter};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// `[ui] default_filter` is not a known filter.
    #[error("invalid default_filter: {0}")]
    InvalidFilter(#[from] UnknownFilter),

    /// The storage key is empty.
    #[error("storage key must not be empty")]
    EmptyKey,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    storage: StorageFileConfig,
    ui: UiFileConfig,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    dir: Option<PathBuf>,
    key: Option<String>,
    /// `false` selects interval polling instead of the platform watcher.
    watch: Option<bool>,
    poll_interval_ms: Option<u64>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    default_filter: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding one file per storage key.
    pub storage_dir: PathBuf,
    /// Key the task collection is stored under.
    pub key: String,
    /// How outside changes to the storage directory are detected.
    pub change_detection: ChangeDetection,
    /// How often the storage directory is scanned when polling.
    pub poll_interval: Duration,
    /// Filter used by `list` when none is given.
    pub default_filter: Filter,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            key: STORAGE_KEY.to_string(),
            change_detection: ChangeDetection::Watch,
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_filter: Filter::All,
        }
    }
}

impl AppConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// if any config file cannot be parsed, or if a value is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Like [`load`](Self::load), but a config file that cannot be read,
    /// parsed or validated is skipped: the result is resolved from CLI and
    /// environment values over the defaults, and the file's error is handed
    /// back so the caller can report it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the CLI or environment values themselves
    /// are invalid (e.g. a blank `--key`).
    pub fn load_or_skip_file(cli: &CliArgs) -> Result<(Self, Option<ConfigError>), ConfigError> {
        let file_error = match load_config_file(cli.config.as_deref()) {
            Ok(file) => match Self::resolve(cli, &file) {
                Ok(config) => return Ok((config, None)),
                Err(e) => e,
            },
            Err(e) => e,
        };
        let config = Self::resolve(cli, &ConfigFile::default())?;
        Ok((config, Some(file_error)))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let key = cli
            .key
            .clone()
            .or_else(|| file.storage.key.clone())
            .unwrap_or(defaults.key);
        if key.trim().is_empty() {
            return Err(ConfigError::EmptyKey);
        }

        let default_filter = match file.ui.default_filter.as_deref() {
            Some(name) => name.parse()?,
            None => defaults.default_filter,
        };

        Ok(Self {
            storage_dir: cli
                .storage_dir
                .clone()
                .or_else(|| file.storage.dir.clone())
                .unwrap_or(defaults.storage_dir),
            key,
            change_detection: match file.storage.watch {
                Some(false) => ChangeDetection::Poll,
                _ => defaults.change_detection,
            },
            poll_interval: file
                .storage
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            default_filter,
        })
    }
}

/// Default storage directory: the platform data dir, else the temp dir.
fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("glasstodo")
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Task list manager with cross-process sync")]
pub struct CliArgs {
    /// Directory where task data is stored.
    #[arg(long, env = "GLASSTODO_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Storage key for the task collection.
    #[arg(long, env = "GLASSTODO_KEY")]
    pub key: Option<String>,

    /// Path to config file (default: `~/.config/glasstodo/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", env = "GLASSTODO_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Command to run (default: `list`).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands of the `glasstodo` binary.
///
/// Tasks are addressed by id or by any unique id prefix.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Add a task.
    Add {
        /// Task text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        category: Option<Category>,
        /// Due date (YYYY-MM-DD).
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    /// List tasks.
    List {
        /// all, active or completed.
        #[arg(long, short)]
        filter: Option<Filter>,
    },
    /// Flip a task between active and completed.
    Toggle { id: String },
    /// Replace a task's text.
    Edit {
        id: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Change individual fields of a task.
    Update {
        id: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        category: Option<Category>,
        /// Due date (YYYY-MM-DD).
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<NaiveDate>,
        /// Remove the due date.
        #[arg(long)]
        clear_due: bool,
    },
    /// Delete a task.
    Rm { id: String },
    /// Delete every completed task.
    ClearCompleted,
    /// Complete every task, or reopen all if all are complete.
    ToggleAll,
    /// Move the task at position FROM to position TO (1-based, as listed).
    Move { from: usize, to: usize },
    /// Show task counts and storage size.
    Stats,
    /// Print all tasks as JSON, or write them to a file.
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Replace all tasks with the valid records of a JSON file.
    Import { path: PathBuf },
    /// Delete all stored tasks.
    Clear,
    /// Print the list whenever another process changes it (Ctrl-C to stop).
    Watch,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("glasstodo").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
