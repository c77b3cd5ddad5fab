//! What the claim-sync tools log, and where

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Crates whose level follows [`LogConfig::sync_level`]
pub const SYNC_TARGETS: &[&str] = &["poe_core", "poe_sync", "poe_cli"];

/// Target of the subscription manager, traced by
/// [`LogConfig::trace_subscriptions`]
pub const SUBSCRIPTION_TARGET: &str = "poe_sync::subscription";

/// Logging configuration
///
/// `RUST_LOG`, when set, replaces both levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for dependencies and anything outside [`SYNC_TARGETS`]
    pub default_level: String,
    /// Level for the claim-sync crates; `None` leaves them at `default_level`
    pub sync_level: Option<String>,
    /// Log every value the subscription manager forwards
    pub trace_subscriptions: bool,
    pub console: ConsoleFormat,
    /// Rotated JSONL files, in addition to the console
    pub file: Option<FileConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            sync_level: None,
            trace_subscriptions: false,
            console: ConsoleFormat::Jsonl,
            file: None,
        }
    }
}

impl LogConfig {
    /// Human-readable output for the `poe` binary
    ///
    /// Dependencies stay at `warn`. Each step of `verbosity` raises the
    /// claim-sync crates one level, from `warn` up to `trace`, where
    /// subscription tracing is switched on as well.
    pub fn cli(verbosity: u8) -> Self {
        let sync_level = match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        Self {
            default_level: "warn".to_string(),
            sync_level: Some(sync_level.to_string()),
            trace_subscriptions: verbosity >= 3,
            console: ConsoleFormat::Pretty,
            file: None,
        }
    }

    /// JSONL files only, rotated daily
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            sync_level: Some("info".to_string()),
            console: ConsoleFormat::Off,
            file: Some(FileConfig {
                directory: log_dir,
                max_files: Some(30),
                ..FileConfig::default()
            }),
            ..Self::default()
        }
    }

    /// Warnings only, readable in test output
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            console: ConsoleFormat::Pretty,
            ..Self::default()
        }
    }

    /// Also write rotated JSONL files under `directory`
    pub fn with_file_output(mut self, directory: impl Into<PathBuf>) -> Self {
        self.file = Some(FileConfig {
            directory: directory.into(),
            ..FileConfig::default()
        });
        self
    }

    /// Filter directives added on top of the default level
    pub fn directives(&self) -> Vec<String> {
        let mut directives: Vec<String> = match &self.sync_level {
            Some(level) => SYNC_TARGETS
                .iter()
                .map(|target| format!("{target}={level}"))
                .collect(),
            None => Vec::new(),
        };
        if self.trace_subscriptions {
            directives.push(format!("{SUBSCRIPTION_TARGET}=trace"));
        }
        directives
    }
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleFormat {
    /// One JSON object per line on stdout
    #[default]
    Jsonl,
    /// Human-readable lines on stderr
    Pretty,
    Off,
}

/// File output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name prefix
    pub prefix: String,
    pub rotation: RotationStrategy,
    /// Rotated files to retain
    pub max_files: Option<usize>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "poe-sync".to_string(),
            rotation: RotationStrategy::Daily,
            max_files: Some(7),
        }
    }
}

/// File rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// Single file, truncated on start
    Never,
}
