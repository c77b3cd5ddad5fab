//! Structured logging for PoE claim sync
//!
//! Console output (pretty or JSONL) plus optional rotated JSONL files.
//! Lines emitted by the sync engine carry its `claim_sync` span, so JSONL
//! output shows the session and selected account of every line.
//!
//! # Quick Start
//!
//! ```ignore
//! use poe_logging::{LogConfig, PoeSubscriberBuilder};
//!
//! // JSONL to stdout
//! let _guard = PoeSubscriberBuilder::new().init()?;
//!
//! // `poe -vv`: sync crates at debug on stderr, plus rotated files
//! let _guard = PoeSubscriberBuilder::new()
//!     .with_config(LogConfig::cli(2).with_file_output("./logs"))
//!     .init()?;
//! ```
//!
//! `RUST_LOG`, when set, replaces every level in the config.

pub mod config;
pub mod layers;

pub use config::{
    ConsoleFormat, FileConfig, LogConfig, RotationStrategy, SUBSCRIPTION_TARGET, SYNC_TARGETS,
};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::io::IsTerminal;

use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Errors raised while setting up logging
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid filter directive: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("log file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log appender error: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("subscriber already set: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Builder for the global logging subscriber
#[derive(Debug, Default)]
pub struct PoeSubscriberBuilder {
    config: LogConfig,
}

impl PoeSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the level of the claim-sync crates
    pub fn with_sync_level(mut self, level: impl Into<String>) -> Self {
        self.config.sync_level = Some(level.into());
        self
    }

    pub fn with_console(mut self, console: ConsoleFormat) -> Self {
        self.config.console = console;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// The filter this builder would install
    pub fn filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let mut filter = EnvFilter::try_new(&self.config.default_level)?;
        for directive in self.config.directives() {
            let directive: Directive = directive.parse()?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }

    /// Install the subscriber globally
    ///
    /// Returns the file writer guard when file output is enabled; keep it
    /// alive until the program exits or buffered lines are lost.
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let filter = self.filter()?;

        let pretty_console = (self.config.console == ConsoleFormat::Pretty).then(|| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(true)
        });
        let jsonl_console = (self.config.console == ConsoleFormat::Jsonl)
            .then(|| layers::jsonl_layer(std::io::stdout));

        let (file_layer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = layers::file_writer(file_config)?;
                (Some(layers::jsonl_layer(writer)), Some(guard))
            }
            None => (None, None),
        };

        Registry::default()
            .with(filter)
            .with(pretty_console)
            .with(jsonl_console)
            .with(file_layer)
            .try_init()?;
        Ok(guard)
    }
}

/// JSONL to stdout
pub fn init_default() -> Result<(), LoggingError> {
    PoeSubscriberBuilder::new().init().map(|_| ())
}

/// Minimal output; a subscriber already installed is left in place
pub fn init_testing() {
    let _ = PoeSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}
