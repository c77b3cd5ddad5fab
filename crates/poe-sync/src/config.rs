//! Configuration and presets for the claim synchronization engine.
//!
//! Provides sensible defaults with the ability to customize behavior
//! through builder-style setters.

use std::time::Duration;

use poe_core::{ClaimDecoder, ClaimSchema, DEFAULT_MAX_NOTE_BYTES};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Preset configurations for common use cases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Balanced defaults for an interactive client.
    #[default]
    Default,
    /// Slow or congested chains.
    /// - Long confirmation window (5 min)
    /// - Large event channel (4096)
    Patient,
    /// Short timeouts for tests and local dev chains.
    /// - Confirmation window (5s)
    /// - Small event channel (64)
    Testing,
}

impl Preset {
    /// Get the event channel capacity for this preset.
    pub fn event_channel_capacity(&self) -> usize {
        match self {
            Preset::Default => 1024,
            Preset::Patient => 4096,
            Preset::Testing => 64,
        }
    }

    /// How long a pending transfer/purchase waits for the ledger.
    pub fn confirmation_timeout(&self) -> Duration {
        match self {
            Preset::Default => Duration::from_secs(60),
            Preset::Patient => Duration::from_secs(300),
            Preset::Testing => Duration::from_secs(5),
        }
    }

    /// How long a superseded subscription gets to release itself.
    pub fn teardown_timeout(&self) -> Duration {
        match self {
            Preset::Default | Preset::Patient => Duration::from_secs(5),
            Preset::Testing => Duration::from_millis(500),
        }
    }
}

/// Configuration for a [`ClaimSync`](crate::ClaimSync) engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Storage layout of the target pallet.
    pub schema: ClaimSchema,
    /// Capacity of the event broadcast and the notification queue.
    pub event_channel_capacity: usize,
    /// Deadline for pending transfer/purchase confirmation.
    pub confirmation_timeout: Duration,
    /// Bound on awaiting a superseded subscription's release.
    pub teardown_timeout: Duration,
    /// Longest note/comment accepted by the decoder.
    pub max_note_bytes: usize,
    /// Collapse repeated identical values when the ledger allows it.
    pub dedup_idempotent: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::with_preset(Preset::Default)
    }
}

impl SyncConfig {
    /// Create a configuration for a schema with default settings.
    pub fn new(schema: ClaimSchema) -> Self {
        Self {
            schema,
            ..Default::default()
        }
    }

    /// Create a configuration from a preset.
    pub fn with_preset(preset: Preset) -> Self {
        Self {
            schema: ClaimSchema::default(),
            event_channel_capacity: preset.event_channel_capacity(),
            confirmation_timeout: preset.confirmation_timeout(),
            teardown_timeout: preset.teardown_timeout(),
            max_note_bytes: DEFAULT_MAX_NOTE_BYTES,
            dedup_idempotent: true,
        }
    }

    /// Configuration tuned for tests.
    pub fn testing() -> Self {
        Self::with_preset(Preset::Testing)
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(SyncError::Config(
                "event_channel_capacity must be positive".into(),
            ));
        }
        if self.confirmation_timeout.is_zero() {
            return Err(SyncError::Config(
                "confirmation_timeout must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn with_schema(mut self, schema: ClaimSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    pub fn with_max_note_bytes(mut self, max: usize) -> Self {
        self.max_note_bytes = max;
        self
    }

    pub fn with_dedup_idempotent(mut self, dedup: bool) -> Self {
        self.dedup_idempotent = dedup;
        self
    }

    /// Decoder for the configured layout.
    pub fn decoder(&self) -> ClaimDecoder {
        ClaimDecoder::new(self.schema).with_max_note_bytes(self.max_note_bytes)
    }
}
