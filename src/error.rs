// src/error.rs
//
// =============================================================================
// NMR BATCH: ERROR TAXONOMY (v 0.1 )
// =============================================================================
//
// Every condition the scheduling core can raise.
//
// Only `UnresolvedParameterSet` is recoverable: the loader logs it and
// substitutes the default parameter set. Everything else ends the run.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    /// Unknown rack layout or an invalid settings value.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Batch description that cannot be turned into samples.
    #[error("Malformed batch: {0}")]
    MalformedBatch(String),

    #[error("Unsupported batch file '{0}': only TOML, JSON or YAML files are supported")]
    UnsupportedBatchFormat(String),

    /// Logical sample position outside the concatenated rack index space.
    #[error("No such rack position exists: {position} (valid range 1..={capacity})")]
    PositionOutOfRange { position: i64, capacity: usize },

    #[error("Unknown parameter set for sample {position} - using {fallback}")]
    UnresolvedParameterSet { position: i64, fallback: String },

    /// A spectrometer command failed. Never retried.
    #[error("Instrument command '{command}' failed: {reason}")]
    InstrumentCommandFailure { command: String, reason: String },
}

impl AcquisitionError {
    /// Wraps a transport error raised while issuing `command`.
    pub fn instrument(command: impl Into<String>, err: anyhow::Error) -> Self {
        Self::InstrumentCommandFailure {
            command: command.into(),
            reason: format!("{:#}", err),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnresolvedParameterSet { .. })
    }
}
