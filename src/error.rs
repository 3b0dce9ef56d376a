//! Error types for the synchronization pipeline.

use thiserror::Error;

/// Crate-level error.
///
/// `MissingChannels`, `UnknownMode` and `InvalidConfig` are configuration
/// errors and abort the current round. Data-absence and shape mismatches are
/// not errors at all: they are logged and the affected pair is skipped.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Recording lacks channels the pipeline requires
    #[error("Recording is missing required channels: {missing:?}")]
    MissingChannels {
        /// Names that were not found
        missing: Vec<String>,
    },

    /// Unrecognized cleaning or connectivity mode string
    #[error("Unknown {kind} mode '{mode}'")]
    UnknownMode {
        /// Which mode family was being parsed
        kind: &'static str,
        /// The offending string
        mode: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong
        reason: String,
    },

    /// Array dimensions do not line up
    #[error("Invalid shape: {reason}")]
    InvalidShape {
        /// What was wrong
        reason: String,
    },

    /// Filter design or application failed
    #[error("Filtering failed: {reason}")]
    Filter {
        /// Reason for failure
        reason: String,
    },

    /// A matrix decomposition did not produce a usable result
    #[error("Decomposition failed: {reason}")]
    Decomposition {
        /// Reason for failure
        reason: String,
    },

    /// Denoising model could not be loaded or run
    #[error("Model inference failed: {reason}")]
    Model {
        /// Reason for failure
        reason: String,
    },

    /// Epoch construction failed outside of a recoverable path
    #[error(transparent)]
    Epoch(#[from] EpochError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[cfg(feature = "learned-model")]
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl SyncError {
    /// Errors that stem from configuration rather than data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingChannels { .. }
                | Self::UnknownMode { .. }
                | Self::InvalidConfig { .. }
                | Self::ConfigParse(_)
        )
    }
}

/// Failure to build an epoch set under the current settings.
///
/// Recoverable: the epoching pass retries per label and then skips.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EpochError {
    /// A label in the event map has no event in the selected range
    #[error("No matching events found for '{label}'")]
    NoMatchingEvents {
        /// Event label
        label: String,
    },

    /// Every candidate window was out of bounds or rejected
    #[error("All {candidates} candidate epochs were dropped")]
    AllDropped {
        /// Number of windows considered
        candidates: usize,
    },

    /// Baseline interval does not overlap the epoch window
    #[error("Baseline [{start}, {end}] s lies outside the epoch window [{tmin}, {tmax}] s")]
    BaselineOutsideWindow {
        /// Baseline start (seconds)
        start: f64,
        /// Baseline end (seconds)
        end: f64,
        /// Window start (seconds)
        tmin: f64,
        /// Window end (seconds)
        tmax: f64,
    },

    /// Picked channels are not in the recording
    #[error("Channels not found: {missing:?}")]
    MissingChannels {
        /// Names that were not found
        missing: Vec<String>,
    },

    /// The pre-epoching band-pass failed
    #[error("Band-pass before epoching failed: {reason}")]
    Filter {
        /// Reason for failure
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, SyncError>;
