//! Artifact removal.
//!
//! One strategy is chosen per session from [`CleaningConfig::mode`]. Every
//! strategy needs the occipital and frontal reference channels and returns a
//! recording with the same channels, rate and length as its input.

use std::fmt;
use std::str::FromStr;

use crate::RawEEG;
use crate::config::CleaningConfig;
use crate::error::{Result, SyncError};
use crate::reference::apply_reference;

pub mod asr;
#[cfg(feature = "learned-model")]
pub mod bilstm;
pub mod ica;
pub mod learned;
pub mod regression;

pub use learned::{LearnedCleaner, SequenceDenoiser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleaningMode {
    /// Independent component analysis with frontal-correlation rejection.
    Ica,
    /// Artifact subspace reconstruction.
    Asr,
    /// Pre-trained sequence denoiser.
    Learned,
    /// Least-squares EOG regression on the frontal channels.
    Regression,
    PassThrough,
}

impl CleaningMode {
    pub const ALL: [Self; 5] = [
        Self::Ica,
        Self::Asr,
        Self::Learned,
        Self::Regression,
        Self::PassThrough,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ica => "ica",
            Self::Asr => "asr",
            Self::Learned => "bilstm",
            Self::Regression => "regression",
            Self::PassThrough => "none",
        }
    }
}

impl fmt::Display for CleaningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleaningMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted)
            .ok_or_else(|| SyncError::UnknownMode {
                kind: "cleaning",
                mode: s.to_owned(),
            })
    }
}

/// Fails with [`SyncError::MissingChannels`] unless `raw` has every name in
/// `required`.
pub fn require_channels(raw: &RawEEG, required: &[String]) -> Result<()> {
    let missing = raw.info.missing_channels(required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SyncError::MissingChannels { missing })
    }
}

/// The session's artifact-removal strategy.
pub struct ArtifactRemoval {
    mode: CleaningMode,
    config: CleaningConfig,
    denoiser: Option<Box<dyn SequenceDenoiser + Send + Sync>>,
}

impl fmt::Debug for ArtifactRemoval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactRemoval")
            .field("mode", &self.mode)
            .field("config", &self.config)
            .field("denoiser", &self.denoiser.is_some())
            .finish()
    }
}

impl ArtifactRemoval {
    pub fn new(mode: CleaningMode, config: CleaningConfig) -> Self {
        Self {
            mode,
            config,
            denoiser: None,
        }
    }

    /// Parses the mode and, for the learned mode, loads the model weights.
    pub fn from_config(config: &CleaningConfig) -> Result<Self> {
        let mode = config.mode()?;
        let mut removal = Self::new(mode, config.clone());
        if mode == CleaningMode::Learned {
            removal.denoiser = Some(load_denoiser(config)?);
        }
        log::info!("Artifact removal: {mode}");
        Ok(removal)
    }

    pub fn with_denoiser(mut self, denoiser: Box<dyn SequenceDenoiser + Send + Sync>) -> Self {
        self.denoiser = Some(denoiser);
        self
    }

    pub fn mode(&self) -> CleaningMode {
        self.mode
    }

    pub fn config(&self) -> &CleaningConfig {
        &self.config
    }

    /// Cleans one recording.
    ///
    /// Channel requirements are checked before anything is computed.
    pub fn clean(&self, raw: &RawEEG) -> Result<RawEEG> {
        require_channels(raw, &self.config.required_channels())?;
        let raw = apply_reference(raw, self.config.reference);

        match self.mode {
            CleaningMode::PassThrough => Ok(raw),
            CleaningMode::Ica => ica::remove_ocular_components(&raw, &self.config),
            CleaningMode::Asr => asr::Asr::from_config(&self.config).clean(&raw),
            CleaningMode::Regression => regression::regress_eog(&raw, &self.config.frontal),
            CleaningMode::Learned => {
                let Some(denoiser) = &self.denoiser else {
                    return Err(SyncError::Model {
                        reason: "no denoiser loaded for the learned mode".to_owned(),
                    });
                };
                LearnedCleaner::new(denoiser.as_ref(), self.config.segment_seconds).clean(&raw)
            }
        }
    }
}

#[cfg(feature = "learned-model")]
fn load_denoiser(config: &CleaningConfig) -> Result<Box<dyn SequenceDenoiser + Send + Sync>> {
    let Some(path) = &config.model_path else {
        return Err(SyncError::InvalidConfig {
            reason: "cleaning mode 'bilstm' needs cleaning.model_path".to_owned(),
        });
    };
    Ok(Box::new(bilstm::BiLstmDenoiser::load(path)?))
}

#[cfg(not(feature = "learned-model"))]
fn load_denoiser(_config: &CleaningConfig) -> Result<Box<dyn SequenceDenoiser + Send + Sync>> {
    Err(SyncError::InvalidConfig {
        reason: "cleaning mode 'bilstm' needs the learned-model feature".to_owned(),
    })
}
