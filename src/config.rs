use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cleaning::CleaningMode;
use crate::connectivity::{self, ConnectivityMode};
use crate::error::{Result, SyncError};

/// Band label -> `[low, high]` Hz.
pub type BandTable = BTreeMap<String, [f64; 2]>;

/// Event label -> event code.
pub type EventDict = BTreeMap<String, i32>;

#[derive(serde::Deserialize, serde::Serialize, PartialEq, Eq, Clone, Copy, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceType {
    #[default]
    Original,
    AverageReference,
}

/// Filter corners used before cutting epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochingConfig {
    #[serde(default = "EpochingConfig::default_l_freq")]
    pub l_freq: f64,
    /// Low-pass for the current-block attempt; `None` = high-pass only.
    #[serde(
        default = "EpochingConfig::default_block_h_freq",
        skip_serializing_if = "Option::is_none"
    )]
    pub block_h_freq: Option<f64>,
    /// Low-pass of the per-label retry.
    #[serde(default = "EpochingConfig::default_fallback_h_freq")]
    pub fallback_h_freq: f64,
    /// Low-pass for full-session epochs; `None` = high-pass only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_h_freq: Option<f64>,
    #[serde(default = "EpochingConfig::default_filter_order")]
    pub filter_order: usize,
}

impl EpochingConfig {
    fn default_l_freq() -> f64 {
        1.0
    }
    fn default_block_h_freq() -> Option<f64> {
        Some(40.0)
    }
    fn default_fallback_h_freq() -> f64 {
        40.0
    }
    fn default_filter_order() -> usize {
        2
    }
}

impl Default for EpochingConfig {
    fn default() -> Self {
        Self {
            l_freq: Self::default_l_freq(),
            block_h_freq: Self::default_block_h_freq(),
            fallback_h_freq: Self::default_fallback_h_freq(),
            session_h_freq: None,
            filter_order: Self::default_filter_order(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningConfig {
    /// `ica`, `asr`, `bilstm`, `regression` or `none`.
    #[serde(default = "CleaningConfig::default_mode")]
    pub mode: String,
    #[serde(default = "CleaningConfig::default_occipital")]
    pub occipital: Vec<String>,
    /// Frontal channels, used as EOG proxies.
    #[serde(default = "CleaningConfig::default_frontal")]
    pub frontal: Vec<String>,
    #[serde(default)]
    pub reference: ReferenceType,
    #[serde(default = "CleaningConfig::default_ica_threshold")]
    pub ica_threshold: f64,
    #[serde(default = "CleaningConfig::default_ica_seed")]
    pub ica_seed: u64,
    #[serde(default = "CleaningConfig::default_ica_max_iter")]
    pub ica_max_iter: usize,
    #[serde(default = "CleaningConfig::default_ica_tol")]
    pub ica_tol: f64,
    #[serde(default = "CleaningConfig::default_asr_cutoff")]
    pub asr_cutoff: f64,
    #[serde(default = "CleaningConfig::default_asr_window_seconds")]
    pub asr_window_seconds: f64,
    #[serde(default = "CleaningConfig::default_segment_seconds")]
    pub segment_seconds: f64,
    /// safetensors weights of the BiLSTM denoiser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
}

impl CleaningConfig {
    fn default_mode() -> String {
        "none".to_owned()
    }
    fn default_occipital() -> Vec<String> {
        vec!["O1".to_owned(), "O2".to_owned()]
    }
    fn default_frontal() -> Vec<String> {
        vec!["Fp1".to_owned(), "Fp2".to_owned()]
    }
    fn default_ica_threshold() -> f64 {
        0.7
    }
    fn default_ica_seed() -> u64 {
        97
    }
    fn default_ica_max_iter() -> usize {
        200
    }
    fn default_ica_tol() -> f64 {
        1e-4
    }
    fn default_asr_cutoff() -> f64 {
        20.0
    }
    fn default_asr_window_seconds() -> f64 {
        0.5
    }
    fn default_segment_seconds() -> f64 {
        2.0
    }

    /// Parses `mode`; an unknown string is a configuration error.
    pub fn mode(&self) -> Result<CleaningMode> {
        CleaningMode::from_str(&self.mode)
    }

    /// Occipital then frontal channels.
    pub fn required_channels(&self) -> Vec<String> {
        self.occipital
            .iter()
            .chain(self.frontal.iter())
            .cloned()
            .collect()
    }
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            mode: Self::default_mode(),
            occipital: Self::default_occipital(),
            frontal: Self::default_frontal(),
            reference: ReferenceType::default(),
            ica_threshold: Self::default_ica_threshold(),
            ica_seed: Self::default_ica_seed(),
            ica_max_iter: Self::default_ica_max_iter(),
            ica_tol: Self::default_ica_tol(),
            asr_cutoff: Self::default_asr_cutoff(),
            asr_window_seconds: Self::default_asr_window_seconds(),
            segment_seconds: Self::default_segment_seconds(),
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "ExperimentConfig::default_exp_name")]
    pub exp_name: String,
    /// Stimulus flicker frequency (Hz).
    #[serde(default = "ExperimentConfig::default_flicker_freq")]
    pub flicker_freq: f64,
    /// Trial length (seconds).
    #[serde(default = "ExperimentConfig::default_trial_len")]
    pub trial_len: f64,
    #[serde(default = "ExperimentConfig::default_trials_per_block")]
    pub trials_per_block: usize,
    #[serde(default = "ExperimentConfig::default_n_blocks")]
    pub n_blocks: usize,
    /// Channels compared between subjects.
    #[serde(default = "ExperimentConfig::default_channels")]
    pub channels: Vec<String>,
    #[serde(default = "ExperimentConfig::default_sampling_freq")]
    pub sampling_freq: f64,
    #[serde(default = "ExperimentConfig::default_freq_bands")]
    pub freq_bands: BandTable,
    #[serde(default = "ExperimentConfig::default_tmin")]
    pub tmin: f64,
    #[serde(default = "ExperimentConfig::default_tmax")]
    pub tmax: f64,
    /// Baseline interval in seconds relative to the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<[f64; 2]>,
    #[serde(default)]
    pub detrend: bool,
    /// Peak-to-peak rejection threshold, in recording units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_peak_to_peak: Option<f64>,
    /// Append results to `<output_dir>/<exp_name>.csv`.
    #[serde(default)]
    pub record: bool,
    #[serde(default = "ExperimentConfig::default_output_dir")]
    pub output_dir: PathBuf,
    /// Duplicate each recording to simulate a second subject.
    #[serde(default)]
    pub duplicate: bool,
    #[serde(default = "ExperimentConfig::default_event_dict")]
    pub event_dict: EventDict,
    /// Only epochs of this event label are compared; `None` = all epochs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,
    #[serde(default)]
    pub connectivity: ConnectivityMode,
    #[serde(default)]
    pub epoching: EpochingConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
}

impl ExperimentConfig {
    fn default_exp_name() -> String {
        "ssvep-hyperscanning".to_owned()
    }
    fn default_flicker_freq() -> f64 {
        12.0
    }
    fn default_trial_len() -> f64 {
        4.0
    }
    fn default_trials_per_block() -> usize {
        5
    }
    fn default_n_blocks() -> usize {
        4
    }
    fn default_channels() -> Vec<String> {
        vec!["O1".to_owned(), "O2".to_owned()]
    }
    fn default_sampling_freq() -> f64 {
        250.0
    }
    fn default_freq_bands() -> BandTable {
        BTreeMap::from([("freq_bands".to_owned(), [1.0, 40.0])])
    }
    fn default_tmin() -> f64 {
        1.0
    }
    fn default_tmax() -> f64 {
        4.0
    }
    fn default_output_dir() -> PathBuf {
        PathBuf::from("output")
    }
    fn default_event_dict() -> EventDict {
        BTreeMap::from([("target".to_owned(), 1)])
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reads `path`, falling back to defaults (written back to `path`) when
    /// the file is absent or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(err) => {
                    log::warn!(
                        "Failed to load config {}: {err}. Using defaults.",
                        path.display()
                    );
                    return Self::default();
                }
            }
        }
        let cfg = Self::default();
        if let Err(err) = cfg.save(path) {
            log::warn!("Failed to write default config {}: {err}", path.display());
        }
        cfg
    }

    /// Samples per epoch at `sfreq`, both window ends inclusive.
    pub fn epoch_samples(&self, sfreq: f64) -> usize {
        let start = (self.tmin * sfreq).round() as i64;
        let stop = (self.tmax * sfreq).round() as i64;
        (stop - start + 1).max(0) as usize
    }

    /// Rejects settings that cannot produce an epoch window.
    pub fn validate(&self) -> Result<()> {
        if self.tmin.is_nan() || self.tmax.is_nan() || self.tmin >= self.tmax {
            return Err(SyncError::InvalidConfig {
                reason: format!("tmin ({}) must be below tmax ({})", self.tmin, self.tmax),
            });
        }
        Ok(())
    }

    /// Every band in `freq_bands` must be filterable on epochs recorded at
    /// `sfreq`.
    pub fn check_bands(&self, sfreq: f64) -> Result<()> {
        let n_times = self.epoch_samples(sfreq);
        for (label, band) in &self.freq_bands {
            connectivity::check_band(*band, sfreq, n_times).map_err(|err| {
                SyncError::InvalidConfig {
                    reason: format!("band '{label}' {band:?} at {sfreq} Hz: {err}"),
                }
            })?;
        }
        Ok(())
    }

    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.csv", self.exp_name))
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            exp_name: Self::default_exp_name(),
            flicker_freq: Self::default_flicker_freq(),
            trial_len: Self::default_trial_len(),
            trials_per_block: Self::default_trials_per_block(),
            n_blocks: Self::default_n_blocks(),
            channels: Self::default_channels(),
            sampling_freq: Self::default_sampling_freq(),
            freq_bands: Self::default_freq_bands(),
            tmin: Self::default_tmin(),
            tmax: Self::default_tmax(),
            baseline: None,
            detrend: false,
            reject_peak_to_peak: None,
            record: false,
            output_dir: Self::default_output_dir(),
            duplicate: false,
            event_dict: Self::default_event_dict(),
            target_label: None,
            connectivity: ConnectivityMode::default(),
            epoching: EpochingConfig::default(),
            cleaning: CleaningConfig::default(),
        }
    }
}
