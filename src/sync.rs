//! Per-round synchronization: clean, epoch, compare every subject pair.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use ndarray::Array3;

use crate::cleaning::{ArtifactRemoval, require_channels};
use crate::config::{BandTable, ExperimentConfig};
use crate::connectivity::{ConnectivityMode, calculate_sync};
use crate::epochs::{EpochParams, epoch_current_block, epoch_full_session};
use crate::error::{Result, SyncError};
use crate::registry::UserRegistry;
use crate::results::{ResultRow, ResultsTable};
use crate::source::RecordingSource;
use crate::{DeviceId, EpochsData};

/// Which epoch set a round is computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpochScope {
    /// The last `trials_per_block` events.
    #[default]
    CurrentBlock,
    /// Every event so far.
    FullSession,
}

impl EpochScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CurrentBlock => "current-block",
            Self::FullSession => "full-session",
        }
    }
}

impl fmt::Display for EpochScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpochScope {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "current-block" | "current" | "block" => Ok(Self::CurrentBlock),
            "full-session" | "full" | "session" => Ok(Self::FullSession),
            _ => Err(SyncError::UnknownMode {
                kind: "epoch scope",
                mode: s.to_owned(),
            }),
        }
    }
}

/// Cleaned epochs of one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectEpochs {
    pub device: DeviceId,
    pub username: String,
    pub current_block: EpochsData,
    pub full_session: EpochsData,
}

impl SubjectEpochs {
    pub fn epochs(&self, scope: EpochScope) -> &EpochsData {
        match scope {
            EpochScope::CurrentBlock => &self.current_block,
            EpochScope::FullSession => &self.full_session,
        }
    }
}

/// One computed value for one subject pair and band.
#[derive(Debug, Clone, PartialEq)]
pub struct PairResult {
    pub devices: (DeviceId, DeviceId),
    pub usernames: (String, String),
    pub band_label: String,
    pub band: [f64; 2],
    pub mode: ConnectivityMode,
    pub value: f64,
    /// Standard deviation across epochs.
    pub std: f64,
}

impl PairResult {
    pub fn subjects(&self) -> String {
        format!("{} vs {}", self.usernames.0, self.usernames.1)
    }
}

/// Everything one `sync_results` call computed, in computation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub results: Vec<PairResult>,
}

impl SyncReport {
    /// Value shown to the subjects as feedback: the last one computed.
    pub fn feedback_value(&self) -> Option<f64> {
        self.results.last().map(|r| r.value)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Debug)]
pub struct Synchronization {
    config: ExperimentConfig,
    subjects: Vec<SubjectEpochs>,
    users: String,
}

impl Synchronization {
    /// Loads, cleans and epochs every data device of `source`.
    ///
    /// Devices without a recording are skipped. An empty epoch window,
    /// unknown comparison channels, missing reference channels or a band the
    /// epochs cannot be filtered in abort construction before any recording
    /// is cleaned.
    pub fn new(
        source: &dyn RecordingSource,
        config: ExperimentConfig,
        cleaning: &ArtifactRemoval,
        registry: &mut UserRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let partition = source.separate_marker_devices()?;
        let recordings = source.recordings()?;
        log::info!(
            "{} data devices, {} marker devices",
            partition.data.len(),
            partition.markers.len()
        );

        let params = EpochParams {
            tmin: config.tmin,
            tmax: config.tmax,
            picks: config.channels.clone(),
            baseline: config.baseline,
            detrend: config.detrend,
            reject: config.reject_peak_to_peak,
        };
        let copies = if config.duplicate { 2 } else { 1 };

        let mut available = Vec::new();
        for device in &partition.data {
            let Some(raw) = recordings.get(device) else {
                log::warn!("No recording for device {device}, skipping");
                continue;
            };
            raw.info.pick_indices(&config.channels)?;
            require_channels(raw, &cleaning.config().required_channels())?;
            config.check_bands(raw.info.sfreq)?;
            available.push((device, raw));
        }
        log::info!(
            "Cleaning {} recordings with {}",
            available.len(),
            cleaning.mode()
        );

        let mut subjects = Vec::new();
        for (device, raw) in available {
            let username = registry.assign(device).to_owned();

            let cleaned = cleaning.clean(raw)?;
            let current_block = epoch_current_block(
                &cleaned,
                &config.event_dict,
                config.trials_per_block,
                &params,
                &config.epoching,
            );
            let full_session =
                epoch_full_session(&cleaned, &config.event_dict, &params, &config.epoching);
            log::info!(
                "{username}: {} current-block epochs, {} session epochs",
                current_block.len(),
                full_session.len()
            );

            let subject = SubjectEpochs {
                device: device.clone(),
                username,
                current_block,
                full_session,
            };
            for _ in 1..copies {
                subjects.push(subject.clone());
            }
            subjects.push(subject);
        }

        Ok(Self {
            config,
            subjects,
            users: registry.describe(),
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn subjects(&self) -> &[SubjectEpochs] {
        &self.subjects
    }

    /// The configured results file, when recording is enabled.
    pub fn results_table(&self) -> Option<ResultsTable> {
        self.config
            .record
            .then(|| ResultsTable::for_experiment(&self.config))
    }

    fn select<'a>(&self, epochs: &'a EpochsData) -> Option<Cow<'a, Array3<f64>>> {
        match &self.config.target_label {
            Some(label) => epochs.select_label(label).map(Cow::Owned),
            None => (!epochs.is_empty()).then_some(Cow::Borrowed(&epochs.epochs)),
        }
    }

    /// Computes every subject pair in every band of `bands` (the configured
    /// table when `None`) and, with a `sink`, appends one row per value.
    ///
    /// A band that fails for a pair is logged and left out; the other bands
    /// are still reported.
    pub fn sync_results(
        &self,
        mode: ConnectivityMode,
        bands: Option<&BandTable>,
        scope: EpochScope,
        trial: i64,
        sink: Option<&ResultsTable>,
    ) -> Result<SyncReport> {
        let bands = bands.unwrap_or(&self.config.freq_bands);
        let mut report = SyncReport::default();
        log::info!("Brain synchronization results ({scope}, {mode})");

        for (i, first) in self.subjects.iter().enumerate() {
            for second in &self.subjects[i + 1..] {
                let (epochs_a, epochs_b) = (first.epochs(scope), second.epochs(scope));
                let (Some(a), Some(b)) = (self.select(epochs_a), self.select(epochs_b)) else {
                    log::warn!(
                        "{} vs {}: nothing to compare",
                        first.username,
                        second.username
                    );
                    continue;
                };

                for (band_label, band) in bands {
                    let sync = match calculate_sync(&a, &b, epochs_a.sfreq, Some(*band), mode) {
                        Ok(Some(sync)) => sync,
                        Ok(None) => {
                            log::warn!(
                                "{} vs {} skipped for {band_label}",
                                first.username,
                                second.username
                            );
                            continue;
                        }
                        Err(err) => {
                            log::warn!(
                                "{} vs {} skipped for {band_label} {band:?}: {err}",
                                first.username,
                                second.username
                            );
                            continue;
                        }
                    };
                    log::info!(
                        "{} vs {} calculations for {band_label}: {} +- {}",
                        first.username,
                        second.username,
                        sync.value,
                        sync.std
                    );
                    report.results.push(PairResult {
                        devices: (first.device.clone(), second.device.clone()),
                        usernames: (first.username.clone(), second.username.clone()),
                        band_label: band_label.clone(),
                        band: *band,
                        mode,
                        value: sync.value,
                        std: sync.std,
                    });
                }
            }
        }

        if let Some(table) = sink {
            let rows: Vec<ResultRow> = report
                .results
                .iter()
                .map(|result| self.row(result, trial))
                .collect();
            table.append(&rows)?;
        }
        Ok(report)
    }

    fn row(&self, result: &PairResult, trial: i64) -> ResultRow {
        ResultRow {
            flicker_freq: self.config.flicker_freq,
            trial_len: self.config.trial_len,
            trials_per_block: self.config.trials_per_block,
            n_blocks: self.config.n_blocks,
            users: self.users.clone(),
            channels: self.config.channels.clone(),
            sampling_freq: self.config.sampling_freq,
            calculations_for: result.band_label.clone(),
            band: Some(result.band),
            subjects: result.subjects(),
            trial,
            parameter: result.mode.to_string(),
            synchronization: result.value,
            std: result.std,
        }
    }
}
