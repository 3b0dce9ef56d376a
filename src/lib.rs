//! Inter-brain synchronization for two-person SSVEP hyperscanning.
//!
//! Raw annotated recordings are cleaned of artifacts, cut into event-aligned
//! epochs and compared pairwise with an analytic-signal connectivity measure.
//!
//! - [`cleaning`]: artifact-removal strategies
//! - [`epochs`]: event-aligned epoch extraction
//! - [`connectivity`]: Hilbert-based connectivity and the scalar sync score
//! - [`sync`]: per-round orchestration and reporting
#![warn(clippy::all, rust_2018_idioms)]

use ndarray::{Array2, Array3, Axis};

pub mod cleaning;
pub mod config;
pub mod connectivity;
pub mod edfio;
pub mod epochs;
pub mod error;
pub mod reference;
pub mod registry;
pub mod results;
pub mod signal;
pub mod source;
pub mod sync;

pub use error::{EpochError, Result, SyncError};

/// Identifier of one recording device (one subject).
pub type DeviceId = String;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EEGInfo {
    pub ch_names: Vec<String>,
    pub sfreq: f64,
}

impl EEGInfo {
    pub fn new(ch_names: Vec<String>, sfreq: f64) -> Self {
        Self { ch_names, sfreq }
    }

    pub fn num_ch(&self) -> usize {
        self.ch_names.len()
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.ch_names.iter().position(|ch| ch == name)
    }

    /// Names from `required` that are not present in this recording.
    pub fn missing_channels(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|name| self.channel_index(name).is_none())
            .cloned()
            .collect()
    }

    /// Row indices of `picks`, in the order given.
    pub fn pick_indices(&self, picks: &[String]) -> Result<Vec<usize>> {
        let missing = self.missing_channels(picks);
        if !missing.is_empty() {
            return Err(SyncError::MissingChannels { missing });
        }
        Ok(picks
            .iter()
            .filter_map(|name| self.channel_index(name))
            .collect())
    }
}

/// A discrete annotated event in a continuous recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Onset as a sample index.
    pub onset: usize,
    pub label: String,
}

impl Annotation {
    pub fn new(onset: usize, label: impl Into<String>) -> Self {
        Self {
            onset,
            label: label.into(),
        }
    }
}

/// One continuous multi-channel recording of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEEG {
    pub info: EEGInfo,
    /// `channels x samples`
    pub data: Array2<f64>,
    pub annotations: Vec<Annotation>,
}

impl RawEEG {
    pub fn new(info: EEGInfo, data: Array2<f64>, annotations: Vec<Annotation>) -> Result<Self> {
        if data.nrows() != info.num_ch() {
            return Err(SyncError::InvalidShape {
                reason: format!(
                    "{} channel names for {} data rows",
                    info.num_ch(),
                    data.nrows()
                ),
            });
        }
        if info.sfreq.is_nan() || info.sfreq <= 0.0 {
            return Err(SyncError::InvalidConfig {
                reason: format!("sampling rate must be positive, got {}", info.sfreq),
            });
        }
        Ok(Self {
            info,
            data,
            annotations,
        })
    }

    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }

    /// Same metadata and annotations, new samples.
    pub fn with_data(&self, data: Array2<f64>) -> Self {
        Self {
            info: self.info.clone(),
            data,
            annotations: self.annotations.clone(),
        }
    }
}

/// Event-aligned windows of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochsData {
    /// `epochs x channels x samples`
    pub epochs: Array3<f64>,
    pub ch_names: Vec<String>,
    /// Event label of each epoch.
    pub labels: Vec<String>,
    /// Event sample of each epoch in the source recording.
    pub onsets: Vec<usize>,
    pub tmin: f64,
    pub tmax: f64,
    pub sfreq: f64,
}

impl EpochsData {
    pub fn empty(ch_names: Vec<String>, n_times: usize, tmin: f64, tmax: f64, sfreq: f64) -> Self {
        Self {
            epochs: Array3::zeros((0, ch_names.len(), n_times)),
            ch_names,
            labels: Vec::new(),
            onsets: Vec::new(),
            tmin,
            tmax,
            sfreq,
        }
    }

    pub fn len(&self) -> usize {
        self.epochs.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_times(&self) -> usize {
        self.epochs.len_of(Axis(2))
    }

    /// Epochs recorded for `label`, or `None` when the label never occurs.
    pub fn select_label(&self, label: &str) -> Option<Array3<f64>> {
        let idx: Vec<usize> = self
            .labels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.as_str() == label)
            .map(|(i, _)| i)
            .collect();
        if idx.is_empty() {
            return None;
        }
        Some(self.epochs.select(Axis(0), &idx))
    }

    /// Merges sets with identical geometry, ordered by onset.
    pub fn concatenate(parts: Vec<Self>) -> Option<Self> {
        let first = parts.first()?;
        let (ch_names, tmin, tmax, sfreq, n_ch, n_times) = (
            first.ch_names.clone(),
            first.tmin,
            first.tmax,
            first.sfreq,
            first.epochs.len_of(Axis(1)),
            first.n_times(),
        );
        let mut rows: Vec<(usize, String, Array2<f64>)> = Vec::new();
        for part in parts {
            if part.ch_names != ch_names || part.n_times() != n_times {
                return None;
            }
            for (i, epoch) in part.epochs.outer_iter().enumerate() {
                rows.push((part.onsets[i], part.labels[i].clone(), epoch.to_owned()));
            }
        }
        rows.sort_by_key(|(onset, _, _)| *onset);

        let mut epochs = Array3::zeros((rows.len(), n_ch, n_times));
        let mut labels = Vec::with_capacity(rows.len());
        let mut onsets = Vec::with_capacity(rows.len());
        for (i, (onset, label, epoch)) in rows.into_iter().enumerate() {
            epochs.index_axis_mut(Axis(0), i).assign(&epoch);
            labels.push(label);
            onsets.push(onset);
        }
        Some(Self {
            epochs,
            ch_names,
            labels,
            onsets,
            tmin,
            tmax,
            sfreq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_epochs(onsets: &[usize], label: &str) -> EpochsData {
        let n = onsets.len();
        EpochsData {
            epochs: Array3::from_shape_fn((n, 2, 3), |(e, _, _)| onsets[e] as f64),
            ch_names: vec!["O1".to_owned(), "O2".to_owned()],
            labels: vec![label.to_owned(); n],
            onsets: onsets.to_vec(),
            tmin: 0.0,
            tmax: 1.0,
            sfreq: 2.0,
        }
    }

    #[test]
    fn pick_indices_reports_missing() {
        let info = EEGInfo::new(vec!["O1".into(), "O2".into()], 250.0);
        assert_eq!(info.pick_indices(&["O2".into()]).unwrap(), vec![1]);
        let err = info.pick_indices(&["Fp1".into()]).unwrap_err();
        assert!(matches!(err, SyncError::MissingChannels { ref missing } if missing == &["Fp1"]));
    }

    #[test]
    fn raw_rejects_mismatched_rows() {
        let info = EEGInfo::new(vec!["O1".into()], 250.0);
        assert!(RawEEG::new(info, Array2::zeros((2, 10)), Vec::new()).is_err());
    }

    #[test]
    fn concatenate_orders_by_onset() {
        let merged = EpochsData::concatenate(vec![
            small_epochs(&[30, 10], "target"),
            small_epochs(&[20], "rest"),
        ])
        .unwrap();
        assert_eq!(merged.onsets, vec![10, 20, 30]);
        assert_eq!(merged.labels, vec!["target", "rest", "target"]);
        assert_eq!(merged.epochs[[1, 0, 0]], 20.0);
    }

    #[test]
    fn select_label_missing_is_none() {
        let epochs = small_epochs(&[1, 2], "target");
        assert_eq!(epochs.select_label("target").unwrap().dim(), (2, 2, 3));
        assert!(epochs.select_label("rest").is_none());
    }
}
