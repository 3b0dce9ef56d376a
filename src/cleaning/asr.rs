//! Artifact subspace reconstruction.
//!
//! The recording calibrates itself: the median window covariance stands in
//! for clean reference data. Windows whose principal components exceed the
//! calibrated per-component thresholds are rebuilt from the remaining
//! components.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use super::ica::{symmetric_power, to_array, to_matrix};
use crate::RawEEG;
use crate::config::CleaningConfig;
use crate::error::{Result, SyncError};
use crate::signal;

/// Scales a median absolute deviation to a normal standard deviation.
const MAD_TO_SIGMA: f64 = 1.4826;

/// Share of dimensions that may be reconstructed per window.
const MAX_DIMS: f64 = 0.66;

const PINV_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Asr {
    pub cutoff: f64,
    pub window_seconds: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsrCalibration {
    /// Square root of the median window covariance.
    pub mixing: DMatrix<f64>,
    /// `diag(thresholds) * V^T`, `V` the eigenvectors of `mixing`.
    pub threshold: DMatrix<f64>,
}

fn window_covariance(x: &DMatrix<f64>, start: usize, len: usize) -> DMatrix<f64> {
    let window = x.columns(start, len);
    &window * window.transpose() / len as f64
}

/// Eigen-decomposition with eigenvalues ascending.
fn sorted_eigen(m: DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let eig = SymmetricEigen::new(m);
    let n = eig.eigenvalues.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let values = DVector::from_fn(n, |i, _| eig.eigenvalues[order[i]]);
    let vectors = DMatrix::from_fn(n, n, |r, c| eig.eigenvectors[(r, order[c])]);
    (values, vectors)
}

impl Asr {
    pub fn from_config(config: &CleaningConfig) -> Self {
        Self {
            cutoff: config.asr_cutoff,
            window_seconds: config.asr_window_seconds,
        }
    }

    fn window_len(&self, sfreq: f64, n_ch: usize) -> usize {
        ((self.window_seconds * sfreq).round() as usize).max(n_ch + 1)
    }

    /// Calibrates on `x` (`channels x samples`, zero-mean rows).
    pub fn calibrate(&self, x: &DMatrix<f64>, sfreq: f64) -> Result<AsrCalibration> {
        let n_ch = x.nrows();
        let len = self.window_len(sfreq, n_ch);
        let n_windows = x.ncols() / len;
        if n_windows == 0 {
            return Err(SyncError::InvalidShape {
                reason: format!(
                    "{} samples is shorter than one {len}-sample ASR window",
                    x.ncols()
                ),
            });
        }

        let covariances: Vec<DMatrix<f64>> = (0..n_windows)
            .map(|w| window_covariance(x, w * len, len))
            .collect();
        let median_cov = DMatrix::from_fn(n_ch, n_ch, |i, j| {
            let values: Vec<f64> = covariances.iter().map(|c| c[(i, j)]).collect();
            signal::median(&values)
        });
        let mixing = symmetric_power(&median_cov, 0.5)?;

        let eig = SymmetricEigen::new(mixing.clone());
        let components = eig.eigenvectors.transpose() * x;
        let thresholds = DVector::from_fn(n_ch, |i, _| {
            let rms: Vec<f64> = (0..n_windows)
                .map(|w| {
                    let row = components.row(i);
                    let seg = row.columns(w * len, len);
                    (seg.iter().map(|v| v * v).sum::<f64>() / len as f64).sqrt()
                })
                .collect();
            let med = signal::median(&rms);
            let deviations: Vec<f64> = rms.iter().map(|v| (v - med).abs()).collect();
            med + self.cutoff * MAD_TO_SIGMA * signal::median(&deviations)
        });
        let threshold = DMatrix::from_diagonal(&thresholds) * eig.eigenvectors.transpose();
        Ok(AsrCalibration { mixing, threshold })
    }

    /// Reconstruction matrix for one window covariance.
    fn reconstruction(
        calibration: &AsrCalibration,
        cov: DMatrix<f64>,
    ) -> Result<Option<DMatrix<f64>>> {
        let n_ch = cov.nrows();
        let (values, vectors) = sorted_eigen(cov);
        let projected = &calibration.threshold * &vectors;
        let max_dims = (MAX_DIMS * n_ch as f64).round() as usize;

        let keep: Vec<bool> = (0..n_ch)
            .map(|i| {
                let limit: f64 = projected.column(i).iter().map(|v| v * v).sum();
                values[i] < limit || i + max_dims < n_ch
            })
            .collect();
        if keep.iter().all(|&k| k) {
            return Ok(None);
        }

        let mut kept = vectors.transpose() * &calibration.mixing;
        for (i, &k) in keep.iter().enumerate() {
            if !k {
                kept.row_mut(i).fill(0.0);
            }
        }
        let pinv = kept
            .pseudo_inverse(PINV_EPS)
            .map_err(|e| SyncError::Decomposition {
                reason: e.to_owned(),
            })?;
        Ok(Some(&calibration.mixing * pinv * vectors.transpose()))
    }

    /// Rebuilds `x` window by window, cross-fading between consecutive
    /// reconstruction matrices.
    pub fn process(
        &self,
        x: &DMatrix<f64>,
        sfreq: f64,
        calibration: &AsrCalibration,
    ) -> Result<DMatrix<f64>> {
        let (n_ch, n_samples) = x.shape();
        let len = self.window_len(sfreq, n_ch);
        let identity = DMatrix::<f64>::identity(n_ch, n_ch);
        let mut out = x.clone();
        let mut previous: Option<DMatrix<f64>> = None;
        let mut repaired = 0;

        let mut start = 0;
        while start < n_samples {
            let width = len.min(n_samples - start);
            let current = if width > n_ch {
                Self::reconstruction(calibration, window_covariance(x, start, width))?
            } else {
                previous.clone()
            };
            if current.is_some() {
                repaired += 1;
            }

            if current.is_some() || previous.is_some() {
                let now = current.as_ref().unwrap_or(&identity);
                let before = previous.as_ref().unwrap_or(&identity);
                let block = x.columns(start, width);
                let new = now * &block;
                let old = before * &block;
                for t in 0..width {
                    let blend = (1.0 - (PI * (t + 1) as f64 / width as f64).cos()) / 2.0;
                    let mixed = new.column(t) * blend + old.column(t) * (1.0 - blend);
                    out.set_column(start + t, &mixed);
                }
            }
            previous = current;
            start += width;
        }
        log::info!("ASR repaired {repaired} windows of {len} samples");
        Ok(out)
    }

    pub fn clean(&self, raw: &RawEEG) -> Result<RawEEG> {
        let sfreq = raw.info.sfreq;
        let x = to_matrix(&raw.data);
        let mean = x.column_mean();
        let centered = DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[(i, j)] - mean[i]);

        let calibration = self.calibrate(&centered, sfreq)?;
        let mut cleaned = self.process(&centered, sfreq, &calibration)?;
        for (i, mut row) in cleaned.row_iter_mut().enumerate() {
            row.add_scalar_mut(mean[i]);
        }
        Ok(raw.with_data(to_array(&cleaned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EEGInfo;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, s};
    use rand::rngs::StdRng;
    use rand::{Rng as _, SeedableRng as _};

    const SFREQ: f64 = 250.0;
    const WINDOW: usize = 125;

    fn noisy(seconds: usize) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(11);
        Array2::from_shape_fn((4, seconds * SFREQ as usize), |_| rng.random_range(-1.0..1.0))
    }

    fn raw(data: Array2<f64>) -> RawEEG {
        let names = ["O1", "O2", "Fp1", "Fp2"].map(String::from).to_vec();
        RawEEG::new(EEGInfo::new(names, SFREQ), data, Vec::new()).unwrap()
    }

    fn rms(data: &Array2<f64>, from: usize, to: usize) -> f64 {
        let block = data.slice(s![.., from..to]);
        (block.iter().map(|v| v * v).sum::<f64>() / block.len() as f64).sqrt()
    }

    #[test]
    fn burst_is_attenuated() {
        let mut data = noisy(60);
        let weights = [1.0, 0.8, 0.9, 0.7];
        for i in 40 * WINDOW..43 * WINDOW {
            let burst = 30.0 * (2.0 * PI * 5.0 * i as f64 / SFREQ).sin();
            for (ch, w) in weights.iter().enumerate() {
                data[[ch, i]] += w * burst;
            }
        }
        let raw = raw(data);
        let cleaned = Asr::from_config(&CleaningConfig::default()).clean(&raw).unwrap();

        let (from, to) = (41 * WINDOW, 42 * WINDOW);
        let before = rms(&raw.data, from, to);
        let after = rms(&cleaned.data, from, to);
        assert!(after < 0.2 * before, "before {before}, after {after}");
    }

    #[test]
    fn clean_windows_are_untouched() {
        let mut data = noisy(60);
        for i in 40 * WINDOW..43 * WINDOW {
            let burst = 50.0 * (2.0 * PI * 10.0 * i as f64 / SFREQ).sin();
            data[[0, i]] += burst;
            data[[1, i]] -= burst;
        }
        let raw = raw(data);
        let cleaned = Asr::from_config(&CleaningConfig::default()).clean(&raw).unwrap();
        for i in 0..30 * WINDOW {
            for ch in 0..4 {
                assert_abs_diff_eq!(cleaned.data[[ch, i]], raw.data[[ch, i]], epsilon = 1e-9);
            }
        }
        assert_eq!(cleaned.data.dim(), raw.data.dim());
    }

    #[test]
    fn too_short_for_calibration() {
        let raw = raw(Array2::zeros((4, 50)));
        let err = Asr::from_config(&CleaningConfig::default()).clean(&raw).unwrap_err();
        assert!(matches!(err, SyncError::InvalidShape { .. }));
    }
}
