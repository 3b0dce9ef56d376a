//! FastICA and ocular component rejection.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};

use crate::RawEEG;
use crate::config::CleaningConfig;
use crate::error::{Result, SyncError};
use crate::signal;

const FIT_L_FREQ: f64 = 1.0;
const FIT_H_FREQ: f64 = 40.0;
const FIT_ORDER: usize = 4;

/// Eigenvalues below this fraction of the largest count as rank loss.
const RANK_TOL: f64 = 1e-10;

pub(crate) fn to_matrix(data: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(data.nrows(), data.ncols(), |i, j| data[[i, j]])
}

pub(crate) fn to_array(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// `m^p` of a symmetric positive definite matrix.
pub(crate) fn symmetric_power(m: &DMatrix<f64>, p: f64) -> Result<DMatrix<f64>> {
    let eig = SymmetricEigen::new(m.clone());
    let largest = eig.eigenvalues.max();
    if eig.eigenvalues.iter().any(|&v| v <= largest * RANK_TOL) || largest <= 0.0 {
        return Err(SyncError::Decomposition {
            reason: "matrix is not positive definite".to_owned(),
        });
    }
    let powered = DMatrix::from_diagonal(&eig.eigenvalues.map(|v| v.powf(p)));
    Ok(&eig.eigenvectors * powered * eig.eigenvectors.transpose())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastIca {
    pub max_iter: usize,
    pub tol: f64,
    pub seed: u64,
}

/// A fitted decomposition: `sources = unmixing * (x - mean)`.
#[derive(Debug, Clone, PartialEq)]
pub struct IcaFit {
    pub mean: DVector<f64>,
    pub unmixing: DMatrix<f64>,
    pub mixing: DMatrix<f64>,
    pub n_iter: usize,
}

impl FastIca {
    pub fn from_config(config: &CleaningConfig) -> Self {
        Self {
            max_iter: config.ica_max_iter,
            tol: config.ica_tol,
            seed: config.ica_seed,
        }
    }

    /// Fits as many components as there are rows of `x` (`channels x samples`).
    pub fn fit(&self, x: &DMatrix<f64>) -> Result<IcaFit> {
        let (n_ch, n_samples) = x.shape();
        if n_ch == 0 || n_samples <= n_ch {
            return Err(SyncError::InvalidShape {
                reason: format!("cannot fit ICA on {n_ch} channels x {n_samples} samples"),
            });
        }

        let mean = x.column_mean();
        let centered = DMatrix::from_fn(n_ch, n_samples, |i, j| x[(i, j)] - mean[i]);
        let cov = &centered * centered.transpose() / n_samples as f64;

        // Whitening: K = D^-1/2 E^T
        let eig = SymmetricEigen::new(cov);
        let largest = eig.eigenvalues.max();
        if largest <= 0.0 || eig.eigenvalues.iter().any(|&v| v <= largest * RANK_TOL) {
            return Err(SyncError::Decomposition {
                reason: "channel covariance is rank deficient".to_owned(),
            });
        }
        let inv_sqrt = DMatrix::from_diagonal(&eig.eigenvalues.map(|v| 1.0 / v.sqrt()));
        let sqrt = DMatrix::from_diagonal(&eig.eigenvalues.map(f64::sqrt));
        let whitening = &inv_sqrt * eig.eigenvectors.transpose();
        let dewhitening = &eig.eigenvectors * sqrt;
        let z = &whitening * &centered;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let init = DMatrix::from_fn(n_ch, n_ch, |_, _| rng.random_range(-1.0..1.0));
        let mut w = decorrelate(&init)?;

        let mut n_iter = None;
        for iter in 0..self.max_iter {
            let wz = &w * &z;
            let g = wz.map(f64::tanh);
            let g_prime_mean = DVector::from_fn(n_ch, |i, _| {
                g.row(i).iter().map(|v| 1.0 - v * v).sum::<f64>() / n_samples as f64
            });
            let updated = &g * z.transpose() / n_samples as f64
                - DMatrix::from_diagonal(&g_prime_mean) * &w;
            let updated = decorrelate(&updated)?;

            let lim = (&updated * w.transpose())
                .diagonal()
                .iter()
                .map(|v| (v.abs() - 1.0).abs())
                .fold(0.0, f64::max);
            w = updated;
            if lim < self.tol {
                n_iter = Some(iter + 1);
                break;
            }
        }
        let n_iter = n_iter.unwrap_or_else(|| {
            log::warn!("FastICA did not converge after {} iterations", self.max_iter);
            self.max_iter
        });

        Ok(IcaFit {
            mean,
            unmixing: &w * whitening,
            mixing: dewhitening * w.transpose(),
            n_iter,
        })
    }
}

/// `W <- (W W^T)^-1/2 W`
fn decorrelate(w: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    Ok(symmetric_power(&(w * w.transpose()), -0.5)? * w)
}

impl IcaFit {
    pub fn sources(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let centered = DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[(i, j)] - self.mean[i]);
        &self.unmixing * centered
    }

    /// Back-projects `x` with the `exclude`d components zeroed.
    pub fn apply(&self, x: &DMatrix<f64>, exclude: &[usize]) -> DMatrix<f64> {
        let mut sources = self.sources(x);
        for &idx in exclude {
            sources.row_mut(idx).fill(0.0);
        }
        let mut out = &self.mixing * sources;
        for (i, mut row) in out.row_iter_mut().enumerate() {
            row.add_scalar_mut(self.mean[i]);
        }
        out
    }
}

/// Fits ICA on a 1-40 Hz copy, drops components that track a frontal channel
/// and reconstructs the unfiltered recording.
pub fn remove_ocular_components(raw: &RawEEG, config: &CleaningConfig) -> Result<RawEEG> {
    let sfreq = raw.info.sfreq;
    let filtered = signal::filter_data(
        &raw.data,
        sfreq,
        Some(FIT_L_FREQ),
        Some(FIT_H_FREQ),
        FIT_ORDER,
    )?;
    let filtered = to_matrix(&filtered);
    let fit = FastIca::from_config(config).fit(&filtered)?;
    log::debug!("FastICA converged in {} iterations", fit.n_iter);

    let sources = to_array(&fit.sources(&filtered));
    let frontal = raw.info.pick_indices(&config.frontal)?;
    let frontal = to_array(&filtered).select(Axis(0), &frontal);

    let mut exclude = Vec::new();
    for (idx, source) in sources.rows().into_iter().enumerate() {
        let score = max_abs_correlation(source, &frontal);
        if score > config.ica_threshold {
            log::info!("Excluding ICA component {idx} (|r| = {score:.2})");
            exclude.push(idx);
        }
    }
    if exclude.is_empty() {
        log::info!("No ocular ICA components above {}", config.ica_threshold);
        return Ok(raw.clone());
    }

    let cleaned = fit.apply(&to_matrix(&raw.data), &exclude);
    Ok(raw.with_data(to_array(&cleaned)))
}

/// Largest absolute correlation between `x` and any row of `rows`.
pub fn max_abs_correlation(x: ArrayView1<'_, f64>, rows: &Array2<f64>) -> f64 {
    rows.rows()
        .into_iter()
        .map(|row| signal::pearson(x, row).abs())
        .fold(0.0, f64::max)
}
