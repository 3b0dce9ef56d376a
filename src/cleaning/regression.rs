//! EOG regression: frontal channels stand in for the EOG.

use nalgebra::DMatrix;
use ndarray::Axis;

use super::ica::{to_array, to_matrix};
use crate::RawEEG;
use crate::error::{Result, SyncError};
use crate::reference::compute_average_reference;
use crate::signal;

const L_FREQ: f64 = 1.0;
const H_FREQ: f64 = 40.0;
const ORDER: usize = 4;
const RANK_TOL: f64 = 1e-10;

/// Least-squares coefficients `B` with `data ~ B * eog`.
pub fn fit_coefficients(data: &DMatrix<f64>, eog: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let gram = eog * eog.transpose();
    let cross = data * eog.transpose();
    let eigenvalues = gram.clone().symmetric_eigenvalues();
    let dependent = eigenvalues.min() <= eigenvalues.max() * RANK_TOL;
    let chol = match gram.cholesky() {
        Some(chol) if !dependent => chol,
        _ => {
            return Err(SyncError::Decomposition {
                reason: "EOG channels are linearly dependent".to_owned(),
            });
        }
    };
    // B * G = C  <=>  G * B^T = C^T, G symmetric
    Ok(chol.solve(&cross.transpose()).transpose())
}

/// Average-references and band-passes `raw`, then subtracts from every
/// non-frontal channel its least-squares projection onto the frontal ones.
pub fn regress_eog(raw: &RawEEG, frontal: &[String]) -> Result<RawEEG> {
    let sfreq = raw.info.sfreq;
    let referenced = compute_average_reference(&raw.data);
    let filtered = signal::filter_data(&referenced, sfreq, Some(L_FREQ), Some(H_FREQ), ORDER)?;

    let eog_idx = raw.info.pick_indices(frontal)?;
    let data_idx: Vec<usize> = (0..raw.info.num_ch())
        .filter(|i| !eog_idx.contains(i))
        .collect();
    if data_idx.is_empty() {
        return Ok(raw.with_data(filtered));
    }

    let eog = to_matrix(&filtered.select(Axis(0), &eog_idx));
    let data = to_matrix(&filtered.select(Axis(0), &data_idx));
    let coefficients = fit_coefficients(&data, &eog)?;
    let corrected = to_array(&(&data - &coefficients * &eog));

    let mut cleaned = filtered;
    for (row, &ch) in data_idx.iter().enumerate() {
        cleaned.row_mut(ch).assign(&corrected.row(row));
    }
    log::info!(
        "Regressed {} EOG channels out of {} channels",
        eog_idx.len(),
        data_idx.len()
    );
    Ok(raw.with_data(cleaned))
}
