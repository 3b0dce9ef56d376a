use std::iter::Sum;

use ndarray::{Array2, ArrayView1};
use num_traits::Float;
use rayon::prelude::*;
use sci_rs::na::RealField;
use sci_rs::signal::filter::{design::*, sosfiltfilt_dyn};

use crate::error::{Result, SyncError};

// Helper functions
pub fn vec_to_ndarray<T: Clone>(v: Vec<Vec<T>>) -> Result<Array2<T>> {
    let nrows = v.len();
    let ncols = v.first().map_or(0, Vec::len);
    let mut data = Vec::with_capacity(nrows * ncols);
    for row in &v {
        if row.len() != ncols {
            return Err(SyncError::InvalidShape {
                reason: format!("ragged rows: {} vs {ncols} samples", row.len()),
            });
        }
        data.extend_from_slice(row);
    }
    Array2::from_shape_vec((nrows, ncols), data).map_err(|e| SyncError::InvalidShape {
        reason: e.to_string(),
    })
}

fn check_corner<F: Float>(freq: F, fs: F) -> Result<()> {
    let nyquist = fs / (F::one() + F::one());
    if freq <= F::zero() || freq >= nyquist {
        return Err(SyncError::Filter {
            reason: format!(
                "corner {:?} Hz outside (0, {:?}) Hz",
                freq.to_f64(),
                nyquist.to_f64()
            ),
        });
    }
    Ok(())
}

fn design_butter<F>(order: usize, corners: Vec<F>, band: FilterBandType, fs: F) -> Result<Vec<Sos<F>>>
where
    F: Float + RealField + Sum,
{
    for &corner in &corners {
        check_corner(corner, fs)?;
    }
    // Design Second Order Section (SOS) filter
    let filter = butter_dyn(
        order,
        corners,
        Some(band),
        Some(false),
        Some(FilterOutputType::Sos),
        Some(fs),
    );
    let DigitalFilter::Sos(SosFormatFilter { sos }) = filter else {
        return Err(SyncError::Filter {
            reason: "Butterworth design did not return second-order sections".to_owned(),
        });
    };
    Ok(sos)
}

pub fn design_butter_lp<F>(order: usize, lowcut: F, fs: F) -> Result<Vec<Sos<F>>>
where
    F: Float + RealField + Sum,
{
    design_butter(order, vec![lowcut], FilterBandType::Lowpass, fs)
}

pub fn design_butter_hp<F>(order: usize, highcut: F, fs: F) -> Result<Vec<Sos<F>>>
where
    F: Float + RealField + Sum,
{
    design_butter(order, vec![highcut], FilterBandType::Highpass, fs)
}

pub fn design_butter_bp<F>(order: usize, low: F, high: F, fs: F) -> Result<Vec<Sos<F>>>
where
    F: Float + RealField + Sum,
{
    if low >= high {
        return Err(SyncError::Filter {
            reason: format!(
                "band [{:?}, {:?}] Hz is empty",
                low.to_f64(),
                high.to_f64()
            ),
        });
    }
    design_butter(order, vec![low, high], FilterBandType::Bandpass, fs)
}

/// Zero-phase Butterworth design for `[l_freq, h_freq]`; either side may be
/// open. `None` when both are open.
pub fn design_band(
    l_freq: Option<f64>,
    h_freq: Option<f64>,
    order: usize,
    sfreq: f64,
) -> Result<Option<Vec<Sos<f64>>>> {
    match (l_freq, h_freq) {
        (Some(low), Some(high)) => design_butter_bp(order, low, high, sfreq).map(Some),
        (Some(low), None) => design_butter_hp(order, low, sfreq).map(Some),
        (None, Some(high)) => design_butter_lp(order, high, sfreq).map(Some),
        (None, None) => Ok(None),
    }
}

/// Forward-backward filtering needs more samples than its edge padding.
pub fn min_len(sos: &[Sos<f64>]) -> usize {
    3 * (2 * sos.len() + 1) + 1
}

pub fn filter_channel(channel: ArrayView1<'_, f64>, sos: &[Sos<f64>]) -> Result<Vec<f64>> {
    if channel.len() < min_len(sos) {
        return Err(SyncError::Filter {
            reason: format!(
                "{} samples is too short for a {}-section filter",
                channel.len(),
                sos.len()
            ),
        });
    }
    Ok(sosfiltfilt_dyn(channel.iter().copied(), sos))
}

/// Applies `sos` to every row, one channel per rayon task.
pub fn filter_rows(data: &Array2<f64>, sos: &[Sos<f64>]) -> Result<Array2<f64>> {
    if data.is_empty() {
        return Ok(data.clone());
    }
    let rows: Vec<Vec<f64>> = (0..data.nrows())
        .into_par_iter()
        .map(|ch_idx| filter_channel(data.row(ch_idx), sos))
        .collect::<Result<_>>()?;
    vec_to_ndarray(rows)
}

/// Band-pass (or high/low-pass) every channel.
pub fn filter_data(
    data: &Array2<f64>,
    sfreq: f64,
    l_freq: Option<f64>,
    h_freq: Option<f64>,
    order: usize,
) -> Result<Array2<f64>> {
    match design_band(l_freq, h_freq, order, sfreq)? {
        Some(sos) => filter_rows(data, &sos),
        None => Ok(data.clone()),
    }
}

/// Removes the least-squares line from `x` in place.
pub fn detrend_linear(x: &mut [f64]) {
    let n = x.len();
    if n < 2 {
        return;
    }
    let nf = n as f64;
    let t_mean = (nf - 1.0) / 2.0;
    let x_mean = x.iter().sum::<f64>() / nf;
    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, &v) in x.iter().enumerate() {
        let dt = i as f64 - t_mean;
        cov += dt * (v - x_mean);
        var += dt * dt;
    }
    let slope = cov / var;
    for (i, v) in x.iter_mut().enumerate() {
        *v -= x_mean + slope * (i as f64 - t_mean);
    }
}

pub fn mean(x: ArrayView1<'_, f64>) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    x.sum() / x.len() as f64
}

/// Population standard deviation.
pub fn std_dev(x: ArrayView1<'_, f64>) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let m = mean(x);
    (x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / x.len() as f64).sqrt()
}

/// Pearson correlation, 0 when either side is constant.
pub fn pearson(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (dx, dy) = (x - ma, y - mb);
        cov += dx * dy;
        va += dx * dx;
        vb += dy * dy;
    }
    if va > 0.0 && vb > 0.0 {
        cov / (va.sqrt() * vb.sqrt())
    } else {
        0.0
    }
}

/// Median of a non-empty slice; sorts a copy.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
