//! Hilbert-based connectivity between two participants.
//!
//! Both participants' epochs are stacked on a participant axis, turned into
//! analytic signals and compared channel pair by channel pair. The
//! inter-participant block of the epoch-averaged matrix is then reduced to a
//! single score.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Array3, Array4, ArrayView1, Axis, s};
use rayon::prelude::*;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityMode {
    /// Magnitude of the amplitude-normalized cross-spectrum.
    #[default]
    Coh,
    /// Phase locking value.
    Plv,
    /// Magnitude of the imaginary part of the coherency.
    ImaginaryCoh,
}

impl ConnectivityMode {
    pub const ALL: [Self; 3] = [Self::Coh, Self::Plv, Self::ImaginaryCoh];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coh => "coh",
            Self::Plv => "plv",
            Self::ImaginaryCoh => "imaginary_coh",
        }
    }
}

impl fmt::Display for ConnectivityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectivityMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted)
            .ok_or_else(|| SyncError::UnknownMode {
                kind: "connectivity",
                mode: s.to_owned(),
            })
    }
}

/// Scalar synchronization of one participant pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncValue {
    /// `(AM + GM) / 2` of the inter-participant block, 2 decimals.
    pub value: f64,
    /// Spread of the per-epoch block mean across epochs, 2 decimals.
    pub std: f64,
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Analytic signal of `x` via the FFT: positive frequencies doubled,
/// negative ones zeroed.
pub fn analytic_signal(x: ArrayView1<'_, f64>, planner: &mut FftPlanner<f64>) -> Vec<Complex<f64>> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let mut buffer: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut buffer);

    let half = n / 2;
    for (k, bin) in buffer.iter_mut().enumerate() {
        let gain = if k == 0 || (n % 2 == 0 && k == half) {
            1.0
        } else if k < n.div_ceil(2) {
            2.0
        } else {
            0.0
        };
        *bin *= gain;
    }

    planner.plan_fft_inverse(n).process(&mut buffer);
    let scale = 1.0 / n as f64;
    buffer.iter_mut().for_each(|v| *v *= scale);
    buffer
}

fn pair_value(a: &[Complex<f64>], b: &[Complex<f64>], mode: ConnectivityMode) -> f64 {
    match mode {
        ConnectivityMode::Coh | ConnectivityMode::ImaginaryCoh => {
            let mut cross = Complex::new(0.0, 0.0);
            let mut power_a = 0.0;
            let mut power_b = 0.0;
            for (za, zb) in a.iter().zip(b) {
                cross += za * zb.conj();
                power_a += za.norm_sqr();
                power_b += zb.norm_sqr();
            }
            let norm = (power_a * power_b).sqrt();
            if norm == 0.0 {
                return 0.0;
            }
            let coherency = cross / norm;
            match mode {
                ConnectivityMode::ImaginaryCoh => coherency.im.abs(),
                _ => coherency.norm(),
            }
        }
        ConnectivityMode::Plv => {
            let mut sum = Complex::new(0.0, 0.0);
            let mut count = 0;
            for (za, zb) in a.iter().zip(b) {
                let cross = za * zb.conj();
                let magnitude = cross.norm();
                if magnitude > 0.0 {
                    sum += cross / magnitude;
                    count += 1;
                }
            }
            if count == 0 {
                0.0
            } else {
                sum.norm() / count as f64
            }
        }
    }
}

/// Butterworth order of the per-band filter applied to each epoch.
pub const BAND_FILTER_ORDER: usize = 2;

/// Checks that `band` can be filtered at `sfreq` on epochs of `n_times`
/// samples.
pub fn check_band(band: [f64; 2], sfreq: f64, n_times: usize) -> Result<()> {
    let [low, high] = band;
    let sos = signal::design_butter_bp(BAND_FILTER_ORDER, low, high, sfreq)?;
    let needed = signal::min_len(&sos);
    if n_times < needed {
        return Err(SyncError::Filter {
            reason: format!(
                "{n_times}-sample epochs are shorter than the {needed} samples the filter needs"
            ),
        });
    }
    Ok(())
}

/// Per-epoch connectivity between every channel of both participants.
///
/// `data` is `participants(2) x epochs x channels x samples`; the result is
/// `epochs x 2C x 2C` with participant 0's channels first.
pub fn pair_connectivity(
    data: &Array4<f64>,
    sfreq: f64,
    band: Option<[f64; 2]>,
    mode: ConnectivityMode,
) -> Result<Array3<f64>> {
    let (n_part, n_epochs, n_ch, n_times) = data.dim();
    if n_part != 2 {
        return Err(SyncError::InvalidShape {
            reason: format!("expected 2 participants, got {n_part}"),
        });
    }
    let n_series = n_part * n_ch;

    // epoch x (participant * channel) x samples
    let mut series = Array3::zeros((n_epochs, n_series, n_times));
    for p in 0..n_part {
        for e in 0..n_epochs {
            series
                .slice_mut(s![e, p * n_ch..(p + 1) * n_ch, ..])
                .assign(&data.slice(s![p, e, .., ..]));
        }
    }

    let per_epoch: Vec<Array2<f64>> = (0..n_epochs)
        .into_par_iter()
        .map(|e| -> Result<Array2<f64>> {
            let epoch = series.index_axis(Axis(0), e).to_owned();
            let epoch = match band {
                Some([low, high]) => {
                    signal::filter_data(&epoch, sfreq, Some(low), Some(high), BAND_FILTER_ORDER)?
                }
                None => epoch,
            };
            let mut planner = FftPlanner::new();
            let analytic: Vec<Vec<Complex<f64>>> = epoch
                .rows()
                .into_iter()
                .map(|row| analytic_signal(row, &mut planner))
                .collect();

            let mut matrix = Array2::zeros((n_series, n_series));
            for i in 0..n_series {
                for k in i..n_series {
                    let value = pair_value(&analytic[i], &analytic[k], mode);
                    matrix[[i, k]] = value;
                    matrix[[k, i]] = value;
                }
            }
            Ok(matrix)
        })
        .collect::<Result<_>>()?;

    let mut out = Array3::zeros((n_epochs, n_series, n_series));
    for (e, matrix) in per_epoch.iter().enumerate() {
        out.index_axis_mut(Axis(0), e).assign(matrix);
    }
    Ok(out)
}

/// Combines the arithmetic and geometric mean of `block`.
fn am_gm(block: &[f64]) -> f64 {
    let n = block.len() as f64;
    let am = block.iter().sum::<f64>() / n;
    let gm = if block.iter().any(|&v| v <= 0.0) {
        0.0
    } else {
        (block.iter().map(|v| v.ln()).sum::<f64>() / n).exp()
    };
    (am + gm) / 2.0
}

/// Synchronization between participant `a` and `b`
/// (`epochs x channels x samples` each).
///
/// `None` when the two sets cannot be compared: different epoch, channel or
/// sample counts, or nothing to compare.
pub fn calculate_sync(
    a: &Array3<f64>,
    b: &Array3<f64>,
    sfreq: f64,
    band: Option<[f64; 2]>,
    mode: ConnectivityMode,
) -> Result<Option<SyncValue>> {
    if a.dim() != b.dim() {
        log::warn!("Mismatched epochs: {:?} vs {:?}", a.dim(), b.dim());
        return Ok(None);
    }
    let (n_epochs, n_ch, n_times) = a.dim();
    if n_epochs == 0 || n_ch == 0 || n_times == 0 {
        log::warn!("No epochs to compare");
        return Ok(None);
    }

    let mut stacked = Array4::zeros((2, n_epochs, n_ch, n_times));
    stacked.index_axis_mut(Axis(0), 0).assign(a);
    stacked.index_axis_mut(Axis(0), 1).assign(b);
    let matrices = pair_connectivity(&stacked, sfreq, band, mode)?;

    let inter = matrices.slice(s![.., 0..n_ch, n_ch..2 * n_ch]);
    let Some(averaged) = inter.mean_axis(Axis(0)) else {
        return Ok(None);
    };
    let block: Vec<f64> = averaged.iter().copied().collect();
    let value = round2(am_gm(&block));

    let epoch_means: Vec<f64> = inter
        .outer_iter()
        .map(|m| m.iter().sum::<f64>() / m.len() as f64)
        .collect();
    let std = round2(signal::std_dev(ArrayView1::from(epoch_means.as_slice())));

    Ok(Some(SyncValue { value, std }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;
    use rand::rngs::StdRng;
    use rand::{Rng as _, SeedableRng as _};
    use std::f64::consts::PI;

    const SFREQ: f64 = 250.0;
    const N_TIMES: usize = 751;

    fn ssvep(n_epochs: usize, phase: f64) -> Array3<f64> {
        Array3::from_shape_fn((n_epochs, 2, N_TIMES), |(e, ch, i)| {
            let t = i as f64 / SFREQ;
            (2.0 * PI * 12.0 * t + phase + 0.3 * ch as f64 + 0.1 * e as f64).sin()
        })
    }

    fn noise(n_epochs: usize, seed: u64) -> Array3<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array3::from_shape_fn((n_epochs, 2, N_TIMES), |_| rng.random_range(-1.0..1.0))
    }

    #[test]
    fn analytic_signal_of_cosine() {
        let n = 1000;
        let x = Array1::from_shape_fn(n, |i| (2.0 * PI * 10.0 * i as f64 / SFREQ).cos());
        let mut planner = FftPlanner::new();
        let z = analytic_signal(x.view(), &mut planner);
        for i in 100..900 {
            assert_abs_diff_eq!(z[i].re, x[i], epsilon = 1e-9);
            let expected_im = (2.0 * PI * 10.0 * i as f64 / SFREQ).sin();
            assert_abs_diff_eq!(z[i].im, expected_im, epsilon = 1e-6);
        }
    }

    #[test]
    fn synchronous_sines_are_near_one() {
        let a = ssvep(5, 0.0);
        let b = ssvep(5, 0.7);
        let sync = calculate_sync(&a, &b, SFREQ, Some([1.0, 40.0]), ConnectivityMode::Coh)
            .unwrap()
            .unwrap();
        assert!(sync.value >= 0.95, "{sync:?}");
        assert!(sync.value <= 1.0);
    }

    #[test]
    fn independent_noise_is_low() {
        let a = noise(5, 1);
        let b = noise(5, 2);
        let sync = calculate_sync(&a, &b, SFREQ, Some([1.0, 40.0]), ConnectivityMode::Coh)
            .unwrap()
            .unwrap();
        assert!(sync.value < 0.3, "{sync:?}");
    }

    #[test]
    fn symmetric_and_bounded_for_every_mode() {
        let a = noise(4, 3);
        let b = ssvep(4, 0.2) + &noise(4, 4);
        for mode in ConnectivityMode::ALL {
            let ab = calculate_sync(&a, &b, SFREQ, None, mode).unwrap().unwrap();
            let ba = calculate_sync(&b, &a, SFREQ, None, mode).unwrap().unwrap();
            assert_eq!(ab, ba, "{mode}");
            assert!((0.0..=1.0).contains(&ab.value), "{mode}: {ab:?}");
            assert!(ab.std >= 0.0);
        }
    }

    #[test]
    fn mismatched_epoch_counts_give_none() {
        let a = ssvep(5, 0.0);
        let b = ssvep(4, 0.0);
        assert!(
            calculate_sync(&a, &b, SFREQ, None, ConnectivityMode::Coh)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn empty_sets_give_none() {
        let a = Array3::zeros((0, 2, N_TIMES));
        assert!(
            calculate_sync(&a, &a, SFREQ, None, ConnectivityMode::Coh)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn matrix_diagonal_is_one_for_coh() {
        let a = ssvep(2, 0.0);
        let b = noise(2, 9);
        let mut stacked = Array4::zeros((2, 2, 2, N_TIMES));
        stacked.index_axis_mut(Axis(0), 0).assign(&a);
        stacked.index_axis_mut(Axis(0), 1).assign(&b);
        let m = pair_connectivity(&stacked, SFREQ, None, ConnectivityMode::Coh).unwrap();
        assert_eq!(m.dim(), (2, 4, 4));
        for e in 0..2 {
            for i in 0..4 {
                assert_abs_diff_eq!(m[[e, i, i]], 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn band_checks() {
        assert!(check_band([8.0, 13.0], SFREQ, N_TIMES).is_ok());
        assert!(matches!(
            check_band([30.0, 130.0], SFREQ, N_TIMES),
            Err(SyncError::Filter { .. })
        ));
        assert!(check_band([13.0, 8.0], SFREQ, N_TIMES).is_err());
        assert!(check_band([0.0, 40.0], SFREQ, N_TIMES).is_err());
        assert!(check_band([1.0, 40.0], SFREQ, 11).is_err());
    }

    #[test]
    fn am_gm_of_constant_block() {
        assert_abs_diff_eq!(am_gm(&[0.5; 4]), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(am_gm(&[0.0, 1.0, 1.0, 1.0]), 0.375, epsilon = 1e-12);
    }

    #[test]
    fn parses_modes() {
        assert_eq!("COH".parse::<ConnectivityMode>().unwrap(), ConnectivityMode::Coh);
        assert!("ccorr".parse::<ConnectivityMode>().is_err());
    }
}
