//! Window-wise denoising with a pre-trained sequence model.

use ndarray::{Array2, ArrayView1};

use crate::RawEEG;
use crate::error::{Result, SyncError};
use crate::signal;

/// A model mapping one normalized window to its denoised version.
pub trait SequenceDenoiser {
    /// `window` and the returned sequence have the same length.
    fn predict(&self, window: &[f32]) -> Result<Vec<f32>>;

    /// Fixed input length of the model, if it has one.
    fn window_len(&self) -> Option<usize> {
        None
    }
}

pub struct LearnedCleaner<'a> {
    model: &'a dyn SequenceDenoiser,
    segment_seconds: f64,
}

impl<'a> LearnedCleaner<'a> {
    pub fn new(model: &'a (dyn SequenceDenoiser + Send + Sync), segment_seconds: f64) -> Self {
        Self {
            model,
            segment_seconds,
        }
    }

    /// Denoises one channel: z-score, split into zero-padded windows, run
    /// the model, stitch, rescale.
    pub fn clean_channel(&self, samples: &[f64], window_len: usize) -> Result<Vec<f64>> {
        let view = ArrayView1::from(samples);
        let mean = signal::mean(view);
        let std = signal::std_dev(view);
        let scale = if std > 0.0 { std } else { 1.0 };

        let normalized: Vec<f32> = samples
            .iter()
            .map(|v| ((v - mean) / scale) as f32)
            .collect();
        let mut out = Vec::with_capacity(samples.len());
        for chunk in normalized.chunks(window_len) {
            let mut window = chunk.to_vec();
            window.resize(window_len, 0.0);
            let predicted = self.model.predict(&window)?;
            if predicted.len() != window_len {
                return Err(SyncError::Model {
                    reason: format!(
                        "model returned {} samples for a {window_len}-sample window",
                        predicted.len()
                    ),
                });
            }
            out.extend(
                predicted[..chunk.len()]
                    .iter()
                    .map(|&v| f64::from(v) * scale + mean),
            );
        }
        Ok(out)
    }

    /// Samples per window: the model's own length when it has one,
    /// otherwise `segment_seconds` at the recording rate.
    pub fn window_len(&self, sfreq: f64) -> usize {
        let segment = (self.segment_seconds * sfreq).round() as usize;
        match self.model.window_len() {
            Some(fixed) => {
                if fixed != segment {
                    log::debug!("Using the model's {fixed}-sample windows instead of {segment}");
                }
                fixed
            }
            None => segment,
        }
    }

    pub fn clean(&self, raw: &RawEEG) -> Result<RawEEG> {
        let window_len = self.window_len(raw.info.sfreq);
        if window_len == 0 {
            return Err(SyncError::InvalidConfig {
                reason: format!("segment of {} s holds no samples", self.segment_seconds),
            });
        }
        let mut cleaned = Array2::zeros(raw.data.dim());
        for (ch, row) in raw.data.rows().into_iter().enumerate() {
            let samples = row.to_vec();
            let denoised = self.clean_channel(&samples, window_len)?;
            cleaned
                .row_mut(ch)
                .assign(&ArrayView1::from(denoised.as_slice()));
        }
        log::info!(
            "Denoised {} channels in {window_len}-sample windows",
            raw.info.num_ch()
        );
        Ok(raw.with_data(cleaned))
    }
}
