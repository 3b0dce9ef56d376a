//! Event-aligned epoch extraction.
//!
//! Window bounds are inclusive on both ends: an epoch spans
//! `round(tmin * sfreq) ..= round(tmax * sfreq)` samples around its event,
//! so `tmin = 1`, `tmax = 4` at 250 Hz gives 751 samples.

use std::collections::BTreeMap;

use ndarray::{Array3, Axis, s};

use crate::config::{EpochingConfig, EventDict};
use crate::error::EpochError;
use crate::signal;
use crate::{EpochsData, RawEEG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub sample: usize,
    pub code: i32,
}

/// Window, channel and rejection settings shared by every epoching call.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochParams {
    pub tmin: f64,
    pub tmax: f64,
    pub picks: Vec<String>,
    /// Seconds relative to the event; clipped to the window.
    pub baseline: Option<[f64; 2]>,
    pub detrend: bool,
    /// Peak-to-peak limit per channel.
    pub reject: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandPass {
    pub l_freq: Option<f64>,
    pub h_freq: Option<f64>,
    pub order: usize,
}

impl BandPass {
    pub fn new(l_freq: Option<f64>, h_freq: Option<f64>, order: usize) -> Self {
        Self {
            l_freq,
            h_freq,
            order,
        }
    }
}

/// Events for every annotation whose label is in `event_dict`, sorted by
/// sample, and the part of `event_dict` that actually occurred.
pub fn events_from_annotations(raw: &RawEEG, event_dict: &EventDict) -> (Vec<Event>, EventDict) {
    let mut events = Vec::new();
    let mut found = BTreeMap::new();
    for annotation in &raw.annotations {
        if let Some(&code) = event_dict.get(&annotation.label) {
            events.push(Event {
                sample: annotation.onset,
                code,
            });
            found.insert(annotation.label.clone(), code);
        }
    }
    events.sort_by_key(|e| e.sample);
    (events, found)
}

/// The last `trials_per_block` events.
pub fn current_block_events(events: &[Event], trials_per_block: usize) -> &[Event] {
    &events[events.len().saturating_sub(trials_per_block)..]
}

/// Cuts one epoch per event whose code is in `event_id`.
///
/// Fails when a label of `event_id` has no event in `events`, when the
/// baseline misses the window, or when every window is dropped.
pub fn epoch_raw(
    raw: &RawEEG,
    events: &[Event],
    event_id: &EventDict,
    params: &EpochParams,
    filter: BandPass,
) -> Result<EpochsData, EpochError> {
    for (label, code) in event_id {
        if !events.iter().any(|e| e.code == *code) {
            return Err(EpochError::NoMatchingEvents {
                label: label.clone(),
            });
        }
    }

    let sfreq = raw.info.sfreq;
    let picks = raw
        .info
        .pick_indices(&params.picks)
        .map_err(|_| EpochError::MissingChannels {
            missing: raw.info.missing_channels(&params.picks),
        })?;

    let start = (params.tmin * sfreq).round() as i64;
    let stop = (params.tmax * sfreq).round() as i64;
    let n_times = (stop - start + 1).max(0) as usize;

    let baseline = match params.baseline {
        Some([b0, b1]) => {
            if b1 < params.tmin || b0 > params.tmax || b0 > b1 {
                return Err(EpochError::BaselineOutsideWindow {
                    start: b0,
                    end: b1,
                    tmin: params.tmin,
                    tmax: params.tmax,
                });
            }
            let first = ((b0 * sfreq).round() as i64 - start).max(0) as usize;
            let last = ((b1 * sfreq).round() as i64 - start).min(stop - start) as usize;
            Some(first..last + 1)
        }
        None => None,
    };

    let picked = raw.data.select(Axis(0), &picks);
    let filtered = signal::filter_data(&picked, sfreq, filter.l_freq, filter.h_freq, filter.order)
        .map_err(|e| EpochError::Filter {
            reason: e.to_string(),
        })?;

    let labels_by_code: BTreeMap<i32, &String> =
        event_id.iter().map(|(label, code)| (*code, label)).collect();
    let total = raw.n_times() as i64;

    let mut kept = Vec::new();
    let mut labels = Vec::new();
    let mut onsets = Vec::new();
    let mut candidates = 0;
    for event in events {
        let Some(label) = labels_by_code.get(&event.code) else {
            continue;
        };
        candidates += 1;
        let first = event.sample as i64 + start;
        let last = event.sample as i64 + stop;
        if first < 0 || last >= total {
            log::debug!("Dropping epoch at sample {}: outside recording", event.sample);
            continue;
        }
        let mut epoch = filtered
            .slice(s![.., first as usize..=last as usize])
            .to_owned();

        for mut channel in epoch.rows_mut() {
            if params.detrend {
                if let Some(samples) = channel.as_slice_mut() {
                    signal::detrend_linear(samples);
                }
            }
            if let Some(range) = &baseline {
                let offset = signal::mean(channel.slice(s![range.clone()]));
                channel -= offset;
            }
        }

        if let Some(limit) = params.reject {
            let too_large = epoch.rows().into_iter().any(|channel| {
                let (lo, hi) = channel
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    });
                hi - lo > limit
            });
            if too_large {
                log::debug!("Rejecting epoch at sample {}: peak-to-peak above {limit}", event.sample);
                continue;
            }
        }

        kept.push(epoch);
        labels.push((*label).clone());
        onsets.push(event.sample);
    }

    if kept.is_empty() {
        return Err(EpochError::AllDropped { candidates });
    }

    let mut epochs = Array3::zeros((kept.len(), picks.len(), n_times));
    for (i, epoch) in kept.iter().enumerate() {
        epochs.index_axis_mut(Axis(0), i).assign(epoch);
    }
    Ok(EpochsData {
        epochs,
        ch_names: params.picks.clone(),
        labels,
        onsets,
        tmin: params.tmin,
        tmax: params.tmax,
        sfreq,
    })
}

fn empty_for(raw: &RawEEG, params: &EpochParams) -> EpochsData {
    let sfreq = raw.info.sfreq;
    let start = (params.tmin * sfreq).round() as i64;
    let stop = (params.tmax * sfreq).round() as i64;
    EpochsData::empty(
        params.picks.clone(),
        (stop - start + 1).max(0) as usize,
        params.tmin,
        params.tmax,
        sfreq,
    )
}

/// Epochs of the most recent block.
///
/// Tries all labels at once behind the block band-pass (1-40 Hz by
/// default). If that fails, each label is retried alone behind the fallback
/// band-pass; labels that still fail are skipped.
pub fn epoch_current_block(
    raw: &RawEEG,
    event_dict: &EventDict,
    trials_per_block: usize,
    params: &EpochParams,
    filters: &EpochingConfig,
) -> EpochsData {
    let (events, event_id) = events_from_annotations(raw, event_dict);
    if events.is_empty() {
        log::warn!("No events found");
        return empty_for(raw, params);
    }
    let block = current_block_events(&events, trials_per_block);
    log::info!("Epoching current block: {} of {} events", block.len(), events.len());

    let primary = BandPass::new(Some(filters.l_freq), filters.block_h_freq, filters.filter_order);
    match epoch_raw(raw, block, &event_id, params, primary) {
        Ok(epochs) => return epochs,
        Err(err) => log::warn!("Current-block epoching failed ({err}); retrying per label"),
    }

    let fallback = BandPass::new(
        Some(filters.l_freq),
        Some(filters.fallback_h_freq),
        filters.filter_order,
    );
    let mut parts = Vec::new();
    for (label, code) in &event_id {
        let single = BTreeMap::from([(label.clone(), *code)]);
        match epoch_raw(raw, block, &single, params, fallback) {
            Ok(epochs) => parts.push(epochs),
            Err(err) => log::warn!("Skipping label '{label}': {err}"),
        }
    }
    EpochsData::concatenate(parts).unwrap_or_else(|| empty_for(raw, params))
}

/// Epochs of every event so far, behind a high-pass only by default.
pub fn epoch_full_session(
    raw: &RawEEG,
    event_dict: &EventDict,
    params: &EpochParams,
    filters: &EpochingConfig,
) -> EpochsData {
    let (events, event_id) = events_from_annotations(raw, event_dict);
    if events.is_empty() {
        log::warn!("No events found");
        return empty_for(raw, params);
    }
    let band = BandPass::new(Some(filters.l_freq), filters.session_h_freq, filters.filter_order);
    match epoch_raw(raw, &events, &event_id, params, band) {
        Ok(epochs) => epochs,
        Err(err) => {
            log::warn!("Full-session epoching failed: {err}");
            empty_for(raw, params)
        }
    }
}
