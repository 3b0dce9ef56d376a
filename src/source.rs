//! Where recordings come from.
//!
//! The acquisition side (device control, recording database) lives outside
//! this crate; the pipeline only needs the two calls of [`RecordingSource`].

use std::collections::BTreeMap;

use crate::error::Result;
use crate::{DeviceId, RawEEG};

/// Device ids split into EEG data streams and marker/event streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicePartition {
    pub data: Vec<DeviceId>,
    pub markers: Vec<DeviceId>,
}

pub trait RecordingSource {
    /// Raw annotated recording of every device, keyed by device id.
    fn recordings(&self) -> Result<BTreeMap<DeviceId, RawEEG>>;

    fn separate_marker_devices(&self) -> Result<DevicePartition>;
}

/// Recordings held in memory, e.g. for bench runs with a single headset.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    recordings: BTreeMap<DeviceId, RawEEG>,
    markers: Vec<DeviceId>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recording(mut self, device: impl Into<DeviceId>, raw: RawEEG) -> Self {
        self.recordings.insert(device.into(), raw);
        self
    }

    pub fn with_marker_device(mut self, device: impl Into<DeviceId>) -> Self {
        self.markers.push(device.into());
        self
    }
}

impl RecordingSource for InMemorySource {
    fn recordings(&self) -> Result<BTreeMap<DeviceId, RawEEG>> {
        Ok(self.recordings.clone())
    }

    fn separate_marker_devices(&self) -> Result<DevicePartition> {
        Ok(DevicePartition {
            data: self
                .recordings
                .keys()
                .filter(|id| !self.markers.contains(id))
                .cloned()
                .collect(),
            markers: self.markers.clone(),
        })
    }
}
