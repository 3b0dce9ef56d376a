use std::collections::BTreeMap;
use std::fs;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};

use local_edf_reader::init_sync_reader;

use crate::error::Result;
use crate::signal::vec_to_ndarray;
use crate::source::{DevicePartition, RecordingSource};
use crate::{Annotation, DeviceId, EEGInfo, RawEEG};

const ANNOTATION_LABEL: &str = "EDF Annotations";

/// One EDF file per device; the device id is the file stem.
#[derive(Debug, Clone, Default)]
pub struct EdfSource {
    files: BTreeMap<DeviceId, PathBuf>,
}

impl EdfSource {
    pub fn new(files: impl IntoIterator<Item = PathBuf>) -> Self {
        let files = files
            .into_iter()
            .map(|path| {
                let device = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.to_string_lossy().to_string());
                (device, path)
            })
            .collect();
        Self { files }
    }

    /// Every `*.edf` file directly inside `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_edf = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("edf"));
            if is_edf {
                files.push(path);
            }
        }
        log::info!("Found {} EDF recordings in {}", files.len(), dir.display());
        Ok(Self::new(files))
    }
}

impl RecordingSource for EdfSource {
    fn recordings(&self) -> Result<BTreeMap<DeviceId, RawEEG>> {
        let mut recordings = BTreeMap::new();
        for (device, path) in &self.files {
            recordings.insert(device.clone(), read_edf(path)?);
        }
        Ok(recordings)
    }

    fn separate_marker_devices(&self) -> Result<DevicePartition> {
        Ok(DevicePartition {
            data: self.files.keys().cloned().collect(),
            markers: Vec::new(),
        })
    }
}

/// Loads all signal channels and the `EDF Annotations` channel of one file.
pub fn read_edf(file_path: &Path) -> Result<RawEEG> {
    if !file_path.try_exists()? {
        return Err(Error::from(ErrorKind::NotFound).into());
    }
    let edf_reader = init_sync_reader(file_path)?;

    let header = &edf_reader.edf_header;
    let number_of_channels = header.channels.len();
    if number_of_channels == 0 {
        return Err(Error::new(ErrorKind::InvalidData, "No channels in EDF file").into());
    }
    if header.block_duration == 0 {
        return Err(Error::new(ErrorKind::InvalidData, "EDF data record has zero duration").into());
    }

    let annotation_idx = header
        .channels
        .iter()
        .position(|c| c.label.contains(ANNOTATION_LABEL));

    let mut ch_names = Vec::new();
    let mut sfreqs = Vec::new();
    for (idx, channel) in header.channels.iter().enumerate() {
        if Some(idx) == annotation_idx {
            continue;
        }
        ch_names.push(channel.label.trim().to_owned());
        sfreqs.push(channel.number_of_samples_in_data_record * 1000 / header.block_duration);
    }
    let Some(&sfreq) = sfreqs.first() else {
        return Err(Error::new(ErrorKind::InvalidData, "Not enough channels in data").into());
    };
    if !sfreqs.windows(2).all(|w| w[0] == w[1]) {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "Channels have different sampling frequencies",
        )
        .into());
    }

    let total_duration_ms = header.number_of_blocks * header.block_duration;
    let data = edf_reader.read_data_window(0, total_duration_ms)?;
    log::info!(
        "Loaded {} ({} channels, {} Hz, {} s)",
        file_path.display(),
        ch_names.len(),
        sfreq,
        total_duration_ms / 1000
    );

    let mut signals: Vec<Vec<f64>> = Vec::with_capacity(ch_names.len());
    let mut annotations = Vec::new();
    for (idx, channel) in data.iter().enumerate() {
        if Some(idx) == annotation_idx {
            annotations = parse_edf_annotations(channel, sfreq as f64);
        } else {
            signals.push(channel.iter().map(|&v| f64::from(v)).collect());
        }
    }
    log::info!("Found {} annotations", annotations.len());

    let data = vec_to_ndarray(signals)?;
    RawEEG::new(EEGInfo::new(ch_names, sfreq as f64), data, annotations)
}

/// Decodes time-stamped annotation lists (TALs) into sample-indexed labels.
///
/// The first TAL of each data record only keeps time and carries no text; the
/// first one seen is the recording start offset.
fn parse_edf_annotations(signal_data: &[f32], sampling_frequency: f64) -> Vec<Annotation> {
    let mut bytes = Vec::with_capacity(signal_data.len() * 2);
    for &value in signal_data {
        let val = value as i16 as u16;
        bytes.push((val & 0xFF) as u8);
        bytes.push((val >> 8) as u8);
    }
    parse_tal_bytes(&bytes, sampling_frequency)
}

fn parse_tal_bytes(bytes: &[u8], sampling_frequency: f64) -> Vec<Annotation> {
    let annotation_str = String::from_utf8_lossy(bytes);
    let mut first_timestamp: Option<f64> = None;
    let mut annotations = Vec::new();

    for tal in annotation_str.split('\x00') {
        if tal.trim().is_empty() {
            continue;
        }
        let mut parts = tal.split('\x14');
        let Some(timing) = parts.next() else {
            continue;
        };
        let onset_str = timing.split('\x15').next().unwrap_or_default();
        let Ok(onset_seconds) = onset_str.trim().trim_start_matches('+').parse::<f64>() else {
            continue;
        };
        let offset = *first_timestamp.get_or_insert(onset_seconds);

        let adjusted_time = (onset_seconds - offset).max(0.0);
        let onset = (adjusted_time * sampling_frequency).round() as usize;
        for text in parts.filter(|t| !t.trim().is_empty()) {
            annotations.push(Annotation::new(onset, text.trim()));
        }
    }
    annotations.sort_by_key(|a| a.onset);
    annotations
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    const RECORDS: usize = 3;
    const SIGNAL_SAMPLES: usize = 10;
    const TAL_SAMPLES: usize = 20;

    fn unique_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("hypersync_edf_{nanos}_{name}"))
    }

    fn field(out: &mut Vec<u8>, value: &str, width: usize) {
        let mut bytes = value.as_bytes().to_vec();
        bytes.resize(width, b' ');
        out.extend(bytes);
    }

    fn o1(i: usize) -> i16 {
        i as i16
    }

    fn o2(i: usize) -> i16 {
        -2 * i as i16
    }

    /// EDF+ file with O1, O2 (10 Hz, 1 s records) and an annotation channel.
    /// One `target` marker 1.5 s into the recording.
    fn write_edf(path: &Path) {
        let labels = ["O1", "O2", ANNOTATION_LABEL];
        let samples = [SIGNAL_SAMPLES, SIGNAL_SAMPLES, TAL_SAMPLES];
        let ns = labels.len();

        let mut out = Vec::new();
        field(&mut out, "0", 8);
        field(&mut out, "X X X X", 80);
        field(&mut out, "Startdate X X X X", 80);
        field(&mut out, "01.01.24", 8);
        field(&mut out, "00.00.00", 8);
        field(&mut out, &(256 * (ns + 1)).to_string(), 8);
        field(&mut out, "EDF+C", 44);
        field(&mut out, &RECORDS.to_string(), 8);
        field(&mut out, "1", 8);
        field(&mut out, &ns.to_string(), 4);
        for label in labels {
            field(&mut out, label, 16);
        }
        for width in [80, 8] {
            for _ in 0..ns {
                field(&mut out, "", width);
            }
        }
        for value in ["-32768", "32767", "-32768", "32767"] {
            for _ in 0..ns {
                field(&mut out, value, 8);
            }
        }
        for _ in 0..ns {
            field(&mut out, "", 80);
        }
        for n in samples {
            field(&mut out, &n.to_string(), 8);
        }
        for _ in 0..ns {
            field(&mut out, "", 32);
        }
        assert_eq!(out.len(), 256 * (ns + 1));

        for record in 0..RECORDS {
            for i in 0..SIGNAL_SAMPLES {
                out.extend(o1(record * SIGNAL_SAMPLES + i).to_le_bytes());
            }
            for i in 0..SIGNAL_SAMPLES {
                out.extend(o2(record * SIGNAL_SAMPLES + i).to_le_bytes());
            }
            let mut tal = format!("+{record}\x14\x14\x00").into_bytes();
            if record == 1 {
                tal.extend(b"+1.5\x14target\x14\x00");
            }
            tal.resize(2 * TAL_SAMPLES, 0);
            out.extend(tal);
        }
        fs::write(path, out).unwrap();
    }

    #[test]
    fn reads_signals_rate_and_markers() {
        let dir = unique_dir("read");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("subj_a.edf");
        write_edf(&path);

        let raw = read_edf(&path).unwrap();
        assert_eq!(raw.info.ch_names, vec!["O1", "O2"]);
        assert_eq!(raw.info.sfreq, 10.0);
        assert_eq!(raw.data.dim(), (2, RECORDS * SIGNAL_SAMPLES));
        for i in 0..RECORDS * SIGNAL_SAMPLES {
            assert_eq!(raw.data[[0, i]], f64::from(o1(i)));
            assert_eq!(raw.data[[1, i]], f64::from(o2(i)));
        }
        assert_eq!(raw.annotations, vec![Annotation::new(15, "target")]);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn directory_source_keys_by_stem() {
        let dir = unique_dir("dir");
        fs::create_dir_all(&dir).unwrap();
        write_edf(&dir.join("subj_a.edf"));
        write_edf(&dir.join("subj_b.EDF"));
        fs::write(dir.join("notes.txt"), "not a recording").unwrap();

        let source = EdfSource::from_dir(&dir).unwrap();
        let recordings = source.recordings().unwrap();
        assert_eq!(
            recordings.keys().collect::<Vec<_>>(),
            vec!["subj_a", "subj_b"]
        );
        assert_eq!(recordings["subj_b"].data.ncols(), RECORDS * SIGNAL_SAMPLES);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn tal_offsets_are_relative_to_first_record() {
        let bytes = b"+10\x14\x14\x00+12.5\x14target\x14\x00+14\x150.5\x14rest\x14target\x14\x00";
        let annotations = parse_tal_bytes(bytes, 250.0);
        assert_eq!(
            annotations,
            vec![
                Annotation::new(625, "target"),
                Annotation::new(1000, "rest"),
                Annotation::new(1000, "target"),
            ]
        );
    }

    #[test]
    fn garbage_is_ignored() {
        assert!(parse_tal_bytes(b"\x00\x00abc\x14\x00", 250.0).is_empty());
    }

    #[test]
    fn source_ids_from_file_stems() {
        let source = EdfSource::new(vec![
            PathBuf::from("/data/subj_a.edf"),
            PathBuf::from("/data/subj_b.edf"),
        ]);
        let partition = source.separate_marker_devices().unwrap();
        assert_eq!(partition.data, vec!["subj_a", "subj_b"]);
        assert!(partition.markers.is_empty());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_edf(Path::new("/definitely/not/here.edf")).unwrap_err();
        assert!(matches!(err, crate::SyncError::Io(_)));
    }
}
