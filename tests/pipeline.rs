use std::f64::consts::PI;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};

use hypersync::cleaning::{ArtifactRemoval, CleaningMode};
use hypersync::config::{CleaningConfig, ExperimentConfig};
use hypersync::connectivity::ConnectivityMode;
use hypersync::registry::UserRegistry;
use hypersync::results::{COLUMNS, ResultsTable};
use hypersync::source::InMemorySource;
use hypersync::sync::{EpochScope, Synchronization};
use hypersync::{Annotation, EEGInfo, RawEEG, SyncError};

const SFREQ: f64 = 250.0;

fn unique_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("hypersync_it_{nanos}_{name}"))
}

/// 40 s of 12 Hz SSVEP plus noise on O1/O2, blinks on Fp1/Fp2.
fn subject(seed: u64, names: &[&str]) -> RawEEG {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = 40 * SFREQ as usize;
    let data = Array2::from_shape_fn((names.len(), n), |(ch, i)| {
        let t = i as f64 / SFREQ;
        let ssvep = (2.0 * PI * 12.0 * t + 0.1 * ch as f64).sin();
        let blink = 5.0 * (-((t % 3.0 - 1.5) / 0.1).powi(2)).exp();
        let noise = 0.3 * rng.random_range(-1.0..1.0);
        if names[ch].starts_with("Fp") {
            blink + noise
        } else {
            ssvep + 0.2 * blink + noise
        }
    });
    let annotations = [2.0, 7.0, 12.0, 17.0, 22.0, 27.0, 32.0]
        .iter()
        .map(|s| Annotation::new((s * SFREQ) as usize, "target"))
        .collect();
    let names = names.iter().map(|n| (*n).to_owned()).collect();
    RawEEG::new(EEGInfo::new(names, SFREQ), data, annotations).unwrap()
}

const MONTAGE: [&str; 4] = ["O1", "O2", "Fp1", "Fp2"];

fn source() -> InMemorySource {
    InMemorySource::new()
        .with_recording("dev-1", subject(1, &MONTAGE))
        .with_recording("dev-2", subject(2, &MONTAGE))
        .with_recording("dev-3", subject(3, &MONTAGE))
}

#[test]
fn two_rounds_share_one_header() {
    let dir = unique_dir("rounds");
    let config = ExperimentConfig {
        exp_name: "pilot".to_owned(),
        output_dir: dir.clone(),
        record: true,
        ..ExperimentConfig::default()
    };
    let cleaning = ArtifactRemoval::from_config(&config.cleaning).unwrap();
    let mut registry = UserRegistry::new();

    for trial in 1..=2 {
        let sync =
            Synchronization::new(&source(), config.clone(), &cleaning, &mut registry).unwrap();
        let sink = sync.results_table().unwrap();
        let report = sync
            .sync_results(
                ConnectivityMode::Coh,
                None,
                EpochScope::CurrentBlock,
                trial,
                Some(&sink),
            )
            .unwrap();
        // three subjects, one band
        assert_eq!(report.results.len(), 3);
        assert!(report.feedback_value().is_some());
    }

    let table = ResultsTable::for_experiment(&config);
    let contents = fs::read_to_string(table.path()).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1 + 6);
    assert_eq!(lines[0], COLUMNS.join(","));
    assert!(lines[1].contains("user_dev-1 vs user_dev-2"));
    assert!(lines[4].contains(",2,coh,"));
    assert_eq!(registry.len(), 3);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn missing_reference_channel_fails_before_computation() {
    let dir = unique_dir("missing");
    let source = InMemorySource::new()
        .with_recording("dev-1", subject(1, &MONTAGE))
        .with_recording("dev-2", subject(2, &["O1", "O2", "Fp1"]));
    let config = ExperimentConfig {
        output_dir: dir.clone(),
        record: true,
        ..ExperimentConfig::default()
    };
    for mode in CleaningMode::ALL {
        let cleaning = ArtifactRemoval::new(mode, CleaningConfig::default());
        let mut registry = UserRegistry::new();
        let err = Synchronization::new(&source, config.clone(), &cleaning, &mut registry)
            .unwrap_err();
        assert!(
            matches!(err, SyncError::MissingChannels { ref missing } if missing == &["Fp2"]),
            "{mode}: {err}"
        );
        assert!(err.is_configuration());
    }
    assert!(!config.results_path().exists());
}

#[test]
fn pass_through_keeps_recording_bit_identical() {
    let raw = subject(4, &["O1", "O2", "Fp1", "Fp2", "Cz", "Pz"]);
    let cleaning = ArtifactRemoval::new(CleaningMode::PassThrough, CleaningConfig::default());
    let cleaned = cleaning.clean(&raw).unwrap();
    assert_eq!(cleaned.data, raw.data);
    assert_eq!(cleaned.info, raw.info);
    assert_eq!(cleaned.annotations, raw.annotations);
}

#[test]
fn every_cleaning_mode_preserves_geometry() {
    let raw = subject(5, &MONTAGE);
    for mode in [
        CleaningMode::Ica,
        CleaningMode::Asr,
        CleaningMode::Regression,
        CleaningMode::PassThrough,
    ] {
        let cleaning = ArtifactRemoval::new(mode, CleaningConfig::default());
        let cleaned = cleaning.clean(&raw).unwrap();
        assert_eq!(cleaned.data.dim(), raw.data.dim(), "{mode}");
        assert_eq!(cleaned.info, raw.info, "{mode}");
        assert!(cleaned.data.iter().all(|v| v.is_finite()), "{mode}");
    }
}

#[test]
fn cleaned_pipeline_gives_bounded_values() {
    let config = ExperimentConfig {
        cleaning: CleaningConfig {
            mode: "ica".to_owned(),
            ..CleaningConfig::default()
        },
        ..ExperimentConfig::default()
    };
    let cleaning = ArtifactRemoval::from_config(&config.cleaning).unwrap();
    let mut registry = UserRegistry::new();
    let sync = Synchronization::new(&source(), config, &cleaning, &mut registry).unwrap();

    for subject in sync.subjects() {
        assert_eq!(subject.current_block.n_times(), 751);
        assert_eq!(subject.current_block.len(), 5);
    }
    for mode in ConnectivityMode::ALL {
        let report = sync
            .sync_results(mode, None, EpochScope::FullSession, -1, None)
            .unwrap();
        assert_eq!(report.results.len(), 3);
        for result in &report.results {
            assert!((0.0..=1.0).contains(&result.value), "{mode}: {result:?}");
        }
    }
}
