//! Append-only CSV of synchronization results.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::config::ExperimentConfig;
use crate::error::Result;

pub const COLUMNS: [&str; 14] = [
    "Frequency rates",
    "Trial length",
    "Num of trials per block",
    "Num of blocks",
    "Users",
    "Channels",
    "Sampling frequency",
    "Calculations for",
    "Frequency bands",
    "Subjects",
    "Trial no",
    "Parameter",
    "Synchronization",
    "Standard deviation",
];

/// One row of the results table.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub flicker_freq: f64,
    pub trial_len: f64,
    pub trials_per_block: usize,
    pub n_blocks: usize,
    /// Device to username mapping at the time of the round.
    pub users: String,
    pub channels: Vec<String>,
    pub sampling_freq: f64,
    /// Label of the frequency band the value was computed for.
    pub calculations_for: String,
    pub band: Option<[f64; 2]>,
    /// `"<user a> vs <user b>"`
    pub subjects: String,
    pub trial: i64,
    pub parameter: String,
    pub synchronization: f64,
    pub std: f64,
}

impl ResultRow {
    fn fields(&self) -> [String; 14] {
        let band = self
            .band
            .map(|[low, high]| format!("[{low}, {high}]"))
            .unwrap_or_default();
        [
            self.flicker_freq.to_string(),
            self.trial_len.to_string(),
            self.trials_per_block.to_string(),
            self.n_blocks.to_string(),
            self.users.clone(),
            format!("[{}]", self.channels.join(", ")),
            self.sampling_freq.to_string(),
            self.calculations_for.clone(),
            band,
            self.subjects.clone(),
            self.trial.to_string(),
            self.parameter.clone(),
            self.synchronization.to_string(),
            self.std.to_string(),
        ]
    }
}

/// Quotes a field when it holds a separator, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| escape(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsTable {
    path: PathBuf,
}

impl ResultsTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<output_dir>/<exp_name>.csv`
    pub fn for_experiment(config: &ExperimentConfig) -> Self {
        Self::new(config.results_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `rows`; the header is written only when the file is created.
    pub fn append(&self, rows: &[ResultRow]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut out = String::new();
        if is_new {
            out.push_str(&csv_line(&COLUMNS));
        }
        for row in rows {
            out.push_str(&csv_line(&row.fields()));
        }
        file.write_all(out.as_bytes())?;
        log::info!("Wrote {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir()
            .join(format!("hypersync_results_{nanos}"))
            .join(name)
    }

    fn row(sync: f64) -> ResultRow {
        ResultRow {
            flicker_freq: 12.0,
            trial_len: 4.0,
            trials_per_block: 5,
            n_blocks: 4,
            users: "{dev-a: user_dev-a, dev-b: user_dev-b}".to_owned(),
            channels: vec!["O1".to_owned(), "O2".to_owned()],
            sampling_freq: 250.0,
            calculations_for: "freq_bands".to_owned(),
            band: Some([1.0, 40.0]),
            subjects: "user_dev-a vs user_dev-b".to_owned(),
            trial: 3,
            parameter: "coh".to_owned(),
            synchronization: sync,
            std: 0.05,
        }
    }

    #[test]
    fn header_written_once() {
        let path = unique_path("sync.csv");
        let table = ResultsTable::new(&path);
        table.append(&[row(0.81)]).unwrap();
        table.append(&[row(0.42), row(0.5)]).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Frequency rates,Trial length"));
        assert_eq!(contents.matches("Frequency rates").count(), 1);
        assert!(lines[1].ends_with(",3,coh,0.81,0.05"));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        let line = csv_line(&row(0.7).fields());
        assert!(line.contains("\"[O1, O2]\""));
        assert!(line.contains("\"[1, 40]\""));
        assert!(line.contains(",user_dev-a vs user_dev-b,"));
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn empty_round_still_creates_header() {
        let path = unique_path("empty.csv");
        ResultsTable::new(&path).append(&[]).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, csv_line(&COLUMNS));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
