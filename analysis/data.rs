//! Loading and assembly of the band-power feature table.
//!
//! Each subject contributes one row per task segment. A segment is stored on
//! disk as a headerless CSV of spectral powers, rows = frequency bins,
//! columns = EEG channels, under
//! `<root>/sub-<id>/ses-01/eeg/bandpowers/<segment>.csv`. Rows are flattened
//! channel-major, so all of a channel's bands are contiguous in the feature
//! vector.

use std::fs;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AssembleConfig;
use crate::metrics::MetricsRow;

/// Aggregation index ranges (half-open, in frequency-bin units) for the five
/// canonical bands: delta, theta, alpha, beta, gamma.
pub const FIVE_BANDS: [(usize, usize); 5] = [(0, 3), (3, 7), (7, 11), (11, 34), (34, 40)];

/// Errors surfaced while reading or assembling band-power data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Subject id '{0}' contains neither 'P' (patient) nor 'C' (control).")]
    UnknownGroup(String),
    #[error("Subject list '{0}' contains no ids.")]
    NoSubjects(PathBuf),
    #[error("Band-power file '{0}' is empty.")]
    EmptyFile(PathBuf),
    #[error("Band-power file '{path}' row {row} has {found} columns, expected {expected}.")]
    RaggedRow {
        path: PathBuf,
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Band-power file '{path}' row {row}, column {col}: '{value}' is not a number.")]
    NonNumeric {
        path: PathBuf,
        row: usize,
        col: usize,
        value: String,
    },
    #[error(
        "Band-power file '{path}' has shape {found_rows}x{found_cols}, but earlier files had {expected_rows}x{expected_cols}."
    )]
    ShapeMismatch {
        path: PathBuf,
        expected_rows: usize,
        expected_cols: usize,
        found_rows: usize,
        found_cols: usize,
    },
    #[error("Wide-band aggregation needs {needed} frequency bins, file provides {found}.")]
    TooFewBins { needed: usize, found: usize },
}

/// Recording task; each carries a fixed set of segment file stems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    /// Eyes closed, resting state.
    Ec,
    /// Eyes open, resting state.
    Eo,
    /// Paced Auditory Serial Addition Test, first run.
    Pasat1,
    /// Paced Auditory Serial Addition Test, second run.
    Pasat2,
}

impl Task {
    pub fn segments(&self) -> &'static [&'static str] {
        match self {
            Task::Ec => &["ec_1", "ec_2", "ec_3"],
            Task::Eo => &["eo_1", "eo_2", "eo_3"],
            Task::Pasat1 => &["PASAT_run1_1", "PASAT_run1_2"],
            Task::Pasat2 => &["PASAT_run2_1", "PASAT_run2_2"],
        }
    }

    pub fn n_segments(&self) -> usize {
        self.segments().len()
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Task::Ec => "ec",
            Task::Eo => "eo",
            Task::Pasat1 => "pasat1",
            Task::Pasat2 => "pasat2",
        };
        f.write_str(name)
    }
}

/// Whether features keep the raw frequency bins or the five aggregate bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BandMode {
    /// One feature per raw frequency bin.
    Thin,
    /// Five canonical bands, each the sum of its bins.
    Wide,
}

impl std::fmt::Display for BandMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BandMode::Thin => "thin",
            BandMode::Wide => "wide",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    /// 1 = patient, 0 = control.
    pub label: usize,
}

/// Read the subject list, one id per line, blank lines ignored.
pub fn read_subjects(path: &Path) -> Result<Vec<Subject>, DataError> {
    let text = fs::read_to_string(path)?;
    let mut subjects = Vec::new();
    for line in text.lines() {
        let id = line.trim();
        if id.is_empty() {
            continue;
        }
        let label = if id.contains('P') {
            1
        } else if id.contains('C') {
            0
        } else {
            return Err(DataError::UnknownGroup(id.to_string()));
        };
        subjects.push(Subject {
            id: id.to_string(),
            label,
        });
    }
    if subjects.is_empty() {
        return Err(DataError::NoSubjects(path.to_path_buf()));
    }
    Ok(subjects)
}

/// Read a headerless band-power CSV into a bins x channels matrix.
pub fn read_bandpower_csv(path: &Path) -> Result<Array2<f64>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut values: Vec<f64> = Vec::new();
    let mut n_cols = 0usize;
    let mut n_rows = 0usize;
    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        if n_rows == 0 {
            n_cols = record.len();
        } else if record.len() != n_cols {
            return Err(DataError::RaggedRow {
                path: path.to_path_buf(),
                row: row_idx,
                expected: n_cols,
                found: record.len(),
            });
        }
        for (col_idx, field) in record.iter().enumerate() {
            let parsed = field.trim().parse::<f64>().map_err(|_| DataError::NonNumeric {
                path: path.to_path_buf(),
                row: row_idx,
                col: col_idx,
                value: field.to_string(),
            })?;
            values.push(parsed);
        }
        n_rows += 1;
    }
    if n_rows == 0 || n_cols == 0 {
        return Err(DataError::EmptyFile(path.to_path_buf()));
    }

    Ok(Array2::from_shape_vec((n_rows, n_cols), values)
        .expect("row/column bookkeeping matches collected values"))
}

/// Divide each channel (column) by its total power so it sums to 1.
pub fn normalize_per_channel(matrix: &mut Array2<f64>) {
    for mut column in matrix.columns_mut() {
        let total: f64 = column.sum();
        if total == 0.0 {
            log::warn!("channel with zero total power left unnormalized");
            continue;
        }
        column.mapv_inplace(|v| v / total);
    }
}

/// Convert powers to decibels, `10 * log10(p)`.
pub fn to_decibels(matrix: &mut Array2<f64>) {
    matrix.mapv_inplace(|v| 10.0 * v.log10());
}

/// Collapse frequency bins into bands. `Thin` is the identity.
pub fn aggregate_bands(matrix: &Array2<f64>, mode: BandMode) -> Result<Array2<f64>, DataError> {
    match mode {
        BandMode::Thin => Ok(matrix.clone()),
        BandMode::Wide => {
            let needed = FIVE_BANDS[FIVE_BANDS.len() - 1].1;
            if matrix.nrows() < needed {
                return Err(DataError::TooFewBins {
                    needed,
                    found: matrix.nrows(),
                });
            }
            let mut out = Array2::<f64>::zeros((FIVE_BANDS.len(), matrix.ncols()));
            for (band_idx, &(start, end)) in FIVE_BANDS.iter().enumerate() {
                for col in 0..matrix.ncols() {
                    out[[band_idx, col]] = (start..end).map(|bin| matrix[[bin, col]]).sum();
                }
            }
            Ok(out)
        }
    }
}

/// Flatten a bins x channels matrix channel-major: all of channel 0's bands,
/// then channel 1's, and so on.
pub fn flatten_channel_major(matrix: &Array2<f64>) -> Vec<f64> {
    let mut flat = Vec::with_capacity(matrix.len());
    for column in matrix.columns() {
        flat.extend(column.iter().copied());
    }
    flat
}

fn segment_path(root: &Path, subject_id: &str, segment: &str) -> PathBuf {
    root.join(format!("sub-{subject_id}"))
        .join("ses-01")
        .join("eeg")
        .join("bandpowers")
        .join(format!("{segment}.csv"))
}

/// The assembled dataset: features plus the side tables that share its row
/// order. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTable {
    pub features: Array2<f64>,
    /// 1 = patient, 0 = control, parallel to rows.
    pub labels: Vec<usize>,
    /// Grouping key for fold splitting, parallel to rows.
    pub subjects: Vec<String>,
    /// `<subject>/<segment>` identifiers, parallel to rows.
    pub row_ids: Vec<String>,
    pub n_channels: usize,
    pub n_bands: usize,
}

/// Record of the most recent evaluation, stored back into the bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub folds: usize,
    pub seed: u64,
    pub scaling: Option<String>,
    pub rows: Vec<MetricsRow>,
    pub evaluated_unix: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub task: Task,
    pub band_mode: BandMode,
    pub normalized: bool,
    pub decibels: bool,
    pub n_subjects: usize,
    pub created_unix: u64,
    pub evaluation: Option<EvaluationRecord>,
}

/// Feature table plus provenance, persisted as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBundle {
    pub metadata: RunMetadata,
    pub table: FeatureTable,
}

impl RunBundle {
    pub fn save(&self, path: &Path) -> Result<(), DataError> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, DataError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build the feature table for one task across all listed subjects.
///
/// Subjects are visited in list order, segments in task order, so the row
/// order is reproducible. All segment files must share one bins x channels
/// shape.
pub fn assemble(cfg: &AssembleConfig) -> Result<RunBundle, DataError> {
    let subjects = read_subjects(&cfg.subjects_file)?;
    log::info!(
        "assembling task '{}' for {} subjects ({} patients)",
        cfg.task,
        subjects.len(),
        subjects.iter().filter(|s| s.label == 1).count()
    );

    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut labels = Vec::new();
    let mut groups = Vec::new();
    let mut row_ids = Vec::new();
    let mut raw_shape: Option<(usize, usize)> = None;
    let mut feature_shape: Option<(usize, usize)> = None;

    for subject in &subjects {
        for segment in cfg.task.segments() {
            let path = segment_path(&cfg.data_root, &subject.id, segment);
            let mut matrix = read_bandpower_csv(&path)?;

            match raw_shape {
                None => raw_shape = Some((matrix.nrows(), matrix.ncols())),
                Some((r, c)) => {
                    if (matrix.nrows(), matrix.ncols()) != (r, c) {
                        return Err(DataError::ShapeMismatch {
                            path,
                            expected_rows: r,
                            expected_cols: c,
                            found_rows: matrix.nrows(),
                            found_cols: matrix.ncols(),
                        });
                    }
                }
            }

            if cfg.normalize {
                normalize_per_channel(&mut matrix);
            }
            if cfg.decibels {
                to_decibels(&mut matrix);
            }
            let banded = aggregate_bands(&matrix, cfg.band_mode)?;
            feature_shape = Some((banded.nrows(), banded.ncols()));

            rows.push(flatten_channel_major(&banded));
            labels.push(subject.label);
            groups.push(subject.id.clone());
            row_ids.push(format!("{}/{}", subject.id, segment));
        }
    }

    let (n_bands, n_channels) = feature_shape.ok_or_else(|| DataError::NoSubjects(cfg.subjects_file.clone()))?;
    let width = n_bands * n_channels;
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let features = Array2::from_shape_vec((labels.len(), width), flat)
        .expect("every row was validated against one shared shape");

    Ok(RunBundle {
        metadata: RunMetadata {
            task: cfg.task,
            band_mode: cfg.band_mode,
            normalized: cfg.normalize,
            decibels: cfg.decibels,
            n_subjects: subjects.len(),
            created_unix: unix_now(),
            evaluation: None,
        },
        table: FeatureTable {
            features,
            labels,
            subjects: groups,
            row_ids,
            n_channels,
            n_bands,
        },
    })
}
