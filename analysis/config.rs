//! Run configuration and its up-front validation.
//!
//! Configuration is immutable once built. `RunConfig::validate` is called
//! against the bundle metadata before any fold is fitted, so every
//! configuration error is raised before computation starts.

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::ClassifierKind;
use crate::data::{BandMode, RunMetadata, Task};
use crate::scale::ScalingMethod;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Scaling was requested, but the bundle's features are already normalized per channel.")]
    ScalingNormalizedConflict,
    #[error("Per-channel normalization and the decibel transform are mutually exclusive.")]
    NormalizeDecibelConflict,
    #[error("Segment {which} is out of range for task '{task}' with {available} segments (segments are numbered from 1).")]
    SegmentOutOfRange {
        which: usize,
        task: Task,
        available: usize,
    },
    #[error("Cross-validation needs at least 2 folds, got {0}.")]
    TooFewFolds(usize),
    #[error("At least one classifier must be selected.")]
    NoClassifiers,
    #[error("One-segment mode and leave-one-subject-out mode cannot be combined.")]
    OneSegmentWithLoso,
}

/// What to do with a test fold whose labels are all one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SingleClassPolicy {
    /// Drop the fold from every aggregate.
    Skip,
    /// Keep the fold's threshold metrics; ROC and AUC are still excluded
    /// since they are undefined for one class.
    Warn,
}

/// Inputs for building a feature-table bundle.
#[derive(Debug, Clone)]
pub struct AssembleConfig {
    pub subjects_file: PathBuf,
    pub data_root: PathBuf,
    pub task: Task,
    pub band_mode: BandMode,
    pub normalize: bool,
    pub decibels: bool,
}

impl AssembleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.normalize && self.decibels {
            return Err(ConfigError::NormalizeDecibelConflict);
        }
        Ok(())
    }
}

/// Evaluation parameters for one cross-validation run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub classifiers: Vec<ClassifierKind>,
    pub folds: usize,
    pub seed: u64,
    pub scaling: Option<ScalingMethod>,
    /// Keep one segment per subject and stratify rows instead of subjects.
    pub one_segment_per_task: bool,
    /// 1-based segment index used in one-segment mode.
    pub which_segment: usize,
    pub leave_one_subject_out: bool,
    pub single_class_policy: SingleClassPolicy,
    pub figure: Option<PathBuf>,
    pub metrics_tsv: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            classifiers: ClassifierKind::ALL.to_vec(),
            folds: 10,
            seed: 8,
            scaling: None,
            one_segment_per_task: false,
            which_segment: 1,
            leave_one_subject_out: false,
            single_class_policy: SingleClassPolicy::Skip,
            figure: None,
            metrics_tsv: None,
        }
    }
}

impl RunConfig {
    pub fn validate(&self, metadata: &RunMetadata) -> Result<(), ConfigError> {
        if self.classifiers.is_empty() {
            return Err(ConfigError::NoClassifiers);
        }
        if !self.leave_one_subject_out && self.folds < 2 {
            return Err(ConfigError::TooFewFolds(self.folds));
        }
        if self.scaling.is_some() && metadata.normalized {
            return Err(ConfigError::ScalingNormalizedConflict);
        }
        if self.one_segment_per_task {
            if self.leave_one_subject_out {
                return Err(ConfigError::OneSegmentWithLoso);
            }
            let available = metadata.task.n_segments();
            if self.which_segment == 0 || self.which_segment > available {
                return Err(ConfigError::SegmentOutOfRange {
                    which: self.which_segment,
                    task: metadata.task,
                    available,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(normalized: bool, task: Task) -> RunMetadata {
        RunMetadata {
            task,
            band_mode: BandMode::Thin,
            normalized,
            decibels: false,
            n_subjects: 4,
            created_unix: 0,
            evaluation: None,
        }
    }

    #[test]
    fn default_config_passes() {
        assert!(RunConfig::default().validate(&metadata(false, Task::Ec)).is_ok());
    }

    #[test]
    fn scaling_on_normalized_bundle_is_rejected() {
        let cfg = RunConfig {
            scaling: Some(ScalingMethod::Robust),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(&metadata(true, Task::Ec)),
            Err(ConfigError::ScalingNormalizedConflict)
        ));
    }

    #[test]
    fn segment_index_checked_against_task() {
        let cfg = RunConfig {
            one_segment_per_task: true,
            which_segment: 3,
            ..Default::default()
        };
        // pasat1 has only two segments.
        assert!(matches!(
            cfg.validate(&metadata(false, Task::Pasat1)),
            Err(ConfigError::SegmentOutOfRange { available: 2, .. })
        ));
        assert!(cfg.validate(&metadata(false, Task::Ec)).is_ok());
    }

    #[test]
    fn zero_segment_is_rejected() {
        let cfg = RunConfig {
            one_segment_per_task: true,
            which_segment: 0,
            ..Default::default()
        };
        assert!(cfg.validate(&metadata(false, Task::Ec)).is_err());
    }

    #[test]
    fn normalize_and_decibels_conflict() {
        let cfg = AssembleConfig {
            subjects_file: "subjects.txt".into(),
            data_root: "data".into(),
            task: Task::Ec,
            band_mode: BandMode::Wide,
            normalize: true,
            decibels: true,
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NormalizeDecibelConflict)
        ));
    }
}
