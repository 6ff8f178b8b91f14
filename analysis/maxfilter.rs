//! Wrapper around the Neuromag `maxfilter` program.
//!
//! Runs temporal signal-space separation on a raw recording. The program is
//! only installed on the acquisition site's processing host; this module
//! builds the argument vector, redirects all program output to a log file
//! and turns a non-zero exit status into an error.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

const DEFAULT_BINARY: &str = "/neuro/bin/util/maxfilter";
const DEFAULT_CROSS_TALK: &str = "/net/tera2/opt/neuromag/databases/ctc/ct_sparse.fif";
const DEFAULT_CALIBRATION: &str = "/net/tera2/opt/neuromag/databases/sss/sss_cal.dat";

#[derive(Debug, Error)]
pub enum MaxFilterError {
    #[error("Could not create log file '{path}': {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not launch '{binary}': {source}")]
    Launch {
        binary: PathBuf,
        source: std::io::Error,
    },
    #[error("maxfilter exited with status {status} for '{input}'; see the log at '{log}'.")]
    Failed {
        status: i32,
        input: PathBuf,
        log: PathBuf,
    },
}

/// Site paths and filter settings; defaults match the acquisition host.
#[derive(Debug, Clone)]
pub struct MaxFilterConfig {
    pub binary: PathBuf,
    pub cross_talk: PathBuf,
    pub calibration: PathBuf,
}

impl Default for MaxFilterConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.into(),
            cross_talk: DEFAULT_CROSS_TALK.into(),
            calibration: DEFAULT_CALIBRATION.into(),
        }
    }
}

/// One recording to filter: raw input, tSSS output, log and head-position
/// destinations.
#[derive(Debug, Clone)]
pub struct MaxFilterJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
    pub head_position: PathBuf,
}

fn build_args(cfg: &MaxFilterConfig, job: &MaxFilterJob) -> Vec<std::ffi::OsString> {
    let mut args: Vec<std::ffi::OsString> = Vec::new();
    args.push("-f".into());
    args.push(job.input.clone().into());
    args.push("-o".into());
    args.push(job.output.clone().into());
    for flag in ["-st", "-movecomp", "-autobad", "on", "-trans", "default", "-ctc"] {
        args.push(flag.into());
    }
    args.push(cfg.cross_talk.clone().into());
    args.push("-cal".into());
    args.push(cfg.calibration.clone().into());
    for flag in [
        "-hpicons", "-origin", "fit", "-in", "8", "-out", "3", "-frame", "head", "-hp",
    ] {
        args.push(flag.into());
    }
    args.push(job.head_position.clone().into());
    args.push("-force".into());
    args.push("-v".into());
    args
}

/// Run maxfilter on one recording, sending stdout and stderr to the job's
/// log file.
pub fn run_maxfilter(cfg: &MaxFilterConfig, job: &MaxFilterJob) -> Result<(), MaxFilterError> {
    let log = File::create(&job.log).map_err(|source| MaxFilterError::LogFile {
        path: job.log.clone(),
        source,
    })?;
    let log_err = log.try_clone().map_err(|source| MaxFilterError::LogFile {
        path: job.log.clone(),
        source,
    })?;

    log::info!("maxfiltering '{}'", job.input.display());
    let status = Command::new(&cfg.binary)
        .args(build_args(cfg, job))
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .status()
        .map_err(|source| MaxFilterError::Launch {
            binary: cfg.binary.clone(),
            source,
        })?;

    if !status.success() {
        return Err(MaxFilterError::Failed {
            status: status.code().unwrap_or(-1),
            input: job.input.clone(),
            log: job.log.clone(),
        });
    }
    Ok(())
}

/// Default per-subject file layout under a derivatives root.
pub fn subject_job(derivatives: &Path, subject_id: &str, raw: &Path) -> MaxFilterJob {
    let stem = raw
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    let dir = derivatives.join(format!("sub-{subject_id}")).join("meg");
    MaxFilterJob {
        input: raw.to_path_buf(),
        output: dir.join(format!("{stem}_tsss.fif")),
        log: dir.join(format!("{stem}_tsss.log")),
        head_position: dir.join(format!("{stem}_headpos.pos")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_vector_matches_site_invocation() {
        let cfg = MaxFilterConfig::default();
        let job = MaxFilterJob {
            input: "raw.fif".into(),
            output: "tsss.fif".into(),
            log: "run.log".into(),
            head_position: "head.pos".into(),
        };
        let args: Vec<String> = build_args(&cfg, &job)
            .into_iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-f",
                "raw.fif",
                "-o",
                "tsss.fif",
                "-st",
                "-movecomp",
                "-autobad",
                "on",
                "-trans",
                "default",
                "-ctc",
                DEFAULT_CROSS_TALK,
                "-cal",
                DEFAULT_CALIBRATION,
                "-hpicons",
                "-origin",
                "fit",
                "-in",
                "8",
                "-out",
                "3",
                "-frame",
                "head",
                "-hp",
                "head.pos",
                "-force",
                "-v",
            ]
        );
    }

    #[test]
    fn missing_binary_reports_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = MaxFilterConfig {
            binary: dir.path().join("no-such-binary"),
            ..Default::default()
        };
        let job = MaxFilterJob {
            input: dir.path().join("raw.fif"),
            output: dir.path().join("tsss.fif"),
            log: dir.path().join("run.log"),
            head_position: dir.path().join("head.pos"),
        };
        assert!(matches!(
            run_maxfilter(&cfg, &job),
            Err(MaxFilterError::Launch { .. })
        ));
    }

    #[test]
    fn subject_job_layout() {
        let job = subject_job(Path::new("/derivatives"), "P011", Path::new("/bids/task_ec_raw.fif"));
        assert_eq!(
            job.output,
            PathBuf::from("/derivatives/sub-P011/meg/task_ec_raw_tsss.fif")
        );
        assert_eq!(
            job.head_position,
            PathBuf::from("/derivatives/sub-P011/meg/task_ec_raw_headpos.pos")
        );
    }
}
