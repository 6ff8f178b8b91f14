#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use mtbi_eeg::classify::ClassifierKind;
use mtbi_eeg::config::{AssembleConfig, RunConfig, SingleClassPolicy};
use mtbi_eeg::data::{self, BandMode, RunBundle, Task};
use mtbi_eeg::maxfilter::{MaxFilterConfig, MaxFilterJob, run_maxfilter, subject_job};
use mtbi_eeg::pipeline::{self, default_figure_name};
use mtbi_eeg::scale::ScalingMethod;

#[derive(Parser)]
#[command(name = "mtbi-eeg", about = "EEG band-power classification of mTBI patients vs controls")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a feature-table bundle from per-subject band-power CSVs
    Assemble(AssembleArgs),
    /// Cross-validate the classifiers over a bundle and report ROC/metrics
    Evaluate(EvaluateArgs),
    /// Run Neuromag maxfilter (tSSS) on a raw recording
    Maxfilter(MaxFilterArgs),
    /// Print version information
    Version,
}

#[derive(Args)]
struct AssembleArgs {
    /// Subject list file, one id per line ('P...' = patient, 'C...' = control)
    #[arg(long)]
    subjects: PathBuf,

    /// Root of the BIDS-like derivatives tree holding the band-power CSVs
    #[arg(long)]
    data_root: PathBuf,

    /// Recording task to assemble
    #[arg(long, value_enum)]
    task: Task,

    /// Keep raw frequency bins or aggregate into the five canonical bands
    #[arg(long, value_enum, default_value = "thin")]
    band_mode: BandMode,

    /// Normalize each channel's powers to sum to 1
    #[arg(long)]
    normalize: bool,

    /// Convert powers to decibels (10*log10)
    #[arg(long)]
    decibels: bool,

    /// Output bundle path (JSON)
    #[arg(long)]
    output: PathBuf,
}

#[derive(Args)]
struct EvaluateArgs {
    /// Bundle produced by `assemble`
    bundle: PathBuf,

    /// Classifier to evaluate; repeatable, defaults to all four
    #[arg(long = "classifier", value_enum)]
    classifiers: Vec<ClassifierKind>,

    /// Number of cross-validation folds
    #[arg(long, default_value = "10")]
    folds: usize,

    /// Random seed for fold shuffling and classifier randomness
    #[arg(long, default_value = "8")]
    seed: u64,

    /// Scale features (fitted on each training partition only)
    #[arg(long)]
    scale: bool,

    /// Scaling method used with --scale
    #[arg(long, value_enum, default_value = "robust")]
    scaling_method: ScalingMethod,

    /// Keep one segment per subject and stratify rows instead of subjects
    #[arg(long)]
    one_segment: bool,

    /// 1-based segment index used with --one-segment
    #[arg(long, default_value = "1")]
    which_segment: usize,

    /// Leave-one-subject-out evaluation with pooled per-subject scores
    #[arg(long)]
    leave_one_subject_out: bool,

    /// What to do with a test fold containing a single class
    #[arg(long, value_enum, default_value = "skip")]
    single_class_policy: SingleClassPolicy,

    /// ROC figure output path; defaults to a name derived from the bundle
    #[arg(long)]
    figure: Option<PathBuf>,

    /// Skip the ROC figure
    #[arg(long)]
    no_figure: bool,

    /// Write the per-classifier metrics table to this TSV file
    #[arg(long)]
    metrics_tsv: Option<PathBuf>,
}

#[derive(Args)]
struct MaxFilterArgs {
    /// The subject to process
    subject: String,

    /// Raw .fif recording to filter
    #[arg(long)]
    input: PathBuf,

    /// Derivatives root for the tSSS output, log and head-position files
    #[arg(long)]
    derivatives: PathBuf,

    /// Override the maxfilter binary location
    #[arg(long)]
    binary: Option<PathBuf>,

    /// Override the cross-talk correction file
    #[arg(long)]
    cross_talk: Option<PathBuf>,

    /// Override the fine-calibration file
    #[arg(long)]
    calibration: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let started = Instant::now();
    let result = match cli.command {
        Some(Commands::Assemble(args)) => run_assemble(args),
        Some(Commands::Evaluate(args)) => run_evaluate(args),
        Some(Commands::Maxfilter(args)) => run_maxfilter_cmd(args),
        Some(Commands::Version) => {
            println!("mtbi-eeg {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => {
            Cli::command().print_help().expect("print help");
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
    println!("Done in {:.2} s.", started.elapsed().as_secs_f64());
}

fn run_assemble(args: AssembleArgs) -> Result<(), Box<dyn Error>> {
    let cfg = AssembleConfig {
        subjects_file: args.subjects,
        data_root: args.data_root,
        task: args.task,
        band_mode: args.band_mode,
        normalize: args.normalize,
        decibels: args.decibels,
    };
    cfg.validate()?;
    let bundle = data::assemble(&cfg)?;
    println!(
        "Assembled {} rows x {} features ({} channels x {} bands) for task '{}'.",
        bundle.table.features.nrows(),
        bundle.table.features.ncols(),
        bundle.table.n_channels,
        bundle.table.n_bands,
        bundle.metadata.task,
    );
    bundle.save(&args.output)?;
    println!("Wrote bundle to '{}'.", args.output.display());
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<(), Box<dyn Error>> {
    let mut bundle = RunBundle::load(&args.bundle)?;

    let classifiers = if args.classifiers.is_empty() {
        ClassifierKind::ALL.to_vec()
    } else {
        args.classifiers.clone()
    };
    let scaling = args.scale.then_some(args.scaling_method);
    let figure = (!args.no_figure).then(|| {
        args.figure
            .unwrap_or_else(|| PathBuf::from(default_figure_name(&bundle.metadata, scaling)))
    });
    let cfg = RunConfig {
        classifiers,
        folds: args.folds,
        seed: args.seed,
        scaling,
        one_segment_per_task: args.one_segment,
        which_segment: args.which_segment,
        leave_one_subject_out: args.leave_one_subject_out,
        single_class_policy: args.single_class_policy,
        figure,
        metrics_tsv: args.metrics_tsv,
    };

    let report = pipeline::evaluate(&mut bundle, &cfg)?;
    for r in &report.reports {
        match (&r.aggregate, &r.summary) {
            (Some(agg), Some(s)) => println!(
                "{:<28} AUC {:.3} \u{00b1} {:.3}  accuracy {:.3} \u{00b1} {:.3}  precision {:.3} \u{00b1} {:.3}  recall {:.3} \u{00b1} {:.3}  F1 {:.3} \u{00b1} {:.3}",
                r.kind.label(),
                agg.mean_auc,
                agg.std_auc,
                s.mean_accuracy,
                s.std_accuracy,
                s.mean_precision,
                s.std_precision,
                s.mean_recall,
                s.std_recall,
                s.mean_f1,
                s.std_f1,
            ),
            _ => println!("{:<28} no valid folds out of {}", r.kind.label(), r.n_folds),
        }
    }

    bundle.save(&args.bundle)?;
    Ok(())
}

fn run_maxfilter_cmd(args: MaxFilterArgs) -> Result<(), Box<dyn Error>> {
    let mut cfg = MaxFilterConfig::default();
    if let Some(binary) = args.binary {
        cfg.binary = binary;
    }
    if let Some(cross_talk) = args.cross_talk {
        cfg.cross_talk = cross_talk;
    }
    if let Some(calibration) = args.calibration {
        cfg.calibration = calibration;
    }
    let job: MaxFilterJob = subject_job(&args.derivatives, &args.subject, &args.input);
    if let Some(parent) = job.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    run_maxfilter(&cfg, &job)?;
    println!(
        "Maxfiltered '{}' -> '{}'.",
        job.input.display(),
        job.output.display()
    );
    Ok(())
}
