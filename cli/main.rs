#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use eyfactor::pipeline::{self, PipelineConfig, PipelineInputs, StageOutput};
use eyfactor::progress::TerminalProgress;

#[derive(Parser)]
#[command(
    name = "eyfactor",
    about = "Early-years profile recovery, census panel assembly and latent factor scoring",
    long_about = "Cleans early-years assessment profiles, folds yearly school census snapshots \
                 into a per-pupil panel, estimates cognitive and socio-emotional factor scores, \
                 and merges everything into one analysis table."
)]
struct Cli {
    /// Pipeline configuration (.toml); built-in defaults apply when omitted
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct OutDir {
    /// Directory holding every stage's outputs
    #[arg(long, value_name = "DIR", default_value = "eyfactor_out")]
    out_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover missing totals in a raw assessment extract
    #[command(about = "Clean the assessment extract (outputs: assessment_clean.tsv, recovery_report.tsv)")]
    Recover {
        /// Raw assessment extract (.tsv, .csv, optionally .gz)
        #[arg(value_name = "ASSESSMENT")]
        assessment: PathBuf,

        #[command(flatten)]
        out: OutDir,
    },

    /// Aggregate yearly census snapshots into one record per cohort pupil
    #[command(about = "Assemble the census panel (outputs: census_panel.tsv)")]
    Panel {
        /// Baseline cohort table with pupil identifier and cohort label
        #[arg(value_name = "COHORT")]
        cohort: PathBuf,

        /// Directory of yearly snapshots, one file per census year
        #[arg(value_name = "SNAPSHOT_DIR")]
        snapshots: PathBuf,

        #[command(flatten)]
        out: OutDir,
    },

    /// Estimate the two-factor model and score every assessed pupil
    #[command(about = "Estimate and score latent factors (outputs: factor_model.toml, factor_scores.tsv)")]
    Score {
        #[command(flatten)]
        out: OutDir,
    },

    /// Join panel, assessment totals, scores and outcomes
    #[command(about = "Build the analysis table (outputs: analysis.tsv)")]
    Merge {
        /// Offending-outcome extract keyed by pupil identifier
        #[arg(long, value_name = "PATH")]
        offending: Option<PathBuf>,

        #[command(flatten)]
        out: OutDir,
    },

    /// Run every stage in order
    #[command(about = "Run recover, panel, score and merge in order")]
    Run {
        #[arg(value_name = "ASSESSMENT")]
        assessment: PathBuf,

        #[arg(value_name = "COHORT")]
        cohort: PathBuf,

        #[arg(value_name = "SNAPSHOT_DIR")]
        snapshots: PathBuf,

        #[arg(long, value_name = "PATH")]
        offending: Option<PathBuf>,

        #[command(flatten)]
        out: OutDir,
    },

    /// Write the built-in configuration as a starting point
    #[command(about = "Write the default configuration (outputs: eyfactor.toml)")]
    Config {
        #[arg(value_name = "PATH", default_value = "eyfactor.toml")]
        path: PathBuf,
    },

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

fn report(outputs: &[StageOutput]) {
    for output in outputs {
        println!(
            "[{}] Wrote {} rows to {}",
            output.stage,
            output.rows,
            output.path.display()
        );
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let config = PipelineConfig::load_or_default(path)?;
    if path.is_none() {
        println!("Using the built-in configuration.");
    }
    Ok(config)
}

fn run(command: Commands, config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut progress = TerminalProgress::new();
    match command {
        Commands::Recover { assessment, out } => {
            let config = load_config(config_path)?;
            println!("Recovering assessment totals from: {}", assessment.display());
            report(&pipeline::run_recover(&config, &assessment, &out.out_dir)?);
        }
        Commands::Panel { cohort, snapshots, out } => {
            let config = load_config(config_path)?;
            println!(
                "Assembling census panel for {} from snapshots in {}",
                cohort.display(),
                snapshots.display()
            );
            report(&pipeline::run_panel(&config, &cohort, &snapshots, &out.out_dir, &mut progress)?);
        }
        Commands::Score { out } => {
            let config = load_config(config_path)?;
            println!("Estimating factor model on {}", out.out_dir.display());
            report(&pipeline::run_score(&config, &out.out_dir, &mut progress)?);
        }
        Commands::Merge { offending, out } => {
            let config = load_config(config_path)?;
            report(&pipeline::run_merge(&config, offending.as_deref(), &out.out_dir)?);
        }
        Commands::Run {
            assessment,
            cohort,
            snapshots,
            offending,
            out,
        } => {
            let config = load_config(config_path)?;
            let inputs = PipelineInputs {
                assessment,
                cohort,
                snapshot_dir: snapshots,
                offending,
            };
            report(&pipeline::run_all(&config, &inputs, &out.out_dir, &mut progress)?);
        }
        Commands::Config { path } => {
            load_config(config_path)?.save(&path)?;
            println!("Configuration written to: {}", path.display());
        }
        Commands::Version => println!("eyfactor {}", env!("CARGO_PKG_VERSION")),
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { config, command } = Cli::parse();
    let result = match command {
        Some(command) => run(command, config.as_deref()),
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
