use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use dialoguer::Confirm;
use imaging_reconcile::config::Config;
use imaging_reconcile::core::engine::{EngineOptions, Pass, Reconciler};
use imaging_reconcile::core::RunMode;
use imaging_reconcile::database::establish_connection;
use imaging_reconcile::logging;
use imaging_reconcile::services::OpalClient;
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "imaging-reconcile",
    version,
    about = "Reconcile the imaging store with the artifacts on disk"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Repair Exam.Downloaded flags and prune Image records without a file
    Downloaded {
        #[command(flatten)]
        job: JobArgs,
    },

    /// Fill missing Exam.SideIndex values from the metadata service
    SideIndex {
        #[command(flatten)]
        job: JobArgs,
    },

    /// Delete unrated baseline Image records whose file is missing or empty
    UnratedBaseline {
        #[command(flatten)]
        job: JobArgs,
        /// ScanType to clean instead of the configured one
        #[arg(long, value_name = "NAME")]
        scan_type: Option<String>,
    },

    /// Run every repair: downloaded, unrated-baseline, then side-index
    All {
        #[command(flatten)]
        job: JobArgs,
        /// ScanType to clean instead of the configured one
        #[arg(long, value_name = "NAME")]
        scan_type: Option<String>,
    },
}

#[derive(Args, Debug)]
struct JobArgs {
    /// Configuration file (TOML)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// 0 applies the repairs, anything else only reports them
    #[arg(value_name = "DEBUG", default_value_t = 1, allow_negative_numbers = true)]
    debug: i64,

    /// Log verbosity: 0 info, 1 debug, 2 trace
    #[arg(value_name = "VERBOSE", default_value_t = 0)]
    verbose: u8,

    /// Raise log verbosity (repeatable)
    #[arg(short, action = ArgAction::Count)]
    verbosity: u8,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,

    /// Do not ask before a live run
    #[arg(long)]
    yes: bool,
}

impl Commands {
    fn into_parts(self) -> (Vec<Pass>, JobArgs, Option<String>) {
        match self {
            Commands::Downloaded { job } => (vec![Pass::Downloaded], job, None),
            Commands::SideIndex { job } => (vec![Pass::SideIndex], job, None),
            Commands::UnratedBaseline { job, scan_type } => {
                (vec![Pass::UnratedBaseline], job, scan_type)
            }
            Commands::All { job, scan_type } => (Pass::ALL.to_vec(), job, scan_type),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (passes, job, scan_type) = cli.command.into_parts();

    logging::init(job.verbose.saturating_add(job.verbosity))?;

    let mut config = Config::load(&job.config)
        .with_context(|| format!("Failed to load configuration {:?}", job.config))?;
    if let Some(scan_type) = scan_type {
        config.cleanup.scan_type = scan_type;
    }

    let metadata = if passes.iter().any(|pass| pass.needs_metadata()) {
        Some(OpalClient::new(config.require_metadata()?))
    } else {
        None
    };

    if !config.paths.image_data.is_dir() {
        bail!(
            "Image data root {:?} is not a directory",
            config.paths.image_data
        );
    }

    let gateway = establish_connection(&config.database)
        .with_context(|| format!("Failed to open store {:?}", config.database.path))?;

    let mode = RunMode::from_debug(job.debug);
    if mode.is_live() && !job.yes && std::io::stdin().is_terminal() {
        let proceed = Confirm::new()
            .with_prompt(format!(
                "Apply {} repairs to {}?",
                passes
                    .iter()
                    .map(|p| p.name())
                    .collect::<Vec<_>>()
                    .join(", "),
                config.database.path.display()
            ))
            .default(false)
            .interact()?;
        if !proceed {
            println!("Nothing was changed.");
            return Ok(());
        }
    }

    let options = EngineOptions {
        mode,
        show_progress: !job.no_progress,
        cleanup: config.cleanup.clone(),
    };
    let mut reconciler = Reconciler::new(&gateway, config.paths.image_data.clone(), options);
    if let Some(client) = metadata.as_ref() {
        reconciler = reconciler.with_metadata(client);
    }

    let report = reconciler.run(&passes);
    if job.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report);
    }

    Ok(())
}
