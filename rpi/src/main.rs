//! Research -> Plan -> Implement pipeline controller.
//!
//! Each invocation handles one thing: a hosting-platform event, a sweep tick
//! or an inspection command. State lives in `.rpi/` under `--root`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use rpi::controller::Controller;
use rpi::core::feature_id::feature_id;
use rpi::dispatch::{DispatchOutcome, dispatch};
use rpi::errors::pipeline_error;
use rpi::exit_codes;
use rpi::io::agent::CommandAgent;
use rpi::io::config::{PipelineConfig, load_config};
use rpi::io::events::read_event;
use rpi::io::git::GitSourceControl;
use rpi::io::init::{InitOptions, PipelinePaths, init_workspace};
use rpi::io::review::GhReviewHost;
use rpi::io::run_store::RunStore;
use rpi::logging;
use rpi::sweep::sweep;

#[derive(Parser)]
#[command(
    name = "rpi",
    version,
    about = "Research -> Plan -> Implement pipeline controller"
)]
struct Cli {
    /// Repository root holding `.rpi/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Debug-level diagnostics on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.rpi/` with a default config.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Classify one event (JSON) and act on it.
    Dispatch {
        /// Event file; stdin when omitted.
        event: Option<PathBuf>,
    },
    /// Remove artifacts of runs whose review was finalized past retention.
    Sweep {
        /// Evaluate retention at this RFC 3339 time instead of now.
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Print a run record as JSON.
    Status { feature_id: String },
    /// Print the feature id derived from a title.
    FeatureId { title: String },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            match pipeline_error(&err) {
                Some(kind) if kind.is_rejection() => exit_codes::REJECTED,
                _ => exit_codes::FAILED,
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Dispatch { event } => cmd_dispatch(&cli.root, event.as_deref()),
        Command::Sweep { now } => cmd_sweep(&cli.root, now.unwrap_or_else(Utc::now)),
        Command::Status { feature_id } => cmd_status(&cli.root, &feature_id),
        Command::FeatureId { title } => cmd_feature_id(&cli.root, &title),
    }
}

fn load(root: &Path) -> Result<(PipelinePaths, PipelineConfig)> {
    let paths = PipelinePaths::new(root);
    let config = load_config(&paths.config_path)?;
    config.validate()?;
    Ok((paths, config))
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(root, &InitOptions { force })?;
    println!("{}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_dispatch(root: &Path, event: Option<&Path>) -> Result<i32> {
    let (paths, config) = load(root)?;
    let event = read_event(event)?;

    let agent = CommandAgent::new(config.agent.clone(), paths.logs_dir.clone());
    let scm = GitSourceControl::new(&paths.root, config.git.clone());
    let review = GhReviewHost::new(&paths.root, config.git.base_branch.clone());
    let controller = Controller::new(paths, config, &agent, &scm, &review)?;

    match dispatch(&controller, &event, Utc::now())? {
        DispatchOutcome::Ignored => Ok(exit_codes::IGNORED),
        DispatchOutcome::Run(outcome) => {
            let review = outcome
                .review
                .map(|review| match review.url {
                    Some(url) => format!(" review={url}"),
                    None => format!(" review=#{}", review.id),
                })
                .unwrap_or_default();
            println!(
                "{} stage={} strategy={}{review}",
                outcome.feature_id, outcome.stage, outcome.strategy
            );
            Ok(exit_codes::OK)
        }
        DispatchOutcome::Answered { review_id } => {
            println!("answered on review {review_id}");
            Ok(exit_codes::OK)
        }
        DispatchOutcome::Swept(report) => {
            print_json(&report)?;
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_sweep(root: &Path, now: DateTime<Utc>) -> Result<i32> {
    let (paths, config) = load(root)?;
    let scm = GitSourceControl::new(&paths.root, config.git.clone());
    let review = GhReviewHost::new(&paths.root, config.git.base_branch.clone());
    let report = sweep(&paths, &config, &scm, &review, now)?;
    print_json(&report)?;
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path, feature_id: &str) -> Result<i32> {
    let paths = PipelinePaths::new(root);
    let run = RunStore::new(&paths)
        .load(feature_id)?
        .ok_or_else(|| anyhow!("no pipeline run for '{feature_id}'"))?;
    print_json(&run)?;
    Ok(exit_codes::OK)
}

fn cmd_feature_id(root: &Path, title: &str) -> Result<i32> {
    let (_, config) = load(root)?;
    println!("{}", feature_id(title, config.feature_id_max_len));
    Ok(exit_codes::OK)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
