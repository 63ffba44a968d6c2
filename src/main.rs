//! cutover - 单机容器切换工具
//!
//! Usage:
//! - Deploy: `cutover deploy dev`
//! - Deploy without prompt: `cutover deploy prod --yes --report report.json`
//! - Image retention only: `cutover prune dev --keep 3 --dry-run`
//! - List targets: `cutover targets`

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cutover::config::constants::{DEFAULT_CONFIG_FILE, VERSION};
use cutover::infra::{prompt, DockerCli, GitCli};
use cutover::{CutoverController, CutoverError, DeployConfig, RetentionCollector};

#[derive(Parser)]
#[command(
    name = "cutover",
    about = "Single-host container cutover with image retention",
    version,
    propagate_version = true
)]
struct Cli {
    /// Deployment targets file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild and replace the target's container
    Deploy {
        target: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Write the cutover report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Remove obsolete images of the target's image family
    Prune {
        target: String,
        /// Override the configured number of images to keep
        #[arg(short, long)]
        keep: Option<usize>,
        /// Show what would be removed
        #[arg(long)]
        dry_run: bool,
    },
    /// List configured targets
    Targets,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "cutover=debug" } else { "cutover=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = DeployConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Deploy {
            target,
            yes,
            report,
        } => deploy(&config, &target, yes, report.as_deref()),
        Commands::Prune {
            target,
            keep,
            dry_run,
        } => prune(&config, &target, keep, dry_run),
        Commands::Targets => {
            list_targets(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    Ok(rt.block_on(future))
}

fn deploy(
    config: &DeployConfig,
    name: &str,
    yes: bool,
    report_path: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    let target = config.target(name)?;

    println!("cutover v{}", VERSION);
    println!("  Target:    {}", target.name);
    println!("  Branch:    {}", target.branch);
    println!("  Image:     {}", target.image());
    println!("  Container: {}", target.container);
    println!("  Port:      {}", target.port);

    if !yes {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        if !prompt::confirm(&mut input, &mut output, "Proceed?")? {
            let err = CutoverError::UserCancelled;
            warn!(target = %target.name, "{}", err);
            return Ok(ExitCode::from(err.exit_code() as u8));
        }
    }

    let runtime = DockerCli::new();
    let source = GitCli::new(target.work_dir.clone()).with_remote(target.remote.as_str());
    let report = block_on(CutoverController::new(&runtime, &source, &target).run())?;

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "Cutover report written");
    }

    Ok(ExitCode::from(report.exit_code() as u8))
}

fn prune(
    config: &DeployConfig,
    name: &str,
    keep: Option<usize>,
    dry_run: bool,
) -> anyhow::Result<ExitCode> {
    let target = config.target(name)?;
    let mut family = target.family.clone();
    if let Some(keep) = keep {
        family.keep = keep;
    }

    let runtime = DockerCli::new();
    let collector = RetentionCollector::new(&runtime);
    let report = block_on(async {
        if dry_run {
            collector.preview(&family).await
        } else {
            collector.collect(&family).await
        }
    })?
    .with_context(|| format!("Image retention failed for {}", family.reference_filter()))?;

    for failure in &report.failures {
        warn!(image = %failure.reference, id = %failure.id, reason = %failure.reason, "Not removed");
    }
    if let Some(reason) = &report.dangling_error {
        warn!(reason = %reason, "Dangling image prune failed");
    }
    info!(family = %report.family, "Retention: {}", report.summary());

    Ok(ExitCode::SUCCESS)
}

fn list_targets(config: &DeployConfig) {
    for name in config.target_names() {
        match config.target(name) {
            Ok(target) => println!(
                "{:<12} {:<28} {:<20} branch={} port={}",
                target.name,
                target.image(),
                target.container,
                target.branch,
                target.port
            ),
            Err(e) => println!("{:<12} (invalid: {})", name, e),
        }
    }
}
