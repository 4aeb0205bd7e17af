use std::path::Path;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use inplace_rollout::cli::{
    format_pass_table, format_plan, format_stats, format_validation, plan_snapshot,
    run_controller, simulate, validate, write_snapshot, Cli, Commands, SimulateOptions,
};
use inplace_rollout::config::{
    expand_path, load_config, load_config_from, load_snapshot_file, ClusterSnapshot,
    ControllerConfig,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}

fn load_snapshot(path: &Path) -> anyhow::Result<ClusterSnapshot> {
    let path = expand_path(&path.to_string_lossy());
    load_snapshot_file(&path)
        .with_context(|| format!("Failed to load snapshot {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Returns `Ok(false)` when the command ran but the result is a failure
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config: ControllerConfig = match cli.config {
        Some(ref path) => {
            let path = expand_path(&path.to_string_lossy());
            load_config_from(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => load_config().context("Failed to load config")?,
    };

    match cli.command {
        Commands::Simulate(args) => {
            let snapshot = load_snapshot(&args.snapshot)?;
            let options = SimulateOptions {
                passes: args.passes,
                agent: args.agent,
                instant: args.instant,
                marks: args.marks,
            };
            let report = simulate(snapshot, &config, &options).await?;

            if args.json {
                print_json(&report.records)?;
            } else {
                print!("{}", format_pass_table(&report.records));
            }

            if let Some(ref output) = args.output {
                let output = expand_path(&output.to_string_lossy());
                let last = report
                    .final_snapshot()
                    .context("Deployment disappeared during the simulation")?;
                write_snapshot(&last, &output)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                info!("Wrote final state to {}", output.display());
            }
            Ok(true)
        }
        Commands::Plan(args) => {
            let plan = plan_snapshot(load_snapshot(&args.snapshot)?).await?;
            if args.json {
                print_json(&plan)?;
            } else {
                print!("{}", format_plan(&plan));
            }
            Ok(true)
        }
        Commands::Validate(args) => {
            let result = validate(&load_snapshot(&args.snapshot)?);
            if args.json {
                print_json(&result)?;
            } else {
                print!(
                    "{}",
                    format_validation(&result, &args.snapshot.display().to_string())
                );
            }
            Ok(result.passed)
        }
        Commands::Run(args) => {
            let snapshot = load_snapshot(&args.snapshot)?;
            let secs = args.interval.unwrap_or(config.reconcile_interval_secs);
            let period = Duration::from_secs(secs);
            info!("Running controller on {} until Ctrl-C", args.snapshot.display());

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
            };
            let stats = run_controller(snapshot, &config, period, args.agent, shutdown).await?;
            print!("{}", format_stats(&stats));
            Ok(true)
        }
    }
}
