//! CLI module for inplace-rollout
//!
//! Subcommands, all driven from a cluster snapshot file:
//! - `inplace-rollout simulate` - Run passes with a simulated update agent
//! - `inplace-rollout plan` - Show the budget and the next selection
//! - `inplace-rollout validate` - Check a snapshot before simulating it
//! - `inplace-rollout run` - Run the periodic controller until interrupted

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "inplace-rollout")]
#[command(about = "Roll machine deployments to a new template without replacing machines")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.inplace-rollout/config.yaml)
    #[arg(long, global = true, env = "INPLACE_ROLLOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to a .env file loaded before anything else
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run rollout passes against a snapshot and print what each pass did
    Simulate(SimulateArgs),

    /// Show the availability budget and which machines would be selected next
    Plan(SnapshotArgs),

    /// Check a snapshot for label, strategy and replica problems
    Validate(SnapshotArgs),

    /// Run the periodic controller against a snapshot until Ctrl-C
    Run(RunArgs),
}

/// Arguments for commands that only read a snapshot
#[derive(Parser, Debug)]
pub struct SnapshotArgs {
    /// Snapshot file (YAML, or JSON with a .json extension)
    pub snapshot: PathBuf,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the simulate command
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Snapshot file (YAML, or JSON with a .json extension)
    pub snapshot: PathBuf,

    /// Maximum passes (default: max_passes from the config)
    #[arg(long, value_name = "N")]
    pub passes: Option<usize>,

    /// Run the simulated update agent after every pass
    #[arg(long)]
    pub agent: bool,

    /// Let the agent drain and update a node in a single step
    #[arg(long, requires = "agent")]
    pub instant: bool,

    /// Nodes the operator marks before each pass of a manual rollout
    #[arg(long, value_name = "N", default_value = "1")]
    pub marks: usize,

    /// Write the final cluster state to this snapshot file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Snapshot file (YAML, or JSON with a .json extension)
    pub snapshot: PathBuf,

    /// Seconds between ticks (default: reconcile_interval_secs from the config)
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Run the simulated update agent on every tick
    #[arg(long)]
    pub agent: bool,
}
