//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// Regression Test Orchestration Core
#[derive(Parser, Debug)]
#[command(name = "rtvs")]
#[command(version = "0.2.1")]
#[command(about = "Trigger, watch and summarize regression test runs")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Trigger a run and wait for it to finish
    Run(RunArgs),

    /// List registered test cases and packs
    List(ListArgs),

    /// Show the dispatch order for a selection without running it
    Resolve(ResolveArgs),

    /// Summarize stored runs
    Report(ReportArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Catalog file with cases and packs (yaml or json)
    #[arg(short, long)]
    pub catalog: Option<String>,

    /// Feature pack to run
    #[arg(short, long)]
    pub feature: Option<String>,

    /// Combo pack to run
    #[arg(long)]
    pub combo: Option<String>,

    /// Explicit case ids to run
    #[arg(long = "case")]
    pub cases: Vec<String>,

    /// Worker pool size; defaults to the runner config value
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Target environment (prod, cert, stage)
    #[arg(short, long, default_value = "noenv")]
    pub environment: String,

    /// Run category (reg, data)
    #[arg(long, default_value = "reg")]
    pub category: String,

    /// Keep only cases carrying one of these tags
    #[arg(short, long)]
    pub tag: Vec<String>,

    /// Keep only cases at or above this criticality
    #[arg(long)]
    pub min_criticality: Option<String>,

    /// Group the final summary by pack (feature, combo)
    #[arg(short, long)]
    pub group_by: Option<String>,

    /// Runner configuration file
    #[arg(long)]
    pub config: Option<String>,

    /// Directory for the journal store
    #[arg(long)]
    pub store_dir: Option<String>,

    /// Keep records in memory instead of the journal
    #[arg(long)]
    pub memory: bool,

    /// Simulated executor delay range in milliseconds
    #[arg(long, default_value = "50")]
    pub sim_min_ms: u64,

    #[arg(long, default_value = "400")]
    pub sim_max_ms: u64,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Catalog file with cases and packs
    #[arg(short, long)]
    pub catalog: Option<String>,

    /// Show tags, criticality and owner per case
    #[arg(short, long)]
    pub detailed: bool,

    /// Show pack composition
    #[arg(short, long)]
    pub packs: bool,
}

/// Arguments for the resolve command
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Catalog file with cases and packs
    #[arg(short, long)]
    pub catalog: Option<String>,

    /// Feature pack to resolve
    #[arg(short, long)]
    pub feature: Option<String>,

    /// Combo pack to resolve
    #[arg(long)]
    pub combo: Option<String>,

    /// Explicit case ids to resolve
    #[arg(long = "case")]
    pub cases: Vec<String>,

    /// Keep only cases carrying one of these tags
    #[arg(short, long)]
    pub tag: Vec<String>,

    /// Keep only cases at or above this criticality
    #[arg(long)]
    pub min_criticality: Option<String>,
}

/// Arguments for the report command
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Directory holding the journal store
    #[arg(long)]
    pub store_dir: Option<String>,

    /// Run id to summarize; omit to list stored runs
    #[arg(short, long)]
    pub run: Option<String>,

    /// Catalog file, needed for pack grouping
    #[arg(short, long)]
    pub catalog: Option<String>,

    /// Group the summary by pack (feature, combo)
    #[arg(short, long)]
    pub group_by: Option<String>,

    /// Output format (text, json, csv)
    #[arg(short, long, default_value = "text")]
    pub format: String,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    pub export: Option<String>,
}
