//! rtvs - regression test run orchestrator
//!
//! Resolves pack selections from a catalog, drives them through a
//! bounded worker pool, and summarizes the stored results.
//!
//! ## Usage
//!
//! ```bash
//! # Run a feature pack with 4 workers against stage
//! rtvs run --catalog catalog.yaml --feature SidebarPack --parallel 4 --environment stage
//!
//! # Run a combo pack, grouping the summary by feature pack
//! rtvs run --catalog catalog.yaml --combo ComboPack1 --group-by feature
//!
//! # Inspect the dispatch order without running anything
//! rtvs resolve --catalog catalog.yaml --combo ComboPack1
//!
//! # Summarize a stored run later
//! rtvs report --run RTVS-REG-STAGE-SidebarPack-20260830_120000-0042
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rtvs_core::cli::{self, Args};
use rtvs_core::config::{CatalogFile, EnvConfig, RunnerConfig};
use rtvs_core::executor::sim::RandomizedExecutor;
use rtvs_core::models::{
    Criticality, GroupBy, PackRef, RunCategory, RunFilters, RunId, RunRequest, RunStatus,
    Selection, TargetEnv, TestCaseId,
};
use rtvs_core::report;
use rtvs_core::{
    FixedSessionPool, JournalStore, MemoryStore, Orchestrator, PackRegistry, ResultStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    match args.command {
        cli::Command::Run(run_args) => run_selection(run_args).await?,
        cli::Command::List(list_args) => list_catalog(list_args)?,
        cli::Command::Resolve(resolve_args) => resolve_selection(resolve_args)?,
        cli::Command::Report(report_args) => show_report(report_args).await?,
    }

    Ok(())
}

fn catalog_path(explicit: Option<String>, env: &EnvConfig) -> Result<String> {
    explicit
        .or_else(|| env.catalog_file.clone())
        .context("no catalog given; pass --catalog or set RTVS_CATALOG")
}

fn load_registry(path: &str) -> Result<PackRegistry> {
    let catalog = CatalogFile::load(path)?;
    let registry = catalog
        .build_registry()
        .with_context(|| format!("catalog {path} failed validation"))?;
    Ok(registry)
}

fn selection_from(
    feature: Option<String>,
    combo: Option<String>,
    cases: Vec<String>,
) -> Result<Selection> {
    match (feature, combo, cases.is_empty()) {
        (Some(name), None, true) => Ok(Selection::FeaturePack(name)),
        (None, Some(name), true) => Ok(Selection::ComboPack(name)),
        (None, None, false) => Ok(Selection::Cases(
            cases.iter().map(|c| TestCaseId::from(c.as_str())).collect(),
        )),
        (None, None, true) => bail!("nothing selected; pass --feature, --combo or --case"),
        _ => bail!("--feature, --combo and --case are mutually exclusive"),
    }
}

fn filters_from(tags: Vec<String>, min_criticality: Option<String>) -> Result<RunFilters> {
    let min_criticality = match min_criticality {
        Some(raw) => Some(
            Criticality::from_str(&raw)
                .with_context(|| format!("unknown criticality: {raw}"))?,
        ),
        None => None,
    };
    Ok(RunFilters {
        tags,
        min_criticality,
    })
}

fn group_by_from(raw: Option<&str>) -> Result<Option<GroupBy>> {
    match raw {
        Some(raw) => GroupBy::from_str(raw)
            .map(Some)
            .with_context(|| format!("unknown grouping axis: {raw}. Use 'feature' or 'combo'")),
        None => Ok(None),
    }
}

fn open_store(
    memory: bool,
    store_dir: Option<String>,
    env: &EnvConfig,
) -> Result<Arc<dyn ResultStore>> {
    if memory {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = match store_dir.or_else(|| env.store_dir.clone()) {
        Some(dir) => JournalStore::open(dir)?,
        None => JournalStore::open_default()?,
    };
    Ok(Arc::new(store))
}

async fn run_selection(args: cli::RunArgs) -> Result<()> {
    let env = EnvConfig::load();
    let registry = Arc::new(load_registry(&catalog_path(args.catalog, &env)?)?);

    let config = match &args.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    }
    .apply_env(&env);

    // explicit flag wins; RTVS_ENV only fills in the default
    let environment_raw = if args.environment == "noenv" {
        env.environment.clone().unwrap_or(args.environment)
    } else {
        args.environment
    };
    let environment = TargetEnv::from_str(&environment_raw)
        .with_context(|| format!("unknown environment: {environment_raw}"))?;
    let category = RunCategory::from_str(&args.category)
        .with_context(|| format!("unknown category: {}", args.category))?;
    let group_by = group_by_from(args.group_by.as_deref())?;

    let request = RunRequest::new(selection_from(args.feature, args.combo, args.cases)?)
        .with_parallelism(args.parallel.unwrap_or(config.parallelism))
        .with_environment(environment)
        .with_category(category)
        .with_filters(filters_from(args.tag, args.min_criticality)?);

    let store = open_store(args.memory, args.store_dir, &env)?;
    let pool = Arc::new(FixedSessionPool::new(request.parallelism));
    let executor = Arc::new(RandomizedExecutor::new(args.sim_min_ms, args.sim_max_ms));

    let orchestrator = Orchestrator::new(
        registry,
        store.clone(),
        pool,
        executor,
        config,
    );

    let run = orchestrator.run_to_completion(request).await?;
    info!("{} reached {}", run.id, run.status);

    let entries = store.entries(&run.id).await?;
    let summary = report::summarize(&run, &entries, group_by);
    println!("\n{}", report::render_text(&summary));

    if run.status != RunStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}

fn list_catalog(args: cli::ListArgs) -> Result<()> {
    let env = EnvConfig::load();
    let registry = load_registry(&catalog_path(args.catalog, &env)?)?;

    println!("\nTest cases ({} total):", registry.case_count());
    for case in registry.cases() {
        if args.detailed {
            let tags: Vec<&str> = case.feature_tags.iter().map(|t| t.as_str()).collect();
            println!(
                "  {:24} {:8} {:10} tags=[{}] owner={}",
                case.id.to_string(),
                case.criticality.to_string(),
                if case.automation.is_automated() {
                    "automated"
                } else {
                    "manual"
                },
                tags.join(","),
                case.owner.as_deref().unwrap_or("-"),
            );
        } else {
            println!("  {}", case.id);
        }
    }

    if args.packs {
        println!("\nFeature packs:");
        for pack in registry.feature_packs() {
            let floor = pack
                .criticality_floor
                .map(|f| format!(" floor={f}"))
                .unwrap_or_default();
            println!("  {:24} {} cases{}", pack.name, pack.len(), floor);
        }

        println!("\nCombo packs:");
        for pack in registry.combo_packs() {
            let refs: Vec<String> = pack.refs.iter().map(PackRef::to_string).collect();
            println!("  {:24} [{}]", pack.name, refs.join(", "));
        }
    }
    println!();
    Ok(())
}

fn resolve_selection(args: cli::ResolveArgs) -> Result<()> {
    let env = EnvConfig::load();
    let registry = load_registry(&catalog_path(args.catalog, &env)?)?;

    let selection = selection_from(args.feature, args.combo, args.cases)?;
    let filters = filters_from(args.tag, args.min_criticality)?;

    let mut resolver = rtvs_core::ComboResolver::new(&registry);
    let resolved = resolver.resolve_selection(&selection, &filters)?;

    println!("\nDispatch order ({} cases):", resolved.len());
    for (position, id) in resolved.iter().enumerate() {
        let marker = registry
            .case(id)
            .map(|case| {
                if case.automation.is_automated() {
                    ""
                } else {
                    "  (manual, not dispatched)"
                }
            })
            .unwrap_or("");
        println!("  {:3}. {id}{marker}", position + 1);
    }
    println!();
    Ok(())
}

async fn show_report(args: cli::ReportArgs) -> Result<()> {
    let env = EnvConfig::load();
    let store = match args.store_dir.or_else(|| env.store_dir.clone()) {
        Some(dir) => JournalStore::open(dir)?,
        None => JournalStore::open_default()?,
    };

    let run_id = match args.run {
        Some(id) => RunId(id),
        None => {
            let runs = store.runs()?;
            if runs.is_empty() {
                println!("No stored runs found.");
                return Ok(());
            }
            println!("\nStored runs:");
            for run in &runs {
                println!("  {run}");
            }
            println!("\nUse --run <id> to summarize one.\n");
            return Ok(());
        }
    };

    let entries = store.entries(&run_id).await?;
    if entries.is_empty() {
        bail!("no records stored for run {run_id}");
    }

    let group_by = group_by_from(args.group_by.as_deref())?;
    // grouping needs the pack membership, which lives in the catalog
    let membership = match (&args.catalog, group_by) {
        (Some(path), Some(_)) => load_registry(path)?.membership_snapshot(),
        (None, Some(_)) => {
            bail!("--group-by needs --catalog to recover pack membership")
        }
        _ => Default::default(),
    };

    let summary = report::summarize_stored(run_id, &entries, &membership, group_by);

    let rendered = match args.format.as_str() {
        "json" => serde_json::to_string_pretty(&summary)?,
        "csv" => report::results_csv(&entries)?,
        _ => report::render_text(&summary),
    };

    match args.export {
        Some(path) => {
            let path = PathBuf::from(path);
            std::fs::write(&path, &rendered)?;
            println!("Report written to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
