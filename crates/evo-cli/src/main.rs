//! `evo` - run and inspect evolutionary variant searches

use anyhow::{anyhow, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use evo_archive::{read_journal, verify_journal, VariantStore};
use evo_core::{simulated_adapters, ImprovementSummary, RunConfig, Scheduler, SimulationConfig};
use evo_selection::PolicyRegistry;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn cli() -> Command {
    Command::new("evo")
        .version(evo_core::VERSION)
        .about("Evolutionary search over coding-agent variants")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the scheduler against simulated adapters")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML run configuration"),
                )
                .arg(
                    Arg::new("journal")
                        .long("journal")
                        .value_parser(value_parser!(PathBuf))
                        .help("Journal file; an existing journal is resumed"),
                )
                .arg(
                    Arg::new("generations")
                        .long("generations")
                        .value_parser(value_parser!(u32))
                        .help("Number of generations"),
                )
                .arg(
                    Arg::new("attempts")
                        .long("attempts")
                        .value_parser(value_parser!(usize))
                        .help("Attempts per generation (K)"),
                )
                .arg(
                    Arg::new("workers")
                        .long("workers")
                        .value_parser(value_parser!(usize))
                        .help("Concurrent attempts (W)"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_parser(value_parser!(u64))
                        .help("Selection seed"),
                )
                .arg(
                    Arg::new("selection")
                        .long("selection")
                        .help("Named selection strategy (see `evo policies`)"),
                )
                .arg(
                    Arg::new("sim-seed")
                        .long("sim-seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Seed for the simulated patch author"),
                )
                .arg(
                    Arg::new("eval-latency-ms")
                        .long("eval-latency-ms")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Simulated time per evaluation run"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the run report as JSON"),
                ),
        )
        .subcommand(
            Command::new("summarize")
                .about("Summarize improvements recorded in a journal")
                .arg(journal_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Check a journal's hash chain and lineage")
                .arg(journal_arg()),
        )
        .subcommand(Command::new("policies").about("List selection strategies"))
}

fn journal_arg() -> Arg {
    Arg::new("journal")
        .long("journal")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Journal file")
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn required<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .ok_or_else(|| anyhow!("missing --{name}"))
}

fn run_config(args: &ArgMatches) -> Result<RunConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => RunConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(n) = args.get_one::<u32>("generations") {
        config.generations = *n;
    }
    if let Some(k) = args.get_one::<usize>("attempts") {
        config.attempts_per_generation = *k;
    }
    if let Some(w) = args.get_one::<usize>("workers") {
        config.workers = *w;
    }
    if let Some(seed) = args.get_one::<u64>("seed") {
        config.seed = *seed;
    }
    if let Some(name) = args.get_one::<String>("selection") {
        config.selection = PolicyRegistry::with_defaults().get(name)?;
    }
    config.validate()?;
    Ok(config)
}

async fn simulate(args: &ArgMatches) -> Result<ExitCode> {
    let config = run_config(args)?;
    let simulation = SimulationConfig::default()
        .with_seed(required(args, "sim-seed")?)
        .with_eval_latency(Duration::from_millis(required(args, "eval-latency-ms")?));

    let store = match args.get_one::<PathBuf>("journal") {
        Some(path) => VariantStore::open(path).with_context(|| format!("opening {}", path.display()))?,
        None => VariantStore::in_memory(),
    };
    let store = Arc::new(store);

    let (adapters, _sandbox) = simulated_adapters(&simulation)?;
    let mut scheduler = Scheduler::new(config, Arc::clone(&store), adapters)?;

    let stop = scheduler.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing the current generation");
            stop.stop();
        }
    });

    let report = scheduler.run().await?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for generation in &report.generations {
            println!(
                "gen {:>3}: {} best={}",
                generation.generation,
                generation.counts,
                generation
                    .best_score
                    .map_or_else(|| "-".to_string(), |s| format!("{s:.4}"))
            );
        }
        println!("totals: {}", report.totals());
        print!("{}", ImprovementSummary::from_variants(&store.all()).render_text());
        if report.stopped_by_signal {
            println!("stopped early on request");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn summarize(args: &ArgMatches) -> Result<ExitCode> {
    let path: PathBuf = required(args, "journal")?;
    let variants = read_journal(&path).with_context(|| format!("reading {}", path.display()))?;
    let summary = ImprovementSummary::from_variants(&variants);
    if args.get_flag("json") {
        println!("{}", summary.to_json()?);
    } else {
        print!("{}", summary.render_text());
    }
    Ok(ExitCode::SUCCESS)
}

fn verify(args: &ArgMatches) -> Result<ExitCode> {
    let path: PathBuf = required(args, "journal")?;
    match verify_journal(&path) {
        Ok(check) => {
            println!("{}: {} entries, chain intact", path.display(), check.entries);
            if check.torn_tail {
                println!("{}: unterminated final line ignored", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) if err.is_corruption() => {
            println!("{}: {err}", path.display());
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}

fn policies() -> ExitCode {
    let registry = PolicyRegistry::with_defaults();
    for name in registry.names() {
        println!("{name}");
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    let result = match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await,
        Some(("summarize", args)) => summarize(args),
        Some(("verify", args)) => verify(args),
        Some(("policies", _)) => Ok(policies()),
        _ => Ok(ExitCode::FAILURE),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "command failed");
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let matches = cli()
            .try_get_matches_from([
                "evo",
                "simulate",
                "--generations",
                "3",
                "--workers",
                "5",
                "--selection",
                "random",
            ])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let config = run_config(args).unwrap();
        assert_eq!(config.generations, 3);
        assert_eq!(config.workers, 5);
        assert_eq!(config.selection.name(), "random");
    }

    #[test]
    fn bundled_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../configs/evo.toml");
        let matches = cli()
            .try_get_matches_from(["evo", "simulate", "--config", path, "--seed", "9"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let config = run_config(args).unwrap();
        assert_eq!(config.attempts_per_generation, 6);
        assert_eq!(config.evaluation.deep_runs, 3);
        assert_eq!(config.seed, 9);
    }

    #[test]
    fn unknown_strategy_is_an_error() {
        let matches = cli()
            .try_get_matches_from(["evo", "simulate", "--selection", "tournament"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert!(run_config(args).is_err());
    }
}
