use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tf_engine::{run_simulation, EngineConfig, SimulationConfig};
use tf_model::{TicketId, TicketSpec};
use tf_quality::QualityEngine;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("ticketflow")
        .version(tf_engine::VERSION)
        .about("Resumable ticket generation workflow engine")
        .arg(
            Arg::new("config-file")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Engine configuration file (TOML)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Run a seeded bulk batch against scripted reasoning")
                .arg(
                    Arg::new("tickets")
                        .long("tickets")
                        .default_value("10")
                        .value_parser(value_parser!(usize))
                        .help("Number of tickets in the batch"),
                )
                .arg(
                    Arg::new("workers")
                        .long("workers")
                        .value_parser(value_parser!(usize))
                        .help("Worker pool size (defaults to the configured bulk_workers)"),
                )
                .arg(
                    Arg::new("fail")
                        .long("fail")
                        .value_delimiter(',')
                        .action(ArgAction::Append)
                        .help("Ticket ids whose analysis fails, e.g. SIM-3,SIM-7"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("question-rate")
                        .long("question-rate")
                        .default_value("0.6")
                        .value_parser(value_parser!(f64))
                        .help("Share of tickets that ask a question round"),
                )
                .arg(
                    Arg::new("answer-rate")
                        .long("answer-rate")
                        .default_value("0.5")
                        .value_parser(value_parser!(f64))
                        .help("Share of question rounds answered instead of skipped"),
                ),
        )
        .subcommand(
            Command::new("score")
                .about("Score a specification JSON file against the quality gate")
                .arg(
                    Arg::new("spec")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to a ticket specification (JSON)"),
                ),
        )
        .subcommand(Command::new("config").about("Print the effective configuration as TOML"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<EngineConfig> {
    match matches.get_one::<PathBuf>("config-file") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

async fn simulate(config: &EngineConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let simulation = SimulationConfig {
        seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
        tickets: args.get_one::<usize>("tickets").copied().unwrap_or(10),
        workers: args
            .get_one::<usize>("workers")
            .copied()
            .unwrap_or(config.bulk_workers),
        failing: args
            .get_many::<String>("fail")
            .into_iter()
            .flatten()
            .map(|s| TicketId::new(s.trim()))
            .collect(),
        question_rate: args.get_one::<f64>("question-rate").copied().unwrap_or(0.6),
        answer_rate: args.get_one::<f64>("answer-rate").copied().unwrap_or(0.5),
        ..SimulationConfig::default()
    };

    println!("Running Ticketflow Simulator...");
    println!("Tickets: {}", simulation.tickets);
    println!("Workers: {}", simulation.workers);
    println!("Seed: {}", simulation.seed);
    println!();

    let report = run_simulation(simulation).await?;
    println!("{}", report.generate_text());
    Ok(report.passed())
}

fn score(config: &EngineConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let path = args
        .get_one::<PathBuf>("spec")
        .context("missing specification path")?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let spec: TicketSpec = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;

    let engine = QualityEngine::new(config.quality.clone())?;
    let report = engine.score(&spec);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.gate.allows_creation())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));
    let config = load_config(&matches)?;

    let ok = match matches.subcommand() {
        Some(("simulate", args)) => simulate(&config, args).await?,
        Some(("score", args)) => score(&config, args)?,
        Some(("config", _)) => {
            print!("{}", config.to_toml_string()?);
            true
        }
        _ => true,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn parses_failure_list() {
        let matches = cli()
            .try_get_matches_from(["ticketflow", "simulate", "--fail", "SIM-1,SIM-4", "--tickets", "5"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let failing: Vec<&String> = args.get_many::<String>("fail").unwrap().collect();
        assert_eq!(failing, ["SIM-1", "SIM-4"]);
        assert_eq!(args.get_one::<usize>("tickets"), Some(&5));
    }
}
