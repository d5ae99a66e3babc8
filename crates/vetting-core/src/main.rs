use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use vetting_core::test_harness::{run_simulator, SimulatorConfig, TestHarness};
use vetting_core::{init_tracing, FileStore, StateStore, VettingConfig};
use vetting_workflow::{SystemClock, WorkflowEngine};

fn cli() -> Command {
    Command::new("vetting-sim")
        .version(vetting_core::VERSION)
        .about("Paper vetting service tools")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML config file"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Run the vetting simulator")
                .arg(
                    Arg::new("operations")
                        .long("ops")
                        .default_value("10000")
                        .value_parser(value_parser!(u64))
                        .help("Number of operations to simulate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("reviewers")
                        .long("reviewers")
                        .default_value("4")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                ),
        )
        .subcommand(
            Command::new("certify")
                .about("Run the simulator over many seeds")
                .arg(
                    Arg::new("seeds")
                        .long("seeds")
                        .default_value("10")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("operations")
                        .long("ops")
                        .default_value("10000")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("validate-state")
                .about("Verify the timeline chain of a saved state directory")
                .arg(
                    Arg::new("dir")
                        .long("dir")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the restored snapshot as JSON"),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<VettingConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => VettingConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(VettingConfig::default().with_env_overrides()?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    init_tracing(&config.log);

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let operations = args.get_one::<u64>("operations").copied().unwrap_or(10_000);
            let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);
            let reviewers = args.get_one::<usize>("reviewers").copied().unwrap_or(4);

            println!("Running vetting simulator...");
            println!("Operations: {operations}");
            println!("Seed: {seed}");
            println!();

            let report = run_simulator(SimulatorConfig {
                seed,
                total_operations: operations,
                reviewers,
                session_minutes: config.default_session_minutes,
                stop_on_first_violation: args.get_flag("stop-on-violation"),
                ..Default::default()
            })
            .await;
            println!("{}", report.generate_text());
            if !report.passed() {
                bail!("{} violation(s)", report.violations.len());
            }
        }
        Some(("certify", args)) => {
            let seeds = args.get_one::<u64>("seeds").copied().unwrap_or(10);
            let operations = args.get_one::<u64>("operations").copied().unwrap_or(10_000);
            let report = TestHarness::run_certification(seeds, operations).await;
            println!("Certification Report:");
            println!("  Seeds: {}", report.seeds_tested);
            println!("  Violations: {}", report.total_violations);
            println!("  Failing seeds: {:?}", report.failing_seeds);
            if !report.passed {
                bail!("certification failed");
            }
        }
        Some(("validate-state", args)) => {
            let Some(dir) = args.get_one::<PathBuf>("dir") else {
                bail!("--dir is required");
            };
            let persisted = FileStore::new(dir).load().await?;
            let Some(snapshot) = persisted.workflow else {
                bail!("no workflow state in {}", dir.display());
            };
            let engine = WorkflowEngine::restore(snapshot, Arc::new(SystemClock))
                .context("timeline chain does not verify")?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&engine.snapshot())?);
            } else {
                println!("Timeline: VALID");
                println!("Events checked: {}", engine.state().timeline().len());
                println!("Head digest: {}", engine.state().timeline().head_digest());
                println!("Stage: {}", engine.stage());
                println!("Effective stage: {}", engine.effective_stage());
                println!("Revision: {}", engine.state().current_revision());
                if let Some(session) = persisted.session {
                    println!("Sessions archived: {}", session.archive.len());
                }
            }
        }
        _ => {}
    }
    Ok(())
}
