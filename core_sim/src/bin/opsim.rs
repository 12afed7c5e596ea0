use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use core_sim::reports::{ReportFormatter, TextFormatter};
use core_sim::{
    load_balance_config_from_env, load_simulation_config_from_env, BalanceConfig, SimDuration,
    SimWorld, SimulationConfig, TaskId, UnitId, WorldError,
};
use sim_runtime::{parse_command_line, parse_duration, DriverCommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Operational pulse simulator", long_about = None)]
struct Args {
    /// Scenario name under the scenario root
    scenario: Option<String>,

    /// Folder holding one sub-folder per scenario
    #[arg(long, default_value = "scenarios")]
    scenario_root: PathBuf,

    /// Resume from a save folder instead of loading a scenario
    #[arg(long, conflicts_with = "scenario")]
    resume: Option<PathBuf>,

    /// Time to simulate before exiting or prompting, e.g. `2h` or `1h30m`
    #[arg(long)]
    simulate: Option<String>,

    /// Save folder written on `save` and at exit
    #[arg(long)]
    save: Option<PathBuf>,

    /// Read driver commands from stdin
    #[arg(long)]
    interactive: bool,

    /// Simulation config file (overrides SIM_CONFIG_PATH)
    #[arg(long)]
    sim_config: Option<PathBuf>,

    /// Balance config file (overrides BALANCE_CONFIG_PATH)
    #[arg(long)]
    balance_config: Option<PathBuf>,
}

fn configs(args: &Args) -> Result<(Arc<SimulationConfig>, Arc<BalanceConfig>), WorldError> {
    let sim = match &args.sim_config {
        Some(path) => Arc::new(SimulationConfig::from_file(path)?),
        None => load_simulation_config_from_env().0,
    };
    let balance = match &args.balance_config {
        Some(path) => Arc::new(BalanceConfig::from_file(path)?),
        None => load_balance_config_from_env().0,
    };
    Ok((sim, balance))
}

fn boot(args: &Args) -> Result<SimWorld, WorldError> {
    let (sim, balance) = configs(args)?;
    match (&args.resume, &args.scenario) {
        (Some(dir), _) => SimWorld::resume(dir, sim, balance),
        (None, Some(name)) => SimWorld::open(&args.scenario_root, name, sim, balance),
        (None, None) => Err(WorldError::ScenarioNotFound(args.scenario_root.clone())),
    }
}

fn status(world: &SimWorld) {
    let metrics = world.metrics();
    println!(
        "{} {} pulse {}: {} units, {} engagements, {} direct contacts, {:.1} t supply",
        world.name(),
        world.now(),
        metrics.pulse,
        metrics.units,
        metrics.active_engagements,
        metrics.direct_contacts,
        metrics.total_supply
    );
}

/// Returns false when the loop should stop.
fn run_command(world: &mut SimWorld, command: DriverCommand, save_dir: Option<&PathBuf>) -> Result<bool> {
    match command {
        DriverCommand::Simulate { seconds } => {
            let pulses = world.simulate(SimDuration::from_seconds(seconds));
            info!(target: "opsim::driver", pulses, now = %world.now(), "command.simulate");
        }
        DriverCommand::Save { name } => {
            let dir = match (name, save_dir) {
                (Some(name), _) => PathBuf::from(name),
                (None, Some(dir)) => dir.clone(),
                (None, None) => PathBuf::from("saves").join(world.name()),
            };
            let written = world.save(&dir)?;
            println!("saved {}", written.display());
        }
        DriverCommand::Status => status(world),
        DriverCommand::Cancel { unit, task } => {
            world.cancel_task(UnitId(unit), TaskId(task))?;
        }
        DriverCommand::Codeword { side, word } => {
            let queued = world.codeword(&side, &word);
            println!("codeword {word} sent to {queued} units");
        }
        DriverCommand::Report { unit, kind } => {
            let report = world.report(UnitId(unit), kind)?;
            let text = TextFormatter::default().format(&report.body)?;
            io::stdout().write_all(&text)?;
        }
        DriverCommand::Quit => return Ok(false),
    }
    Ok(true)
}

fn interactive(world: &mut SimWorld, save_dir: Option<&PathBuf>) -> Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading command")?;
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command_line(&line) {
            Ok(command) => command,
            Err(err) => {
                warn!(target: "opsim::driver", input = %line, error = %err, "command.invalid");
                continue;
            }
        };
        let verb = command.verb();
        match run_command(world, command, save_dir) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => warn!(target: "opsim::driver", verb, error = %err, "command.failed"),
        }
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let mut world = boot(args)?;
    info!(target: "opsim::driver", world = world.name(), now = %world.now(), "world.ready");

    if let Some(text) = &args.simulate {
        let seconds = parse_duration(text).with_context(|| format!("bad duration '{text}'"))?;
        world.simulate(SimDuration::from_seconds(seconds));
        status(&world);
    }
    if args.interactive {
        interactive(&mut world, args.save.as_ref())?;
    }
    if let Some(dir) = &args.save {
        world
            .save(dir)
            .with_context(|| format!("saving to {}", dir.display()))?;
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<WorldError>()
                .map(WorldError::exit_code)
                .unwrap_or(1);
            eprintln!("opsim: {err:#}");
            ExitCode::from(code as u8)
        }
    }
}
