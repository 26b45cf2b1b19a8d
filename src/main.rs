//! turborecover command-line interface
//!
//! Runs one Turbomole program (or one maintenance command) on a working
//! directory and exits with status 1 on any failure.
//!
//! # Examples
//!
//! ```bash
//! # SCF with recovery
//! turborecover ridft
//!
//! # Optimization resumed from step 12, tighter convergence
//! turborecover jobex --rollback 12 --energy 7 --gcart 4 -c 100
//!
//! # Numerical frequencies in another directory
//! turborecover --dir /scratch/job numforce --central
//!
//! # Freeze the first three atoms
//! turborecover freeze 1 2 3
//!
//! # Energy of the last step in kcal/mol
//! turborecover info --unit kcal/mol
//! ```
//!
//! # Logging
//!
//! Diagnostics go through `env_logger`. The level comes from the `[logging]`
//! section of the settings and can be overridden with `RUST_LOG`.

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use log::info;
use std::error::Error;
use std::path::Path;
use std::process;
use turborecover::freeze;
use turborecover::orchestrator::{Orchestrator, RunReport};
use turborecover::runner::ShellRunner;
use turborecover::settings::{Settings, SettingsManager};
use turborecover::workspace::Workspace;

fn main() {
    let cli = Cli::parse();

    let manager = match &cli.config {
        Some(path) => SettingsManager::load_file(path),
        None => SettingsManager::load(),
    };
    let manager = match manager {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    env_logger::Builder::new()
        .filter_level(manager.logging().level_filter())
        .parse_default_env()
        .target(env_logger::Target::Stdout)
        .format_timestamp_millis()
        .init();
    info!("Configuration loaded from: {}", manager.config_source());

    if let Err(e) = run(cli, manager.settings().clone()) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli, mut settings: Settings) -> Result<(), Box<dyn Error>> {
    if let Some(numtries) = cli.numtries {
        settings.retry.numtries = numtries;
    }
    if cli.quiet {
        settings.general.echo_output = false;
    }

    match cli.command {
        Command::InitConfig { path } => {
            if path.exists() {
                return Err(format!("{} already exists", path.display()).into());
            }
            SettingsManager::create_template(&path)?;
            println!("Configuration template written to {}", path.display());
        }
        Command::Info { unit, json } => {
            let workspace = Workspace::open(&cli.dir)?;
            print_info(&workspace, unit.as_deref(), json)?;
        }
        Command::Freeze { lines } => {
            let workspace = Workspace::open(&cli.dir)?;
            let changed = freeze::freeze_atoms(workspace.coord_path(), &lines)?;
            println!("{} atoms frozen", changed);
        }
        Command::Unfreeze { lines } => {
            let workspace = Workspace::open(&cli.dir)?;
            let changed = freeze::unfreeze_atoms(workspace.coord_path(), &lines)?;
            println!("{} atoms unfrozen", changed);
        }
        Command::Rollback { step } => {
            orchestrator(&cli.dir, &settings)?.rollback(step)?;
        }
        Command::Ridft(args) => {
            let report = orchestrator(&cli.dir, &settings)?.ridft(args.rollback)?;
            print_report(&report);
        }
        Command::Rdgrad(args) => {
            let report = orchestrator(&cli.dir, &settings)?.rdgrad(args.rollback)?;
            print_report(&report);
        }
        Command::Jobex(args) => {
            let report =
                orchestrator(&cli.dir, &settings)?.jobex(&args.options(), args.rollback.rollback)?;
            print_report(&report);
        }
        Command::Numforce(args) => {
            let report = orchestrator(&cli.dir, &settings)?
                .numforce(&args.options(), args.rollback.rollback)?;
            print_report(&report);
        }
    }
    Ok(())
}

fn orchestrator(dir: &Path, settings: &Settings) -> Result<Orchestrator, Box<dyn Error>> {
    let workspace = Workspace::open(dir)?;
    Ok(Orchestrator::from_settings(
        workspace,
        ShellRunner::default(),
        settings,
    ))
}

fn print_report(report: &RunReport) {
    info!(
        "{}: {} runs, {} recoveries, {} escalations",
        report.command, report.attempts, report.recoveries, report.escalations
    );
}

fn print_info(workspace: &Workspace, unit: Option<&str>, json: bool) -> Result<(), Box<dyn Error>> {
    let summary = workspace.summary()?;
    let converted = match unit {
        Some(unit) => Some((workspace.latest_energy(unit)?, unit)),
        None => None,
    };

    if json {
        let mut value = serde_json::to_value(&summary)?;
        if let Some((energy, unit)) = converted {
            value["latest_energy_converted"] = serde_json::json!({ "value": energy, "unit": unit });
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Workspace:            {}", summary.directory.display());
    match summary.steps {
        Some(steps) => println!("Optimization steps:   {}", steps),
        None => println!("Optimization steps:   (no energy file)"),
    }
    if let Some(energy) = summary.latest_energy {
        println!("Latest energy:        {:.10} hartree", energy);
    }
    if let Some((energy, unit)) = converted {
        println!("                      {:.6} {}", energy, unit);
    }
    println!("RI-J:                 {}", yes_no(summary.resolution_of_identity));
    println!("Internal coordinates: {}", yes_no(summary.internal_coordinates));
    println!("Optimization mode:    {:?}", summary.mode);
    println!("Frozen atoms:         {}", yes_no(summary.frozen_atoms));
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
