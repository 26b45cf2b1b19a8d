use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use turborecover::config::{JobexOptions, Level, NumForceOptions};
use turborecover::settings::SETTINGS_FILE;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "turborecover - run Turbomole programs with automatic recovery, escalation and rollback.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Turbomole working directory
    #[arg(short, long, global = true, value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,

    /// Recovery attempts before giving up (overrides the configuration)
    #[arg(short, long, global = true, value_name = "N")]
    pub numtries: Option<u32>,

    /// Do not print the output of the Turbomole programs
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Read settings from this file instead of the standard locations
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the SCF program with recovery.
    Ridft(RollbackArg),
    /// Run the gradient program with recovery, re-running the SCF if needed.
    Rdgrad(RollbackArg),
    /// Run a jobex geometry optimization with recovery.
    Jobex(JobexArgs),
    /// Run NumForce with recovery.
    Numforce(NumForceArgs),
    /// Roll the optimization back to a completed step (zero-based).
    Rollback {
        /// Step to return to
        step: usize,
    },
    /// Show the state of the working directory.
    Info {
        /// Also print the latest energy in this unit (hartree, eV, cm^-1, kcal/mol, kJ/mol)
        #[arg(short, long, value_name = "UNIT")]
        unit: Option<String>,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Freeze atoms in coord by line number (line 1 is the first atom).
    Freeze {
        /// Line numbers of the atoms
        #[arg(required = true, num_args = 1..)]
        lines: Vec<usize>,
    },
    /// Unfreeze atoms in coord by line number.
    Unfreeze {
        /// Line numbers of the atoms
        #[arg(required = true, num_args = 1..)]
        lines: Vec<usize>,
    },
    /// Write a commented configuration template.
    InitConfig {
        /// Destination of the template
        #[arg(default_value = SETTINGS_FILE, value_name = "PATH")]
        path: PathBuf,
    },
}

/// Optional rollback before the run.
#[derive(Args, Debug)]
pub struct RollbackArg {
    /// Roll back to this completed step first
    #[arg(long, value_name = "STEP")]
    pub rollback: Option<usize>,
}

/// Arguments for the `jobex` subcommand.
#[derive(Args, Debug)]
pub struct JobexArgs {
    #[command(flatten)]
    pub rollback: RollbackArg,

    /// Energy convergence criterion 10^-N
    #[arg(long, default_value_t = 6, value_name = "N")]
    pub energy: u32,

    /// Cartesian gradient convergence criterion 10^-N
    #[arg(long, default_value_t = 3, value_name = "N")]
    pub gcart: u32,

    /// Maximum number of optimization cycles
    #[arg(short, long = "cycles", default_value_t = 20, value_name = "N")]
    pub cycles: u32,

    /// Level of theory (scf, mp2, cc2, uff)
    #[arg(long, default_value = "scf")]
    pub level: Level,

    /// Use dscf instead of ridft
    #[arg(long)]
    pub dscf: bool,

    /// Use grad instead of rdgrad
    #[arg(long)]
    pub grad: bool,

    /// Use statpt for the geometry update
    #[arg(long, conflicts_with = "relax")]
    pub statpt: bool,

    /// Use relax for the geometry update
    #[arg(long)]
    pub relax: bool,

    /// Transition state search
    #[arg(long)]
    pub trans: bool,

    /// Force RI-J on (detected from control by default)
    #[arg(long, conflicts_with = "no_ri")]
    pub ri: bool,

    /// Force RI-J off
    #[arg(long)]
    pub no_ri: bool,

    /// RI-JK
    #[arg(long)]
    pub rijk: bool,

    /// Excited state optimization
    #[arg(long)]
    pub ex: bool,

    /// Keep the output of every cycle
    #[arg(long)]
    pub keep: bool,
}

impl JobexArgs {
    pub fn options(&self) -> JobexOptions {
        JobexOptions {
            energy: self.energy,
            gcart: self.gcart,
            cycles: self.cycles,
            level: self.level,
            dscf: self.dscf,
            grad: self.grad,
            statpt: self.statpt,
            relax: self.relax,
            trans: self.trans,
            ri: tristate(self.ri, self.no_ri),
            rijk: self.rijk,
            ex: self.ex,
            keep: self.keep,
        }
    }
}

/// Arguments for the `numforce` subcommand.
#[derive(Args, Debug)]
pub struct NumForceArgs {
    #[command(flatten)]
    pub rollback: RollbackArg,

    /// Level of theory (scf, mp2, cc2, uff)
    #[arg(long, default_value = "scf")]
    pub level: Level,

    /// Displacement step in bohr
    #[arg(long = "displacement", alias = "d", value_name = "BOHR")]
    pub displacement: Option<f64>,

    /// Gradient convergence threshold
    #[arg(long, value_name = "THR")]
    pub thrgrd: Option<f64>,

    /// Excited state number
    #[arg(long, value_name = "N")]
    pub ex: Option<u32>,

    /// Size preset passed through as -SIZE
    #[arg(long, value_name = "SIZE")]
    pub size: Option<String>,

    /// Machine file for parallel runs
    #[arg(long, value_name = "PATH")]
    pub mfile: Option<PathBuf>,

    /// Alternative Turbomole installation
    #[arg(long = "turbodir", alias = "l", value_name = "PATH")]
    pub l: Option<PathBuf>,

    /// Alternative script directory
    #[arg(long = "scriptdir", alias = "ls", value_name = "PATH")]
    pub ls: Option<PathBuf>,

    /// Scratch directory
    #[arg(long, value_name = "PATH")]
    pub scrpath: Option<PathBuf>,

    /// Force RI-J on (detected from control by default)
    #[arg(long, conflicts_with = "no_ri")]
    pub ri: bool,

    /// Force RI-J off
    #[arg(long)]
    pub no_ri: bool,

    /// RI-JK
    #[arg(long)]
    pub rijk: bool,

    /// Central differences
    #[arg(long, conflicts_with = "polyedr")]
    pub central: bool,

    /// Polyhedral displacement scheme
    #[arg(long)]
    pub polyedr: bool,

    /// Economic mode
    #[arg(long)]
    pub ecnomic: bool,

    /// Diatomic molecule
    #[arg(long)]
    pub diatmic: bool,

    /// Only prepare the displaced inputs
    #[arg(long = "prepare-only", conflicts_with = "c")]
    pub i: bool,

    /// Only collect finished displacements
    #[arg(long = "collect-only")]
    pub c: bool,

    /// Prepare the run
    #[arg(long)]
    pub prep: bool,

    /// Skip the NumForce safety checks
    #[arg(long = "override")]
    pub override_checks: bool,

    /// Honour frozen atoms (detected from coord by default)
    #[arg(long, conflicts_with = "no_frznuclei")]
    pub frznuclei: bool,

    /// Ignore frozen atoms
    #[arg(long)]
    pub no_frznuclei: bool,

    /// COSMO solvation
    #[arg(long)]
    pub cosmo: bool,
}

impl NumForceArgs {
    pub fn options(&self) -> NumForceOptions {
        NumForceOptions {
            level: self.level,
            displacement: self.displacement,
            thrgrd: self.thrgrd,
            ex: self.ex,
            size: self.size.clone(),
            mfile: self.mfile.clone(),
            l: self.l.clone(),
            ls: self.ls.clone(),
            scrpath: self.scrpath.clone(),
            ri: tristate(self.ri, self.no_ri),
            rijk: self.rijk,
            central: self.central,
            polyedr: self.polyedr,
            ecnomic: self.ecnomic,
            diatmic: self.diatmic,
            i: self.i,
            c: self.c,
            prep: self.prep,
            override_checks: self.override_checks,
            frznuclei: tristate(self.frznuclei, self.no_frznuclei),
            cosmo: self.cosmo,
        }
    }
}

/// `--flag` / `--no-flag` pair; neither means "detect".
fn tristate(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}
