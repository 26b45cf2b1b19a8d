//! Command families and their option structures.
//!
//! This module defines what the orchestrator can run:
//!
//! - [`CommandFamily`]: the four Turbomole programs that are retried, with
//!   their abnormal-termination markers and escalation chains
//! - [`Commands`]: the executables to call for each family and the recovery
//!   command
//! - [`JobexOptions`] / [`NumForceOptions`]: every option the wrappers
//!   recognize, validated when the structure is built and rendered to an
//!   argument list afterwards
//! - [`Level`]: the `-level` value passed to `jobex` and `NumForce`

use crate::runner::CommandLine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Default bound on recovery iterations per invocation.
pub const DEFAULT_NUMTRIES: u32 = 2;

/// Marker printed by `jobex` and `NumForce` when a sub-program died.
pub const PROGRAM_STOPPED_MARKER: &str = "program stopped";

/// Output of `NumForce` when the ground state gradient is absent.
pub const MISSING_GRADIENT_MARKER: &str = "Can not find data group $grad";

/// Error raised for inconsistent command options.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptionsError {
    /// A numeric option is outside its valid range
    #[error("Invalid value for -{option}: {reason}")]
    InvalidValue {
        /// Option name without the leading dash
        option: &'static str,
        /// Why the value is rejected
        reason: String,
    },
    /// Two options cannot be combined
    #[error("Options -{0} and -{1} cannot be combined")]
    Conflict(&'static str, &'static str),
    /// Unknown `-level` value
    #[error("Unknown level: {0}")]
    UnknownLevel(String),
}

/// Type alias for option validation results
pub type Result<T> = std::result::Result<T, OptionsError>;

/// The external programs that run under retry supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandFamily {
    /// SCF energy (`ridft`)
    Scf,
    /// Analytic gradient (`rdgrad`)
    Gradient,
    /// Geometry optimization driver (`jobex`)
    Optimization,
    /// Numerical force driver (`NumForce`)
    NumForce,
}

impl CommandFamily {
    /// Abnormal-termination marker for this family.
    ///
    /// `ridft` and `rdgrad` announce `<program> ended abnormally`, so the
    /// marker follows the configured program name. The drivers report a
    /// failing sub-program with `program stopped`.
    pub fn abnormal_marker(self, command: &CommandLine) -> String {
        match self {
            CommandFamily::Scf | CommandFamily::Gradient => {
                format!("{} ended abnormally", command.program_name())
            }
            CommandFamily::Optimization | CommandFamily::NumForce => {
                PROGRAM_STOPPED_MARKER.to_string()
            }
        }
    }

    /// Families re-run, in order, when recovery alone did not clear the marker.
    pub fn escalation(self) -> &'static [CommandFamily] {
        match self {
            CommandFamily::Scf => &[],
            CommandFamily::Gradient => &[CommandFamily::Scf],
            CommandFamily::Optimization => &[CommandFamily::Scf],
            CommandFamily::NumForce => &[CommandFamily::Scf, CommandFamily::Gradient],
        }
    }
}

impl fmt::Display for CommandFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandFamily::Scf => "ridft",
            CommandFamily::Gradient => "rdgrad",
            CommandFamily::Optimization => "jobex",
            CommandFamily::NumForce => "NumForce",
        };
        write!(f, "{}", name)
    }
}

/// Executables used by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commands {
    /// SCF program (default: "ridft")
    pub ridft: String,
    /// Gradient program (default: "rdgrad")
    pub rdgrad: String,
    /// Optimization driver (default: "jobex")
    pub jobex: String,
    /// Numerical force driver (default: "NumForce")
    pub numforce: String,
    /// Snapshot restore command run before each retry (default: "actual -r")
    pub recovery: String,
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            ridft: "ridft".to_string(),
            rdgrad: "rdgrad".to_string(),
            jobex: "jobex".to_string(),
            numforce: "NumForce".to_string(),
            recovery: "actual -r".to_string(),
        }
    }
}

impl Commands {
    /// Plain command line of a family that takes no options.
    pub fn base(&self, family: CommandFamily) -> CommandLine {
        let text = match family {
            CommandFamily::Scf => &self.ridft,
            CommandFamily::Gradient => &self.rdgrad,
            CommandFamily::Optimization => &self.jobex,
            CommandFamily::NumForce => &self.numforce,
        };
        CommandLine::parse(text)
    }

    /// The recovery command line.
    pub fn recovery(&self) -> CommandLine {
        CommandLine::parse(&self.recovery)
    }
}

/// Electronic structure level passed as `-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Level {
    /// Hartree-Fock or DFT
    #[default]
    Scf,
    /// Second-order Moller-Plesset
    Mp2,
    /// Approximate coupled cluster CC2
    Cc2,
    /// Universal force field
    Uff,
}

impl FromStr for Level {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "scf" => Ok(Level::Scf),
            "mp2" => Ok(Level::Mp2),
            "cc2" => Ok(Level::Cc2),
            "uff" => Ok(Level::Uff),
            _ => Err(OptionsError::UnknownLevel(s.to_string())),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Scf => "scf",
            Level::Mp2 => "mp2",
            Level::Cc2 => "cc2",
            Level::Uff => "uff",
        };
        write!(f, "{}", name)
    }
}

/// Options of the `jobex` optimization driver.
///
/// `ri: None` means "detect from `control`" and is resolved by the
/// orchestrator before the command line is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobexOptions {
    /// Energy convergence exponent `-energy` (default: 6)
    pub energy: u32,
    /// Gradient convergence exponent `-gcart` (default: 3)
    pub gcart: u32,
    /// Maximum number of cycles `-c` (default: 20)
    pub cycles: u32,
    /// `-level`
    pub level: Level,
    /// Use `dscf` instead of `ridft`
    pub dscf: bool,
    /// Use `grad` instead of `rdgrad`
    pub grad: bool,
    /// Run `statpt` for the geometry step
    pub statpt: bool,
    /// Run `relax` for the geometry step
    pub relax: bool,
    /// Transition state search
    pub trans: bool,
    /// RI-J; `None` detects `$rij` in control
    pub ri: Option<bool>,
    /// RI-JK
    pub rijk: bool,
    /// Excited state optimization
    pub ex: bool,
    /// Keep the output of every cycle
    pub keep: bool,
}

impl Default for JobexOptions {
    fn default() -> Self {
        Self {
            energy: 6,
            gcart: 3,
            cycles: 20,
            level: Level::Scf,
            dscf: false,
            grad: false,
            statpt: false,
            relax: false,
            trans: false,
            ri: None,
            rijk: false,
            ex: false,
            keep: false,
        }
    }
}

impl JobexOptions {
    /// Checks ranges and combinations.
    pub fn validate(&self) -> Result<()> {
        if self.energy == 0 {
            return Err(OptionsError::InvalidValue {
                option: "energy",
                reason: "convergence exponent must be positive".into(),
            });
        }
        if self.gcart == 0 {
            return Err(OptionsError::InvalidValue {
                option: "gcart",
                reason: "convergence exponent must be positive".into(),
            });
        }
        if self.cycles == 0 {
            return Err(OptionsError::InvalidValue {
                option: "c",
                reason: "at least one cycle is required".into(),
            });
        }
        if self.statpt && self.relax {
            return Err(OptionsError::Conflict("statpt", "relax"));
        }
        if self.dscf && self.ri == Some(true) {
            return Err(OptionsError::Conflict("dscf", "ri"));
        }
        Ok(())
    }

    /// Validated options.
    pub fn build(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Appends the options to `base`, using `ri` for the resolved RI flag.
    pub fn command_line(&self, base: CommandLine, ri: bool) -> CommandLine {
        let mut cmd = base
            .args(["-energy".to_string(), self.energy.to_string()])
            .args(["-gcart".to_string(), self.gcart.to_string()])
            .args(["-c".to_string(), self.cycles.to_string()])
            .args(["-level".to_string(), self.level.to_string()]);

        let flags = [
            (self.dscf, "-dscf"),
            (self.grad, "-grad"),
            (self.statpt, "-statpt"),
            (self.relax, "-relax"),
            (self.trans, "-trans"),
            (ri, "-ri"),
            (self.rijk, "-rijk"),
            (self.ex, "-ex"),
            (self.keep, "-keep"),
        ];
        for (enabled, flag) in flags {
            if enabled {
                cmd = cmd.arg(flag);
            }
        }
        cmd
    }
}

/// Options of the `NumForce` driver.
///
/// `ri` and `frznuclei` set to `None` are detected from `control` and
/// `coord` by the orchestrator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NumForceOptions {
    /// `-level` (default: scf)
    pub level: Level,
    /// Displacement step `-d` in bohr
    pub displacement: Option<f64>,
    /// Gradient threshold `-thrgrd`
    pub thrgrd: Option<f64>,
    /// Excited state number `-ex`
    pub ex: Option<u32>,
    /// Size preset, written as `-<size>`
    pub size: Option<String>,
    /// Machine file for parallel runs `-mfile`
    pub mfile: Option<PathBuf>,
    /// Alternative Turbomole installation `-l`
    pub l: Option<PathBuf>,
    /// Alternative script directory `-ls`
    pub ls: Option<PathBuf>,
    /// Scratch directory `-scrpath`
    pub scrpath: Option<PathBuf>,
    /// RI-J; `None` detects `$rij` in control
    pub ri: Option<bool>,
    /// RI-JK
    pub rijk: bool,
    /// Central differences
    pub central: bool,
    /// Polyhedral displacement scheme
    pub polyedr: bool,
    /// Economic mode
    pub ecnomic: bool,
    /// Diatomic molecule
    pub diatmic: bool,
    /// Only prepare displaced inputs (`-i`)
    pub i: bool,
    /// Only collect results (`-c`)
    pub c: bool,
    /// Prepare the run (`-prep`)
    pub prep: bool,
    /// Override safety checks
    pub override_checks: bool,
    /// Honour frozen atoms; `None` detects frozen atoms in coord
    pub frznuclei: Option<bool>,
    /// COSMO solvation
    pub cosmo: bool,
}

impl NumForceOptions {
    /// Checks ranges and combinations.
    pub fn validate(&self) -> Result<()> {
        if let Some(d) = self.displacement {
            if !(d.is_finite() && d > 0.0) {
                return Err(OptionsError::InvalidValue {
                    option: "d",
                    reason: format!("displacement must be positive, got {}", d),
                });
            }
        }
        if let Some(t) = self.thrgrd {
            if !(t.is_finite() && t > 0.0) {
                return Err(OptionsError::InvalidValue {
                    option: "thrgrd",
                    reason: format!("threshold must be positive, got {}", t),
                });
            }
        }
        if let Some(size) = &self.size {
            if size.is_empty() || !size.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(OptionsError::InvalidValue {
                    option: "size",
                    reason: format!("'{}' is not a single option word", size),
                });
            }
        }
        if self.central && self.polyedr {
            return Err(OptionsError::Conflict("central", "polyedr"));
        }
        if self.i && self.c {
            return Err(OptionsError::Conflict("i", "c"));
        }
        Ok(())
    }

    /// Validated options.
    pub fn build(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Appends the options to `base` with resolved `ri` and `frznuclei` flags.
    pub fn command_line(&self, base: CommandLine, ri: bool, frznuclei: bool) -> CommandLine {
        let mut cmd = base.args(["-level".to_string(), self.level.to_string()]);

        if let Some(d) = self.displacement {
            cmd = cmd.args(["-d".to_string(), d.to_string()]);
        }
        if let Some(t) = self.thrgrd {
            cmd = cmd.args(["-thrgrd".to_string(), t.to_string()]);
        }
        if let Some(ex) = self.ex {
            cmd = cmd.args(["-ex".to_string(), ex.to_string()]);
        }
        if let Some(size) = &self.size {
            cmd = cmd.arg(format!("-{}", size));
        }
        let paths = [
            ("-mfile", &self.mfile),
            ("-l", &self.l),
            ("-ls", &self.ls),
            ("-scrpath", &self.scrpath),
        ];
        for (flag, path) in paths {
            if let Some(path) = path {
                cmd = cmd.args([flag.to_string(), path.display().to_string()]);
            }
        }

        let flags = [
            (ri, "-ri"),
            (self.rijk, "-rijk"),
            (self.central, "-central"),
            (self.polyedr, "-polyedr"),
            (self.ecnomic, "-ecnomic"),
            (self.diatmic, "-diatmic"),
            (self.i, "-i"),
            (self.c, "-c"),
            (self.prep, "-prep"),
            (self.override_checks, "-override"),
            (frznuclei, "-frznuclei"),
            (self.cosmo, "-cosmo"),
        ];
        for (enabled, flag) in flags {
            if enabled {
                cmd = cmd.arg(flag);
            }
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers() {
        let commands = Commands::default();
        assert_eq!(
            CommandFamily::Scf.abnormal_marker(&commands.base(CommandFamily::Scf)),
            "ridft ended abnormally"
        );
        assert_eq!(
            CommandFamily::Gradient.abnormal_marker(&commands.base(CommandFamily::Gradient)),
            "rdgrad ended abnormally"
        );
        assert_eq!(
            CommandFamily::NumForce.abnormal_marker(&commands.base(CommandFamily::NumForce)),
            "program stopped"
        );
    }

    #[test]
    fn test_escalation_chains() {
        assert!(CommandFamily::Scf.escalation().is_empty());
        assert_eq!(CommandFamily::Gradient.escalation(), &[CommandFamily::Scf]);
        assert_eq!(
            CommandFamily::NumForce.escalation(),
            &[CommandFamily::Scf, CommandFamily::Gradient]
        );
    }

    #[test]
    fn test_jobex_default_command_line() {
        let opts = JobexOptions::default().build().unwrap();
        let cmd = opts.command_line(CommandLine::new("jobex"), true);
        assert_eq!(cmd.to_string(), "jobex -energy 6 -gcart 3 -c 20 -level scf -ri");
    }

    #[test]
    fn test_jobex_rejects_conflicts() {
        let opts = JobexOptions {
            statpt: true,
            relax: true,
            ..Default::default()
        };
        assert_eq!(opts.build(), Err(OptionsError::Conflict("statpt", "relax")));

        let opts = JobexOptions {
            cycles: 0,
            ..Default::default()
        };
        assert!(matches!(opts.build(), Err(OptionsError::InvalidValue { option: "c", .. })));
    }

    #[test]
    fn test_numforce_command_line() {
        let opts = NumForceOptions {
            displacement: Some(0.02),
            central: true,
            mfile: Some(PathBuf::from("hosts")),
            ..Default::default()
        }
        .build()
        .unwrap();
        let cmd = opts.command_line(CommandLine::new("NumForce"), false, true);
        assert_eq!(
            cmd.to_string(),
            "NumForce -level scf -d 0.02 -mfile hosts -central -frznuclei"
        );
    }

    #[test]
    fn test_numforce_rejects_bad_values() {
        let opts = NumForceOptions {
            displacement: Some(-1.0),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = NumForceOptions {
            size: Some("two words".into()),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = NumForceOptions {
            size: Some("big;rm".into()),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_numforce_paths_with_spaces_stay_single_arguments() {
        let opts = NumForceOptions {
            scrpath: Some(PathBuf::from("/scratch/my dir")),
            ..Default::default()
        };
        let cmd = opts.command_line(CommandLine::new("NumForce"), false, false);
        assert_eq!(
            cmd.arguments(),
            ["-level", "scf", "-scrpath", "/scratch/my dir"]
        );
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("MP2".parse::<Level>().unwrap(), Level::Mp2);
        assert!("dft".parse::<Level>().is_err());
    }
}
