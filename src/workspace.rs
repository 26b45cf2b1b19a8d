//! Access to a Turbomole working directory and its artifact files.
//!
//! A [`Workspace`] is resolved once per session. It knows where the
//! `energy`, `gradient`, `coord` and `control` files live and answers the
//! read-only questions the orchestrator asks between commands:
//!
//! - how many optimization steps have completed ([`Workspace::step_count`])
//! - the latest total energy in a chosen unit ([`Workspace::latest_energy`])
//! - which markers the `control` and `coord` files carry
//!
//! Nothing in this module mutates the workspace.

use crate::io::{self, EnergyHistory};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// File name of the energy history.
pub const ENERGY_FILE: &str = "energy";
/// File name of the gradient history.
pub const GRADIENT_FILE: &str = "gradient";
/// File name of the current geometry.
pub const COORD_FILE: &str = "coord";
/// File name of the Turbomole control file.
pub const CONTROL_FILE: &str = "control";

/// Resolution-of-identity marker in `control`.
const RI_MARKER: &str = "$rij";
/// Internal coordinate definition marker in `control`.
const INTDEF_MARKER: &str = "$intdef";

lazy_static! {
    // "$optimize\n   internal   on\n   redundant  off ..."
    static ref OPTIMIZE_GROUP_RE: Regex =
        Regex::new(r"(?m)^\$optimize[^\n]*\n((?:[^$\n][^\n]*\n?)*)").unwrap();
    static ref REDUNDANT_ON_RE: Regex = Regex::new(r"(?m)^\s*redundant\s+on\b").unwrap();
    static ref INTERNAL_ON_RE: Regex = Regex::new(r"(?m)^\s*internal\s+on\b").unwrap();
}

/// Error raised for an energy unit outside the conversion table.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unit not recognized: {0}")]
pub struct UnitError(pub String);

/// Errors of workspace read access.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// An expected artifact does not exist
    #[error("Missing file: {0}")]
    MissingFile(PathBuf),
    /// File system failure while reading an artifact
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Unknown energy unit requested
    #[error(transparent)]
    Unit(#[from] UnitError),
    /// Artifact exists but its content is unusable
    #[error("Format error: {0}")]
    Format(String),
}

/// Result type for workspace operations
pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// Energy units understood by [`Workspace::latest_energy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnergyUnit {
    /// Hartree (the unit Turbomole writes)
    Hartree,
    /// Electron volt
    ElectronVolt,
    /// Wavenumbers (cm^-1)
    Wavenumbers,
    /// kcal/mol
    KcalPerMol,
    /// kJ/mol
    KjPerMol,
}

impl EnergyUnit {
    /// Conversion factor from hartree.
    pub fn factor(self) -> f64 {
        match self {
            EnergyUnit::Hartree => 1.0,
            EnergyUnit::ElectronVolt => 27.2107,
            EnergyUnit::Wavenumbers => 219474.63,
            EnergyUnit::KcalPerMol => 627.503,
            EnergyUnit::KjPerMol => 2625.5,
        }
    }
}

impl FromStr for EnergyUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hartree" => Ok(EnergyUnit::Hartree),
            "eV" | "ev" => Ok(EnergyUnit::ElectronVolt),
            "wavenumbers" | "cm^-1" | "cm-1" => Ok(EnergyUnit::Wavenumbers),
            "kcal/mol" => Ok(EnergyUnit::KcalPerMol),
            "kJ/mol" | "kj/mol" => Ok(EnergyUnit::KjPerMol),
            other => Err(UnitError(other.to_string())),
        }
    }
}

impl fmt::Display for EnergyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnergyUnit::Hartree => "hartree",
            EnergyUnit::ElectronVolt => "eV",
            EnergyUnit::Wavenumbers => "cm^-1",
            EnergyUnit::KcalPerMol => "kcal/mol",
            EnergyUnit::KjPerMol => "kJ/mol",
        };
        write!(f, "{}", name)
    }
}

/// Optimization coordinate system selected in `control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptimizationMode {
    /// Plain cartesian coordinates
    Cartesian,
    /// User-defined internal coordinates (`internal on`)
    Internal,
    /// Redundant internal coordinates (`redundant on`)
    Redundant,
}

/// Serializable snapshot of a workspace, used by `info`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceSummary {
    /// Absolute workspace directory
    pub directory: PathBuf,
    /// Completed optimization steps, if the energy history exists
    pub steps: Option<usize>,
    /// Latest total energy in hartree
    pub latest_energy: Option<f64>,
    /// `$rij` present in control
    pub resolution_of_identity: bool,
    /// `$intdef` present in control
    pub internal_coordinates: bool,
    /// Active optimization mode
    pub mode: OptimizationMode,
    /// At least one atom carries the frozen flag
    pub frozen_atoms: bool,
}

/// A Turbomole working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    dir: PathBuf,
    energy: PathBuf,
    gradient: PathBuf,
    coord: PathBuf,
    control: PathBuf,
}

impl Workspace {
    /// Resolves `dir` to an absolute path and records the artifact paths.
    ///
    /// Only the directory itself must exist; the artifacts are checked
    /// lazily because a fresh optimization has no `energy` or `gradient` yet.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(WorkspaceError::MissingFile(dir.to_path_buf()));
        }
        let dir = dir.canonicalize()?;
        Ok(Self {
            energy: dir.join(ENERGY_FILE),
            gradient: dir.join(GRADIENT_FILE),
            coord: dir.join(COORD_FILE),
            control: dir.join(CONTROL_FILE),
            dir,
        })
    }

    /// Absolute workspace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the energy history.
    pub fn energy_path(&self) -> &Path {
        &self.energy
    }

    /// Path of the gradient history.
    pub fn gradient_path(&self) -> &Path {
        &self.gradient
    }

    /// Path of the coordinate file.
    pub fn coord_path(&self) -> &Path {
        &self.coord
    }

    /// Path of the control file.
    pub fn control_path(&self) -> &Path {
        &self.control
    }

    /// Reads an artifact, mapping a missing file to [`WorkspaceError::MissingFile`].
    pub fn read(&self, path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(WorkspaceError::MissingFile(path.to_path_buf()));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Parses the energy history.
    pub fn energy_history(&self) -> Result<EnergyHistory> {
        Ok(EnergyHistory::parse(&self.read(&self.energy)?))
    }

    /// Number of completed optimization steps.
    pub fn step_count(&self) -> Result<usize> {
        Ok(self.energy_history()?.len())
    }

    /// Like [`step_count`](Self::step_count) but treats a missing history as zero steps.
    pub fn step_count_or_zero(&self) -> Result<usize> {
        match self.step_count() {
            Err(WorkspaceError::MissingFile(_)) => Ok(0),
            other => other,
        }
    }

    /// Latest total energy converted to `unit`.
    ///
    /// An unknown unit is reported as [`WorkspaceError::Unit`] and logged as a
    /// warning; the caller decides on a fallback.
    pub fn latest_energy(&self, unit: &str) -> Result<f64> {
        let unit = match unit.parse::<EnergyUnit>() {
            Ok(unit) => unit,
            Err(e) => {
                warn!("{}", e);
                return Err(e.into());
            }
        };
        self.latest_energy_in(unit)
    }

    /// Latest total energy in an already validated unit.
    pub fn latest_energy_in(&self, unit: EnergyUnit) -> Result<f64> {
        let history = self.energy_history()?;
        let record = history.last_record().ok_or_else(|| {
            WorkspaceError::Format(format!(
                "No energy record found in {}",
                self.energy.display()
            ))
        })?;
        Ok(record.total * unit.factor())
    }

    /// True if `control` requests the RI-J approximation.
    pub fn has_resolution_of_identity(&self) -> Result<bool> {
        Ok(self.read(&self.control)?.contains(RI_MARKER))
    }

    /// True if `control` carries internal coordinate definitions.
    pub fn has_internal_coordinate_definition(&self) -> Result<bool> {
        Ok(self.read(&self.control)?.contains(INTDEF_MARKER))
    }

    /// Coordinate system requested in the `$optimize` group of `control`.
    pub fn current_optimization_mode(&self) -> Result<OptimizationMode> {
        let control = self.read(&self.control)?;
        Ok(optimization_mode_of(&control))
    }

    /// True if any atom in `coord` is frozen.
    pub fn is_geometry_frozen(&self) -> Result<bool> {
        Ok(self
            .read(&self.coord)?
            .lines()
            .any(io::is_frozen_atom_line))
    }

    /// Collects a snapshot for reporting. Missing artifacts are tolerated.
    pub fn summary(&self) -> Result<WorkspaceSummary> {
        let steps = match self.step_count() {
            Ok(n) => Some(n),
            Err(WorkspaceError::MissingFile(_)) => None,
            Err(e) => return Err(e),
        };
        let latest_energy = match self.latest_energy_in(EnergyUnit::Hartree) {
            Ok(e) => Some(e),
            Err(WorkspaceError::MissingFile(_)) | Err(WorkspaceError::Format(_)) => None,
            Err(e) => return Err(e),
        };
        let control = match self.read(&self.control) {
            Ok(text) => text,
            Err(WorkspaceError::MissingFile(_)) => String::new(),
            Err(e) => return Err(e),
        };
        let frozen_atoms = match self.is_geometry_frozen() {
            Ok(flag) => flag,
            Err(WorkspaceError::MissingFile(_)) => false,
            Err(e) => return Err(e),
        };
        Ok(WorkspaceSummary {
            directory: self.dir.clone(),
            steps,
            latest_energy,
            resolution_of_identity: control.contains(RI_MARKER),
            internal_coordinates: control.contains(INTDEF_MARKER),
            mode: optimization_mode_of(&control),
            frozen_atoms,
        })
    }
}

fn optimization_mode_of(control: &str) -> OptimizationMode {
    let group = match OPTIMIZE_GROUP_RE.captures(control) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => return OptimizationMode::Cartesian,
    };
    if REDUNDANT_ON_RE.is_match(group) {
        OptimizationMode::Redundant
    } else if INTERNAL_ON_RE.is_match(group) {
        OptimizationMode::Internal
    } else {
        OptimizationMode::Cartesian
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace_with(files: &[(&str, &str)]) -> (TempDir, Workspace) {
        let temp_dir = TempDir::new().unwrap();
        for (name, content) in files {
            fs::write(temp_dir.path().join(name), content).unwrap();
        }
        let workspace = Workspace::open(temp_dir.path()).unwrap();
        (temp_dir, workspace)
    }

    const TWO_STEPS: &str = "$energy      SCF       SCFKIN     SCFPOT\n     1   -76.0 75.8 -151.8\n     2 -76.123456 0.0 -76.123456\n$end\n";

    #[test]
    fn test_step_count() {
        let (_dir, ws) = workspace_with(&[(ENERGY_FILE, TWO_STEPS)]);
        assert_eq!(ws.step_count().unwrap(), 2);
    }

    #[test]
    fn test_step_count_missing_energy() {
        let (_dir, ws) = workspace_with(&[]);
        assert!(matches!(ws.step_count(), Err(WorkspaceError::MissingFile(_))));
        assert_eq!(ws.step_count_or_zero().unwrap(), 0);
    }

    #[test]
    fn test_latest_energy_units() {
        let (_dir, ws) = workspace_with(&[(ENERGY_FILE, TWO_STEPS)]);
        assert_eq!(ws.latest_energy("hartree").unwrap(), -76.123456);
        assert_eq!(ws.latest_energy("eV").unwrap(), -76.123456 * 27.2107);
        assert_eq!(ws.latest_energy("kcal/mol").unwrap(), -76.123456 * 627.503);
    }

    #[test]
    fn test_latest_energy_unknown_unit() {
        let (_dir, ws) = workspace_with(&[(ENERGY_FILE, TWO_STEPS)]);
        let result = ws.latest_energy("bogus-unit");
        assert!(matches!(result, Err(WorkspaceError::Unit(UnitError(ref u))) if u == "bogus-unit"));
        // The workspace stays usable afterwards
        assert!(ws.latest_energy("hartree").is_ok());
    }

    #[test]
    fn test_control_markers() {
        let control = "$title\n$rij\n$intdef\n 1 k  1.0 stre 1 2\n$optimize\n   internal   on\n   redundant  off\n   cartesian  off\n$end\n";
        let (_dir, ws) = workspace_with(&[(CONTROL_FILE, control)]);
        assert!(ws.has_resolution_of_identity().unwrap());
        assert!(ws.has_internal_coordinate_definition().unwrap());
        assert_eq!(ws.current_optimization_mode().unwrap(), OptimizationMode::Internal);
    }

    #[test]
    fn test_optimization_mode_variants() {
        assert_eq!(
            optimization_mode_of("$optimize\n internal off\n redundant on\n$end\n"),
            OptimizationMode::Redundant
        );
        assert_eq!(
            optimization_mode_of("$optimize\n internal off\n cartesian on\n$end\n"),
            OptimizationMode::Cartesian
        );
        assert_eq!(optimization_mode_of("$title\n$end\n"), OptimizationMode::Cartesian);
    }

    #[test]
    fn test_geometry_frozen() {
        let coord = "$coord\n    0.0 0.0 0.0 o f\n    1.0 0.0 0.0 h\n$end\n";
        let (_dir, ws) = workspace_with(&[(COORD_FILE, coord)]);
        assert!(ws.is_geometry_frozen().unwrap());

        let (_dir2, ws2) = workspace_with(&[(COORD_FILE, "$coord\n 0.0 0.0 0.0 o\n$end\n")]);
        assert!(!ws2.is_geometry_frozen().unwrap());
    }

    #[test]
    fn test_fluorine_geometry_not_frozen() {
        let coord = "$coord\n    0.0 0.0 0.0 c\n    1.0 0.0 0.0 f\n$end\n";
        let (_dir, ws) = workspace_with(&[(COORD_FILE, coord)]);
        assert!(!ws.is_geometry_frozen().unwrap());
        assert!(!ws.summary().unwrap().frozen_atoms);
    }

    #[test]
    fn test_summary_tolerates_missing_files() {
        let (_dir, ws) = workspace_with(&[]);
        let summary = ws.summary().unwrap();
        assert_eq!(summary.steps, None);
        assert_eq!(summary.mode, OptimizationMode::Cartesian);
        assert!(!summary.frozen_atoms);
    }
}
