//! Rolling an optimization back to an earlier accepted geometry.
//!
//! Turbomole occasionally produces a linearly dependent set of redundant
//! internal coordinates late in an optimization. The way out is to return to
//! a step that was still healthy: truncate `energy` and `gradient` to that
//! step and rebuild `coord` from the geometry stored in the gradient block.
//!
//! A rollback is done in two phases. [`plan_rollback`] reads the workspace
//! and computes all three new file contents without touching the disk; it
//! fails with [`RollbackError::DataMissing`] when the gradient history has no
//! geometry for the requested step. [`RollbackPlan::commit`] then writes the
//! files, each through a temporary sibling that is renamed into place. If a
//! rename fails, the files already replaced are written back with their
//! previous contents and the remaining temporaries are removed.
//!
//! Step indices are zero-based: step `k` is the `(k+1)`-th energy record and
//! the gradient block tagged `cycle = k+1`.
//!
//! Internal coordinate data (`$intdef`, `$redundant`) are not rolled back;
//! only the cartesian geometry is restored.

use crate::io::{self, EnergyHistory};
use crate::workspace::{Workspace, WorkspaceError};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while rolling back.
#[derive(Error, Debug)]
pub enum RollbackError {
    /// Target step is not a completed step
    #[error("Cannot roll back to step {target}: the workspace has {steps} completed steps")]
    OutOfRange {
        /// Requested zero-based step
        target: usize,
        /// Completed steps in the energy history
        steps: usize,
    },
    /// The gradient history holds no geometry for the step
    #[error("Rollback couldn't find coordinates corresponding to configuration {step}. Make sure the gradient file exists, and there is a coordinate entry for that configuration.")]
    DataMissing {
        /// Requested zero-based step
        step: usize,
    },
    /// Reading the workspace failed
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// Writing the new files failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for rollback results
pub type Result<T> = std::result::Result<T, RollbackError>;

/// Gradient history split at the end of one cycle block.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientCut {
    /// Every line up to and including the target block
    pub kept: Vec<String>,
    /// Coordinate lines of the target block
    pub coordinates: Vec<String>,
}

/// Scans a gradient history for the block tagged `cycle`.
///
/// Lines are buffered until the block starts. Inside the block every line
/// with more than three fields is collected as a coordinate line. The scan
/// ends at the next cycle line or at `$end`.
pub fn cut_gradient(content: &str, cycle: usize) -> GradientCut {
    let mut kept = Vec::new();
    let mut coordinates = Vec::new();
    let mut in_block = false;

    for line in content.split_inclusive('\n') {
        if in_block && io::is_cycle_line(line) {
            break;
        }
        if io::is_end_marker(line) {
            break;
        }
        kept.push(line.to_string());
        if in_block && io::field_count(line) > 3 {
            coordinates.push(line.to_string());
        }
        if io::cycle_number(line) == Some(cycle) {
            in_block = true;
        }
    }

    GradientCut { kept, coordinates }
}

/// New contents of the three artifacts after a rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackPlan {
    /// Zero-based target step
    pub step: usize,
    energy: (PathBuf, String),
    gradient: (PathBuf, String),
    coord: (PathBuf, String),
}

impl RollbackPlan {
    /// Content the energy history will have.
    pub fn energy(&self) -> &str {
        &self.energy.1
    }

    /// Content the gradient history will have.
    pub fn gradient(&self) -> &str {
        &self.gradient.1
    }

    /// Content the coordinate file will have.
    pub fn coord(&self) -> &str {
        &self.coord.1
    }

    /// Writes the planned files.
    ///
    /// All contents are staged next to their targets before the first
    /// rename. A failed rename restores the files replaced before it.
    pub fn commit(self) -> Result<()> {
        let files = [self.energy, self.gradient, self.coord];

        let mut staged = Vec::with_capacity(files.len());
        for (path, content) in &files {
            let tmp = staging_path(path);
            if let Err(e) = fs::write(&tmp, content) {
                remove_staged(staged.iter().map(|(tmp, _, _)| tmp));
                return Err(e.into());
            }
            staged.push((tmp, path, fs::read(path).ok()));
        }

        for (i, (tmp, path, _)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(tmp, path) {
                warn!("Could not replace {}: {}", path.display(), e);
                for (_, done, previous) in &staged[..i] {
                    restore(done, previous.as_deref());
                }
                remove_staged(staged[i..].iter().map(|(tmp, _, _)| tmp));
                return Err(e.into());
            }
        }
        info!("Workspace rolled back to step {}", self.step);
        Ok(())
    }
}

fn remove_staged<'a>(paths: impl Iterator<Item = &'a PathBuf>) {
    for tmp in paths {
        let _ = fs::remove_file(tmp);
    }
}

fn restore(path: &Path, previous: Option<&[u8]>) {
    let result = match previous {
        Some(content) => fs::write(path, content),
        None => fs::remove_file(path),
    };
    if let Err(e) = result {
        warn!("Could not restore {}: {}", path.display(), e);
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".rollback");
    path.with_file_name(name)
}

/// Computes the rollback of `workspace` to zero-based `step` without writing.
pub fn plan_rollback(workspace: &Workspace, step: usize) -> Result<RollbackPlan> {
    let history: EnergyHistory = workspace.energy_history()?;
    let steps = history.len();
    if step >= steps {
        return Err(RollbackError::OutOfRange {
            target: step,
            steps,
        });
    }

    match workspace.has_internal_coordinate_definition() {
        Ok(true) => warn!(
            "Internal coordinates are defined in control; only the cartesian geometry is rolled back"
        ),
        Ok(false) => {}
        Err(WorkspaceError::MissingFile(path)) => {
            debug!("No control file at {}", path.display())
        }
        Err(e) => return Err(e.into()),
    }

    let gradient = workspace.read(workspace.gradient_path())?;
    let cut = cut_gradient(&gradient, step + 1);
    if cut.coordinates.is_empty() {
        return Err(RollbackError::DataMissing { step });
    }
    debug!(
        "Found {} coordinate lines for step {} (cycle {})",
        cut.coordinates.len(),
        step,
        step + 1
    );

    let mut gradient_out = String::new();
    for line in &cut.kept {
        io::push_line(&mut gradient_out, line);
    }
    io::push_line(&mut gradient_out, io::END_MARKER);

    Ok(RollbackPlan {
        step,
        energy: (
            workspace.energy_path().to_path_buf(),
            history.truncated(step + 1).render(),
        ),
        gradient: (workspace.gradient_path().to_path_buf(), gradient_out),
        coord: (
            workspace.coord_path().to_path_buf(),
            io::render_coord(&cut.coordinates),
        ),
    })
}

/// Rolls `workspace` back to zero-based `step`.
///
/// Afterwards `step_count()` equals `step + 1` and `coord` holds the geometry
/// recorded for that step. Nothing is written when an error is returned.
pub fn rollback(workspace: &Workspace, step: usize) -> Result<()> {
    plan_rollback(workspace, step)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRADIENT: &str = "$grad          cartesian gradients
  cycle =      1    SCF energy =     -76.0107465155   |dE/dxyz| =  0.059620
    0.00000000000000      0.00000000000000     -0.12918654808898      o
    0.00000000000000     -1.42491813995600      1.02522027941600      h
   0.00000000000000D+00  0.00000000000000D+00  0.22548307651570D-01
   0.00000000000000D+00 -0.17431542936300D-01 -0.11274153825785D-01
  cycle =      2    SCF energy =     -76.0122358423   |dE/dxyz| =  0.012090
    0.00000000000000      0.00000000000000     -0.10230013205870      o
    0.00000000000000     -1.45105310040900      1.01177701400735      h
   0.00000000000000D+00  0.00000000000000D+00  0.53201474126550D-02
   0.00000000000000D+00 -0.38217035110010D-02 -0.26600737063275D-02
$end
";

    #[test]
    fn test_cut_first_cycle() {
        let cut = cut_gradient(GRADIENT, 1);
        assert_eq!(cut.coordinates.len(), 2);
        assert!(cut.coordinates[0].contains("-0.12918654808898"));
        assert_eq!(cut.kept.len(), 6);
        assert!(cut.kept[0].starts_with("$grad"));
    }

    #[test]
    fn test_cut_last_cycle_stops_at_end() {
        let cut = cut_gradient(GRADIENT, 2);
        assert_eq!(cut.coordinates.len(), 2);
        assert!(cut.coordinates[1].contains("-1.45105310040900"));
        assert_eq!(cut.kept.len(), 11);
    }

    #[test]
    fn test_cut_missing_cycle() {
        let cut = cut_gradient(GRADIENT, 7);
        assert!(cut.coordinates.is_empty());
    }

    #[test]
    fn test_failed_rename_restores_replaced_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("energy"), "$energy\n 1 -1.0 0.5 -1.5\n 2 -1.1 0.5 -1.6\n$end\n").unwrap();
        fs::write(dir.join("gradient"), GRADIENT).unwrap();
        // A directory in place of coord makes the last rename fail
        fs::create_dir(dir.join("coord")).unwrap();
        let workspace = Workspace::open(dir).unwrap();
        let energy_before = fs::read_to_string(workspace.energy_path()).unwrap();

        let err = rollback(&workspace, 0).unwrap_err();
        assert!(matches!(err, RollbackError::Io(_)));

        assert_eq!(fs::read_to_string(workspace.energy_path()).unwrap(), energy_before);
        assert_eq!(fs::read_to_string(workspace.gradient_path()).unwrap(), GRADIENT);
        let leftovers = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".rollback"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path(Path::new("/tmp/ws/energy")),
            PathBuf::from("/tmp/ws/energy.rollback")
        );
    }
}
