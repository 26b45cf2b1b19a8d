//! Freezing and unfreezing atoms in a Turbomole `coord` file.
//!
//! Atoms are addressed by line index in the file. Line 0 is the `$coord`
//! header, so line `n` is the `n`-th atom. A frozen atom carries a trailing
//! `f` after its element symbol; geometry optimizers keep it fixed.
//!
//! Both editors are idempotent and rewrite the file only after every index
//! has been validated.

use crate::io::{self, COORD_MARKER, FROZEN_FLAG};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the freeze editors.
#[derive(Error, Debug)]
pub enum FreezeError {
    /// The file does not start with `$coord`
    #[error("Not a valid turbomole coord file: {0}")]
    NotCoordFile(PathBuf),
    /// No line indices were given
    #[error("No atoms specified")]
    NoAtoms,
    /// An index does not address an atom line
    #[error("Line {line} of {path} is not an atom line")]
    NotAtomLine {
        /// Offending line index
        line: usize,
        /// Coordinate file
        path: PathBuf,
    },
    /// Reading or writing failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for freeze results
pub type Result<T> = std::result::Result<T, FreezeError>;

/// Appends the frozen flag to the given atom lines of `coord`.
///
/// Returns the number of lines that changed.
pub fn freeze_atoms(coord: &Path, lines: &[usize]) -> Result<usize> {
    let changed = edit(coord, lines, freeze_line)?;
    info!("Froze {} atoms in {}", changed, coord.display());
    Ok(changed)
}

/// Removes the frozen flag from the given atom lines of `coord`.
///
/// Returns the number of lines that changed.
pub fn unfreeze_atoms(coord: &Path, lines: &[usize]) -> Result<usize> {
    let changed = edit(coord, lines, unfreeze_line)?;
    info!("Unfroze {} atoms in {}", changed, coord.display());
    Ok(changed)
}

fn edit(coord: &Path, lines: &[usize], op: fn(&str) -> Option<String>) -> Result<usize> {
    if lines.is_empty() {
        return Err(FreezeError::NoAtoms);
    }
    let content = fs::read_to_string(coord)?;
    let mut file_lines: Vec<String> = content
        .split_inclusive('\n')
        .map(str::to_string)
        .collect();

    if file_lines.first().map(|l| l.trim_end()) != Some(COORD_MARKER) {
        return Err(FreezeError::NotCoordFile(coord.to_path_buf()));
    }

    let atoms = file_lines[1..]
        .iter()
        .take_while(|l| !l.trim_start().starts_with('$'))
        .count();
    for &line in lines {
        if line == 0 || line > atoms || !io::is_atom_line(&file_lines[line]) {
            return Err(FreezeError::NotAtomLine {
                line,
                path: coord.to_path_buf(),
            });
        }
    }

    let mut changed = 0;
    for &line in lines {
        if let Some(edited) = op(&file_lines[line]) {
            debug!("line {}: {}", line, edited.trim());
            file_lines[line] = edited;
            changed += 1;
        }
    }

    if changed > 0 {
        let mut out = String::with_capacity(content.len() + 2 * changed);
        for line in &file_lines {
            io::push_line(&mut out, line);
        }
        fs::write(coord, out)?;
    }
    Ok(changed)
}

fn freeze_line(line: &str) -> Option<String> {
    if io::is_frozen_atom_line(line) {
        return None;
    }
    Some(format!("{} {}", line.trim_end(), FROZEN_FLAG))
}

fn unfreeze_line(line: &str) -> Option<String> {
    if !io::is_frozen_atom_line(line) {
        return None;
    }
    let trimmed = line.trim_end();
    let stripped = &trimmed[..trimmed.len() - FROZEN_FLAG.len()];
    Some(stripped.trim_end().to_string())
}
