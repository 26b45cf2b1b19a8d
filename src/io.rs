//! Line-preserving readers and writers for the Turbomole data files.
//!
//! The files handled here (`energy`, `gradient`, `coord`) are read back by
//! Turbomole itself, so every line that is kept is written out exactly as it
//! was read, terminator included. Only the framing lines (`$coord`, `$end`)
//! are generated.
//!
//! # Energy history
//!
//! ```text
//! $energy      SCF               SCFKIN            SCFPOT
//!      1   -76.01074651550    75.81376530478  -151.82451182028
//!      2   -76.12345600000     0.00000000000   -76.12345600000
//! $end
//! ```
//!
//! # Gradient history
//!
//! ```text
//! $grad          cartesian gradients
//!   cycle =      1    SCF energy =      -76.0107465155   |dE/dxyz| =  0.059620
//!     0.00000000000000      0.00000000000000     -0.12918654808898      o
//!    0.00000000000000D+00  0.00000000000000D+00  0.22548307651570D-01
//! $end
//! ```
//!
//! Coordinate lines carry four fields, gradient lines three.

use lazy_static::lazy_static;
use regex::Regex;

/// Terminal marker shared by all Turbomole data groups.
pub const END_MARKER: &str = "$end";
/// Opening marker of the coordinate file.
pub const COORD_MARKER: &str = "$coord";
/// Header marker of the energy history.
pub const ENERGY_MARKER: &str = "$energy";
/// Trailing token flagging an atom as frozen.
pub const FROZEN_FLAG: &str = "f";

lazy_static! {
    // "  cycle =      3    SCF energy =  ..."
    static ref CYCLE_RE: Regex = Regex::new(r"^\s*cycle\s*=\s*(\d+)").unwrap();
}

/// Returns the cycle number if `line` opens a gradient block.
pub fn cycle_number(line: &str) -> Option<usize> {
    CYCLE_RE
        .captures(line)
        .and_then(|caps| caps[1].parse().ok())
}

/// True if the line opens any gradient block.
pub fn is_cycle_line(line: &str) -> bool {
    CYCLE_RE.is_match(line)
}

/// True for a `$end` line.
pub fn is_end_marker(line: &str) -> bool {
    line.trim_start().starts_with(END_MARKER)
}

/// Number of whitespace separated fields on a line.
pub fn field_count(line: &str) -> usize {
    line.split_whitespace().count()
}

/// Parses a float that may use the Fortran `D` exponent.
pub fn parse_fortran_float(token: &str) -> Option<f64> {
    token.replace(|c: char| c == 'D' || c == 'd', "E").parse().ok()
}

/// Appends `line` to `out`, adding a newline if the line has none.
pub fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    if !line.ends_with('\n') {
        out.push('\n');
    }
}

/// True if `line` is an atom line of a `coord` file.
///
/// Atom lines are the ones inside the `$coord` group that carry at least
/// `x y z element`.
pub fn is_atom_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    !trimmed.starts_with('$') && field_count(trimmed) >= 4
}

/// True if an atom line carries the frozen flag after its element symbol.
///
/// Fluorine is written as element `f`, so the flag only counts as a fifth
/// field: `x y z f` is an unfrozen fluorine, `x y z f f` a frozen one.
pub fn is_frozen_atom_line(line: &str) -> bool {
    is_atom_line(line)
        && field_count(line) >= 5
        && line.split_whitespace().last() == Some(FROZEN_FLAG)
}

/// One parsed record of the energy history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyRecord {
    /// Cycle number as written by Turbomole (1-based)
    pub cycle: usize,
    /// Total energy in hartree
    pub total: f64,
    /// Kinetic term in hartree
    pub kinetic: f64,
    /// Potential term in hartree
    pub potential: f64,
}

impl EnergyRecord {
    /// Parses a record line; returns `None` for anything that is not four numbers.
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 4 {
            return None;
        }
        Some(Self {
            cycle: parts[0].parse().ok()?,
            total: parse_fortran_float(parts[1])?,
            kinetic: parse_fortran_float(parts[2])?,
            potential: parse_fortran_float(parts[3])?,
        })
    }
}

/// The `energy` file split into header and raw record lines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnergyHistory {
    header: Option<String>,
    records: Vec<String>,
}

impl EnergyHistory {
    /// Splits the file content; blank lines and anything after `$end` are ignored.
    pub fn parse(content: &str) -> Self {
        let mut history = Self::default();
        for line in content.split_inclusive('\n') {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if is_end_marker(trimmed) {
                break;
            }
            if trimmed.starts_with(ENERGY_MARKER) && history.header.is_none() {
                history.header = Some(line.to_string());
            } else {
                history.records.push(line.to_string());
            }
        }
        history
    }

    /// Number of completed optimization steps.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no step has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Raw record lines in file order.
    pub fn records(&self) -> &[String] {
        &self.records
    }

    /// Parses the last record, if any.
    pub fn last_record(&self) -> Option<EnergyRecord> {
        self.records.last().and_then(|line| EnergyRecord::parse(line))
    }

    /// Keeps the header and the first `steps` records.
    pub fn truncated(&self, steps: usize) -> Self {
        Self {
            header: self.header.clone(),
            records: self.records.iter().take(steps).cloned().collect(),
        }
    }

    /// Renders the file, always closing it with `$end`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(header) = &self.header {
            push_line(&mut out, header);
        }
        for record in &self.records {
            push_line(&mut out, record);
        }
        push_line(&mut out, END_MARKER);
        out
    }
}

/// Renders a fresh `coord` file around the given atom lines.
pub fn render_coord(atom_lines: &[String]) -> String {
    let mut out = String::new();
    push_line(&mut out, COORD_MARKER);
    for line in atom_lines {
        push_line(&mut out, line);
    }
    push_line(&mut out, END_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENERGY: &str = "$energy      SCF               SCFKIN            SCFPOT\n     1   -76.01074651550    75.81376530478  -151.82451182028\n     2   -76.123456 0.0 -76.123456\n$end\n";

    #[test]
    fn test_energy_history_counts_records() {
        let history = EnergyHistory::parse(ENERGY);
        assert_eq!(history.len(), 2);
        let last = history.last_record().unwrap();
        assert_eq!(last.cycle, 2);
        assert!((last.total + 76.123456).abs() < 1e-12);
    }

    #[test]
    fn test_energy_history_render_preserves_lines() {
        let history = EnergyHistory::parse(ENERGY);
        assert_eq!(history.render(), ENERGY);
    }

    #[test]
    fn test_energy_history_without_terminal_marker() {
        let history = EnergyHistory::parse("$energy\n   1  -1.0  0.5  -1.5");
        assert_eq!(history.len(), 1);
        assert_eq!(history.render(), "$energy\n   1  -1.0  0.5  -1.5\n$end\n");
    }

    #[test]
    fn test_truncated_keeps_header() {
        let history = EnergyHistory::parse(ENERGY).truncated(1);
        assert_eq!(history.len(), 1);
        assert!(history.render().starts_with("$energy"));
        assert!(history.render().ends_with("$end\n"));
    }

    #[test]
    fn test_cycle_number() {
        assert_eq!(
            cycle_number("  cycle =      3    SCF energy =  -76.01   |dE/dxyz| =  0.05"),
            Some(3)
        );
        assert_eq!(cycle_number("$grad          cartesian gradients"), None);
        assert!(!is_cycle_line("    0.0  0.0  0.0  o"));
    }

    #[test]
    fn test_fortran_float() {
        assert_eq!(parse_fortran_float("0.5D-01"), Some(0.05));
        assert_eq!(parse_fortran_float("-1.25"), Some(-1.25));
        assert_eq!(parse_fortran_float("abc"), None);
    }

    #[test]
    fn test_frozen_atom_line() {
        assert!(is_frozen_atom_line("    0.0  0.0  0.0  o f\n"));
        assert!(!is_frozen_atom_line("    0.0  0.0  0.0  o\n"));
        assert!(!is_frozen_atom_line("$coord\n"));
    }

    #[test]
    fn test_fluorine_is_not_a_frozen_flag() {
        assert!(!is_frozen_atom_line("    1.0  0.0  0.0  f\n"));
        assert!(is_frozen_atom_line("    1.0  0.0  0.0  f f\n"));
    }
}
