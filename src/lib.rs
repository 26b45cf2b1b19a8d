#![deny(missing_docs)]

//! turborecover - Supervised Turbomole runs with automatic recovery
//!
//! turborecover drives the Turbomole programs `ridft`, `rdgrad`, `jobex` and
//! `NumForce` inside a calculation directory and recovers from abnormal
//! terminations without manual intervention.
//!
//! # Overview
//!
//! Long geometry optimizations and numerical frequency runs fail for
//! transient reasons: an SCF that does not converge, a corrupted restart
//! file, a redundant internal coordinate set that became linearly
//! dependent. turborecover runs each program, looks for the program's
//! abnormal-termination marker in its output and, when found:
//!
//! 1. restores the last Turbomole checkpoint (`actual -r`),
//! 2. re-runs the program,
//! 3. escalates to earlier pipeline stages if it still fails,
//! 4. gives up after a bounded number of attempts.
//!
//! Every decision is printed and appended to a per-workspace session log.
//!
//! # Rollback
//!
//! An optimization can be rolled back to any completed step: the `energy` and
//! `gradient` histories are truncated and `coord` is rebuilt from the
//! geometry stored for that step. See [`rollback`].
//!
//! # Quick Start
//!
//! ```no_run
//! use turborecover::{JobexOptions, Orchestrator, ShellRunner, Workspace};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workspace = Workspace::open(Path::new("."))?;
//!     let mut orchestrator = Orchestrator::new(workspace, ShellRunner::default());
//!
//!     orchestrator.ridft(None)?;
//!     let report = orchestrator.jobex(&JobexOptions::default(), None)?;
//!     println!("{:?} new steps", report.new_steps);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`workspace`]: read-only access to `energy`, `gradient`, `coord` and `control`
//! - [`runner`]: external command execution
//! - [`orchestrator`]: the retry, recovery and escalation state machine
//! - [`rollback`]: truncating an optimization to an earlier step
//! - [`freeze`]: freezing and unfreezing atoms in `coord`
//! - [`history`]: the session log
//! - [`config`]: command families, executables and program options
//! - [`settings`]: INI configuration files

/// Command families, executables and program options
pub mod config;
pub mod freeze;
pub mod history;
pub mod io;
pub mod orchestrator;
pub mod rollback;
pub mod runner;
/// Configuration management system
pub mod settings;
pub mod workspace;

pub use config::{CommandFamily, Commands, JobexOptions, Level, NumForceOptions};
pub use orchestrator::{Orchestrator, OrchestratorError, RunReport};
pub use runner::{CommandLine, CommandRunner, ShellRunner};
pub use workspace::Workspace;
