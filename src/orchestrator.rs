//! Retry and recovery state machine for Turbomole runs.
//!
//! Each command family runs through the same loop:
//!
//! ```text
//! run ──► marker absent ──────────────────────────────► Succeeded
//!  │
//!  └─► marker present ─► tries > numtries ? ──yes────► UnknownFailure (terminal)
//!            ▲                 │ no
//!            │                 ▼
//!            │           recovery command (`actual -r`)
//!            │                 ▼
//!            │           rerun ─► still failing ─► escalation chain
//!            └──────── tries += 1 ◄────────────────────┘
//! ```
//!
//! Escalation re-runs earlier pipeline stages through their own supervised
//! loops: a failing gradient re-runs the SCF, a failing optimization driver
//! re-runs the SCF, a failing `NumForce` re-runs the SCF and then the
//! gradient.
//!
//! A terminal failure poisons the [`Orchestrator`]: the error is written to
//! the session log, returned to the caller, and every later request returns
//! [`OrchestratorError::SessionAborted`] without running anything.
//!
//! Only one session may work on a workspace at a time. This is not enforced.

use crate::config::{
    CommandFamily, Commands, JobexOptions, NumForceOptions, OptionsError, DEFAULT_NUMTRIES,
    MISSING_GRADIENT_MARKER,
};
use crate::history::{SessionLog, DEFAULT_HISTORY_FILE};
use crate::rollback::{self, RollbackError};
use crate::runner::{CommandLine, CommandRunner, RunnerError, ShellRunner};
use crate::settings::Settings;
use crate::workspace::{Workspace, WorkspaceError};
use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

/// Errors that end an orchestration request.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The retry bound was exhausted with the marker still present
    #[error("{program} has failed for unknown reasons and could not be recovered.  Check that the setup is alright.")]
    UnknownFailure {
        /// Failing family
        family: CommandFamily,
        /// Program name as configured
        program: String,
        /// Number of times the command was run
        attempts: u32,
        /// Output of the last run, classified as [`Classification::UnknownFailure`]
        outcome: CommandOutcome,
    },
    /// Rollback before the command failed
    #[error("Rollback failed: {0}")]
    Rollback(#[from] RollbackError),
    /// Workspace could not be read
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// A command could not be started
    #[error(transparent)]
    Runner(#[from] RunnerError),
    /// Invalid command options
    #[error(transparent)]
    Options(#[from] OptionsError),
    /// The session log could not be written
    #[error("Cannot write session log: {0}")]
    Log(#[from] std::io::Error),
    /// An earlier terminal failure stopped this session
    #[error("Session aborted after an earlier failure: {0}")]
    SessionAborted(String),
}

/// Type alias for orchestration results
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Classification of one command run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
    /// No abnormal-termination marker
    Success,
    /// The family's marker was found
    AbnormalTermination,
    /// The marker persisted through every retry
    UnknownFailure,
}

/// Captured text of one run and its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// Combined stdout and stderr
    pub text: String,
    /// Derived classification
    pub classification: Classification,
}

impl CommandOutcome {
    /// Classifies `text` by the presence of `marker`.
    pub fn classify(text: String, marker: &str) -> Self {
        let classification = if text.contains(marker) {
            Classification::AbnormalTermination
        } else {
            Classification::Success
        };
        Self {
            text,
            classification,
        }
    }

    /// True for [`Classification::Success`].
    pub fn is_success(&self) -> bool {
        self.classification == Classification::Success
    }
}

/// What one request did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Family that was run
    pub family: CommandFamily,
    /// Rendered command line
    pub command: String,
    /// Runs of the command itself, including re-submissions
    pub attempts: u32,
    /// Recovery command invocations
    pub recoveries: u32,
    /// Escalation chains executed
    pub escalations: u32,
    /// New energy records produced (optimization driver only)
    pub new_steps: Option<usize>,
}

impl RunReport {
    fn new(family: CommandFamily, command: &CommandLine) -> Self {
        Self {
            family,
            command: command.to_string(),
            attempts: 0,
            recoveries: 0,
            escalations: 0,
            new_steps: None,
        }
    }
}

fn unknown_failure(
    family: CommandFamily,
    command: &CommandLine,
    attempts: u32,
    mut outcome: CommandOutcome,
) -> OrchestratorError {
    outcome.classification = Classification::UnknownFailure;
    debug!("Last output of {}:\n{}", command, outcome.text);
    OrchestratorError::UnknownFailure {
        family,
        program: command.program_name().to_string(),
        attempts,
        outcome,
    }
}

/// Supervises Turbomole commands on one workspace.
pub struct Orchestrator<R: CommandRunner = ShellRunner> {
    workspace: Workspace,
    runner: R,
    commands: Commands,
    numtries: u32,
    log: SessionLog,
    echo_output: bool,
    aborted: Option<String>,
}

impl<R: CommandRunner> Orchestrator<R> {
    /// Orchestrator with default commands, `numtries = 2` and the log in the workspace.
    pub fn new(workspace: Workspace, runner: R) -> Self {
        let log = SessionLog::in_dir(workspace.dir(), DEFAULT_HISTORY_FILE);
        Self {
            workspace,
            runner,
            commands: Commands::default(),
            numtries: DEFAULT_NUMTRIES,
            log,
            echo_output: true,
            aborted: None,
        }
    }

    /// Orchestrator configured from loaded settings.
    pub fn from_settings(workspace: Workspace, runner: R, settings: &Settings) -> Self {
        let log = SessionLog::in_dir(workspace.dir(), &settings.general.history_file);
        Self::new(workspace, runner)
            .with_commands(settings.commands.clone())
            .with_numtries(settings.retry.numtries)
            .with_log(log)
            .with_echo_output(settings.general.echo_output)
    }

    /// Replaces the executables.
    pub fn with_commands(mut self, commands: Commands) -> Self {
        self.commands = commands;
        self
    }

    /// Sets the retry bound.
    pub fn with_numtries(mut self, numtries: u32) -> Self {
        self.numtries = numtries;
        self
    }

    /// Replaces the session log.
    pub fn with_log(mut self, log: SessionLog) -> Self {
        self.log = log;
        self
    }

    /// Prints captured command output when enabled.
    pub fn with_echo_output(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }

    /// The supervised workspace.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The session log.
    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// The runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Retry bound in use.
    pub fn numtries(&self) -> u32 {
        self.numtries
    }

    /// Reason of the terminal failure, if the session was aborted.
    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    /// Runs the SCF program, optionally after rolling back to `rollback`.
    pub fn ridft(&mut self, rollback: Option<usize>) -> Result<RunReport> {
        self.guarded(|this| {
            this.pre_rollback(rollback)?;
            let command = this.commands.base(CommandFamily::Scf);
            this.run_simple(CommandFamily::Scf, command)
        })
    }

    /// Runs the gradient program, optionally after rolling back.
    pub fn rdgrad(&mut self, rollback: Option<usize>) -> Result<RunReport> {
        self.guarded(|this| {
            this.pre_rollback(rollback)?;
            let command = this.commands.base(CommandFamily::Gradient);
            this.run_simple(CommandFamily::Gradient, command)
        })
    }

    /// Runs the optimization driver and reports how many steps it added.
    pub fn jobex(&mut self, options: &JobexOptions, rollback: Option<usize>) -> Result<RunReport> {
        options.validate()?;
        self.guarded(|this| {
            this.pre_rollback(rollback)?;

            let ri = match options.ri {
                Some(ri) => ri,
                None => this.workspace.has_resolution_of_identity()?,
            };
            let command =
                options.command_line(this.commands.base(CommandFamily::Optimization), ri);

            let before = this.workspace.step_count_or_zero()?;
            let mut report = this.run_simple(CommandFamily::Optimization, command)?;
            let after = this.workspace.step_count_or_zero()?;

            let new_steps = after.saturating_sub(before);
            this.say(&format!(
                "{} new optimization steps recorded ({} in total)",
                new_steps, after
            ))?;
            report.new_steps = Some(new_steps);
            Ok(report)
        })
    }

    /// Runs the numerical force driver.
    ///
    /// When the driver reports a missing `$grad` data group, the gradient is
    /// computed once and the driver resubmitted once, outside the retry bound.
    pub fn numforce(
        &mut self,
        options: &NumForceOptions,
        rollback: Option<usize>,
    ) -> Result<RunReport> {
        options.validate()?;
        self.guarded(|this| {
            this.pre_rollback(rollback)?;

            let ri = match options.ri {
                Some(ri) => ri,
                None => this.workspace.has_resolution_of_identity()?,
            };
            let frznuclei = match options.frznuclei {
                Some(flag) => flag,
                None => this.workspace.is_geometry_frozen()?,
            };
            let command = options.command_line(
                this.commands.base(CommandFamily::NumForce),
                ri,
                frznuclei,
            );

            let (mut report, outcome) = this.supervise(CommandFamily::NumForce, &command)?;

            if outcome.text.contains(MISSING_GRADIENT_MARKER) {
                this.say("Gradient is missing.  Running rdgrad.")?;
                let gradient = this.commands.base(CommandFamily::Gradient);
                this.run_simple(CommandFamily::Gradient, gradient)?;

                this.say(&format!("Re-submitting command {}", command))?;
                let marker = CommandFamily::NumForce.abnormal_marker(&command);
                let resubmitted = this.execute(&command, &marker)?;
                report.attempts += 1;
                if !resubmitted.is_success() {
                    return Err(unknown_failure(
                        CommandFamily::NumForce,
                        &command,
                        report.attempts,
                        resubmitted,
                    ));
                }
            }

            this.say(&format!("{} has successfully finished.", command.program_name()))?;
            Ok(report)
        })
    }

    /// Rolls the workspace back to zero-based `step`.
    pub fn rollback(&mut self, step: usize) -> Result<()> {
        self.guarded(|this| this.rollback_inner(step))
    }

    fn guarded<T>(&mut self, request: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if let Some(reason) = &self.aborted {
            return Err(OrchestratorError::SessionAborted(reason.clone()));
        }
        let result = request(self);
        if let Err(e) = &result {
            self.abort(e);
        }
        result
    }

    fn abort(&mut self, error: &OrchestratorError) {
        let message = error.to_string();
        if let Err(log_err) = self.log.append(&message) {
            warn!("Could not log terminal failure: {}", log_err);
        }
        self.aborted = Some(message);
    }

    fn pre_rollback(&mut self, rollback: Option<usize>) -> Result<()> {
        match rollback {
            Some(step) => self.rollback_inner(step),
            None => Ok(()),
        }
    }

    fn rollback_inner(&mut self, step: usize) -> Result<()> {
        rollback::rollback(&self.workspace, step)?;
        self.say(&format!("System has been rolled back to configuration {}", step))
    }

    /// Supervised run followed by the success message.
    fn run_simple(&mut self, family: CommandFamily, command: CommandLine) -> Result<RunReport> {
        let (report, _) = self.supervise(family, &command)?;
        self.say(&format!("{} has successfully finished", command.program_name()))?;
        Ok(report)
    }

    /// The bounded retry loop; returns the report and the last successful outcome.
    fn supervise(
        &mut self,
        family: CommandFamily,
        command: &CommandLine,
    ) -> Result<(RunReport, CommandOutcome)> {
        let marker = family.abnormal_marker(command);
        let mut report = RunReport::new(family, command);

        self.say(&format!("Submitting command {}", command))?;
        let mut outcome = self.execute(command, &marker)?;
        report.attempts += 1;

        let mut tries = 1;
        while !outcome.is_success() {
            if tries > self.numtries {
                return Err(unknown_failure(family, command, report.attempts, outcome));
            }

            self.recover()?;
            report.recoveries += 1;

            self.say(&format!("Re-attempting {}", command))?;
            outcome = self.execute(command, &marker)?;
            report.attempts += 1;

            let chain = family.escalation();
            if !outcome.is_success() && !chain.is_empty() {
                let names: Vec<String> = chain.iter().map(|f| f.to_string()).collect();
                self.say(&format!(
                    "{} didn't work.  Trying {}.",
                    self.commands.recovery(),
                    names.join(" -> ")
                ))?;
                for next in chain {
                    let next_command = self.commands.base(*next);
                    self.run_simple(*next, next_command)?;
                }
                report.escalations += 1;
            }

            tries += 1;
        }

        Ok((report, outcome))
    }

    fn recover(&mut self) -> Result<()> {
        let recovery = self.commands.recovery();
        self.say(&format!(
            "Abnormal termination detected.  Attempting {}.",
            recovery
        ))?;
        let text = self.runner.run(&recovery, self.workspace.dir())?;
        self.log.append(text.trim_end())?;
        Ok(())
    }

    fn execute(&mut self, command: &CommandLine, marker: &str) -> Result<CommandOutcome> {
        let text = self.runner.run(command, self.workspace.dir())?;
        if self.echo_output {
            println!("{}", text);
        }
        let outcome = CommandOutcome::classify(text, marker);
        debug!("{} -> {:?}", command, outcome.classification);
        Ok(outcome)
    }

    fn say(&mut self, message: &str) -> Result<()> {
        self.log.record(message)?;
        Ok(())
    }
}
