//! External command execution.
//!
//! The [`CommandRunner`] trait is the seam between the orchestrator and the
//! Turbomole executables. [`ShellRunner`] is the production implementation:
//! it runs one command at a time through `sh -c` inside the workspace
//! directory, merges standard error into standard output and blocks until the
//! child exits.
//!
//! The shell only sets up the redirection. Program and arguments are passed
//! as positional parameters and never parsed by the shell, so paths with
//! spaces or shell metacharacters reach the program unchanged.
//!
//! Turbomole reports failures in its output text rather than through the exit
//! status, so a non-zero status is logged but not treated as an error here.
//! Classification happens in the orchestrator.
//!
//! No timeout is applied: `jobex` and `NumForce` legitimately run for days.

use log::{debug, warn};
use std::fmt;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error type for command execution.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The shell could not be started
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        /// Rendered command line
        command: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },
}

/// Type alias for runner results
pub type Result<T> = std::result::Result<T, RunnerError>;

/// A program with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Command without arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Parses a configured command such as `actual -r` into program and arguments.
    pub fn parse(text: &str) -> Self {
        let mut parts = text.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            args: parts.collect(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name or path.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Base name of the program, e.g. `ridft` for `/opt/turbomole/bin/ridft`.
    pub fn program_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.program)
    }

    /// Arguments in order.
    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

/// Renders the command as a shell would need it typed; words with special
/// characters are single-quoted.
impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=+,:@%^".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

/// Script run by the shell: merge stderr, then replace the shell with
/// `$0 "$@"`, the program and its arguments.
const EXEC_SCRIPT: &str = "exec 2>&1; exec \"$0\" \"$@\"";

/// Executes external commands synchronously.
pub trait CommandRunner {
    /// Runs `command` with `workdir` as working directory and returns the
    /// complete combined stdout/stderr text once the process has exited.
    fn run(&self, command: &CommandLine, workdir: &Path) -> Result<String>;
}

/// Runs commands through a POSIX shell.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    /// Runner using `shell` (e.g. `sh`, `/bin/bash`).
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &CommandLine, workdir: &Path) -> Result<String> {
        debug!("Running '{}' in {}", command, workdir.display());

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(EXEC_SCRIPT)
            .arg(command.program())
            .args(command.arguments())
            .current_dir(workdir)
            .output()
            .map_err(|source| RunnerError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !output.status.success() {
            warn!("'{}' exited with {}", command, output.status);
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        // Anything the shell wrote before the redirection took effect
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}
