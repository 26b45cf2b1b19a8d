//! Per-workspace session log.
//!
//! Every orchestration message is printed and appended to a plain text log
//! inside the workspace (`turbohistory.log` by default). The first message of
//! a session writes a delimiter line `-- LOG -- <n>`, where `n` is one more
//! than the number of delimiters already present, so successive sessions on
//! the same workspace stay distinguishable.
//!
//! The file is opened, appended and closed for each write; no handle is held
//! between messages.

use log::debug;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default log file name inside a workspace.
pub const DEFAULT_HISTORY_FILE: &str = "turbohistory.log";
/// Prefix of the session delimiter line.
pub const SESSION_DELIMITER: &str = "-- LOG --";

/// Append-only log of one orchestration session.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    session: Option<usize>,
    echo: bool,
}

impl SessionLog {
    /// Creates a log writing to `path`; nothing touches the disk until the first message.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            session: None,
            echo: true,
        }
    }

    /// Log placed in `dir` under `file_name`.
    pub fn in_dir(dir: &Path, file_name: &str) -> Self {
        Self::new(dir.join(file_name))
    }

    /// Disables printing to stdout; messages still reach the file.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Session number, once the delimiter has been written.
    pub fn session(&self) -> Option<usize> {
        self.session
    }

    /// Prints `message` and appends it to the log.
    pub fn record(&mut self, message: &str) -> std::io::Result<()> {
        if self.echo {
            println!("{}", message);
        }
        self.append(message)
    }

    /// Appends `message` to the log without printing it.
    pub fn append(&mut self, message: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.session.is_none() {
            let number = self.count_sessions()? + 1;
            writeln!(file, "\n{} {}", SESSION_DELIMITER, number)?;
            debug!("Opened session {} in {}", number, self.path.display());
            self.session = Some(number);
        }

        writeln!(file, "{}", message.trim_end_matches('\n'))
    }

    fn count_sessions(&self) -> std::io::Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .filter(|line| line.contains(SESSION_DELIMITER))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_session_header() {
        let temp_dir = TempDir::new().unwrap();
        let mut log = SessionLog::in_dir(temp_dir.path(), DEFAULT_HISTORY_FILE).quiet();
        log.record("Submitting ridft command").unwrap();
        log.record("ridft has successfully finished").unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(
            content,
            "\n-- LOG -- 1\nSubmitting ridft command\nridft has successfully finished\n"
        );
        assert_eq!(log.session(), Some(1));
    }

    #[test]
    fn test_sessions_increment() {
        let temp_dir = TempDir::new().unwrap();
        for _ in 0..2 {
            let mut log = SessionLog::in_dir(temp_dir.path(), DEFAULT_HISTORY_FILE).quiet();
            log.record("message").unwrap();
        }
        let mut log = SessionLog::in_dir(temp_dir.path(), DEFAULT_HISTORY_FILE).quiet();
        log.append("third").unwrap();
        assert_eq!(log.session(), Some(3));

        let content = fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("-- LOG -- 3\nthird\n"));
    }

    #[test]
    fn test_no_file_before_first_message() {
        let temp_dir = TempDir::new().unwrap();
        let log = SessionLog::in_dir(temp_dir.path(), DEFAULT_HISTORY_FILE);
        assert!(!log.path().exists());
    }
}
