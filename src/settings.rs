//! Configuration management for turborecover.
//!
//! Settings are read from INI files with the following precedence:
//!
//! 1. Local configuration (`./turborecover.cfg`)
//! 2. User configuration (`~/.config/turborecover/turborecover.cfg`)
//! 3. System configuration (`/etc/turborecover/turborecover.cfg`)
//! 4. Built-in defaults
//!
//! # Configuration File Format
//!
//! ```ini
//! [commands]
//! ridft = ridft
//! rdgrad = rdgrad
//! jobex = jobex
//! numforce = NumForce
//! recovery = actual -r
//!
//! [retry]
//! numtries = 2
//!
//! [general]
//! echo_output = true
//! history_file = turbohistory.log
//!
//! [logging]
//! level = info
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use turborecover::settings::SettingsManager;
//!
//! let settings = SettingsManager::load()?;
//! println!("Retry bound: {}", settings.retry().numtries);
//! # Ok::<(), turborecover::settings::ConfigError>(())
//! ```

use crate::config::{Commands, DEFAULT_NUMTRIES};
use crate::history::DEFAULT_HISTORY_FILE;
use configparser::ini::Ini;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name searched in every configuration location.
pub const SETTINGS_FILE: &str = "turborecover.cfg";

/// Errors that can occur during configuration loading and processing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading configuration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Main configuration structure containing all program settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Turbomole executables and the recovery command
    pub commands: Commands,
    /// Retry policy
    pub retry: RetrySettings,
    /// General program settings
    pub general: GeneralSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Recovery iterations per request before giving up (default: 2)
    pub numtries: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            numtries: DEFAULT_NUMTRIES,
        }
    }
}

/// General program settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Print the captured output of every command (default: true)
    pub echo_output: bool,
    /// Session log file name inside the workspace (default: "turbohistory.log")
    pub history_file: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            echo_output: true,
            history_file: DEFAULT_HISTORY_FILE.to_string(),
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (default: "info")
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingSettings {
    /// Parsed level filter; unknown names fall back to `Info`.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// Configuration manager that handles loading and accessing program settings.
pub struct SettingsManager {
    settings: Settings,
    config_source: String,
}

impl SettingsManager {
    /// Loads configuration from the first available locations, merged by precedence.
    pub fn load() -> Result<Self, ConfigError> {
        let (settings, source) = Self::load_from_files()?;
        info!("Configuration loaded from: {}", source);
        Ok(Self {
            settings,
            config_source: source,
        })
    }

    /// Loads a single configuration file on top of the defaults.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let settings = Self::load_config(path)?;
        Ok(Self {
            settings,
            config_source: format!("{}", path.display()),
        })
    }

    /// Returns the source of the loaded configuration.
    pub fn config_source(&self) -> &str {
        &self.config_source
    }

    /// Gets a reference to the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Gets the command settings.
    pub fn commands(&self) -> &Commands {
        &self.settings.commands
    }

    /// Gets the retry settings.
    pub fn retry(&self) -> &RetrySettings {
        &self.settings.retry
    }

    /// Gets the general settings.
    pub fn general(&self) -> &GeneralSettings {
        &self.settings.general
    }

    /// Gets the logging settings.
    pub fn logging(&self) -> &LoggingSettings {
        &self.settings.logging
    }

    fn load_from_files() -> Result<(Settings, String), ConfigError> {
        let mut settings = Settings::default();
        let mut config_source = "built-in defaults".to_string();

        let candidates = [
            ("system", Self::get_system_config_path()),
            ("user", Self::get_user_config_path()),
            ("local", Some(PathBuf::from(SETTINGS_FILE))),
        ];

        for (kind, path) in candidates {
            let Some(path) = path else { continue };
            if !path.exists() {
                continue;
            }
            match Self::load_config(&path) {
                Ok(loaded) => {
                    settings = loaded;
                    config_source = format!("{} config ({})", kind, path.display());
                    debug!("Loaded {} configuration from: {}", kind, path.display());
                }
                Err(e) => {
                    warn!("Failed to load {} config from {}: {}", kind, path.display(), e);
                }
            }
        }

        Ok((settings, config_source))
    }

    /// Loads configuration from a single INI file; missing keys keep defaults.
    fn load_config(path: &Path) -> Result<Settings, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_config(content)
    }

    fn parse_config(content: String) -> Result<Settings, ConfigError> {
        // Keys stay case sensitive so `NumForce` survives as a value and key names are exact
        let mut ini = Ini::new_cs();
        ini.read(content)
            .map_err(|e| ConfigError::IniParse(format!("Failed to parse INI: {}", e)))?;

        let mut settings = Settings::default();
        let map = ini.get_map_ref();

        if let Some(section) = map.get("commands") {
            settings.commands = Self::parse_commands(section);
        }
        if let Some(section) = map.get("retry") {
            settings.retry = Self::parse_retry(section)?;
        }
        if let Some(section) = map.get("general") {
            settings.general = Self::parse_general(section)?;
        }
        if let Some(section) = map.get("logging") {
            settings.logging = Self::parse_logging(section);
        }

        Ok(settings)
    }

    fn parse_commands(section: &HashMap<String, Option<String>>) -> Commands {
        let mut commands = Commands::default();
        let fields = [
            ("ridft", &mut commands.ridft),
            ("rdgrad", &mut commands.rdgrad),
            ("jobex", &mut commands.jobex),
            ("numforce", &mut commands.numforce),
            ("recovery", &mut commands.recovery),
        ];
        for (key, field) in fields {
            if let Some(Some(value)) = section.get(key) {
                if !value.trim().is_empty() {
                    *field = value.trim().to_string();
                }
            }
        }
        commands
    }

    fn parse_retry(section: &HashMap<String, Option<String>>) -> Result<RetrySettings, ConfigError> {
        let mut retry = RetrySettings::default();
        if let Some(Some(numtries)) = section.get("numtries") {
            retry.numtries = numtries.trim().parse().map_err(|_| {
                ConfigError::InvalidValue(format!("Invalid numtries: {}", numtries))
            })?;
        }
        Ok(retry)
    }

    fn parse_general(
        section: &HashMap<String, Option<String>>,
    ) -> Result<GeneralSettings, ConfigError> {
        let mut general = GeneralSettings::default();
        if let Some(Some(echo_output)) = section.get("echo_output") {
            general.echo_output = echo_output.trim().parse().map_err(|_| {
                ConfigError::InvalidValue(format!("Invalid echo_output value: {}", echo_output))
            })?;
        }
        if let Some(Some(history_file)) = section.get("history_file") {
            let name = history_file.trim();
            if name.is_empty() || name.contains('/') {
                return Err(ConfigError::InvalidValue(format!(
                    "history_file must be a plain file name, got '{}'",
                    history_file
                )));
            }
            general.history_file = name.to_string();
        }
        Ok(general)
    }

    fn parse_logging(section: &HashMap<String, Option<String>>) -> LoggingSettings {
        let mut logging = LoggingSettings::default();
        if let Some(Some(level)) = section.get("level") {
            logging.level = level.trim().to_string();
        }
        logging
    }

    fn get_system_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            Some(PathBuf::from("/etc/turborecover").join(SETTINGS_FILE))
        }
        #[cfg(not(unix))]
        {
            std::env::var("PROGRAMDATA")
                .ok()
                .map(|pd| PathBuf::from(pd).join("turborecover").join(SETTINGS_FILE))
        }
    }

    fn get_user_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            std::env::var("HOME").ok().map(|home| {
                PathBuf::from(home)
                    .join(".config")
                    .join("turborecover")
                    .join(SETTINGS_FILE)
            })
        }
        #[cfg(not(unix))]
        {
            std::env::var("APPDATA")
                .ok()
                .map(|appdata| PathBuf::from(appdata).join("turborecover").join(SETTINGS_FILE))
        }
    }
}

impl SettingsManager {
    /// Writes a commented configuration template with every option at its default.
    pub fn create_template(path: &Path) -> Result<(), ConfigError> {
        fs::write(path, Self::generate_template_content())?;
        info!("Created settings template at: {}", path.display());
        Ok(())
    }

    fn generate_template_content() -> String {
        let defaults = Settings::default();
        format!(
            r#"# turborecover configuration file
#
# Files are read in this order, later ones replacing earlier ones:
#
# 1. /etc/turborecover/turborecover.cfg
# 2. ~/.config/turborecover/turborecover.cfg
# 3. ./turborecover.cfg
#
# Missing sections or keys use the defaults shown below.

[commands]
# Turbomole executables, with optional fixed arguments
ridft = {}
rdgrad = {}
jobex = {}
numforce = {}

# Restores the last checkpoint before a retry
recovery = {}

[retry]
# Recovery attempts per request before the session is aborted
numtries = {}

[general]
# Print the full output of every Turbomole command
echo_output = {}

# Session log inside the workspace
history_file = {}

[logging]
# debug, info, warn or error (RUST_LOG overrides this)
level = {}
"#,
            defaults.commands.ridft,
            defaults.commands.rdgrad,
            defaults.commands.jobex,
            defaults.commands.numforce,
            defaults.commands.recovery,
            defaults.retry.numtries,
            defaults.general.echo_output,
            defaults.general.history_file,
            defaults.logging.level,
        )
    }
}
