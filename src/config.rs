//! Configuration for pty-relay
//!
//! Settings are resolved with the precedence CLI > environment > config file
//! > defaults. The config file lives at `$XDG_CONFIG_HOME/pty-relay/config.toml`
//! unless `--config` points somewhere else.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::pty::WindowSize;
use crate::relay::{RelaySettings, DEFAULT_CHUNK_SIZE, DEFAULT_POLL_TIMEOUT};

/// Prefix of the environment variables read by [`Config::apply_env`]
const ENV_PREFIX: &str = "PTY_RELAY_";

const POLL_TIMEOUT_RANGE_MS: (u64, u64) = (1, 10_000);
const CHUNK_SIZE_RANGE: (usize, usize) = (64, 1024 * 1024);

/// CLI arguments for pty-relay
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "pty-relay")]
#[command(version)]
#[command(
    about = "Run a command attached to a pseudo-terminal and relay its output to stdout",
    long_about = None
)]
pub struct CliArgs {
    /// Path to custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Terminal width given to the child
    #[arg(long, value_name = "COLS")]
    pub cols: Option<u16>,

    /// Terminal height given to the child
    #[arg(long, value_name = "ROWS")]
    pub rows: Option<u16>,

    /// Upper bound on each wait for child output, in milliseconds
    #[arg(long, value_name = "MS")]
    pub poll_timeout_ms: Option<u64>,

    /// Maximum bytes read from the terminal at a time
    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<usize>,

    /// TERM value for the child (default: inherited, else xterm-256color)
    #[arg(long, value_name = "TERM")]
    pub term: Option<String>,

    /// Command to run, followed by its arguments
    #[arg(value_name = "COMMAND", trailing_var_arg = true)]
    pub command: Vec<OsString>,
}

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on each wait for child output, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Maximum bytes read from the terminal at a time
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// TERM for the child (None = inherit, falling back to xterm-256color)
    #[serde(default)]
    pub term: Option<String>,

    /// Terminal dimensions (columns, rows); None = size of our own terminal
    #[serde(default)]
    pub dimensions: Option<(u16, u16)>,
}

fn default_poll_timeout_ms() -> u64 {
    DEFAULT_POLL_TIMEOUT.as_millis() as u64
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            chunk_size: default_chunk_size(),
            term: None,
            dimensions: None,
        }
    }
}

/// Configuration error
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
    pub field: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "Config error in '{}': {}", field, self.message)
        } else {
            write!(f, "Config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration with full precedence:
    /// CLI args > environment variables > config file > defaults
    pub fn load_with_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            // An explicitly requested file must exist and parse
            Some(path) => Self::load_from_file(path)?,
            None => Self::default_config_path()
                .filter(|path| path.exists())
                .map(|path| {
                    Self::load_from_file(&path).unwrap_or_else(|e| {
                        tracing::warn!("Ignoring config file {:?}: {}", path, e);
                        Config::default()
                    })
                })
                .unwrap_or_default(),
        };

        config.apply_env(|key| env::var(key).ok());
        config.apply_cli_args(args);
        config.validate()?;

        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("Failed to read config file {:?}: {}", path, e),
            field: None,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError {
            message: format!("Failed to parse config file {:?}: {}", path, e),
            field: None,
        })
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pty-relay").join("config.toml"))
    }

    /// Apply `PTY_RELAY_*` variables, looked up through `lookup`
    ///
    /// Values that do not parse are logged and skipped.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(val) = var("POLL_TIMEOUT_MS") {
            match val.parse() {
                Ok(ms) => self.poll_timeout_ms = ms,
                Err(_) => tracing::warn!("Ignoring invalid {}POLL_TIMEOUT_MS={:?}", ENV_PREFIX, val),
            }
        }
        if let Some(val) = var("CHUNK_SIZE") {
            match val.parse() {
                Ok(size) => self.chunk_size = size,
                Err(_) => tracing::warn!("Ignoring invalid {}CHUNK_SIZE={:?}", ENV_PREFIX, val),
            }
        }
        if let Some(val) = var("TERM") {
            self.term = Some(val);
        }

        let dimension = |name: &str| {
            var(name).and_then(|val| match val.parse::<u16>() {
                Ok(n) => Some(n),
                Err(_) => {
                    tracing::warn!("Ignoring invalid {}{}={:?}", ENV_PREFIX, name, val);
                    None
                },
            })
        };
        let cols = dimension("COLS");
        let rows = dimension("ROWS");
        self.merge_dimensions(cols, rows);
    }

    /// Apply CLI arguments to config
    fn apply_cli_args(&mut self, args: &CliArgs) {
        if let Some(ms) = args.poll_timeout_ms {
            self.poll_timeout_ms = ms;
        }
        if let Some(size) = args.chunk_size {
            self.chunk_size = size;
        }
        if let Some(term) = &args.term {
            self.term = Some(term.clone());
        }
        self.merge_dimensions(args.cols, args.rows);
    }

    /// Override one or both dimensions, filling the other from the current value
    fn merge_dimensions(&mut self, cols: Option<u16>, rows: Option<u16>) {
        if cols.is_none() && rows.is_none() {
            return;
        }
        let (base_cols, base_rows) = self.dimensions.unwrap_or_else(|| {
            let size = WindowSize::default();
            (size.cols, size.rows)
        });
        self.dimensions = Some((cols.unwrap_or(base_cols), rows.unwrap_or(base_rows)));
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), ConfigError> {
        let (min_ms, max_ms) = POLL_TIMEOUT_RANGE_MS;
        if !(min_ms..=max_ms).contains(&self.poll_timeout_ms) {
            return Err(ConfigError {
                message: format!("Poll timeout must be between {} and {} ms", min_ms, max_ms),
                field: Some("poll_timeout_ms".to_string()),
            });
        }

        let (min_chunk, max_chunk) = CHUNK_SIZE_RANGE;
        if !(min_chunk..=max_chunk).contains(&self.chunk_size) {
            return Err(ConfigError {
                message: format!(
                    "Chunk size must be between {} and {} bytes",
                    min_chunk, max_chunk
                ),
                field: Some("chunk_size".to_string()),
            });
        }

        if let Some((cols, rows)) = self.dimensions {
            if cols == 0 || rows == 0 {
                return Err(ConfigError {
                    message: "Terminal columns and rows must be at least 1".to_string(),
                    field: Some("dimensions".to_string()),
                });
            }
        }

        if let Some(term) = &self.term {
            if term.is_empty() || term.contains('\0') {
                return Err(ConfigError {
                    message: format!("Invalid TERM value {:?}", term),
                    field: Some("term".to_string()),
                });
            }
        }

        Ok(())
    }

    /// Settings for the relay loop
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            chunk_size: self.chunk_size,
        }
    }

    /// Window size for the child's terminal
    ///
    /// Configured dimensions win; otherwise our own stdout's terminal size is
    /// mirrored, and 80x24 is used when stdout is not a terminal.
    pub fn window_size(&self) -> WindowSize {
        match self.dimensions {
            Some((cols, rows)) => WindowSize::new(cols, rows),
            None => WindowSize::from_terminal(nix::libc::STDOUT_FILENO).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes()).expect("Failed to write config");
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_timeout_ms, 100);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.term, None);
        assert_eq!(config.dimensions, None);
        assert!(config.validate().is_ok());
        assert_eq!(config.relay_settings(), RelaySettings::default());
    }

    #[test]
    fn test_config_toml_parsing() {
        let toml_str = r#"
            poll_timeout_ms = 250
            term = "vt100"
            dimensions = [132, 50]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.poll_timeout_ms, 250);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.term.as_deref(), Some("vt100"));
        assert_eq!(config.dimensions, Some((132, 50)));
        assert_eq!(config.window_size(), WindowSize::new(132, 50));
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config("chunk_size = 8192\n");
        let config = Config::load_from_file(file.path()).expect("Failed to load");
        assert_eq!(config.chunk_size, 8192);

        let broken = write_config("chunk_size = \"lots\"\n");
        assert!(Config::load_from_file(broken.path()).is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let args = CliArgs {
            config: Some(dir.path().join("missing.toml")),
            ..CliArgs::default()
        };
        assert!(Config::load_with_args(&args).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(lookup(&[
            ("PTY_RELAY_POLL_TIMEOUT_MS", "50"),
            ("PTY_RELAY_CHUNK_SIZE", "not-a-number"),
            ("PTY_RELAY_TERM", "screen"),
            ("PTY_RELAY_ROWS", "60"),
        ]));
        assert_eq!(config.poll_timeout_ms, 50);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.term.as_deref(), Some("screen"));
        assert_eq!(config.dimensions, Some((80, 60)));
    }

    #[test]
    fn test_env_invalid_dimensions_skipped() {
        let mut config = Config::default();
        config.apply_env(lookup(&[("PTY_RELAY_COLS", "wide"), ("PTY_RELAY_ROWS", "70000")]));
        assert_eq!(config.dimensions, None);

        config.apply_env(lookup(&[("PTY_RELAY_COLS", "-3"), ("PTY_RELAY_ROWS", "30")]));
        assert_eq!(config.dimensions, Some((80, 30)));
    }

    #[test]
    fn test_precedence_cli_over_env_over_file() {
        let file = write_config("poll_timeout_ms = 300\nchunk_size = 1024\ndimensions = [100, 30]\n");
        let mut config = Config::load_from_file(file.path()).expect("Failed to load");

        config.apply_env(lookup(&[
            ("PTY_RELAY_POLL_TIMEOUT_MS", "200"),
            ("PTY_RELAY_COLS", "90"),
        ]));
        assert_eq!(config.poll_timeout_ms, 200);
        assert_eq!(config.dimensions, Some((90, 30)));

        let args = CliArgs::try_parse_from(["pty-relay", "--poll-timeout-ms", "10", "--rows", "20", "true"])
            .expect("Failed to parse");
        config.apply_cli_args(&args);
        assert_eq!(config.poll_timeout_ms, 10);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.dimensions, Some((90, 20)));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.poll_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.poll_timeout_ms = 100;

        config.chunk_size = 16;
        assert!(config.validate().is_err());
        config.chunk_size = 4096;

        config.dimensions = Some((0, 24));
        assert!(config.validate().is_err());
        config.dimensions = None;

        config.term = Some(String::new());
        let err = config.validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("term"));
    }

    #[test]
    fn test_cli_trailing_command() {
        let args = CliArgs::try_parse_from([
            "pty-relay", "--cols", "100", "sh", "-c", "echo --rows", "--term",
        ])
        .expect("Failed to parse");
        assert_eq!(args.cols, Some(100));
        assert_eq!(args.rows, None);
        assert_eq!(args.term, None);
        assert_eq!(args.command, vec!["sh", "-c", "echo --rows", "--term"]);
    }

    #[test]
    fn test_cli_without_command() {
        let args = CliArgs::try_parse_from(["pty-relay"]).expect("Failed to parse");
        assert!(args.command.is_empty());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError {
            message: "bad".to_string(),
            field: Some("chunk_size".to_string()),
        };
        assert_eq!(err.to_string(), "Config error in 'chunk_size': bad");
    }
}
