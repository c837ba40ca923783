use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Where failure lines come from. Fixed for the lifetime of a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Monitor {
	File(PathBuf),
	Stdout,
}

impl Monitor {
	/// An absent or empty path selects stdout monitoring.
	pub fn from_path(path: Option<PathBuf>) -> Self {
		match path {
			Some(p) if !p.as_os_str().is_empty() => Monitor::File(p),
			_ => Monitor::Stdout,
		}
	}
}

#[derive(Debug, Clone)]
pub struct Config {
	pub command: String,
	pub monitor: Monitor,
	pub pattern: String,
	pub verbose: bool,
	pub delay: Duration,
	pub kill_timeout: Option<Duration>,
	pub respawn_on_exit: bool,
	pub poll_interval: Duration,
}

impl Config {
	/// Stdout monitoring with every optional knob at its default.
	pub fn new(command: impl Into<String>, pattern: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			monitor: Monitor::Stdout,
			pattern: pattern.into(),
			verbose: false,
			delay: Duration::from_secs(default_delay()),
			kill_timeout: None,
			respawn_on_exit: false,
			poll_interval: Duration::from_millis(default_poll_interval_ms()),
		}
	}

	/// Splits the command with shell-word rules; the first word is the executable.
	pub fn command_argv(&self) -> Result<Vec<String>> {
		let argv = shlex::split(&self.command)
			.ok_or_else(|| Error::Config(format!("cannot parse command {:?}", self.command)))?;
		if argv.is_empty() {
			return Err(Error::Config("command is empty".to_string()));
		}
		Ok(argv)
	}

	pub fn validate(&self) -> Result<()> {
		self.command_argv()?;
		if self.poll_interval.is_zero() {
			return Err(Error::Config("poll interval must be positive".to_string()));
		}
		Ok(())
	}
}

/// Configuration as read from a TOML file or the command line, before
/// defaults are applied. Later layers win in [`PartialConfig::merge`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialConfig {
	pub command: Option<String>,
	pub path: Option<PathBuf>,
	pub regex: Option<String>,
	pub verbose: Option<bool>,
	pub delay: Option<u64>,
	pub kill_timeout: Option<u64>,
	pub respawn_on_exit: Option<bool>,
	pub poll_interval_ms: Option<u64>,
}

fn default_delay() -> u64 {
	5
}
fn default_poll_interval_ms() -> u64 {
	250
}

impl PartialConfig {
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
		Self::parse(&content)
			.map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
	}

	pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
		toml::from_str(content)
	}

	pub fn merge(self, over: PartialConfig) -> PartialConfig {
		PartialConfig {
			command: over.command.or(self.command),
			path: over.path.or(self.path),
			regex: over.regex.or(self.regex),
			verbose: over.verbose.or(self.verbose),
			delay: over.delay.or(self.delay),
			kill_timeout: over.kill_timeout.or(self.kill_timeout),
			respawn_on_exit: over.respawn_on_exit.or(self.respawn_on_exit),
			poll_interval_ms: over.poll_interval_ms.or(self.poll_interval_ms),
		}
	}

	pub fn build(self) -> Result<Config> {
		let command = self
			.command
			.ok_or_else(|| Error::Config("a command is required (--command)".to_string()))?;
		let pattern = self
			.regex
			.ok_or_else(|| Error::Config("a regex pattern is required (--regex)".to_string()))?;

		let config = Config {
			command,
			monitor: Monitor::from_path(self.path),
			pattern,
			verbose: self.verbose.unwrap_or(false),
			delay: Duration::from_secs(self.delay.unwrap_or_else(default_delay)),
			kill_timeout: self.kill_timeout.map(Duration::from_secs),
			respawn_on_exit: self.respawn_on_exit.unwrap_or(false),
			poll_interval: Duration::from_millis(
				self.poll_interval_ms.unwrap_or_else(default_poll_interval_ms),
			),
		};
		config.validate()?;
		Ok(config)
	}
}
