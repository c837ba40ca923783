use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("invalid regex pattern {pattern:?}: {source}")]
	Pattern {
		pattern: String,
		#[source]
		source: regex::Error,
	},

	#[error("failed to spawn {command:?}: {source}")]
	Spawn {
		command: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to open log {}: {source}", .path.display())]
	OpenLog {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to read log {}: {source}", .path.display())]
	ReadLog {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("cannot signal process group of pid {pid}: {source}")]
	ProcessGroup {
		pid: u32,
		#[source]
		source: nix::errno::Errno,
	},

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
