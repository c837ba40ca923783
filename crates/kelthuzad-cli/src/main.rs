use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use kelthuzad_core::{Config, PartialConfig, ShutdownHandle, Supervisor, TracingNotifier};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

/// Monitor a log or stdout, kill a sick process and respawn a healthy one.
#[derive(Debug, Parser)]
#[command(name = "kelthuzad", version)]
struct Args {
	/// The path of the log to tail (omit to monitor the command's stdout)
	#[arg(short = 'p', long = "path", value_name = "FILE")]
	path: Option<PathBuf>,

	/// The command to spawn and respawn
	#[arg(short = 'c', long = "command", value_name = "CMD")]
	command: Option<String>,

	/// The regex pattern that marks a failure
	#[arg(short = 'r', long = "regex", value_name = "PATTERN")]
	regex: Option<String>,

	/// Also report lines that do not match
	#[arg(short = 'v', long = "verbose")]
	verbose: bool,

	/// Seconds to wait after a failure before respawning [default: 5]
	#[arg(short = 'd', long = "delay", value_name = "SECS")]
	delay: Option<u64>,

	/// Send SIGKILL if the process group survives SIGTERM this long
	#[arg(long = "kill-timeout", value_name = "SECS")]
	kill_timeout: Option<u64>,

	/// Treat the end of the command's stdout as a failure (stdout mode only)
	#[arg(long = "respawn-on-exit")]
	respawn_on_exit: bool,

	/// How often a tailed log is checked for new lines [default: 250]
	#[arg(long = "poll-interval-ms", value_name = "MS")]
	poll_interval_ms: Option<u64>,

	/// TOML file with any of the options above; flags take precedence
	#[arg(long = "config", value_name = "FILE")]
	config: Option<PathBuf>,
}

impl Args {
	fn overrides(&self) -> PartialConfig {
		PartialConfig {
			command: self.command.clone(),
			path: self.path.clone(),
			regex: self.regex.clone(),
			verbose: self.verbose.then_some(true),
			delay: self.delay,
			kill_timeout: self.kill_timeout,
			respawn_on_exit: self.respawn_on_exit.then_some(true),
			poll_interval_ms: self.poll_interval_ms,
		}
	}

	fn resolve(&self) -> kelthuzad_core::Result<Config> {
		let base = match &self.config {
			Some(path) => PartialConfig::load(path)?,
			None => PartialConfig::default(),
		};
		base.merge(self.overrides()).build()
	}
}

#[tokio::main]
async fn main() -> ExitCode {
	let args = Args::parse();

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_target(false)
		.init();

	let config = match args.resolve() {
		Ok(c) => c,
		Err(e) => return fatal(&e),
	};

	let (mut supervisor, shutdown) = match Supervisor::new(config, Arc::new(TracingNotifier)) {
		Ok(s) => s,
		Err(e) => return fatal(&e),
	};

	tokio::spawn(forward_interrupt(shutdown));

	match supervisor.run().await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => fatal(&e),
	}
}

/// Turns the first SIGINT or SIGTERM into a shutdown request.
async fn forward_interrupt(shutdown: ShutdownHandle) {
	use tokio::signal::unix::{signal, SignalKind};

	match signal(SignalKind::terminate()) {
		Ok(mut term) => {
			tokio::select! {
				_ = tokio::signal::ctrl_c() => {},
				_ = term.recv() => {},
			}
		}
		Err(e) => {
			tracing::warn!("cannot listen for SIGTERM: {}", e);
			let _ = tokio::signal::ctrl_c().await;
		}
	}
	shutdown.request_shutdown();
}

fn fatal(err: &kelthuzad_core::Error) -> ExitCode {
	tracing::error!("{}", err);
	eprintln!("{} {}", "error:".red().bold(), err);
	ExitCode::FAILURE
}
