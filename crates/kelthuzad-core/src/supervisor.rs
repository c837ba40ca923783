use std::sync::Arc;
use tokio::sync::watch;

use crate::config::{Config, Monitor};
use crate::detector::FailureDetector;
use crate::error::Result;
use crate::notify::Notifier;
use crate::process::ProcessHandle;
use crate::source::LineSource;
use crate::types::{Classification, Event, Terminate};

/// Requests a graceful stop of a running [`Supervisor`] from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
	tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
	/// Idempotent: only the first call has an effect on the loop.
	pub fn request_shutdown(&self) {
		self.tx.send_replace(true);
	}

	pub fn is_requested(&self) -> bool {
		*self.tx.borrow()
	}
}

/// Owns the current child, its line source, and the detect-react loop.
///
/// Shutdown requests arrive through a watch channel and are merged with line
/// arrival and cooldown expiry in a single `select!`, so the current
/// [`ProcessHandle`] is only ever touched by the loop itself.
pub struct Supervisor {
	config: Config,
	detector: FailureDetector,
	notifier: Arc<dyn Notifier>,
	current: Option<ProcessHandle>,
	source: Option<LineSource>,
	shutdown: watch::Receiver<bool>,
	respawns: u64,
}

enum Step {
	Shutdown,
	Line(String),
	Closed,
}

impl Supervisor {
	/// Validates the configuration and compiles the pattern. Nothing is spawned yet.
	pub fn new(config: Config, notifier: Arc<dyn Notifier>) -> Result<(Self, ShutdownHandle)> {
		config.validate()?;
		let detector = FailureDetector::new(&config.pattern)?;
		let (tx, rx) = watch::channel(false);

		let supervisor = Self {
			config,
			detector,
			notifier,
			current: None,
			source: None,
			shutdown: rx,
			respawns: 0,
		};
		Ok((supervisor, ShutdownHandle { tx: Arc::new(tx) }))
	}

	pub fn current_pid(&self) -> Option<u32> {
		self.current.as_ref().map(|p| p.pid())
	}

	pub fn respawn_count(&self) -> u64 {
		self.respawns
	}

	/// Opens the tailed file (file mode) and spawns the first child.
	///
	/// The file is opened before spawning so nothing the child logs right
	/// after launch is missed, and a bad path fails before anything runs.
	pub async fn start(&mut self) -> Result<()> {
		if self.current.is_some() {
			return Ok(());
		}
		match &self.config.monitor {
			Monitor::File(path) => {
				self.notifier.notify(Event::MonitoringLog);
				self.source = Some(LineSource::tail(path, self.config.poll_interval).await?);
			}
			Monitor::Stdout => self.notifier.notify(Event::MonitoringStdout),
		}
		self.spawn()
	}

	/// Runs until shutdown is requested. Returns an error only for fatal
	/// conditions; the caller is expected to exit the process either way.
	pub async fn run(&mut self) -> Result<()> {
		if *self.shutdown.borrow() {
			self.notifier.notify(Event::ShutdownRequested);
			return Ok(());
		}
		self.start().await?;

		loop {
			let step = tokio::select! {
				biased;
				_ = shutdown_requested(&mut self.shutdown) => Step::Shutdown,
				line = next_line(&mut self.source) => match line? {
					Some(line) => Step::Line(line),
					None => Step::Closed,
				},
			};

			match step {
				Step::Shutdown => return self.stop().await,
				Step::Line(line) => match self.detector.classify(&line) {
					Classification::Match => {
						self.notifier.notify(Event::Failure {
							line,
							pattern: self.detector.pattern().to_string(),
						});
						if !self.recover().await? {
							return self.stop().await;
						}
					}
					Classification::NoMatch => {
						if self.config.verbose {
							self.notifier.notify(Event::Line(line));
						}
					}
				},
				Step::Closed => {
					// Only process output ends. Drop the dead source so the
					// loop blocks on shutdown instead of re-reading EOF.
					self.source = None;
					if let Some(pid) = self.current_pid() {
						self.notifier.notify(Event::OutputClosed { pid });
					}
					if self.config.respawn_on_exit && !self.recover().await? {
						return self.stop().await;
					}
				}
			}
		}
	}

	/// Cooldown, then terminate and replace the child. Returns `false` if
	/// shutdown arrived during the cooldown; nothing is respawned then.
	async fn recover(&mut self) -> Result<bool> {
		let delay = self.config.delay;
		self.notifier.notify(Event::Waiting { secs: delay.as_secs() });

		tokio::select! {
			biased;
			_ = shutdown_requested(&mut self.shutdown) => return Ok(false),
			_ = tokio::time::sleep(delay) => {}
		}

		self.respawn()?;
		Ok(true)
	}

	fn respawn(&mut self) -> Result<()> {
		if let Some(mut old) = self.current.take() {
			let pid = old.pid();
			match old.terminate() {
				Ok(Terminate::Signaled) => self.notifier.notify(Event::Terminated { pid }),
				Ok(_) => {}
				// The child may already be gone; keep supervising.
				Err(e) => self.notifier.notify(Event::TerminateFailed {
					pid,
					reason: e.to_string(),
				}),
			}
		}
		self.spawn()?;
		self.respawns += 1;
		Ok(())
	}

	fn spawn(&mut self) -> Result<()> {
		let mut handle = ProcessHandle::start(&self.config, Arc::clone(&self.notifier))?;
		if self.config.monitor == Monitor::Stdout {
			let pid = handle.pid();
			self.source = handle
				.take_stdout()
				.map(|stdout| LineSource::process_output(pid, stdout));
		}
		self.current = Some(handle);
		Ok(())
	}

	/// Terminates the current child and, with a kill timeout, stays until the
	/// group is gone or has been sent SIGKILL. Nothing outlives the caller.
	async fn stop(&mut self) -> Result<()> {
		self.notifier.notify(Event::ShutdownRequested);
		self.source = None;
		if let Some(mut handle) = self.current.take() {
			if handle.terminate()? == Terminate::Signaled {
				self.notifier.notify(Event::Terminated { pid: handle.pid() });
			}
			handle.wait_terminated().await;
		}
		Ok(())
	}
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
	if rx.wait_for(|requested| *requested).await.is_err() {
		// Every handle was dropped without asking; shutdown can no longer arrive.
		std::future::pending::<()>().await;
	}
}

async fn next_line(source: &mut Option<LineSource>) -> Result<Option<String>> {
	match source {
		Some(source) => source.next_line().await,
		None => std::future::pending().await,
	}
}
