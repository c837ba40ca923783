use nix::sys::signal::{killpg, Signal};
use nix::unistd::{getpgid, Pid};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{Config, Monitor};
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::types::{Event, ProcessState, Terminate};

/// One supervised child and the process group it leads.
///
/// A watcher task owns the OS child and publishes its state; the handle only
/// reads that state and never waits on the child itself.
pub struct ProcessHandle {
	pid: u32,
	state: watch::Receiver<ProcessState>,
	stdout: Option<ChildStdout>,
	signaled: bool,
	kill_timeout: Option<Duration>,
	escalation: Option<JoinHandle<()>>,
}

const GROUP_POLL: Duration = Duration::from_millis(50);

impl ProcessHandle {
	/// Spawns `config.command` as the leader of a new process group.
	///
	/// stdout is piped only when monitoring stdout. Must be called inside a
	/// tokio runtime.
	pub fn start(config: &Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
		let argv = config.command_argv()?;
		let (state_tx, state_rx) = watch::channel(ProcessState::Starting);

		let stdout = match config.monitor {
			Monitor::Stdout => Stdio::piped(),
			Monitor::File(_) => Stdio::inherit(),
		};

		let mut cmd = Command::new(&argv[0]);
		cmd.args(&argv[1..])
			.stdin(Stdio::inherit())
			.stdout(stdout)
			.stderr(Stdio::inherit())
			.process_group(0);

		let mut child = cmd.spawn().map_err(|source| Error::Spawn {
			command: config.command.clone(),
			source,
		})?;

		let pid = child.id().ok_or_else(|| Error::Spawn {
			command: config.command.clone(),
			source: std::io::Error::other("process exited before its pid was read"),
		})?;

		state_tx.send_replace(ProcessState::Running { pid });
		notifier.notify(Event::Spawned { pid });

		let stdout = child.stdout.take();

		tokio::spawn(async move {
			let code = match child.wait().await {
				Ok(status) => status.code(),
				Err(e) => {
					tracing::warn!(pid, "wait failed: {}", e);
					None
				}
			};
			state_tx.send_replace(ProcessState::Exited { pid, code });
			notifier.notify(Event::Exited { pid, code });
		});

		Ok(Self {
			pid,
			state: state_rx,
			stdout,
			signaled: false,
			kill_timeout: config.kill_timeout,
			escalation: None,
		})
	}

	pub fn pid(&self) -> u32 {
		self.pid
	}

	pub fn state(&self) -> ProcessState {
		*self.state.borrow()
	}

	pub fn has_exited(&self) -> bool {
		self.state().has_exited()
	}

	/// Hands out the piped stdout once; later calls return `None`.
	pub fn take_stdout(&mut self) -> Option<ChildStdout> {
		self.stdout.take()
	}

	pub async fn wait_exited(&self) -> ProcessState {
		let mut state = self.state.clone();
		let exited = state.wait_for(|s| s.has_exited()).await.map(|s| *s);
		match exited {
			Ok(s) => s,
			Err(_) => *state.borrow(),
		}
	}

	/// Sends SIGTERM to the whole process group, at most once per handle.
	///
	/// Does not wait for the exit; the watcher task reports it. With a kill
	/// timeout, a task sends SIGKILL to any member of the group still alive
	/// once it expires; see [`ProcessHandle::wait_terminated`].
	pub fn terminate(&mut self) -> Result<Terminate> {
		if self.signaled {
			return Ok(Terminate::AlreadySignaled);
		}
		if self.has_exited() {
			return Ok(Terminate::AlreadyExited);
		}

		let pid = self.pid;
		let pgid = getpgid(Some(Pid::from_raw(pid as i32)))
			.map_err(|source| Error::ProcessGroup { pid, source })?;
		killpg(pgid, Signal::SIGTERM).map_err(|source| Error::ProcessGroup { pid, source })?;
		self.signaled = true;

		if let Some(timeout) = self.kill_timeout {
			self.escalation = Some(tokio::spawn(escalate(pid, pgid, timeout)));
		}

		Ok(Terminate::Signaled)
	}

	/// Resolves once a pending SIGKILL escalation has finished: the group is
	/// gone or has been sent SIGKILL. Returns at once without a kill timeout.
	pub async fn wait_terminated(&mut self) {
		if let Some(task) = self.escalation.take() {
			if let Err(e) = task.await {
				tracing::warn!(pid = self.pid, "kill escalation task failed: {}", e);
			}
		}
	}
}

async fn escalate(pid: u32, pgid: Pid, timeout: Duration) {
	let deadline = tokio::time::Instant::now() + timeout;
	// A null signal succeeds while any member of the group is alive.
	while killpg(pgid, None).is_ok() {
		if tokio::time::Instant::now() >= deadline {
			tracing::warn!(pid, "process group still alive after {:?}, sending SIGKILL", timeout);
			let _ = killpg(pgid, Signal::SIGKILL);
			return;
		}
		tokio::time::sleep(GROUP_POLL).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::notify::MemoryNotifier;

	fn file_mode(command: &str) -> Config {
		let mut config = Config::new(command, "x");
		config.monitor = Monitor::File(std::env::temp_dir().join("kelthuzad-unused.log"));
		config
	}

	// Zombies count as dead: nobody may reap a reparented grandchild in a container.
	fn is_alive(pid: i32) -> bool {
		if nix::sys::signal::kill(Pid::from_raw(pid), None).is_err() {
			return false;
		}
		match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
			Ok(stat) => !stat.contains(") Z "),
			Err(_) => true,
		}
	}

	#[tokio::test]
	async fn start_reports_spawn_and_exit() {
		let notifier = Arc::new(MemoryNotifier::new());
		let handle = ProcessHandle::start(&file_mode("true"), notifier.clone()).unwrap();
		let pid = handle.pid();

		let state = handle.wait_exited().await;
		assert_eq!(state, ProcessState::Exited { pid, code: Some(0) });
		assert!(handle.has_exited());

		tokio::time::sleep(Duration::from_millis(50)).await;
		let events = notifier.events();
		assert_eq!(events[0], Event::Spawned { pid });
		assert_eq!(events[1], Event::Exited { pid, code: Some(0) });
	}

	#[tokio::test]
	async fn missing_binary_is_a_spawn_error() {
		let notifier = Arc::new(MemoryNotifier::new());
		let result = ProcessHandle::start(
			&file_mode("/nonexistent/kelthuzad-no-such-binary"),
			notifier.clone(),
		);
		match result {
			Err(Error::Spawn { command, .. }) => {
				assert_eq!(command, "/nonexistent/kelthuzad-no-such-binary")
			}
			Err(e) => panic!("unexpected error: {}", e),
			Ok(_) => panic!("spawn should fail"),
		}
		assert!(notifier.events().is_empty());
	}

	#[tokio::test]
	async fn terminate_signals_group_once() {
		let notifier = Arc::new(MemoryNotifier::new());
		let mut handle = ProcessHandle::start(&file_mode("sleep 30"), notifier).unwrap();
		assert!(handle.state().is_running());

		assert_eq!(handle.terminate().unwrap(), Terminate::Signaled);
		assert_eq!(handle.terminate().unwrap(), Terminate::AlreadySignaled);

		let state = tokio::time::timeout(Duration::from_secs(5), handle.wait_exited())
			.await
			.unwrap();
		assert_eq!(state, ProcessState::Exited { pid: handle.pid(), code: None });
	}

	#[tokio::test]
	async fn terminate_reaches_descendants() {
		let notifier = Arc::new(MemoryNotifier::new());
		let pid_file = std::env::temp_dir().join(format!("kelthuzad-grandchild-{}", std::process::id()));
		let _ = std::fs::remove_file(&pid_file);
		let command = format!(
			"sh -c 'sleep 30 & echo $! > {}; wait'",
			pid_file.display()
		);
		let mut handle = ProcessHandle::start(&file_mode(&command), notifier).unwrap();

		let mut grandchild = None;
		for _ in 0..50 {
			if let Ok(text) = std::fs::read_to_string(&pid_file) {
				if let Ok(pid) = text.trim().parse::<i32>() {
					grandchild = Some(pid);
					break;
				}
			}
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		let grandchild = grandchild.expect("grandchild pid written");

		handle.terminate().unwrap();
		tokio::time::timeout(Duration::from_secs(5), handle.wait_exited())
			.await
			.unwrap();

		let mut gone = false;
		for _ in 0..50 {
			if !is_alive(grandchild) {
				gone = true;
				break;
			}
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		assert!(gone, "grandchild {} survived group SIGTERM", grandchild);
		let _ = std::fs::remove_file(&pid_file);
	}

	#[tokio::test]
	async fn terminate_after_exit_skips_lookup() {
		let notifier = Arc::new(MemoryNotifier::new());
		let mut handle = ProcessHandle::start(&file_mode("true"), notifier).unwrap();
		handle.wait_exited().await;
		assert_eq!(handle.terminate().unwrap(), Terminate::AlreadyExited);
	}

	#[tokio::test]
	async fn kill_timeout_escalates() {
		let notifier = Arc::new(MemoryNotifier::new());
		let mut config = file_mode("sh -c 'trap \"\" TERM; sleep 30'");
		config.kill_timeout = Some(Duration::from_millis(300));
		let mut handle = ProcessHandle::start(&config, notifier).unwrap();
		tokio::time::sleep(Duration::from_millis(100)).await;

		handle.terminate().unwrap();
		let state = tokio::time::timeout(Duration::from_secs(5), handle.wait_exited())
			.await
			.unwrap();
		assert!(state.has_exited());
	}

	#[tokio::test]
	async fn wait_terminated_returns_after_sigkill() {
		let notifier = Arc::new(MemoryNotifier::new());
		let mut config = file_mode("sh -c 'trap \"\" TERM; exec sleep 30'");
		config.kill_timeout = Some(Duration::from_millis(300));
		let mut handle = ProcessHandle::start(&config, notifier).unwrap();
		tokio::time::sleep(Duration::from_millis(100)).await;
		let pgid = Pid::from_raw(handle.pid() as i32);

		let started = std::time::Instant::now();
		assert_eq!(handle.terminate().unwrap(), Terminate::Signaled);
		handle.wait_terminated().await;
		assert!(started.elapsed() >= Duration::from_millis(300));

		// SIGKILL was already sent; only reaping may lag behind.
		tokio::time::timeout(Duration::from_secs(2), handle.wait_exited())
			.await
			.unwrap();
		let mut gone = false;
		for _ in 0..20 {
			if killpg(pgid, None).is_err() {
				gone = true;
				break;
			}
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		assert!(gone, "process group survived SIGKILL");
	}

	#[tokio::test]
	async fn wait_terminated_is_quick_when_group_obeys() {
		let notifier = Arc::new(MemoryNotifier::new());
		let mut config = file_mode("sleep 30");
		config.kill_timeout = Some(Duration::from_secs(30));
		let mut handle = ProcessHandle::start(&config, notifier).unwrap();

		handle.terminate().unwrap();
		tokio::time::timeout(Duration::from_secs(5), handle.wait_terminated())
			.await
			.expect("escalation should end once the group is gone");
		assert!(handle.has_exited() || killpg(Pid::from_raw(handle.pid() as i32), None).is_err());
	}

	#[tokio::test]
	async fn wait_terminated_without_timeout_returns_immediately() {
		let notifier = Arc::new(MemoryNotifier::new());
		let mut handle = ProcessHandle::start(&file_mode("sleep 30"), notifier).unwrap();
		handle.terminate().unwrap();
		tokio::time::timeout(Duration::from_millis(100), handle.wait_terminated())
			.await
			.unwrap();
	}
}
