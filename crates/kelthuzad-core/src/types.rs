use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
	Starting,
	Running { pid: u32 },
	Exited { pid: u32, code: Option<i32> },
}

impl ProcessState {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessState::Running { .. })
	}

	pub fn has_exited(&self) -> bool {
		matches!(self, ProcessState::Exited { .. })
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
	Match,
	NoMatch,
}

/// Outcome of [`crate::ProcessHandle::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminate {
	Signaled,
	AlreadySignaled,
	AlreadyExited,
}

/// Everything the supervisor reports to its [`crate::Notifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
	MonitoringLog,
	MonitoringStdout,
	Spawned { pid: u32 },
	Exited { pid: u32, code: Option<i32> },
	Failure { line: String, pattern: String },
	Waiting { secs: u64 },
	Terminated { pid: u32 },
	TerminateFailed { pid: u32, reason: String },
	Line(String),
	OutputClosed { pid: u32 },
	ShutdownRequested,
}

impl fmt::Display for Event {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Event::MonitoringLog => write!(f, "monitoring log..."),
			Event::MonitoringStdout => write!(f, "monitoring stdout..."),
			Event::Spawned { pid } => write!(f, "{} is spawned", pid),
			Event::Exited { pid, code: Some(code) } => write!(f, "{} is done! (exit {})", pid, code),
			Event::Exited { pid, code: None } => write!(f, "{} is done!", pid),
			Event::Failure { line, pattern } => write!(f, "[FAIL] {} -> {}", line, pattern),
			Event::Waiting { secs } => write!(f, "Waiting {} seconds...", secs),
			Event::Terminated { pid } => write!(f, "sent SIGTERM to process group {}", pid),
			Event::TerminateFailed { pid, reason } => {
				write!(f, "could not terminate {}: {}", pid, reason)
			}
			Event::Line(line) => write!(f, "{}", line),
			Event::OutputClosed { pid } => write!(f, "output of {} closed", pid),
			Event::ShutdownRequested => write!(f, "received an interrupt, stopping..."),
		}
	}
}
