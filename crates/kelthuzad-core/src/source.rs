use std::io::SeekFrom;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::process::ChildStdout;

use crate::error::{Error, Result};

/// A live, append-only sequence of lines.
///
/// `FileTail` follows a path and outlives respawns; `ProcessOutput` is bound
/// to one child's stdout and must be rebuilt for every new child.
pub enum LineSource {
	FileTail(FileTail),
	ProcessOutput(ProcessOutput),
}

impl LineSource {
	pub async fn tail(path: &Path, poll_interval: Duration) -> Result<Self> {
		Ok(LineSource::FileTail(FileTail::open(path, poll_interval).await?))
	}

	pub fn process_output(pid: u32, stdout: ChildStdout) -> Self {
		LineSource::ProcessOutput(ProcessOutput::new(pid, stdout))
	}

	/// `Ok(None)` is end of stream; a tailed file never ends.
	pub async fn next_line(&mut self) -> Result<Option<String>> {
		match self {
			LineSource::FileTail(tail) => tail.next_line().await.map(Some),
			LineSource::ProcessOutput(output) => Ok(output.next_line().await),
		}
	}
}

pub struct FileTail {
	path: PathBuf,
	reader: BufReader<File>,
	// Second descriptor on the same file, read positionally to inspect its head.
	peek: std::fs::File,
	ino: u64,
	pos: u64,
	head: Vec<u8>,
	pending: Vec<u8>,
	counted: usize,
	poll_interval: Duration,
}

// Leading bytes remembered to recognize a truncation the file has already
// outgrown again.
const HEAD_LEN: usize = 64;

impl FileTail {
	/// Opens `path` positioned at its current end; earlier content is never read.
	pub async fn open(path: &Path, poll_interval: Duration) -> Result<Self> {
		let open_err = |source| Error::OpenLog {
			path: path.to_path_buf(),
			source,
		};
		let mut file = File::open(path).await.map_err(open_err)?;
		let ino = file.metadata().await.map_err(open_err)?.ino();
		let peek = file.try_clone().await.map_err(open_err)?.into_std().await;
		let pos = file.seek(SeekFrom::End(0)).await.map_err(open_err)?;
		let head = read_head(&peek, pos.min(HEAD_LEN as u64) as usize).map_err(open_err)?;

		Ok(Self {
			path: path.to_path_buf(),
			reader: BufReader::new(file),
			peek,
			ino,
			pos,
			head,
			pending: Vec::new(),
			counted: 0,
			poll_interval,
		})
	}

	pub async fn next_line(&mut self) -> Result<String> {
		loop {
			// Only bytes not yet buffered can come from rewritten content.
			if self.reader.buffer().is_empty() && self.truncated().map_err(|e| self.read_err(e))? {
				tracing::info!(path = %self.path.display(), "log truncated, reading from start");
				self.reader
					.seek(SeekFrom::Start(0))
					.await
					.map_err(|e| self.read_err(e))?;
				self.pos = 0;
				self.head.clear();
				self.counted = 0;
				if let Some(line) = take_pending(&mut self.pending) {
					return Ok(line);
				}
			}

			if let Some(line) = self.read_line().await? {
				return Ok(line);
			}

			match self.reopened().await {
				Some((file, peek, ino)) => {
					tracing::info!(path = %self.path.display(), "log rotated, reopening");
					self.reader = BufReader::new(file);
					self.peek = peek;
					self.ino = ino;
					self.pos = 0;
					self.head.clear();
					self.counted = 0;
					if let Some(line) = take_pending(&mut self.pending) {
						return Ok(line);
					}
				}
				None => tokio::time::sleep(self.poll_interval).await,
			}
		}
	}

	async fn read_line(&mut self) -> Result<Option<String>> {
		let read = self.reader.read_until(b'\n', &mut self.pending).await;

		// Everything past `counted`, including bytes a cancelled read left behind.
		let fresh = &self.pending[self.counted..];
		if self.head.len() < HEAD_LEN && self.head.len() as u64 == self.pos {
			let take = fresh.len().min(HEAD_LEN - self.head.len());
			self.head.extend_from_slice(&fresh[..take]);
		}
		self.pos += fresh.len() as u64;
		self.counted = self.pending.len();

		if let Err(e) = read {
			return Err(self.read_err(e));
		}
		let line = complete_line(&mut self.pending);
		self.counted = self.pending.len();
		Ok(line)
	}

	// The file shrank below the read position, or its leading bytes changed.
	fn truncated(&self) -> std::io::Result<bool> {
		if self.peek.metadata()?.len() < self.pos {
			return Ok(true);
		}
		Ok(read_head(&self.peek, self.head.len())? != self.head)
	}

	// A different file at the path means rotation. A missing path
	// (mid-rotation) keeps the old handle.
	async fn reopened(&self) -> Option<(File, std::fs::File, u64)> {
		let meta = tokio::fs::metadata(&self.path).await.ok()?;
		if meta.ino() == self.ino {
			return None;
		}
		let file = File::open(&self.path).await.ok()?;
		let peek = file.try_clone().await.ok()?.into_std().await;
		Some((file, peek, meta.ino()))
	}

	fn read_err(&self, source: std::io::Error) -> Error {
		Error::ReadLog {
			path: self.path.clone(),
			source,
		}
	}
}

fn read_head(file: &std::fs::File, len: usize) -> std::io::Result<Vec<u8>> {
	let mut head = vec![0; len];
	let mut filled = 0;
	while filled < len {
		match file.read_at(&mut head[filled..], filled as u64)? {
			0 => break,
			n => filled += n,
		}
	}
	head.truncate(filled);
	Ok(head)
}

pub struct ProcessOutput {
	pid: u32,
	reader: BufReader<ChildStdout>,
	pending: Vec<u8>,
	closed: bool,
}

impl ProcessOutput {
	pub fn new(pid: u32, stdout: ChildStdout) -> Self {
		Self {
			pid,
			reader: BufReader::new(stdout),
			pending: Vec::new(),
			closed: false,
		}
	}

	/// `None` once the pipe closes. A final unterminated line is still yielded.
	pub async fn next_line(&mut self) -> Option<String> {
		if self.closed {
			return None;
		}
		let mut consumed = 0;
		match read_line(&mut self.reader, &mut self.pending, &mut consumed).await {
			Ok(Some(line)) => Some(line),
			Ok(None) => {
				self.closed = true;
				take_pending(&mut self.pending)
			}
			Err(e) => {
				tracing::warn!(pid = self.pid, "reading stdout failed: {}", e);
				self.closed = true;
				take_pending(&mut self.pending)
			}
		}
	}
}

/// Reads up to the next newline, adding the bytes consumed to `consumed`.
/// Returns `None` at EOF, leaving any partial line in `pending` for the next call.
async fn read_line<R: AsyncBufRead + Unpin>(
	reader: &mut R,
	pending: &mut Vec<u8>,
	consumed: &mut u64,
) -> std::io::Result<Option<String>> {
	let n = reader.read_until(b'\n', pending).await?;
	*consumed += n as u64;
	Ok(complete_line(pending))
}

/// Takes the buffered line if its newline has arrived.
fn complete_line(pending: &mut Vec<u8>) -> Option<String> {
	if pending.last() != Some(&b'\n') {
		return None;
	}
	pending.pop();
	Some(take_pending(pending).unwrap_or_default())
}

fn take_pending(pending: &mut Vec<u8>) -> Option<String> {
	if pending.is_empty() {
		return None;
	}
	if pending.last() == Some(&b'\r') {
		pending.pop();
	}
	let line = String::from_utf8_lossy(pending).into_owned();
	pending.clear();
	Some(line)
}
