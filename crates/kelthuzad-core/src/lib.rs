//! # kelthuzad-core
//!
//! Self-healing process guardian.
//!
//! Launches one child in its own process group, watches either the child's
//! stdout or an external log file for a failure pattern, and when it shows up
//! waits a cooldown, terminates the whole group and launches a fresh child.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kelthuzad_core::{Config, Supervisor, TracingNotifier};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> kelthuzad_core::Result<()> {
//! let config = Config::new("./server --port 8080", "FATAL|panicked");
//! let (mut sup, shutdown) = Supervisor::new(config, Arc::new(TracingNotifier))?;
//!
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     shutdown.request_shutdown();
//! });
//!
//! sup.run().await
//! # }
//! ```

pub mod config;
pub mod detector;
pub mod error;
pub mod notify;
pub mod process;
pub mod source;
pub mod supervisor;
pub mod types;

pub use config::{Config, Monitor, PartialConfig};
pub use detector::FailureDetector;
pub use error::{Error, Result};
pub use notify::{MemoryNotifier, Notifier, TracingNotifier};
pub use process::ProcessHandle;
pub use source::LineSource;
pub use supervisor::{ShutdownHandle, Supervisor};
pub use types::*;
