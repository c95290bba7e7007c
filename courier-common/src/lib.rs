//! Shared plumbing for the courier crates: logging setup and the shutdown
//! signal broadcast between the runner and background workers.

pub mod logging;

pub use tracing;

/// Lifecycle signal broadcast to long running tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
