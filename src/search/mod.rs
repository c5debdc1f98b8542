//! Running the external search tool
//!
//! - [`types`] - Parameters, matches and summaries shared across the pipeline
//! - [`command`] - Turning [`SearchParameters`](types::SearchParameters) into a command line
//! - [`process`] - Spawning, streaming and cancelling the tool

pub mod command;
pub mod process;
pub mod types;

pub use command::{CommandBuilder, SearchCommand, DEFAULT_EXECUTABLE};
pub use process::{CancelToken, ExitOutcome, ProcessEvent, ProcessHandle, ProcessId, ProcessRunner};
pub use types::*;
