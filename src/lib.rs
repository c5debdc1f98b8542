//! # rgstream - Streaming ripgrep results
//!
//! rgstream runs ripgrep as a subprocess, parses its output as it arrives,
//! and collects matches into a per-file index in bounded batches while
//! keeping process memory under a ceiling.
//!
//! ## Architecture
//!
//! Data flows through these modules in order:
//!
//! - [`search`] - Parameters, command building, and the process runner
//! - [`parse`] - Incremental decoding of JSON and colored plain output
//! - [`aggregate`] - Size/time batching and the memory ceiling
//! - [`index`] - Per-file result index and its exports
//! - [`session`] - The engine that wires everything on a worker thread
//!
//! Supporting modules: [`config`], [`error`], [`logging`], [`output`]
//! (terminal printing) and [`utils`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use rgstream::{EngineConfig, SearchEngine, SearchEvent};
//!
//! let config = EngineConfig::load();
//! let params = config.parameters("TODO", "src").with_context(1);
//! let mut engine = SearchEngine::new(config);
//!
//! let session = engine.start(params)?;
//! for event in session.events() {
//!     if let SearchEvent::Batch(batch) = event {
//!         for entry in session.index().batch_entries(&batch) {
//!             println!("{}:{}", entry.path.display(), entry.record.line_number);
//!         }
//!     }
//! }
//! let summary = session.wait();
//! println!("{} matches in {} files", summary.total_matches, summary.files_with_matches);
//! # Ok::<(), rgstream::SearchError>(())
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod output;
pub mod parse;
pub mod search;
pub mod session;
pub mod utils;

pub use aggregate::{MatchBatch, ProgressSnapshot, SearchEvent};
pub use config::EngineConfig;
pub use error::{Result, SearchError};
pub use index::{ResultIndex, SharedIndex};
pub use parse::{ParseEvent, StreamParser};
pub use search::types::{
    FileResult, HighlightSpan, OutputFormat, SearchMatch, SearchParameters, SearchStatus,
    SearchSummary,
};
pub use session::{SearchEngine, SearchSession};
