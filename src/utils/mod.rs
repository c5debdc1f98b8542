//! Utilities for the command line front end
//!
//! - [`progress`] - Spinner for running searches (no-op without the `progress` feature)

pub mod progress;

pub use progress::{progress_message, search_spinner};
