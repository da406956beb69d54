//! Report renderers for contract check results.
//!
//! - [`terminal`] — one colored line per violation; `--verbose` adds a per-rule summary table.
//! - [`json`] — the violation records and recovered diagnostics as one JSON document.

pub mod json;
pub mod terminal;
