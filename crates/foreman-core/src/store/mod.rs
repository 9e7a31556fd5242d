//! Persistence primitives shared by every component.
//!
//! All writers go through [`JsonDocument`] (whole-document replace via
//! temp file + rename) or [`JsonLines`] (single-write appends). Nothing else in
//! the crate opens a shared document for writing.

mod document;
mod jsonl;
mod retry;

pub use document::{Document, JsonDocument, Recovery, write_atomically};
pub use jsonl::JsonLines;
pub use retry::{RetryPolicy, is_transient};
