//! # repo-digest
//!
//! Turns a Git repository or a local directory into a bounded, deterministic
//! text digest (a directory tree plus concatenated file contents) sized for
//! language-model context windows.
//!
//! ## Architecture
//!
//! ```text
//! source ──▶ query ──▶ materialize ──▶ walk ──▶ digest ──▶ output
//!   (str)   (parse)   (remote only)   (limits)  (render)
//!              └──────────── janitor scope ────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and limits |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`query`] | Source string parsing |
//! | [`materialize`] | Shallow git fetch into the temp root |
//! | [`walk`] | Bounded tree walk |
//! | [`digest`] | Summary / tree / content rendering |
//! | [`janitor`] | Temp directory cleanup and TTL sweep |
//! | [`ingest`] | Pipeline entry point |

pub mod config;
pub mod digest;
pub mod error;
pub mod ingest;
pub mod janitor;
pub mod materialize;
pub mod models;
pub mod query;
pub mod walk;

pub use error::{CloneErrorKind, ErrorKind, IngestError};
pub use ingest::{ingest, IngestOptions, Ingestion};
