//! testrun core library.
//!
//! This crate exposes the pieces of a local test run: erase coverage data,
//! start an HTTP fixture server, run the test tool against it, render the
//! coverage report, and lint the sources.
//!
//! High-level modules:
//! - `cli`: CLI argument parsing (binary uses this).
//! - `config`: Discovery and effective configuration resolution.
//! - `command`: Running external tools with logging and time limits.
//! - `server`: Fixture server handle, readiness polling and signal cleanup.
//! - `lint`: File discovery and per-file score classification.
//! - `pipeline`: Step sequencing and short-circuit on test failure.
//! - `models`: Steps and lint result structs.
//! - `output`: Human/JSON printers.
//! - `error`: The library error type.
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod lint;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod server;
