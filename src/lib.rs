//! gaplint Language Server
//!
//! A language server that runs the `gaplint` linter for GAP source files
//! and publishes its findings as LSP diagnostics.
//!
//! # Overview
//!
//! This library provides:
//! - Per-workspace settings resolution for multi-root editor sessions
//! - Three ways of running the linter: an explicit executable, a helper
//!   process under another interpreter, or the server's own interpreter
//! - Version and capability probing of the installed linter
//! - Parsing of the linter's textual output into positioned diagnostics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     stdio      ┌─────────────────┐
//! │     Editor      │◄──────────────►│   gaplint-ls    │
//! │  (LSP client)   │     (LSP)      │ (router, docs)  │
//! └─────────────────┘                └────────┬────────┘
//!                                             │
//!                                      ┌──────▼──────┐
//!                                      │   Linter    │
//!                                      │ (pipeline)  │
//!                                      └──────┬──────┘
//!                            ┌────────────────┼────────────────┐
//!                     ┌──────▼──────┐  ┌──────▼──────┐  ┌──────▼──────┐
//!                     │ executable  │  │ RPC helper  │  │ in-process  │
//!                     └─────────────┘  └─────────────┘  └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`] - Editor settings and resolved workspace configuration
//! - [`registry`] - Registered workspaces and probed versions
//! - [`lint`] - The diagnostic pipeline
//! - [`editor`] - The editor as seen by the pipeline
//! - [`lsp`] - Protocol wiring and document lifecycle
//! - [`error`] - Error types for the entire application
//!
//! # Example
//!
//! ```ignore
//! use gaplint_ls::lsp::server::{ServerOptions, run_stdio};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let options = ServerOptions {
//!         host_interpreter: vec!["python3".to_string()],
//!         ..Default::default()
//!     };
//!     run_stdio(options).await?;
//!     Ok(())
//! }
//! ```

// Enforce documentation and other quality attributes
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are too strict
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod editor;
pub mod error;
pub mod lint;
pub mod lsp;
pub mod registry;

// Re-export commonly used types at the crate root
pub use error::{Error, Result};
pub use lint::{LintTarget, Linter, ToolSpec};
