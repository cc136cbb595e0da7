//! LSP (Language Server Protocol) server module.
//!
//! # Architecture
//!
//! The LSP module is organized into:
//! - `server`: The `async-lsp` router and stdio main loop
//! - `controller`: Lint on open/save, clear on close
//! - `documents`: Text of open documents and pass generations
//! - `types`: Path and URI helpers

pub mod controller;
pub mod documents;
pub mod server;
pub mod types;

pub use controller::DocumentController;
pub use server::{ServerOptions, run_stdio, serve};
