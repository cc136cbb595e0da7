//! Error types for the gaplint language server.
//!
//! This module defines all error types used throughout the server,
//! organized by subsystem: configuration, tool execution, the JSON-RPC
//! helper transport, and version probing.

use thiserror::Error;

/// Errors related to editor-supplied settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings payload could not be deserialized.
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] serde_json::Error),

    /// A workspace entry carried a URI that is not a file path.
    #[error("workspace is not a file URI: {0}")]
    NotAFileUri(String),

    /// An ignore pattern failed to compile.
    #[error("invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why the glob compiler rejected it.
        message: String,
    },
}

/// Errors related to running the linter.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool process could not be started.
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        /// Program that was being started.
        program: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An empty argument vector was handed to a strategy.
    #[error("empty command line")]
    EmptyCommand,

    /// Reading output from or writing input to the tool failed.
    #[error("tool IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The in-process module host raised an error.
    #[error("module '{module}' failed: {message}")]
    ModuleFailed {
        /// Module being run.
        module: String,
        /// Description of the failure, including any captured trace.
        message: String,
    },

    /// The blocking in-process call was cancelled or panicked.
    #[error("in-process run aborted: {0}")]
    Aborted(String),

    /// JSON-RPC transport failure.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}

/// Errors related to the JSON-RPC helper transport.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No helper runner script was configured for the server.
    #[error("no RPC runner script configured")]
    RunnerNotConfigured,

    /// The interpreter list was empty.
    #[error("no interpreter configured for RPC mode")]
    NoInterpreter,

    /// Helper process could not be started.
    #[error("failed to start RPC helper '{interpreter}': {message}")]
    StartFailed {
        /// Interpreter command used.
        interpreter: String,
        /// Reason for the failure.
        message: String,
    },

    /// Frame headers were malformed.
    #[error("malformed frame: {0}")]
    Framing(String),

    /// Helper closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Response id did not match the request id.
    #[error("invalid result for request {0}")]
    MismatchedId(String),

    /// Message (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error on the helper pipes.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to the version/capability probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The tool produced no output for the version query.
    #[error("no version output")]
    NoOutput,

    /// The tool reported a failure while probing.
    #[error("probe failed: {0}")]
    Failed(String),

    /// Running the tool failed.
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),
}

/// Errors that end the server.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol transport error.
    #[error("transport error: {0}")]
    Transport(#[from] async_lsp::Error),

    /// Generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Formats an error followed by its sources, one per line.
pub fn display_chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str("\r\nCaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// A specialized Result type for gaplint-ls operations.
pub type Result<T> = std::result::Result<T, Error>;
