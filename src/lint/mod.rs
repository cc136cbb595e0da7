//! The diagnostic pipeline.
//!
//! A lint pass resolves the document's workspace configuration, runs gaplint
//! through one of the invocation strategies, parses its stderr, and maps each
//! message onto a protocol severity.
//!
//! # Architecture
//!
//! - `invoke`: gating, strategy selection, argv/env/cwd construction
//! - `runner`: subprocess execution and the in-process module host
//! - `rpc`: helper processes for foreign interpreters
//! - `parser`: the output grammars
//! - `severity`: layered severity overrides
//! - `version`: version parsing and capability reconciliation
//! - `pipeline`: the [`Linter`] tying everything together

pub mod invoke;
pub mod parser;
pub mod pipeline;
pub mod rpc;
pub mod runner;
pub mod severity;
pub mod version;

use std::path::PathBuf;

use lsp_types::Url;

pub use parser::LintDiagnostic;
pub use pipeline::Linter;
pub use version::{Version, VersionRecord};

/// Static facts about the linter being driven.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    /// Importable module name; also `argv[0]` for module runs.
    pub module: String,
    /// Name shown as the diagnostic source.
    pub display: String,
    /// Arguments always passed before user arguments.
    pub default_args: Vec<String>,
    /// Oldest version that is supported.
    pub min_version: Version,
    /// Flag that asks for range output.
    pub range_flag: String,
    /// First version accepting `range_flag`.
    pub range_output_since: Version,
    /// Flag that prints the version.
    pub version_flag: String,
    /// Environment variable holding the module search path.
    pub search_path_var: String,
}

impl Default for ToolSpec {
    fn default() -> Self {
        Self {
            module: "gaplint".to_string(),
            display: "gaplint".to_string(),
            default_args: Vec::new(),
            min_version: Version::new(1, 4, 0),
            range_flag: "--ranges".to_string(),
            range_output_since: Version::new(1, 5, 0),
            version_flag: "--version".to_string(),
            search_path_var: "PYTHONPATH".to_string(),
        }
    }
}

/// A document snapshot handed to one lint pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintTarget {
    /// Document identity.
    pub uri: Url,
    /// Filesystem path, `None` for virtual buffers.
    pub path: Option<PathBuf>,
    /// Document text at the time the pass started.
    pub source: String,
    /// Editor version of the text.
    pub version: Option<i32>,
}

impl LintTarget {
    /// Builds a target from a URI, deriving the path for `file:` URIs.
    pub fn new(uri: Url, source: impl Into<String>, version: Option<i32>) -> Self {
        let path = crate::lsp::types::uri_to_path(&uri);
        Self {
            uri,
            path,
            source: source.into(),
            version,
        }
    }
}
