//! Common test helpers and utilities.

#![allow(dead_code)]

pub mod temp_workspace;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use gaplint_ls::editor::EditorClient;
use gaplint_ls::error::ToolError;
use gaplint_ls::lint::runner::{InvocationResult, ModuleHost, ModuleRun};
use lsp_types::{Diagnostic, MessageType, Url};

// Re-export for convenience
pub use temp_workspace::TestWorkspace;

/// Two findings in the tool's plain and range formats, with a summary line
/// in between that must be skipped.
pub const SAMPLE_REPORT: &str = "test.g:20:0-147: Unused function arguments: arg [W046/unused-func-args]\n\
                                 Analysed 1 file\n\
                                 test.g:5-5:8-11: Not enough space before comment [W009/not-enough-space-before-comment]\n";

/// Editor stand-in that records everything the server sends.
#[derive(Default)]
pub struct RecordingEditor {
    pub published: Mutex<Vec<(Url, Vec<Diagnostic>, Option<i32>)>>,
    pub logs: Mutex<Vec<(MessageType, String)>>,
    pub popups: Mutex<Vec<(MessageType, String)>>,
}

impl RecordingEditor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether any output-channel message of `typ` contains `needle`.
    pub fn logged(&self, typ: MessageType, needle: &str) -> bool {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .any(|(t, msg)| *t == typ && msg.contains(needle))
    }
}

impl EditorClient for RecordingEditor {
    fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>, version: Option<i32>) {
        self.published.lock().unwrap().push((uri, diagnostics, version));
    }

    fn log_message(&self, typ: MessageType, message: String) {
        self.logs.lock().unwrap().push((typ, message));
    }

    fn show_message(&self, typ: MessageType, message: String) {
        self.popups.lock().unwrap().push((typ, message));
    }
}

/// In-process module host answering from canned output.
///
/// `--version` and `--ranges` probes are recognized by the last argument;
/// anything else is a lint run and gets `lint_stderr`.
pub struct ScriptedHost {
    pub version_output: String,
    pub lint_stderr: String,
    pub runs: Mutex<Vec<ModuleRun>>,
}

impl ScriptedHost {
    pub fn new(version_output: &str, lint_stderr: &str) -> Arc<Self> {
        Arc::new(Self {
            version_output: version_output.to_string(),
            lint_stderr: lint_stderr.to_string(),
            runs: Mutex::new(Vec::new()),
        })
    }

    /// Argument vectors of the lint runs seen so far.
    pub fn lint_argvs(&self) -> Vec<Vec<String>> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter(|run| !matches!(run.argv.last().map(String::as_str), Some("--version" | "--ranges")))
            .map(|run| run.argv.clone())
            .collect()
    }
}

impl ModuleHost for ScriptedHost {
    fn run_module(&self, run: &ModuleRun, _search_path: &mut Vec<PathBuf>) -> Result<InvocationResult, ToolError> {
        self.runs.lock().unwrap().push(run.clone());
        let (stdout, stderr) = match run.argv.last().map(String::as_str) {
            Some("--version") => (self.version_output.clone(), String::new()),
            Some("--ranges") => (String::new(), String::new()),
            _ => (String::new(), self.lint_stderr.clone()),
        };
        Ok(InvocationResult {
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit_code: Some(0),
            failure: None,
        })
    }
}
