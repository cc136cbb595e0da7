//! Low-level execution of the linter.
//!
//! Two primitives live here: [`run_process`] spawns a child and captures its
//! output, and [`ModuleHost`] runs the tool module "in process" under the
//! shared [`SearchPath`], which is swapped out for the duration of the call
//! by a [`SearchPathGuard`].

use std::collections::HashMap;
use std::ffi::OsString;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::AsyncWriteExt;
use tracing::{debug, trace};

use crate::config::ImportStrategy;
use crate::error::ToolError;

/// Captured outcome of one tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationResult {
    /// Captured standard output.
    pub stdout: Option<String>,
    /// Captured standard error.
    pub stderr: Option<String>,
    /// Exit status, when the strategy observes one.
    pub exit_code: Option<i32>,
    /// Transport or execution failure description.
    pub failure: Option<String>,
}

impl InvocationResult {
    /// A result that only carries a failure.
    pub fn failed(failure: impl Into<String>) -> Self {
        Self {
            failure: Some(failure.into()),
            ..Self::default()
        }
    }

    /// Standard output, or standard error when stdout is empty.
    ///
    /// The tool is not consistent about which stream it answers queries on.
    pub fn output_text(&self) -> &str {
        match self.stdout.as_deref() {
            Some(stdout) if !stdout.is_empty() => stdout,
            _ => self.stderr.as_deref().unwrap_or_default(),
        }
    }
}

/// Spawns `argv` in `cwd` with `env` added to the inherited environment.
///
/// `stdin` is written to the child when given; otherwise the child gets a
/// null stdin so it can never read the protocol stream.
///
/// # Errors
///
/// Returns [`ToolError::SpawnFailed`] if the process cannot be started and
/// [`ToolError::Io`] if its pipes fail.
pub async fn run_process(
    argv: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
    stdin: Option<&str>,
) -> Result<InvocationResult, ToolError> {
    let (program, args) = argv.split_first().ok_or(ToolError::EmptyCommand)?;

    let mut cmd = async_process::Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .envs(env)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ToolError::SpawnFailed {
        program: program.clone(),
        source,
    })?;

    let pipe = child.stdin.take();
    let input = stdin.map(|text| text.as_bytes().to_vec());
    let feed = async move {
        if let (Some(mut pipe), Some(input)) = (pipe, input) {
            pipe.write_all(&input).await?;
            pipe.close().await?;
        }
        Ok::<_, std::io::Error>(())
    };

    let (fed, output) = futures::join!(feed, child.output());
    let output = output?;
    if let Err(e) = fed {
        // The tool may exit before reading its input; its output still counts.
        debug!(error = %e, "failed to write tool stdin");
    }

    trace!(status = ?output.status, "tool exited");
    Ok(InvocationResult {
        stdout: Some(String::from_utf8_lossy(&output.stdout).into_owned()),
        stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
        exit_code: output.status.code(),
        failure: None,
    })
}

/// The module search path seen by in-process runs.
///
/// Cloning shares the underlying path.
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    inner: Arc<Mutex<Vec<PathBuf>>>,
}

impl SearchPath {
    /// Creates a search path with the given entries.
    pub fn new(entries: Vec<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(entries)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a directory if it exists and is not present yet.
    ///
    /// `UseBundled` puts it first, `FromEnvironment` last.
    pub fn add(&self, path: &Path, strategy: ImportStrategy) {
        if !path.is_dir() {
            return;
        }
        let mut entries = self.lock();
        if entries.iter().any(|entry| entry == path) {
            return;
        }
        match strategy {
            ImportStrategy::UseBundled => entries.insert(0, path.to_path_buf()),
            ImportStrategy::FromEnvironment => entries.push(path.to_path_buf()),
        }
    }

    /// A copy of the current entries.
    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.lock().clone()
    }

    /// Replaces the path until the returned guard is dropped.
    ///
    /// The guard holds the path exclusively, so in-process runs are
    /// serialized and none of them sees another's modifications.
    pub fn substitute(&self, replacement: impl FnOnce(&[PathBuf]) -> Vec<PathBuf>) -> SearchPathGuard<'_> {
        let mut slot = self.lock();
        let next = replacement(&slot);
        let saved = std::mem::replace(&mut *slot, next);
        SearchPathGuard { slot, saved }
    }
}

/// Scoped substitution of the [`SearchPath`]; restores the original on drop.
#[derive(Debug)]
pub struct SearchPathGuard<'a> {
    slot: MutexGuard<'a, Vec<PathBuf>>,
    saved: Vec<PathBuf>,
}

impl Deref for SearchPathGuard<'_> {
    type Target = Vec<PathBuf>;

    fn deref(&self) -> &Self::Target {
        &self.slot
    }
}

impl DerefMut for SearchPathGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slot
    }
}

impl Drop for SearchPathGuard<'_> {
    fn drop(&mut self) {
        *self.slot = std::mem::take(&mut self.saved);
    }
}

/// One in-process module run.
#[derive(Debug, Clone)]
pub struct ModuleRun {
    /// Module to run.
    pub module: String,
    /// Argument vector; the first entry is the module name.
    pub argv: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Text to feed on stdin.
    pub stdin: Option<String>,
}

/// Runs the tool module on behalf of the in-process strategy.
///
/// Implementations may mutate `search_path`; the caller restores it.
/// Errors are propagated to the lint pass rather than folded into the
/// result.
pub trait ModuleHost: Send + Sync + 'static {
    /// Runs the module and captures its output.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] if the module could not be run at all.
    fn run_module(&self, run: &ModuleRun, search_path: &mut Vec<PathBuf>) -> Result<InvocationResult, ToolError>;
}

/// Default host: runs `<interpreter> -m <module>` with the search path
/// exported through `search_path_var`.
#[derive(Debug, Clone)]
pub struct InterpreterHost {
    interpreter: Vec<String>,
    search_path_var: String,
}

impl InterpreterHost {
    /// Creates a host for the given interpreter command line.
    pub fn new(interpreter: Vec<String>, search_path_var: impl Into<String>) -> Self {
        Self {
            interpreter,
            search_path_var: search_path_var.into(),
        }
    }
}

impl ModuleHost for InterpreterHost {
    fn run_module(&self, run: &ModuleRun, search_path: &mut Vec<PathBuf>) -> Result<InvocationResult, ToolError> {
        let mut argv = self.interpreter.clone();
        argv.push("-m".to_string());
        argv.push(run.module.clone());
        argv.extend(run.argv.iter().skip(1).cloned());

        let mut env = HashMap::new();
        let joined = std::env::join_paths(search_path.iter()).unwrap_or_else(|_| OsString::new());
        if !joined.is_empty() {
            env.insert(
                self.search_path_var.clone(),
                joined.to_string_lossy().into_owned(),
            );
        }

        futures::executor::block_on(run_process(&argv, &run.cwd, &env, run.stdin.as_deref())).map_err(|e| {
            ToolError::ModuleFailed {
                module: run.module.clone(),
                message: e.to_string(),
            }
        })
    }
}
