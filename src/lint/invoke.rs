//! Running gaplint for a workspace.
//!
//! [`ToolInvoker`] decides whether a document is linted at all, picks an
//! [`InvocationStrategy`], builds the argument vector, environment and
//! working directory, and runs the tool. Explicit-path and RPC runs never
//! fail past this boundary: their failures come back as
//! [`InvocationResult::failure`]. In-process runs propagate their error to
//! the caller after logging it.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use tracing::debug;

use super::{LintTarget, ToolSpec};
use super::rpc::{RpcPool, RpcRequest};
use super::runner::{InvocationResult, ModuleHost, ModuleRun, SearchPath, run_process};
use crate::config::WorkspaceConfig;
use crate::editor::Notifier;
use crate::error::{ConfigError, ToolError, display_chain};
use crate::lsp::types::normalize_path;

/// How the tool is executed for a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationStrategy {
    /// Run the configured executable as a child process.
    ExplicitPath(Vec<String>),
    /// Run through a helper under a different interpreter.
    Rpc(Vec<String>),
    /// Run the module with the server's own interpreter.
    InProcess,
}

impl InvocationStrategy {
    /// Picks the strategy for `config`.
    ///
    /// An explicit path wins over everything; an interpreter other than the
    /// host's selects RPC; otherwise the tool runs in process.
    pub fn select(config: &WorkspaceConfig, host_interpreter: &[String]) -> Self {
        if !config.executable_path.is_empty() {
            return Self::ExplicitPath(config.executable_path.clone());
        }
        match config.interpreter.first() {
            Some(interpreter) if !is_current_interpreter(interpreter, host_interpreter) => {
                Self::Rpc(config.interpreter.clone())
            }
            _ => Self::InProcess,
        }
    }

    /// Leading argv entries: the executable, or the module name.
    pub fn command_prefix(&self, module: &str) -> Vec<String> {
        match self {
            Self::ExplicitPath(path) => path.clone(),
            Self::Rpc(_) | Self::InProcess => vec![module.to_string()],
        }
    }

    /// Whether child processes need the augmented environment.
    ///
    /// In-process runs already see the search path set up at initialization.
    pub fn needs_env(&self) -> bool {
        !matches!(self, Self::InProcess)
    }
}

/// Whether `candidate` names the interpreter the server runs with.
pub fn is_current_interpreter(candidate: &str, host_interpreter: &[String]) -> bool {
    host_interpreter.first().is_some_and(|host| {
        host == candidate || normalize_path(Path::new(host)) == normalize_path(Path::new(candidate))
    })
}

/// Why a document was not linted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// `enabled` is off for the workspace.
    Disabled,
    /// Notebook cells, untitled buffers and other non-file documents.
    UnsupportedDocument(String),
    /// The document lives under an excluded library root.
    Stdlib(PathBuf),
    /// The document matches an ignore pattern.
    Ignored(PathBuf),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "Skipping file [Linting Disabled]"),
            Self::UnsupportedDocument(uri) => write!(f, "Skipping {uri} [Not Supported]"),
            Self::Stdlib(path) => write!(
                f,
                "Skipping standard library file (stdlib excluded): {}",
                path.display()
            ),
            Self::Ignored(path) => write!(
                f,
                "Skipping file due to `ignorePatterns` match: {}",
                path.display()
            ),
        }
    }
}

struct IgnorePattern {
    pattern: String,
    matcher: GlobMatcher,
    /// Trailing components compared for relative patterns; `None` compares
    /// the whole path.
    tail: Option<usize>,
}

/// Matches document paths against `ignorePatterns`.
///
/// Relative patterns are anchored at the end of the path, so `*.g` matches
/// any `.g` file and `tst/*.g` any `.g` file directly inside a `tst`
/// directory. Absolute patterns and patterns starting with `**` are matched
/// against the full path.
pub struct IgnoreMatcher {
    patterns: Vec<IgnorePattern>,
}

impl IgnoreMatcher {
    /// Compiles `patterns`, returning the ones that failed alongside.
    pub fn new(patterns: &[String]) -> (Self, Vec<ConfigError>) {
        let mut compiled = Vec::new();
        let mut errors = Vec::new();

        for pattern in patterns {
            let trimmed = pattern.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut builder = GlobBuilder::new(trimmed);
            builder.literal_separator(true);
            if cfg!(windows) {
                builder.case_insensitive(true);
            }
            match builder.build() {
                Ok(glob) => {
                    let anchored = Path::new(trimmed).is_absolute() || trimmed.starts_with("**");
                    compiled.push(IgnorePattern {
                        pattern: trimmed.to_string(),
                        matcher: glob.compile_matcher(),
                        tail: (!anchored).then(|| Path::new(trimmed).components().count()),
                    });
                }
                Err(e) => errors.push(ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                }),
            }
        }

        (Self { patterns: compiled }, errors)
    }

    /// The first pattern matching `path`.
    pub fn matching(&self, path: &Path) -> Option<&str> {
        let components: Vec<_> = path.components().collect();
        self.patterns
            .iter()
            .find(|p| match p.tail {
                None => p.matcher.is_match(path),
                Some(n) if n <= components.len() => {
                    let tail: PathBuf = components[components.len() - n..].iter().collect();
                    p.matcher.is_match(tail)
                }
                Some(_) => false,
            })
            .map(|p| p.pattern.as_str())
    }
}

/// Builds the argument vector: command prefix, default args, configured
/// args, extra args, then the document path.
pub fn build_argv(
    prefix: Vec<String>,
    tool: &ToolSpec,
    config: &WorkspaceConfig,
    extra_args: &[String],
    document: &Path,
) -> Vec<String> {
    let mut argv = prefix;
    argv.extend(tool.default_args.iter().cloned());
    argv.extend(config.extra_args.iter().cloned());
    argv.extend(extra_args.iter().cloned());
    argv.push(document.display().to_string());
    argv
}

/// Environment for explicit-path and RPC children.
///
/// The search-path variable is the inherited value followed by the
/// workspace's `extraPaths`, with empty entries dropped.
pub fn child_env(config: &WorkspaceConfig, search_path_var: &str, inherited: Option<&str>) -> HashMap<String, String> {
    let mut env = HashMap::from([
        (
            "LS_IMPORT_STRATEGY".to_string(),
            config.import_strategy.as_str().to_string(),
        ),
        ("PYTHONUTF8".to_string(), "1".to_string()),
    ]);

    let paths: Vec<PathBuf> = inherited
        .map(|value| std::env::split_paths(value).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .chain(config.extra_search_paths.iter().map(PathBuf::from))
        .filter(|p| !p.as_os_str().is_empty())
        .collect();

    if !paths.is_empty()
        && let Ok(joined) = std::env::join_paths(paths)
    {
        env.insert(
            search_path_var.to_string(),
            joined.to_string_lossy().into_owned(),
        );
    }
    env
}

/// Executes gaplint on behalf of lint passes and probes.
pub struct ToolInvoker {
    pub(crate) tool: ToolSpec,
    pub(crate) host_interpreter: Vec<String>,
    pub(crate) module_host: Arc<dyn ModuleHost>,
    pub(crate) search_path: SearchPath,
    pub(crate) rpc: RpcPool,
    pub(crate) stdlib_roots: Vec<PathBuf>,
    pub(crate) notifier: Arc<Notifier>,
}

/// What a single execution feeds the tool.
struct Execution<'a> {
    argv: Vec<String>,
    cwd: PathBuf,
    env: HashMap<String, String>,
    use_stdin: bool,
    source: Option<&'a str>,
}

impl ToolInvoker {
    /// The search path used by in-process runs.
    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    /// Checks whether `target` should be linted under `config`.
    pub fn gate(&self, config: &WorkspaceConfig, target: &LintTarget) -> Option<SkipReason> {
        if !config.enabled {
            return Some(SkipReason::Disabled);
        }
        let Some(path) = target.path.as_deref() else {
            return Some(SkipReason::UnsupportedDocument(target.uri.to_string()));
        };
        let path = normalize_path(path);

        if self
            .stdlib_roots
            .iter()
            .any(|root| path.starts_with(normalize_path(root)))
        {
            return Some(SkipReason::Stdlib(path));
        }

        let (matcher, errors) = IgnoreMatcher::new(&config.ignore_patterns);
        for e in errors {
            self.notifier.warning(e.to_string());
        }
        if let Some(pattern) = matcher.matching(&path) {
            debug!(path = %path.display(), pattern, "ignored by pattern");
            return Some(SkipReason::Ignored(path));
        }
        None
    }

    /// Lints one document.
    ///
    /// Returns `Ok(None)` when the document is gated out.
    ///
    /// # Errors
    ///
    /// Only the in-process strategy returns errors; see [`ModuleHost`].
    pub async fn invoke(
        &self,
        config: &WorkspaceConfig,
        target: &LintTarget,
        extra_args: &[String],
        use_stdin: bool,
    ) -> Result<Option<InvocationResult>, ToolError> {
        if let Some(reason) = self.gate(config, target) {
            self.notifier.warning(reason.to_string());
            if reason == SkipReason::Disabled {
                self.notifier
                    .warning(format!("See `{}.enabled` in the settings to enable linting.", self.tool.module));
            }
            return Ok(None);
        }
        let Some(path) = target.path.as_deref() else {
            return Ok(None);
        };

        let strategy = InvocationStrategy::select(config, &self.host_interpreter);
        let document = normalize_path(path);
        let argv = build_argv(
            strategy.command_prefix(&self.tool.module),
            &self.tool,
            config,
            extra_args,
            &document,
        );
        let env = if strategy.needs_env() {
            self.env_for(config)
        } else {
            HashMap::new()
        };

        let execution = Execution {
            argv,
            cwd: config.cwd(Some(&document)),
            env,
            use_stdin,
            source: Some(&target.source),
        };
        self.execute(&strategy, config, execution).await.map(Some)
    }

    /// Runs the tool with only `extra_args`, no document and an empty stdin.
    ///
    /// Used by the version and capability probes.
    ///
    /// # Errors
    ///
    /// Only the in-process strategy returns errors.
    pub async fn run_tool(&self, config: &WorkspaceConfig, extra_args: &[String]) -> Result<InvocationResult, ToolError> {
        let strategy = InvocationStrategy::select(config, &self.host_interpreter);
        let mut argv = strategy.command_prefix(&self.tool.module);
        argv.extend(extra_args.iter().cloned());
        let env = if strategy.needs_env() {
            self.env_for(config)
        } else {
            HashMap::new()
        };

        let execution = Execution {
            argv,
            cwd: config.cwd(None),
            env,
            use_stdin: true,
            source: None,
        };
        let result = self.execute(&strategy, config, execution).await?;
        self.notifier
            .log(format!("\r\n{}\r\n", result.stdout.as_deref().unwrap_or_default()));
        Ok(result)
    }

    fn env_for(&self, config: &WorkspaceConfig) -> HashMap<String, String> {
        let inherited = std::env::var(&self.tool.search_path_var).ok();
        child_env(config, &self.tool.search_path_var, inherited.as_deref())
    }

    async fn execute(
        &self,
        strategy: &InvocationStrategy,
        config: &WorkspaceConfig,
        execution: Execution<'_>,
    ) -> Result<InvocationResult, ToolError> {
        match strategy {
            InvocationStrategy::ExplicitPath(_) => Ok(self.execute_path(execution).await),
            InvocationStrategy::Rpc(interpreter) => Ok(self.execute_rpc(interpreter, config, execution).await),
            InvocationStrategy::InProcess => self.execute_in_process(execution).await,
        }
    }

    async fn execute_path(&self, execution: Execution<'_>) -> InvocationResult {
        self.notifier.log(execution.argv.join(" "));
        self.notifier
            .log(format!("CWD Server: {}", execution.cwd.display()));

        let stdin = execution
            .use_stdin
            .then(|| execution.source.unwrap_or_default().replace("\r\n", "\n"));

        match run_process(&execution.argv, &execution.cwd, &execution.env, stdin.as_deref()).await {
            Ok(result) => {
                self.log_stderr(&result);
                result
            }
            Err(e) => {
                self.notifier.error(format!("Failed to run {}: {e}", execution.argv.join(" ")));
                InvocationResult::failed(e.to_string())
            }
        }
    }

    async fn execute_rpc(&self, interpreter: &[String], config: &WorkspaceConfig, execution: Execution<'_>) -> InvocationResult {
        let mut shown = interpreter.to_vec();
        shown.push("-m".to_string());
        shown.extend(execution.argv.iter().cloned());
        self.notifier.log(shown.join(" "));
        self.notifier
            .log(format!("CWD Linter: {}", execution.cwd.display()));

        let request = RpcRequest {
            workspace: config.root.clone(),
            interpreter: interpreter.to_vec(),
            module: self.tool.module.clone(),
            argv: execution.argv,
            use_stdin: execution.use_stdin,
            cwd: execution.cwd,
            source: execution.source.map(str::to_string),
            env: execution.env,
        };

        match self.rpc.run(&request).await {
            Ok(reply) => {
                if let Some(exception) = reply.exception {
                    self.notifier.error(exception.clone());
                    return InvocationResult {
                        stdout: Some(reply.stdout),
                        stderr: None,
                        exit_code: None,
                        failure: Some(exception),
                    };
                }
                if !reply.stderr.is_empty() {
                    self.notifier.log(reply.stderr.clone());
                }
                InvocationResult {
                    stdout: Some(reply.stdout),
                    stderr: Some(reply.stderr),
                    exit_code: None,
                    failure: None,
                }
            }
            Err(e) => {
                self.notifier.error(format!("RPC run failed for {}: {e}", request.workspace.display()));
                InvocationResult::failed(e.to_string())
            }
        }
    }

    async fn execute_in_process(&self, execution: Execution<'_>) -> Result<InvocationResult, ToolError> {
        let mut shown = self.host_interpreter.clone();
        shown.push("-m".to_string());
        shown.extend(execution.argv.iter().cloned());
        self.notifier.log(shown.join(" "));
        self.notifier
            .log(format!("CWD Linter: {}", execution.cwd.display()));

        let run = ModuleRun {
            module: self.tool.module.clone(),
            argv: execution.argv,
            cwd: execution.cwd,
            stdin: execution
                .use_stdin
                .then(|| execution.source.unwrap_or_default().to_string()),
        };
        let host = Arc::clone(&self.module_host);
        let search_path = self.search_path.clone();

        let joined = tokio::task::spawn_blocking(move || {
            // The tool may edit the path; every run starts from a fresh copy
            // with the working directory first.
            let mut guard = search_path.substitute(|current| {
                std::iter::once(PathBuf::new())
                    .chain(current.iter().cloned())
                    .collect()
            });
            host.run_module(&run, &mut guard)
        })
        .await;
        let outcome = match joined {
            Ok(result) => result,
            Err(e) => Err(ToolError::Aborted(e.to_string())),
        };

        match outcome {
            Ok(result) => {
                self.log_stderr(&result);
                Ok(result)
            }
            Err(e) => {
                self.notifier.error(display_chain(&e));
                Err(e)
            }
        }
    }

    fn log_stderr(&self, result: &InvocationResult) {
        if let Some(stderr) = result.stderr.as_deref()
            && !stderr.is_empty()
        {
            self.notifier.log(stderr.to_string());
        }
    }

    /// Stops every RPC helper.
    pub async fn shutdown(&self) {
        let helpers = self.rpc.len().await;
        debug!(helpers, "stopping RPC helpers");
        self.rpc.shutdown().await;
    }
}
