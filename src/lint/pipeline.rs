//! One lint pass, version probes, and settings lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lsp_types::Diagnostic;
use tracing::{debug, info, instrument};

use super::invoke::ToolInvoker;
use super::parser::{self, LintDiagnostic};
use super::rpc::RpcPool;
use super::runner::{InterpreterHost, ModuleHost, SearchPath};
use super::version::{flag_rejected, reconcile, version_from_output};
use super::{LintTarget, ToolSpec, VersionRecord};
use crate::config::{InitializationOptions, WorkspaceConfig};
use crate::editor::{EditorClient, Notifier};
use crate::error::{ProbeError, ToolError};
use crate::registry::RegistryState;

/// Builder for a [`Linter`].
#[derive(Default)]
pub struct LinterBuilder {
    tool: Option<ToolSpec>,
    host_interpreter: Vec<String>,
    module_host: Option<Arc<dyn ModuleHost>>,
    runner: Option<PathBuf>,
    stdlib_paths: Vec<PathBuf>,
}

impl LinterBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tool being driven.
    #[must_use]
    pub fn tool(mut self, tool: ToolSpec) -> Self {
        self.tool = Some(tool);
        self
    }

    /// Sets the interpreter the server itself uses.
    #[must_use]
    pub fn host_interpreter(mut self, interpreter: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.host_interpreter = interpreter.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides how the in-process strategy runs the module.
    #[must_use]
    pub fn module_host(mut self, host: Arc<dyn ModuleHost>) -> Self {
        self.module_host = Some(host);
        self
    }

    /// Sets the helper script run by RPC helpers.
    #[must_use]
    pub fn runner(mut self, runner: impl Into<PathBuf>) -> Self {
        self.runner = Some(runner.into());
        self
    }

    /// Adds a library root whose files are never linted.
    #[must_use]
    pub fn stdlib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdlib_paths.push(path.into());
        self
    }

    /// Builds the linter, reporting to `client`.
    pub fn build(self, client: Arc<dyn EditorClient>) -> Linter {
        let tool = self.tool.unwrap_or_default();
        let host_interpreter = if self.host_interpreter.is_empty() {
            vec!["python3".to_string()]
        } else {
            self.host_interpreter
        };
        let module_host = self.module_host.unwrap_or_else(|| {
            Arc::new(InterpreterHost::new(
                host_interpreter.clone(),
                tool.search_path_var.clone(),
            ))
        });
        let notifier = Arc::new(Notifier::new(client));

        let invoker = ToolInvoker {
            tool: tool.clone(),
            host_interpreter: host_interpreter.clone(),
            module_host,
            search_path: SearchPath::default(),
            rpc: RpcPool::new(self.runner),
            stdlib_roots: self.stdlib_paths,
            notifier: Arc::clone(&notifier),
        };

        Linter {
            tool,
            registry: RegistryState::new(host_interpreter),
            invoker,
            notifier,
        }
    }
}

/// The diagnostic pipeline for every workspace the server knows.
pub struct Linter {
    tool: ToolSpec,
    registry: RegistryState,
    invoker: ToolInvoker,
    notifier: Arc<Notifier>,
}

impl Linter {
    /// Returns a builder.
    pub fn builder() -> LinterBuilder {
        LinterBuilder::new()
    }

    /// Workspace configuration and version state.
    pub fn registry(&self) -> &RegistryState {
        &self.registry
    }

    /// Editor-facing logging.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// The tool being driven.
    pub fn tool(&self) -> &ToolSpec {
        &self.tool
    }

    /// The search path used by in-process runs.
    pub fn search_path(&self) -> &SearchPath {
        self.invoker.search_path()
    }

    /// Runs one lint pass over `target`.
    ///
    /// Gated documents and failed runs yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns the in-process strategy's error; the caller treats it as a
    /// pass with no diagnostics.
    #[instrument(skip_all, fields(uri = %target.uri))]
    pub async fn lint(&self, target: &LintTarget) -> Result<Vec<Diagnostic>, ToolError> {
        let config = self.registry.resolve(target.path.as_deref());

        let mut extra_args = Vec::new();
        if let Some(record) = self.registry.version_for(&config.root) {
            self.notifier.info(format!(
                "Detected {} version: {}.{}",
                self.tool.display, record.version.major, record.version.minor
            ));
            if record.supports_range_output {
                extra_args.push(self.tool.range_flag.clone());
            }
        }

        let Some(result) = self.invoker.invoke(&config, target, &extra_args, false).await? else {
            return Ok(Vec::new());
        };

        if let Some(failure) = &result.failure {
            self.notifier
                .error(format!("Linting failed for {}:\r\n{failure}", target.uri));
            return Ok(Vec::new());
        }
        let Some(stderr) = result.stderr.as_deref() else {
            return Ok(Vec::new());
        };
        self.notifier.log(format!("{} :\r\n{stderr}", target.uri));

        let diagnostics = parser::parse(stderr, &config.severity_overrides, &self.tool.display);
        if diagnostics.is_empty()
            && let Some(code) = result.exit_code.filter(|code| *code != 0)
        {
            self.notifier.error(format!(
                "{} exited with code {code} without reporting diagnostics for {}",
                self.tool.display, target.uri
            ));
        }
        debug!(count = diagnostics.len(), "lint pass finished");
        Ok(diagnostics.into_iter().map(LintDiagnostic::into_lsp).collect())
    }

    /// Probes the tool version and range-output support for one workspace
    /// and records the result.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] if the tool cannot be run or reports nothing.
    pub async fn probe(&self, config: &WorkspaceConfig) -> Result<VersionRecord, ProbeError> {
        let tool = &self.tool;
        let root = config.root.display();

        let result = self.invoker.run_tool(config, &[tool.version_flag.clone()]).await?;
        if let Some(failure) = result.failure {
            return Err(ProbeError::Failed(failure));
        }
        self.notifier.log(format!(
            "Version info for linter running for {root}:\r\nstdout: {}\r\nstderr: {}",
            result.stdout.as_deref().unwrap_or_default(),
            result.stderr.as_deref().unwrap_or_default()
        ));
        let declared = version_from_output(result.output_text()).ok_or(ProbeError::NoOutput)?;

        let ranges = self.invoker.run_tool(config, &[tool.range_flag.clone()]).await?;
        if let Some(failure) = ranges.failure {
            return Err(ProbeError::Failed(failure));
        }
        self.notifier.log(format!(
            "Ranges support info for linter running for {root}:\r\nstdout: {}\r\nstderr: {}",
            ranges.stdout.as_deref().unwrap_or_default(),
            ranges.stderr.as_deref().unwrap_or_default()
        ));
        let supports_ranges = !flag_rejected(ranges.output_text(), &tool.range_flag);

        let version = reconcile(declared, supports_ranges, tool.range_output_since);
        if version != declared {
            self.notifier.log(format!(
                "WARNING, detected version {}=={declared}, but tool supports ranges (available from {})\r\n\
                 Automatically bumping detected version to {version}",
                tool.module, tool.range_output_since
            ));
        }

        let record = VersionRecord::new(version, tool.range_output_since);
        self.registry.record_version(&config.root, record);

        if version < tool.min_version {
            self.notifier.error(format!(
                "Version of linter running for {root} is NOT supported:\r\n\
                 SUPPORTED {module}>={min}\r\nFOUND {module}=={declared}\r\n",
                module = tool.module,
                min = tool.min_version
            ));
        } else {
            self.notifier.log(format!(
                "SUPPORTED {module}>={min}\r\nFOUND {module}=={declared}\r\n",
                module = tool.module,
                min = tool.min_version
            ));
        }
        Ok(record)
    }

    /// Probes every registered workspace; failures leave that workspace
    /// without a version record.
    pub async fn probe_all(&self) {
        for config in self.registry.workspaces() {
            if let Err(e) = self.probe(&config).await {
                self.registry.clear_version(&config.root);
                self.notifier.log(format!(
                    "Error while detecting {} version:\r\n{e}",
                    self.tool.display
                ));
            }
        }
    }

    /// Handles `initialize`: registers workspaces, prepares the in-process
    /// search path, and probes every workspace.
    pub async fn initialize(&self, options: &InitializationOptions) {
        let cwd = std::env::current_dir().unwrap_or_default();
        self.notifier.log(format!("CWD Server: {}", cwd.display()));

        let strategy = options.global_settings.import_strategy.unwrap_or_default();
        self.search_path().add(&cwd, strategy);

        self.apply_settings(options, &cwd);

        let server_config = self.registry.resolve_directory(&cwd);
        for extra in &server_config.extra_search_paths {
            self.search_path().add(Path::new(extra), strategy);
        }
        let paths: Vec<String> = self
            .search_path()
            .snapshot()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        self.notifier.log(format!(
            "Search path used to run Server:\r\n   {}",
            paths.join("\r\n   ")
        ));

        self.probe_all().await;
        info!(workspaces = self.registry.workspaces().len(), "initialized");
    }

    /// Handles a configuration change: replaces every workspace and probes
    /// them again.
    pub async fn apply_configuration(&self, options: &InitializationOptions) {
        let cwd = std::env::current_dir().unwrap_or_default();
        self.apply_settings(options, &cwd);
        self.probe_all().await;
    }

    /// Handles a raw `workspace/didChangeConfiguration` payload. Only a
    /// payload carrying `settings` or `globalSettings` replaces the registry.
    pub async fn change_configuration(&self, settings: serde_json::Value) {
        match InitializationOptions::from_change(settings) {
            Ok(Some(options)) => self.apply_configuration(&options).await,
            Ok(None) => self
                .notifier
                .log("Configuration change carries no settings; keeping current workspaces"),
            Err(e) => self
                .notifier
                .error(format!("Ignoring malformed settings: {e}")),
        }
    }

    fn apply_settings(&self, options: &InitializationOptions, cwd: &Path) {
        for e in self.registry.replace(options, cwd) {
            self.notifier.warning(e.to_string());
        }
        self.notifier
            .set_level(self.registry.resolve_default().show_notifications);

        self.notifier.log(format!(
            "Settings used to run Server:\r\n{}\r\n",
            serde_json::to_string_pretty(&options.settings).unwrap_or_default()
        ));
        self.notifier.log(format!(
            "Global settings:\r\n{}\r\n",
            serde_json::to_string_pretty(&options.global_settings).unwrap_or_default()
        ));
    }

    /// Stops helper processes.
    pub async fn shutdown(&self) {
        self.invoker.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use lsp_types::{DiagnosticSeverity, MessageType, NumberOrString, Position, Url};
    use serde_json::json;

    use super::*;
    use crate::editor::testing::RecordingClient;
    use crate::lint::Version;
    use crate::lint::runner::{InvocationResult, ModuleRun};

    /// Answers module runs from a fixed table keyed by the last argument.
    struct ScriptedHost {
        version_output: String,
        ranges_output: String,
        lint_stderr: String,
        argvs: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedHost {
        fn new(version_output: &str, ranges_output: &str, lint_stderr: &str) -> Arc<Self> {
            Arc::new(Self {
                version_output: version_output.to_string(),
                ranges_output: ranges_output.to_string(),
                lint_stderr: lint_stderr.to_string(),
                argvs: Mutex::new(Vec::new()),
            })
        }
    }

    impl ModuleHost for ScriptedHost {
        fn run_module(&self, run: &ModuleRun, _search_path: &mut Vec<PathBuf>) -> Result<InvocationResult, ToolError> {
            self.argvs.lock().unwrap().push(run.argv.clone());
            let (stdout, stderr) = match run.argv.last().map(String::as_str) {
                Some("--version") => (self.version_output.clone(), String::new()),
                Some("--ranges") => (String::new(), self.ranges_output.clone()),
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

    fn linter(host: Arc<ScriptedHost>) -> (Arc<RecordingClient>, Linter) {
        let client = Arc::new(RecordingClient::default());
        let linter = Linter::builder()
            .host_interpreter(["python3"])
            .module_host(host)
            .build(client.clone());
        (client, linter)
    }

    fn options_for(root: &Path) -> InitializationOptions {
        InitializationOptions::from_value(Some(json!({
            "settings": [{ "workspace": Url::from_file_path(root).unwrap().to_string() }]
        })))
        .unwrap()
    }

    #[tokio::test]
    async fn test_probe_bumps_version_when_ranges_work() {
        let host = ScriptedHost::new("gaplint version 1.4.2\n", "", "");
        let (_, linter) = linter(host);
        let root = tempfile::tempdir().unwrap();
        linter.registry().replace(&options_for(root.path()), root.path());

        let config = linter.registry().resolve_default();
        let record = linter.probe(&config).await.unwrap();
        assert_eq!(record.version, Version::new(1, 5, 0));
        assert!(record.supports_range_output);
        assert_eq!(linter.registry().version_for(&config.root), Some(record));
    }

    #[tokio::test]
    async fn test_probe_reports_unsupported_version() {
        let host = ScriptedHost::new(
            "gaplint version 1.3.0\n",
            "usage: gaplint [options]\ngaplint: error: unrecognized arguments: --ranges\n",
            "",
        );
        let (client, linter) = linter(host);
        let root = tempfile::tempdir().unwrap();
        linter.registry().replace(&options_for(root.path()), root.path());

        let record = linter.probe(&linter.registry().resolve_default()).await.unwrap();
        assert_eq!(record.version, Version::new(1, 3, 0));
        assert!(!record.supports_range_output);
        assert!(
            client
                .logs
                .lock()
                .unwrap()
                .iter()
                .any(|(typ, msg)| *typ == MessageType::ERROR && msg.contains("NOT supported"))
        );
    }

    #[tokio::test]
    async fn test_probe_without_output_leaves_no_record() {
        let host = ScriptedHost::new("", "", "");
        let (_, linter) = linter(host);
        let root = tempfile::tempdir().unwrap();
        linter.registry().replace(&options_for(root.path()), root.path());

        linter.probe_all().await;
        let config = linter.registry().resolve_default();
        assert!(linter.registry().version_for(&config.root).is_none());
    }

    #[tokio::test]
    async fn test_lint_pass_parses_stderr() {
        let host = ScriptedHost::new(
            "gaplint version 1.6.1\n",
            "",
            "test.g:20:0-147: Unused function arguments: arg [W046/unused-func-args]\n\
             Analysed 1 file\n\
             test.g:5-5:8-11: msg [W009/not-enough-space-before-comment]\n",
        );
        let (_, linter) = linter(host.clone());
        let root = tempfile::tempdir().unwrap();
        linter.initialize(&options_for(root.path())).await;

        let uri = Url::from_file_path(root.path().join("test.g")).unwrap();
        let diagnostics = linter.lint(&LintTarget::new(uri, "", Some(1))).await.unwrap();
        assert_eq!(diagnostics.len(), 2);

        let first = &diagnostics[0];
        assert_eq!(first.range.start, Position { line: 19, character: 0 });
        assert_eq!(first.range.end, Position { line: 19, character: 146 });
        assert_eq!(first.message, "Unused function arguments: arg");
        assert_eq!(
            first.code,
            Some(NumberOrString::String("W046/unused-func-args".to_string()))
        );
        assert_eq!(first.severity, Some(DiagnosticSeverity::WARNING));
        assert_eq!(first.source.as_deref(), Some("gaplint"));

        let second = &diagnostics[1];
        assert_eq!(second.range.start, Position { line: 4, character: 7 });
        assert_eq!(second.range.end, Position { line: 4, character: 10 });

        let argvs = host.argvs.lock().unwrap();
        let lint_argv = argvs.last().unwrap();
        assert!(lint_argv.contains(&"--ranges".to_string()));
    }

    #[tokio::test]
    async fn test_lint_applies_severity_overrides() {
        let host = ScriptedHost::new("", "", "a.g:1: msg [W009/not-enough-space-before-comment]\n");
        let (_, linter) = linter(host.clone());
        let root = tempfile::tempdir().unwrap();
        let options = InitializationOptions::from_value(Some(json!({
            "settings": [{
                "workspace": Url::from_file_path(root.path()).unwrap().to_string(),
                "severity": { "W009": "Information", "warning": "Warning" }
            }]
        })))
        .unwrap();
        linter.registry().replace(&options, root.path());

        let uri = Url::from_file_path(root.path().join("a.g")).unwrap();
        let diagnostics = linter.lint(&LintTarget::new(uri, "", None)).await.unwrap();
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::INFORMATION));

        // No version record, so no range flag.
        let argvs = host.argvs.lock().unwrap();
        assert!(!argvs.last().unwrap().contains(&"--ranges".to_string()));
    }

    #[tokio::test]
    async fn test_initialize_without_settings_registers_cwd() {
        let host = ScriptedHost::new("gaplint version 1.6.1\n", "", "");
        let (client, linter) = linter(host);
        linter.initialize(&InitializationOptions::default()).await;

        let workspaces = linter.registry().workspaces();
        assert_eq!(workspaces.len(), 1);
        assert!(linter.registry().version_for(&workspaces[0].root).is_some());
        assert!(
            client
                .logs
                .lock()
                .unwrap()
                .iter()
                .any(|(_, msg)| msg.starts_with("CWD Server: "))
        );
    }

    #[tokio::test]
    async fn test_configuration_change_sets_notification_level() {
        let host = ScriptedHost::new("gaplint version 1.6.1\n", "", "");
        let (_, linter) = linter(host);
        let root = tempfile::tempdir().unwrap();
        let options = InitializationOptions::from_value(Some(json!({
            "globalSettings": { "showNotifications": "onWarning" },
            "settings": [{ "workspace": Url::from_file_path(root.path()).unwrap().to_string() }]
        })))
        .unwrap();

        linter.apply_configuration(&options).await;
        assert_eq!(
            linter.notifier().level(),
            crate::config::NotificationLevel::OnWarning
        );
    }

    #[tokio::test]
    async fn test_change_without_settings_keeps_workspaces() {
        let host = ScriptedHost::new("gaplint version 1.6.1\n", "", "");
        let (client, linter) = linter(host);
        let root = tempfile::tempdir().unwrap();
        let options = InitializationOptions::from_value(Some(json!({
            "settings": [{
                "workspace": Url::from_file_path(root.path()).unwrap().to_string(),
                "severity": { "W046": "Error" }
            }]
        })))
        .unwrap();
        linter.initialize(&options).await;
        let before = linter.registry().workspaces();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].severity_overrides["W046"], "Error");

        linter.change_configuration(json!({ "gaplint": { "enabled": true } })).await;
        linter.change_configuration(json!({})).await;
        linter.change_configuration(serde_json::Value::Null).await;
        assert_eq!(linter.registry().workspaces(), before);

        linter.change_configuration(json!({ "settings": 7 })).await;
        assert_eq!(linter.registry().workspaces(), before);
        assert!(
            client
                .logs
                .lock()
                .unwrap()
                .iter()
                .any(|(typ, msg)| *typ == MessageType::ERROR && msg.starts_with("Ignoring malformed settings"))
        );

        let other = tempfile::tempdir().unwrap();
        linter
            .change_configuration(json!({
                "settings": [{ "workspace": Url::from_file_path(other.path()).unwrap().to_string() }]
            }))
            .await;
        let after = linter.registry().workspaces();
        assert_eq!(after.len(), 1);
        assert_ne!(after[0].root, before[0].root);
    }
}
