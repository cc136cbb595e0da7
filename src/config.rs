//! Editor settings for the language server.
//!
//! The editor sends a `globalSettings` object plus one `settings` entry per
//! workspace folder in `initializationOptions` (and again in
//! `workspace/didChangeConfiguration`). Every field is optional: a workspace
//! entry falls back to the global value, which falls back to a built-in
//! default. The resolved, fully populated form is [`WorkspaceConfig`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lsp_types::Url;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Token selecting the workspace root as working directory.
pub const CWD_WORKSPACE_FOLDER: &str = "${workspaceFolder}";
/// Token selecting the document's directory as working directory.
pub const CWD_FILE_DIRNAME: &str = "${fileDirname}";

/// Where bundled libraries go relative to the inherited search path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportStrategy {
    /// Prefer the libraries shipped with the server.
    #[default]
    UseBundled,
    /// Prefer whatever the user's environment provides.
    FromEnvironment,
}

impl ImportStrategy {
    /// The wire name, also exported to child processes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UseBundled => "useBundled",
            Self::FromEnvironment => "fromEnvironment",
        }
    }
}

/// Which log levels also raise a popup notification in the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationLevel {
    /// Never show popups.
    #[default]
    Off,
    /// Show popups for errors.
    OnError,
    /// Show popups for warnings and errors.
    OnWarning,
    /// Show popups for everything that is logged with notification.
    Always,
}

/// How the tool's working directory is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CwdPolicy {
    /// Run in the workspace root.
    #[default]
    WorkspaceRoot,
    /// Run in the linted document's directory.
    DocumentDirectory,
    /// Run in a literal directory.
    Explicit(PathBuf),
}

impl CwdPolicy {
    /// Resolves the working directory for a workspace and optional document.
    pub fn resolve(&self, workspace_root: &Path, document: Option<&Path>) -> PathBuf {
        match self {
            Self::WorkspaceRoot => workspace_root.to_path_buf(),
            Self::DocumentDirectory => document
                .and_then(Path::parent)
                .map_or_else(|| workspace_root.to_path_buf(), Path::to_path_buf),
            Self::Explicit(path) => path.clone(),
        }
    }
}

impl From<String> for CwdPolicy {
    fn from(token: String) -> Self {
        match token.as_str() {
            CWD_WORKSPACE_FOLDER => Self::WorkspaceRoot,
            CWD_FILE_DIRNAME => Self::DocumentDirectory,
            _ => Self::Explicit(PathBuf::from(token)),
        }
    }
}

impl From<CwdPolicy> for String {
    fn from(policy: CwdPolicy) -> Self {
        match policy {
            CwdPolicy::WorkspaceRoot => CWD_WORKSPACE_FOLDER.to_string(),
            CwdPolicy::DocumentDirectory => CWD_FILE_DIRNAME.to_string(),
            CwdPolicy::Explicit(path) => path.display().to_string(),
        }
    }
}

/// Settings shared by every workspace unless overridden.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    /// Whether linting is enabled.
    pub enabled: Option<bool>,
    /// Explicit executable command line.
    pub path: Option<Vec<String>>,
    /// Interpreter command line used to run the tool module.
    pub interpreter: Option<Vec<String>>,
    /// Extra tool arguments.
    pub args: Option<Vec<String>>,
    /// Severity overrides keyed by code, category, or symbol.
    pub severity: Option<HashMap<String, String>>,
    /// Glob patterns of files never linted.
    pub ignore_patterns: Option<Vec<String>>,
    /// Import strategy for bundled libraries.
    pub import_strategy: Option<ImportStrategy>,
    /// Popup notification level.
    pub show_notifications: Option<NotificationLevel>,
    /// Extra module search paths.
    pub extra_paths: Option<Vec<String>>,
    /// Working directory policy.
    pub cwd: Option<CwdPolicy>,
}

/// One workspace folder's settings as sent by the editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceSettings {
    /// Workspace folder URI.
    pub workspace: String,
    /// Per-workspace overrides of the global settings.
    #[serde(flatten)]
    pub overrides: GlobalSettings,
}

/// Shape of `initializationOptions` and of the configuration-change payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializationOptions {
    /// Global settings.
    pub global_settings: GlobalSettings,
    /// Per-workspace settings.
    pub settings: Vec<WorkspaceSettings>,
}

impl InitializationOptions {
    /// Parses the raw JSON payload. A missing payload yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSettings`] if the payload has the wrong shape.
    pub fn from_value(value: Option<serde_json::Value>) -> Result<Self, ConfigError> {
        match value {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    /// Parses a configuration-change payload. Returns `None` unless it is an
    /// object carrying `settings` or `globalSettings`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSettings`] if those keys have the wrong shape.
    pub fn from_change(value: serde_json::Value) -> Result<Option<Self>, ConfigError> {
        let carries_settings = value
            .as_object()
            .is_some_and(|map| map.contains_key("settings") || map.contains_key("globalSettings"));
        if !carries_settings {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}

/// Fully resolved settings for one workspace root.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceConfig {
    /// Normalized workspace root; the registry key.
    pub root: PathBuf,
    /// Whether linting is enabled.
    pub enabled: bool,
    /// Explicit executable command line; overrides every other strategy.
    pub executable_path: Vec<String>,
    /// Interpreter command line.
    pub interpreter: Vec<String>,
    /// Arguments appended after the default tool arguments.
    pub extra_args: Vec<String>,
    /// Severity overrides.
    pub severity_overrides: HashMap<String, String>,
    /// Glob patterns of files never linted.
    pub ignore_patterns: Vec<String>,
    /// Extra module search paths.
    pub extra_search_paths: Vec<String>,
    /// Working directory policy.
    pub working_directory: CwdPolicy,
    /// Import strategy exported to child processes.
    pub import_strategy: ImportStrategy,
    /// Popup notification level.
    pub show_notifications: NotificationLevel,
}

/// Default severity overrides: symbol classes map onto these keys.
pub fn default_severity() -> HashMap<String, String> {
    HashMap::from([
        ("error".to_string(), "Error".to_string()),
        ("warning".to_string(), "Warning".to_string()),
    ])
}

impl WorkspaceConfig {
    /// Builds a config for `root` purely from global settings.
    pub fn from_defaults(root: PathBuf, global: &GlobalSettings, host_interpreter: &[String]) -> Self {
        Self::merged(root, &GlobalSettings::default(), global, host_interpreter)
    }

    /// Builds a config from a workspace entry, filling gaps from `global`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotAFileUri`] if the entry's workspace is not a
    /// `file:` URI or a plain path.
    pub fn from_settings(
        entry: &WorkspaceSettings,
        global: &GlobalSettings,
        host_interpreter: &[String],
    ) -> Result<Self, ConfigError> {
        let root = workspace_root_from_uri(&entry.workspace)?;
        Ok(Self::merged(root, &entry.overrides, global, host_interpreter))
    }

    fn merged(
        root: PathBuf,
        own: &GlobalSettings,
        global: &GlobalSettings,
        host_interpreter: &[String],
    ) -> Self {
        fn pick<T: Clone>(own: Option<&T>, global: Option<&T>) -> Option<T> {
            own.or(global).cloned()
        }

        Self {
            root,
            enabled: pick(own.enabled.as_ref(), global.enabled.as_ref()).unwrap_or(true),
            executable_path: pick(own.path.as_ref(), global.path.as_ref()).unwrap_or_default(),
            interpreter: pick(own.interpreter.as_ref(), global.interpreter.as_ref())
                .unwrap_or_else(|| host_interpreter.to_vec()),
            extra_args: pick(own.args.as_ref(), global.args.as_ref()).unwrap_or_default(),
            severity_overrides: pick(own.severity.as_ref(), global.severity.as_ref())
                .unwrap_or_else(default_severity),
            ignore_patterns: pick(own.ignore_patterns.as_ref(), global.ignore_patterns.as_ref())
                .unwrap_or_default(),
            extra_search_paths: pick(own.extra_paths.as_ref(), global.extra_paths.as_ref())
                .unwrap_or_default(),
            working_directory: pick(own.cwd.as_ref(), global.cwd.as_ref()).unwrap_or_default(),
            import_strategy: pick(own.import_strategy.as_ref(), global.import_strategy.as_ref())
                .unwrap_or_default(),
            show_notifications: pick(
                own.show_notifications.as_ref(),
                global.show_notifications.as_ref(),
            )
            .unwrap_or_default(),
        }
    }

    /// Working directory for a run, optionally on behalf of a document.
    pub fn cwd(&self, document: Option<&Path>) -> PathBuf {
        self.working_directory.resolve(&self.root, document)
    }
}

fn workspace_root_from_uri(workspace: &str) -> Result<PathBuf, ConfigError> {
    let path = match Url::parse(workspace) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|()| ConfigError::NotAFileUri(workspace.to_string()))?,
        Ok(_) => return Err(ConfigError::NotAFileUri(workspace.to_string())),
        // Some editors send plain paths.
        Err(_) => PathBuf::from(workspace),
    };
    Ok(crate::lsp::types::normalize_path(&path))
}
