use std::path::{Path, PathBuf};

use gaplint_ls::config::InitializationOptions;
use lsp_types::Url;
use serde_json::{Value, json};
use tempfile::TempDir;

/// A temporary workspace folder that is removed on drop.
pub struct TestWorkspace {
    _dir: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    /// Creates an empty workspace.
    ///
    /// ## Panics
    /// if the temporary directory cannot be created
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let root = dir.path().canonicalize().expect("failed to canonicalize temp dir");
        Self { _dir: dir, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn uri(&self, relative: &str) -> Url {
        Url::from_file_path(self.path(relative)).expect("absolute path")
    }

    pub fn root_uri(&self) -> Url {
        Url::from_file_path(&self.root).expect("absolute path")
    }

    /// Writes a file, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir failed");
        }
        std::fs::write(&path, content).expect("write failed");
        path
    }

    /// Reads a file the fake tool left behind, trimmed.
    pub fn read(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.path(relative))
            .ok()
            .map(|text| text.trim().to_string())
    }

    /// Per-workspace settings entry for this root merged with `overrides`.
    pub fn settings(&self, overrides: Value) -> Value {
        let mut entry = json!({ "workspace": self.root_uri().to_string() });
        if let (Some(entry), Value::Object(overrides)) = (entry.as_object_mut(), overrides) {
            entry.extend(overrides);
        }
        entry
    }

    /// Initialization options registering only this workspace.
    pub fn options(&self, overrides: Value) -> InitializationOptions {
        InitializationOptions::from_value(Some(json!({ "settings": [self.settings(overrides)] })))
            .expect("valid settings")
    }

    /// Installs an executable shell script standing in for gaplint.
    ///
    /// It answers `--version` with `version`. The `--ranges` probe succeeds
    /// silently when `supports_ranges`, otherwise it fails with a usage error
    /// naming the flag. A lint run records its arguments, working directory
    /// and environment under `bin/` and writes `report` to stderr.
    #[cfg(unix)]
    pub fn install_fake_gaplint(&self, version: &str, supports_ranges: bool, report: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let ranges = if supports_ranges {
            "exit 0"
        } else {
            "echo 'usage: gaplint [options] files' >&2; echo 'gaplint: error: unrecognized arguments: --ranges' >&2; exit 2"
        };
        self.write("bin/report.txt", report);
        let script = format!(
            "#!/bin/sh\n\
             here=$(dirname \"$0\")\n\
             for arg in \"$@\"; do last=$arg; done\n\
             case \"$last\" in\n\
             \x20 --version) echo 'gaplint version {version}'; exit 0 ;;\n\
             \x20 --ranges) {ranges} ;;\n\
             esac\n\
             echo \"$@\" > \"$here/argv.txt\"\n\
             pwd -P > \"$here/cwd.txt\"\n\
             echo \"$LS_IMPORT_STRATEGY $PYTHONUTF8\" > \"$here/env.txt\"\n\
             cat \"$here/report.txt\" >&2\n\
             exit 1\n"
        );
        let path = self.write("bin/gaplint", &script);
        let mut permissions = std::fs::metadata(&path).expect("stat failed").permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&path, permissions).expect("chmod failed");
        path
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
