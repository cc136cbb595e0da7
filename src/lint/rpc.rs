//! JSON-RPC transport to helper processes running under another interpreter.
//!
//! When a workspace selects an interpreter other than the server's own, the
//! tool runs inside a long-lived helper (`<interpreter> <runner script>`)
//! that imports it as a library. Messages use LSP-style
//! `Content-Length: N\r\n\r\n{json}` framing over the helper's stdio.
//!
//! Request:  `{"id", "method": "run", "module", "argv", "useStdin", "cwd", "source"?}`
//! Response: `{"id", "result": <stdout>, "error": <stderr>, "exception": bool}`

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_process::{Child, ChildStdin, ChildStdout};
use futures::io::BufReader;
use futures::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::RpcError;

/// Maximum frame size (16 MiB); tool output for huge files stays well below.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// One run request for a helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    /// Workspace the helper is bound to.
    pub workspace: PathBuf,
    /// Interpreter command line the helper runs under.
    pub interpreter: Vec<String>,
    /// Tool module to import.
    pub module: String,
    /// Argument vector, module name first.
    pub argv: Vec<String>,
    /// Whether `source` is fed on stdin.
    pub use_stdin: bool,
    /// Working directory.
    pub cwd: PathBuf,
    /// Document text.
    pub source: Option<String>,
    /// Environment added when the helper is started.
    pub env: HashMap<String, String>,
}

/// What a helper reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcRunResult {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Description of an exception raised inside the helper.
    pub exception: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunMessage<'a> {
    id: &'a str,
    method: &'static str,
    module: &'a str,
    argv: &'a [String],
    use_stdin: bool,
    cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RunReply {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    exception: bool,
}

fn value_text(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
    }
}

/// A framed request/response channel.
pub struct RpcChannel<R, W> {
    reader: BufReader<R>,
    writer: W,
    next_id: u64,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> RpcChannel<R, W> {
    /// Wraps a reader and writer.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError`] on serialization or IO failure.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), RpcError> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads one frame.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ConnectionClosed`] on EOF before a frame starts and
    /// [`RpcError::Framing`] on malformed headers.
    pub async fn receive(&mut self) -> Result<Value, RpcError> {
        let mut content_length: Option<usize> = None;
        let mut saw_header = false;
        let mut line = String::new();

        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                if saw_header {
                    return Err(RpcError::Framing("unexpected EOF in headers".to_string()));
                }
                return Err(RpcError::ConnectionClosed);
            }
            saw_header = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let len = value
                    .trim()
                    .parse()
                    .map_err(|_| RpcError::Framing(format!("bad Content-Length: {value}")))?;
                content_length = Some(len);
            }
        }

        let len = content_length.ok_or_else(|| RpcError::Framing("missing Content-Length".to_string()))?;
        if len > MAX_FRAME_BYTES {
            return Err(RpcError::Framing(format!(
                "Content-Length {len} exceeds maximum {MAX_FRAME_BYTES}"
            )));
        }

        let mut body = vec![0u8; len];
        self.reader.read_exact(&mut body).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Sends a run request and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::MismatchedId`] if the reply answers a different
    /// request, or any transport error.
    pub async fn run(&mut self, request: &RpcRequest) -> Result<RpcRunResult, RpcError> {
        let id = self.next_id();
        let message = RunMessage {
            id: &id,
            method: "run",
            module: &request.module,
            argv: &request.argv,
            use_stdin: request.use_stdin,
            cwd: request.cwd.display().to_string(),
            source: request.source.as_deref(),
        };
        self.send(&message).await?;

        let reply: RunReply = serde_json::from_value(self.receive().await?)?;
        if reply.id.as_str() != Some(id.as_str()) {
            return Err(RpcError::MismatchedId(id));
        }

        let stdout = value_text(reply.result);
        let error = value_text(reply.error);
        Ok(if reply.exception {
            RpcRunResult {
                stdout,
                stderr: String::new(),
                exception: Some(error),
            }
        } else {
            RpcRunResult {
                stdout,
                stderr: error,
                exception: None,
            }
        })
    }

    /// Asks the helper to exit.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError`] if the message cannot be written.
    pub async fn exit(&mut self) -> Result<(), RpcError> {
        let id = self.next_id();
        self.send(&serde_json::json!({ "id": id, "method": "exit" })).await
    }
}

struct Helper {
    channel: RpcChannel<ChildStdout, ChildStdin>,
    child: Child,
}

type HelperKey = (PathBuf, Vec<String>);

/// Helper processes, one per workspace and interpreter.
pub struct RpcPool {
    runner: Option<PathBuf>,
    helpers: Mutex<HashMap<HelperKey, Arc<Mutex<Helper>>>>,
}

impl RpcPool {
    /// Creates a pool whose helpers execute `runner`.
    pub fn new(runner: Option<PathBuf>) -> Self {
        Self {
            runner,
            helpers: Mutex::new(HashMap::new()),
        }
    }

    /// Runs a request on the workspace's helper, starting it if needed.
    ///
    /// A helper whose transport fails is discarded; the next request starts
    /// a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError`] if the helper cannot be started or the exchange
    /// fails.
    pub async fn run(&self, request: &RpcRequest) -> Result<RpcRunResult, RpcError> {
        let key: HelperKey = (request.workspace.clone(), request.interpreter.clone());
        let helper = self.get_or_start(&key, request).await?;

        let outcome = helper.lock().await.channel.run(request).await;
        if let Err(e) = &outcome {
            warn!(workspace = %request.workspace.display(), error = %e, "dropping RPC helper");
            self.helpers.lock().await.remove(&key);
        }
        outcome
    }

    async fn get_or_start(&self, key: &HelperKey, request: &RpcRequest) -> Result<Arc<Mutex<Helper>>, RpcError> {
        let mut helpers = self.helpers.lock().await;
        if let Some(helper) = helpers.get(key) {
            return Ok(Arc::clone(helper));
        }

        let helper = Arc::new(Mutex::new(self.start(request)?));
        helpers.insert(key.clone(), Arc::clone(&helper));
        Ok(helper)
    }

    fn start(&self, request: &RpcRequest) -> Result<Helper, RpcError> {
        let runner = self.runner.as_ref().ok_or(RpcError::RunnerNotConfigured)?;
        let (program, args) = request.interpreter.split_first().ok_or(RpcError::NoInterpreter)?;

        info!(
            interpreter = %request.interpreter.join(" "),
            workspace = %request.workspace.display(),
            "starting RPC helper"
        );

        let mut child = async_process::Command::new(program)
            .args(args)
            .arg(runner)
            .current_dir(&request.cwd)
            .envs(&request.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RpcError::StartFailed {
                interpreter: program.clone(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| RpcError::StartFailed {
            interpreter: program.clone(),
            message: "failed to capture stdout".to_string(),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| RpcError::StartFailed {
            interpreter: program.clone(),
            message: "failed to capture stdin".to_string(),
        })?;

        Ok(Helper {
            channel: RpcChannel::new(stdout, stdin),
            child,
        })
    }

    /// Number of live helpers.
    pub async fn len(&self) -> usize {
        self.helpers.lock().await.len()
    }

    /// Tells every helper to exit and reaps it.
    pub async fn shutdown(&self) {
        let helpers: Vec<_> = self.helpers.lock().await.drain().collect();
        for ((workspace, _), helper) in helpers {
            let mut helper = helper.lock().await;
            if let Err(e) = helper.channel.exit().await {
                debug!(workspace = %workspace.display(), error = %e, "RPC helper already gone");
            }
            if let Err(e) = helper.child.kill() {
                debug!(error = %e, "RPC helper already exited");
            }
            let _ = helper.child.status().await;
        }
    }
}
