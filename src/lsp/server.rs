//! The language server main loop.
//!
//! Wires the [`DocumentController`] and [`Linter`] into an `async-lsp`
//! router and serves it over stdio.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use async_lsp::client_monitor::ClientProcessMonitorLayer;
use async_lsp::concurrency::ConcurrencyLayer;
use async_lsp::panic::CatchUnwindLayer;
use async_lsp::router::Router;
use async_lsp::server::LifecycleLayer;
use async_lsp::tracing::TracingLayer;
use async_lsp::{ClientSocket, MainLoop};
use lsp_types::{
    Diagnostic, InitializeResult, LogMessageParams, MessageType, PublishDiagnosticsParams,
    SaveOptions, ServerCapabilities, ServerInfo, ShowMessageParams, TextDocumentSyncCapability,
    TextDocumentSyncKind, TextDocumentSyncOptions, TextDocumentSyncSaveOptions, Url, notification,
    request,
};
use tower::ServiceBuilder;
use tracing::{debug, info, warn};

use super::controller::DocumentController;
use crate::config::InitializationOptions;
use crate::editor::EditorClient;
use crate::error::Result;
use crate::lint::runner::ModuleHost;
use crate::lint::{Linter, ToolSpec};

/// Process-level options, usually from the command line.
#[derive(Default)]
pub struct ServerOptions {
    /// Interpreter command line the server runs modules with.
    pub host_interpreter: Vec<String>,
    /// Helper script for workspaces using another interpreter.
    pub runner: Option<PathBuf>,
    /// Library roots whose files are never linted.
    pub stdlib_paths: Vec<PathBuf>,
    /// The tool being driven.
    pub tool: ToolSpec,
    /// Replaces the default in-process module host.
    pub module_host: Option<Arc<dyn ModuleHost>>,
}

impl ServerOptions {
    /// Builds the pipeline, reporting to `client`.
    pub fn into_linter(self, client: Arc<dyn EditorClient>) -> Linter {
        let mut builder = Linter::builder()
            .tool(self.tool)
            .host_interpreter(self.host_interpreter);
        if let Some(runner) = self.runner {
            builder = builder.runner(runner);
        }
        if let Some(host) = self.module_host {
            builder = builder.module_host(host);
        }
        for path in self.stdlib_paths {
            builder = builder.stdlib_path(path);
        }
        builder.build(client)
    }
}

impl EditorClient for ClientSocket {
    fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>, version: Option<i32>) {
        let params = PublishDiagnosticsParams {
            uri,
            diagnostics,
            version,
        };
        if let Err(e) = self.notify::<notification::PublishDiagnostics>(params) {
            warn!(error = %e, "failed to publish diagnostics");
        }
    }

    fn log_message(&self, typ: MessageType, message: String) {
        if let Err(e) = self.notify::<notification::LogMessage>(LogMessageParams { typ, message }) {
            warn!(error = %e, "failed to send log message");
        }
    }

    fn show_message(&self, typ: MessageType, message: String) {
        if let Err(e) = self.notify::<notification::ShowMessage>(ShowMessageParams { typ, message }) {
            warn!(error = %e, "failed to show message");
        }
    }
}

/// State shared by the router's handlers.
pub struct ServerState {
    controller: Arc<DocumentController>,
}

impl ServerState {
    fn linter(&self) -> Arc<Linter> {
        Arc::clone(self.controller.linter())
    }
}

fn capabilities() -> InitializeResult {
    InitializeResult {
        capabilities: ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::FULL),
                save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                    include_text: Some(false),
                })),
                ..Default::default()
            })),
            ..Default::default()
        },
        server_info: Some(ServerInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
    }
}

fn parse_options(linter: &Linter, value: Option<serde_json::Value>) -> InitializationOptions {
    InitializationOptions::from_value(value).unwrap_or_else(|e| {
        linter
            .notifier()
            .error(format!("Ignoring malformed settings: {e}"));
        InitializationOptions::default()
    })
}

/// Builds the request router around `linter`.
pub fn router(linter: Arc<Linter>) -> Router<ServerState> {
    let controller = Arc::new(DocumentController::new(linter));
    let mut router = Router::new(ServerState { controller });

    router
        .request::<request::Initialize, _>(|st, params| {
            let linter = st.linter();
            async move {
                let options = parse_options(&linter, params.initialization_options);
                linter.initialize(&options).await;
                Ok(capabilities())
            }
        })
        .request::<request::Shutdown, _>(|st, ()| {
            let linter = st.linter();
            async move {
                linter.shutdown().await;
                Ok(())
            }
        })
        .notification::<notification::Initialized>(|_, _| ControlFlow::Continue(()))
        .notification::<notification::DidOpenTextDocument>(|st, params| {
            let doc = params.text_document;
            st.controller.did_open(doc.uri, doc.text, Some(doc.version));
            ControlFlow::Continue(())
        })
        .notification::<notification::DidChangeTextDocument>(|st, params| {
            // Full sync: the last change carries the whole text.
            if let Some(change) = params.content_changes.into_iter().last() {
                st.controller.did_change(
                    &params.text_document.uri,
                    change.text,
                    Some(params.text_document.version),
                );
            }
            ControlFlow::Continue(())
        })
        .notification::<notification::DidSaveTextDocument>(|st, params| {
            st.controller.did_save(&params.text_document.uri, params.text);
            ControlFlow::Continue(())
        })
        .notification::<notification::DidCloseTextDocument>(|st, params| {
            st.controller.did_close(&params.text_document.uri);
            ControlFlow::Continue(())
        })
        .notification::<notification::DidChangeConfiguration>(|st, params| {
            let linter = st.linter();
            tokio::spawn(async move { linter.change_configuration(params.settings).await });
            ControlFlow::Continue(())
        })
        .notification::<notification::Exit>(|_, ()| ControlFlow::Continue(()))
        .unhandled_notification(|_, notif| {
            debug!(method = %notif.method, "ignoring notification");
            ControlFlow::Continue(())
        });

    router
}

/// Serves the language server on `input`/`output` until the client exits.
///
/// # Errors
///
/// Returns an error if the transport fails.
pub async fn serve<I, O>(options: ServerOptions, input: I, output: O) -> Result<()>
where
    I: futures::AsyncRead,
    O: futures::AsyncWrite,
{
    let mut served = None;
    let (server, _) = MainLoop::new_server(|client| {
        let linter = Arc::new(options.into_linter(Arc::new(client.clone())));
        served = Some(Arc::clone(&linter));
        ServiceBuilder::new()
            .layer(TracingLayer::default())
            .layer(LifecycleLayer::default())
            .layer(CatchUnwindLayer::default())
            .layer(ConcurrencyLayer::default())
            .layer(ClientProcessMonitorLayer::new(client))
            .service(router(linter))
    });

    let outcome = server.run_buffered(input, output).await;

    // `exit` may arrive without `shutdown`; helpers must not outlive us.
    if let Some(linter) = served {
        linter.shutdown().await;
    }
    outcome?;
    Ok(())
}

/// Serves the language server over stdin/stdout.
///
/// # Errors
///
/// Returns an error if stdio cannot be set up or the transport fails.
pub async fn run_stdio(options: ServerOptions) -> Result<()> {
    #[cfg(unix)]
    let (stdin, stdout) = (
        async_lsp::stdio::PipeStdin::lock_tokio()?,
        async_lsp::stdio::PipeStdout::lock_tokio()?,
    );
    #[cfg(not(unix))]
    let (stdin, stdout) = (
        tokio_util::compat::TokioAsyncReadCompatExt::compat(tokio::io::stdin()),
        tokio_util::compat::TokioAsyncWriteCompatExt::compat_write(tokio::io::stdout()),
    );

    info!("serving on stdio");
    serve(options, stdin, stdout).await
}
