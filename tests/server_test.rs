//! A full LSP session over an in-memory transport.

mod common;

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_lsp::router::Router;
use async_lsp::{LanguageServer, MainLoop};
use common::{SAMPLE_REPORT, ScriptedHost, TestWorkspace};
use gaplint_ls::lsp::{ServerOptions, serve};
use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, InitializeParams, InitializedParams, PublishDiagnosticsParams,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentSyncCapability, TextDocumentSyncKind, VersionedTextDocumentIdentifier,
    notification,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tower::ServiceBuilder;

struct ClientState {
    published: mpsc::UnboundedSender<PublishDiagnosticsParams>,
    logs: Arc<Mutex<Vec<String>>>,
}

async fn next_publish(rx: &mut mpsc::UnboundedReceiver<PublishDiagnosticsParams>) -> PublishDiagnosticsParams {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for diagnostics")
        .expect("client loop stopped")
}

#[tokio::test]
async fn test_open_change_save_close_session() {
    let ws = TestWorkspace::new();
    ws.write("test.g", "");
    let host = ScriptedHost::new("gaplint version 1.6.1\n", SAMPLE_REPORT);

    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    let options = ServerOptions {
        host_interpreter: vec!["python3".to_string()],
        module_host: Some(host.clone()),
        ..ServerOptions::default()
    };
    let (server_read, server_write) = tokio::io::split(server_io);
    let server_task = tokio::spawn(serve(options, server_read.compat(), server_write.compat_write()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let logs = Arc::new(Mutex::new(Vec::new()));
    let (client_loop, mut server) = MainLoop::new_client(|_server| {
        let mut router = Router::new(ClientState {
            published: tx,
            logs: Arc::clone(&logs),
        });
        router
            .notification::<notification::PublishDiagnostics>(|st, params| {
                let _ = st.published.send(params);
                ControlFlow::Continue(())
            })
            .notification::<notification::LogMessage>(|st, params| {
                st.logs.lock().unwrap().push(params.message);
                ControlFlow::Continue(())
            })
            .unhandled_notification(|_, _| ControlFlow::Continue(()));
        ServiceBuilder::new().service(router)
    });
    let (client_read, client_write) = tokio::io::split(client_io);
    let client_task = tokio::spawn(async move {
        client_loop
            .run_buffered(client_read.compat(), client_write.compat_write())
            .await
    });

    let init = server
        .initialize(InitializeParams {
            initialization_options: Some(json!({ "settings": [ws.settings(json!({}))] })),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        init.capabilities.text_document_sync.and_then(|sync| match sync {
            TextDocumentSyncCapability::Options(options) => options.change,
            TextDocumentSyncCapability::Kind(kind) => Some(kind),
        }),
        Some(TextDocumentSyncKind::FULL)
    );
    assert_eq!(init.server_info.unwrap().name, "gaplint-ls");
    server.initialized(InitializedParams {}).unwrap();

    let uri = ws.uri("test.g");
    server
        .did_open(DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.clone(),
                language_id: "gap".to_string(),
                version: 1,
                text: "f := function(arg) return 1; end;\n".to_string(),
            },
        })
        .unwrap();
    let published = next_publish(&mut rx).await;
    assert_eq!(published.uri, uri);
    assert_eq!(published.version, Some(1));
    assert_eq!(published.diagnostics.len(), 2);

    server
        .did_change(DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier {
                uri: uri.clone(),
                version: 2,
            },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "f := function() return 1; end;\n".to_string(),
            }],
        })
        .unwrap();
    server
        .did_save(DidSaveTextDocumentParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            text: None,
        })
        .unwrap();
    // Changes are not linted; the save is, with the changed version.
    let published = next_publish(&mut rx).await;
    assert_eq!(published.version, Some(2));
    assert_eq!(host.lint_argvs().len(), 2);

    server
        .did_close(DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
        })
        .unwrap();
    let published = next_publish(&mut rx).await;
    assert_eq!(published.uri, uri);
    assert!(published.diagnostics.is_empty());

    server.shutdown(()).await.unwrap();
    server.exit(()).unwrap();
    server_task.await.unwrap().unwrap();
    drop(server);
    let _ = client_task.await;

    let logs = logs.lock().unwrap();
    assert!(logs.iter().any(|msg| msg.starts_with("CWD Server: ")));
    assert!(logs.iter().any(|msg| msg.contains("SUPPORTED gaplint>=1.4.0")));
}

#[tokio::test]
async fn test_initialize_with_malformed_settings_falls_back() {
    let host = ScriptedHost::new("gaplint version 1.6.1\n", "");
    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    let options = ServerOptions {
        host_interpreter: vec!["python3".to_string()],
        module_host: Some(host),
        ..ServerOptions::default()
    };
    let (server_read, server_write) = tokio::io::split(server_io);
    let server_task = tokio::spawn(serve(options, server_read.compat(), server_write.compat_write()));

    let logs = Arc::new(Mutex::new(Vec::new()));
    let (tx, _rx) = mpsc::unbounded_channel();
    let (client_loop, mut server) = MainLoop::new_client(|_server| {
        let mut router = Router::new(ClientState {
            published: tx,
            logs: Arc::clone(&logs),
        });
        router
            .notification::<notification::LogMessage>(|st, params| {
                st.logs.lock().unwrap().push(params.message);
                ControlFlow::Continue(())
            })
            .unhandled_notification(|_, _| ControlFlow::Continue(()));
        ServiceBuilder::new().service(router)
    });
    let (client_read, client_write) = tokio::io::split(client_io);
    let client_task = tokio::spawn(async move {
        client_loop
            .run_buffered(client_read.compat(), client_write.compat_write())
            .await
    });

    // `settings` must be a list; the server keeps running on defaults.
    server
        .initialize(InitializeParams {
            initialization_options: Some(json!({ "settings": "not a list" })),
            ..Default::default()
        })
        .await
        .unwrap();
    server.initialized(InitializedParams {}).unwrap();
    server.shutdown(()).await.unwrap();
    server.exit(()).unwrap();
    server_task.await.unwrap().unwrap();
    drop(server);
    let _ = client_task.await;

    let logs = logs.lock().unwrap();
    assert!(logs.iter().any(|msg| msg.starts_with("Ignoring malformed settings")));
}
