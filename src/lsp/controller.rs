//! Document lifecycle: lint on open and save, clear on close.
//!
//! Passes run as tokio tasks bounded by a semaphore of [`MAX_WORKERS`]
//! permits. A pass that errors or panics is logged and publishes an empty
//! list. A pass only publishes while it is the newest pass for a document
//! that is still open, so results never arrive out of order.

use std::sync::Arc;

use lsp_types::Url;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::documents::{DocumentStore, PassTicket};
use crate::error::display_chain;
use crate::lint::{LintTarget, Linter};

/// Concurrent lint passes.
pub const MAX_WORKERS: usize = 5;

/// Reacts to document events with lint passes and publishes.
pub struct DocumentController {
    linter: Arc<Linter>,
    documents: Arc<DocumentStore>,
    permits: Arc<Semaphore>,
}

impl DocumentController {
    /// Creates a controller publishing through the linter's editor client.
    pub fn new(linter: Arc<Linter>) -> Self {
        Self {
            linter,
            documents: Arc::new(DocumentStore::new()),
            permits: Arc::new(Semaphore::new(MAX_WORKERS)),
        }
    }

    /// The pipeline passes run through.
    pub fn linter(&self) -> &Arc<Linter> {
        &self.linter
    }

    /// Open documents.
    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Records the document and lints it.
    pub fn did_open(&self, uri: Url, text: String, version: Option<i32>) -> Option<JoinHandle<()>> {
        self.documents.open(uri.clone(), text, version);
        self.schedule(&uri)
    }

    /// Updates the stored text without linting.
    pub fn did_change(&self, uri: &Url, text: String, version: Option<i32>) {
        if !self.documents.change(uri, text, version) {
            debug!(%uri, "change for a document that is not open");
        }
    }

    /// Lints the saved document.
    pub fn did_save(&self, uri: &Url, text: Option<String>) -> Option<JoinHandle<()>> {
        if !self.documents.save(uri, text) {
            debug!(%uri, "save for a document that is not open");
            return None;
        }
        self.schedule(uri)
    }

    /// Forgets the document and clears its diagnostics.
    pub fn did_close(&self, uri: &Url) {
        let client = self.linter.notifier().client();
        let was_open = self
            .documents
            .close_with(uri, || client.publish_diagnostics(uri.clone(), Vec::new(), None));
        if !was_open {
            debug!(%uri, "close for a document that is not open");
        }
    }

    fn schedule(&self, uri: &Url) -> Option<JoinHandle<()>> {
        let ticket = self.documents.begin_pass(uri)?;
        let linter = Arc::clone(&self.linter);
        let documents = Arc::clone(&self.documents);
        let permits = Arc::clone(&self.permits);

        Some(tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            run_pass(linter, &documents, ticket).await;
        }))
    }
}

async fn run_pass(linter: Arc<Linter>, documents: &DocumentStore, ticket: PassTicket) {
    let PassTicket {
        uri,
        text,
        version,
        generation,
    } = ticket;
    let target = LintTarget::new(uri.clone(), text, version);

    // The pass runs in its own task so a panic surfaces as a join error.
    let pass_linter = Arc::clone(&linter);
    let outcome = tokio::spawn(async move { pass_linter.lint(&target).await }).await;

    let diagnostics = match outcome {
        Ok(Ok(diagnostics)) => diagnostics,
        Ok(Err(e)) => {
            linter
                .notifier()
                .error(format!("Linting failed with error:\r\n{}", display_chain(&e)));
            Vec::new()
        }
        Err(e) => {
            error!(%uri, error = %e, "lint pass panicked");
            linter
                .notifier()
                .error(format!("Linting failed with error:\r\n{e}"));
            Vec::new()
        }
    };

    let client = linter.notifier().client();
    let published = documents.publish_if_current(&uri, generation, || {
        client.publish_diagnostics(uri.clone(), diagnostics, version);
    });
    if !published {
        debug!(%uri, generation, "discarding superseded lint result");
    }
}
