//! Open documents and their lint pass generations.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lsp_types::Url;

#[derive(Debug)]
struct OpenDocument {
    text: String,
    version: Option<i32>,
    generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    documents: HashMap<Url, OpenDocument>,
    next_generation: u64,
}

/// A lint pass that has been started for a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassTicket {
    /// Document identity.
    pub uri: Url,
    /// Text the pass lints.
    pub text: String,
    /// Editor version of that text.
    pub version: Option<i32>,
    /// Generation stamped on the pass; see [`DocumentStore::publish_if_current`].
    pub generation: u64,
}

/// Text of every open document, kept in full-sync mode.
#[derive(Debug, Default)]
pub struct DocumentStore {
    inner: Mutex<Inner>,
}

impl DocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records an opened document, replacing any previous state.
    pub fn open(&self, uri: Url, text: String, version: Option<i32>) {
        self.lock().documents.insert(
            uri,
            OpenDocument {
                text,
                version,
                generation: 0,
            },
        );
    }

    /// Replaces a document's text. Returns `false` if it is not open.
    pub fn change(&self, uri: &Url, text: String, version: Option<i32>) -> bool {
        let mut inner = self.lock();
        let Some(doc) = inner.documents.get_mut(uri) else {
            return false;
        };
        doc.text = text;
        doc.version = version;
        true
    }

    /// Applies a save; `text` is present when the editor includes it.
    /// Returns `false` if the document is not open.
    pub fn save(&self, uri: &Url, text: Option<String>) -> bool {
        let mut inner = self.lock();
        let Some(doc) = inner.documents.get_mut(uri) else {
            return false;
        };
        if let Some(text) = text {
            doc.text = text;
        }
        true
    }

    /// Forgets a document and runs `publish` before anyone else can touch
    /// the store. Returns `false` if it was not open.
    pub fn close_with(&self, uri: &Url, publish: impl FnOnce()) -> bool {
        let mut inner = self.lock();
        let was_open = inner.documents.remove(uri).is_some();
        publish();
        was_open
    }

    /// Starts a lint pass, superseding every earlier pass for the document.
    pub fn begin_pass(&self, uri: &Url) -> Option<PassTicket> {
        let mut inner = self.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let doc = inner.documents.get_mut(uri)?;
        doc.generation = generation;
        Some(PassTicket {
            uri: uri.clone(),
            text: doc.text.clone(),
            version: doc.version,
            generation,
        })
    }

    /// Runs `publish` only while the pass with `generation` is the newest
    /// one for an open document.
    ///
    /// The store stays locked while `publish` runs, so neither a close nor a
    /// newer pass can publish in between. `publish` must not block.
    pub fn publish_if_current(&self, uri: &Url, generation: u64, publish: impl FnOnce()) -> bool {
        let inner = self.lock();
        let current = inner
            .documents
            .get(uri)
            .is_some_and(|doc| doc.generation == generation);
        if current {
            publish();
        }
        current
    }

    /// Number of open documents.
    pub fn len(&self) -> usize {
        self.lock().documents.len()
    }

    /// Whether no document is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
