//! The editor collaborator as seen by the pipeline.
//!
//! The core only needs to publish diagnostics and send log/popup messages.
//! [`Notifier`] layers the `showNotifications` policy on top: every message
//! goes to the output channel, and warnings/errors additionally pop up when
//! the user opted in.

use std::sync::{Arc, PoisonError, RwLock};

use lsp_types::{Diagnostic, MessageType, Url};
use tracing::{debug, error, info, warn};

use crate::config::NotificationLevel;

/// Messages the server sends to the editor.
pub trait EditorClient: Send + Sync + 'static {
    /// Replaces the diagnostics shown for `uri`.
    fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>, version: Option<i32>);

    /// Writes to the editor's output channel.
    fn log_message(&self, typ: MessageType, message: String);

    /// Shows a popup.
    fn show_message(&self, typ: MessageType, message: String);
}

/// Severity-gated logging to the editor.
pub struct Notifier {
    client: Arc<dyn EditorClient>,
    level: RwLock<NotificationLevel>,
}

impl Notifier {
    /// Creates a notifier that never pops up until a level is set.
    pub fn new(client: Arc<dyn EditorClient>) -> Self {
        Self {
            client,
            level: RwLock::new(NotificationLevel::Off),
        }
    }

    /// The editor this notifier writes to.
    pub fn client(&self) -> &Arc<dyn EditorClient> {
        &self.client
    }

    /// Changes the popup policy.
    pub fn set_level(&self, level: NotificationLevel) {
        *self.level.write().unwrap_or_else(PoisonError::into_inner) = level;
    }

    /// The current popup policy.
    pub fn level(&self) -> NotificationLevel {
        *self.level.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Output channel only.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(target: "gaplint_ls::editor", "{message}");
        self.client.log_message(MessageType::LOG, message);
    }

    /// Informational output, never a popup.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "gaplint_ls::editor", "{message}");
        self.client.log_message(MessageType::INFO, message);
    }

    /// Warning; pops up for `onWarning` and `always`.
    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(target: "gaplint_ls::editor", "{message}");
        self.client.log_message(MessageType::WARNING, message.clone());
        if matches!(
            self.level(),
            NotificationLevel::OnWarning | NotificationLevel::Always
        ) {
            self.client.show_message(MessageType::WARNING, message);
        }
    }

    /// Error; pops up unless notifications are off.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(target: "gaplint_ls::editor", "{message}");
        self.client.log_message(MessageType::ERROR, message.clone());
        if self.level() != NotificationLevel::Off {
            self.client.show_message(MessageType::ERROR, message);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A recording editor for unit tests.

    use std::sync::Mutex;

    use super::*;

    /// Everything the server sent.
    #[derive(Default)]
    pub struct RecordingClient {
        pub published: Mutex<Vec<(Url, Vec<Diagnostic>)>>,
        pub logs: Mutex<Vec<(MessageType, String)>>,
        pub popups: Mutex<Vec<(MessageType, String)>>,
    }

    impl EditorClient for RecordingClient {
        fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>, _version: Option<i32>) {
            self.published.lock().unwrap().push((uri, diagnostics));
        }

        fn log_message(&self, typ: MessageType, message: String) {
            self.logs.lock().unwrap().push((typ, message));
        }

        fn show_message(&self, typ: MessageType, message: String) {
            self.popups.lock().unwrap().push((typ, message));
        }
    }
}
