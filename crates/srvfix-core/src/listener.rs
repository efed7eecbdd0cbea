//! Callbacks from the adapted server to its front end.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::Error;

/// Lifecycle and output notifications.
///
/// Replacement functions may call these from any engine thread, hence the
/// `Send + Sync` bound. Every method defaults to a no-op.
pub trait GameListener: Send + Sync {
    /// Dedicated server and launcher libraries are loaded
    fn on_server_loaded(&self) {}
    fn on_server_started(&self) {}
    /// The engine ran its last frame
    fn on_server_stopped(&self) {}
    /// Opportunity for the front end to pump its own events
    fn on_game_frame(&self) {}
    fn on_console_output(&self, _text: &str) {}
    fn on_warning(&self, _text: &str) {}
    /// Fatal; the process is about to stop
    fn on_error(&self, _text: &str) {}
    /// A requested server variable's value arrived
    fn on_value_received(&self, _name: &str, _value: &str) {}
    fn on_data_updated(&self, _name: &str) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl GameListener for NullListener {}

/// Forwards every notification to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl GameListener for TracingListener {
    fn on_server_loaded(&self) {
        info!("Server libraries loaded");
    }

    fn on_server_started(&self) {
        info!("Server started");
    }

    fn on_server_stopped(&self) {
        info!("Server stopped");
    }

    fn on_console_output(&self, text: &str) {
        info!(target: "srvfix::console", "{}", text.trim_end());
    }

    fn on_warning(&self, text: &str) {
        warn!("{}", text.trim_end());
    }

    fn on_error(&self, text: &str) {
        error!("{}", text.trim_end());
    }

    fn on_value_received(&self, name: &str, value: &str) {
        debug!("{} = {}", name, value);
    }

    fn on_data_updated(&self, name: &str) {
        debug!("{} updated", name);
    }
}

/// Routes warnings and fatal errors to the listener.
#[derive(Clone)]
pub struct ErrorReporter {
    listener: Arc<dyn GameListener>,
    exit_on_fatal: bool,
}

impl ErrorReporter {
    pub fn new(listener: Arc<dyn GameListener>, exit_on_fatal: bool) -> Self {
        Self {
            listener,
            exit_on_fatal,
        }
    }

    pub fn listener(&self) -> &Arc<dyn GameListener> {
        &self.listener
    }

    pub fn warning(&self, message: &str) {
        warn!("{}", message.trim_end());
        self.listener.on_warning(message);
    }

    /// Report `err` as fatal.
    ///
    /// Exits the process with status 1 when configured to; otherwise returns
    /// the error as [`Error::Fatal`] for the caller to propagate.
    pub fn fatal(&self, err: Error) -> Error {
        let message = err.to_string();
        error!("{}", message.trim_end());
        self.listener.on_error(&message);
        if self.exit_on_fatal {
            std::process::exit(1);
        }
        Error::Fatal(message)
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("exit_on_fatal", &self.exit_on_fatal)
            .finish_non_exhaustive()
    }
}
