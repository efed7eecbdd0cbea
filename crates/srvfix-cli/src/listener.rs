//! Listener used when the server runs from the terminal.

use std::io::Write;

use srvfix_core::{GameListener, TracingListener};

/// Writes console output to stdout unchanged and logs everything else
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleListener {
    log: TracingListener,
}

impl GameListener for ConsoleListener {
    fn on_server_loaded(&self) {
        self.log.on_server_loaded();
    }

    fn on_server_started(&self) {
        self.log.on_server_started();
    }

    fn on_server_stopped(&self) {
        self.log.on_server_stopped();
    }

    fn on_console_output(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        // Console text already carries its own line breaks
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn on_warning(&self, text: &str) {
        self.log.on_warning(text);
    }

    fn on_error(&self, text: &str) {
        self.log.on_error(text);
        eprint!("{}", text);
    }

    fn on_value_received(&self, name: &str, value: &str) {
        self.log.on_value_received(name, value);
    }

    fn on_data_updated(&self, name: &str) {
        self.log.on_data_updated(name);
    }
}
