//! Dispatch of decoded server-data responses to the listener.
//!
//! The byte encoding of the engine's server-data channel is handled by the
//! [`ServerDataChannel`] implementation; this module only routes what it
//! yields.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use strum::{Display, FromRepr};
use tracing::{debug, warn};

use crate::listener::GameListener;

/// Response kinds the engine defines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, FromRepr, Display)]
#[repr(i32)]
pub enum ResponseKind {
    ResponseValue = 0,
    Update = 1,
    AuthResponse = 2,
    VprofData = 3,
    VprofGroups = 4,
    ScreenshotResponse = 5,
    ConsoleLogResponse = 6,
    ResponseString = 7,
}

/// One decoded response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerResponse {
    /// Raw kind; may be outside [`ResponseKind`]
    pub kind: i32,
    pub variable: String,
    pub value: String,
}

impl ServerResponse {
    pub fn new(kind: ResponseKind, variable: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind as i32,
            variable: variable.into(),
            value: value.into(),
        }
    }
}

/// Source of decoded responses; the frame hook drains it once per frame.
pub trait ServerDataChannel: Send {
    /// Next pending response, `None` once the channel is empty for this frame
    fn next_response(&mut self) -> Option<ServerResponse>;
}

impl ServerDataChannel for VecDeque<ServerResponse> {
    fn next_response(&mut self) -> Option<ServerResponse> {
        self.pop_front()
    }
}

/// What happened to one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// Known kind with no listener callback
    Ignored,
    /// Kind outside the known set
    Unknown,
}

/// Routes responses to listener callbacks.
///
/// Unknown kinds are ignored after a single warning per kind.
#[derive(Debug, Default)]
pub struct ResponseDispatcher {
    warned: HashSet<i32>,
}

impl ResponseDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, response: &ServerResponse, listener: &dyn GameListener) -> Dispatch {
        match ResponseKind::from_repr(response.kind) {
            Some(ResponseKind::ResponseValue) => {
                listener.on_value_received(&response.variable, &response.value);
                Dispatch::Delivered
            }
            Some(ResponseKind::Update) => {
                listener.on_data_updated(&response.variable);
                Dispatch::Delivered
            }
            Some(kind) => {
                debug!("Ignoring {} response for {}", kind, response.variable);
                Dispatch::Ignored
            }
            None => {
                if self.warned.insert(response.kind) {
                    warn!(
                        "Ignoring server data response of unknown kind {} (further ones are not reported)",
                        response.kind
                    );
                }
                Dispatch::Unknown
            }
        }
    }

    /// Dispatch every pending response; returns how many were read.
    pub fn drain(&mut self, channel: &mut dyn ServerDataChannel, listener: &dyn GameListener) -> usize {
        let mut count = 0;
        while let Some(response) = channel.next_response() {
            self.dispatch(&response, listener);
            count += 1;
        }
        count
    }
}
