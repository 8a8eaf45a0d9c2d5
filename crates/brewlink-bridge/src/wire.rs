/*!
 * Wire payloads for the machine controller protocol.
 *
 * The protocol is fire-and-forget JSON over a message-oriented connection:
 * the controller pushes status payloads asynchronously and accepts power and
 * status-query commands. There is no acknowledgement or correlation
 * envelope, so commands are never matched to responses.
 */
use serde::{Deserialize, Serialize};
use tracing::trace;

/// An inbound status payload pushed by the machine controller.
///
/// Only the power field is recognized; any other fields are ignored so that
/// newer controller firmware never breaks the bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct StatusPayload {
    /// Whether the machine reports itself powered on
    #[serde(default)]
    pub power: Option<bool>,
}

impl StatusPayload {
    /// Parse a status payload from a decoded JSON message.
    ///
    /// Payloads that do not match the expected shape are treated as carrying
    /// no recognized fields rather than as errors.
    pub fn parse(value: &serde_json::Value) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                trace!("Ignoring unrecognized status payload: {}", e);
                Self::default()
            }
        }
    }
}

/// An outbound command to the machine controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Command {
    /// Set the machine power state
    SetPower {
        /// The requested power state
        power: bool,
    },
    /// Trigger an asynchronous status push from the controller
    QueryStatus {
        /// Fixed marker field; the controller only checks for its presence
        status: u8,
    },
}

impl Command {
    /// Create a power-set command
    pub fn set_power(power: bool) -> Self {
        Command::SetPower { power }
    }

    /// Create a status-query command
    pub fn query_status() -> Self {
        Command::QueryStatus { status: 1 }
    }
}
