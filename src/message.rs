//! Messages exchanged between the controller, the tone renderer and the panel.
//!
//! Every message has a JSON form: a `type` tag naming the command or event
//! and, for commands, a `target` naming the receiving context.

use crate::error::{Error, ErrorKind};
use crate::timestamp::Timestamp;
use crate::tone_config::ToneConfig;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Controller,
}

/// Commands the panel sends to the controller.
#[derive(Deserialize, Serialize, Clone, PartialEq, Debug)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    Start { config: ToneConfig },
    Stop,
    GetStatus,
    UpdateConfig { config: ToneConfig },
    PlayTest { config: ToneConfig },
}

#[derive(Deserialize, Serialize, Clone, PartialEq, Debug)]
pub struct Status {
    #[serde(rename = "isRunning")]
    pub is_running: bool,
    pub config: ToneConfig,
    #[serde(rename = "nextPing")]
    pub next_ping_time: Option<Timestamp>,
    #[serde(rename = "lastPing")]
    pub last_ping_time: Option<Timestamp>,
}

#[derive(Deserialize, Serialize, Clone, PartialEq, Debug)]
#[serde(untagged)]
pub enum Response {
    Status(Status),
    Ack {
        success: bool,
        #[serde(rename = "nextPingTime", skip_serializing_if = "Option::is_none")]
        next_ping_time: Option<Timestamp>,
    },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ack {
            success: true,
            next_ping_time: None,
        }
    }

    pub fn rejected() -> Self {
        Response::Ack {
            success: false,
            next_ping_time: None,
        }
    }
}

/// Commands the controller sends to the tone renderer.
#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Debug)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RendererCommand {
    PlayTone {
        frequency: u32,
        duration: u64,
        #[serde(default = "default_volume")]
        volume: f32,
    },
}

pub const DEFAULT_VOLUME: f32 = 0.5;

fn default_volume() -> f32 {
    DEFAULT_VOLUME
}

/// Notifications the tone renderer sends back to the controller.
#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RendererEvent {
    ToneComplete,
}

/// Events the controller broadcasts to whichever panels are listening.
#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PanelEvent {
    StatusChanged {
        #[serde(rename = "isRunning")]
        is_running: bool,
        #[serde(rename = "nextPingTime", skip_serializing_if = "Option::is_none", default)]
        next_ping_time: Option<Timestamp>,
    },
    TonePlayed {
        #[serde(rename = "lastPingTime")]
        last_ping_time: Timestamp,
    },
}

#[derive(Deserialize, Serialize, Clone, PartialEq, Debug)]
pub struct Envelope<T> {
    pub target: Target,
    #[serde(flatten)]
    pub body: T,
}

/// Decodes a wire message addressed to the controller.
///
/// Returns `Ok(None)` for well-formed messages addressed to another context
/// or carrying no known target.
pub fn decode_controller_request(raw: &str) -> Result<Option<Request>, Error> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            return Err(Error::new(
                ErrorKind::InternalFailure,
                format!("failed to parse message: {}", error),
            ))
        }
    };

    let target = value
        .get("target")
        .cloned()
        .and_then(|target| serde_json::from_value::<Target>(target).ok());

    if target != Some(Target::Controller) {
        log::debug!("ignoring message not addressed to the controller: {}", raw);
        return Ok(None);
    }

    match serde_json::from_value::<Envelope<Request>>(value) {
        Ok(envelope) => Ok(Some(envelope.body)),
        Err(error) => Err(Error::new(
            ErrorKind::InternalFailure,
            format!("failed to decode controller request: {}", error),
        )),
    }
}
