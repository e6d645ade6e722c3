use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::daemon::storage::{
    entities::{EntityKey, Ongoing},
    settings::{Settings, SettingsPatch},
};

/// Requests larger than this are rejected without parsing.
pub const MAX_REQUEST_FRAME_SIZE: usize = 64 * 1024;

/// Everything a client may ask the daemon. One JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    GetOngoingTime,
    /// Writes buffered time out so that a following read sees it.
    ForceReload,
    GetSettings,
    UpdateSettings {
        patch: SettingsPatch,
    },
    /// Browser bridge: another tab became active.
    TabActivated {
        url: String,
    },
    /// Browser bridge: the active tab navigated.
    TabUpdated {
        url: String,
    },
    FocusLost,
    FocusGained {
        url: String,
    },
    /// Answered once the next bucket changes.
    WaitForChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ongoing {
        entity: Option<EntityKey>,
        ms: u64,
    },
    Settings {
        settings: Settings,
    },
    Ack,
    Changed {
        date: NaiveDate,
    },
    Error {
        message: String,
    },
}

impl Response {
    pub fn ongoing(ongoing: Option<Ongoing>) -> Self {
        match ongoing {
            Some(Ongoing { entity, ms }) => Response::Ongoing {
                entity: Some(entity),
                ms,
            },
            None => Response::Ongoing { entity: None, ms: 0 },
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Response::Error {
            message: message.to_string(),
        }
    }
}

/// Encodes a message as a single line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut buffer = serde_json::to_vec(message)?;
    buffer.push(b'\n');
    Ok(buffer)
}

/// Validates a received line. Oversized or malformed requests come back as the error to answer
/// with.
pub fn decode_request(line: &str) -> Result<Request, Response> {
    if line.len() > MAX_REQUEST_FRAME_SIZE {
        return Err(Response::error(format!(
            "Request frame too large: {} bytes (max {MAX_REQUEST_FRAME_SIZE})",
            line.len()
        )));
    }
    serde_json::from_str(line.trim()).map_err(|e| Response::error(format!("Failed to parse request: {e}")))
}
