//! Wire envelope shared by both directions: `{ "type": <int>, "obj": <payload> }`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::scene::{ObjectId, ObjectView};
use crate::error::ProtocolError;

/// Server → client type codes.
pub mod outbound {
    pub const SET_LOCATION: u8 = 1;
    pub const SET_CHARACTER: u8 = 2;
    pub const ADD_OBJECT: u8 = 3;
    pub const REMOVE_OBJECT: u8 = 4;
    pub const GET_EVAL_RESULT: u8 = 5;
    pub const UPDATE_OBJECT: u8 = 6;
    pub const CHAT: u8 = 7;
}

/// Client → server type codes.
pub mod inbound {
    pub const EVAL: i64 = 100;
    pub const RESTART_LOCATION: i64 = 101;
    pub const CHAT: i64 = 102;
    pub const RENAME: i64 = 103;
}

/// Console output and error text of one finished execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalReport {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub console: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub errors: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Full scene snapshot.
    SetLocation { objects: Vec<ObjectView> },
    /// Which object the receiving user controls.
    SetCharacter { character: ObjectId },
    AddObject(ObjectView),
    UpdateObject(ObjectView),
    RemoveObject { id: ObjectId },
    GetEvalResult(EvalReport),
    Chat { text: String },
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: u8,
    obj: &'a T,
}

#[derive(Serialize)]
struct ObjectsPayload<'a> {
    objects: &'a [ObjectView],
}

#[derive(Serialize)]
struct CharacterPayload {
    character: ObjectId,
}

#[derive(Serialize)]
struct IdPayload {
    id: ObjectId,
}

#[derive(Serialize)]
struct TextPayload<'a> {
    text: &'a str,
}

impl Outbound {
    pub fn code(&self) -> u8 {
        match self {
            Self::SetLocation { .. } => outbound::SET_LOCATION,
            Self::SetCharacter { .. } => outbound::SET_CHARACTER,
            Self::AddObject(_) => outbound::ADD_OBJECT,
            Self::UpdateObject(_) => outbound::UPDATE_OBJECT,
            Self::RemoveObject { .. } => outbound::REMOVE_OBJECT,
            Self::GetEvalResult(_) => outbound::GET_EVAL_RESULT,
            Self::Chat { .. } => outbound::CHAT,
        }
    }

    /// Serialize once; the result is shared by every recipient.
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        let kind = self.code();
        let text = match self {
            Self::SetLocation { objects } => {
                serde_json::to_string(&Envelope { kind, obj: &ObjectsPayload { objects } })
            }
            Self::SetCharacter { character } => serde_json::to_string(&Envelope {
                kind,
                obj: &CharacterPayload { character: *character },
            }),
            Self::AddObject(view) | Self::UpdateObject(view) => {
                serde_json::to_string(&Envelope { kind, obj: view })
            }
            Self::RemoveObject { id } => {
                serde_json::to_string(&Envelope { kind, obj: &IdPayload { id: *id } })
            }
            Self::GetEvalResult(report) => serde_json::to_string(&Envelope { kind, obj: report }),
            Self::Chat { text } => {
                serde_json::to_string(&Envelope { kind, obj: &TextPayload { text } })
            }
        }?;
        Ok(text.into())
    }
}

/// A command received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Eval { code: String },
    RestartLocation,
    Chat { text: String },
    Rename { name: String },
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: i64,
    #[serde(default)]
    obj: Value,
}

#[derive(Deserialize)]
struct CodePayload {
    code: String,
}

#[derive(Deserialize)]
struct ChatPayload {
    text: String,
}

#[derive(Deserialize)]
struct RenamePayload {
    name: String,
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let message = match raw.kind {
            inbound::EVAL => {
                let CodePayload { code } = serde_json::from_value(raw.obj)?;
                Self::Eval { code }
            }
            inbound::RESTART_LOCATION => Self::RestartLocation,
            inbound::CHAT => {
                let ChatPayload { text } = serde_json::from_value(raw.obj)?;
                Self::Chat { text }
            }
            inbound::RENAME => {
                let RenamePayload { name } = serde_json::from_value(raw.obj)?;
                Self::Rename { name }
            }
            other => return Err(ProtocolError::UnknownType(other)),
        };
        Ok(message)
    }
}
