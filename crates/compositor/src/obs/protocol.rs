//! obs-websocket v5 message shapes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use device_session::DeviceError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const RPC_VERSION: u32 = 1;
/// `EventSubscription::Scenes`, which carries `CurrentProgramSceneChanged`.
pub const EVENT_SUBSCRIPTION_SCENES: u32 = 1 << 2;
/// WebSocket close code the server uses when the identify secret is wrong.
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4009;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Hello = 0,
    Identify = 1,
    Identified = 2,
    Event = 5,
    Request = 6,
    RequestResponse = 7,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OpCode::Hello),
            1 => Some(OpCode::Identify),
            2 => Some(OpCode::Identified),
            5 => Some(OpCode::Event),
            6 => Some(OpCode::Request),
            7 => Some(OpCode::RequestResponse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    pub d: Value,
}

impl Envelope {
    pub fn op_code(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    pub fn data<T: DeserializeOwned>(self) -> Result<T, DeviceError> {
        let op = self.op;
        serde_json::from_value(self.d)
            .map_err(|err| DeviceError::Protocol(format!("malformed op {op} payload: {err}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: Option<String>,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    pub event_subscriptions: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<'a> {
    pub request_type: &'a str,
    pub request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneEntry {
    pub scene_index: i64,
    pub scene_name: String,
    pub scene_uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneListData {
    pub scenes: Vec<SceneEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItemEntry {
    pub scene_item_id: i64,
    pub source_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItemListData {
    pub scene_items: Vec<SceneItemEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItemEnabledData {
    pub scene_item_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSceneChangedData {
    pub scene_name: String,
    pub scene_uuid: String,
}

pub fn encode<T: Serialize>(op: OpCode, payload: &T) -> Result<String, DeviceError> {
    let d = serde_json::to_value(payload)
        .map_err(|err| DeviceError::Protocol(format!("failed to encode op {}: {err}", op as u8)))?;
    serde_json::to_string(&Envelope { op: op as u8, d })
        .map_err(|err| DeviceError::Protocol(format!("failed to encode op {}: {err}", op as u8)))
}

pub fn decode(text: &str) -> Result<Envelope, DeviceError> {
    serde_json::from_str(text)
        .map_err(|err| DeviceError::Protocol(format!("malformed message: {err}")))
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn authentication_string(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    STANDARD.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}
