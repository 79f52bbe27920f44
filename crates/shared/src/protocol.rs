use serde::{Deserialize, Serialize};

use crate::domain::{DeviceKind, ProgramScene};

/// Commands a browser client may issue over the relay socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    RequestReconnect { device: DeviceKind },
    RequestTransition,
    RequestSceneChange { scene_uuid: String, scene_name: String },
    RequestGainChange { strip_index: u32, gain: f32 },
}

/// Events pushed to browser clients. Every variant carries current values,
/// so a client that misses one only needs the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    ConnectionStatus { device: DeviceKind, connected: bool },
    SceneChanged { scene: ProgramScene },
    GainChanged { strip_index: u32, gain: f32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device: DeviceKind,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub devices: Vec<DeviceStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetItemVisibilityRequest {
    pub enabled: bool,
}

/// Body of the scene-item routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneItemState {
    pub scene_name: String,
    pub item_name: String,
    pub enabled: bool,
}
