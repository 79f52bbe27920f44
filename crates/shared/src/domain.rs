use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);
    };
}

id_newtype!(ClientId);

/// Scene names carrying this marker hold raw material and are never offered
/// to clients as switch targets.
pub const MATERIAL_SCENE_PREFIX: &str = "【素材】";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Compositor,
    Mixer,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Compositor => "compositor",
            DeviceKind::Mixer => "mixer",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub scene_index: i64,
    pub scene_name: String,
    pub scene_uuid: String,
}

impl SceneDescriptor {
    pub fn is_material(&self) -> bool {
        self.scene_name.starts_with(MATERIAL_SCENE_PREFIX)
    }
}

/// The scene currently on program output, as pushed by the compositor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramScene {
    pub scene_name: String,
    pub scene_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneItem {
    pub scene_item_id: i64,
    pub source_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemVisibility {
    Enabled,
    Disabled,
    NotFound,
}

impl ItemVisibility {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            ItemVisibility::Enabled
        } else {
            ItemVisibility::Disabled
        }
    }

    pub fn is_enabled(self) -> bool {
        matches!(self, ItemVisibility::Enabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StripGain {
    pub strip_index: u32,
    pub gain: f32,
}
