use std::sync::Arc;

use async_trait::async_trait;
use device_session::{
    BusEvent, DeviceError, DeviceLink, DeviceNotifier, DeviceSession, SessionEvent,
    SubscriptionId,
};
use shared::domain::{ItemVisibility, ProgramScene, SceneDescriptor, SceneItem};
use thiserror::Error;
use tracing::{info, warn};

/// Native pushes from the compositor that the controller cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorNotification {
    CurrentProgramSceneChanged(ProgramScene),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorEvent {
    ConnectionChanged(bool),
    SceneChanged(ProgramScene),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositorEventKind {
    ConnectionChanged,
    SceneChanged,
}

impl BusEvent for CompositorEvent {
    type Kind = CompositorEventKind;

    fn kind(&self) -> CompositorEventKind {
        match self {
            CompositorEvent::ConnectionChanged(_) => CompositorEventKind::ConnectionChanged,
            CompositorEvent::SceneChanged(_) => CompositorEventKind::SceneChanged,
        }
    }
}

impl SessionEvent for CompositorEvent {
    fn connection_changed(connected: bool) -> Self {
        CompositorEvent::ConnectionChanged(connected)
    }
}

/// Why a scene-item read or write produced no value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SceneItemError {
    #[error("compositor is not connected")]
    NotConnected,
    #[error("scene item {item_name} not found in {scene_name}")]
    NotFound {
        scene_name: String,
        item_name: String,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Device calls available on a live compositor connection.
#[async_trait]
pub trait CompositorLink: DeviceLink {
    /// Scenes in device-native order.
    async fn scene_list(&self) -> Result<Vec<SceneDescriptor>, DeviceError>;
    async fn scene_items(&self, scene_name: &str) -> Result<Vec<SceneItem>, DeviceError>;
    async fn set_program_scene(&self, scene_uuid: &str) -> Result<(), DeviceError>;
    async fn scene_item_enabled(
        &self,
        scene_name: &str,
        scene_item_id: i64,
    ) -> Result<bool, DeviceError>;
    async fn set_scene_item_enabled(
        &self,
        scene_name: &str,
        scene_item_id: i64,
        enabled: bool,
    ) -> Result<(), DeviceError>;
    async fn trigger_studio_transition(&self) -> Result<(), DeviceError>;
}

#[async_trait]
pub trait CompositorConnector: Send + Sync + 'static {
    async fn open(
        &self,
        notifier: DeviceNotifier<CompositorNotification>,
    ) -> Result<Arc<dyn CompositorLink>, DeviceError>;
}

type CompositorSession = DeviceSession<dyn CompositorLink, CompositorNotification, CompositorEvent>;

/// Owns the compositor connection. Every operation is total: device faults
/// and calls made while disconnected are logged and turned into the
/// operation's empty value.
pub struct CompositorController {
    connector: Arc<dyn CompositorConnector>,
    session: CompositorSession,
}

impl CompositorController {
    pub fn new(connector: impl CompositorConnector) -> Self {
        Self::with_connector(Arc::new(connector))
    }

    pub fn with_connector(connector: Arc<dyn CompositorConnector>) -> Self {
        let session = CompositorSession::new("compositor", |notification| match notification {
            CompositorNotification::CurrentProgramSceneChanged(scene) => {
                Some(CompositorEvent::SceneChanged(scene))
            }
        });
        Self { connector, session }
    }

    pub async fn connect(&self, force: bool) -> bool {
        let connector = Arc::clone(&self.connector);
        self.session
            .connect(force, move |notifier| async move { connector.open(notifier).await })
            .await
    }

    pub async fn disconnect(&self) {
        self.session.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn subscribe<F>(&self, kind: CompositorEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&CompositorEvent) + Send + Sync + 'static,
    {
        self.session.events().subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.session.events().unsubscribe(id)
    }

    /// Scenes offered to operators: newest first, material scenes removed.
    pub async fn get_scenes(&self) -> Vec<SceneDescriptor> {
        let Some(link) = self.connected_link("get_scenes") else {
            return Vec::new();
        };
        match link.scene_list().await {
            Ok(scenes) => scenes
                .into_iter()
                .rev()
                .filter(|scene| !scene.is_material())
                .collect(),
            Err(error) => {
                warn!(%error, "failed to list scenes");
                Vec::new()
            }
        }
    }

    /// Switches program output. The UUID identifies the scene; the name is
    /// only for the log line.
    pub async fn set_scene(&self, scene_uuid: &str, scene_name: &str) {
        let Some(link) = self.connected_link("set_scene") else {
            return;
        };
        match link.set_program_scene(scene_uuid).await {
            Ok(()) => info!(scene_uuid, scene_name, "switched program scene"),
            Err(error) => warn!(scene_uuid, scene_name, %error, "failed to switch program scene"),
        }
    }

    pub async fn get_scene_item_id(&self, scene_name: &str, item_name: &str) -> Option<i64> {
        let link = self.connected_link("get_scene_item_id")?;
        match resolve_item(link.as_ref(), scene_name, item_name).await {
            Ok(scene_item_id) => Some(scene_item_id),
            Err(SceneItemError::NotFound { .. }) => None,
            Err(error) => {
                warn!(scene_name, %error, "failed to list scene items");
                None
            }
        }
    }

    pub async fn get_item_visibility(&self, scene_name: &str, item_name: &str) -> ItemVisibility {
        match self.read_item_enabled(scene_name, item_name).await {
            Ok(enabled) => ItemVisibility::from_enabled(enabled),
            Err(error) => {
                warn!(scene_name, item_name, %error, "failed to read scene item visibility");
                ItemVisibility::NotFound
            }
        }
    }

    /// Loose form of [`Self::get_item_visibility`]: `false` covers both a
    /// hidden item and a failed lookup.
    pub async fn get_item_enabled(&self, scene_name: &str, item_name: &str) -> bool {
        self.get_item_visibility(scene_name, item_name)
            .await
            .is_enabled()
    }

    pub async fn set_item_enabled(&self, scene_name: &str, item_name: &str, enabled: bool) -> bool {
        match self.write_item_enabled(scene_name, item_name, enabled).await {
            Ok(()) => true,
            Err(error) => {
                warn!(scene_name, item_name, %error, "failed to update scene item visibility");
                false
            }
        }
    }

    /// Reads an item's visibility, keeping a missing item apart from a
    /// device fault.
    pub async fn read_item_enabled(
        &self,
        scene_name: &str,
        item_name: &str,
    ) -> Result<bool, SceneItemError> {
        let link = self
            .connected_link("read_item_enabled")
            .ok_or(SceneItemError::NotConnected)?;
        let scene_item_id = resolve_item(link.as_ref(), scene_name, item_name).await?;
        let enabled = link.scene_item_enabled(scene_name, scene_item_id).await?;
        info!(scene_name, item_name, enabled, "read scene item visibility");
        Ok(enabled)
    }

    pub async fn write_item_enabled(
        &self,
        scene_name: &str,
        item_name: &str,
        enabled: bool,
    ) -> Result<(), SceneItemError> {
        let link = self
            .connected_link("write_item_enabled")
            .ok_or(SceneItemError::NotConnected)?;
        let scene_item_id = resolve_item(link.as_ref(), scene_name, item_name).await?;
        link.set_scene_item_enabled(scene_name, scene_item_id, enabled)
            .await?;
        info!(scene_name, item_name, enabled, "updated scene item visibility");
        Ok(())
    }

    pub async fn trigger_transition(&self) {
        let Some(link) = self.connected_link("trigger_transition") else {
            return;
        };
        if let Err(error) = link.trigger_studio_transition().await {
            warn!(%error, "failed to trigger studio transition");
        }
    }

    fn connected_link(&self, operation: &'static str) -> Option<Arc<dyn CompositorLink>> {
        let link = self.session.link();
        if link.is_none() {
            warn!(operation, "compositor is not connected");
        }
        link
    }
}

/// Item ids are looked up by exact source name on every call.
async fn resolve_item(
    link: &dyn CompositorLink,
    scene_name: &str,
    item_name: &str,
) -> Result<i64, SceneItemError> {
    link.scene_items(scene_name)
        .await?
        .into_iter()
        .find(|item| item.source_name == item_name)
        .map(|item| item.scene_item_id)
        .ok_or_else(|| SceneItemError::NotFound {
            scene_name: scene_name.to_string(),
            item_name: item_name.to_string(),
        })
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
