use std::sync::Arc;

use async_trait::async_trait;
use device_session::{
    BusEvent, DeviceError, DeviceLink, DeviceNotifier, DeviceSession, SessionEvent,
    SubscriptionId,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerNotification {
    /// The device reports that some parameter changed since the last poll.
    ParametersChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerEvent {
    ConnectionChanged(bool),
    ParameterChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MixerEventKind {
    ConnectionChanged,
    ParameterChanged,
}

impl BusEvent for MixerEvent {
    type Kind = MixerEventKind;

    fn kind(&self) -> MixerEventKind {
        match self {
            MixerEvent::ConnectionChanged(_) => MixerEventKind::ConnectionChanged,
            MixerEvent::ParameterChanged => MixerEventKind::ParameterChanged,
        }
    }
}

impl SessionEvent for MixerEvent {
    fn connection_changed(connected: bool) -> Self {
        MixerEvent::ConnectionChanged(connected)
    }
}

/// Gain is in the device's native dB scale and passed through unchecked.
#[async_trait]
pub trait MixerLink: DeviceLink {
    async fn set_strip_gain(&self, strip_index: u32, gain: f32) -> Result<(), DeviceError>;
    async fn strip_gain(&self, strip_index: u32) -> Result<f32, DeviceError>;
}

#[async_trait]
pub trait MixerConnector: Send + Sync + 'static {
    async fn open(
        &self,
        notifier: DeviceNotifier<MixerNotification>,
    ) -> Result<Arc<dyn MixerLink>, DeviceError>;
}

type MixerSession = DeviceSession<dyn MixerLink, MixerNotification, MixerEvent>;

pub struct MixerController {
    connector: Arc<dyn MixerConnector>,
    session: MixerSession,
}

impl MixerController {
    pub fn new(connector: impl MixerConnector) -> Self {
        Self::with_connector(Arc::new(connector))
    }

    pub fn with_connector(connector: Arc<dyn MixerConnector>) -> Self {
        let session = MixerSession::new("mixer", |notification| match notification {
            MixerNotification::ParametersChanged => Some(MixerEvent::ParameterChanged),
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

    pub fn subscribe<F>(&self, kind: MixerEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&MixerEvent) + Send + Sync + 'static,
    {
        self.session.events().subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.session.events().unsubscribe(id)
    }

    pub async fn set_strip_gain(&self, strip_index: u32, gain: f32) -> bool {
        let Some(link) = self.connected_link("set_strip_gain") else {
            return false;
        };
        match link.set_strip_gain(strip_index, gain).await {
            Ok(()) => {
                info!(strip_index, gain, "set strip gain");
                true
            }
            Err(error) => {
                warn!(strip_index, gain, %error, "failed to set strip gain");
                false
            }
        }
    }

    pub async fn get_strip_gain(&self, strip_index: u32) -> Option<f32> {
        let link = self.connected_link("get_strip_gain")?;
        match link.strip_gain(strip_index).await {
            Ok(gain) => Some(gain),
            Err(error) => {
                warn!(strip_index, %error, "failed to read strip gain");
                None
            }
        }
    }

    fn connected_link(&self, operation: &'static str) -> Option<Arc<dyn MixerLink>> {
        let link = self.session.link();
        if link.is_none() {
            warn!(operation, "mixer is not connected");
        }
        link
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
