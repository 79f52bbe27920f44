use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError, Weak,
    },
};

use compositor::{CompositorController, CompositorEvent, CompositorEventKind};
use device_session::SubscriptionId;
use mixer::{MixerController, MixerEvent, MixerEventKind};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ClientId, DeviceKind},
    protocol::{ClientRequest, ServerEvent},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Per-client outbound queue depth.
pub const CLIENT_BUFFER_SIZE: usize = 256;

/// When a gain change is echoed to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainBroadcastPolicy {
    /// Broadcast the requested value whether or not the mixer accepted it.
    #[default]
    Optimistic,
    /// Broadcast only after the mixer accepted the value.
    Confirmed,
}

#[derive(Default)]
struct ClientRegistry {
    next_id: AtomicU64,
    clients: Mutex<HashMap<ClientId, mpsc::Sender<ServerEvent>>>,
}

impl ClientRegistry {
    fn clients(&self) -> std::sync::MutexGuard<'_, HashMap<ClientId, mpsc::Sender<ServerEvent>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self, event: &ServerEvent) {
        for (client, sender) in self.clients().iter() {
            deliver(*client, sender, event.clone());
        }
    }

    fn send_to(&self, client: ClientId, event: ServerEvent) {
        match self.clients().get(&client) {
            Some(sender) => deliver(client, sender, event),
            None => debug!(client = client.0, "client already detached"),
        }
    }

    fn detach(&self, client: ClientId) {
        if self.clients().remove(&client).is_some() {
            info!(client = client.0, "client detached");
        }
    }

    fn len(&self) -> usize {
        self.clients().len()
    }
}

fn deliver(client: ClientId, sender: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    match sender.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            warn!(client = client.0, ?event, "client queue full; dropping event")
        }
        Err(TrySendError::Closed(_)) => debug!(client = client.0, "client queue closed"),
    }
}

/// A peer attached to the hub. Dropping it detaches the peer.
pub struct ClientSession {
    id: ClientId,
    events: mpsc::Receiver<ServerEvent>,
    registry: Weak<ClientRegistry>,
}

impl ClientSession {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }
}

pub struct RelayHub {
    compositor: Arc<CompositorController>,
    mixer: Option<Arc<MixerController>>,
    gain_policy: GainBroadcastPolicy,
    registry: Arc<ClientRegistry>,
    compositor_subscriptions: Vec<SubscriptionId>,
    mixer_subscriptions: Vec<SubscriptionId>,
}

impl RelayHub {
    pub fn new(
        compositor: Arc<CompositorController>,
        mixer: Option<Arc<MixerController>>,
        gain_policy: GainBroadcastPolicy,
    ) -> Self {
        let registry = Arc::new(ClientRegistry::default());

        let compositor_subscriptions = vec![
            compositor.subscribe(CompositorEventKind::ConnectionChanged, {
                let registry = Arc::clone(&registry);
                move |event: &CompositorEvent| {
                    if let CompositorEvent::ConnectionChanged(connected) = event {
                        registry.broadcast(&ServerEvent::ConnectionStatus {
                            device: DeviceKind::Compositor,
                            connected: *connected,
                        });
                    }
                }
            }),
            compositor.subscribe(CompositorEventKind::SceneChanged, {
                let registry = Arc::clone(&registry);
                move |event: &CompositorEvent| {
                    if let CompositorEvent::SceneChanged(scene) = event {
                        registry.broadcast(&ServerEvent::SceneChanged {
                            scene: scene.clone(),
                        });
                    }
                }
            }),
        ];

        let mixer_subscriptions = match &mixer {
            Some(mixer) => vec![
                mixer.subscribe(MixerEventKind::ConnectionChanged, {
                    let registry = Arc::clone(&registry);
                    move |event: &MixerEvent| {
                        if let MixerEvent::ConnectionChanged(connected) = event {
                            registry.broadcast(&ServerEvent::ConnectionStatus {
                                device: DeviceKind::Mixer,
                                connected: *connected,
                            });
                        }
                    }
                }),
                mixer.subscribe(MixerEventKind::ParameterChanged, |_| {
                    debug!("mixer parameters changed");
                }),
            ],
            None => Vec::new(),
        };

        Self {
            compositor,
            mixer,
            gain_policy,
            registry,
            compositor_subscriptions,
            mixer_subscriptions,
        }
    }

    pub fn gain_policy(&self) -> GainBroadcastPolicy {
        self.gain_policy
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Registers a peer. Its queue starts with the current connection status
    /// of every configured device, compositor first.
    pub fn attach_client(&self) -> ClientSession {
        let id = ClientId(self.registry.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, events) = mpsc::channel(CLIENT_BUFFER_SIZE);

        // Broadcasts take the same lock, so nothing can overtake the snapshot.
        let mut clients = self.registry.clients();
        deliver(
            id,
            &sender,
            ServerEvent::ConnectionStatus {
                device: DeviceKind::Compositor,
                connected: self.compositor.is_connected(),
            },
        );
        if let Some(mixer) = &self.mixer {
            deliver(
                id,
                &sender,
                ServerEvent::ConnectionStatus {
                    device: DeviceKind::Mixer,
                    connected: mixer.is_connected(),
                },
            );
        }
        clients.insert(id, sender);
        drop(clients);

        info!(client = id.0, "client attached");
        ClientSession {
            id,
            events,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub async fn handle_request(&self, client: ClientId, request: ClientRequest) {
        match request {
            ClientRequest::RequestReconnect { device } => self.reconnect(client, device).await,
            ClientRequest::RequestTransition => self.compositor.trigger_transition().await,
            ClientRequest::RequestSceneChange {
                scene_uuid,
                scene_name,
            } => self.compositor.set_scene(&scene_uuid, &scene_name).await,
            ClientRequest::RequestGainChange { strip_index, gain } => {
                self.change_gain(strip_index, gain).await
            }
        }
    }

    async fn reconnect(&self, client: ClientId, device: DeviceKind) {
        match device {
            DeviceKind::Compositor => {
                self.reconnect_device(
                    client,
                    device,
                    self.compositor.is_connected(),
                    self.compositor.connect(false),
                )
                .await
            }
            DeviceKind::Mixer => match &self.mixer {
                Some(mixer) => {
                    self.reconnect_device(client, device, mixer.is_connected(), mixer.connect(false))
                        .await
                }
                None => warn!(client = client.0, "reconnect requested for unconfigured mixer"),
            },
        }
    }

    /// A connected device gets a private status echo; otherwise the connect
    /// outcome reaches everyone through the event wiring.
    async fn reconnect_device(
        &self,
        client: ClientId,
        device: DeviceKind,
        connected: bool,
        connect: impl Future<Output = bool>,
    ) {
        if connected {
            self.registry.send_to(
                client,
                ServerEvent::ConnectionStatus {
                    device,
                    connected: true,
                },
            );
            return;
        }
        info!(client = client.0, %device, "reconnect requested");
        connect.await;
    }

    async fn change_gain(&self, strip_index: u32, gain: f32) {
        let applied = match &self.mixer {
            Some(mixer) => mixer.set_strip_gain(strip_index, gain).await,
            None => {
                warn!(strip_index, gain, "gain change requested without a mixer");
                false
            }
        };
        if applied || self.gain_policy == GainBroadcastPolicy::Optimistic {
            self.registry
                .broadcast(&ServerEvent::GainChanged { strip_index, gain });
        }
    }
}

impl Drop for RelayHub {
    fn drop(&mut self) {
        for id in self.compositor_subscriptions.drain(..) {
            self.compositor.unsubscribe(id);
        }
        if let Some(mixer) = &self.mixer {
            for id in self.mixer_subscriptions.drain(..) {
                mixer.unsubscribe(id);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/hub_tests.rs"]
mod tests;
