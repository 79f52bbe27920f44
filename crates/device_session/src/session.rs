use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex, PoisonError, RwLock, Weak,
    },
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::DeviceError,
    events::{BusEvent, EventBus},
};

/// One live connection to a device.
#[async_trait]
pub trait DeviceLink: Send + Sync + 'static {
    /// Caller-initiated teardown. Must not report a close through the
    /// link's notifier as a fault; the session has already moved on.
    async fn close(&self);
}

/// Events a session can raise about its own connection state.
pub trait SessionEvent: BusEvent {
    fn connection_changed(connected: bool) -> Self;
}

/// Handle a link uses to report device pushes and closure back to the
/// session that opened it. Reports from a superseded link are dropped.
pub struct DeviceNotifier<N> {
    on_notification: Arc<dyn Fn(N) + Send + Sync>,
    on_closed: Arc<dyn Fn() + Send + Sync>,
}

impl<N> Clone for DeviceNotifier<N> {
    fn clone(&self) -> Self {
        Self {
            on_notification: Arc::clone(&self.on_notification),
            on_closed: Arc::clone(&self.on_closed),
        }
    }
}

impl<N> DeviceNotifier<N> {
    pub fn new(
        on_notification: impl Fn(N) + Send + Sync + 'static,
        on_closed: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_notification: Arc::new(on_notification),
            on_closed: Arc::new(on_closed),
        }
    }

    pub fn notify(&self, notification: N) {
        (self.on_notification)(notification);
    }

    pub fn closed(&self) {
        (self.on_closed)();
    }
}

struct SessionState<L: ?Sized, E: BusEvent> {
    name: &'static str,
    connected: AtomicBool,
    generation: AtomicU64,
    closed_generation: AtomicU64,
    link: RwLock<Option<Arc<L>>>,
    /// Held while the connected flag flips and the change is announced, so
    /// listeners always hear the transitions in the order they happened.
    transition: StdMutex<()>,
    events: EventBus<E>,
}

impl<L: ?Sized, E: SessionEvent> SessionState<L, E> {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn lock_transition(&self) -> std::sync::MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_closed(&self, generation: u64) {
        let _transition = self.lock_transition();
        if !self.is_current(generation) {
            debug!(device = self.name, generation, "ignoring close from superseded link");
            return;
        }
        self.closed_generation.store(generation, Ordering::SeqCst);
        self.link
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(device = self.name, "device closed the connection");
            self.events.emit(&E::connection_changed(false));
        }
    }
}

pub struct DeviceSession<L: ?Sized, N, E: BusEvent> {
    state: Arc<SessionState<L, E>>,
    map_notification: Arc<dyn Fn(N) -> Option<E> + Send + Sync>,
    connect_guard: Mutex<()>,
}

impl<L, N, E> DeviceSession<L, N, E>
where
    L: DeviceLink + ?Sized,
    N: Send + 'static,
    E: SessionEvent,
{
    /// `map_notification` translates the device's native pushes into session
    /// events; it is fixed for the lifetime of the session and applies to
    /// every link the session opens.
    pub fn new(
        name: &'static str,
        map_notification: impl Fn(N) -> Option<E> + Send + Sync + 'static,
    ) -> Self {
        Self {
            state: Arc::new(SessionState {
                name,
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                closed_generation: AtomicU64::new(0),
                link: RwLock::new(None),
                transition: StdMutex::new(()),
                events: EventBus::new(),
            }),
            map_notification: Arc::new(map_notification),
            connect_guard: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.state.name
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> &EventBus<E> {
        &self.state.events
    }

    /// The live link, if the session is connected.
    pub fn link(&self) -> Option<Arc<L>> {
        if !self.is_connected() {
            return None;
        }
        self.state
            .link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Opens a link unless one is already up. Attempts are serialized: a
    /// caller queued behind a successful attempt sees the session connected
    /// and returns without opening a second link.
    pub async fn connect<F, Fut>(&self, force: bool, open: F) -> bool
    where
        F: FnOnce(DeviceNotifier<N>) -> Fut,
        Fut: Future<Output = Result<Arc<L>, DeviceError>>,
    {
        let _guard = self.connect_guard.lock().await;

        if self.is_connected() && !force {
            return true;
        }

        self.teardown().await;

        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        match open(self.notifier(generation)).await {
            Ok(link) => {
                let _transition = self.state.lock_transition();
                if self.state.closed_generation.load(Ordering::SeqCst) == generation {
                    // Closed while the handshake was still finishing.
                    warn!(device = self.state.name, "link closed during connect");
                    self.state.events.emit(&E::connection_changed(false));
                    return false;
                }
                *self
                    .state
                    .link
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(link);
                self.state.connected.store(true, Ordering::SeqCst);
                info!(device = self.state.name, "connected");
                self.state.events.emit(&E::connection_changed(true));
                true
            }
            Err(error) => {
                self.state.connected.store(false, Ordering::SeqCst);
                warn!(device = self.state.name, %error, "connection attempt failed");
                self.state.events.emit(&E::connection_changed(false));
                false
            }
        }
    }

    pub async fn disconnect(&self) {
        let _guard = self.connect_guard.lock().await;
        let was_connected = self.is_connected();
        self.teardown().await;
        if was_connected {
            info!(device = self.state.name, "disconnected");
            self.state.events.emit(&E::connection_changed(false));
        }
    }

    /// Drops the current link without emitting anything. Bumping the
    /// generation first silences any close the link reports while shutting
    /// down.
    async fn teardown(&self) {
        let previous = self
            .state
            .link
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
        if let Some(link) = previous {
            link.close().await;
        }
    }

    fn notifier(&self, generation: u64) -> DeviceNotifier<N> {
        let for_notifications: Weak<SessionState<L, E>> = Arc::downgrade(&self.state);
        let for_close = Weak::clone(&for_notifications);
        let map = Arc::clone(&self.map_notification);

        DeviceNotifier::new(
            move |notification| {
                let Some(state) = for_notifications.upgrade() else {
                    return;
                };
                if !state.is_current(generation) {
                    return;
                }
                if let Some(event) = map(notification) {
                    state.events.emit(&event);
                }
            },
            move || {
                if let Some(state) = for_close.upgrade() {
                    state.handle_closed(generation);
                }
            },
        )
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
