//! Scene-compositor control: the [`CompositorController`] and the
//! obs-websocket v5 client it drives.

mod controller;
pub mod obs;

pub use controller::{
    CompositorConnector, CompositorController, CompositorEvent, CompositorEventKind,
    CompositorLink, CompositorNotification, SceneItemError,
};
pub use obs::ObsConnector;
