//! Audio mixer control: the [`MixerController`] and the Voicemeeter remote
//! binding behind it.

mod controller;
pub mod voicemeeter;

pub use controller::{
    MixerConnector, MixerController, MixerEvent, MixerEventKind, MixerLink, MixerNotification,
};
pub use voicemeeter::VoicemeeterConnector;
