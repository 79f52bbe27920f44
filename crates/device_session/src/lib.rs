//! Connection lifecycle shared by every device controller.
//!
//! A [`DeviceSession`] owns at most one live [`DeviceLink`], tracks whether it
//! is connected, and reports transitions on a typed [`EventBus`]. Controllers
//! wrap a session and add the device-specific calls on top.

pub mod error;
pub mod events;
pub mod session;

pub use error::DeviceError;
pub use events::{BusEvent, EventBus, SubscriptionId};
pub use session::{DeviceLink, DeviceNotifier, DeviceSession, SessionEvent};
