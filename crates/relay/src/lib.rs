//! Fans device state out to browser clients and routes their commands back
//! to the controllers.

pub mod api;
pub mod hub;

pub use api::ApiContext;
pub use hub::{ClientSession, GainBroadcastPolicy, RelayHub, CLIENT_BUFFER_SIZE};

#[cfg(test)]
#[path = "tests/support.rs"]
mod support;
