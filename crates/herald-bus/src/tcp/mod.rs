//! TCP relay bus.
//!
//! A [`BusHub`] accepts connections from every instance in the fleet and relays
//! each published frame to every connection subscribed to its topic, the
//! publisher included. Each instance holds one [`TcpBus`] connection to the hub.

mod client;
mod frame;
mod hub;

pub use client::TcpBus;
pub use frame::{Frame, MAX_FRAME_LEN};
pub use hub::BusHub;
