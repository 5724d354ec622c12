//! Transport-independent push core.
//!
//! - [`handle`]: one live connection and its single-writer queue
//! - [`registry`]: recipient key → handles on this instance
//! - [`router`]: local delivery plus the shared broadcast bus
//! - [`lifecycle`]: open/message/heartbeat/close/error hooks

pub mod handle;
pub mod lifecycle;
pub mod registry;
pub mod router;

pub use handle::{CloseReason, Frame, PushHandle, TransportKind};
pub use lifecycle::{ConnectionLifecycle, Probe};
pub use registry::ConnectionRegistry;
pub use router::{FanoutRouter, PublishReport, Tally};
