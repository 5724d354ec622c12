//! # herald-core
//!
//! Shared vocabulary for the Herald push-delivery subsystem.
//!
//! - [`ids`]: `RecipientKey` (who a message is for) and `HandleId` (one live connection)
//! - [`envelope`]: the immutable unit published on the shared broadcast bus
//! - [`identity`]: the boundary to the authentication layer
//! - [`errors`]: registration, delivery, and bus error taxonomy
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod identity;
pub mod ids;
pub mod logging;

pub use envelope::{Envelope, EnvelopeKind};
pub use errors::{BusError, DeliveryError, PushError, RegistrationError, Result};
pub use identity::{Credentials, Identity, IdentityResolver};
pub use ids::{HandleId, RecipientKey};
