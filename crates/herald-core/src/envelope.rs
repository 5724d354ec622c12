//! The broadcast-bus envelope.
//!
//! An [`Envelope`] is created by a publishing call, serialized once onto the
//! shared topic, and consumed once by every instance's router. It is never
//! persisted and never mutated after construction.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::RecipientKey;

/// How receiving instances interpret an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvelopeKind {
    /// Deliver only to the listed targets that are locally registered.
    Unicast,
    /// Deliver to every locally registered handle; targets are ignored.
    BroadcastAll,
}

/// Immutable unit published on the shared broadcast bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    targets: BTreeSet<RecipientKey>,
    payload: String,
}

impl Envelope {
    /// Envelope addressed to a specific set of recipients.
    #[must_use]
    pub fn unicast(targets: BTreeSet<RecipientKey>, payload: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Unicast,
            targets,
            payload: payload.into(),
        }
    }

    /// Envelope for every connected recipient on every instance.
    #[must_use]
    pub fn broadcast_all(payload: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::BroadcastAll,
            targets: BTreeSet::new(),
            payload: payload.into(),
        }
    }

    /// Envelope kind.
    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    /// Target recipients (empty for broadcast-all).
    pub fn targets(&self) -> &BTreeSet<RecipientKey> {
        &self.targets
    }

    /// Message payload, delivered verbatim as one text frame.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Serialize to the bus wire format (JSON).
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse from the bus wire format.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> BTreeSet<RecipientKey> {
        list.iter().map(|k| RecipientKey::from(*k)).collect()
    }

    #[test]
    fn unicast_wire_format() {
        let env = Envelope::unicast(keys(&["u2", "u1"]), "hello");
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["kind"], "unicast");
        assert_eq!(value["targets"], serde_json::json!(["u1", "u2"]));
        assert_eq!(value["payload"], "hello");
    }

    #[test]
    fn broadcast_all_omits_targets() {
        let env = Envelope::broadcast_all("hi all");
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["kind"], "broadcastAll");
        assert!(value.get("targets").is_none());
    }

    #[test]
    fn parses_envelope_without_targets_field() {
        let env = Envelope::from_json(r#"{"kind":"broadcastAll","payload":"x"}"#).unwrap();
        assert_eq!(env.kind(), EnvelopeKind::BroadcastAll);
        assert!(env.targets().is_empty());
        assert_eq!(env.payload(), "x");
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(Envelope::from_json(r#"{"kind":"multicast","payload":"x"}"#).is_err());
    }

    #[test]
    fn rejects_missing_payload() {
        assert!(Envelope::from_json(r#"{"kind":"unicast","targets":["a"]}"#).is_err());
    }

    #[test]
    fn payload_with_newlines_survives() {
        let env = Envelope::unicast(keys(&["a"]), "line1\nline2");
        let back = Envelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(back.payload(), "line1\nline2");
        assert_eq!(back, env);
    }
}
