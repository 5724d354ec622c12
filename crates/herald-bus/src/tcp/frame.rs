//! Relay wire format: one JSON object per line.
//!
//! ```text
//! {"op":"sub","topic":"global:push"}
//! {"op":"ack","topic":"global:push"}
//! {"op":"pub","topic":"global:push","payload":"..."}
//! {"op":"msg","topic":"global:push","payload":"..."}
//! {"op":"unsub","topic":"global:push"}
//! ```

use herald_core::BusError;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LinesCodec;

/// Longest accepted frame line, in bytes.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// One relay frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Frame {
    /// Client → hub: start receiving `topic`.
    Sub {
        /// Topic name.
        topic: String,
    },
    /// Client → hub: stop receiving `topic`.
    Unsub {
        /// Topic name.
        topic: String,
    },
    /// Client → hub: publish to every subscriber of `topic`.
    Pub {
        /// Topic name.
        topic: String,
        /// Opaque payload.
        payload: String,
    },
    /// Hub → client: a payload published on a subscribed topic.
    Msg {
        /// Topic name.
        topic: String,
        /// Opaque payload.
        payload: String,
    },
    /// Hub → client: the subscription to `topic` is active.
    Ack {
        /// Topic name.
        topic: String,
    },
}

impl Frame {
    /// Encode as a single line (without the trailing newline).
    ///
    /// Lines longer than [`MAX_FRAME_LEN`] are rejected here; the peer's codec
    /// would otherwise drop the whole connection on reading them.
    pub fn encode(&self) -> Result<String, BusError> {
        let line = serde_json::to_string(self)?;
        if line.len() > MAX_FRAME_LEN {
            return Err(BusError::Codec(format!(
                "frame of {} bytes exceeds the {MAX_FRAME_LEN} byte limit",
                line.len()
            )));
        }
        Ok(line)
    }

    /// Decode one line.
    pub fn decode(line: &str) -> Result<Self, BusError> {
        serde_json::from_str(line).map_err(|e| BusError::Codec(e.to_string()))
    }
}

/// Line codec bounded to [`MAX_FRAME_LEN`].
pub fn codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_FRAME_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pub_frame_wire_format() {
        let frame = Frame::Pub {
            topic: "global:push".into(),
            payload: "{\"kind\":\"unicast\"}".into(),
        };
        let line = frame.encode().unwrap();
        assert!(line.starts_with(r#"{"op":"pub","topic":"global:push""#));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let frame = Frame::Pub {
            topic: "t".into(),
            payload: "x".repeat(MAX_FRAME_LEN),
        };
        assert!(matches!(frame.encode(), Err(BusError::Codec(_))));
    }

    #[test]
    fn decodes_ack() {
        let frame = Frame::decode(r#"{"op":"ack","topic":"t"}"#).unwrap();
        assert_eq!(frame, Frame::Ack { topic: "t".into() });
    }

    #[test]
    fn payload_newlines_stay_on_one_line() {
        let frame = Frame::Msg {
            topic: "t".into(),
            payload: "a\nb".into(),
        };
        let line = frame.encode().unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(Frame::decode(&line).unwrap(), frame);
    }

    #[test]
    fn unknown_op_is_codec_error() {
        let err = Frame::decode(r#"{"op":"shout","topic":"t"}"#).unwrap_err();
        assert!(matches!(err, BusError::Codec(_)));
    }

    #[test]
    fn garbage_is_codec_error() {
        assert!(matches!(Frame::decode("hello"), Err(BusError::Codec(_))));
    }
}
