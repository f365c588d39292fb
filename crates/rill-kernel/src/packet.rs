//! Information packets travelling between components.
//!
//! A [`Packet`] is either an opaque data value or a control marker that
//! superimposes structure on the data stream: substreams delimited by
//! [`ControlKind::Open`] / [`ControlKind::Close`], and map streams delimited
//! by [`ControlKind::MapOpen`] / [`ControlKind::MapClose`] with
//! [`ControlKind::Switch`] selecting the active namespace.
//!
//! Every packet carries a channel tag so that several independent control
//! overlays can coexist on one stream. Components subscribe to exactly one
//! channel; control packets tagged for any other channel pass through them
//! untouched.
//!
//! End-of-stream is deliberately *not* a packet kind. It is synthesized by
//! the receive path once a connection is closed and drained, and surfaces as
//! a variant of the receive result rather than a value on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel tag applied when none is given explicitly.
pub const DEFAULT_CHANNEL: &str = "default";

/// The kinds of control marker a packet can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ControlKind {
    /// Begin a substream.
    Open,
    /// End the innermost substream.
    Close,
    /// Begin a map stream.
    MapOpen,
    /// End the innermost map stream.
    MapClose,
    /// Select the active namespace of the innermost map.
    Switch(String),
}

/// An immutable information packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// An opaque payload.
    Data { payload: Value, channel: String },
    /// A structural marker.
    Control { kind: ControlKind, channel: String },
}

impl Packet {
    /// A data packet on the default channel.
    pub fn data(payload: impl Into<Value>) -> Self {
        Self::data_on(payload, DEFAULT_CHANNEL)
    }

    /// A data packet tagged with the given channel.
    pub fn data_on(payload: impl Into<Value>, channel: impl Into<String>) -> Self {
        Self::Data {
            payload: payload.into(),
            channel: channel.into(),
        }
    }

    /// A control packet on the default channel.
    pub fn control(kind: ControlKind) -> Self {
        Self::control_on(kind, DEFAULT_CHANNEL)
    }

    /// A control packet tagged with the given channel.
    pub fn control_on(kind: ControlKind, channel: impl Into<String>) -> Self {
        Self::Control {
            kind,
            channel: channel.into(),
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Self::Control { .. })
    }

    /// The channel this packet is tagged with.
    pub fn channel(&self) -> &str {
        match self {
            Self::Data { channel, .. } | Self::Control { channel, .. } => channel,
        }
    }

    /// The payload of a data packet.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Data { payload, .. } => Some(payload),
            Self::Control { .. } => None,
        }
    }

    /// Consume the packet, yielding the payload of a data packet.
    pub fn into_payload(self) -> Option<Value> {
        match self {
            Self::Data { payload, .. } => Some(payload),
            Self::Control { .. } => None,
        }
    }

    /// The marker kind of a control packet.
    pub fn kind(&self) -> Option<&ControlKind> {
        match self {
            Self::Control { kind, .. } => Some(kind),
            Self::Data { .. } => None,
        }
    }

    /// The namespace argument of a `Switch` control packet.
    pub fn switch_namespace(&self) -> Option<&str> {
        match self {
            Self::Control {
                kind: ControlKind::Switch(namespace),
                ..
            } => Some(namespace),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlKind, Packet, DEFAULT_CHANNEL};
    use serde_json::json;

    #[test]
    fn data_packet_defaults_to_default_channel() {
        let p = Packet::data(json!("x"));
        assert!(p.is_data());
        assert!(!p.is_control());
        assert_eq!(p.channel(), DEFAULT_CHANNEL);
        assert_eq!(p.payload(), Some(&json!("x")));
        assert_eq!(p.kind(), None);
    }

    #[test]
    fn control_packet_carries_channel_and_kind() {
        let p = Packet::control_on(ControlKind::MapOpen, "alphanum");
        assert!(p.is_control());
        assert_eq!(p.channel(), "alphanum");
        assert_eq!(p.kind(), Some(&ControlKind::MapOpen));
        assert_eq!(p.payload(), None);
    }

    #[test]
    fn switch_namespace_is_only_set_for_switch() {
        let switch = Packet::control(ControlKind::Switch("num".into()));
        assert_eq!(switch.switch_namespace(), Some("num"));
        assert_eq!(Packet::control(ControlKind::Open).switch_namespace(), None);
        assert_eq!(Packet::data(json!(1)).switch_namespace(), None);
    }

    #[test]
    fn into_payload_moves_the_value_out() {
        assert_eq!(Packet::data(json!([1, 2])).into_payload(), Some(json!([1, 2])));
        assert_eq!(Packet::control(ControlKind::Close).into_payload(), None);
    }
}
