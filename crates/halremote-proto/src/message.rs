//! The halremote message envelope.
//!
//! Every payload on either channel is one [`Container`]: a type
//! discriminator plus the optional repeated sections the discriminator
//! calls for. Unknown sections are preserved-free: the serializer omits
//! empty ones and the deserializer tolerates their absence.

use halremote_types::{PinDirection, PinValue};
use serde::{Deserialize, Serialize};

/// Message type discriminator.
///
/// The serialized names follow the machinetalk container types so traffic
/// stays legible in captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Ping,
    PingAcknowledge,
    HalrcompBind,
    HalrcompBindConfirm,
    HalrcompBindReject,
    HalrcompSet,
    HalrcompSetReject,
    HalrcompFullUpdate,
    HalrcompIncrementalUpdate,
    HalrcommandError,
}

/// Heartbeat parameters advertised by the server on the first full update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    pub keepalive_timer_ms: u64,
}

/// A pin on the wire.
///
/// Bind records carry the fully qualified name and direction; set and
/// incremental-update records are keyed by handle alone. The value always
/// travels with its type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PinDirection>,

    pub value: PinValue,
}

impl PinRecord {
    /// A handle-keyed record, as used in set messages and incremental
    /// updates.
    #[must_use]
    pub fn keyed(handle: u32, value: PinValue) -> Self {
        Self {
            name: None,
            handle: Some(handle),
            dir: None,
            value,
        }
    }

    /// A named record with direction, as used in bind messages.
    #[must_use]
    pub fn named(name: impl Into<String>, dir: PinDirection, value: PinValue) -> Self {
        Self {
            name: Some(name.into()),
            handle: None,
            dir: Some(dir),
            value,
        }
    }
}

/// A component schema on the wire, as carried by bind messages and full
/// updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub name: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_create: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pins: Vec<PinRecord>,
}

/// The message envelope exchanged on both channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(rename = "type")]
    pub msg_type: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pparams: Option<ProtocolParameters>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pins: Vec<PinRecord>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentRecord>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Container {
    #[must_use]
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            pparams: None,
            pins: Vec::new(),
            components: Vec::new(),
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    #[must_use]
    pub fn ping_acknowledge() -> Self {
        Self::new(MessageType::PingAcknowledge)
    }

    #[must_use]
    pub fn with_pin(mut self, pin: PinRecord) -> Self {
        self.pins.push(pin);
        self
    }

    #[must_use]
    pub fn with_component(mut self, component: ComponentRecord) -> Self {
        self.components.push(component);
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Server notes joined into one error text, one note per line.
    #[must_use]
    pub fn joined_notes(&self) -> String {
        let mut text = String::new();
        for note in &self.notes {
            text.push_str(note);
            text.push('\n');
        }
        text
    }
}
