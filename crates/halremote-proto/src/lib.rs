//! Wire envelope and framing for the halremote protocol.
//!
//! This crate defines what travels between a halremote client and the
//! remote HAL server:
//!
//! - [`message`]: the typed [`Container`] envelope with its
//!   [`MessageType`] discriminator, pin and component records, protocol
//!   parameters and error notes
//! - [`transport`]: the multi-frame length-prefixed codec used on both
//!   the command (halrcmd) and update (halrcomp) channels, plus the
//!   single-byte control ops for subscriptions and the dealer greeting
//!
//! The envelope payload is JSON; the core never inspects anything beyond
//! the fields modeled here.

pub mod message;
pub mod transport;

pub use message::{
    ComponentRecord, Container, MessageType, PinRecord, ProtocolParameters,
};
pub use transport::{
    CodecError, FrameCodec, GREETING_OP, MAX_FRAME_SIZE, SUBSCRIBE_OP, UNSUBSCRIBE_OP,
};
