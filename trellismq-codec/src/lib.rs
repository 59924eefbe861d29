#![deny(unsafe_code)]

//! TMQ wire protocol codec
//!
//! ## Core Features:
//! - **Single-byte command header**: 4-bit command code plus 4-bit flags nibble
//! - **Compact framing**: base-128 varint remaining length, at most 4 bytes
//! - **Zero-Copy Encoding**: binary processing over `bytes::BytesMut`
//! - **Tokio Integration**: `tokio_util::codec` `Encoder`/`Decoder` implementation
//! - **Size limits**: configurable max-packet-size enforced during framing
//!
//! ## Architecture Components:
//! - `Codec`: framing state machine producing/consuming [`Packet`]s
//! - `Packet`: unified representation of every TMQ packet type
//! - Error handling with dedicated `EncodeError`/`DecodeError` types

#[macro_use]
mod utils;

mod codec;
mod decode;
pub(crate) mod encode;
mod packet;

/// Error types for encoding/decoding operations
pub mod error;

/// Shared types and constants for the TMQ protocol
pub mod types;

pub use self::codec::Codec;
pub use self::packet::{Connect, ConnectAck, ConnectAckReason, Packet, SubscribeReturnCode};
pub use self::types::{ConnectAckFlags, ConnectFlags, Publish, QoS};
