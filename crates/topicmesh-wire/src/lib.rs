//! topicmesh wire layer: message framing and the TCP transport.
//!
//! Every frame on a connection is a 4-byte big-endian length followed by that
//! many bytes of self-describing JSON.
//!
//! ## Architecture
//!
//! - **codec**: `encode`/`decode` for single messages and a [`FrameDecoder`]
//!   that pulls complete frames out of a byte buffer
//! - **Transport**: listener, accept/read loops, outbound connections with
//!   retry, and the task group every participant embeds
//! - **FrameHandler**: trait the master and nodes implement to receive messages

pub mod codec;
pub mod transport;

pub use codec::{decode, encode, encode_frame, CodecError, FrameDecoder};
pub use transport::{Connection, Destination, FrameHandler, Transport, WeakTransport, WireError};
