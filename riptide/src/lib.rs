//! Riptide: a reliable byte-stream transport over unreliable datagrams.
//!
//! The underlying carrier may drop, duplicate, reorder, or corrupt
//! datagrams; Riptide layers ordered, deduplicated, flow-controlled,
//! retransmitted delivery on top of it. Each endpoint runs a sending half
//! (slices the outbound byte stream into segments and recovers from loss)
//! and a receiving half (reassembles inbound segments into an ordered byte
//! stream); a [`Connection`] binds the two together and a [`Socket`]
//! demultiplexes it onto a UDP endpoint.
//!
//! The protocol core is synchronous and transport-agnostic: every operation
//! takes a transmit callback, so the state machine can be driven by the
//! tokio socket layer or, in tests, by closures that collect packets into
//! vectors.

pub mod config;
pub mod connection;
pub mod error;
pub mod reassembler;
pub mod receiver;
pub mod ring;
pub mod segment;
pub mod sender;
pub mod seq;
pub mod socket;
pub mod stream;

pub use config::Config;
pub use connection::{Connection, State};
pub use error::{Result, RiptideError};
pub use segment::{Ack, Packet, Segment};
pub use seq::Wrap32;
pub use socket::Socket;
pub use stream::ByteStream;
