//! Connection tunables.

use crate::seq::Wrap32;

/// Largest payload carried by a single segment.
pub const MAX_PAYLOAD_SIZE: usize = 1000;
/// Largest datagram the substrate will carry.
pub const MAX_DATAGRAM_SIZE: usize = 1500;
/// Largest window a receiver can advertise (16-bit wire field).
pub const MAX_WINDOW_SIZE: u16 = u16::MAX;
/// Default retransmission timeout.
pub const INITIAL_RTO_MS: u64 = 1000;
/// Ceiling for exponential RTO backoff.
pub const MAX_RTO_MS: u64 = 60_000;
/// Consecutive retransmissions tolerated before the connection is declared dead.
pub const MAX_RETX_ATTEMPTS: u32 = 8;
/// Linger period after a clean close, in multiples of the initial RTO.
pub const LINGER_FACTOR: u64 = 10;

/// Configuration for a connection.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of each byte stream; also caps the advertised window.
    pub window_size: u16,
    /// Largest payload placed in one segment.
    pub max_payload_size: usize,
    /// Initial (and post-ack) retransmission timeout, milliseconds.
    pub initial_rto_ms: u64,
    /// Backoff ceiling, milliseconds.
    pub max_rto_ms: u64,
    /// Retransmission limit before the connection fails.
    pub max_retx_attempts: u32,
    /// Initial sequence number; `None` picks a random one.
    pub isn: Option<Wrap32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: MAX_WINDOW_SIZE,
            max_payload_size: MAX_PAYLOAD_SIZE,
            initial_rto_ms: INITIAL_RTO_MS,
            max_rto_ms: MAX_RTO_MS,
            max_retx_attempts: MAX_RETX_ATTEMPTS,
            isn: None,
        }
    }
}
