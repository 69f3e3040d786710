//! A full-duplex connection: one sender half, one receiver half.
//!
//! The connection routes every inbound packet to both halves, pairs each
//! outgoing segment with the receiver's latest acknowledgment, and owns the
//! lifecycle rules: when to reply to bare acknowledgments, when a reset must
//! be emitted and latched, and how long to linger after a clean close.
//!
//! Nothing here talks to the network. Every operation takes a `transmit`
//! callback; the caller decides where packets go, which also makes the whole
//! state machine testable by collecting packets into a vector.

use std::fmt;

use tracing::warn;

use crate::config::{Config, LINGER_FACTOR};
use crate::reassembler::Reassembler;
use crate::receiver::Receiver;
use crate::segment::Packet;
use crate::sender::Sender;
use crate::seq::Wrap32;
use crate::stream::ByteStream;

/// Observable protocol state, derived from the two halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Passively waiting for a peer SYN.
    Listen,
    /// Active open: our SYN is in flight, no peer SYN yet.
    SynSent,
    /// Peer SYN received and answered; our SYN not yet acknowledged.
    SynRcvd,
    /// Handshake complete, both directions open.
    Established,
    /// Local FIN sent; the peer's stream has not finished.
    FinWait,
    /// Peer finished; the local side is still sending.
    CloseWait,
    /// Both FINs in flight, ours not yet acknowledged.
    LastAck,
    /// Both FINs exchanged; lingering before release.
    TimeWait,
    /// Terminal: torn down cleanly or by reset.
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Listen => write!(f, "Listen"),
            State::SynSent => write!(f, "SynSent"),
            State::SynRcvd => write!(f, "SynRcvd"),
            State::Established => write!(f, "Established"),
            State::FinWait => write!(f, "FinWait"),
            State::CloseWait => write!(f, "CloseWait"),
            State::LastAck => write!(f, "LastAck"),
            State::TimeWait => write!(f, "TimeWait"),
            State::Closed => write!(f, "Closed"),
        }
    }
}

pub struct Connection {
    config: Config,
    sender: Sender,
    receiver: Receiver,
    /// An inbound segment demanded a reply (it occupied sequence space or
    /// was a keep-alive probe).
    need_send: bool,
    /// Whether a clean close must linger before releasing state.
    linger_after_streams_finish: bool,
    /// Milliseconds since the last packet arrived.
    time_since_receive_ms: u64,
    /// Reset latched (sent or received) or retransmission limit breached.
    failed: bool,
}

impl Connection {
    pub fn new(config: Config) -> Self {
        let isn = config.isn.unwrap_or_else(|| Wrap32::new(rand::random()));
        let outbound = ByteStream::new(config.window_size as usize);
        let inbound = ByteStream::new(config.window_size as usize);
        let sender = Sender::new(outbound, isn, &config);
        let receiver = Receiver::new(Reassembler::new(inbound));
        Self {
            config,
            sender,
            receiver,
            need_send: false,
            linger_after_streams_finish: true,
            time_since_receive_ms: 0,
            failed: false,
        }
    }

    /// Transmit whatever the outbound window allows, each segment paired
    /// with the current acknowledgment.
    pub fn push(&mut self, mut transmit: impl FnMut(&Packet)) {
        if self.push_segments(&mut transmit) > 0 {
            self.need_send = false;
        }
    }

    fn push_segments(&mut self, transmit: &mut impl FnMut(&Packet)) -> usize {
        let ack = self.receiver.ack();
        let mut sent = 0;
        self.sender.push(|segment| {
            transmit(&Packet {
                segment: segment.clone(),
                ack,
            });
            sent += 1;
        });
        sent
    }

    /// Process one packet from the peer.
    pub fn receive(&mut self, packet: &Packet, mut transmit: impl FnMut(&Packet)) {
        if !self.active() {
            return;
        }
        self.time_since_receive_ms = 0;

        // A reset tears the connection down immediately; never answered.
        if packet.segment.rst || packet.ack.rst {
            warn!("connection reset by peer");
            self.abort();
            return;
        }

        // Segments that occupy sequence space demand a reply, as do
        // keep-alive probes (seqno one below the ack we expect).
        self.need_send |= packet.segment.sequence_length() > 0;
        if let Some(our_ackno) = self.receiver.ack().ackno {
            self.need_send |= packet.segment.seqno + 1 == our_ackno;
        }

        self.receiver.receive(&packet.segment);
        self.sender.receive(&packet.ack);

        // Passive close: the peer finished before we sent a FIN, so our ack
        // of their FIN cannot be lost in a way only lingering would cover.
        if self.receiver.stream().is_finished() && !self.sender.fin_sent() {
            self.linger_after_streams_finish = false;
        }

        let sent = self.push_segments(&mut transmit);
        if sent == 0 && self.need_send {
            self.transmit_control(&mut transmit);
        }
        self.need_send = false;

        self.enforce_limits(&mut transmit);
    }

    /// Advance timers by `ms_elapsed` milliseconds.
    pub fn tick(&mut self, ms_elapsed: u64, mut transmit: impl FnMut(&Packet)) {
        if self.failed {
            return;
        }
        self.time_since_receive_ms += ms_elapsed;

        let ack = self.receiver.ack();
        self.sender.tick(ms_elapsed, |segment| {
            transmit(&Packet {
                segment: segment.clone(),
                ack,
            });
        });

        self.enforce_limits(&mut transmit);
    }

    /// Close the outbound stream and emit the FIN if the window allows.
    pub fn close_outbound(&mut self, transmit: impl FnMut(&Packet)) {
        self.sender.stream_mut().close();
        self.push(transmit);
    }

    /// Emit a bare acknowledgment.
    fn transmit_control(&mut self, transmit: &mut impl FnMut(&Packet)) {
        transmit(&Packet {
            segment: self.sender.make_empty_segment(),
            ack: self.receiver.ack(),
        });
        self.need_send = false;
    }

    /// Emit a reset and latch the failure if either half errored or the
    /// retransmission limit was breached.
    fn enforce_limits(&mut self, transmit: &mut impl FnMut(&Packet)) {
        if self.failed {
            return;
        }
        let retx_exceeded =
            self.sender.consecutive_retransmissions() > self.config.max_retx_attempts;
        if retx_exceeded || self.sender.has_error() || self.receiver.has_error() {
            if retx_exceeded {
                warn!(
                    limit = self.config.max_retx_attempts,
                    "retransmission limit exceeded"
                );
            }
            let mut segment = self.sender.make_empty_segment();
            segment.rst = true;
            transmit(&Packet {
                segment,
                ack: self.receiver.ack(),
            });
            self.abort();
        }
    }

    fn abort(&mut self) {
        self.sender.set_error();
        self.receiver.set_error();
        self.failed = true;
    }

    /// Whether the connection still holds state worth keeping.
    pub fn active(&self) -> bool {
        if self.failed {
            return false;
        }

        let inbound_done = self.receiver.stream().is_finished();
        let outbound_done = self.sender.stream().is_finished()
            && self.sender.fin_sent()
            && self.sender.sequence_numbers_in_flight() == 0;

        if inbound_done && outbound_done {
            if !self.linger_after_streams_finish {
                return false;
            }
            if self.time_since_receive_ms >= LINGER_FACTOR * self.config.initial_rto_ms {
                return false;
            }
        }
        true
    }

    /// Derived protocol state.
    pub fn state(&self) -> State {
        if !self.active() {
            return State::Closed;
        }
        if !self.receiver.syn_received() {
            return if self.sender.syn_sent() {
                State::SynSent
            } else {
                State::Listen
            };
        }
        if self.sender.ack_seqno() == 0 {
            return State::SynRcvd;
        }

        let inbound_done = self.receiver.stream().is_finished();
        match (self.sender.fin_sent(), inbound_done) {
            (false, false) => State::Established,
            (false, true) => State::CloseWait,
            (true, false) => State::FinWait,
            (true, true) => {
                if self.sender.fin_acked() {
                    State::TimeWait
                } else {
                    State::LastAck
                }
            }
        }
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Outbound stream, writer side (application pushes bytes here).
    pub fn outbound_mut(&mut self) -> &mut ByteStream {
        self.sender.stream_mut()
    }

    pub fn outbound(&self) -> &ByteStream {
        self.sender.stream()
    }

    /// Inbound stream, reader side (application pops bytes here).
    pub fn inbound_mut(&mut self) -> &mut ByteStream {
        self.receiver.stream_mut()
    }

    pub fn inbound(&self) -> &ByteStream {
        self.receiver.stream()
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
