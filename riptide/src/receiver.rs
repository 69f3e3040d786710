//! The receiving half of a connection.
//!
//! Consumes the peer's segments: learns the peer ISN from its SYN, maps wire
//! sequence numbers to stream indices through the reassembler's checkpoint,
//! and produces the cumulative acknowledgment and advertised window that ride
//! on every outgoing packet.

use crate::config::MAX_WINDOW_SIZE;
use crate::reassembler::Reassembler;
use crate::segment::{Ack, Segment};
use crate::seq::Wrap32;
use crate::stream::ByteStream;

pub struct Receiver {
    reassembler: Reassembler,
    isn: Wrap32,
    syn_received: bool,
    fin_received: bool,
    /// Advertised window ceiling: the inbound capacity capped at the 16-bit
    /// wire field.
    window_cap: u16,
}

impl Receiver {
    pub fn new(reassembler: Reassembler) -> Self {
        let window_cap = reassembler
            .output()
            .capacity()
            .min(MAX_WINDOW_SIZE as usize) as u16;
        Self {
            reassembler,
            isn: Wrap32::default(),
            syn_received: false,
            fin_received: false,
            window_cap,
        }
    }

    /// Process one inbound segment.
    pub fn receive(&mut self, segment: &Segment) {
        if segment.rst {
            self.reassembler.set_error();
            return;
        }

        if segment.syn {
            self.isn = segment.seqno;
            self.syn_received = true;
        }
        if !self.syn_received {
            return;
        }

        let checkpoint = self.reassembler.output().bytes_pushed() + 1;
        let absolute = segment.seqno.unwrap(self.isn, checkpoint);
        // The SYN occupies absolute position 0; a data-free segment claiming
        // that slot (a keep-alive probe) carries nothing to assemble.
        let stream_index = if segment.syn {
            0
        } else if absolute == 0 {
            return;
        } else {
            absolute - 1
        };

        self.reassembler
            .insert(stream_index, &segment.payload, segment.fin);

        if segment.fin {
            self.fin_received = true;
        }
    }

    /// The acknowledgment to piggyback on the next outgoing packet.
    pub fn ack(&self) -> Ack {
        let stream = self.reassembler.output();

        let ackno = self.syn_received.then(|| {
            let mut absolute = stream.bytes_pushed() + 1;
            if self.fin_received && stream.is_closed() {
                absolute += 1;
            }
            Wrap32::wrap(absolute, self.isn)
        });

        let window = (self.window_cap as u64).saturating_sub(stream.bytes_buffered() as u64);

        Ack {
            ackno,
            window: window.min(MAX_WINDOW_SIZE as u64) as u16,
            rst: self.reassembler.has_error(),
        }
    }

    pub fn syn_received(&self) -> bool {
        self.syn_received
    }

    pub fn fin_received(&self) -> bool {
        self.fin_received
    }

    /// The inbound byte stream (reader side).
    pub fn stream(&self) -> &ByteStream {
        self.reassembler.output()
    }

    pub fn stream_mut(&mut self) -> &mut ByteStream {
        self.reassembler.output_mut()
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    pub fn has_error(&self) -> bool {
        self.reassembler.has_error()
    }

    pub fn set_error(&mut self) {
        self.reassembler.set_error();
    }
}
