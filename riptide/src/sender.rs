//! The sending half of a connection.
//!
//! Reads the outbound byte stream and slices it into segments that respect
//! the peer's advertised window, keeping every unacknowledged segment in a
//! FIFO for retransmission. A single timer covers the earliest outstanding
//! segment; its timeout doubles on each expiry (except while probing a
//! zero window) and snaps back to the initial value whenever the cumulative
//! acknowledgment advances.

use std::collections::VecDeque;

use tracing::trace;

use crate::config::Config;
use crate::segment::{Ack, Segment};
use crate::seq::Wrap32;
use crate::stream::ByteStream;

/// A transmitted segment awaiting cumulative acknowledgment.
struct Outstanding {
    /// Absolute sequence number of the segment's first sequence slot.
    seqno: u64,
    segment: Segment,
}

pub struct Sender {
    stream: ByteStream,
    isn: Wrap32,
    max_payload: usize,
    initial_rto_ms: u64,
    max_rto_ms: u64,
    /// Current timeout; doubles on backoff.
    rto_ms: u64,
    /// Time accumulated since the timer last (re)started.
    elapsed_ms: u64,
    consecutive_retransmissions: u32,
    /// Next absolute sequence number to transmit (0 is the SYN).
    next_seqno: u64,
    /// Greatest cumulatively acknowledged absolute sequence number.
    ack_seqno: u64,
    /// Peer's last advertised window; zero means "probe, don't back off".
    window: u16,
    /// Absolute sequence number the FIN occupies, once scheduled.
    fin_seqno: Option<u64>,
    outstanding: VecDeque<Outstanding>,
}

impl Sender {
    pub fn new(stream: ByteStream, isn: Wrap32, config: &Config) -> Self {
        Self {
            stream,
            isn,
            max_payload: config.max_payload_size,
            initial_rto_ms: config.initial_rto_ms,
            max_rto_ms: config.max_rto_ms,
            rto_ms: config.initial_rto_ms,
            elapsed_ms: 0,
            consecutive_retransmissions: 0,
            next_seqno: 0,
            ack_seqno: 0,
            // Pretend the peer offered one sequence number so the SYN goes out.
            window: 1,
            fin_seqno: None,
            outstanding: VecDeque::new(),
        }
    }

    /// Fill the peer's window from the outbound stream, handing each new
    /// segment to `transmit` and keeping it for retransmission.
    pub fn push(&mut self, mut transmit: impl FnMut(&Segment)) {
        loop {
            // A zero window is probed with a single sequence number.
            let right_edge = self.ack_seqno + u64::from(self.window.max(1));
            if self.next_seqno >= right_edge {
                break;
            }

            let syn = self.next_seqno == 0;
            let room = right_edge - self.next_seqno - u64::from(syn);
            let take = (self.max_payload as u64)
                .min(room)
                .min(self.stream.bytes_buffered() as u64) as usize;

            let mut segment = Segment {
                seqno: Wrap32::wrap(self.next_seqno, self.isn),
                payload: self.stream.pop(take),
                syn,
                fin: false,
                rst: self.stream.has_error(),
            };

            // Schedule the FIN once the stream is drained and the window has
            // a sequence number to spare for it.
            let after_payload = self.next_seqno + segment.sequence_length();
            if self.stream.is_finished() && self.fin_seqno.is_none() && after_payload < right_edge
            {
                segment.fin = true;
                self.fin_seqno = Some(after_payload);
            }

            if segment.sequence_length() == 0 {
                break;
            }

            transmit(&segment);
            self.outstanding.push_back(Outstanding {
                seqno: self.next_seqno,
                segment: segment.clone(),
            });
            self.next_seqno += segment.sequence_length();

            if segment.fin {
                break;
            }
        }
    }

    /// Apply the peer's acknowledgment and advertised window.
    pub fn receive(&mut self, ack: &Ack) {
        if ack.rst {
            self.stream.set_error();
        }

        self.window = ack.window;

        let Some(ackno) = ack.ackno else { return };
        let new_ack = ackno.unwrap(self.isn, self.ack_seqno);

        // Acknowledges sequence numbers never transmitted: ignore entirely.
        if new_ack > self.next_seqno {
            return;
        }

        if new_ack > self.ack_seqno {
            self.ack_seqno = new_ack;
            while let Some(front) = self.outstanding.front() {
                if front.seqno + front.segment.sequence_length() <= self.ack_seqno {
                    self.outstanding.pop_front();
                } else {
                    break;
                }
            }
            self.reset_timer();
        }
    }

    /// Advance the retransmission timer by `ms_elapsed` milliseconds.
    pub fn tick(&mut self, ms_elapsed: u64, mut transmit: impl FnMut(&Segment)) {
        if self.outstanding.is_empty() {
            self.reset_timer();
            return;
        }

        self.elapsed_ms += ms_elapsed;
        if self.elapsed_ms < self.rto_ms {
            return;
        }

        if let Some(front) = self.outstanding.front() {
            trace!(
                seqno = front.seqno,
                rto_ms = self.rto_ms,
                retransmissions = self.consecutive_retransmissions + 1,
                "retransmitting earliest outstanding segment"
            );
            transmit(&front.segment);
        }
        self.consecutive_retransmissions += 1;
        // A zero window means loss is not the likely cause; keep probing at
        // the same cadence instead of backing off.
        if self.window != 0 {
            self.rto_ms = (self.rto_ms * 2).min(self.max_rto_ms);
        }
        self.elapsed_ms = 0;
    }

    fn reset_timer(&mut self) {
        self.elapsed_ms = 0;
        self.rto_ms = self.initial_rto_ms;
        self.consecutive_retransmissions = 0;
    }

    /// A segment that occupies no sequence space, used to carry an
    /// acknowledgment (or RST) when there is no data to send.
    pub fn make_empty_segment(&self) -> Segment {
        let seqno = self.next_seqno.min(self.fin_seqno.unwrap_or(u64::MAX));
        Segment {
            seqno: Wrap32::wrap(seqno, self.isn),
            rst: self.stream.has_error(),
            ..Default::default()
        }
    }

    pub fn isn(&self) -> Wrap32 {
        self.isn
    }

    pub fn next_seqno(&self) -> u64 {
        self.next_seqno
    }

    pub fn ack_seqno(&self) -> u64 {
        self.ack_seqno
    }

    /// Sequence numbers transmitted but not yet acknowledged.
    pub fn sequence_numbers_in_flight(&self) -> u64 {
        self.next_seqno - self.ack_seqno
    }

    pub fn consecutive_retransmissions(&self) -> u32 {
        self.consecutive_retransmissions
    }

    pub fn syn_sent(&self) -> bool {
        self.next_seqno > 0
    }

    pub fn fin_sent(&self) -> bool {
        self.fin_seqno.is_some()
    }

    /// The FIN has been transmitted and cumulatively acknowledged.
    pub fn fin_acked(&self) -> bool {
        self.fin_seqno.is_some_and(|fin| self.ack_seqno > fin)
    }

    /// The outbound byte stream (writer side).
    pub fn stream(&self) -> &ByteStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut ByteStream {
        &mut self.stream
    }

    pub fn has_error(&self) -> bool {
        self.stream.has_error()
    }

    pub fn set_error(&mut self) {
        self.stream.set_error();
    }
}
