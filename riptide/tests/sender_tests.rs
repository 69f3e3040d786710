//! Sender half: window filling, acknowledgments, retransmission timing.

use std::collections::VecDeque;

use riptide::config::Config;
use riptide::segment::{Ack, Segment};
use riptide::sender::Sender;
use riptide::seq::Wrap32;
use riptide::stream::ByteStream;

const RTO: u64 = 1000;

/// Drives a lone sender and records every transmitted segment.
struct Harness {
    sender: Sender,
    isn: Wrap32,
    sent: VecDeque<Segment>,
}

impl Harness {
    fn new(isn: u32) -> Self {
        Self::with_capacity(isn, 4000)
    }

    fn with_capacity(isn: u32, capacity: usize) -> Self {
        let isn = Wrap32::new(isn);
        let config = Config::default();
        Self {
            sender: Sender::new(ByteStream::new(capacity), isn, &config),
            isn,
            sent: VecDeque::new(),
        }
    }

    fn push(&mut self) {
        let sent = &mut self.sent;
        self.sender.push(|segment| sent.push_back(segment.clone()));
    }

    fn write(&mut self, data: &[u8]) {
        self.sender.stream_mut().push(data).unwrap();
        self.push();
    }

    fn close(&mut self) {
        self.sender.stream_mut().close();
        self.push();
    }

    fn ack(&mut self, absolute: u64) {
        self.ack_with_window(absolute, 1000);
    }

    fn ack_with_window(&mut self, absolute: u64, window: u16) {
        self.sender.receive(&Ack {
            ackno: Some(Wrap32::wrap(absolute, self.isn)),
            window,
            rst: false,
        });
        self.push();
    }

    fn tick(&mut self, ms: u64) {
        let sent = &mut self.sent;
        self.sender.tick(ms, |segment| sent.push_back(segment.clone()));
    }

    fn next_segment(&mut self) -> Segment {
        self.sent.pop_front().expect("expected a transmitted segment")
    }

    fn expect_none(&mut self) {
        assert!(
            self.sent.is_empty(),
            "expected no segments, got {:?}",
            self.sent
        );
    }
}

#[test]
fn syn_goes_out_first() {
    let mut h = Harness::new(45535);
    h.push();
    let seg = h.next_segment();
    assert!(seg.syn);
    assert!(!seg.fin);
    assert!(seg.payload.is_empty());
    assert_eq!(seg.seqno, Wrap32::new(45535));
    h.expect_none();
    assert_eq!(h.sender.sequence_numbers_in_flight(), 1);
}

#[test]
fn syn_acked_then_data_flows() {
    let mut h = Harness::new(7);
    h.push();
    h.next_segment();

    h.ack(1);
    assert_eq!(h.sender.sequence_numbers_in_flight(), 0);

    h.write(b"a");
    let seg = h.next_segment();
    assert!(!seg.syn);
    assert_eq!(&seg.payload[..], b"a");
    assert_eq!(seg.seqno, Wrap32::new(8));
    h.expect_none();
}

#[test]
fn repeated_ack_is_ignored() {
    let mut h = Harness::new(5);
    h.push();
    h.next_segment();
    h.ack(1);

    h.write(b"a");
    h.next_segment();

    h.ack(1);
    h.expect_none();
    assert_eq!(h.sender.sequence_numbers_in_flight(), 1);
}

#[test]
fn impossible_ack_is_ignored() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();

    // Acknowledges sequence space never sent.
    h.ack(2);
    assert_eq!(h.sender.ack_seqno(), 0);
    assert_eq!(h.sender.sequence_numbers_in_flight(), 1);

    // A legitimate ack still lands afterwards.
    h.ack(1);
    assert_eq!(h.sender.ack_seqno(), 1);
    assert_eq!(h.sender.sequence_numbers_in_flight(), 0);
}

#[test]
fn window_is_respected() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    h.ack_with_window(1, 4);

    h.write(b"abcdefg");
    let seg = h.next_segment();
    assert_eq!(&seg.payload[..], b"abcd");
    h.expect_none();
    assert_eq!(h.sender.next_seqno(), 5);

    // Window opens: the rest follows.
    h.ack_with_window(5, 4);
    let seg = h.next_segment();
    assert_eq!(&seg.payload[..], b"efg");
    h.expect_none();
}

#[test]
fn payload_split_at_max_segment_size() {
    let mut h = Harness::with_capacity(0, 4000);
    h.push();
    h.next_segment();
    h.ack_with_window(1, u16::MAX);

    h.write(&[b'x'; 2500]);
    assert_eq!(h.next_segment().payload.len(), 1000);
    assert_eq!(h.next_segment().payload.len(), 1000);
    assert_eq!(h.next_segment().payload.len(), 500);
    h.expect_none();
}

#[test]
fn retransmit_fires_exactly_at_rto() {
    let mut h = Harness::new(9);
    h.push();
    let syn = h.next_segment();

    h.tick(RTO - 1);
    h.expect_none();
    h.tick(1);
    assert_eq!(h.next_segment(), syn);
    assert_eq!(h.sender.consecutive_retransmissions(), 1);
}

#[test]
fn backoff_doubles_rto_each_time() {
    let mut h = Harness::new(3);
    h.push();
    let syn = h.next_segment();

    h.tick(RTO);
    assert_eq!(h.next_segment(), syn);

    // Second retransmission only after twice the timeout.
    h.tick(2 * RTO - 1);
    h.expect_none();
    h.tick(1);
    assert_eq!(h.next_segment(), syn);

    // Third after four times.
    h.tick(4 * RTO - 1);
    h.expect_none();
    h.tick(1);
    assert_eq!(h.next_segment(), syn);
    assert_eq!(h.sender.consecutive_retransmissions(), 3);
}

#[test]
fn new_ack_resets_backoff() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    h.ack(1);

    h.write(b"ab");
    h.next_segment();
    h.tick(RTO);
    h.next_segment();
    h.tick(2 * RTO);
    h.next_segment();
    assert_eq!(h.sender.consecutive_retransmissions(), 2);

    h.ack(3);
    assert_eq!(h.sender.consecutive_retransmissions(), 0);

    // Timer is back at the initial timeout for fresh data.
    h.write(b"c");
    h.next_segment();
    h.tick(RTO - 1);
    h.expect_none();
    h.tick(1);
    assert_eq!(&h.next_segment().payload[..], b"c");
}

#[test]
fn only_earliest_outstanding_is_retransmitted() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    h.ack(1);

    h.write(b"first");
    let first = h.next_segment();
    h.write(b"second");
    h.next_segment();

    h.tick(RTO);
    assert_eq!(h.next_segment(), first);
    h.expect_none();
}

#[test]
fn cumulative_ack_collapses_outstanding() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    h.ack(1);

    for chunk in [&b"aaaaa"[..], b"bbbbb", b"ccccc"] {
        h.write(chunk);
        h.next_segment();
    }
    assert_eq!(h.sender.sequence_numbers_in_flight(), 15);

    // Ack through the second segment: only the third remains.
    h.ack(11);
    assert_eq!(h.sender.sequence_numbers_in_flight(), 5);
    h.tick(RTO);
    assert_eq!(&h.next_segment().payload[..], b"ccccc");
}

#[test]
fn zero_window_probe_without_backoff() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    h.ack_with_window(1, 0);

    // A single-byte probe goes out despite the zero window.
    h.write(b"abc");
    let probe = h.next_segment();
    assert_eq!(&probe.payload[..], b"a");
    h.expect_none();

    // Probes are repeated at the initial timeout, no doubling.
    h.tick(RTO);
    assert_eq!(h.next_segment(), probe);
    h.tick(RTO);
    assert_eq!(h.next_segment(), probe);

    // Window opens: the rest flows and the probe is acked away.
    h.ack_with_window(2, 10);
    assert_eq!(&h.next_segment().payload[..], b"bc");
    h.expect_none();
}

#[test]
fn fin_sent_when_stream_closes() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    h.ack(1);

    h.write(b"hi");
    let seg = h.next_segment();
    assert_eq!(&seg.payload[..], b"hi");
    assert!(!seg.fin);

    h.ack(3);
    h.close();
    let fin = h.next_segment();
    assert!(fin.fin);
    assert!(fin.payload.is_empty());
    assert_eq!(fin.seqno, Wrap32::new(3));
    assert!(h.sender.fin_sent());
    assert!(!h.sender.fin_acked());

    h.ack(4);
    assert!(h.sender.fin_acked());
    assert_eq!(h.sender.sequence_numbers_in_flight(), 0);
}

#[test]
fn fin_piggybacks_on_final_payload() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    h.ack(1);

    h.sender.stream_mut().push(b"bye").unwrap();
    h.sender.stream_mut().close();
    h.push();

    let seg = h.next_segment();
    assert_eq!(&seg.payload[..], b"bye");
    assert!(seg.fin);
    assert_eq!(seg.sequence_length(), 4);
}

#[test]
fn fin_waits_for_window_space() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    h.ack_with_window(1, 3);

    // Payload exactly fills the window; no room for the FIN.
    h.sender.stream_mut().push(b"abc").unwrap();
    h.sender.stream_mut().close();
    h.push();
    let seg = h.next_segment();
    assert_eq!(&seg.payload[..], b"abc");
    assert!(!seg.fin);
    assert!(!h.sender.fin_sent());

    h.ack_with_window(4, 3);
    let fin = h.next_segment();
    assert!(fin.fin);
    assert!(fin.payload.is_empty());
}

#[test]
fn fin_retransmitted_like_data() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    h.ack(1);
    h.close();
    let fin = h.next_segment();

    h.tick(RTO);
    assert_eq!(h.next_segment(), fin);
}

#[test]
fn timer_idle_without_outstanding_data() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    h.ack(1);

    h.tick(10 * RTO);
    h.expect_none();
    assert_eq!(h.sender.consecutive_retransmissions(), 0);
}

#[test]
fn sequence_numbers_stay_monotone() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    let mut last_next = h.sender.next_seqno();
    let mut last_ack = h.sender.ack_seqno();

    h.ack(1);
    h.write(b"abcdef");
    h.next_segment();
    h.ack(4);
    h.ack(2); // stale
    h.ack(7);

    for _ in 0..3 {
        assert!(h.sender.next_seqno() >= last_next);
        assert!(h.sender.ack_seqno() >= last_ack);
        last_next = h.sender.next_seqno();
        last_ack = h.sender.ack_seqno();
        h.tick(RTO);
    }
}

#[test]
fn empty_segment_carries_next_seqno() {
    let mut h = Harness::new(100);
    assert_eq!(h.sender.make_empty_segment().seqno, Wrap32::new(100));
    h.push();
    h.next_segment();
    assert_eq!(h.sender.make_empty_segment().seqno, Wrap32::new(101));
    assert_eq!(h.sender.make_empty_segment().sequence_length(), 0);
}

#[test]
fn reset_ack_poisons_stream() {
    let mut h = Harness::new(0);
    h.push();
    h.next_segment();
    h.sender.receive(&Ack {
        ackno: None,
        window: 0,
        rst: true,
    });
    assert!(h.sender.has_error());
    assert!(h.sender.make_empty_segment().rst);
}
