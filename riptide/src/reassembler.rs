//! Out-of-order segment reassembly.
//!
//! The reassembler accepts byte segments at arbitrary absolute indices and
//! writes the longest contiguous prefix into its output stream. It buffers at
//! most one window of pending bytes, where the window is the output stream's
//! available capacity at insert time: anything starting at or beyond the
//! window's right edge is dropped and must be retransmitted by the peer.
//!
//! Storage is a byte buffer paired with an occupancy bitmap, both sliding in
//! lockstep with the first unassembled index. The first write at a position
//! wins; well-behaved peers only ever resend identical bytes.

use std::collections::VecDeque;

use crate::stream::ByteStream;

pub struct Reassembler {
    output: ByteStream,
    /// Absolute index of the first byte not yet pushed to the output.
    first_unassembled: u64,
    /// Occupied slots in `buf` (number of true bits in `bitmap`).
    pending: usize,
    /// Fixed slot count; the live window is a prefix of this.
    window: usize,
    buf: VecDeque<u8>,
    bitmap: VecDeque<bool>,
    /// Absolute index one past the final byte of the stream, once known.
    end_index: Option<u64>,
}

impl Reassembler {
    pub fn new(output: ByteStream) -> Self {
        let window = output.capacity();
        Self {
            output,
            first_unassembled: 0,
            pending: 0,
            window,
            buf: VecDeque::from(vec![0u8; window]),
            bitmap: VecDeque::from(vec![false; window]),
            end_index: None,
        }
    }

    /// Insert a segment of `data` whose first byte has absolute index
    /// `first_index`. `is_last` marks the segment containing the final byte
    /// of the stream.
    pub fn insert(&mut self, first_index: u64, data: &[u8], is_last: bool) {
        if self.output.is_closed() {
            return;
        }

        let len = data.len() as u64;
        let unassembled = self.first_unassembled;
        let window = self.output.available_capacity() as u64;
        let right_edge = unassembled + window;

        // Entirely beyond the window: drop, and do not remember the marker
        // (the peer will resend once the window opens). An empty end-of-stream
        // marker sitting exactly on the edge is the one exception, so a FIN
        // can land while the output is full.
        if first_index >= right_edge && !(is_last && len == 0 && first_index == right_edge) {
            return;
        }

        // The marker survives only when the segment's final byte fits.
        if is_last && first_index + len <= right_edge {
            self.end_index = Some(first_index + len);
        }

        // Clip to [unassembled, right_edge) and store.
        let begin = first_index.max(unassembled);
        let end = (first_index + len).min(right_edge);
        for i in begin..end {
            let slot = (i - unassembled) as usize;
            if !self.bitmap[slot] {
                self.buf[slot] = data[(i - first_index) as usize];
                self.bitmap[slot] = true;
                self.pending += 1;
            }
        }

        self.drain();

        if let Some(end_index) = self.end_index {
            if self.first_unassembled >= end_index {
                self.output.close();
            }
        }
    }

    /// Push the contiguous assembled prefix into the output stream.
    fn drain(&mut self) {
        let run = self.bitmap.iter().take_while(|&&set| set).count();
        if run == 0 {
            return;
        }

        let assembled: Vec<u8> = self.buf.drain(..run).collect();
        self.bitmap.drain(..run);
        self.buf.resize(self.window, 0);
        self.bitmap.resize(self.window, false);

        self.first_unassembled += run as u64;
        self.pending -= run;
        self.output
            .push(&assembled)
            .expect("assembled bytes fit within the output stream");
    }

    /// Bytes stored but not yet assembled into the output.
    pub fn count_bytes_pending(&self) -> usize {
        self.pending
    }

    /// Absolute index of the first unassembled byte.
    pub fn first_unassembled(&self) -> u64 {
        self.first_unassembled
    }

    pub fn output(&self) -> &ByteStream {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut ByteStream {
        &mut self.output
    }

    pub fn has_error(&self) -> bool {
        self.output.has_error()
    }

    pub fn set_error(&mut self) {
        self.output.set_error();
    }
}
