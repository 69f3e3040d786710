//! Protocol messages and the wire codec.
//!
//! Every datagram carries one `Packet`: the sender half's segment (sequence
//! number, flags, payload) piggybacked with the receiver half's
//! acknowledgment (optional ackno, advertised window, reset). The wire layout
//! is a fixed 14-byte big-endian header followed by the payload:
//!
//! ```text
//! seqno(4) | ackno(4) | payload_len(2) | window(2) | seg_flags(1) | ack_flags(1)
//! ```
//!
//! Segment flags: bit 2 = SYN, bit 1 = FIN, bit 0 = RST. Ack flags: bit 0 =
//! RST, the rest reserved (zero on encode, ignored on decode). An ackno of
//! zero on the wire encodes "no acknowledgment yet".

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::{MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::{Result, RiptideError};
use crate::seq::Wrap32;

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 14;

const SEG_SYN: u8 = 0b100;
const SEG_FIN: u8 = 0b010;
const SEG_RST: u8 = 0b001;
const ACK_RST: u8 = 0b001;

/// The data-bearing half of a packet, produced by a sender.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segment {
    pub seqno: Wrap32,
    pub payload: Bytes,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
}

impl Segment {
    /// Sequence numbers this segment occupies: payload bytes plus one each
    /// for SYN and FIN.
    pub fn sequence_length(&self) -> u64 {
        self.payload.len() as u64 + u64::from(self.syn) + u64::from(self.fin)
    }
}

/// The acknowledging half of a packet, produced by a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack {
    /// Cumulative acknowledgment; `None` until the peer's SYN arrives.
    pub ackno: Option<Wrap32>,
    pub window: u16,
    pub rst: bool,
}

/// One wire datagram: a segment piggybacked with an acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub segment: Segment,
    pub ack: Ack,
}

impl Packet {
    /// Encode into a freshly allocated buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode into a pre-allocated `BytesMut`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.segment.seqno.raw());
        buf.put_u32(self.ack.ackno.map_or(0, Wrap32::raw));
        buf.put_u16(self.segment.payload.len() as u16);
        buf.put_u16(self.ack.window);

        let mut seg_flags = 0u8;
        if self.segment.syn {
            seg_flags |= SEG_SYN;
        }
        if self.segment.fin {
            seg_flags |= SEG_FIN;
        }
        if self.segment.rst {
            seg_flags |= SEG_RST;
        }
        buf.put_u8(seg_flags);
        buf.put_u8(if self.ack.rst { ACK_RST } else { 0 });

        buf.put_slice(&self.segment.payload);
    }

    /// The number of bytes this packet occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.segment.payload.len()
    }

    /// Decode a packet from a received datagram.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::ensure_len(data, HEADER_LEN)?;

        let seqno = Wrap32::new((&data[0..4]).get_u32());
        let ackno_raw = (&data[4..8]).get_u32();
        let payload_len = (&data[8..10]).get_u16() as usize;
        let window = (&data[10..12]).get_u16();
        let seg_flags = data[12];
        let ack_flags = data[13];

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(RiptideError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let rest = &data[HEADER_LEN..];
        Self::ensure_len(rest, payload_len)?;
        let payload = Bytes::copy_from_slice(&rest[..payload_len]);

        Ok(Packet {
            segment: Segment {
                seqno,
                payload,
                syn: seg_flags & SEG_SYN != 0,
                fin: seg_flags & SEG_FIN != 0,
                rst: seg_flags & SEG_RST != 0,
            },
            ack: Ack {
                ackno: (ackno_raw != 0).then_some(Wrap32::new(ackno_raw)),
                window,
                rst: ack_flags & ACK_RST != 0,
            },
        })
    }

    fn ensure_len(data: &[u8], needed: usize) -> Result<()> {
        if data.len() < needed {
            Err(RiptideError::SegmentTooShort {
                expected: needed,
                actual: data.len(),
            })
        } else {
            Ok(())
        }
    }
}

// Headers always fit the substrate alongside a full payload.
const _: () = assert!(HEADER_LEN + MAX_PAYLOAD_SIZE <= MAX_DATAGRAM_SIZE);
