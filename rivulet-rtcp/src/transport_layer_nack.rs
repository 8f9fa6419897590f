//! Generic NACK feedback, RFC 4585 §6.2.1.

use crate::header::{Header, FMT_NACK, PT_TRANSPORT_FEEDBACK};
use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{require, Marshal, MarshalSize, Unmarshal};

/// One FCI entry: a base packet id plus a 16-bit following-loss bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NackPair {
    pub packet_id: u16,
    pub lost_packets: u16,
}

impl NackPair {
    /// All sequence numbers this pair reports lost.
    pub fn packet_list(&self) -> Vec<u16> {
        let mut seqs = vec![self.packet_id];
        for i in 0..16 {
            if self.lost_packets & (1 << i) != 0 {
                seqs.push(self.packet_id.wrapping_add(i + 1));
            }
        }
        seqs
    }
}

/// Pack a sorted sequence-number list into NACK pairs.
pub fn nack_pairs_from_sequence_numbers(seqs: &[u16]) -> Vec<NackPair> {
    let mut pairs: Vec<NackPair> = Vec::new();
    for &seq in seqs {
        match pairs.last_mut() {
            Some(last) => {
                let diff = seq.wrapping_sub(last.packet_id);
                if diff > 0 && diff <= 16 {
                    last.lost_packets |= 1 << (diff - 1);
                    continue;
                }
                pairs.push(NackPair {
                    packet_id: seq,
                    lost_packets: 0,
                });
            }
            None => pairs.push(NackPair {
                packet_id: seq,
                lost_packets: 0,
            }),
        }
    }
    pairs
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerNack {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub nacks: Vec<NackPair>,
}

impl MarshalSize for TransportLayerNack {
    fn marshal_size(&self) -> usize {
        4 + 8 + self.nacks.len() * 4
    }
}

impl Marshal for TransportLayerNack {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        let header = Header {
            padding: false,
            count: FMT_NACK,
            packet_type: PT_TRANSPORT_FEEDBACK,
            length: (self.marshal_size() / 4 - 1) as u16,
        };
        header.marshal_to(buf)?;
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        for pair in &self.nacks {
            buf.put_u16(pair.packet_id);
            buf.put_u16(pair.lost_packets);
        }
        Ok(self.marshal_size())
    }
}

impl TransportLayerNack {
    pub fn unmarshal_body(header: &Header, buf: &mut impl Buf) -> Result<Self> {
        require(buf, 8)?;
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        // remaining words of this packet are FCI entries
        let fci_words = (header.length as usize).saturating_sub(2);
        let mut nacks = Vec::with_capacity(fci_words);
        for _ in 0..fci_words {
            require(buf, 4)?;
            nacks.push(NackPair {
                packet_id: buf.get_u16(),
                lost_packets: buf.get_u16(),
            });
        }
        Ok(TransportLayerNack {
            sender_ssrc,
            media_ssrc,
            nacks,
        })
    }
}

impl Unmarshal for TransportLayerNack {
    fn unmarshal(buf: &mut impl Buf) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PT_TRANSPORT_FEEDBACK || header.count != FMT_NACK {
            return Err(Error::RtcpDecode("not a transport-layer nack".into()));
        }
        Self::unmarshal_body(&header, buf)
    }
}
