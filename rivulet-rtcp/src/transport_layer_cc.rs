//! Transport-wide congestion control feedback,
//! draft-holmer-rmcat-transport-wide-cc-extensions-01.

use crate::header::{Header, FMT_TRANSPORT_CC, PT_TRANSPORT_FEEDBACK};
use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{require, Marshal, MarshalSize, Unmarshal};

/// Wire scale of receive deltas.
pub const DELTA_SCALE_FACTOR: i64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolTypeTcc {
    #[default]
    PacketNotReceived = 0,
    PacketReceivedSmallDelta = 1,
    PacketReceivedLargeDelta = 2,
    PacketReceivedWithoutDelta = 3,
}

impl SymbolTypeTcc {
    pub fn from_u16(v: u16) -> SymbolTypeTcc {
        match v & 0x03 {
            0 => SymbolTypeTcc::PacketNotReceived,
            1 => SymbolTypeTcc::PacketReceivedSmallDelta,
            2 => SymbolTypeTcc::PacketReceivedLargeDelta,
            _ => SymbolTypeTcc::PacketReceivedWithoutDelta,
        }
    }

    pub fn has_delta(&self) -> bool {
        matches!(
            self,
            SymbolTypeTcc::PacketReceivedSmallDelta | SymbolTypeTcc::PacketReceivedLargeDelta
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolSizeTypeTcc {
    OneBit,
    TwoBit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketStatusChunk {
    /// 13-bit run of one status symbol.
    RunLengthChunk {
        packet_status_symbol: SymbolTypeTcc,
        run_length: u16,
    },
    /// 14 one-bit or 7 two-bit status symbols.
    StatusVectorChunk {
        symbol_size: SymbolSizeTypeTcc,
        symbol_list: Vec<SymbolTypeTcc>,
    },
}

impl PacketStatusChunk {
    pub fn symbols(&self) -> Vec<SymbolTypeTcc> {
        match self {
            PacketStatusChunk::RunLengthChunk {
                packet_status_symbol,
                run_length,
            } => vec![*packet_status_symbol; *run_length as usize],
            PacketStatusChunk::StatusVectorChunk { symbol_list, .. } => symbol_list.clone(),
        }
    }

    fn encode(&self) -> u16 {
        match self {
            PacketStatusChunk::RunLengthChunk {
                packet_status_symbol,
                run_length,
            } => ((*packet_status_symbol as u16) << 13) | (run_length & 0x1FFF),
            PacketStatusChunk::StatusVectorChunk {
                symbol_size,
                symbol_list,
            } => match symbol_size {
                SymbolSizeTypeTcc::OneBit => {
                    let mut word = 0x8000u16;
                    for (i, sym) in symbol_list.iter().take(14).enumerate() {
                        let bit = (*sym != SymbolTypeTcc::PacketNotReceived) as u16;
                        word |= bit << (13 - i);
                    }
                    word
                }
                SymbolSizeTypeTcc::TwoBit => {
                    let mut word = 0x8000u16 | 0x4000;
                    for (i, sym) in symbol_list.iter().take(7).enumerate() {
                        word |= (*sym as u16) << (12 - 2 * i);
                    }
                    word
                }
            },
        }
    }

    fn decode(word: u16) -> PacketStatusChunk {
        if word & 0x8000 == 0 {
            return PacketStatusChunk::RunLengthChunk {
                packet_status_symbol: SymbolTypeTcc::from_u16(word >> 13),
                run_length: word & 0x1FFF,
            };
        }
        if word & 0x4000 == 0 {
            let symbol_list = (0..14)
                .map(|i| {
                    if word & (1 << (13 - i)) != 0 {
                        SymbolTypeTcc::PacketReceivedSmallDelta
                    } else {
                        SymbolTypeTcc::PacketNotReceived
                    }
                })
                .collect();
            PacketStatusChunk::StatusVectorChunk {
                symbol_size: SymbolSizeTypeTcc::OneBit,
                symbol_list,
            }
        } else {
            let symbol_list = (0..7).map(|i| SymbolTypeTcc::from_u16(word >> (12 - 2 * i))).collect();
            PacketStatusChunk::StatusVectorChunk {
                symbol_size: SymbolSizeTypeTcc::TwoBit,
                symbol_list,
            }
        }
    }
}

/// Receive-time delta; `delta` is in microseconds, already rounded to the
/// 250 µs wire scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvDelta {
    pub type_tcc_packet: SymbolTypeTcc,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerCc {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub base_sequence_number: u16,
    pub packet_status_count: u16,
    /// 24 bits, units of 64 ms.
    pub reference_time: u32,
    pub fb_pkt_count: u8,
    pub packet_chunks: Vec<PacketStatusChunk>,
    pub recv_deltas: Vec<RecvDelta>,
}

impl TransportLayerCc {
    fn body_size(&self) -> usize {
        let deltas: usize = self
            .recv_deltas
            .iter()
            .map(|d| match d.type_tcc_packet {
                SymbolTypeTcc::PacketReceivedSmallDelta => 1,
                _ => 2,
            })
            .sum();
        8 + 8 + self.packet_chunks.len() * 2 + deltas
    }
}

impl MarshalSize for TransportLayerCc {
    fn marshal_size(&self) -> usize {
        // header + body padded to a word boundary
        4 + self.body_size().div_ceil(4) * 4
    }
}

impl Marshal for TransportLayerCc {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        let size = self.marshal_size();
        let header = Header {
            padding: false,
            count: FMT_TRANSPORT_CC,
            packet_type: PT_TRANSPORT_FEEDBACK,
            length: (size / 4 - 1) as u16,
        };
        header.marshal_to(buf)?;
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        buf.put_u16(self.base_sequence_number);
        buf.put_u16(self.packet_status_count);
        buf.put_u8((self.reference_time >> 16) as u8);
        buf.put_u16((self.reference_time & 0xFFFF) as u16);
        buf.put_u8(self.fb_pkt_count);
        for chunk in &self.packet_chunks {
            buf.put_u16(chunk.encode());
        }
        for delta in &self.recv_deltas {
            let scaled = delta.delta / DELTA_SCALE_FACTOR;
            match delta.type_tcc_packet {
                SymbolTypeTcc::PacketReceivedSmallDelta => {
                    if !(0..=0xFF).contains(&scaled) {
                        return Err(Error::RtcpDecode(format!("small delta overflow {scaled}")));
                    }
                    buf.put_u8(scaled as u8);
                }
                SymbolTypeTcc::PacketReceivedLargeDelta => {
                    if scaled < i16::MIN as i64 || scaled > i16::MAX as i64 {
                        return Err(Error::RtcpDecode(format!("large delta overflow {scaled}")));
                    }
                    buf.put_i16(scaled as i16);
                }
                _ => {}
            }
        }
        for _ in 4 + self.body_size()..size {
            buf.put_u8(0);
        }
        Ok(size)
    }
}

impl TransportLayerCc {
    pub fn unmarshal_body(header: &Header, buf: &mut impl Buf) -> Result<Self> {
        let total = (header.length as usize + 1) * 4 - 4;
        require(buf, total)?;
        let mut remaining = total;

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let base_sequence_number = buf.get_u16();
        let packet_status_count = buf.get_u16();
        let b = buf.get_u8();
        let reference_time = ((b as u32) << 16) | buf.get_u16() as u32;
        let fb_pkt_count = buf.get_u8();
        remaining -= 16;

        let mut packet_chunks = Vec::new();
        let mut statuses = 0usize;
        while statuses < packet_status_count as usize && remaining >= 2 {
            let chunk = PacketStatusChunk::decode(buf.get_u16());
            remaining -= 2;
            statuses += chunk.symbols().len();
            packet_chunks.push(chunk);
        }

        let mut recv_deltas = Vec::new();
        let mut consumed = 0usize;
        for chunk in &packet_chunks {
            for sym in chunk.symbols() {
                if consumed >= packet_status_count as usize {
                    break;
                }
                consumed += 1;
                match sym {
                    SymbolTypeTcc::PacketReceivedSmallDelta => {
                        if remaining < 1 {
                            return Err(Error::RtcpDecode("missing small delta".into()));
                        }
                        recv_deltas.push(RecvDelta {
                            type_tcc_packet: sym,
                            delta: buf.get_u8() as i64 * DELTA_SCALE_FACTOR,
                        });
                        remaining -= 1;
                    }
                    SymbolTypeTcc::PacketReceivedLargeDelta => {
                        if remaining < 2 {
                            return Err(Error::RtcpDecode("missing large delta".into()));
                        }
                        recv_deltas.push(RecvDelta {
                            type_tcc_packet: sym,
                            delta: buf.get_i16() as i64 * DELTA_SCALE_FACTOR,
                        });
                        remaining -= 2;
                    }
                    _ => {}
                }
            }
        }

        // trailing padding
        if remaining > 0 {
            buf.advance(remaining);
        }

        Ok(TransportLayerCc {
            sender_ssrc,
            media_ssrc,
            base_sequence_number,
            packet_status_count,
            reference_time,
            fb_pkt_count,
            packet_chunks,
            recv_deltas,
        })
    }
}

impl Unmarshal for TransportLayerCc {
    fn unmarshal(buf: &mut impl Buf) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PT_TRANSPORT_FEEDBACK || header.count != FMT_TRANSPORT_CC {
            return Err(Error::RtcpDecode("not transport-wide cc feedback".into()));
        }
        Self::unmarshal_body(&header, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_length_chunk_codec() {
        let chunk = PacketStatusChunk::RunLengthChunk {
            packet_status_symbol: SymbolTypeTcc::PacketReceivedSmallDelta,
            run_length: 3,
        };
        let word = chunk.encode();
        assert_eq!(word, 0x2003);
        assert_eq!(PacketStatusChunk::decode(word), chunk);
        assert_eq!(chunk.symbols().len(), 3);
    }

    #[test]
    fn test_two_bit_vector_chunk_codec() {
        let chunk = PacketStatusChunk::StatusVectorChunk {
            symbol_size: SymbolSizeTypeTcc::TwoBit,
            symbol_list: vec![
                SymbolTypeTcc::PacketReceivedSmallDelta,
                SymbolTypeTcc::PacketNotReceived,
                SymbolTypeTcc::PacketReceivedLargeDelta,
                SymbolTypeTcc::PacketNotReceived,
                SymbolTypeTcc::PacketNotReceived,
                SymbolTypeTcc::PacketNotReceived,
                SymbolTypeTcc::PacketNotReceived,
            ],
        };
        let word = chunk.encode();
        assert_eq!(word & 0xC000, 0xC000);
        assert_eq!(PacketStatusChunk::decode(word), chunk);
    }

    #[test]
    fn test_single_packet_feedback_round_trip() {
        let cc = TransportLayerCc {
            sender_ssrc: 0xFA17FA17,
            media_ssrc: 0x43032FA0,
            base_sequence_number: 153,
            packet_status_count: 1,
            reference_time: 4057090,
            fb_pkt_count: 23,
            packet_chunks: vec![PacketStatusChunk::RunLengthChunk {
                packet_status_symbol: SymbolTypeTcc::PacketReceivedSmallDelta,
                run_length: 1,
            }],
            recv_deltas: vec![RecvDelta {
                type_tcc_packet: SymbolTypeTcc::PacketReceivedSmallDelta,
                delta: 4 * DELTA_SCALE_FACTOR,
            }],
        };
        let raw = cc.marshal().unwrap();
        assert_eq!(raw.len(), cc.marshal_size());
        assert_eq!(raw.len() % 4, 0);
        // FMT=15, PT=205
        assert_eq!(raw[0], 0x8F);
        assert_eq!(raw[1], 205);

        let parsed = TransportLayerCc::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed.sender_ssrc, cc.sender_ssrc);
        assert_eq!(parsed.base_sequence_number, 153);
        assert_eq!(parsed.recv_deltas, cc.recv_deltas);
    }

    #[test]
    fn test_mixed_chunks_round_trip() {
        let cc = TransportLayerCc {
            sender_ssrc: 1,
            media_ssrc: 2,
            base_sequence_number: 100,
            packet_status_count: 6,
            reference_time: 100,
            fb_pkt_count: 0,
            packet_chunks: vec![
                PacketStatusChunk::RunLengthChunk {
                    packet_status_symbol: SymbolTypeTcc::PacketReceivedSmallDelta,
                    run_length: 2,
                },
                PacketStatusChunk::RunLengthChunk {
                    packet_status_symbol: SymbolTypeTcc::PacketNotReceived,
                    run_length: 3,
                },
                PacketStatusChunk::RunLengthChunk {
                    packet_status_symbol: SymbolTypeTcc::PacketReceivedLargeDelta,
                    run_length: 1,
                },
            ],
            recv_deltas: vec![
                RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedSmallDelta,
                    delta: 250,
                },
                RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedSmallDelta,
                    delta: 500,
                },
                RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedLargeDelta,
                    delta: -1000,
                },
            ],
        };
        let raw = cc.marshal().unwrap();
        let parsed = TransportLayerCc::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed.packet_status_count, 6);
        assert_eq!(parsed.recv_deltas, cc.recv_deltas);
        let total_symbols: usize = parsed.packet_chunks.iter().map(|c| c.symbols().len()).sum();
        assert_eq!(total_symbols, 6);
    }
}
