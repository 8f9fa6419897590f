//! RTP payload forms for H.264 (RFC 6184) and H.265 (RFC 7798).
//!
//! The deep payload hierarchy of RTP packetizers is a tagged sum here; the
//! serializer is one `match` per variant.

use bytes::{Buf, BufMut, Bytes};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize};

/// H.264 STAP-A NALU type.
pub const STAP_A: u8 = 24;
/// H.264 FU-A NALU type.
pub const FU_A: u8 = 28;
/// H.265 aggregation packet NALU type.
pub const STAP_HEVC: u8 = 48;
/// H.265 fragmentation unit NALU type.
pub const FU_HEVC: u8 = 49;

/// Annex-B separator inserted between aggregated raw NALUs.
const RAW_NALU_SEPARATOR: [u8; 3] = [0, 0, 1];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Opaque bytes, used for audio frames and passthrough.
    Raw(Bytes),
    /// One NALU, header included, sent as-is.
    SingleNalu(Bytes),
    /// Several NALUs of one access unit joined with `00 00 01` separators.
    RawNalus(Vec<Bytes>),
    /// H.264 single-time aggregation of parameter sets.
    StapA { nri: u8, nalus: Vec<Bytes> },
    /// H.265 aggregation packet.
    StapHevc { nalus: Vec<Bytes> },
    /// H.264 fragmentation unit; `chunks` are consecutive views of the
    /// fragment for this packet.
    FuA {
        nri: u8,
        nalu_type: u8,
        start: bool,
        end: bool,
        chunks: Vec<Bytes>,
    },
    /// H.265 fragmentation unit.
    FuHevc {
        nalu_type: u8,
        start: bool,
        end: bool,
        chunks: Vec<Bytes>,
    },
}

impl Payload {
    /// NALU-type value carried on the wire for this payload form.
    pub fn nalu_type(&self) -> u8 {
        match self {
            Payload::Raw(data) | Payload::SingleNalu(data) => {
                data.first().map(|b| b & 0x1F).unwrap_or(0)
            }
            Payload::RawNalus(nalus) => nalus.first().map(|n| n[0] & 0x1F).unwrap_or(0),
            Payload::StapA { .. } => STAP_A,
            Payload::StapHevc { .. } => STAP_HEVC,
            Payload::FuA { .. } => FU_A,
            Payload::FuHevc { .. } => FU_HEVC,
        }
    }
}

impl MarshalSize for Payload {
    fn marshal_size(&self) -> usize {
        match self {
            Payload::Raw(data) | Payload::SingleNalu(data) => data.len(),
            Payload::RawNalus(nalus) => {
                let bytes: usize = nalus.iter().map(|n| n.len()).sum();
                bytes + RAW_NALU_SEPARATOR.len() * nalus.len().saturating_sub(1)
            }
            Payload::StapA { nalus, .. } => {
                1 + nalus.iter().map(|n| 2 + n.len()).sum::<usize>()
            }
            Payload::StapHevc { nalus } => {
                2 + nalus.iter().map(|n| 2 + n.len()).sum::<usize>()
            }
            Payload::FuA { chunks, .. } => 2 + chunks.iter().map(|c| c.len()).sum::<usize>(),
            Payload::FuHevc { chunks, .. } => 3 + chunks.iter().map(|c| c.len()).sum::<usize>(),
        }
    }
}

impl Marshal for Payload {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        match self {
            Payload::Raw(data) | Payload::SingleNalu(data) => {
                buf.put_slice(data);
            }
            Payload::RawNalus(nalus) => {
                for (i, nalu) in nalus.iter().enumerate() {
                    if i > 0 {
                        buf.put_slice(&RAW_NALU_SEPARATOR);
                    }
                    buf.put_slice(nalu);
                }
            }
            Payload::StapA { nri, nalus } => {
                buf.put_u8((nri & 0x60) | STAP_A);
                for nalu in nalus {
                    buf.put_u16(nalu.len() as u16);
                    buf.put_slice(nalu);
                }
            }
            Payload::StapHevc { nalus } => {
                // PayloadHdr: type=48, layer id 0, tid 1
                buf.put_u8(STAP_HEVC << 1);
                buf.put_u8(0x01);
                for nalu in nalus {
                    buf.put_u16(nalu.len() as u16);
                    buf.put_slice(nalu);
                }
            }
            Payload::FuA {
                nri,
                nalu_type,
                start,
                end,
                chunks,
            } => {
                buf.put_u8((nri & 0x60) | FU_A);
                let mut fu = nalu_type & 0x1F;
                if *start {
                    fu |= 0x80;
                }
                if *end {
                    fu |= 0x40;
                }
                buf.put_u8(fu);
                for chunk in chunks {
                    buf.put_slice(chunk);
                }
            }
            Payload::FuHevc {
                nalu_type,
                start,
                end,
                chunks,
            } => {
                buf.put_u8(FU_HEVC << 1);
                buf.put_u8(0x01);
                let mut fu = nalu_type & 0x3F;
                if *start {
                    fu |= 0x80;
                }
                if *end {
                    fu |= 0x40;
                }
                buf.put_u8(fu);
                for chunk in chunks {
                    buf.put_slice(chunk);
                }
            }
        }
        Ok(self.marshal_size())
    }
}

/// Unpack an H.264 STAP-A payload into its NALUs.
pub fn unmarshal_stap_a(mut buf: Bytes) -> Result<Vec<Bytes>> {
    if buf.is_empty() {
        return Err(Error::RtpDecode("empty stap-a".into()));
    }
    let indicator = buf.get_u8();
    if indicator & 0x1F != STAP_A {
        return Err(Error::RtpDecode(format!(
            "nalu type {} is not stap-a",
            indicator & 0x1F
        )));
    }
    split_aggregated(buf)
}

/// Unpack an H.265 aggregation payload into its NALUs.
pub fn unmarshal_stap_hevc(mut buf: Bytes) -> Result<Vec<Bytes>> {
    if buf.len() < 2 {
        return Err(Error::RtpDecode("empty hevc aggregation".into()));
    }
    let header = buf.get_u8();
    buf.advance(1);
    if (header >> 1) & 0x3F != STAP_HEVC {
        return Err(Error::RtpDecode(format!(
            "nalu type {} is not hevc aggregation",
            (header >> 1) & 0x3F
        )));
    }
    split_aggregated(buf)
}

fn split_aggregated(mut buf: Bytes) -> Result<Vec<Bytes>> {
    let mut nalus = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 2 {
            return Err(Error::RtpDecode("short aggregation size".into()));
        }
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(Error::RtpDecode("short aggregation nalu".into()));
        }
        nalus.push(buf.split_to(len));
    }
    Ok(nalus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stap_a_round_trip() {
        let sps = Bytes::from_static(&[0x67, 0x64, 0x00, 0x1F, 0xAC]);
        let pps = Bytes::from_static(&[0x68, 0xEE, 0x3C, 0x80]);
        let payload = Payload::StapA {
            nri: 0x60,
            nalus: vec![sps.clone(), pps.clone()],
        };

        let raw = payload.marshal().unwrap();
        assert_eq!(raw.len(), payload.marshal_size());
        assert_eq!(raw[0] & 0x1F, STAP_A);

        let nalus = unmarshal_stap_a(raw).unwrap();
        assert_eq!(nalus, vec![sps, pps]);
    }

    #[test]
    fn test_stap_hevc_layout() {
        let vps = Bytes::from_static(&[0x40, 0x01, 0x0C]);
        let sps = Bytes::from_static(&[0x42, 0x01, 0x01]);
        let pps = Bytes::from_static(&[0x44, 0x01, 0xC1]);
        let payload = Payload::StapHevc {
            nalus: vec![vps.clone(), sps.clone(), pps.clone()],
        };

        let raw = payload.marshal().unwrap();
        assert_eq!((raw[0] >> 1) & 0x3F, STAP_HEVC);
        // first aggregated unit starts right after PayloadHdr + its size
        assert_eq!(raw[4], 0x40);

        let nalus = unmarshal_stap_hevc(raw).unwrap();
        assert_eq!(nalus, vec![vps, sps, pps]);
    }

    #[test]
    fn test_raw_nalus_separators() {
        let payload = Payload::RawNalus(vec![
            Bytes::from_static(&[0x09, 0xF0]),
            Bytes::from_static(&[0x65, 0x88]),
        ]);
        let raw = payload.marshal().unwrap();
        assert_eq!(raw.as_ref(), &[0x09, 0xF0, 0x00, 0x00, 0x01, 0x65, 0x88]);
        assert_eq!(payload.nalu_type(), 0x09);
    }

    #[test]
    fn test_fu_a_header_bits() {
        let payload = Payload::FuA {
            nri: 0x65,
            nalu_type: 5,
            start: true,
            end: false,
            chunks: vec![Bytes::from_static(&[0xAA, 0xBB])],
        };
        let raw = payload.marshal().unwrap();
        // indicator keeps the NRI bits, carries type 28
        assert_eq!(raw[0], (0x65 & 0x60) | FU_A);
        // FU header: start bit + type 5
        assert_eq!(raw[1], 0x80 | 5);
        assert_eq!(&raw[2..], &[0xAA, 0xBB]);

        let end = Payload::FuA {
            nri: 0x65,
            nalu_type: 5,
            start: false,
            end: true,
            chunks: vec![Bytes::from_static(&[0xCC])],
        };
        let raw = end.marshal().unwrap();
        assert_eq!(raw[1], 0x40 | 5);
    }

    #[test]
    fn test_fu_hevc_header_bits() {
        let payload = Payload::FuHevc {
            nalu_type: 19,
            start: true,
            end: false,
            chunks: vec![Bytes::from_static(&[0x01])],
        };
        let raw = payload.marshal().unwrap();
        assert_eq!((raw[0] >> 1) & 0x3F, FU_HEVC);
        assert_eq!(raw[1], 0x01);
        assert_eq!(raw[2], 0x80 | 19);
    }
}
