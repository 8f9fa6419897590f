//! REMB bandwidth estimation feedback,
//! draft-alvestrand-rmcat-remb-03.

use crate::header::{Header, FMT_REMB, PT_PAYLOAD_FEEDBACK};
use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{require, Marshal, MarshalSize, Unmarshal};

const UNIQUE_IDENTIFIER: [u8; 4] = *b"REMB";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverEstimatedMaximumBitrate {
    pub sender_ssrc: u32,
    /// Estimated bits per second.
    pub bitrate: u64,
    pub ssrcs: Vec<u32>,
}

impl MarshalSize for ReceiverEstimatedMaximumBitrate {
    fn marshal_size(&self) -> usize {
        4 + 8 + 8 + self.ssrcs.len() * 4
    }
}

impl Marshal for ReceiverEstimatedMaximumBitrate {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        let header = Header {
            padding: false,
            count: FMT_REMB,
            packet_type: PT_PAYLOAD_FEEDBACK,
            length: (self.marshal_size() / 4 - 1) as u16,
        };
        header.marshal_to(buf)?;
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(0); // media ssrc is always zero
        buf.put_slice(&UNIQUE_IDENTIFIER);

        // 6-bit exponent, 18-bit mantissa
        let mut exp = 0u32;
        let mut mantissa = self.bitrate;
        while mantissa >= (1 << 18) {
            mantissa >>= 1;
            exp += 1;
        }
        buf.put_u8(self.ssrcs.len() as u8);
        buf.put_u8(((exp << 2) as u8) | ((mantissa >> 16) as u8 & 0x03));
        buf.put_u16((mantissa & 0xFFFF) as u16);
        for ssrc in &self.ssrcs {
            buf.put_u32(*ssrc);
        }
        Ok(self.marshal_size())
    }
}

impl ReceiverEstimatedMaximumBitrate {
    pub fn unmarshal_body(_header: &Header, buf: &mut impl Buf) -> Result<Self> {
        require(buf, 16)?;
        let sender_ssrc = buf.get_u32();
        let _media_ssrc = buf.get_u32();
        let mut ident = [0u8; 4];
        buf.copy_to_slice(&mut ident);
        if ident != UNIQUE_IDENTIFIER {
            return Err(Error::RtcpDecode("missing REMB identifier".into()));
        }
        let num_ssrcs = buf.get_u8() as usize;
        let b = buf.get_u8();
        let exp = (b >> 2) as u32;
        let mantissa = (((b & 0x03) as u64) << 16) | buf.get_u16() as u64;
        let bitrate = mantissa << exp;

        require(buf, num_ssrcs * 4)?;
        let mut ssrcs = Vec::with_capacity(num_ssrcs);
        for _ in 0..num_ssrcs {
            ssrcs.push(buf.get_u32());
        }
        Ok(ReceiverEstimatedMaximumBitrate {
            sender_ssrc,
            bitrate,
            ssrcs,
        })
    }
}

impl Unmarshal for ReceiverEstimatedMaximumBitrate {
    fn unmarshal(buf: &mut impl Buf) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PT_PAYLOAD_FEEDBACK || header.count != FMT_REMB {
            return Err(Error::RtcpDecode("not a remb".into()));
        }
        Self::unmarshal_body(&header, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let remb = ReceiverEstimatedMaximumBitrate {
            sender_ssrc: 1,
            bitrate: 8_927_168,
            ssrcs: vec![0x1215F16C],
        };
        let raw = remb.marshal().unwrap();
        let parsed = ReceiverEstimatedMaximumBitrate::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed.sender_ssrc, 1);
        assert_eq!(parsed.ssrcs, vec![0x1215F16C]);
        // mantissa rounding keeps the estimate close
        let diff = parsed.bitrate.abs_diff(remb.bitrate);
        assert!(diff * 100 < remb.bitrate);
    }
}
