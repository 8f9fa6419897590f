//! Picture loss indication, RFC 4585 §6.3.1.

use crate::header::{Header, FMT_PLI, PT_PAYLOAD_FEEDBACK};
use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{require, Marshal, MarshalSize, Unmarshal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PictureLossIndication {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
}

impl MarshalSize for PictureLossIndication {
    fn marshal_size(&self) -> usize {
        12
    }
}

impl Marshal for PictureLossIndication {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        let header = Header {
            padding: false,
            count: FMT_PLI,
            packet_type: PT_PAYLOAD_FEEDBACK,
            length: 2,
        };
        header.marshal_to(buf)?;
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        Ok(12)
    }
}

impl PictureLossIndication {
    pub fn unmarshal_body(_header: &Header, buf: &mut impl Buf) -> Result<Self> {
        require(buf, 8)?;
        Ok(PictureLossIndication {
            sender_ssrc: buf.get_u32(),
            media_ssrc: buf.get_u32(),
        })
    }
}

impl Unmarshal for PictureLossIndication {
    fn unmarshal(buf: &mut impl Buf) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PT_PAYLOAD_FEEDBACK || header.count != FMT_PLI {
            return Err(Error::RtcpDecode("not a pli".into()));
        }
        Self::unmarshal_body(&header, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let pli = PictureLossIndication {
            sender_ssrc: 0x902F9E2E,
            media_ssrc: 0x12345678,
        };
        let raw = pli.marshal().unwrap();
        assert_eq!(raw.as_ref()[..4], [0x81, 206, 0x00, 0x02]);
        assert_eq!(PictureLossIndication::unmarshal(&mut raw.clone()).unwrap(), pli);
    }
}
