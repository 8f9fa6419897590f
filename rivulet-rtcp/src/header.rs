//! Common RTCP packet header, RFC 3550 §6.4.1.

use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{require, Marshal, MarshalSize, Unmarshal};

pub const HEADER_LENGTH: usize = 4;
pub const VERSION: u8 = 2;

/// RTCP packet types used by the core.
pub const PT_SENDER_REPORT: u8 = 200;
pub const PT_RECEIVER_REPORT: u8 = 201;
pub const PT_SOURCE_DESCRIPTION: u8 = 202;
pub const PT_GOODBYE: u8 = 203;
pub const PT_APP: u8 = 204;
pub const PT_TRANSPORT_FEEDBACK: u8 = 205;
pub const PT_PAYLOAD_FEEDBACK: u8 = 206;
pub const PT_EXTENDED_REPORT: u8 = 207;

/// FMT values of transport-layer feedback.
pub const FMT_NACK: u8 = 1;
pub const FMT_TRANSPORT_CC: u8 = 15;
/// FMT values of payload-specific feedback.
pub const FMT_PLI: u8 = 1;
pub const FMT_REMB: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub padding: bool,
    /// Reception-report count or feedback message type.
    pub count: u8,
    pub packet_type: u8,
    /// Packet length in 32-bit words minus one.
    pub length: u16,
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        let mut b0 = (VERSION << 6) | (self.count & 0x1F);
        if self.padding {
            b0 |= 1 << 5;
        }
        buf.put_u8(b0);
        buf.put_u8(self.packet_type);
        buf.put_u16(self.length);
        Ok(HEADER_LENGTH)
    }
}

impl Unmarshal for Header {
    fn unmarshal(buf: &mut impl Buf) -> Result<Self> {
        require(buf, HEADER_LENGTH)?;
        let b0 = buf.get_u8();
        if b0 >> 6 != VERSION {
            return Err(Error::RtcpDecode(format!("bad version {}", b0 >> 6)));
        }
        Ok(Header {
            padding: (b0 >> 5) & 0x01 == 1,
            count: b0 & 0x1F,
            packet_type: buf.get_u8(),
            length: buf.get_u16(),
        })
    }
}
