//! Reception report block shared by SR and RR, RFC 3550 §6.4.1.

use bytes::{Buf, BufMut};
use shared::error::Result;
use shared::marshal::{require, Marshal, MarshalSize, Unmarshal};

pub const RECEPTION_REPORT_LENGTH: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceptionReport {
    /// Source this report is about.
    pub ssrc: u32,
    pub fraction_lost: u8,
    /// 24-bit cumulative loss.
    pub total_lost: u32,
    /// Cycles in the high 16 bits, highest sequence in the low 16.
    pub last_sequence_number: u32,
    pub jitter: u32,
    /// Middle 32 bits of the last SR NTP timestamp.
    pub last_sender_report: u32,
    /// Delay since last SR in 1/65536 s units.
    pub delay: u32,
}

impl MarshalSize for ReceptionReport {
    fn marshal_size(&self) -> usize {
        RECEPTION_REPORT_LENGTH
    }
}

impl Marshal for ReceptionReport {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        buf.put_u32(self.ssrc);
        buf.put_u8(self.fraction_lost);
        let lost = self.total_lost.min(0xFFFFFF);
        buf.put_u8((lost >> 16) as u8);
        buf.put_u16((lost & 0xFFFF) as u16);
        buf.put_u32(self.last_sequence_number);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sender_report);
        buf.put_u32(self.delay);
        Ok(RECEPTION_REPORT_LENGTH)
    }
}

impl Unmarshal for ReceptionReport {
    fn unmarshal(buf: &mut impl Buf) -> Result<Self> {
        require(buf, RECEPTION_REPORT_LENGTH)?;
        let ssrc = buf.get_u32();
        let fraction_lost = buf.get_u8();
        let total_lost = ((buf.get_u8() as u32) << 16) | buf.get_u16() as u32;
        Ok(ReceptionReport {
            ssrc,
            fraction_lost,
            total_lost,
            last_sequence_number: buf.get_u32(),
            jitter: buf.get_u32(),
            last_sender_report: buf.get_u32(),
            delay: buf.get_u32(),
        })
    }
}
