//! Sender report, RFC 3550 §6.4.1.

use crate::header::{Header, PT_SENDER_REPORT};
use crate::reception_report::ReceptionReport;
use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{require, Marshal, MarshalSize, Unmarshal};

/// NTP timestamp + RTP timestamp + packet and octet counts.
const SENDER_INFO_LENGTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderReport {
    pub ssrc: u32,
    /// 64-bit NTP timestamp of this report.
    pub ntp_time: u64,
    /// RTP timestamp corresponding to `ntp_time`.
    pub rtp_time: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReceptionReport>,
}

impl MarshalSize for SenderReport {
    fn marshal_size(&self) -> usize {
        4 + 4 + SENDER_INFO_LENGTH + self.reports.len() * 24
    }
}

impl Marshal for SenderReport {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        let header = Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PT_SENDER_REPORT,
            length: (self.marshal_size() / 4 - 1) as u16,
        };
        header.marshal_to(buf)?;
        buf.put_u32(self.ssrc);
        buf.put_u64(self.ntp_time);
        buf.put_u32(self.rtp_time);
        buf.put_u32(self.packet_count);
        buf.put_u32(self.octet_count);
        for report in &self.reports {
            report.marshal_to(buf)?;
        }
        Ok(self.marshal_size())
    }
}

impl SenderReport {
    /// Decode the body after the common header.
    pub fn unmarshal_body(header: &Header, buf: &mut impl Buf) -> Result<Self> {
        require(buf, 4 + SENDER_INFO_LENGTH)?;
        let ssrc = buf.get_u32();
        let ntp_time = buf.get_u64();
        let rtp_time = buf.get_u32();
        let packet_count = buf.get_u32();
        let octet_count = buf.get_u32();
        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }
        Ok(SenderReport {
            ssrc,
            ntp_time,
            rtp_time,
            packet_count,
            octet_count,
            reports,
        })
    }
}

impl Unmarshal for SenderReport {
    fn unmarshal(buf: &mut impl Buf) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PT_SENDER_REPORT {
            return Err(Error::RtcpDecode("not a sender report".into()));
        }
        Self::unmarshal_body(&header, buf)
    }
}
