//! Receiver report, RFC 3550 §6.4.2.

use crate::header::{Header, PT_RECEIVER_REPORT};
use crate::reception_report::ReceptionReport;
use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{require, Marshal, MarshalSize, Unmarshal};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReceptionReport>,
}

impl MarshalSize for ReceiverReport {
    fn marshal_size(&self) -> usize {
        4 + 4 + self.reports.len() * 24
    }
}

impl Marshal for ReceiverReport {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        let header = Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PT_RECEIVER_REPORT,
            length: (self.marshal_size() / 4 - 1) as u16,
        };
        header.marshal_to(buf)?;
        buf.put_u32(self.ssrc);
        for report in &self.reports {
            report.marshal_to(buf)?;
        }
        Ok(self.marshal_size())
    }
}

impl ReceiverReport {
    pub fn unmarshal_body(header: &Header, buf: &mut impl Buf) -> Result<Self> {
        require(buf, 4)?;
        let ssrc = buf.get_u32();
        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }
        Ok(ReceiverReport { ssrc, reports })
    }
}

impl Unmarshal for ReceiverReport {
    fn unmarshal(buf: &mut impl Buf) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PT_RECEIVER_REPORT {
            return Err(Error::RtcpDecode("not a receiver report".into()));
        }
        Self::unmarshal_body(&header, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let rr = ReceiverReport {
            ssrc: 0x902F9E2E,
            reports: vec![ReceptionReport {
                ssrc: 0x12345678,
                fraction_lost: 8,
                jitter: 5,
                ..Default::default()
            }],
        };
        let raw = rr.marshal().unwrap();
        assert_eq!(ReceiverReport::unmarshal(&mut raw.clone()).unwrap(), rr);
    }

    #[test]
    fn test_empty_reports() {
        let rr = ReceiverReport {
            ssrc: 1,
            reports: vec![],
        };
        let raw = rr.marshal().unwrap();
        assert_eq!(raw.len(), 8);
        assert_eq!(ReceiverReport::unmarshal(&mut raw.clone()).unwrap(), rr);
    }
}
