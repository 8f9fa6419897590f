//! Extended reports, RFC 3611. Only the DLRR block (BT=5) is interpreted;
//! other blocks are skipped.

use crate::header::{Header, PT_EXTENDED_REPORT};
use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{require, Marshal, MarshalSize, Unmarshal};

pub const BLOCK_TYPE_DLRR: u8 = 5;

/// One DLRR sub-report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DlrrReport {
    pub ssrc: u32,
    /// Compact NTP of the last RR received from `ssrc`.
    pub last_rr: u32,
    /// Delay since that RR in 1/65536 s units.
    pub dlrr: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedReport {
    pub sender_ssrc: u32,
    pub dlrr_reports: Vec<DlrrReport>,
}

impl MarshalSize for ExtendedReport {
    fn marshal_size(&self) -> usize {
        let dlrr = if self.dlrr_reports.is_empty() {
            0
        } else {
            4 + self.dlrr_reports.len() * 12
        };
        4 + 4 + dlrr
    }
}

impl Marshal for ExtendedReport {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        let header = Header {
            padding: false,
            count: 0,
            packet_type: PT_EXTENDED_REPORT,
            length: (self.marshal_size() / 4 - 1) as u16,
        };
        header.marshal_to(buf)?;
        buf.put_u32(self.sender_ssrc);
        if !self.dlrr_reports.is_empty() {
            buf.put_u8(BLOCK_TYPE_DLRR);
            buf.put_u8(0);
            buf.put_u16((self.dlrr_reports.len() * 3) as u16);
            for report in &self.dlrr_reports {
                buf.put_u32(report.ssrc);
                buf.put_u32(report.last_rr);
                buf.put_u32(report.dlrr);
            }
        }
        Ok(self.marshal_size())
    }
}

impl ExtendedReport {
    pub fn unmarshal_body(header: &Header, buf: &mut impl Buf) -> Result<Self> {
        let total = (header.length as usize + 1) * 4 - 4;
        require(buf, total)?;
        let mut remaining = total;

        let sender_ssrc = buf.get_u32();
        remaining -= 4;

        let mut dlrr_reports = Vec::new();
        while remaining >= 4 {
            let block_type = buf.get_u8();
            buf.advance(1);
            let block_words = buf.get_u16() as usize;
            remaining -= 4;
            if remaining < block_words * 4 {
                return Err(Error::RtcpDecode("short xr block".into()));
            }
            if block_type == BLOCK_TYPE_DLRR {
                for _ in 0..block_words / 3 {
                    dlrr_reports.push(DlrrReport {
                        ssrc: buf.get_u32(),
                        last_rr: buf.get_u32(),
                        dlrr: buf.get_u32(),
                    });
                }
                let tail = block_words % 3;
                buf.advance(tail * 4);
            } else {
                buf.advance(block_words * 4);
            }
            remaining -= block_words * 4;
        }

        Ok(ExtendedReport {
            sender_ssrc,
            dlrr_reports,
        })
    }
}

impl Unmarshal for ExtendedReport {
    fn unmarshal(buf: &mut impl Buf) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PT_EXTENDED_REPORT {
            return Err(Error::RtcpDecode("not an extended report".into()));
        }
        Self::unmarshal_body(&header, buf)
    }
}
