//! Compound RTCP decoding: one buffer in, a sequence of typed packets out.

use crate::extended_report::ExtendedReport;
use crate::goodbye::Goodbye;
use crate::header::{
    Header, FMT_NACK, FMT_PLI, FMT_REMB, FMT_TRANSPORT_CC, PT_APP, PT_EXTENDED_REPORT,
    PT_GOODBYE, PT_PAYLOAD_FEEDBACK, PT_RECEIVER_REPORT, PT_SENDER_REPORT,
    PT_SOURCE_DESCRIPTION, PT_TRANSPORT_FEEDBACK,
};
use crate::picture_loss_indication::PictureLossIndication;
use crate::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use crate::receiver_report::ReceiverReport;
use crate::sender_report::SenderReport;
use crate::source_description::SourceDescription;
use crate::transport_layer_cc::TransportLayerCc;
use crate::transport_layer_nack::TransportLayerNack;
use bytes::{Buf, Bytes};
use shared::error::{Error, Result};
use shared::marshal::Unmarshal;

/// One decoded RTCP sub-packet of a compound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Goodbye(Goodbye),
    Nack(TransportLayerNack),
    TransportCc(TransportLayerCc),
    Pli(PictureLossIndication),
    Remb(ReceiverEstimatedMaximumBitrate),
    ExtendedReport(ExtendedReport),
}

/// Decode a compound RTCP datagram into its sub-packets.
///
/// SDES and BYE are carried through without interpretation; an unknown
/// packet type fails the whole datagram.
pub fn unmarshal_compound(mut buf: Bytes) -> Result<Vec<RtcpPacket>> {
    let mut packets = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 4 {
            return Err(Error::RtcpDecode("trailing bytes shorter than a header".into()));
        }
        let total = {
            let mut peek = buf.clone();
            let header = Header::unmarshal(&mut peek)?;
            (header.length as usize + 1) * 4
        };
        if buf.remaining() < total {
            return Err(Error::RtcpDecode(format!(
                "packet needs {total} bytes, got {}",
                buf.remaining()
            )));
        }
        let mut body = buf.split_to(total);
        let header = Header::unmarshal(&mut body)?;

        let pkt = match header.packet_type {
            PT_SENDER_REPORT => {
                RtcpPacket::SenderReport(SenderReport::unmarshal_body(&header, &mut body)?)
            }
            PT_RECEIVER_REPORT => {
                RtcpPacket::ReceiverReport(ReceiverReport::unmarshal_body(&header, &mut body)?)
            }
            PT_SOURCE_DESCRIPTION => RtcpPacket::SourceDescription(SourceDescription {
                raw: body.copy_to_bytes(body.remaining()),
            }),
            PT_GOODBYE => {
                let mut sources = Vec::with_capacity(header.count as usize);
                for _ in 0..header.count {
                    if body.remaining() < 4 {
                        break;
                    }
                    sources.push(body.get_u32());
                }
                RtcpPacket::Goodbye(Goodbye {
                    sources,
                    reason: body.copy_to_bytes(body.remaining()),
                })
            }
            PT_TRANSPORT_FEEDBACK => match header.count {
                FMT_NACK => {
                    RtcpPacket::Nack(TransportLayerNack::unmarshal_body(&header, &mut body)?)
                }
                FMT_TRANSPORT_CC => {
                    RtcpPacket::TransportCc(TransportLayerCc::unmarshal_body(&header, &mut body)?)
                }
                other => {
                    return Err(Error::RtcpDecode(format!(
                        "transport feedback fmt {other} unknown"
                    )))
                }
            },
            PT_PAYLOAD_FEEDBACK => match header.count {
                FMT_PLI => RtcpPacket::Pli(PictureLossIndication::unmarshal_body(
                    &header, &mut body,
                )?),
                FMT_REMB => RtcpPacket::Remb(ReceiverEstimatedMaximumBitrate::unmarshal_body(
                    &header, &mut body,
                )?),
                other => {
                    return Err(Error::RtcpDecode(format!(
                        "payload feedback fmt {other} unknown"
                    )))
                }
            },
            PT_EXTENDED_REPORT => {
                RtcpPacket::ExtendedReport(ExtendedReport::unmarshal_body(&header, &mut body)?)
            }
            PT_APP => {
                return Err(Error::RtcpUnknownType(PT_APP));
            }
            other => return Err(Error::RtcpUnknownType(other)),
        };
        packets.push(pkt);
    }
    Ok(packets)
}
