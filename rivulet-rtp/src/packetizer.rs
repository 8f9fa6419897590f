//! Build RTP packet sequences from parsed access units.

use crate::header::Header;
use crate::packet::Packet;
use crate::payload::Payload;
use crate::sequence::Sequencer;
use crate::{FU_PAYLOAD_SIZE, MAX_RTP_PAYLOAD, OPUS_CLOCK_RATE, VIDEO_CLOCK_RATE};
use bytes::Bytes;
use media::demux::{AudioCodecConfig, ParsedAudio, ParsedVideo, VideoCodecConfig};
use media::flv::{AudioCodecId, VideoCodecId, VideoPacketType};
use shared::error::{Error, Result};

/// Separator overhead between aggregated raw NALUs.
const SEPARATOR_LEN: usize = 3;
/// H.264 NALU header length stripped before fragmentation.
const AVC_NALU_HEADER_SIZE: usize = 1;
/// H.265 NALU header length stripped before fragmentation.
const HEVC_NALU_HEADER_SIZE: usize = 2;

/// Packetizes one video track.
pub struct VideoPacketizer {
    pub ssrc: u32,
    pub payload_type: u8,
    pub sequencer: Sequencer,
}

impl VideoPacketizer {
    pub fn new(ssrc: u32, payload_type: u8, start_sequence: u16) -> Self {
        VideoPacketizer {
            ssrc,
            payload_type,
            sequencer: Sequencer::new(start_sequence),
        }
    }

    fn header(&mut self, dts: i64, marker: bool) -> Header {
        Header {
            marker,
            payload_type: self.payload_type,
            sequence_number: self.sequencer.next_sequence_number(),
            timestamp: (dts * VIDEO_CLOCK_RATE as i64 / 1000) as u32,
            ssrc: self.ssrc,
            ..Default::default()
        }
    }

    /// Emit the ordered RTP packets for one parsed video tag.
    ///
    /// Sequence headers become a single aggregation packet; access units are
    /// aggregated when small, fragmented per sample otherwise. The marker
    /// bit is set on the last packet of an access unit, never on sequence
    /// headers.
    pub fn packetize(
        &mut self,
        vcodec: &VideoCodecConfig,
        video: &ParsedVideo,
    ) -> Result<Vec<Packet>> {
        if video.packet_type == VideoPacketType::SequenceHeader {
            return Ok(vec![self.package_parameter_sets(vcodec, video.dts)?]);
        }
        if video.packet_type == VideoPacketType::EndOfSequence {
            return Ok(Vec::new());
        }

        // empty samples are skipped silently
        let samples: Vec<&Bytes> = video.samples.iter().filter(|s| !s.is_empty()).collect();
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let total: usize = samples.iter().map(|s| s.len()).sum::<usize>()
            + SEPARATOR_LEN * (samples.len() - 1);

        let mut pkts = Vec::new();
        if total <= MAX_RTP_PAYLOAD {
            let payload = Payload::RawNalus(samples.iter().map(|s| (*s).clone()).collect());
            pkts.push(Packet::new(self.header(video.dts, false), payload));
        } else {
            for sample in samples {
                if sample.len() <= MAX_RTP_PAYLOAD {
                    pkts.push(Packet::new(
                        self.header(video.dts, false),
                        Payload::SingleNalu(sample.clone()),
                    ));
                } else {
                    self.package_fu(vcodec, sample, video.dts, FU_PAYLOAD_SIZE, &mut pkts);
                }
            }
        }

        if let Some(last) = pkts.last_mut() {
            last.header.marker = true;
        }
        Ok(pkts)
    }

    /// One aggregation packet carrying the parameter sets from the codec
    /// config, VPS then SPS then PPS.
    pub fn package_parameter_sets(
        &mut self,
        vcodec: &VideoCodecConfig,
        dts: i64,
    ) -> Result<Packet> {
        let payload = if vcodec.id == Some(VideoCodecId::Hevc) {
            let vps = vcodec
                .hevc
                .vps()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::HevcDecode("no vps for aggregation".into()))?;
            let sps = vcodec
                .hevc
                .sps()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::HevcDecode("no sps for aggregation".into()))?;
            let pps = vcodec
                .hevc
                .pps()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::HevcDecode("no pps for aggregation".into()))?;
            Payload::StapHevc {
                nalus: vec![vps.clone(), sps.clone(), pps.clone()],
            }
        } else {
            if vcodec.sps.is_empty() || vcodec.pps.is_empty() {
                return Err(Error::AvcDecode("no sps/pps for stap-a".into()));
            }
            let nri = vcodec.sps[0] & 0x60;
            Payload::StapA {
                nri,
                nalus: vec![vcodec.sps.clone(), vcodec.pps.clone()],
            }
        };
        Ok(Packet::new(self.header(dts, false), payload))
    }

    fn package_fu(
        &mut self,
        vcodec: &VideoCodecConfig,
        sample: &Bytes,
        dts: i64,
        fu_payload_size: usize,
        pkts: &mut Vec<Packet>,
    ) {
        let is_hevc = vcodec.id == Some(VideoCodecId::Hevc);
        let header_size = if is_hevc {
            HEVC_NALU_HEADER_SIZE
        } else {
            AVC_NALU_HEADER_SIZE
        };
        if sample.len() <= header_size {
            return;
        }

        let nalu_type = if is_hevc {
            (sample[0] >> 1) & 0x3F
        } else {
            sample[0] & 0x1F
        };
        let nri = sample[0];
        let body = sample.slice(header_size..);

        let n_chunks = body.len().div_ceil(fu_payload_size);
        for i in 0..n_chunks {
            let chunk =
                body.slice(i * fu_payload_size..((i + 1) * fu_payload_size).min(body.len()));
            let start = i == 0;
            let end = i + 1 == n_chunks;
            let payload = if is_hevc {
                Payload::FuHevc {
                    nalu_type,
                    start,
                    end,
                    chunks: vec![chunk],
                }
            } else {
                Payload::FuA {
                    nri,
                    nalu_type,
                    start,
                    end,
                    chunks: vec![chunk],
                }
            };
            pkts.push(Packet::new(self.header(dts, false), payload));
        }
    }
}

/// Packetizes one audio track, one frame per packet.
pub struct AudioPacketizer {
    pub ssrc: u32,
    pub payload_type: u8,
    pub sequencer: Sequencer,
}

impl AudioPacketizer {
    pub fn new(ssrc: u32, payload_type: u8, start_sequence: u16) -> Self {
        AudioPacketizer {
            ssrc,
            payload_type,
            sequencer: Sequencer::new(start_sequence),
        }
    }

    fn clock_rate(acodec: &AudioCodecConfig) -> u32 {
        match acodec.id {
            Some(AudioCodecId::Opus) => OPUS_CLOCK_RATE,
            Some(AudioCodecId::Aac) => acodec.sample_rate(),
            // RFC 2250 MP3 clock
            _ => VIDEO_CLOCK_RATE,
        }
    }

    /// Emit one RTP packet per audio frame; the marker bit is always set.
    pub fn packetize(&mut self, acodec: &AudioCodecConfig, audio: &ParsedAudio) -> Vec<Packet> {
        let clock = Self::clock_rate(acodec) as i64;
        audio
            .samples
            .iter()
            .filter(|s| !s.is_empty())
            .map(|sample| {
                Packet::new(
                    Header {
                        marker: true,
                        payload_type: self.payload_type,
                        sequence_number: self.sequencer.next_sequence_number(),
                        timestamp: (audio.dts * clock / 1000) as u32,
                        ssrc: self.ssrc,
                        ..Default::default()
                    },
                    Payload::Raw(sample.clone()),
                )
            })
            .collect()
    }
}
