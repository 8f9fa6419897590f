//! FLV audio/video tag demux into parsed access units with codec-config
//! side effects.

use crate::aac::{AudioSpecificConfig, ADTS_SAMPLE_RATES};
use crate::avc::{self, AvcConfigRecord, AvcNaluType};
use crate::flv::{
    AudioCodecId, AudioPacketType, VideoCodecId, VideoFrameType, VideoPacketType, FOURCC_HVC1,
};
use crate::hevc::{self, HevcConfigRecord, HevcNaluType};
use crate::nalu;
use bytes::{Buf, Bytes};
use log::{info, warn};
use shared::error::{Error, Result};

/// Upper bound on NALU samples per access unit.
pub const MAX_SAMPLES: usize = 256;

/// Remembered in-band NALU framing of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    Unknown,
    AnnexB,
    Ibmf,
}

/// Per-stream video codec state, mutated by sequence headers.
#[derive(Debug, Clone, Default)]
pub struct VideoCodecConfig {
    pub id: Option<VideoCodecId>,
    pub profile: u8,
    pub level: u8,
    pub width: u32,
    pub height: u32,
    /// Bytes per NALU length prefix: 1, 2 or 4.
    pub nalu_length_size: u8,
    pub payload_format: PayloadFormat,
    /// Raw AVC/HEVC decoder configuration record.
    pub extra_data: Bytes,
    /// AVC parameter sets kept from the record.
    pub sps: Bytes,
    pub pps: Bytes,
    /// HEVC record with parameter-set tables.
    pub hevc: HevcConfigRecord,
}

impl VideoCodecConfig {
    /// A sequence header has been demuxed.
    pub fn is_ready(&self) -> bool {
        self.id.is_some() && !self.extra_data.is_empty()
    }
}

/// Per-stream audio codec state.
#[derive(Debug, Clone, Default)]
pub struct AudioCodecConfig {
    pub id: Option<AudioCodecId>,
    /// FLV SoundRate bits: 0=5.5k, 1=11k, 2=22k, 3=44k.
    pub sound_rate: u8,
    /// FLV SoundSize bit: 0=8-bit, 1=16-bit.
    pub sound_size: u8,
    /// FLV SoundType bit: 0=mono, 1=stereo.
    pub sound_channels: u8,
    pub aac_object: Option<crate::aac::AacObjectType>,
    pub aac_sample_rate_index: u8,
    pub aac_channels: u8,
    /// Raw AudioSpecificConfig.
    pub extra_data: Bytes,
}

impl AudioCodecConfig {
    pub fn is_aac_ready(&self) -> bool {
        self.id == Some(AudioCodecId::Aac) && !self.extra_data.is_empty()
    }

    /// Hertz, preferring the AAC sequence-header index over the FLV bits.
    pub fn sample_rate(&self) -> u32 {
        if self.id == Some(AudioCodecId::Aac) {
            let rate = ADTS_SAMPLE_RATES[(self.aac_sample_rate_index & 0x0F) as usize];
            if rate > 0 {
                return rate;
            }
        }
        match self.sound_rate {
            0 => 5512,
            1 => 11025,
            2 => 22050,
            _ => 44100,
        }
    }
}

/// Result of demuxing one audio tag.
#[derive(Debug, Clone, Default)]
pub struct ParsedAudio {
    pub dts: i64,
    pub cts: i64,
    pub packet_type: AudioPacketType,
    /// Views into the source payload.
    pub samples: Vec<Bytes>,
}

/// Result of demuxing one video tag.
#[derive(Debug, Clone, Default)]
pub struct ParsedVideo {
    pub dts: i64,
    pub cts: i64,
    pub frame_type: VideoFrameType,
    pub packet_type: VideoPacketType,
    /// NALU views into the source payload.
    pub samples: Vec<Bytes>,
    pub has_idr: bool,
    pub has_sps_pps: bool,
    pub has_aud: bool,
    pub first_nalu_type: u8,
}

impl ParsedVideo {
    pub fn pts(&self) -> i64 {
        self.dts + self.cts
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.has_idr = false;
        self.has_sps_pps = false;
        self.has_aud = false;
        self.first_nalu_type = 0;
    }

    fn add_sample(&mut self, codec: Option<VideoCodecId>, sample: Bytes) -> Result<()> {
        if sample.is_empty() {
            return Ok(());
        }
        if self.samples.len() >= MAX_SAMPLES {
            return Err(Error::AvcDecode("frame samples overflow".into()));
        }

        let header = sample[0];
        if codec == Some(VideoCodecId::Hevc) {
            self.has_idr |= HevcNaluType::from_header(header).is_keyframe();
        } else {
            match AvcNaluType::from_header(header) {
                AvcNaluType::Idr => self.has_idr = true,
                AvcNaluType::Sps | AvcNaluType::Pps => self.has_sps_pps = true,
                AvcNaluType::Aud => self.has_aud = true,
                _ => {}
            }
        }
        if self.first_nalu_type == 0 {
            self.first_nalu_type = if codec == Some(VideoCodecId::Hevc) {
                HevcNaluType::from_header(header).as_u8()
            } else {
                AvcNaluType::from_header(header).as_u8()
            };
        }

        self.samples.push(sample);
        Ok(())
    }

    /// Whether any coded slice of this access unit is a B slice.
    pub fn is_bframe(&self, vcodec: &VideoCodecConfig) -> Result<bool> {
        for sample in &self.samples {
            let is_b = if vcodec.id == Some(VideoCodecId::Hevc) {
                hevc::parse_bframe(sample, &vcodec.hevc)?
            } else {
                avc::parse_bframe(sample)?
            };
            if is_b {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Stateful FLV tag demuxer, one per published stream.
///
/// `on_audio`/`on_video` decode the tag body, update the codec configs on
/// sequence headers and leave the parsed access unit in `audio`/`video`.
pub struct FormatDemuxer {
    pub acodec: Option<AudioCodecConfig>,
    pub vcodec: Option<VideoCodecConfig>,
    pub audio: Option<ParsedAudio>,
    pub video: Option<ParsedVideo>,
    /// Walk the full SPS for geometry. Off keeps sequence headers opaque.
    pub avc_parse_sps: bool,
    /// Probe order when the NALU framing is still unknown.
    pub try_annexb_first: bool,
}

impl Default for FormatDemuxer {
    fn default() -> Self {
        FormatDemuxer {
            acodec: None,
            vcodec: None,
            audio: None,
            video: None,
            avc_parse_sps: true,
            try_annexb_first: true,
        }
    }
}

impl FormatDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aac_sequence_header(&self) -> bool {
        self.acodec.as_ref().map(|c| c.id) == Some(Some(AudioCodecId::Aac))
            && self
                .audio
                .as_ref()
                .map(|a| a.packet_type == AudioPacketType::SequenceHeader)
                .unwrap_or(false)
    }

    pub fn is_mp3_sequence_header(&self) -> bool {
        self.acodec.as_ref().map(|c| c.id) == Some(Some(AudioCodecId::Mp3))
            && self
                .audio
                .as_ref()
                .map(|a| a.packet_type == AudioPacketType::SequenceHeader)
                .unwrap_or(false)
    }

    pub fn is_avc_sequence_header(&self) -> bool {
        let codec_ok = matches!(
            self.vcodec.as_ref().and_then(|c| c.id),
            Some(VideoCodecId::Avc) | Some(VideoCodecId::Hevc)
        );
        codec_ok
            && self
                .video
                .as_ref()
                .map(|v| v.packet_type == VideoPacketType::SequenceHeader)
                .unwrap_or(false)
    }

    /// Demux one FLV audio tag body.
    pub fn on_audio(&mut self, timestamp: i64, data: Bytes) -> Result<()> {
        if data.is_empty() {
            info!("no audio present, ignore it.");
            return Ok(());
        }

        let codec = AudioCodecId::from_sound_format((data[0] >> 4) & 0x0F)?;

        let fresh = self.acodec.is_none();
        let acodec = self.acodec.get_or_insert_with(AudioCodecConfig::default);
        let audio = self.audio.get_or_insert_with(ParsedAudio::default);
        audio.samples.clear();
        audio.dts = timestamp;
        audio.cts = 0;

        let sound_format = data[0];
        acodec.sound_channels = sound_format & 0x01;
        acodec.sound_size = (sound_format >> 1) & 0x01;
        acodec.sound_rate = (sound_format >> 2) & 0x03;
        acodec.id = Some(codec);

        match codec {
            AudioCodecId::Mp3 => Self::audio_mp3_demux(acodec, audio, data, fresh),
            AudioCodecId::Aac => Self::audio_aac_demux(acodec, audio, data),
            AudioCodecId::Opus => Err(Error::NotImplemented("opus demuxer")),
        }
    }

    fn audio_mp3_demux(
        _acodec: &mut AudioCodecConfig,
        audio: &mut ParsedAudio,
        data: Bytes,
        fresh: bool,
    ) -> Result<()> {
        audio.packet_type = if fresh {
            AudioPacketType::SequenceHeader
        } else {
            AudioPacketType::Raw
        };
        // the payload starts at the 12-bit syncword right after the sound
        // format byte
        if data.len() > 1 {
            audio.samples.push(data.slice(1..));
        }
        Ok(())
    }

    fn audio_aac_demux(
        acodec: &mut AudioCodecConfig,
        audio: &mut ParsedAudio,
        data: Bytes,
    ) -> Result<()> {
        if data.len() < 2 {
            return Err(Error::AacDecode("aac decode aac_packet_type".into()));
        }
        let packet_type = AudioPacketType::from_byte(data[1])
            .map_err(|_| Error::AacDecode(format!("aac packet type {}", data[1])))?;
        audio.packet_type = packet_type;
        let raw = data.slice(2..);

        match packet_type {
            AudioPacketType::SequenceHeader => {
                if !raw.is_empty() {
                    acodec.extra_data = raw.clone();
                    let asc = AudioSpecificConfig::decode(&raw)?;
                    acodec.aac_object = Some(asc.object_type);
                    acodec.aac_sample_rate_index = asc.sample_rate_index;
                    acodec.aac_channels = asc.channels;
                }
            }
            AudioPacketType::Raw => {
                if !acodec.is_aac_ready() {
                    warn!("aac ignore raw frame for no sequence header");
                    return Ok(());
                }
                if !raw.is_empty() {
                    audio.samples.push(raw);
                }
            }
        }

        // reset the FLV rate bits from the sequence header
        match ADTS_SAMPLE_RATES[(acodec.aac_sample_rate_index & 0x0F) as usize] {
            11025 => acodec.sound_rate = 1,
            22050 => acodec.sound_rate = 2,
            44100 => acodec.sound_rate = 3,
            _ => {}
        }

        Ok(())
    }

    /// Demux a cached AAC sequence header, e.g. when replaying configs to a
    /// late subscriber.
    pub fn on_aac_sequence_header(&mut self, data: Bytes) -> Result<()> {
        let acodec = self.acodec.get_or_insert_with(AudioCodecConfig::default);
        let audio = self.audio.get_or_insert_with(ParsedAudio::default);
        audio.packet_type = AudioPacketType::SequenceHeader;
        acodec.id = Some(AudioCodecId::Aac);
        acodec.extra_data = data.clone();
        let asc = AudioSpecificConfig::decode(&data)?;
        acodec.aac_object = Some(asc.object_type);
        acodec.aac_sample_rate_index = asc.sample_rate_index;
        acodec.aac_channels = asc.channels;
        Ok(())
    }

    /// Demux one FLV video tag body.
    pub fn on_video(&mut self, timestamp: i64, data: Bytes) -> Result<()> {
        if data.is_empty() {
            info!("no video present, ignore it.");
            return Ok(());
        }
        self.video_demux(timestamp, data)
    }

    fn video_demux(&mut self, timestamp: i64, data: Bytes) -> Result<()> {
        let mut buf = data.clone();
        let first = buf.get_u8();
        let is_ext_header = first & 0x80 != 0;

        let mut codec_id: Option<VideoCodecId> = None;
        let mut packet_type = VideoPacketType::Nalu;
        let frame_type;
        if !is_ext_header {
            codec_id = VideoCodecId::from_codec_id(first & 0x0F).ok();
            frame_type = VideoFrameType::from_bits((first >> 4) & 0x0F);
        } else {
            packet_type = VideoPacketType::from_byte(first & 0x0F);
            frame_type = VideoFrameType::from_bits((first >> 4) & 0x07);
            if buf.remaining() < 4 {
                return Err(Error::FlvDecode(format!(
                    "fourCC requires 4 bytes, only {}",
                    buf.remaining()
                )));
            }
            let four_cc = buf.get_u32();
            if four_cc == FOURCC_HVC1 {
                codec_id = Some(VideoCodecId::Hevc);
            }
        }

        let vcodec = self.vcodec.get_or_insert_with(VideoCodecConfig::default);
        let video = self.video.get_or_insert_with(ParsedVideo::default);
        video.reset();
        video.frame_type = frame_type;

        // ignore info frame without error
        if frame_type == VideoFrameType::Info {
            warn!("video ignore the info frame");
            return Ok(());
        }

        let codec_id = match codec_id {
            Some(id @ (VideoCodecId::Avc | VideoCodecId::Hevc)) => id,
            _ => {
                return Err(Error::FlvDecode(format!(
                    "only support video H.264/H.265, actual={}",
                    first & 0x0F
                )))
            }
        };
        vcodec.id = Some(codec_id);

        let mut composition_time = 0i64;
        if !is_ext_header {
            if buf.remaining() < 4 {
                return Err(Error::FlvDecode(format!(
                    "requires 4 bytes, only {}",
                    buf.remaining()
                )));
            }
            packet_type = VideoPacketType::from_byte(buf.get_u8());
            composition_time = get_i24(&mut buf) as i64;
        } else if packet_type == VideoPacketType::Nalu {
            // enhanced CodedFrames carries composition time, CodedFramesX
            // omits it and it is treated as zero
            if buf.remaining() < 3 {
                return Err(Error::FlvDecode(format!(
                    "requires 3 bytes, only {}",
                    buf.remaining()
                )));
            }
            composition_time = get_i24(&mut buf) as i64;
        }

        video.dts = timestamp;
        video.cts = composition_time;
        video.packet_type = packet_type;

        let rest = data.slice(data.len() - buf.remaining()..);

        if codec_id == VideoCodecId::Hevc {
            match packet_type {
                VideoPacketType::SequenceHeader => {
                    vcodec.extra_data = rest.clone();
                    let record = HevcConfigRecord::decode(rest)?;
                    vcodec.nalu_length_size = record.nalu_length_size();
                    vcodec.profile = record.general_profile_idc;
                    vcodec.level = record.general_level_idc;
                    if let Some(sps) = record.sps_table.values().next() {
                        vcodec.width = sps.width;
                        vcodec.height = sps.height;
                    }
                    vcodec.hevc = record;
                    Ok(())
                }
                VideoPacketType::Nalu | VideoPacketType::CodedFramesX => {
                    Self::video_nalu_demux(vcodec, video, rest, self.try_annexb_first)
                }
                _ => Ok(()),
            }
        } else {
            match packet_type {
                VideoPacketType::SequenceHeader => {
                    vcodec.extra_data = rest.clone();
                    let record = AvcConfigRecord::decode(rest)?;
                    vcodec.profile = record.profile;
                    vcodec.level = record.level;
                    vcodec.nalu_length_size = record.nalu_length_size;
                    vcodec.sps = record.sps;
                    vcodec.pps = record.pps;
                    if self.avc_parse_sps && !vcodec.sps.is_empty() {
                        let info = avc::parse_sps(&vcodec.sps)?;
                        vcodec.width = info.width;
                        vcodec.height = info.height;
                    }
                    Ok(())
                }
                VideoPacketType::Nalu => {
                    Self::video_nalu_demux(vcodec, video, rest, self.try_annexb_first)
                }
                _ => Ok(()),
            }
        }
    }

    fn video_nalu_demux(
        vcodec: &mut VideoCodecConfig,
        video: &mut ParsedVideo,
        rest: Bytes,
        try_annexb_first: bool,
    ) -> Result<()> {
        // ensure the sequence header demuxed
        if !vcodec.is_ready() {
            warn!("video ignore NALU for no sequence header");
            return Ok(());
        }

        if vcodec.id == Some(VideoCodecId::Hevc) {
            let nalus = nalu::demux_ibmf(&rest, vcodec.nalu_length_size as usize)?;
            for n in nalus {
                video.add_sample(vcodec.id, n)?;
            }
            return Ok(());
        }

        let format = vcodec.payload_format;
        let nalus = match format {
            PayloadFormat::AnnexB => nalu::demux_annexb(&rest)?,
            PayloadFormat::Ibmf => nalu::demux_ibmf(&rest, vcodec.nalu_length_size as usize)?,
            PayloadFormat::Unknown => {
                let (first, second) = if try_annexb_first {
                    (PayloadFormat::AnnexB, PayloadFormat::Ibmf)
                } else {
                    (PayloadFormat::Ibmf, PayloadFormat::AnnexB)
                };
                match Self::demux_with(&rest, first, vcodec.nalu_length_size) {
                    Ok(nalus) => {
                        vcodec.payload_format = first;
                        nalus
                    }
                    Err(_) => {
                        let nalus = Self::demux_with(&rest, second, vcodec.nalu_length_size)?;
                        vcodec.payload_format = second;
                        nalus
                    }
                }
            }
        };

        for n in nalus {
            video.add_sample(vcodec.id, n)?;
        }
        Ok(())
    }

    fn demux_with(rest: &Bytes, format: PayloadFormat, length_size: u8) -> Result<Vec<Bytes>> {
        match format {
            PayloadFormat::AnnexB => nalu::demux_annexb(rest),
            PayloadFormat::Ibmf => nalu::demux_ibmf(rest, length_size as usize),
            PayloadFormat::Unknown => unreachable!(),
        }
    }
}

fn get_i24(buf: &mut Bytes) -> i32 {
    let v = ((buf.get_u8() as i32) << 16) | ((buf.get_u8() as i32) << 8) | buf.get_u8() as i32;
    // sign-extend the 24-bit composition time
    (v << 8) >> 8
}

#[cfg(test)]
mod demux_test;
