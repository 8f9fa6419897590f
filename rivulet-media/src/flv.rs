//! FLV tag field enums and the tag-header codec shared with the edge pull.
//!
//! Field layouts follow the Adobe FLV specification (E.4.2 audio tags,
//! E.4.3 video tags) plus the enhanced-RTMP extension that repurposes the
//! high bit of the frame-type byte.

use shared::error::{Error, Result};

/// FLV file header magic plus version and flags, 9 bytes on the wire.
pub const FLV_HEADER_SIZE: usize = 9;
/// Previous-tag-size trailer, big-endian u32 after every tag.
pub const FLV_PREV_TAG_SIZE: usize = 4;
/// Tag header: type(1) + data size(3) + timestamp(3+1) + stream id(3).
pub const FLV_TAG_HEADER_SIZE: usize = 11;

/// fourCC for HEVC in enhanced-RTMP ext headers.
pub const FOURCC_HVC1: u32 = 0x6876_6331; // 'hvc1'

/// SoundFormat nibble of the FLV audio tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AudioCodecId {
    Mp3,
    Aac,
    Opus,
}

impl AudioCodecId {
    pub fn from_sound_format(v: u8) -> Result<AudioCodecId> {
        match v {
            2 => Ok(AudioCodecId::Mp3),
            10 => Ok(AudioCodecId::Aac),
            13 => Ok(AudioCodecId::Opus),
            _ => Err(Error::UnsupportedAudioCodec(v)),
        }
    }
}

/// CodecID nibble of the FLV video tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VideoCodecId {
    Avc,
    Hevc,
    Av1,
}

impl VideoCodecId {
    pub fn from_codec_id(v: u8) -> Result<VideoCodecId> {
        match v {
            7 => Ok(VideoCodecId::Avc),
            12 => Ok(VideoCodecId::Hevc),
            _ => Err(Error::UnsupportedVideoCodec(v)),
        }
    }
}

/// Frame-type nibble of the FLV video tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoFrameType {
    #[default]
    Reserved,
    Key,
    Inter,
    Disposable,
    GeneratedKey,
    /// Server-side command frame, dropped with a warning.
    Info,
}

impl VideoFrameType {
    pub fn from_bits(v: u8) -> VideoFrameType {
        match v {
            1 => VideoFrameType::Key,
            2 => VideoFrameType::Inter,
            3 => VideoFrameType::Disposable,
            4 => VideoFrameType::GeneratedKey,
            5 => VideoFrameType::Info,
            _ => VideoFrameType::Reserved,
        }
    }
}

/// AVCPacketType byte (classic) or the packet-type nibble (enhanced).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoPacketType {
    SequenceHeader,
    #[default]
    Nalu,
    EndOfSequence,
    /// Enhanced-RTMP coded frames without composition time.
    CodedFramesX,
    Unknown(u8),
}

impl VideoPacketType {
    pub fn from_byte(v: u8) -> VideoPacketType {
        match v {
            0 => VideoPacketType::SequenceHeader,
            1 => VideoPacketType::Nalu,
            2 => VideoPacketType::EndOfSequence,
            3 => VideoPacketType::CodedFramesX,
            other => VideoPacketType::Unknown(other),
        }
    }
}

/// AACPacketType byte, also reused as the MP3 fresh/raw trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioPacketType {
    SequenceHeader,
    #[default]
    Raw,
}

impl AudioPacketType {
    pub fn from_byte(v: u8) -> Result<AudioPacketType> {
        match v {
            0 => Ok(AudioPacketType::SequenceHeader),
            1 => Ok(AudioPacketType::Raw),
            other => Err(Error::FlvDecode(format!("aac packet type {other}"))),
        }
    }
}

/// Decoded FLV tag header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub tag_type: u8,
    pub data_size: u32,
    /// 24-bit low part plus the extension byte, already combined.
    pub timestamp: u32,
    pub stream_id: u32,
}

impl TagHeader {
    /// Decode the 11-byte tag header.
    pub fn decode(buf: &[u8]) -> Result<TagHeader> {
        if buf.len() < FLV_TAG_HEADER_SIZE {
            return Err(Error::FlvDecode(format!(
                "tag header needs 11 bytes, got {}",
                buf.len()
            )));
        }
        let data_size = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]);
        let ts_lo = u32::from_be_bytes([0, buf[4], buf[5], buf[6]]);
        let ts_ext = buf[7] as u32;
        let stream_id = u32::from_be_bytes([0, buf[8], buf[9], buf[10]]);
        Ok(TagHeader {
            tag_type: buf[0],
            data_size,
            timestamp: (ts_ext << 24) | ts_lo,
            stream_id,
        })
    }

    pub fn encode(&self) -> [u8; FLV_TAG_HEADER_SIZE] {
        let ds = self.data_size.to_be_bytes();
        let ts = self.timestamp.to_be_bytes();
        let sid = self.stream_id.to_be_bytes();
        [
            self.tag_type,
            ds[1],
            ds[2],
            ds[3],
            ts[1],
            ts[2],
            ts[3],
            ts[0],
            sid[1],
            sid[2],
            sid[3],
        ]
    }
}

/// Validate the 9-byte FLV file header and report whether audio/video are
/// flagged present.
pub fn decode_file_header(buf: &[u8]) -> Result<(bool, bool)> {
    if buf.len() < FLV_HEADER_SIZE {
        return Err(Error::FlvDecode(format!(
            "file header needs 9 bytes, got {}",
            buf.len()
        )));
    }
    if &buf[0..3] != b"FLV" {
        return Err(Error::FlvDecode("signature is not FLV".into()));
    }
    if buf[3] != 1 {
        return Err(Error::FlvDecode(format!("flv version {}", buf[3])));
    }
    let has_audio = buf[4] & 0x04 != 0;
    let has_video = buf[4] & 0x01 != 0;
    Ok((has_audio, has_video))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sound_format_nibbles() {
        assert_eq!(AudioCodecId::from_sound_format(2).unwrap(), AudioCodecId::Mp3);
        assert_eq!(AudioCodecId::from_sound_format(10).unwrap(), AudioCodecId::Aac);
        assert_eq!(AudioCodecId::from_sound_format(13).unwrap(), AudioCodecId::Opus);
        assert_eq!(
            AudioCodecId::from_sound_format(11).unwrap_err(),
            Error::UnsupportedAudioCodec(11)
        );
    }

    #[test]
    fn test_tag_header_round_trip() {
        let hdr = TagHeader {
            tag_type: 9,
            data_size: 0x01_02_03,
            timestamp: 0x7F_00_00_01,
            stream_id: 0,
        };
        let bytes = hdr.encode();
        assert_eq!(TagHeader::decode(&bytes).unwrap(), hdr);
    }

    #[test]
    fn test_timestamp_extension_combine() {
        // timestamp 0x12345678 has extension byte 0x12
        let mut bytes = [0u8; FLV_TAG_HEADER_SIZE];
        bytes[0] = 8;
        bytes[4] = 0x34;
        bytes[5] = 0x56;
        bytes[6] = 0x78;
        bytes[7] = 0x12;
        let hdr = TagHeader::decode(&bytes).unwrap();
        assert_eq!(hdr.timestamp, 0x12345678);
    }

    #[test]
    fn test_file_header() {
        let buf = [b'F', b'L', b'V', 1, 0x05, 0, 0, 0, 9];
        assert_eq!(decode_file_header(&buf).unwrap(), (true, true));
        let bad = [b'F', b'L', b'X', 1, 0x05, 0, 0, 0, 9];
        assert!(decode_file_header(&bad).is_err());
    }
}
