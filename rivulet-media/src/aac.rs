//! AAC AudioSpecificConfig parsing, ISO/IEC 14496-3 §1.6.2.1.

use crate::bits::BitReader;
use shared::error::{Error, Result};

/// ADTS sampling-frequency-index table.
pub const ADTS_SAMPLE_RATES: [u32; 16] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0,
    0, 0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AacObjectType {
    Main,
    Lc,
    Ssr,
    /// HE-AAC v1 (LC + SBR).
    HeV1,
    /// HE-AAC v2 (LC + SBR + PS).
    HeV2,
    Other(u8),
}

impl AacObjectType {
    pub fn from_u8(v: u8) -> Result<AacObjectType> {
        match v {
            0 => Err(Error::AacDecode("audioObjectType is forbidden".into())),
            1 => Ok(AacObjectType::Main),
            2 => Ok(AacObjectType::Lc),
            3 => Ok(AacObjectType::Ssr),
            5 => Ok(AacObjectType::HeV1),
            29 => Ok(AacObjectType::HeV2),
            other => Ok(AacObjectType::Other(other)),
        }
    }
}

/// The first two bytes of an AudioSpecificConfig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: AacObjectType,
    pub sample_rate_index: u8,
    pub channels: u8,
}

impl AudioSpecificConfig {
    /// Decode objectType(5) + samplingFrequencyIndex(4) + channelConfiguration(4).
    pub fn decode(data: &[u8]) -> Result<AudioSpecificConfig> {
        if data.len() < 2 {
            return Err(Error::AacDecode(format!(
                "AudioSpecificConfig needs 2 bytes, got {}",
                data.len()
            )));
        }
        let mut bits = BitReader::new(data);
        let object_type = AacObjectType::from_u8(bits.read_bits(5)? as u8)?;
        let sample_rate_index = bits.read_bits(4)? as u8;
        let channels = bits.read_bits(4)? as u8;
        Ok(AudioSpecificConfig {
            object_type,
            sample_rate_index,
            channels,
        })
    }

    /// Sample rate from the ADTS table, when the index is valid.
    pub fn sample_rate(&self) -> Option<u32> {
        let rate = ADTS_SAMPLE_RATES[(self.sample_rate_index & 0x0F) as usize];
        if rate == 0 {
            None
        } else {
            Some(rate)
        }
    }
}
