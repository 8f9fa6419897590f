//! H.264/AVC: decoder configuration record, SPS parsing and slice types.

use crate::bits::BitReader;
use crate::nalu::remove_emulation_bytes;
use bytes::{Buf, Bytes};
use shared::error::{Error, Result};

/// ISO/IEC 14496-10 table 7-1 NAL unit types, low five bits of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
pub enum AvcNaluType {
    NonIdr,
    DataPartitionA,
    DataPartitionB,
    DataPartitionC,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    Other(u8),
}

impl AvcNaluType {
    pub fn from_header(header: u8) -> AvcNaluType {
        match header & 0x1F {
            1 => AvcNaluType::NonIdr,
            2 => AvcNaluType::DataPartitionA,
            3 => AvcNaluType::DataPartitionB,
            4 => AvcNaluType::DataPartitionC,
            5 => AvcNaluType::Idr,
            6 => AvcNaluType::Sei,
            7 => AvcNaluType::Sps,
            8 => AvcNaluType::Pps,
            9 => AvcNaluType::Aud,
            other => AvcNaluType::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AvcNaluType::NonIdr => 1,
            AvcNaluType::DataPartitionA => 2,
            AvcNaluType::DataPartitionB => 3,
            AvcNaluType::DataPartitionC => 4,
            AvcNaluType::Idr => 5,
            AvcNaluType::Sei => 6,
            AvcNaluType::Sps => 7,
            AvcNaluType::Pps => 8,
            AvcNaluType::Aud => 9,
            AvcNaluType::Other(v) => *v,
        }
    }

    fn is_slice(&self) -> bool {
        matches!(
            self,
            AvcNaluType::NonIdr
                | AvcNaluType::DataPartitionA
                | AvcNaluType::DataPartitionB
                | AvcNaluType::DataPartitionC
        )
    }
}

/// Slice types of ISO/IEC 14496-10 table 7-6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcSliceType {
    P,
    B,
    I,
    Sp,
    Si,
    P1,
    B1,
    I1,
    Sp1,
    Si1,
    Other(u32),
}

impl AvcSliceType {
    pub fn from_ue(v: u32) -> AvcSliceType {
        match v {
            0 => AvcSliceType::P,
            1 => AvcSliceType::B,
            2 => AvcSliceType::I,
            3 => AvcSliceType::Sp,
            4 => AvcSliceType::Si,
            5 => AvcSliceType::P1,
            6 => AvcSliceType::B1,
            7 => AvcSliceType::I1,
            8 => AvcSliceType::Sp1,
            9 => AvcSliceType::Si1,
            other => AvcSliceType::Other(other),
        }
    }
}

/// Parsed AVCDecoderConfigurationRecord, ISO/IEC 14496-15 §5.2.4.1.
#[derive(Debug, Clone, Default)]
pub struct AvcConfigRecord {
    pub profile: u8,
    pub level: u8,
    /// Bytes per NALU length prefix: 1, 2 or 4.
    pub nalu_length_size: u8,
    /// Last non-empty SPS from the record.
    pub sps: Bytes,
    /// Last non-empty PPS from the record.
    pub pps: Bytes,
}

impl AvcConfigRecord {
    /// Decode the record body, i.e. the sequence-header payload after the
    /// FLV video tag header.
    pub fn decode(mut body: Bytes) -> Result<AvcConfigRecord> {
        if body.remaining() < 6 {
            return Err(Error::AvcDecode("avc decode sequence header".into()));
        }
        body.advance(1); // configuration_version
        let profile = body.get_u8();
        body.advance(1); // profile_compatibility
        let level = body.get_u8();

        let length_size_minus_one = body.get_u8() & 0x03;
        // The field shall be 0, 1 or 3; a 3-byte length is illegal.
        if length_size_minus_one == 2 {
            return Err(Error::AvcDecode(
                "sps lengthSizeMinusOne should never be 2".into(),
            ));
        }

        let num_sps = body.get_u8() & 0x1F;
        if num_sps < 1 {
            return Err(Error::AvcDecode("no SPS in configuration record".into()));
        }
        let mut sps = Bytes::new();
        for _ in 0..num_sps {
            let unit = read_parameter_set(&mut body, "SPS")?;
            if !unit.is_empty() {
                sps = unit;
            }
        }

        if body.remaining() < 1 {
            return Err(Error::AvcDecode("decode PPS".into()));
        }
        let num_pps = body.get_u8() & 0x1F;
        if num_pps < 1 {
            return Err(Error::AvcDecode("no PPS in configuration record".into()));
        }
        let mut pps = Bytes::new();
        for _ in 0..num_pps {
            let unit = read_parameter_set(&mut body, "PPS")?;
            if !unit.is_empty() {
                pps = unit;
            }
        }

        Ok(AvcConfigRecord {
            profile,
            level,
            nalu_length_size: length_size_minus_one + 1,
            sps,
            pps,
        })
    }
}

fn read_parameter_set(body: &mut Bytes, what: &str) -> Result<Bytes> {
    if body.remaining() < 2 {
        return Err(Error::AvcDecode(format!("decode {what} size")));
    }
    let len = body.get_u16() as usize;
    if body.remaining() < len {
        return Err(Error::AvcDecode(format!("decode {what} data")));
    }
    Ok(body.split_to(len))
}

/// Profiles whose SPS carries the chroma/bit-depth/scaling-matrix block.
const EXTENDED_PROFILES: [u8; 9] = [100, 110, 122, 244, 44, 83, 86, 118, 128];

/// Width, height and identifiers decoded from an SPS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u32,
    pub width: u32,
    pub height: u32,
}

/// Parse an SPS NAL unit per ISO/IEC 14496-10 §7.3.2.1.
///
/// `nalu` includes the NAL header byte; emulation-prevention bytes are
/// removed before the RBSP walk.
pub fn parse_sps(nalu: &[u8]) -> Result<SpsInfo> {
    if nalu.is_empty() {
        return Err(Error::AvcDecode("decode SPS".into()));
    }
    let header = nalu[0];
    if header & 0x80 != 0 {
        return Err(Error::AvcDecode(
            "forbidden_zero_bit shall be equal to 0".into(),
        ));
    }
    if (header >> 5) & 0x03 == 0 {
        return Err(Error::AvcDecode(
            "for sps, nal_ref_idc shall not be equal to 0".into(),
        ));
    }
    if AvcNaluType::from_header(header) != AvcNaluType::Sps {
        return Err(Error::AvcDecode(
            "for sps, nal_unit_type shall be equal to 7".into(),
        ));
    }

    let rbsp = remove_emulation_bytes(&nalu[1..]);
    if rbsp.len() < 3 {
        return Err(Error::AvcDecode("sps shall be at least 3 bytes".into()));
    }

    let profile_idc = rbsp[0];
    if profile_idc == 0 {
        return Err(Error::AvcDecode("sps profile_idc invalid".into()));
    }
    if rbsp[1] & 0x03 != 0 {
        return Err(Error::AvcDecode("sps constraint flags invalid".into()));
    }
    let level_idc = rbsp[2];
    if level_idc == 0 {
        return Err(Error::AvcDecode("sps level_idc invalid".into()));
    }

    let mut bs = BitReader::new(&rbsp[3..]);
    let seq_parameter_set_id = bs.read_ue()?;

    let mut chroma_format_idc = 1;
    if EXTENDED_PROFILES.contains(&profile_idc) {
        chroma_format_idc = bs.read_ue()?;
        if chroma_format_idc == 3 {
            bs.read_bit()?; // separate_colour_plane_flag
        }
        bs.read_ue()?; // bit_depth_luma_minus8
        bs.read_ue()?; // bit_depth_chroma_minus8
        bs.read_bit()?; // qpprime_y_zero_transform_bypass_flag
        if bs.read_bool()? {
            // seq_scaling_matrix_present_flag
            let count = if chroma_format_idc != 3 { 8 } else { 12 };
            for _ in 0..count {
                // scaling lists themselves are not needed for sizing
                bs.read_bit()?;
            }
        }
    }

    bs.read_ue()?; // log2_max_frame_num_minus4
    let pic_order_cnt_type = bs.read_ue()?;
    if pic_order_cnt_type == 0 {
        bs.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        bs.read_bit()?; // delta_pic_order_always_zero_flag
        bs.read_se()?; // offset_for_non_ref_pic
        bs.read_se()?; // offset_for_top_to_bottom_field
        let cycles = bs.read_ue()?;
        for _ in 0..cycles {
            bs.read_se()?;
        }
    }

    bs.read_ue()?; // max_num_ref_frames
    bs.read_bit()?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs_minus1 = bs.read_ue()?;
    let pic_height_in_map_units_minus1 = bs.read_ue()?;
    let frame_mbs_only_flag = bs.read_bit()? as u32;
    if frame_mbs_only_flag == 0 {
        bs.read_bit()?; // mb_adaptive_frame_field_flag
    }
    bs.read_bit()?; // direct_8x8_inference_flag

    let mut crop = [0u32; 4];
    if bs.read_bool()? {
        for v in crop.iter_mut() {
            *v = bs.read_ue()?;
        }
    }
    bs.read_bit()?; // vui_parameters_present_flag

    let width = (pic_width_in_mbs_minus1 + 1) * 16 - 2 * (crop[0] + crop[1]);
    let height =
        (2 - frame_mbs_only_flag) * (pic_height_in_map_units_minus1 + 1) * 16 - 2 * (crop[2] + crop[3]);

    Ok(SpsInfo {
        profile_idc,
        level_idc,
        seq_parameter_set_id,
        width,
        height,
    })
}

/// Whether a slice NALU codes a B slice.
///
/// Reads `first_mb_in_slice` then `slice_type` from the slice header; only
/// types B (1) and B1 (6) qualify. Non-slice NALUs are never B frames.
pub fn parse_bframe(nalu: &[u8]) -> Result<bool> {
    if nalu.is_empty() {
        return Err(Error::NaluEmpty);
    }
    let nalu_type = AvcNaluType::from_header(nalu[0]);
    if !nalu_type.is_slice() {
        return Ok(false);
    }

    let mut bs = BitReader::new(&nalu[1..]);
    bs.read_ue()?; // first_mb_in_slice
    let slice_type = AvcSliceType::from_ue(bs.read_ue()?);
    Ok(matches!(slice_type, AvcSliceType::B | AvcSliceType::B1))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// MSB-first bit writer for composing test SPS payloads.
    pub(crate) struct BitWriter {
        bytes: Vec<u8>,
        bit: usize,
    }

    impl BitWriter {
        pub(crate) fn new() -> Self {
            BitWriter {
                bytes: Vec::new(),
                bit: 0,
            }
        }

        pub(crate) fn put_bit(&mut self, v: u32) {
            if self.bit % 8 == 0 {
                self.bytes.push(0);
            }
            let last = self.bytes.len() - 1;
            self.bytes[last] |= ((v & 1) as u8) << (7 - self.bit % 8);
            self.bit += 1;
        }

        pub(crate) fn put_bits(&mut self, v: u32, n: usize) {
            for i in (0..n).rev() {
                self.put_bit((v >> i) & 1);
            }
        }

        pub(crate) fn put_ue(&mut self, v: u32) {
            let code = v + 1;
            let bits = 32 - code.leading_zeros() as usize;
            self.put_bits(0, bits - 1);
            self.put_bits(code, bits);
        }

        pub(crate) fn finish(mut self) -> Vec<u8> {
            while self.bit % 8 != 0 {
                self.put_bit(0);
            }
            self.bytes
        }
    }

    /// Baseline-profile SPS for a given mb geometry.
    fn build_sps(width_mbs: u32, height_mbs: u32) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_ue(0); // seq_parameter_set_id
        w.put_ue(0); // log2_max_frame_num_minus4
        w.put_ue(2); // pic_order_cnt_type
        w.put_ue(1); // max_num_ref_frames
        w.put_bit(0); // gaps_in_frame_num_value_allowed_flag
        w.put_ue(width_mbs - 1);
        w.put_ue(height_mbs - 1);
        w.put_bit(1); // frame_mbs_only_flag
        w.put_bit(0); // direct_8x8_inference_flag
        w.put_bit(0); // frame_cropping_flag
        w.put_bit(0); // vui_parameters_present_flag

        let mut sps = vec![0x67, 66, 0x00, 30];
        sps.extend(w.finish());
        sps
    }

    #[test]
    fn test_parse_sps_720p() {
        let sps = build_sps(80, 45);
        let info = parse_sps(&sps).unwrap();
        assert_eq!(info.profile_idc, 66);
        assert_eq!(info.level_idc, 30);
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert!(info.width > 0 && info.width <= 65536);
        assert!(info.height > 0 && info.height <= 65536);
    }

    #[test]
    fn test_parse_sps_rejects_bad_header() {
        // forbidden_zero_bit set
        assert!(parse_sps(&[0xE7, 66, 0, 30, 0x80]).is_err());
        // nal_ref_idc zero
        assert!(parse_sps(&[0x07, 66, 0, 30, 0x80]).is_err());
        // wrong nal_unit_type (PPS)
        assert!(parse_sps(&[0x68, 66, 0, 30, 0x80]).is_err());
    }

    #[test]
    fn test_config_record_decode() {
        // profile 100, level 31, 4-byte lengths, one SPS of 7 bytes, one PPS
        let body: &[u8] = &[
            0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x07, 0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9,
            0x40, 0x01, 0x00, 0x04, 0x68, 0xEE, 0x3C, 0x80,
        ];
        let rec = AvcConfigRecord::decode(Bytes::copy_from_slice(body)).unwrap();
        assert_eq!(rec.profile, 100);
        assert_eq!(rec.level, 31);
        assert_eq!(rec.nalu_length_size, 4);
        assert_eq!(rec.sps.as_ref(), &[0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9, 0x40]);
        assert_eq!(rec.pps.as_ref(), &[0x68, 0xEE, 0x3C, 0x80]);
    }

    #[test]
    fn test_config_record_rejects_three_byte_lengths() {
        let body: &[u8] = &[0x01, 0x64, 0x00, 0x1F, 0xFE, 0xE1, 0x00, 0x00, 0x01, 0x00, 0x00];
        let err = AvcConfigRecord::decode(Bytes::copy_from_slice(body)).unwrap_err();
        assert_eq!(err, Error::AvcDecode(String::new()));
    }

    #[test]
    fn test_config_record_accepts_two_byte_lengths() {
        // lengthSizeMinusOne == 1 must be accepted
        let body: &[u8] = &[
            0x01, 0x42, 0x00, 0x1E, 0xFD, 0xE1, 0x00, 0x02, 0x67, 0x42, 0x01, 0x00, 0x01, 0x68,
        ];
        let rec = AvcConfigRecord::decode(Bytes::copy_from_slice(body)).unwrap();
        assert_eq!(rec.nalu_length_size, 2);
    }

    #[test]
    fn test_parse_bframe() {
        // non-IDR slice, first_mb_in_slice=0 (1), slice_type=1/B (010)
        let mut w = BitWriter::new();
        w.put_ue(0);
        w.put_ue(1);
        let mut b_slice = vec![0x41];
        b_slice.extend(w.finish());
        assert!(parse_bframe(&b_slice).unwrap());

        // slice_type=6 (B1) also marks a B frame
        let mut w = BitWriter::new();
        w.put_ue(0);
        w.put_ue(6);
        let mut b1_slice = vec![0x41];
        b1_slice.extend(w.finish());
        assert!(parse_bframe(&b1_slice).unwrap());

        // P slice is not
        let mut w = BitWriter::new();
        w.put_ue(0);
        w.put_ue(0);
        let mut p_slice = vec![0x41];
        p_slice.extend(w.finish());
        assert!(!parse_bframe(&p_slice).unwrap());

        // IDR NALU is not a candidate at all
        assert!(!parse_bframe(&[0x65, 0x88]).unwrap());
    }
}
