//! H.265/HEVC: decoder configuration record, best-effort parameter-set
//! parsing and slice types.
//!
//! Parameter-set parsing walks ITU-T H.265 §7.3.2.1–3 as far as the fields
//! the server needs (geometry, slice-header prerequisites) and stops there;
//! trailing fields are tolerated unparsed and never fail the stream.

use crate::bits::BitReader;
use crate::nalu::remove_emulation_bytes;
use bytes::{Buf, Bytes};
use log::warn;
use shared::error::{Error, Result};
use std::collections::HashMap;

/// ITU-T H.265 table 7-1, six bits at `(header >> 1) & 0x3F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HevcNaluType {
    TrailN,
    TrailR,
    TsaN,
    TsaR,
    StsaN,
    StsaR,
    RadlN,
    RadlR,
    RaslN,
    RaslR,
    BlaWLp,
    BlaWRadl,
    BlaNLp,
    Idr,
    IdrNLp,
    Cra,
    Vps,
    Sps,
    Pps,
    Aud,
    PrefixSei,
    SuffixSei,
    Other(u8),
}

impl HevcNaluType {
    pub fn from_header(header: u8) -> HevcNaluType {
        Self::from_u6((header >> 1) & 0x3F)
    }

    pub fn from_u6(v: u8) -> HevcNaluType {
        match v & 0x3F {
            0 => HevcNaluType::TrailN,
            1 => HevcNaluType::TrailR,
            2 => HevcNaluType::TsaN,
            3 => HevcNaluType::TsaR,
            4 => HevcNaluType::StsaN,
            5 => HevcNaluType::StsaR,
            6 => HevcNaluType::RadlN,
            7 => HevcNaluType::RadlR,
            8 => HevcNaluType::RaslN,
            9 => HevcNaluType::RaslR,
            16 => HevcNaluType::BlaWLp,
            17 => HevcNaluType::BlaWRadl,
            18 => HevcNaluType::BlaNLp,
            19 => HevcNaluType::Idr,
            20 => HevcNaluType::IdrNLp,
            21 => HevcNaluType::Cra,
            32 => HevcNaluType::Vps,
            33 => HevcNaluType::Sps,
            34 => HevcNaluType::Pps,
            35 => HevcNaluType::Aud,
            39 => HevcNaluType::PrefixSei,
            40 => HevcNaluType::SuffixSei,
            other => HevcNaluType::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HevcNaluType::TrailN => 0,
            HevcNaluType::TrailR => 1,
            HevcNaluType::TsaN => 2,
            HevcNaluType::TsaR => 3,
            HevcNaluType::StsaN => 4,
            HevcNaluType::StsaR => 5,
            HevcNaluType::RadlN => 6,
            HevcNaluType::RadlR => 7,
            HevcNaluType::RaslN => 8,
            HevcNaluType::RaslR => 9,
            HevcNaluType::BlaWLp => 16,
            HevcNaluType::BlaWRadl => 17,
            HevcNaluType::BlaNLp => 18,
            HevcNaluType::Idr => 19,
            HevcNaluType::IdrNLp => 20,
            HevcNaluType::Cra => 21,
            HevcNaluType::Vps => 32,
            HevcNaluType::Sps => 33,
            HevcNaluType::Pps => 34,
            HevcNaluType::Aud => 35,
            HevcNaluType::PrefixSei => 39,
            HevcNaluType::SuffixSei => 40,
            HevcNaluType::Other(v) => *v,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            HevcNaluType::BlaWLp
                | HevcNaluType::BlaWRadl
                | HevcNaluType::BlaNLp
                | HevcNaluType::Idr
                | HevcNaluType::IdrNLp
                | HevcNaluType::Cra
        )
    }

    /// Non-IRAP coded slices, the only candidates for B detection.
    fn is_leading_or_trailing_slice(&self) -> bool {
        self.as_u8() <= 9
    }
}

pub const MAX_VPS_COUNT: u32 = 16;
pub const MAX_SPS_COUNT: u32 = 16;
pub const MAX_PPS_COUNT: u32 = 64;

/// profile_tier_level(), §7.3.3. Reserved/constraint slots are consumed for
/// conformance without validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileTierLevel {
    pub general_profile_space: u8,
    pub general_tier_flag: u8,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_progressive_source_flag: bool,
    pub general_interlaced_source_flag: bool,
    pub general_non_packed_constraint_flag: bool,
    pub general_frame_only_constraint_flag: bool,
    pub general_level_idc: u8,
    pub sub_layer_profile_present: Vec<bool>,
    pub sub_layer_level_present: Vec<bool>,
    pub sub_layer_level_idc: Vec<u8>,
}

pub(crate) fn parse_ptl(
    bs: &mut BitReader<'_>,
    profile_present: bool,
    max_sub_layers_minus1: u8,
) -> Result<ProfileTierLevel> {
    let mut ptl = ProfileTierLevel::default();

    if profile_present {
        ptl.general_profile_space = bs.read_bits(2)? as u8;
        ptl.general_tier_flag = bs.read_bit()?;
        ptl.general_profile_idc = bs.read_bits(5)? as u8;
        ptl.general_profile_compatibility_flags = bs.read_bits(32)?;
        ptl.general_progressive_source_flag = bs.read_bool()?;
        ptl.general_interlaced_source_flag = bs.read_bool()?;
        ptl.general_non_packed_constraint_flag = bs.read_bool()?;
        ptl.general_frame_only_constraint_flag = bs.read_bool()?;
        // constraint/reserved region is 43 bits in every profile branch
        bs.skip_bits(43)?;
        // inbld_flag or reserved_zero_bit
        bs.skip_bits(1)?;
    }

    ptl.general_level_idc = bs.read_bits(8)? as u8;

    for _ in 0..max_sub_layers_minus1 {
        ptl.sub_layer_profile_present.push(bs.read_bool()?);
        ptl.sub_layer_level_present.push(bs.read_bool()?);
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            bs.skip_bits(2)?; // reserved_zero_2bits
        }
    }
    for i in 0..max_sub_layers_minus1 as usize {
        if ptl.sub_layer_profile_present[i] {
            // same fixed-width block as the general profile
            bs.skip_bits(88)?;
        }
        if ptl.sub_layer_level_present[i] {
            ptl.sub_layer_level_idc.push(bs.read_bits(8)? as u8);
        }
    }

    Ok(ptl)
}

/// Fields decoded from a VPS before the parse stops.
#[derive(Debug, Clone, Default)]
pub struct HevcVps {
    pub vps_video_parameter_set_id: u32,
    pub vps_max_layers_minus1: u8,
    pub vps_max_sub_layers_minus1: u8,
    pub vps_temporal_id_nesting_flag: bool,
    pub ptl: ProfileTierLevel,
    pub vps_max_layer_id: u8,
    pub vps_num_layer_sets_minus1: u32,
}

/// Fields decoded from an SPS before the parse stops.
#[derive(Debug, Clone, Default)]
pub struct HevcSps {
    pub sps_video_parameter_set_id: u8,
    pub sps_max_sub_layers_minus1: u8,
    pub sps_seq_parameter_set_id: u32,
    pub ptl: ProfileTierLevel,
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    /// Geometry after conformance-window cropping.
    pub width: u32,
    pub height: u32,
    pub bit_depth_luma_minus8: u32,
    pub bit_depth_chroma_minus8: u32,
}

/// Fields decoded from a PPS before the parse stops; the slice-header reads
/// need the first three.
#[derive(Debug, Clone, Default)]
pub struct HevcPps {
    pub pps_pic_parameter_set_id: u32,
    pub pps_seq_parameter_set_id: u32,
    pub dependent_slice_segments_enabled_flag: bool,
    pub output_flag_present_flag: bool,
    pub num_extra_slice_header_bits: u8,
    pub sign_data_hiding_enabled_flag: bool,
    pub cabac_init_present_flag: bool,
}

/// One NAL unit array of the configuration record.
#[derive(Debug, Clone)]
pub struct HevcNaluArray {
    pub array_completeness: bool,
    pub nal_unit_type: HevcNaluType,
    pub nalus: Vec<Bytes>,
}

/// HEVCDecoderConfigurationRecord, ISO/IEC 14496-15 §8.3.3.1.
#[derive(Debug, Clone, Default)]
pub struct HevcConfigRecord {
    pub general_profile_space: u8,
    pub general_tier_flag: u8,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_constraint_indicator_flags: u64,
    pub general_level_idc: u8,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub avg_frame_rate: u16,
    pub constant_frame_rate: u8,
    pub num_temporal_layers: u8,
    pub temporal_id_nested: bool,
    /// Bytes per NALU length prefix minus one: 0, 1 or 3.
    pub length_size_minus_one: u8,
    pub arrays: Vec<HevcNaluArray>,
    pub vps_table: HashMap<u32, HevcVps>,
    pub sps_table: HashMap<u32, HevcSps>,
    pub pps_table: HashMap<u32, HevcPps>,
}

impl HevcConfigRecord {
    /// Decode the record body, i.e. the sequence-header payload after the
    /// FLV video tag header.
    pub fn decode(mut body: Bytes) -> Result<HevcConfigRecord> {
        // configuration_version through numOfArrays
        const HEVC_MIN_SIZE: usize = 23;
        if body.remaining() < HEVC_MIN_SIZE {
            return Err(Error::HevcDecode(format!(
                "record requires {HEVC_MIN_SIZE} bytes, got {}",
                body.remaining()
            )));
        }

        let mut rec = HevcConfigRecord::default();

        let configuration_version = body.get_u8();
        if configuration_version != 1 {
            return Err(Error::HevcDecode(format!(
                "invalid version={configuration_version}"
            )));
        }

        let b = body.get_u8();
        rec.general_profile_space = (b >> 6) & 0x03;
        rec.general_tier_flag = (b >> 5) & 0x01;
        rec.general_profile_idc = b & 0x1F;
        rec.general_profile_compatibility_flags = body.get_u32();
        rec.general_constraint_indicator_flags =
            ((body.get_u32() as u64) << 16) | body.get_u16() as u64;
        rec.general_level_idc = body.get_u8();
        rec.min_spatial_segmentation_idc = body.get_u16() & 0x0FFF;
        rec.parallelism_type = body.get_u8() & 0x03;
        rec.chroma_format = body.get_u8() & 0x03;
        rec.bit_depth_luma_minus8 = body.get_u8() & 0x07;
        rec.bit_depth_chroma_minus8 = body.get_u8() & 0x07;
        rec.avg_frame_rate = body.get_u16();

        let b = body.get_u8();
        rec.constant_frame_rate = (b >> 6) & 0x03;
        rec.num_temporal_layers = (b >> 3) & 0x07;
        rec.temporal_id_nested = (b >> 2) & 0x01 == 1;
        rec.length_size_minus_one = b & 0x03;
        if rec.length_size_minus_one == 2 {
            return Err(Error::HevcDecode(
                "lengthSizeMinusOne should never be 2".into(),
            ));
        }

        let num_arrays = body.get_u8();
        for _ in 0..num_arrays {
            if body.remaining() < 3 {
                return Err(Error::HevcDecode(format!(
                    "array header requires 3 bytes, got {}",
                    body.remaining()
                )));
            }
            let b = body.get_u8();
            let array_completeness = b & 0x80 != 0;
            let nal_unit_type = HevcNaluType::from_u6(b & 0x3F);
            let num_nalus = body.get_u16();

            let mut nalus = Vec::with_capacity(num_nalus as usize);
            for _ in 0..num_nalus {
                if body.remaining() < 2 {
                    return Err(Error::HevcDecode("nalu length requires 2 bytes".into()));
                }
                let len = body.get_u16() as usize;
                if body.remaining() < len {
                    return Err(Error::HevcDecode(format!(
                        "nalu requires {len} bytes, got {}",
                        body.remaining()
                    )));
                }
                nalus.push(body.split_to(len));
            }

            // best-effort: keep the record even when a parameter set has
            // trailing fields we cannot walk
            if let Some(first) = nalus.first() {
                if let Err(e) = rec.demux_parameter_set(nal_unit_type, first) {
                    warn!("ignore hevc {nal_unit_type:?} parse: {e}");
                }
            }

            rec.arrays.push(HevcNaluArray {
                array_completeness,
                nal_unit_type,
                nalus,
            });
        }

        Ok(rec)
    }

    pub fn nalu_length_size(&self) -> u8 {
        self.length_size_minus_one + 1
    }

    fn first_of(&self, kind: HevcNaluType) -> Option<&Bytes> {
        self.arrays
            .iter()
            .find(|a| a.nal_unit_type == kind)
            .and_then(|a| a.nalus.first())
    }

    pub fn vps(&self) -> Option<&Bytes> {
        self.first_of(HevcNaluType::Vps)
    }

    pub fn sps(&self) -> Option<&Bytes> {
        self.first_of(HevcNaluType::Sps)
    }

    pub fn pps(&self) -> Option<&Bytes> {
        self.first_of(HevcNaluType::Pps)
    }

    fn demux_parameter_set(&mut self, kind: HevcNaluType, nalu: &Bytes) -> Result<()> {
        match kind {
            HevcNaluType::Vps => self.demux_vps(nalu),
            HevcNaluType::Sps => self.demux_sps(nalu),
            HevcNaluType::Pps => self.demux_pps(nalu),
            _ => Ok(()),
        }
    }

    fn rbsp_of(nalu: &Bytes, expect: HevcNaluType) -> Result<Vec<u8>> {
        if nalu.len() < 2 {
            return Err(Error::HevcDecode("nalu shorter than its header".into()));
        }
        let header = nalu[0];
        if header & 0x80 != 0 {
            return Err(Error::HevcDecode(
                "forbidden_zero_bit shall be equal to 0".into(),
            ));
        }
        let kind = HevcNaluType::from_header(header);
        if kind != expect {
            return Err(Error::HevcDecode(format!(
                "nal_unit_type {kind:?} shall be {expect:?}"
            )));
        }
        // two-byte header: nuh_layer_id + nuh_temporal_id_plus1 follow
        Ok(remove_emulation_bytes(&nalu[2..]))
    }

    fn demux_vps(&mut self, nalu: &Bytes) -> Result<()> {
        let rbsp = Self::rbsp_of(nalu, HevcNaluType::Vps)?;
        let mut bs = BitReader::new(&rbsp);

        let mut vps = HevcVps {
            vps_video_parameter_set_id: bs.read_bits(4)?,
            ..Default::default()
        };
        if vps.vps_video_parameter_set_id >= MAX_VPS_COUNT {
            return Err(Error::HevcDecode(format!(
                "vps id out of range: {}",
                vps.vps_video_parameter_set_id
            )));
        }
        bs.read_bit()?; // vps_base_layer_internal_flag
        bs.read_bit()?; // vps_base_layer_available_flag
        vps.vps_max_layers_minus1 = bs.read_bits(6)? as u8;
        vps.vps_max_sub_layers_minus1 = bs.read_bits(3)? as u8;
        vps.vps_temporal_id_nesting_flag = bs.read_bool()?;
        bs.skip_bits(16)?; // vps_reserved_0xffff_16bits

        vps.ptl = parse_ptl(&mut bs, true, vps.vps_max_sub_layers_minus1)?;

        let ordering_info_present = bs.read_bool()?;
        let start = if ordering_info_present {
            0
        } else {
            vps.vps_max_sub_layers_minus1
        };
        for _ in start..=vps.vps_max_sub_layers_minus1 {
            bs.read_ue()?; // vps_max_dec_pic_buffering_minus1
            bs.read_ue()?; // vps_max_num_reorder_pics
            bs.read_ue()?; // vps_max_latency_increase_plus1
        }
        vps.vps_max_layer_id = bs.read_bits(6)? as u8;
        vps.vps_num_layer_sets_minus1 = bs.read_ue()?;
        // remaining vps fields are tolerated unparsed

        self.general_profile_idc = vps.ptl.general_profile_idc;
        self.general_level_idc = vps.ptl.general_level_idc;
        self.general_tier_flag = vps.ptl.general_tier_flag;
        self.vps_table
            .insert(vps.vps_video_parameter_set_id, vps);
        Ok(())
    }

    fn demux_sps(&mut self, nalu: &Bytes) -> Result<()> {
        let rbsp = Self::rbsp_of(nalu, HevcNaluType::Sps)?;
        let mut bs = BitReader::new(&rbsp);

        let mut sps = HevcSps {
            sps_video_parameter_set_id: bs.read_bits(4)? as u8,
            sps_max_sub_layers_minus1: bs.read_bits(3)? as u8,
            ..Default::default()
        };
        bs.read_bit()?; // sps_temporal_id_nesting_flag

        sps.ptl = parse_ptl(&mut bs, true, sps.sps_max_sub_layers_minus1)?;

        sps.sps_seq_parameter_set_id = bs.read_ue()?;
        if sps.sps_seq_parameter_set_id >= MAX_SPS_COUNT {
            return Err(Error::HevcDecode(format!(
                "sps id out of range: {}",
                sps.sps_seq_parameter_set_id
            )));
        }

        sps.chroma_format_idc = bs.read_ue()?;
        if sps.chroma_format_idc == 3 {
            sps.separate_colour_plane_flag = bs.read_bool()?;
        }
        sps.pic_width_in_luma_samples = bs.read_ue()?;
        sps.pic_height_in_luma_samples = bs.read_ue()?;
        sps.width = sps.pic_width_in_luma_samples;
        sps.height = sps.pic_height_in_luma_samples;

        if bs.read_bool()? {
            // conformance_window_flag
            let left = bs.read_ue()?;
            let right = bs.read_ue()?;
            let top = bs.read_ue()?;
            let bottom = bs.read_ue()?;
            let sub_width_c = if (sps.chroma_format_idc == 1 || sps.chroma_format_idc == 2)
                && !sps.separate_colour_plane_flag
            {
                2
            } else {
                1
            };
            let sub_height_c = if sps.chroma_format_idc == 1 && !sps.separate_colour_plane_flag {
                2
            } else {
                1
            };
            sps.width -= sub_width_c * (left + right);
            sps.height -= sub_height_c * (top + bottom);
        }

        sps.bit_depth_luma_minus8 = bs.read_ue()?;
        sps.bit_depth_chroma_minus8 = bs.read_ue()?;
        bs.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
        // remaining sps fields are tolerated unparsed

        self.sps_table.insert(sps.sps_seq_parameter_set_id, sps);
        Ok(())
    }

    fn demux_pps(&mut self, nalu: &Bytes) -> Result<()> {
        let rbsp = Self::rbsp_of(nalu, HevcNaluType::Pps)?;
        let mut bs = BitReader::new(&rbsp);

        let mut pps = HevcPps {
            pps_pic_parameter_set_id: bs.read_ue()?,
            ..Default::default()
        };
        if pps.pps_pic_parameter_set_id >= MAX_PPS_COUNT {
            return Err(Error::HevcDecode(format!(
                "pps id out of range: {}",
                pps.pps_pic_parameter_set_id
            )));
        }
        pps.pps_seq_parameter_set_id = bs.read_ue()?;
        pps.dependent_slice_segments_enabled_flag = bs.read_bool()?;
        pps.output_flag_present_flag = bs.read_bool()?;
        pps.num_extra_slice_header_bits = bs.read_bits(3)? as u8;
        pps.sign_data_hiding_enabled_flag = bs.read_bool()?;
        pps.cabac_init_present_flag = bs.read_bool()?;
        // remaining pps fields are tolerated unparsed

        self.pps_table.insert(pps.pps_pic_parameter_set_id, pps);
        Ok(())
    }
}

/// Whether a slice NALU codes a B slice, §7.3.6.1 general slice segment
/// header. The PPS referenced by the slice must already be in the table.
pub fn parse_bframe(nalu: &[u8], record: &HevcConfigRecord) -> Result<bool> {
    if nalu.is_empty() {
        return Err(Error::NaluEmpty);
    }
    let nalu_type = HevcNaluType::from_header(nalu[0]);
    if !nalu_type.is_leading_or_trailing_slice() {
        return Ok(false);
    }
    if nalu.len() < 3 {
        return Err(Error::HevcDecode("slice shorter than its header".into()));
    }

    let mut bs = BitReader::new(&nalu[2..]);
    let first_slice_segment_in_pic_flag = bs.read_bool()?;

    let slice_pic_parameter_set_id = bs.read_ue()?;
    if slice_pic_parameter_set_id >= MAX_PPS_COUNT {
        return Err(Error::HevcDecode(format!(
            "slice pic parameter set id out of range: {slice_pic_parameter_set_id}"
        )));
    }
    let pps = record
        .pps_table
        .get(&slice_pic_parameter_set_id)
        .ok_or_else(|| Error::HevcDecode("pps not found".into()))?;

    let mut dependent_slice_segment_flag = false;
    if !first_slice_segment_in_pic_flag && pps.dependent_slice_segments_enabled_flag {
        dependent_slice_segment_flag = bs.read_bool()?;
    }
    if dependent_slice_segment_flag {
        return Err(Error::HevcDecode(
            "dependent slice segment flag is not supported".into(),
        ));
    }

    for _ in 0..pps.num_extra_slice_header_bits {
        bs.skip_bits(1)?;
    }

    // slice_type: 0=B, 1=P, 2=I
    let slice_type = bs.read_ue()?;
    Ok(slice_type == 0)
}

#[cfg(test)]
pub(crate) mod hevc_test;
