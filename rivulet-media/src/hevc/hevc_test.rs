use super::*;
use bytes::{BufMut, BytesMut};

pub(crate) const VPS: [u8; 24] = [
    0x40, 0x01, 0x0c, 0x01, 0xff, 0xff, 0x01, 0x60, 0x00, 0x00, 0x03, 0x00, 0x90, 0x00, 0x00,
    0x03, 0x00, 0x00, 0x03, 0x00, 0x5d, 0x95, 0x98, 0x09,
];

pub(crate) const SPS: [u8; 40] = [
    0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x03, 0x00, 0x90, 0x00, 0x00, 0x03, 0x00, 0x00,
    0x03, 0x00, 0x5d, 0xa0, 0x02, 0x80, 0x80, 0x2d, 0x16, 0x59, 0x59, 0xa4, 0x93, 0x2b, 0xc0,
    0x40, 0x40, 0x00, 0x00, 0x03, 0x00, 0x40, 0x00, 0x00, 0x07,
];

pub(crate) const PPS: [u8; 8] = [0x44, 0x01, 0xc1, 0x72, 0xb4, 0x62, 0x40, 0x00];

/// Build an HEVCDecoderConfigurationRecord body carrying the three
/// parameter sets in VPS, SPS, PPS array order.
pub(crate) fn build_record_body() -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(1); // configuration_version
    buf.put_u8(0x01); // profile_space=0, tier=0, profile_idc=1 (Main)
    buf.put_u32(0x6000_0000); // general_profile_compatibility_flags
    buf.put_slice(&[0x90, 0x00, 0x00, 0x00, 0x00, 0x00]); // constraint flags
    buf.put_u8(93); // general_level_idc
    buf.put_u16(0xF000); // min_spatial_segmentation_idc
    buf.put_u8(0xFC); // parallelism_type
    buf.put_u8(0xFD); // chroma_format = 1
    buf.put_u8(0xF8); // bit_depth_luma_minus8 = 0
    buf.put_u8(0xF8); // bit_depth_chroma_minus8 = 0
    buf.put_u16(0); // avg_frame_rate
    buf.put_u8(0x0F); // num_temporal_layers=1, nested=1, length_size_minus_one=3
    buf.put_u8(3); // numOfArrays

    for (kind, unit) in [(32u8, &VPS[..]), (33, &SPS[..]), (34, &PPS[..])] {
        buf.put_u8(kind); // array_completeness=0 + nal_unit_type
        buf.put_u16(1); // numNalus
        buf.put_u16(unit.len() as u16);
        buf.put_slice(unit);
    }
    buf.freeze()
}

#[test]
fn test_record_decode() {
    let rec = HevcConfigRecord::decode(build_record_body()).unwrap();
    assert_eq!(rec.general_profile_idc, 1);
    assert_eq!(rec.general_level_idc, 93);
    assert_eq!(rec.nalu_length_size(), 4);
    assert_eq!(rec.arrays.len(), 3);

    assert_eq!(rec.vps().unwrap().as_ref(), &VPS);
    assert_eq!(rec.sps().unwrap().as_ref(), &SPS);
    assert_eq!(rec.pps().unwrap().as_ref(), &PPS);
}

#[test]
fn test_record_rejects_bad_version() {
    let mut body = build_record_body().to_vec();
    body[0] = 2;
    assert!(HevcConfigRecord::decode(Bytes::from(body)).is_err());
}

#[test]
fn test_record_rejects_three_byte_lengths() {
    let mut body = build_record_body().to_vec();
    // force length_size_minus_one = 2
    body[21] = (body[21] & !0x03) | 0x02;
    let err = HevcConfigRecord::decode(Bytes::from(body)).unwrap_err();
    assert_eq!(err, Error::HevcDecode(String::new()));
}

#[test]
fn test_sps_geometry() {
    let rec = HevcConfigRecord::decode(build_record_body()).unwrap();
    let sps = rec.sps_table.get(&0).expect("sps 0 parsed");
    assert_eq!(sps.width, 1280);
    assert_eq!(sps.height, 720);
    assert_eq!(sps.chroma_format_idc, 1);
    assert_eq!(sps.ptl.general_profile_idc, 1);
    assert_eq!(sps.ptl.general_level_idc, 93);
}

#[test]
fn test_pps_slice_prerequisites() {
    let rec = HevcConfigRecord::decode(build_record_body()).unwrap();
    let pps = rec.pps_table.get(&0).expect("pps 0 parsed");
    assert!(!pps.dependent_slice_segments_enabled_flag);
    assert_eq!(pps.num_extra_slice_header_bits, 0);
    assert!(pps.sign_data_hiding_enabled_flag);
}

#[test]
fn test_bframe_detection() {
    let rec = HevcConfigRecord::decode(build_record_body()).unwrap();

    // TrailR slice: first_slice=1, pps_id ue(0), slice_type ue(0) = B
    let b_slice = [0x02, 0x01, 0xE0];
    assert!(parse_bframe(&b_slice, &rec).unwrap());

    // slice_type ue(1) = P
    let p_slice = [0x02, 0x01, 0xD0];
    assert!(!parse_bframe(&p_slice, &rec).unwrap());

    // IDR is never a B-frame candidate
    let idr = [0x26, 0x01, 0xE0];
    assert!(!parse_bframe(&idr, &rec).unwrap());
}

#[test]
fn test_bframe_requires_known_pps() {
    // record with no PPS parsed
    let rec = HevcConfigRecord::default();
    let slice = [0x02, 0x01, 0xE0];
    assert!(parse_bframe(&slice, &rec).is_err());
}

#[test]
fn test_nalu_type_round_trip() {
    for v in [0u8, 1, 9, 16, 19, 21, 32, 33, 34, 35, 39, 40] {
        let t = HevcNaluType::from_u6(v);
        assert_eq!(t.as_u8(), v);
        assert_eq!(HevcNaluType::from_header(v << 1), t);
    }
    assert!(HevcNaluType::Idr.is_keyframe());
    assert!(!HevcNaluType::TrailR.is_keyframe());
}
