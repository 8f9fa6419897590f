use super::*;
use crate::hevc::hevc_test;
use bytes::{BufMut, BytesMut};

/// AVC sequence-header tag body: profile 100, level 31, 4-byte lengths,
/// one 7-byte SPS and one 4-byte PPS.
fn avc_sequence_header() -> Bytes {
    Bytes::from_static(&[
        0x17, 0x00, 0x00, 0x00, 0x00, // keyframe + AVC, seq header, cts=0
        0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x07, 0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9,
        0x40, 0x01, 0x00, 0x04, 0x68, 0xEE, 0x3C, 0x80,
    ])
}

fn ibmf_nalu_tag(cts: u32, nalus: &[&[u8]]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(0x27); // inter frame + AVC
    buf.put_u8(0x01); // NALU
    buf.put_slice(&cts.to_be_bytes()[1..]);
    for n in nalus {
        buf.put_u32(n.len() as u32);
        buf.put_slice(n);
    }
    buf.freeze()
}

fn annexb_nalu_tag(nalus: &[&[u8]]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(0x17);
    buf.put_u8(0x01);
    buf.put_slice(&[0, 0, 0]);
    for n in nalus {
        buf.put_slice(&[0, 0, 0, 1]);
        buf.put_slice(n);
    }
    buf.freeze()
}

#[test]
fn test_avc_sequence_header_demux() {
    let mut format = FormatDemuxer::new();
    format.avc_parse_sps = false;

    format.on_video(0, avc_sequence_header()).unwrap();

    let vcodec = format.vcodec.as_ref().unwrap();
    assert_eq!(vcodec.id, Some(VideoCodecId::Avc));
    assert_eq!(vcodec.profile, 100);
    assert_eq!(vcodec.level, 31);
    assert_eq!(vcodec.nalu_length_size, 4);
    assert_eq!(
        vcodec.sps.as_ref(),
        &[0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9, 0x40]
    );
    assert!(format.is_avc_sequence_header());
    assert!(vcodec.is_ready());
}

#[test]
fn test_ibmf_nalu_demux() {
    let mut format = FormatDemuxer::new();
    format.avc_parse_sps = false;
    format.on_video(0, avc_sequence_header()).unwrap();

    let tag = ibmf_nalu_tag(40, &[&[0x65, 0x88, 0x84], &[0x41, 0x9A]]);
    let raw_len = tag.len() - 5;
    format.on_video(100, tag).unwrap();

    let video = format.video.as_ref().unwrap();
    assert_eq!(video.dts, 100);
    assert_eq!(video.cts, 40);
    assert_eq!(video.pts(), 140);
    assert_eq!(video.samples.len(), 2);
    assert!(video.has_idr);
    assert_eq!(video.first_nalu_type, 5);
    assert_eq!(
        format.vcodec.as_ref().unwrap().payload_format,
        PayloadFormat::Ibmf
    );

    // sum of sample sizes never exceeds the raw payload
    let total: usize = video.samples.iter().map(|s| s.len()).sum();
    assert!(total <= raw_len);
}

#[test]
fn test_annexb_nalu_demux_detects_format() {
    let mut format = FormatDemuxer::new();
    format.avc_parse_sps = false;
    format.on_video(0, avc_sequence_header()).unwrap();

    format
        .on_video(40, annexb_nalu_tag(&[&[0x09, 0xF0], &[0x65, 0x88]]))
        .unwrap();

    let video = format.video.as_ref().unwrap();
    assert_eq!(video.samples.len(), 2);
    assert!(video.has_aud);
    assert!(video.has_idr);
    assert_eq!(video.first_nalu_type, 9);
    assert_eq!(
        format.vcodec.as_ref().unwrap().payload_format,
        PayloadFormat::AnnexB
    );

    // the detected format sticks for subsequent frames
    format
        .on_video(80, annexb_nalu_tag(&[&[0x41, 0x9A]]))
        .unwrap();
    assert_eq!(
        format.vcodec.as_ref().unwrap().payload_format,
        PayloadFormat::AnnexB
    );
}

#[test]
fn test_nalu_before_sequence_header_is_dropped() {
    let mut format = FormatDemuxer::new();
    // first tag must carry a codec id for the classic header parse
    let tag = ibmf_nalu_tag(0, &[&[0x65, 0x88]]);
    format.on_video(0, tag).unwrap();
    assert!(format.video.as_ref().unwrap().samples.is_empty());
}

#[test]
fn test_unsupported_video_codec() {
    let mut format = FormatDemuxer::new();
    // codec id 2 (Sorenson H.263)
    let tag = Bytes::from_static(&[0x12, 0x01, 0x00, 0x00, 0x00]);
    let err = format.on_video(0, tag).unwrap_err();
    assert_eq!(err, Error::FlvDecode(String::new()));
}

#[test]
fn test_info_frame_is_ignored() {
    let mut format = FormatDemuxer::new();
    let tag = Bytes::from_static(&[0x57, 0x01, 0x00, 0x00, 0x00]);
    format.on_video(0, tag).unwrap();
    assert!(format.video.as_ref().unwrap().samples.is_empty());
}

#[test]
fn test_enhanced_hevc_sequence_header() {
    let mut format = FormatDemuxer::new();

    let mut tag = BytesMut::new();
    tag.put_u8(0x90); // ext header, keyframe, packet type 0 (seq header)
    tag.put_slice(b"hvc1");
    tag.put_slice(&hevc_test::build_record_body());
    format.on_video(0, tag.freeze()).unwrap();

    let vcodec = format.vcodec.as_ref().unwrap();
    assert_eq!(vcodec.id, Some(VideoCodecId::Hevc));
    assert_eq!(vcodec.nalu_length_size, 4);
    assert_eq!(vcodec.width, 1280);
    assert_eq!(vcodec.height, 720);
    assert!(format.is_avc_sequence_header());
}

#[test]
fn test_enhanced_hevc_coded_frames_x() {
    let mut format = FormatDemuxer::new();

    let mut tag = BytesMut::new();
    tag.put_u8(0x90);
    tag.put_slice(b"hvc1");
    tag.put_slice(&hevc_test::build_record_body());
    format.on_video(0, tag.freeze()).unwrap();

    // CodedFramesX: packet type 3, no composition time
    let mut tag = BytesMut::new();
    tag.put_u8(0x93);
    tag.put_slice(b"hvc1");
    let idr = [0x26, 0x01, 0xAF, 0x08]; // IDR_W_RADL
    tag.put_u32(idr.len() as u32);
    tag.put_slice(&idr);
    format.on_video(120, tag.freeze()).unwrap();

    let video = format.video.as_ref().unwrap();
    assert_eq!(video.cts, 0);
    assert_eq!(video.dts, 120);
    assert_eq!(video.samples.len(), 1);
    assert!(video.has_idr);
}

#[test]
fn test_enhanced_hevc_coded_frames_with_cts() {
    let mut format = FormatDemuxer::new();

    let mut tag = BytesMut::new();
    tag.put_u8(0x90);
    tag.put_slice(b"hvc1");
    tag.put_slice(&hevc_test::build_record_body());
    format.on_video(0, tag.freeze()).unwrap();

    // CodedFrames: packet type 1, 3-byte composition time
    let mut tag = BytesMut::new();
    tag.put_u8(0xA1); // frame type 2 (inter), packet type 1
    tag.put_slice(b"hvc1");
    tag.put_slice(&[0x00, 0x00, 0x50]);
    let trail = [0x02, 0x01, 0xD0];
    tag.put_u32(trail.len() as u32);
    tag.put_slice(&trail);
    format.on_video(200, tag.freeze()).unwrap();

    let video = format.video.as_ref().unwrap();
    assert_eq!(video.cts, 0x50);
    assert_eq!(video.frame_type, VideoFrameType::Inter);
}

#[test]
fn test_aac_sequence_header_then_raw() {
    let mut format = FormatDemuxer::new();

    // AAC, 44.1k, 16-bit, stereo; sequence header; LC 44100 stereo ASC
    let sh = Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]);
    format.on_audio(0, sh).unwrap();
    assert!(format.is_aac_sequence_header());

    let acodec = format.acodec.as_ref().unwrap();
    assert_eq!(acodec.id, Some(AudioCodecId::Aac));
    assert_eq!(acodec.aac_channels, 2);
    assert_eq!(acodec.aac_sample_rate_index, 4);
    assert_eq!(acodec.sample_rate(), 44100);
    assert!(acodec.is_aac_ready());

    let raw = Bytes::from_static(&[0xAF, 0x01, 0x21, 0x10, 0x04, 0x60]);
    format.on_audio(23, raw).unwrap();
    let audio = format.audio.as_ref().unwrap();
    assert_eq!(audio.dts, 23);
    assert_eq!(audio.samples.len(), 1);
    assert_eq!(audio.samples[0].as_ref(), &[0x21, 0x10, 0x04, 0x60]);
    assert!(!format.is_aac_sequence_header());
}

#[test]
fn test_aac_raw_before_sequence_header_dropped() {
    let mut format = FormatDemuxer::new();
    let raw = Bytes::from_static(&[0xAF, 0x01, 0x21, 0x10]);
    // dropped with a warning, not an error
    format.on_audio(0, raw).unwrap();
    assert!(format.audio.as_ref().unwrap().samples.is_empty());
}

#[test]
fn test_mp3_fresh_flag() {
    let mut format = FormatDemuxer::new();
    // MP3, first frame acts as its sequence header
    let frame = Bytes::from_static(&[0x2F, 0xFF, 0xFB, 0x90]);
    format.on_audio(0, frame).unwrap();
    assert!(format.is_mp3_sequence_header());
    assert_eq!(format.audio.as_ref().unwrap().samples[0].as_ref(), &[0xFF, 0xFB, 0x90]);

    let frame = Bytes::from_static(&[0x2F, 0xFF, 0xFB, 0x92]);
    format.on_audio(26, frame).unwrap();
    assert!(!format.is_mp3_sequence_header());
}

#[test]
fn test_opus_not_implemented() {
    let mut format = FormatDemuxer::new();
    let frame = Bytes::from_static(&[0xDF, 0x01, 0x02]);
    let err = format.on_audio(0, frame).unwrap_err();
    assert_eq!(err, Error::NotImplemented(""));
}

#[test]
fn test_unsupported_audio_codec() {
    let mut format = FormatDemuxer::new();
    // Speex = 11
    let frame = Bytes::from_static(&[0xBF, 0x01]);
    let err = format.on_audio(0, frame).unwrap_err();
    assert_eq!(err, Error::UnsupportedAudioCodec(11));
}

#[test]
fn test_empty_payload_ignored() {
    let mut format = FormatDemuxer::new();
    format.on_audio(0, Bytes::new()).unwrap();
    format.on_video(0, Bytes::new()).unwrap();
    assert!(format.audio.is_none());
    assert!(format.video.is_none());
}

#[test]
fn test_avc_bframe_detection() {
    use crate::avc::tests::BitWriter;

    let mut format = FormatDemuxer::new();
    format.avc_parse_sps = false;
    format.on_video(0, avc_sequence_header()).unwrap();

    let mut w = BitWriter::new();
    w.put_ue(0); // first_mb_in_slice
    w.put_ue(1); // slice_type B
    let mut slice = vec![0x41];
    slice.extend(w.finish());

    let refs: Vec<&[u8]> = vec![&slice];
    format.on_video(40, ibmf_nalu_tag(0, &refs)).unwrap();
    let video = format.video.as_ref().unwrap();
    assert!(video.is_bframe(format.vcodec.as_ref().unwrap()).unwrap());
}
