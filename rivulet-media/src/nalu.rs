//! In-band NALU framings: Annex-B start codes and ISO-BMFF length prefixes,
//! plus RBSP emulation-prevention handling.

use bytes::{BufMut, Bytes, BytesMut};
use shared::error::{Error, Result};

/// Returns the start-code length (3 or 4) when `data[pos..]` begins with an
/// Annex-B start code.
pub fn startswith_annexb(data: &[u8]) -> Option<usize> {
    if data.len() >= 4 && data[0] == 0 && data[1] == 0 && data[2] == 0 && data[3] == 1 {
        return Some(4);
    }
    if data.len() >= 3 && data[0] == 0 && data[1] == 0 && data[2] == 1 {
        return Some(3);
    }
    None
}

/// Split an Annex-B framed buffer into NALU views.
///
/// Each NAL unit ends at the next start code or the end of the buffer; empty
/// units between adjacent start codes are skipped. Fails when the buffer does
/// not begin with a start code so the caller can rewind and try the
/// length-prefixed framing instead.
pub fn demux_annexb(data: &Bytes) -> Result<Vec<Bytes>> {
    if startswith_annexb(data).is_none() {
        return Err(Error::AvcDecode("not annexb".into()));
    }

    let mut nalus = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let sc = match startswith_annexb(&data[pos..]) {
            Some(n) => n,
            None => break,
        };
        pos += sc;
        let start = pos;
        while pos < data.len() && startswith_annexb(&data[pos..]).is_none() {
            pos += 1;
        }
        if pos > start {
            nalus.push(data.slice(start..pos));
        }
    }
    Ok(nalus)
}

/// Split a length-prefixed (IBMF) buffer into NALU views.
///
/// `length_size` is the prefix width in bytes; 1, 2 and 4 are legal, 3 is
/// rejected per ISO/IEC 14496-15.
pub fn demux_ibmf(data: &Bytes, length_size: usize) -> Result<Vec<Bytes>> {
    if !matches!(length_size, 1 | 2 | 4) {
        return Err(Error::AvcDecode(format!(
            "NALU length size {length_size} is illegal"
        )));
    }

    let mut nalus = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if data.len() - pos < length_size {
            return Err(Error::AvcDecode(format!(
                "ibmf length needs {length_size} bytes, left {}",
                data.len() - pos
            )));
        }
        let mut len = 0usize;
        for i in 0..length_size {
            len = (len << 8) | data[pos + i] as usize;
        }
        pos += length_size;
        if data.len() - pos < len {
            return Err(Error::AvcDecode(format!(
                "ibmf NALU needs {len} bytes, left {}",
                data.len() - pos
            )));
        }
        nalus.push(data.slice(pos..pos + len));
        pos += len;
    }
    Ok(nalus)
}

/// Remove emulation-prevention bytes from a NALU body.
///
/// Every `00 00 03` followed by `00|01|02|03` collapses to `00 00`; a
/// trailing `03` with nothing after it is preserved.
pub fn remove_emulation_bytes(data: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(data.len());
    let mut i = 0usize;
    while i < data.len() {
        let b = data[i];
        let two_zeros = rbsp.len() >= 2
            && rbsp[rbsp.len() - 2] == 0
            && rbsp[rbsp.len() - 1] == 0;
        if b == 3 && two_zeros {
            if i + 1 == data.len() {
                // trailing 03 beyond the payload stays
                rbsp.push(3);
                break;
            }
            let next = data[i + 1];
            if next > 3 {
                rbsp.push(3);
            }
            rbsp.push(next);
            i += 2;
            continue;
        }
        rbsp.push(b);
        i += 1;
    }
    rbsp
}

/// Insert emulation-prevention bytes into an RBSP.
pub fn add_emulation_bytes(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64);
    let mut zeros = 0usize;
    for &b in rbsp {
        if zeros >= 2 && b <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(b);
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
    out
}

/// Re-frame a NALU list with 4-byte length prefixes.
pub fn frame_length_prefixed(nalus: &[Bytes]) -> Bytes {
    let total: usize = nalus.iter().map(|n| 4 + n.len()).sum();
    let mut out = BytesMut::with_capacity(total);
    for nalu in nalus {
        out.put_u32(nalu.len() as u32);
        out.put_slice(nalu);
    }
    out.freeze()
}

/// Re-frame a NALU list with 4-byte Annex-B start codes.
pub fn frame_annexb(nalus: &[Bytes]) -> Bytes {
    let total: usize = nalus.iter().map(|n| 4 + n.len()).sum();
    let mut out = BytesMut::with_capacity(total);
    for nalu in nalus {
        out.put_slice(&[0, 0, 0, 1]);
        out.put_slice(nalu);
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startswith_annexb() {
        assert_eq!(startswith_annexb(&[0, 0, 1, 0x65]), Some(3));
        assert_eq!(startswith_annexb(&[0, 0, 0, 1, 0x65]), Some(4));
        assert_eq!(startswith_annexb(&[0, 0, 2, 1]), None);
        assert_eq!(startswith_annexb(&[0, 0]), None);
    }

    #[test]
    fn test_demux_annexb() {
        let data = Bytes::from_static(&[
            0, 0, 0, 1, 0x67, 0x64, 0, 0, 1, 0x68, 0xEE, 0x3C, 0, 0, 1, 0x65, 0x88,
        ]);
        let nalus = demux_annexb(&data).unwrap();
        assert_eq!(nalus.len(), 3);
        assert_eq!(nalus[0].as_ref(), &[0x67, 0x64]);
        assert_eq!(nalus[1].as_ref(), &[0x68, 0xEE, 0x3C]);
        assert_eq!(nalus[2].as_ref(), &[0x65, 0x88]);
    }

    #[test]
    fn test_demux_annexb_rejects_ibmf() {
        let data = Bytes::from_static(&[0, 0, 0, 2, 0x65, 0x88]);
        assert!(demux_annexb(&data).is_err());
    }

    #[test]
    fn test_demux_annexb_skips_empty_units() {
        let data = Bytes::from_static(&[0, 0, 1, 0, 0, 1, 0x41, 0x9A]);
        let nalus = demux_annexb(&data).unwrap();
        assert_eq!(nalus.len(), 1);
        assert_eq!(nalus[0].as_ref(), &[0x41, 0x9A]);
    }

    #[test]
    fn test_demux_ibmf_sizes() {
        let data = Bytes::from_static(&[0, 2, 0x65, 0x88, 0, 1, 0x41]);
        let nalus = demux_ibmf(&data, 2).unwrap();
        assert_eq!(nalus.len(), 2);
        assert_eq!(nalus[0].as_ref(), &[0x65, 0x88]);
        assert_eq!(nalus[1].as_ref(), &[0x41]);

        assert!(demux_ibmf(&data, 3).is_err());

        let short = Bytes::from_static(&[0, 0, 0, 9, 0x65]);
        assert!(demux_ibmf(&short, 4).is_err());
    }

    #[test]
    fn test_remove_emulation_mixed_sequence() {
        let input = [0, 0, 3, 1, 0, 0, 3, 0, 0, 0, 3, 4];
        let expect = [0, 0, 1, 0, 0, 0, 0, 0, 3, 4];
        assert_eq!(remove_emulation_bytes(&input), expect);
    }

    #[test]
    fn test_remove_emulation_trailing_03() {
        assert_eq!(remove_emulation_bytes(&[0, 0, 3]), &[0, 0, 3]);
    }

    #[test]
    fn test_emulation_round_trip() {
        let rbsp: Vec<u8> = vec![0, 0, 0, 0, 1, 2, 3, 0, 0, 2, 0xFF, 0, 0, 0];
        let encoded = add_emulation_bytes(&rbsp);
        assert_eq!(remove_emulation_bytes(&encoded), rbsp);
    }

    #[test]
    fn test_framing_round_trip() {
        let nalus = vec![
            Bytes::from_static(&[0x67, 0x64, 0x00]),
            Bytes::from_static(&[0x68, 0xEE]),
            Bytes::from_static(&[0x65, 0x88, 0x84, 0x21]),
        ];
        let framed = frame_annexb(&nalus);
        let back = demux_annexb(&framed).unwrap();
        assert_eq!(back, nalus);

        let prefixed = frame_length_prefixed(&back);
        let again = demux_ibmf(&prefixed, 4).unwrap();
        assert_eq!(again, nalus);
    }
}
