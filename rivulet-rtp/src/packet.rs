use crate::header::Header;
use crate::payload::Payload;
use bytes::{Buf, BufMut, Bytes};
use shared::error::Result;
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

/// An RTP packet: fixed header plus one payload form.
///
/// Payload variants may reference NALU bytes owned by a media packet that is
/// still alive; the shared-buffer reference count asserts that lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Payload,
}

impl Default for Packet {
    fn default() -> Self {
        Packet {
            header: Header::default(),
            payload: Payload::Raw(Bytes::new()),
        }
    }
}

impl Packet {
    pub fn new(header: Header, payload: Payload) -> Self {
        Packet { header, payload }
    }
}

impl MarshalSize for Packet {
    fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.marshal_size()
    }
}

impl Marshal for Packet {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        let h = self.header.marshal_to(buf)?;
        let p = self.payload.marshal_to(buf)?;
        Ok(h + p)
    }
}

impl Unmarshal for Packet {
    /// Decode the header and keep the rest as a raw payload view.
    fn unmarshal(buf: &mut impl Buf) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        let payload = buf.copy_to_bytes(buf.remaining());
        Ok(Packet {
            header,
            payload: Payload::Raw(payload),
        })
    }
}
