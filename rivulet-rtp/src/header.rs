//! RTP fixed header and header extensions, RFC 3550 §5.1 and RFC 8285.

use bytes::{Buf, BufMut, Bytes};
use shared::error::{Error, Result};
use shared::marshal::{require, Marshal, MarshalSize, Unmarshal};

pub const HEADER_LENGTH: usize = 12;
pub const VERSION: u8 = 2;

/// One-byte extension profile.
pub const EXTENSION_PROFILE_ONE_BYTE: u16 = 0xBEDE;
/// Two-byte extension profile.
pub const EXTENSION_PROFILE_TWO_BYTE: u16 = 0x1000;

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Extension {
    pub id: u8,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Header {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension_profile: u16,
    pub extensions: Vec<Extension>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            version: VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrc: Vec::new(),
            extension_profile: 0,
            extensions: Vec::new(),
        }
    }
}

impl Header {
    /// Payload of the extension with the given id, when present.
    pub fn get_extension(&self, id: u8) -> Option<&Bytes> {
        self.extensions
            .iter()
            .find(|e| e.id == id)
            .map(|e| &e.payload)
    }

    pub fn set_extension(&mut self, id: u8, payload: Bytes) {
        self.extension = true;
        if self.extension_profile == 0 {
            self.extension_profile = EXTENSION_PROFILE_ONE_BYTE;
        }
        if let Some(ext) = self.extensions.iter_mut().find(|e| e.id == id) {
            ext.payload = payload;
            return;
        }
        self.extensions.push(Extension { id, payload });
    }

    fn extension_payload_len(&self) -> usize {
        match self.extension_profile {
            EXTENSION_PROFILE_ONE_BYTE => self
                .extensions
                .iter()
                .map(|e| 1 + e.payload.len())
                .sum::<usize>(),
            EXTENSION_PROFILE_TWO_BYTE => self
                .extensions
                .iter()
                .map(|e| 2 + e.payload.len())
                .sum::<usize>(),
            _ => self.extensions.first().map(|e| e.payload.len()).unwrap_or(0),
        }
    }
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        let mut size = HEADER_LENGTH + 4 * self.csrc.len();
        if self.extension {
            let payload = self.extension_payload_len();
            // profile + length words + payload padded to 32 bits
            size += 4 + payload.div_ceil(4) * 4;
        }
        size
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize> {
        let mut b0 = (self.version << 6) | self.csrc.len() as u8;
        if self.padding {
            b0 |= 1 << 5;
        }
        if self.extension {
            b0 |= 1 << 4;
        }
        buf.put_u8(b0);

        let mut b1 = self.payload_type & 0x7F;
        if self.marker {
            b1 |= 1 << 7;
        }
        buf.put_u8(b1);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }

        if self.extension {
            let payload_len = self.extension_payload_len();
            let padded = payload_len.div_ceil(4) * 4;
            buf.put_u16(self.extension_profile);
            buf.put_u16((padded / 4) as u16);

            match self.extension_profile {
                EXTENSION_PROFILE_ONE_BYTE => {
                    for ext in &self.extensions {
                        buf.put_u8((ext.id << 4) | (ext.payload.len() as u8 - 1));
                        buf.put_slice(&ext.payload);
                    }
                }
                EXTENSION_PROFILE_TWO_BYTE => {
                    for ext in &self.extensions {
                        buf.put_u8(ext.id);
                        buf.put_u8(ext.payload.len() as u8);
                        buf.put_slice(&ext.payload);
                    }
                }
                _ => {
                    if let Some(ext) = self.extensions.first() {
                        buf.put_slice(&ext.payload);
                    }
                }
            }
            for _ in payload_len..padded {
                buf.put_u8(0);
            }
        }

        Ok(self.marshal_size())
    }
}

impl Unmarshal for Header {
    fn unmarshal(buf: &mut impl Buf) -> Result<Self> {
        require(buf, HEADER_LENGTH)?;

        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != VERSION {
            return Err(Error::RtpDecode(format!("bad version {version}")));
        }
        let padding = (b0 >> 5) & 0x01 == 1;
        let extension = (b0 >> 4) & 0x01 == 1;
        let csrc_count = (b0 & 0x0F) as usize;

        let b1 = buf.get_u8();
        let marker = b1 >> 7 == 1;
        let payload_type = b1 & 0x7F;
        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        require(buf, csrc_count * 4)?;
        let mut csrc = Vec::with_capacity(csrc_count);
        for _ in 0..csrc_count {
            csrc.push(buf.get_u32());
        }

        let mut extension_profile = 0;
        let mut extensions = Vec::new();
        if extension {
            require(buf, 4)?;
            extension_profile = buf.get_u16();
            let ext_words = buf.get_u16() as usize;
            require(buf, ext_words * 4)?;
            let mut ext = vec![0u8; ext_words * 4];
            buf.copy_to_slice(&mut ext);
            let mut ext = Bytes::from(ext);

            match extension_profile {
                EXTENSION_PROFILE_ONE_BYTE => {
                    while ext.has_remaining() {
                        let b = ext.get_u8();
                        if b == 0x00 {
                            // padding
                            continue;
                        }
                        let id = b >> 4;
                        if id == 0x0F {
                            // reserved id terminates processing
                            break;
                        }
                        let len = (b & 0x0F) as usize + 1;
                        if ext.remaining() < len {
                            return Err(Error::RtpDecode("short one-byte extension".into()));
                        }
                        extensions.push(Extension {
                            id,
                            payload: ext.split_to(len),
                        });
                    }
                }
                EXTENSION_PROFILE_TWO_BYTE => {
                    while ext.has_remaining() {
                        let id = ext.get_u8();
                        if id == 0x00 {
                            continue;
                        }
                        if !ext.has_remaining() {
                            return Err(Error::RtpDecode("short two-byte extension".into()));
                        }
                        let len = ext.get_u8() as usize;
                        if ext.remaining() < len {
                            return Err(Error::RtpDecode("short two-byte extension".into()));
                        }
                        extensions.push(Extension {
                            id,
                            payload: ext.split_to(len),
                        });
                    }
                }
                _ => {
                    extensions.push(Extension {
                        id: 0,
                        payload: ext,
                    });
                }
            }
        }

        Ok(Header {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_profile,
            extensions,
        })
    }
}
