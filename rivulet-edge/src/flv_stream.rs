//! FLV file-stream decoder for HTTP-FLV ingest: the 9-byte file header,
//! then previous-tag-size + tag header + payload per tag.

use bytes::Bytes;
use media::flv::{decode_file_header, TagHeader, FLV_HEADER_SIZE, FLV_PREV_TAG_SIZE, FLV_TAG_HEADER_SIZE};
use media::packet::{MediaKind, MediaPacket};
use shared::error::{Error, Result};
use std::io::Read;

pub struct FlvTagStream<R: Read> {
    reader: R,
    header_read: bool,
}

impl<R: Read> FlvTagStream<R> {
    pub fn new(reader: R) -> Self {
        FlvTagStream {
            reader,
            header_read: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_file_header(&mut self) -> Result<()> {
        let mut header = [0u8; FLV_HEADER_SIZE];
        self.reader.read_exact(&mut header)?;
        decode_file_header(&header)?;
        self.header_read = true;
        Ok(())
    }

    /// Read the next tag as a media packet. Script tags carry timestamp 0.
    pub fn next_tag(&mut self) -> Result<MediaPacket> {
        if !self.header_read {
            self.read_file_header()?;
        }

        let mut prev = [0u8; FLV_PREV_TAG_SIZE];
        self.reader.read_exact(&mut prev)?;

        let mut header = [0u8; FLV_TAG_HEADER_SIZE];
        self.reader.read_exact(&mut header)?;
        let tag = TagHeader::decode(&header)?;

        let mut payload = vec![0u8; tag.data_size as usize];
        self.reader.read_exact(&mut payload)?;

        let kind = MediaKind::from_tag_type(tag.tag_type);
        if kind == MediaKind::Forbidden {
            return Err(Error::FlvDecode(format!("tag type {}", tag.tag_type)));
        }

        let timestamp = if kind == MediaKind::Script {
            0
        } else {
            tag.timestamp as i64
        };

        Ok(MediaPacket {
            timestamp,
            stream_id: tag.stream_id as i32,
            kind,
            payload: Bytes::from(payload),
        })
    }
}
