//! RTMP chunk stream codec: basic/message headers fmt 0–3, extended
//! timestamps and message assembly across interleaved chunk streams.

use crate::rtmp::message::RtmpMessage;
use bytes::{Bytes, BytesMut};
use shared::error::{Error, Result};
use std::collections::HashMap;
use std::io::{Read, Write};

pub const DEFAULT_CHUNK_SIZE: usize = 128;
const EXTENDED_TIMESTAMP: u32 = 0xFFFFFF;

#[derive(Debug, Default)]
struct ChunkStreamState {
    timestamp: u32,
    timestamp_delta: u32,
    message_length: u32,
    message_type: u8,
    stream_id: u32,
    extended: bool,
    partial: BytesMut,
}

/// Stateful codec over one RTMP connection.
pub struct ChunkCodec {
    pub in_chunk_size: usize,
    pub out_chunk_size: usize,
    streams: HashMap<u32, ChunkStreamState>,
}

impl Default for ChunkCodec {
    fn default() -> Self {
        ChunkCodec {
            in_chunk_size: DEFAULT_CHUNK_SIZE,
            out_chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }
}

impl ChunkCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_u8(r: &mut impl Read) -> Result<u8> {
        let mut b = [0u8; 1];
        r.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn read_u24(r: &mut impl Read) -> Result<u32> {
        let mut b = [0u8; 3];
        r.read_exact(&mut b)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    fn read_u32(r: &mut impl Read) -> Result<u32> {
        let mut b = [0u8; 4];
        r.read_exact(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    /// Read chunks until one message completes.
    pub fn read_message(&mut self, r: &mut impl Read) -> Result<RtmpMessage> {
        loop {
            if let Some(msg) = self.read_chunk(r)? {
                return Ok(msg);
            }
        }
    }

    fn read_chunk(&mut self, r: &mut impl Read) -> Result<Option<RtmpMessage>> {
        let b0 = Self::read_u8(r)?;
        let fmt = b0 >> 6;
        let mut csid = (b0 & 0x3F) as u32;
        if csid == 0 {
            csid = 64 + Self::read_u8(r)? as u32;
        } else if csid == 1 {
            let b1 = Self::read_u8(r)? as u32;
            let b2 = Self::read_u8(r)? as u32;
            csid = 64 + b1 + b2 * 256;
        }

        let state = self.streams.entry(csid).or_default();

        match fmt {
            0 => {
                let ts = Self::read_u24(r)?;
                state.message_length = Self::read_u24(r)?;
                state.message_type = Self::read_u8(r)?;
                // message stream id is little-endian
                let mut sid = [0u8; 4];
                r.read_exact(&mut sid)?;
                state.stream_id = u32::from_le_bytes(sid);
                state.extended = ts == EXTENDED_TIMESTAMP;
                state.timestamp = if state.extended {
                    Self::read_u32(r)?
                } else {
                    ts
                };
                state.timestamp_delta = 0;
            }
            1 => {
                let delta = Self::read_u24(r)?;
                state.message_length = Self::read_u24(r)?;
                state.message_type = Self::read_u8(r)?;
                state.extended = delta == EXTENDED_TIMESTAMP;
                state.timestamp_delta = if state.extended {
                    Self::read_u32(r)?
                } else {
                    delta
                };
                state.timestamp = state.timestamp.wrapping_add(state.timestamp_delta);
            }
            2 => {
                let delta = Self::read_u24(r)?;
                state.extended = delta == EXTENDED_TIMESTAMP;
                state.timestamp_delta = if state.extended {
                    Self::read_u32(r)?
                } else {
                    delta
                };
                state.timestamp = state.timestamp.wrapping_add(state.timestamp_delta);
            }
            _ => {
                // fmt 3 continuation; a fresh chunk repeats the last delta
                if state.partial.is_empty() && state.timestamp_delta > 0 {
                    state.timestamp = state.timestamp.wrapping_add(state.timestamp_delta);
                }
                if state.extended {
                    Self::read_u32(r)?;
                }
            }
        }

        if state.message_type == 0 {
            return Err(Error::Protocol(format!(
                "chunk fmt {fmt} on csid {csid} without a message header"
            )));
        }

        let want = (state.message_length as usize - state.partial.len()).min(self.in_chunk_size);
        let mut payload = vec![0u8; want];
        r.read_exact(&mut payload)?;
        state.partial.extend_from_slice(&payload);

        if state.partial.len() == state.message_length as usize {
            let msg = RtmpMessage {
                message_type: state.message_type,
                timestamp: state.timestamp,
                stream_id: state.stream_id,
                payload: state.partial.split().freeze(),
            };
            return Ok(Some(msg));
        }
        Ok(None)
    }

    /// Write a message as an fmt-0 chunk plus fmt-3 continuations.
    pub fn write_message(
        &mut self,
        w: &mut impl Write,
        csid: u32,
        msg: &RtmpMessage,
    ) -> Result<()> {
        debug_assert!(csid >= 2 && csid <= 63, "only one-byte basic headers");

        let extended = msg.timestamp >= EXTENDED_TIMESTAMP;
        let ts_field = if extended {
            EXTENDED_TIMESTAMP
        } else {
            msg.timestamp
        };

        let mut header = Vec::with_capacity(16);
        header.push(csid as u8);
        header.extend_from_slice(&ts_field.to_be_bytes()[1..]);
        header.extend_from_slice(&(msg.payload.len() as u32).to_be_bytes()[1..]);
        header.push(msg.message_type);
        header.extend_from_slice(&msg.stream_id.to_le_bytes());
        if extended {
            header.extend_from_slice(&msg.timestamp.to_be_bytes());
        }
        w.write_all(&header)?;

        let mut offset = 0usize;
        while offset < msg.payload.len() {
            if offset > 0 {
                w.write_all(&[0xC0 | csid as u8])?;
                if extended {
                    w.write_all(&msg.timestamp.to_be_bytes())?;
                }
            }
            let end = (offset + self.out_chunk_size).min(msg.payload.len());
            w.write_all(&msg.payload[offset..end])?;
            offset = end;
        }
        w.flush()?;
        Ok(())
    }

    pub fn set_in_chunk_size(&mut self, size: usize) {
        self.in_chunk_size = size;
    }
}
