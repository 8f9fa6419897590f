//! Simple RTMP client: connect, createStream, play/publish and the message
//! pump, over any blocking transport.

use crate::amf::{decode_values, encode_values, Amf0Value};
use crate::rtmp::chunk::ChunkCodec;
use crate::rtmp::handshake::client_handshake;
use crate::rtmp::message::{
    RtmpMessage, MSG_ACK, MSG_COMMAND_AMF0, MSG_SET_CHUNK_SIZE, MSG_SET_PEER_BANDWIDTH,
    MSG_USER_CONTROL, MSG_WINDOW_ACK_SIZE,
};
use bytes::Bytes;
use log::{debug, warn};
use shared::error::{Error, Result};
use std::io::{Read, Write};

const COMMAND_CSID: u32 = 3;

/// Transport wrapper counting bytes for kbps sampling.
struct CountingIo<T> {
    inner: T,
    bytes_in: u64,
    bytes_out: u64,
}

impl<T: Read> Read for CountingIo<T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_in += n as u64;
        Ok(n)
    }
}

impl<T: Write> Write for CountingIo<T> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes_out += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

pub struct SimpleRtmpClient<T: Read + Write> {
    io: CountingIo<T>,
    chunk: ChunkCodec,
    next_transaction: f64,
    stream_id: u32,
    last_sample: (u64, u64),
}

impl<T: Read + Write> SimpleRtmpClient<T> {
    /// Handshake on a fresh transport.
    pub fn connect(transport: T) -> Result<Self> {
        let mut io = CountingIo {
            inner: transport,
            bytes_in: 0,
            bytes_out: 0,
        };
        client_handshake(&mut io)?;
        Ok(SimpleRtmpClient {
            io,
            chunk: ChunkCodec::new(),
            next_transaction: 1.0,
            stream_id: 0,
            last_sample: (0, 0),
        })
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    fn send_command(&mut self, values: &[Amf0Value], stream_id: u32) -> Result<()> {
        let payload = encode_values(values);
        let msg = RtmpMessage::new(MSG_COMMAND_AMF0, 0, stream_id, payload);
        self.chunk.write_message(&mut self.io, COMMAND_CSID, &msg)
    }

    fn take_transaction(&mut self) -> f64 {
        let tid = self.next_transaction;
        self.next_transaction += 1.0;
        tid
    }

    /// Issue `connect(app)` and wait for the `_result`.
    pub fn connect_app(&mut self, app: &str, tc_url: &str) -> Result<()> {
        let tid = self.take_transaction();
        self.send_command(
            &[
                Amf0Value::String("connect".into()),
                Amf0Value::Number(tid),
                Amf0Value::Object(vec![
                    ("app".into(), Amf0Value::String(app.into())),
                    ("flashVer".into(), Amf0Value::String("WIN 15,0,0,239".into())),
                    ("tcUrl".into(), Amf0Value::String(tc_url.into())),
                    ("fpad".into(), Amf0Value::Boolean(false)),
                    ("objectEncoding".into(), Amf0Value::Number(0.0)),
                ]),
            ],
            0,
        )?;
        let values = self.expect_command("_result")?;
        // a redirect in the info object overrides the next connect
        if let Some(info) = values.get(3) {
            if let Some(redirect) = info.get("redirect").and_then(|v| v.as_str()) {
                return Err(Error::Redirected(redirect.to_string()));
            }
        }
        Ok(())
    }

    /// Issue `createStream` and remember the answered stream id.
    pub fn create_stream(&mut self) -> Result<u32> {
        let tid = self.take_transaction();
        self.send_command(
            &[
                Amf0Value::String("createStream".into()),
                Amf0Value::Number(tid),
                Amf0Value::Null,
            ],
            0,
        )?;
        let values = self.expect_command("_result")?;
        let sid = values
            .get(3)
            .and_then(|v| v.as_number())
            .ok_or_else(|| Error::Protocol("createStream without stream id".into()))?;
        self.stream_id = sid as u32;
        Ok(self.stream_id)
    }

    /// Start playing; returns the stream name the origin acknowledged.
    pub fn play(&mut self, stream: &str, chunk_size: usize) -> Result<String> {
        // negotiate our inbound chunk size
        let msg = RtmpMessage::new(
            MSG_SET_CHUNK_SIZE,
            0,
            0,
            Bytes::copy_from_slice(&(chunk_size as u32).to_be_bytes()),
        );
        self.chunk.write_message(&mut self.io, 2, &msg)?;

        let tid = self.take_transaction();
        self.send_command(
            &[
                Amf0Value::String("play".into()),
                Amf0Value::Number(tid),
                Amf0Value::Null,
                Amf0Value::String(stream.into()),
            ],
            self.stream_id,
        )?;

        // the origin acknowledges with onStatus NetStream.Play.Start
        let values = self.expect_command("onStatus")?;
        let acked = values
            .get(3)
            .and_then(|info| info.get("details"))
            .and_then(|v| v.as_str())
            .unwrap_or(stream);
        Ok(acked.to_string())
    }

    /// Start publishing to the origin.
    pub fn publish(&mut self, stream: &str) -> Result<()> {
        let tid = self.take_transaction();
        self.send_command(
            &[
                Amf0Value::String("publish".into()),
                Amf0Value::Number(tid),
                Amf0Value::Null,
                Amf0Value::String(stream.into()),
                Amf0Value::String("live".into()),
            ],
            self.stream_id,
        )?;
        self.expect_command("onStatus")?;
        Ok(())
    }

    /// Send one media message to the origin.
    pub fn send_message(&mut self, msg: &RtmpMessage) -> Result<()> {
        let csid = if msg.is_audio() { 6 } else { 7 };
        self.chunk.write_message(&mut self.io, csid, msg)
    }

    /// Pump one message, absorbing protocol control messages.
    pub fn recv_message(&mut self) -> Result<RtmpMessage> {
        loop {
            let msg = self.chunk.read_message(&mut self.io)?;
            match msg.message_type {
                MSG_SET_CHUNK_SIZE => {
                    if msg.payload.len() >= 4 {
                        let size = u32::from_be_bytes([
                            msg.payload[0],
                            msg.payload[1],
                            msg.payload[2],
                            msg.payload[3],
                        ]);
                        debug!("peer set chunk size {size}");
                        self.chunk.set_in_chunk_size(size as usize);
                    }
                }
                MSG_ACK | MSG_WINDOW_ACK_SIZE | MSG_SET_PEER_BANDWIDTH | MSG_USER_CONTROL => {
                    debug!("ignore protocol control type={}", msg.message_type);
                }
                _ => return Ok(msg),
            }
        }
    }

    /// Decode a command message into its AMF0 values.
    pub fn decode_command(msg: &RtmpMessage) -> Result<Vec<Amf0Value>> {
        if !msg.is_command() {
            return Err(Error::Protocol(format!(
                "message type {} is not a command",
                msg.message_type
            )));
        }
        decode_values(msg.payload.clone())
    }

    fn expect_command(&mut self, name: &str) -> Result<Vec<Amf0Value>> {
        loop {
            let msg = self.recv_message()?;
            if !msg.is_command() {
                warn!("ignore type={} while waiting for {name}", msg.message_type);
                continue;
            }
            let values = decode_values(msg.payload.clone())?;
            match values.first().and_then(|v| v.as_str()) {
                Some(got) if got == name => return Ok(values),
                Some("onStatus") if name != "onStatus" => {
                    // unexpected status while waiting for a result
                    return Err(Error::Protocol("unexpected onStatus".into()));
                }
                _ => continue,
            }
        }
    }

    /// Bytes in/out since the previous sample.
    pub fn kbps_sample(&mut self) -> (u64, u64) {
        let delta = (
            self.io.bytes_in - self.last_sample.0,
            self.io.bytes_out - self.last_sample.1,
        );
        self.last_sample = (self.io.bytes_in, self.io.bytes_out);
        delta
    }

    pub fn into_inner(self) -> T {
        self.io.inner
    }
}
