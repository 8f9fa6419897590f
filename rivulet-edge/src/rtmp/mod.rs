//! Minimal RTMP client stack: plain handshake, chunk stream codec and the
//! command flow a pull/publish edge needs.

pub mod chunk;
pub mod client;
pub mod handshake;
pub mod message;

pub use chunk::ChunkCodec;
pub use client::SimpleRtmpClient;
pub use message::RtmpMessage;
