#![warn(rust_2018_idioms)]

pub mod header;
pub mod packet;
pub mod packetizer;
pub mod payload;
pub mod sequence;

pub use header::{Extension, Header};
pub use packet::Packet;
pub use payload::Payload;
pub use sequence::Sequencer;

/// Target payload budget per RTP packet, leaving room for SRTP and headers
/// inside a typical path MTU.
pub const MAX_RTP_PAYLOAD: usize = 1200;

/// Chunk size used when fragmenting one NALU across FU packets.
pub const FU_PAYLOAD_SIZE: usize = 800;

/// RTP clock for video payloads.
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// RTP clock for Opus audio.
pub const OPUS_CLOCK_RATE: u32 = 48_000;
