#![warn(rust_2018_idioms)]

pub mod aac;
pub mod avc;
pub mod bits;
pub mod demux;
pub mod flv;
pub mod hevc;
pub mod nalu;
pub mod packet;
pub mod source;

pub use demux::FormatDemuxer;
pub use packet::{MediaKind, MediaPacket};
