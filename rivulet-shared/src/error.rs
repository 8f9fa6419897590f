use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Workspace-wide error type.
///
/// Decode errors are returned to the caller and never retried; `Timeout` and
/// `Io` on the edge-pull path are retried after backoff; `Interrupted` is the
/// distinguished cancellation value and aborts the surrounding loop.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("flv decode: {0}")]
    FlvDecode(String),
    #[error("avc decode: {0}")]
    AvcDecode(String),
    #[error("hevc decode: {0}")]
    HevcDecode(String),
    #[error("aac decode: {0}")]
    AacDecode(String),
    #[error("nalu is empty")]
    NaluEmpty,
    #[error("unsupported audio codec={0}")]
    UnsupportedAudioCodec(u8),
    #[error("unsupported video codec={0}")]
    UnsupportedVideoCodec(u8),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("rtp decode: {0}")]
    RtpDecode(String),
    #[error("rtp header extension id {0} not found")]
    ExtensionNotFound(u8),
    #[error("rtcp decode: {0}")]
    RtcpDecode(String),
    #[error("rtcp packet type {0} unknown")]
    RtcpUnknownType(u8),
    #[error("sdp decode: {0}")]
    SdpDecode(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("amf0 decode: {0}")]
    Amf0Decode(String),
    #[error("http: {0}")]
    Http(String),
    #[error("stream {0} is busy")]
    StreamBusy(String),
    #[error("connections exceed the limit {0}")]
    ExceedConnections(u32),
    #[error("republish requested")]
    Republish,
    #[error("redirected to {0}")]
    Redirected(String),

    #[error("thread interrupted")]
    Interrupted,
    #[error("i/o timeout")]
    Timeout,
    #[error("buffer too short: need {need}, left {left}")]
    BufferShort { need: usize, left: usize },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("utf8 error: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors the edge ingester retries after backoff instead of
    /// failing the stream.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Io(e) => !matches!(e.kind(), io::ErrorKind::InvalidData),
            _ => false,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
