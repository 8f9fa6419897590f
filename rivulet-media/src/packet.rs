use bytes::Bytes;

/// Message kind on the RTMP/FLV side, i.e. the FLV tag type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaKind {
    #[default]
    Forbidden,
    Audio,
    Video,
    Script,
}

impl MediaKind {
    pub fn from_tag_type(v: u8) -> MediaKind {
        match v {
            8 => MediaKind::Audio,
            9 => MediaKind::Video,
            18 => MediaKind::Script,
            _ => MediaKind::Forbidden,
        }
    }

    pub fn tag_type(&self) -> u8 {
        match self {
            MediaKind::Audio => 8,
            MediaKind::Video => 9,
            MediaKind::Script => 18,
            MediaKind::Forbidden => 0,
        }
    }
}

/// A timestamped, type-tagged byte block.
///
/// The payload is a reference-counted [`Bytes`] handle: cloning the packet is
/// cheap and any component that wants to keep the bytes past the current call
/// clones the handle. The payload is immutable once wrapped; mutation
/// requires a deep copy.
#[derive(Debug, Clone, Default)]
pub struct MediaPacket {
    /// Milliseconds.
    pub timestamp: i64,
    pub stream_id: i32,
    pub kind: MediaKind,
    pub payload: Bytes,
}

impl MediaPacket {
    pub fn new(kind: MediaKind, timestamp: i64, payload: Bytes) -> Self {
        MediaPacket {
            timestamp,
            stream_id: 0,
            kind,
            payload,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.kind == MediaKind::Audio
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn is_script(&self) -> bool {
        self.kind == MediaKind::Script
    }
}
