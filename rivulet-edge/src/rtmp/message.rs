use bytes::Bytes;
use media::packet::{MediaKind, MediaPacket};

pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_ACK: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
pub const MSG_DATA_AMF0: u8 = 18;
pub const MSG_COMMAND_AMF0: u8 = 20;
pub const MSG_AGGREGATE: u8 = 22;

/// One assembled RTMP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpMessage {
    pub message_type: u8,
    pub timestamp: u32,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl RtmpMessage {
    pub fn new(message_type: u8, timestamp: u32, stream_id: u32, payload: Bytes) -> Self {
        RtmpMessage {
            message_type,
            timestamp,
            stream_id,
            payload,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.message_type == MSG_AUDIO
    }

    pub fn is_video(&self) -> bool {
        self.message_type == MSG_VIDEO
    }

    pub fn is_command(&self) -> bool {
        self.message_type == MSG_COMMAND_AMF0
    }

    pub fn is_data(&self) -> bool {
        self.message_type == MSG_DATA_AMF0
    }

    pub fn is_aggregate(&self) -> bool {
        self.message_type == MSG_AGGREGATE
    }

    /// Media view of this message, when it carries media.
    pub fn to_media_packet(&self) -> Option<MediaPacket> {
        let kind = match self.message_type {
            MSG_AUDIO => MediaKind::Audio,
            MSG_VIDEO => MediaKind::Video,
            MSG_DATA_AMF0 => MediaKind::Script,
            _ => return None,
        };
        Some(MediaPacket {
            timestamp: self.timestamp as i64,
            stream_id: self.stream_id as i32,
            kind,
            payload: self.payload.clone(),
        })
    }
}
