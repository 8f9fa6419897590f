//! Live stream fanout: one publisher feeds N consumers through bounded
//! queues.

use crate::demux::FormatDemuxer;
use crate::flv::{TagHeader, FLV_PREV_TAG_SIZE, FLV_TAG_HEADER_SIZE};
use crate::packet::{MediaKind, MediaPacket};
use log::warn;
use shared::error::Result;
use std::collections::{HashMap, VecDeque};

/// Default queue bound as a wall-clock span of packet timestamps.
pub const DEFAULT_QUEUE_SPAN_MS: i64 = 10_000;

/// Frame-type nibble probe on an FLV video tag body, ext-header aware.
pub fn is_video_keyframe(payload: &[u8]) -> bool {
    if payload.is_empty() {
        return false;
    }
    let b = payload[0];
    let frame_type = if b & 0x80 != 0 {
        (b >> 4) & 0x07
    } else {
        (b >> 4) & 0x0F
    };
    frame_type == 1
}

/// Consumer-side queue bounded by wall-clock span.
///
/// Overflow drops non-keyframe video first, then audio, then keyframe
/// video; script/metadata packets are never dropped.
#[derive(Debug)]
pub struct SourceQueue {
    max_span_ms: i64,
    packets: VecDeque<MediaPacket>,
}

impl SourceQueue {
    pub fn new(max_span_ms: i64) -> Self {
        SourceQueue {
            max_span_ms,
            packets: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    fn span_ms(&self) -> i64 {
        match (self.packets.front(), self.packets.back()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        }
    }

    pub fn push(&mut self, pkt: MediaPacket) {
        self.packets.push_back(pkt);
        while self.span_ms() > self.max_span_ms {
            if !self.shrink() {
                break;
            }
        }
    }

    pub fn pop(&mut self) -> Option<MediaPacket> {
        self.packets.pop_front()
    }

    fn drop_first_matching(&mut self, pred: impl Fn(&MediaPacket) -> bool) -> bool {
        if let Some(idx) = self.packets.iter().position(pred) {
            self.packets.remove(idx);
            return true;
        }
        false
    }

    fn shrink(&mut self) -> bool {
        if self.drop_first_matching(|p| p.is_video() && !is_video_keyframe(&p.payload)) {
            return true;
        }
        if self.drop_first_matching(|p| p.is_audio()) {
            return true;
        }
        self.drop_first_matching(|p| p.is_video())
    }
}

/// Fanout point for one published stream.
///
/// Caches metadata plus the audio and video sequence headers so a late
/// consumer can start decoding immediately, and distributes packets to all
/// consumer queues in arrival order.
pub struct LiveSource {
    pub stream_url: String,
    format: FormatDemuxer,
    metadata: Option<MediaPacket>,
    audio_sh: Option<MediaPacket>,
    video_sh: Option<MediaPacket>,
    consumers: HashMap<u32, SourceQueue>,
    next_consumer: u32,
    queue_span_ms: i64,
    has_publisher: bool,
}

impl LiveSource {
    pub fn new(stream_url: impl Into<String>) -> Self {
        LiveSource {
            stream_url: stream_url.into(),
            format: FormatDemuxer::new(),
            metadata: None,
            audio_sh: None,
            video_sh: None,
            consumers: HashMap::new(),
            next_consumer: 0,
            queue_span_ms: DEFAULT_QUEUE_SPAN_MS,
            has_publisher: false,
        }
    }

    pub fn set_queue_span_ms(&mut self, span_ms: i64) {
        self.queue_span_ms = span_ms;
    }

    pub fn format(&self) -> &FormatDemuxer {
        &self.format
    }

    pub fn has_publisher(&self) -> bool {
        self.has_publisher
    }

    pub fn on_publish(&mut self) {
        self.has_publisher = true;
    }

    pub fn on_unpublish(&mut self) {
        self.has_publisher = false;
        self.metadata = None;
        self.audio_sh = None;
        self.video_sh = None;
        self.format = FormatDemuxer::new();
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Register a consumer and replay the cached config packets into its
    /// queue.
    pub fn create_consumer(&mut self) -> u32 {
        let id = self.next_consumer;
        self.next_consumer += 1;

        let mut queue = SourceQueue::new(self.queue_span_ms);
        if let Some(meta) = &self.metadata {
            queue.push(meta.clone());
        }
        if let Some(sh) = &self.audio_sh {
            queue.push(sh.clone());
        }
        if let Some(sh) = &self.video_sh {
            queue.push(sh.clone());
        }
        self.consumers.insert(id, queue);
        id
    }

    pub fn destroy_consumer(&mut self, id: u32) {
        self.consumers.remove(&id);
    }

    pub fn poll(&mut self, consumer: u32) -> Option<MediaPacket> {
        self.consumers.get_mut(&consumer)?.pop()
    }

    pub fn on_audio(&mut self, pkt: MediaPacket) -> Result<()> {
        // codec failures drop the frame, not the stream
        if let Err(e) = self.format.on_audio(pkt.timestamp, pkt.payload.clone()) {
            warn!("drop audio frame: {e}");
            return Ok(());
        }
        if self.format.is_aac_sequence_header() {
            self.audio_sh = Some(pkt.clone());
        }
        self.fanout(pkt);
        Ok(())
    }

    pub fn on_video(&mut self, pkt: MediaPacket) -> Result<()> {
        if let Err(e) = self.format.on_video(pkt.timestamp, pkt.payload.clone()) {
            warn!("drop video frame: {e}");
            return Ok(());
        }
        if self.format.is_avc_sequence_header() {
            self.video_sh = Some(pkt.clone());
        }
        self.fanout(pkt);
        Ok(())
    }

    pub fn on_meta_data(&mut self, pkt: MediaPacket) -> Result<()> {
        self.metadata = Some(pkt.clone());
        self.fanout(pkt);
        Ok(())
    }

    /// Split an RTMP aggregate message into its sub-messages and dispatch
    /// each. Sub-message layout matches an FLV tag plus a 4-byte
    /// back-pointer.
    pub fn on_aggregate(&mut self, pkt: MediaPacket) -> Result<()> {
        let payload = &pkt.payload;
        let mut pos = 0usize;
        let mut base_ts: Option<i64> = None;

        while payload.len() - pos >= FLV_TAG_HEADER_SIZE {
            let header = TagHeader::decode(&payload[pos..])?;
            pos += FLV_TAG_HEADER_SIZE;
            if payload.len() - pos < header.data_size as usize {
                break;
            }
            let body = payload.slice(pos..pos + header.data_size as usize);
            pos += header.data_size as usize;
            // back-pointer
            pos = (pos + FLV_PREV_TAG_SIZE).min(payload.len());

            // the first sub-message carries the absolute timestamp
            let delta = match base_ts {
                Some(base) => header.timestamp as i64 - base,
                None => {
                    base_ts = Some(header.timestamp as i64);
                    0
                }
            };

            let sub = MediaPacket {
                timestamp: pkt.timestamp + delta,
                stream_id: pkt.stream_id,
                kind: MediaKind::from_tag_type(header.tag_type),
                payload: body,
            };
            match sub.kind {
                MediaKind::Audio => self.on_audio(sub)?,
                MediaKind::Video => self.on_video(sub)?,
                MediaKind::Script => self.on_meta_data(sub)?,
                MediaKind::Forbidden => {}
            }
        }
        Ok(())
    }

    /// Cached sequence headers, for sessions that attach mid-stream.
    pub fn cached_video_sh(&self) -> Option<&MediaPacket> {
        self.video_sh.as_ref()
    }

    pub fn cached_audio_sh(&self) -> Option<&MediaPacket> {
        self.audio_sh.as_ref()
    }

    fn fanout(&mut self, pkt: MediaPacket) {
        for queue in self.consumers.values_mut() {
            queue.push(pkt.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn video(ts: i64, key: bool) -> MediaPacket {
        let b: &'static [u8] = if key {
            &[0x17, 0x01, 0, 0, 0, 0xAA]
        } else {
            &[0x27, 0x01, 0, 0, 0, 0xBB]
        };
        MediaPacket::new(MediaKind::Video, ts, Bytes::from_static(b))
    }

    fn audio(ts: i64) -> MediaPacket {
        MediaPacket::new(MediaKind::Audio, ts, Bytes::from_static(&[0xAF, 0x01, 0x21]))
    }

    fn script(ts: i64) -> MediaPacket {
        MediaPacket::new(MediaKind::Script, ts, Bytes::from_static(&[0x02]))
    }

    #[test]
    fn test_queue_drop_ladder() {
        let mut q = SourceQueue::new(1000);
        q.push(script(0));
        q.push(video(0, true));
        q.push(video(500, false));
        q.push(audio(600));
        assert_eq!(q.len(), 4);

        // span 0..2000 overflows: inter frame goes first
        q.push(video(2000, false));
        let kinds: Vec<_> = q.packets.iter().map(|p| p.payload[0]).collect();
        assert!(!kinds.contains(&0x27) || q.span_ms() <= 1000);

        // keep pushing far ahead: audio goes, then keyframes, script never
        q.push(video(5000, true));
        q.push(video(9000, true));
        assert!(q.packets.iter().any(|p| p.is_script()));
    }

    #[test]
    fn test_queue_metadata_never_dropped() {
        let mut q = SourceQueue::new(100);
        q.push(script(0));
        for i in 0..50 {
            q.push(video(i * 1000, false));
        }
        assert!(q.packets.iter().any(|p| p.is_script()));
    }

    #[test]
    fn test_fanout_order_and_replay() {
        let mut source = LiveSource::new("/live/livestream");
        source.on_publish();

        // publish a metadata packet before anyone subscribes
        source.on_meta_data(script(0)).unwrap();

        let a = source.create_consumer();
        // late joiner still sees the metadata
        let first = source.poll(a).unwrap();
        assert!(first.is_script());

        source.on_video(video(40, true)).unwrap();
        source.on_video(video(80, false)).unwrap();
        assert_eq!(source.poll(a).unwrap().timestamp, 40);
        assert_eq!(source.poll(a).unwrap().timestamp, 80);
        assert!(source.poll(a).is_none());

        source.destroy_consumer(a);
        assert_eq!(source.consumer_count(), 0);
    }

    #[test]
    fn test_aggregate_dispatch() {
        use bytes::{BufMut, BytesMut};

        let mut source = LiveSource::new("/live/agg");
        let c = source.create_consumer();

        let mut agg = BytesMut::new();
        for (tag_type, ts, body) in [
            (8u8, 100u32, &[0xAF, 0x01, 0x21][..]),
            (9u8, 140u32, &[0x27, 0x01, 0, 0, 0, 0xBB][..]),
        ] {
            let header = TagHeader {
                tag_type,
                data_size: body.len() as u32,
                timestamp: ts,
                stream_id: 0,
            };
            agg.put_slice(&header.encode());
            agg.put_slice(body);
            agg.put_u32(FLV_TAG_HEADER_SIZE as u32 + body.len() as u32);
        }

        let pkt = MediaPacket::new(MediaKind::Video, 100, agg.freeze());
        source.on_aggregate(pkt).unwrap();

        let first = source.poll(c).unwrap();
        assert!(first.is_audio());
        assert_eq!(first.timestamp, 100);
        let second = source.poll(c).unwrap();
        assert!(second.is_video());
        // 40ms delta against the aggregate base
        assert_eq!(second.timestamp, 140);
    }
}
