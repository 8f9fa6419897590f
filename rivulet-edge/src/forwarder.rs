//! Publish edge: queue messages destined for the origin and drain them
//! through an RTMP client connection.

use log::warn;
use media::packet::MediaPacket;
use media::source::is_video_keyframe;
use shared::error::Result;
use std::collections::VecDeque;

/// Default queue bound as a wall-clock span of packet timestamps.
pub const DEFAULT_FORWARD_SPAN_MS: i64 = 10_000;

/// Sink toward the origin, usually a connected `SimpleRtmpClient`.
pub trait PublishSink {
    fn send_media(&mut self, pkt: &MediaPacket) -> Result<()>;
}

/// Duration-bounded forward queue. On overflow the oldest audio drops
/// first, then video non-keyframes; metadata and keyframes stay.
pub struct EdgeForwarder {
    queue: VecDeque<MediaPacket>,
    max_span_ms: i64,
    dropped: u64,
}

impl Default for EdgeForwarder {
    fn default() -> Self {
        EdgeForwarder {
            queue: VecDeque::new(),
            max_span_ms: DEFAULT_FORWARD_SPAN_MS,
            dropped: 0,
        }
    }
}

impl EdgeForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_queue_size(&mut self, span_ms: i64) {
        self.max_span_ms = span_ms;
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn span_ms(&self) -> i64 {
        match (self.queue.front(), self.queue.back()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        }
    }

    /// Enqueue one publish message.
    pub fn proxy(&mut self, pkt: MediaPacket) {
        self.queue.push_back(pkt);
        while self.span_ms() > self.max_span_ms {
            if !self.shrink() {
                break;
            }
        }
    }

    fn drop_first_matching(&mut self, pred: impl Fn(&MediaPacket) -> bool) -> bool {
        if let Some(idx) = self.queue.iter().position(pred) {
            self.queue.remove(idx);
            self.dropped += 1;
            return true;
        }
        false
    }

    fn shrink(&mut self) -> bool {
        if self.drop_first_matching(|p| p.is_audio()) {
            return true;
        }
        if self.drop_first_matching(|p| p.is_video() && !is_video_keyframe(&p.payload)) {
            return true;
        }
        warn!("forward queue over budget with only keyframes and metadata");
        false
    }

    /// Send everything queued through the sink, in order.
    pub fn drain(&mut self, sink: &mut dyn PublishSink) -> Result<usize> {
        let mut sent = 0usize;
        while let Some(pkt) = self.queue.front() {
            sink.send_media(pkt)?;
            self.queue.pop_front();
            sent += 1;
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use media::packet::MediaKind;

    fn video(ts: i64, key: bool) -> MediaPacket {
        let b: &'static [u8] = if key {
            &[0x17, 0x01, 0, 0, 0, 0xAA]
        } else {
            &[0x27, 0x01, 0, 0, 0, 0xBB]
        };
        MediaPacket::new(MediaKind::Video, ts, Bytes::from_static(b))
    }

    fn audio(ts: i64) -> MediaPacket {
        MediaPacket::new(MediaKind::Audio, ts, Bytes::from_static(&[0xAF, 0x01]))
    }

    struct CollectSink(Vec<i64>);

    impl PublishSink for CollectSink {
        fn send_media(&mut self, pkt: &MediaPacket) -> Result<()> {
            self.0.push(pkt.timestamp);
            Ok(())
        }
    }

    #[test]
    fn test_forward_in_order() {
        let mut forwarder = EdgeForwarder::new();
        forwarder.proxy(video(0, true));
        forwarder.proxy(audio(10));
        forwarder.proxy(video(40, false));

        let mut sink = CollectSink(Vec::new());
        let sent = forwarder.drain(&mut sink).unwrap();
        assert_eq!(sent, 3);
        assert_eq!(sink.0, vec![0, 10, 40]);
        assert_eq!(forwarder.queue_len(), 0);
    }

    #[test]
    fn test_overflow_drops_audio_first() {
        let mut forwarder = EdgeForwarder::new();
        forwarder.set_queue_size(1000);
        forwarder.proxy(video(0, true));
        forwarder.proxy(audio(100));
        forwarder.proxy(video(200, false));

        forwarder.proxy(video(2000, false));
        // the oldest audio went before any video
        assert!(forwarder.queue.iter().all(|p| !p.is_audio()));
        assert_eq!(forwarder.dropped(), 1);
    }

    #[test]
    fn test_overflow_then_drops_inter_frames() {
        let mut forwarder = EdgeForwarder::new();
        forwarder.set_queue_size(1000);
        forwarder.proxy(video(0, true));
        forwarder.proxy(video(100, false));
        forwarder.proxy(video(5000, false));
        // only one span-busting push; the non-key frame went
        assert!(forwarder
            .queue
            .iter()
            .filter(|p| p.is_video())
            .all(|p| is_video_keyframe(&p.payload) || p.timestamp == 5000));
    }

    #[test]
    fn test_keyframes_survive() {
        let mut forwarder = EdgeForwarder::new();
        forwarder.set_queue_size(100);
        forwarder.proxy(video(0, true));
        forwarder.proxy(video(10_000, true));
        assert_eq!(forwarder.queue_len(), 2);
    }
}
