use super::*;
use crate::amf::Amf0Value;
use crate::config::Origin;
use bytes::Bytes;
use media::packet::MediaPacket;
use std::collections::VecDeque;
use std::time::Duration;

/// Upstream double fed from a scripted message list.
struct MockUpstream {
    script: VecDeque<Result<UpstreamMessage>>,
    connects: usize,
    fail_connects: usize,
    selected: Option<Origin>,
    redirect: Option<String>,
}

impl MockUpstream {
    fn new(script: Vec<Result<UpstreamMessage>>) -> Self {
        MockUpstream {
            script: script.into(),
            connects: 0,
            fail_connects: 0,
            selected: None,
            redirect: None,
        }
    }
}

impl EdgeUpstream for MockUpstream {
    fn connect(&mut self, _request: &PullRequest, lb: &RoundRobinLb) -> Result<()> {
        self.connects += 1;
        self.selected = match self.redirect.take() {
            Some(url) => Some(Origin {
                host: url,
                port: 0,
            }),
            None => lb.select(),
        };
        if self.fail_connects > 0 {
            self.fail_connects -= 1;
            return Err(Error::Timeout);
        }
        Ok(())
    }

    fn recv_message(&mut self) -> Result<UpstreamMessage> {
        self.script.pop_front().unwrap_or(Err(Error::Timeout))
    }

    fn set_recv_timeout(&mut self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }

    fn kbps_sample(&mut self) -> (u64, u64) {
        (0, 0)
    }

    fn selected(&self) -> Option<Origin> {
        self.selected.clone()
    }

    fn set_redirect(&mut self, url: Option<String>) {
        self.redirect = url;
    }

    fn close(&mut self) {}
}

fn audio(ts: i64) -> UpstreamMessage {
    UpstreamMessage::Media(MediaPacket::new(
        MediaKind::Audio,
        ts,
        Bytes::from_static(&[0xAF, 0x01, 0x21]),
    ))
}

fn video(ts: i64) -> UpstreamMessage {
    UpstreamMessage::Media(MediaPacket::new(
        MediaKind::Video,
        ts,
        Bytes::from_static(&[0x27, 0x01, 0, 0, 0, 0xBB]),
    ))
}

fn unpublish() -> UpstreamMessage {
    UpstreamMessage::Command {
        name: "onStatus".into(),
        values: vec![
            Amf0Value::String("onStatus".into()),
            Amf0Value::Number(0.0),
            Amf0Value::Null,
            Amf0Value::Object(vec![(
                "code".into(),
                Amf0Value::String("NetStream.Play.UnpublishNotify".into()),
            )]),
        ],
    }
}

fn build_ingester(script: Vec<Result<UpstreamMessage>>) -> EdgeIngester {
    let lb = RoundRobinLb::new(vec![
        Origin {
            host: "a".into(),
            port: 1935,
        },
        Origin {
            host: "b".into(),
            port: 1935,
        },
    ]);
    EdgeIngester::new(
        Box::new(MockUpstream::new(script)),
        lb,
        PullRequest {
            app: "live".into(),
            stream: "livestream".into(),
            ..Default::default()
        },
        Duration::from_secs(30),
    )
}

#[test]
fn test_state_machine_lifecycle() {
    let mut ingester = build_ingester(vec![]);
    let mut edge = PlayEdge::new();
    assert_eq!(edge.state(), EdgeState::Init);

    edge.on_client_play(&mut ingester).unwrap();
    assert_eq!(edge.state(), EdgeState::Play);
    assert!(ingester.is_started());

    // repeated client plays keep the state
    edge.on_client_play(&mut ingester).unwrap();
    assert_eq!(edge.state(), EdgeState::Play);

    edge.on_ingest_play().unwrap();
    assert_eq!(edge.state(), EdgeState::IngestConnected);
    // idempotent
    edge.on_ingest_play().unwrap();
    assert_eq!(edge.state(), EdgeState::IngestConnected);

    edge.on_all_client_stop(&mut ingester);
    assert_eq!(edge.state(), EdgeState::Init);
    assert!(!ingester.is_started());
}

#[test]
fn test_ingest_forwards_media_until_unpublish() {
    let mut ingester = build_ingester(vec![
        Ok(audio(0)),
        Ok(video(40)),
        Ok(unpublish()),
    ]);
    let mut edge = PlayEdge::new();
    edge.on_client_play(&mut ingester).unwrap();

    let mut source = LiveSource::new("/live/livestream");
    let consumer = source.create_consumer();

    ingester.ingest_once(&mut source, &mut edge).unwrap();
    assert_eq!(edge.state(), EdgeState::IngestConnected);

    let first = source.poll(consumer).unwrap();
    assert!(first.is_audio());
    let second = source.poll(consumer).unwrap();
    assert!(second.is_video());
    assert!(source.poll(consumer).is_none());
}

#[test]
fn test_recv_timeout_is_transient() {
    let mut ingester = build_ingester(vec![Ok(audio(0)), Err(Error::Timeout)]);
    let mut edge = PlayEdge::new();
    edge.on_client_play(&mut ingester).unwrap();

    let mut source = LiveSource::new("/live/livestream");
    let err = ingester.ingest_once(&mut source, &mut edge).unwrap_err();
    assert_eq!(err, Error::Timeout);
    assert!(EdgeIngester::should_reconnect(&err));
    // decode errors are not retried
    assert!(!EdgeIngester::should_reconnect(&Error::AvcDecode(
        "x".into()
    )));
}

#[test]
fn test_interrupt_aborts_ingest() {
    let mut ingester = build_ingester(vec![Ok(audio(0))]);
    let mut edge = PlayEdge::new();
    edge.on_client_play(&mut ingester).unwrap();

    let trd = ingester.interrupt_handle();
    trd.interrupt();

    let mut source = LiveSource::new("/live/livestream");
    let err = ingester.ingest_once(&mut source, &mut edge).unwrap_err();
    assert_eq!(err, Error::Interrupted);
}

#[test]
fn test_stop_interrupts_and_reconnect_advances_lb() {
    let mut ingester = build_ingester(vec![]);
    let mut edge = PlayEdge::new();
    edge.on_client_play(&mut ingester).unwrap();

    let mut source = LiveSource::new("/live/livestream");
    // first pass picks origin "a" then times out on recv
    let err = ingester.ingest_once(&mut source, &mut edge).unwrap_err();
    assert_eq!(err, Error::Timeout);

    // the next pass advances the round robin to "b"
    let _ = ingester.ingest_once(&mut source, &mut edge);
    assert_eq!(ingester.upstream.selected().unwrap().host, "b");

    edge.on_all_client_stop(&mut ingester);
    let err = ingester.ingest_once(&mut source, &mut edge).unwrap_err();
    assert_eq!(err, Error::Interrupted);
}
