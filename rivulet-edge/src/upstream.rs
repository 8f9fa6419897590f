//! Abstract upstream readers for the play edge: RTMP and HTTP-FLV.

use crate::amf::Amf0Value;
use crate::config::Origin;
use crate::flv_stream::FlvTagStream;
use crate::http::{read_response_head, write_get, BodyReader};
use crate::lb::RoundRobinLb;
use crate::rtmp::SimpleRtmpClient;
use crate::rtmp::message::MSG_AGGREGATE;
use log::{debug, info};
use media::packet::{MediaKind, MediaPacket};
use shared::error::{Error, Result};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Chunk size negotiated toward the origin on play.
const PULL_CHUNK_SIZE: usize = 60_000;

/// Blocking transport with a recv deadline.
pub trait Transport: Read + Write {
    fn set_recv_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;
}

/// TCP transport for production wiring.
pub struct TcpTransport(pub std::net::TcpStream);

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl Transport for TcpTransport {
    fn set_recv_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.0.set_read_timeout(timeout)?;
        Ok(())
    }
}

/// Opens a transport toward one origin.
pub type Connector =
    Box<dyn FnMut(&str, u16, Duration) -> Result<Box<dyn Transport>> + Send>;

/// What the local node asked the origin for.
#[derive(Debug, Clone, Default)]
pub struct PullRequest {
    pub vhost: String,
    pub app: String,
    pub stream: String,
    /// Query string, `?`-prefixed when non-empty.
    pub params: String,
}

impl PullRequest {
    pub fn flv_path(&self) -> String {
        format!("/{}/{}.flv{}", self.app, self.stream, self.params)
    }

    pub fn tc_url(&self, host: &str, port: u16) -> String {
        // a named vhost rides the tcUrl so the origin can route by it
        if self.vhost.is_empty() || self.vhost == "__defaultVhost__" {
            format!("rtmp://{host}:{port}/{}", self.app)
        } else {
            format!("rtmp://{host}:{port}/{}?vhost={}", self.app, self.vhost)
        }
    }

    pub fn stream_url(&self) -> String {
        format!("/{}/{}", self.app, self.stream)
    }
}

/// One message pulled from the origin.
#[derive(Debug)]
pub enum UpstreamMessage {
    /// Audio, video or script data.
    Media(MediaPacket),
    /// RTMP aggregate to be split by the source.
    Aggregate(MediaPacket),
    /// AMF0 command, e.g. onStatus.
    Command { name: String, values: Vec<Amf0Value> },
}

pub trait EdgeUpstream {
    /// Connect to the next origin (or a pending redirect) and start the
    /// stream.
    fn connect(&mut self, request: &PullRequest, lb: &RoundRobinLb) -> Result<()>;
    fn recv_message(&mut self) -> Result<UpstreamMessage>;
    fn set_recv_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;
    /// Bytes in/out since the previous sample.
    fn kbps_sample(&mut self) -> (u64, u64);
    fn selected(&self) -> Option<Origin>;
    /// Make the next connect use this URL instead of the balancer pick.
    fn set_redirect(&mut self, url: Option<String>);
    fn close(&mut self);
}

fn origin_from_redirect(redirect: &str, default_port: u16) -> Result<Origin> {
    let parsed = url::Url::parse(redirect)
        .map_err(|e| Error::Protocol(format!("bad redirect {redirect}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::Protocol(format!("redirect without host: {redirect}")))?
        .to_string();
    Ok(Origin {
        host,
        port: parsed.port().unwrap_or(default_port),
    })
}

/// RTMP pull upstream over a `SimpleRtmpClient`.
pub struct EdgeRtmpUpstream {
    connector: Connector,
    connect_timeout: Duration,
    recv_timeout: Option<Duration>,
    client: Option<SimpleRtmpClient<Box<dyn Transport>>>,
    selected: Option<Origin>,
    redirect: Option<String>,
}

impl EdgeRtmpUpstream {
    pub fn new(connector: Connector, connect_timeout: Duration) -> Self {
        EdgeRtmpUpstream {
            connector,
            connect_timeout,
            recv_timeout: None,
            client: None,
            selected: None,
            redirect: None,
        }
    }
}

impl EdgeUpstream for EdgeRtmpUpstream {
    fn connect(&mut self, request: &PullRequest, lb: &RoundRobinLb) -> Result<()> {
        let origin = match self.redirect.take() {
            Some(redirect) => origin_from_redirect(&redirect, 1935)?,
            None => lb
                .select()
                .ok_or_else(|| Error::Other("no origin configured".into()))?,
        };
        info!("edge pull rtmp://{}:{}{}", origin.host, origin.port, request.stream_url());

        let mut transport = (self.connector)(&origin.host, origin.port, self.connect_timeout)?;
        transport.set_recv_timeout(self.recv_timeout)?;

        let mut client = SimpleRtmpClient::connect(transport)?;
        match client.connect_app(&request.app, &request.tc_url(&origin.host, origin.port)) {
            Ok(()) => {}
            Err(Error::Redirected(url)) => {
                self.redirect = Some(url.clone());
                return Err(Error::Redirected(url));
            }
            Err(e) => return Err(e),
        }
        client.create_stream()?;
        let acked = client.play(&request.stream, PULL_CHUNK_SIZE)?;
        debug!("origin acknowledged stream {acked}");

        self.selected = Some(origin);
        self.client = Some(client);
        Ok(())
    }

    fn recv_message(&mut self) -> Result<UpstreamMessage> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| Error::Protocol("upstream not connected".into()))?;
        let msg = client.recv_message()?;

        if msg.is_command() {
            let values = SimpleRtmpClient::<Box<dyn Transport>>::decode_command(&msg)?;
            let name = values
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            return Ok(UpstreamMessage::Command { name, values });
        }
        if msg.message_type == MSG_AGGREGATE {
            return Ok(UpstreamMessage::Aggregate(MediaPacket {
                timestamp: msg.timestamp as i64,
                stream_id: msg.stream_id as i32,
                kind: MediaKind::Video,
                payload: msg.payload,
            }));
        }
        match msg.to_media_packet() {
            Some(pkt) => Ok(UpstreamMessage::Media(pkt)),
            None => Err(Error::Protocol(format!(
                "unexpected message type {}",
                msg.message_type
            ))),
        }
    }

    fn set_recv_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.recv_timeout = timeout;
        Ok(())
    }

    fn kbps_sample(&mut self) -> (u64, u64) {
        self.client.as_mut().map(|c| c.kbps_sample()).unwrap_or((0, 0))
    }

    fn selected(&self) -> Option<Origin> {
        self.selected.clone()
    }

    fn set_redirect(&mut self, url: Option<String>) {
        self.redirect = url;
    }

    fn close(&mut self) {
        self.client = None;
        self.selected = None;
    }
}

/// Byte counter shared with the reader wrapper below.
#[derive(Clone, Default)]
struct SharedCount(Arc<AtomicU64>);

struct CountingReader<R> {
    inner: R,
    count: SharedCount,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.0.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// HTTP-FLV pull upstream: a GET whose body is an FLV file stream.
pub struct EdgeFlvUpstream {
    connector: Connector,
    connect_timeout: Duration,
    recv_timeout: Option<Duration>,
    stream: Option<FlvTagStream<BodyReader<CountingReader<Box<dyn Transport>>>>>,
    bytes_in: SharedCount,
    last_sample: u64,
    selected: Option<Origin>,
    redirect: Option<String>,
}

impl EdgeFlvUpstream {
    pub fn new(connector: Connector, connect_timeout: Duration) -> Self {
        EdgeFlvUpstream {
            connector,
            connect_timeout,
            recv_timeout: None,
            stream: None,
            bytes_in: SharedCount::default(),
            last_sample: 0,
            selected: None,
            redirect: None,
        }
    }
}

impl EdgeUpstream for EdgeFlvUpstream {
    fn connect(&mut self, request: &PullRequest, lb: &RoundRobinLb) -> Result<()> {
        let origin = match self.redirect.take() {
            Some(redirect) => origin_from_redirect(&redirect, 8080)?,
            None => lb
                .select()
                .ok_or_else(|| Error::Other("no origin configured".into()))?,
        };
        let path = request.flv_path();
        info!("edge pull http://{}:{}{path}", origin.host, origin.port);

        let mut transport = (self.connector)(&origin.host, origin.port, self.connect_timeout)?;
        transport.set_recv_timeout(self.recv_timeout)?;

        let host = format!("{}:{}", origin.host, origin.port);
        write_get(&mut transport, &host, &path)?;
        let head = read_response_head(&mut transport)?;
        if (300..400).contains(&head.status) {
            if let Some(location) = head.header("location") {
                self.redirect = Some(location.to_string());
                return Err(Error::Redirected(location.to_string()));
            }
        }
        if head.status != 200 {
            return Err(Error::Http(format!("flv pull status {}", head.status)));
        }

        let chunked = head.is_chunked();
        self.bytes_in = SharedCount::default();
        self.last_sample = 0;
        let counting = CountingReader {
            inner: transport,
            count: self.bytes_in.clone(),
        };
        self.stream = Some(FlvTagStream::new(BodyReader::new(counting, chunked)));
        self.selected = Some(origin);
        Ok(())
    }

    fn recv_message(&mut self) -> Result<UpstreamMessage> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::Protocol("upstream not connected".into()))?;
        Ok(UpstreamMessage::Media(stream.next_tag()?))
    }

    fn set_recv_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.recv_timeout = timeout;
        Ok(())
    }

    fn kbps_sample(&mut self) -> (u64, u64) {
        let total = self.bytes_in.0.load(Ordering::Relaxed);
        let delta = total - self.last_sample;
        self.last_sample = total;
        (delta, 0)
    }

    fn selected(&self) -> Option<Origin> {
        self.selected.clone()
    }

    fn set_redirect(&mut self, url: Option<String>) {
        self.redirect = url;
    }

    fn close(&mut self) {
        self.stream = None;
        self.selected = None;
    }
}
