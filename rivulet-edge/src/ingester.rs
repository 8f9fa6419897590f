//! Play-edge state machine and the ingest loop pulling upstream content
//! into the local live source.

use crate::lb::RoundRobinLb;
use crate::upstream::{EdgeUpstream, PullRequest, UpstreamMessage};
use log::{info, warn};
use media::packet::MediaKind;
use media::source::LiveSource;
use shared::error::{Error, Result};
use shared::Interrupt;
use std::time::Duration;

const UNPUBLISH_NOTIFY: &str = "NetStream.Play.UnpublishNotify";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeState {
    #[default]
    Init,
    Play,
    IngestConnected,
}

/// The play edge of one stream: enters `Play` when the first local player
/// subscribes, `IngestConnected` once the upstream delivers.
#[derive(Default)]
pub struct PlayEdge {
    state: EdgeState,
}

impl PlayEdge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EdgeState {
        self.state
    }

    /// First local subscriber arrived; start ingesting.
    pub fn on_client_play(&mut self, ingester: &mut EdgeIngester) -> Result<()> {
        if self.state == EdgeState::Init {
            ingester.start()?;
            self.state = EdgeState::Play;
        }
        Ok(())
    }

    /// Upstream established. Repeated calls are idempotent.
    pub fn on_ingest_play(&mut self) -> Result<()> {
        if self.state == EdgeState::Play {
            self.state = EdgeState::IngestConnected;
        }
        Ok(())
    }

    /// Last local subscriber left; stop ingesting.
    pub fn on_all_client_stop(&mut self, ingester: &mut EdgeIngester) {
        ingester.stop();
        self.state = EdgeState::Init;
    }
}

/// Pulls one upstream stream and forwards demuxed messages into the local
/// source.
pub struct EdgeIngester {
    upstream: Box<dyn EdgeUpstream>,
    lb: RoundRobinLb,
    request: PullRequest,
    trd: Interrupt,
    started: bool,
    stream_timeout: Duration,
}

impl EdgeIngester {
    pub fn new(
        upstream: Box<dyn EdgeUpstream>,
        lb: RoundRobinLb,
        request: PullRequest,
        stream_timeout: Duration,
    ) -> Self {
        EdgeIngester {
            upstream,
            lb,
            request,
            trd: Interrupt::new(),
            started: false,
            stream_timeout,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn interrupt_handle(&self) -> Interrupt {
        self.trd.clone()
    }

    pub fn start(&mut self) -> Result<()> {
        self.trd.reset();
        self.started = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.started = false;
        self.trd.interrupt();
        self.upstream.close();
    }

    /// One connect-and-pump pass.
    ///
    /// Transient failures (timeouts, socket errors, redirects) return to the
    /// caller, which backs off and calls again; the round robin advances on
    /// the next connect. Returns `Ok(())` when the origin unpublished.
    pub fn ingest_once(&mut self, source: &mut LiveSource, edge: &mut PlayEdge) -> Result<()> {
        self.trd.pull()?;

        self.upstream
            .set_recv_timeout(Some(self.stream_timeout))?;
        self.upstream.connect(&self.request, &self.lb)?;
        edge.on_ingest_play()?;

        loop {
            self.trd.pull()?;
            let msg = self.upstream.recv_message()?;
            if !self.process_message(source, msg)? {
                info!("origin unpublished {}", self.request.stream_url());
                return Ok(());
            }
        }
    }

    /// Forward one upstream message; false stops the ingest.
    fn process_message(&mut self, source: &mut LiveSource, msg: UpstreamMessage) -> Result<bool> {
        match msg {
            UpstreamMessage::Media(pkt) => match pkt.kind {
                MediaKind::Audio => source.on_audio(pkt)?,
                MediaKind::Video => source.on_video(pkt)?,
                MediaKind::Script => source.on_meta_data(pkt)?,
                MediaKind::Forbidden => {}
            },
            UpstreamMessage::Aggregate(pkt) => source.on_aggregate(pkt)?,
            UpstreamMessage::Command { name, values } => {
                if name == "onStatus" {
                    let code = values
                        .iter()
                        .find_map(|v| v.get("code"))
                        .and_then(|v| v.as_str());
                    if code == Some(UNPUBLISH_NOTIFY) {
                        return Ok(false);
                    }
                    info!("edge ignore onStatus {:?}", code);
                } else {
                    warn!("edge ignore command {name}");
                }
            }
        }
        Ok(true)
    }

    /// Classify an ingest error: transient ones are retried after backoff.
    pub fn should_reconnect(err: &Error) -> bool {
        matches!(err, Error::Redirected(_)) || err.is_transient()
    }
}

#[cfg(test)]
mod ingester_test;
