//! Per-connection WebRTC session state: SSRC dispatch, NACK and TWCC
//! feedback, RTCP handling and lifecycle.
//!
//! The session is sans-IO: ciphertext comes in through `on_rtp_cipher` /
//! `on_rtcp_cipher`, periodic work runs through `handle_timeout`, and
//! everything to transmit or forward is drained from `poll_event`.

use crate::nack::NackReceiver;
use crate::pli::PliRateLimiter;
use crate::send_buffer::SendBuffer;
use crate::stats::ReceiverStats;
use crate::transport::SrtpCipher;
use crate::twcc::{TwccReceiver, TWCC_INTERVAL};
use bytes::Bytes;
use log::{debug, info, warn};
use media::MediaKind;
use rtcp::transport_layer_nack::{nack_pairs_from_sequence_numbers, TransportLayerNack};
use rtcp::{unmarshal_compound, RtcpPacket};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, Unmarshal};
use shared::time::{compact_ntp, system_time_to_ntp};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime};

/// Receive ring size for NACK bookkeeping.
const NACK_RING_SIZE: u16 = 512;
/// Retransmit buffer size per player track.
const SEND_BUFFER_SIZE: u16 = 1024;
/// Receiver-report cadence.
const RR_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitingStun,
    DtlsHandshaking,
    Established,
    Disposing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// ICE ufrag pair, `local:remote`.
    pub username: String,
    pub session_timeout: Duration,
    pub nack_enabled: bool,
    /// Negotiated transport-wide-cc extension id; 0 disables TWCC.
    pub twcc_id: u8,
    /// Drop inbound packets of this payload type; 0 disables the filter.
    pub drop_for_pt: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            username: String::new(),
            session_timeout: Duration::from_secs(30),
            nack_enabled: true,
            twcc_id: 0,
            drop_for_pt: 0,
        }
    }
}

/// Output of the session, drained by the host loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// Protected RTCP ready for the socket.
    SendRtcp(Bytes),
    /// Protected RTP ready for the socket (retransmissions and player
    /// media).
    SendRtp(Bytes),
    /// Publisher media for the live source.
    MediaFrame {
        stream_url: String,
        kind: MediaKind,
        packet: rtp::Packet,
    },
    /// Ask the publisher for a keyframe.
    KeyframeRequest { stream_url: String, ssrc: u32 },
    /// The session expired and wants removal from the manager.
    Expired,
}

struct PublisherTrack {
    kind: MediaKind,
    ssrc: u32,
    nack: Option<NackReceiver>,
    stats: ReceiverStats,
    rtt: Duration,
    last_sender_report_ntp: u64,
    last_sender_report_rtp_time: u32,
    keyframe_requests: u64,
}

impl PublisherTrack {
    fn new(kind: MediaKind, ssrc: u32, receiver_ssrc: u32, nack_enabled: bool) -> Self {
        let clock_rate = if kind == MediaKind::Video { 90_000 } else { 48_000 };
        let nack = if nack_enabled && kind == MediaKind::Video {
            NackReceiver::new(NACK_RING_SIZE)
        } else {
            None
        };
        PublisherTrack {
            kind,
            ssrc,
            nack,
            stats: ReceiverStats::new(ssrc, receiver_ssrc, clock_rate),
            rtt: Duration::from_millis(50),
            last_sender_report_ntp: 0,
            last_sender_report_rtp_time: 0,
            keyframe_requests: 0,
        }
    }
}

struct PublishStream {
    stream_url: String,
    audio: PublisherTrack,
    video: PublisherTrack,
}

struct PlayerTrack {
    ssrc: u32,
    active: bool,
    send_buffer: SendBuffer,
    rtt: Duration,
}

impl PlayerTrack {
    fn new(ssrc: u32) -> Self {
        PlayerTrack {
            ssrc,
            active: true,
            send_buffer: SendBuffer::new(SEND_BUFFER_SIZE)
                .expect("send buffer size is a power of two"),
            rtt: Duration::ZERO,
        }
    }
}

struct PlayStream {
    stream_url: String,
    audio: PlayerTrack,
    video: PlayerTrack,
    pli: PliRateLimiter,
}

pub struct RtcSession {
    config: SessionConfig,
    state: SessionState,
    last_stun_time: Option<Instant>,

    publishers: HashMap<String, PublishStream>,
    publishers_ssrc_map: HashMap<u32, String>,
    players: HashMap<String, PlayStream>,
    players_ssrc_map: HashMap<u32, String>,

    /// SSRC we stamp on feedback we originate.
    sender_ssrc: u32,
    twcc: TwccReceiver,
    next_twcc_at: Option<Instant>,
    next_nack_at: Option<Instant>,
    next_rr_at: Option<Instant>,

    /// Test-only inbound drop counter.
    simulate_recv_drop: u32,
    /// Test-only outbound drop counter for player packets.
    simulate_player_drop: u32,

    events: VecDeque<SessionEvent>,
    before_dispose_called: bool,
    disposed: bool,
}

impl RtcSession {
    pub fn new(config: SessionConfig) -> Self {
        let sender_ssrc: u32 = rand::random();
        RtcSession {
            config,
            state: SessionState::WaitingStun,
            last_stun_time: None,
            publishers: HashMap::new(),
            publishers_ssrc_map: HashMap::new(),
            players: HashMap::new(),
            players_ssrc_map: HashMap::new(),
            sender_ssrc,
            twcc: TwccReceiver::new(sender_ssrc),
            next_twcc_at: None,
            next_nack_at: None,
            next_rr_at: None,
            simulate_recv_drop: 0,
            simulate_player_drop: 0,
            events: VecDeque::new(),
            before_dispose_called: false,
            disposed: false,
        }
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A valid STUN binding arrived.
    pub fn on_stun(&mut self, now: Instant) {
        if self.state == SessionState::WaitingStun {
            self.state = SessionState::DtlsHandshaking;
        }
        self.alive(now);
    }

    /// DTLS handshake completed; media may flow.
    pub fn on_dtls_done(&mut self) {
        if self.state == SessionState::DtlsHandshaking {
            self.state = SessionState::Established;
        }
    }

    /// DTLS alert from the peer. A fatal alert, or a warning close-notify
    /// (`CN`), tears the session down; everything else is informational.
    pub fn on_dtls_alert(&mut self, level: &str, desc: &str) {
        if level == "fatal" || (level == "warning" && desc == "CN") {
            info!("session {} dispose for dtls alert {level} {desc}", self.config.username);
            self.expire();
        } else {
            debug!("ignore dtls alert {level} {desc}");
        }
    }

    pub fn alive(&mut self, now: Instant) {
        self.last_stun_time = Some(now);
    }

    pub fn is_alive(&self, now: Instant) -> bool {
        match self.last_stun_time {
            // reaped only after the first keepalive has been seen
            None => true,
            Some(t) => now.duration_since(t) < self.config.session_timeout,
        }
    }

    /// Hand the session to the manager for async removal. Safe to call more
    /// than once.
    pub fn expire(&mut self) {
        if matches!(self.state, SessionState::Disposing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Disposing;
        self.events.push_back(SessionEvent::Expired);
    }

    /// First phase of disposal; marks the session and blocks re-entry.
    pub fn on_before_dispose(&mut self) {
        self.before_dispose_called = true;
    }

    /// Second phase; completes once after `on_before_dispose`.
    pub fn on_disposing(&mut self) {
        if !self.before_dispose_called || self.disposed {
            return;
        }
        self.disposed = true;
        self.state = SessionState::Closed;
        self.publishers.clear();
        self.publishers_ssrc_map.clear();
        self.players.clear();
        self.players_ssrc_map.clear();
    }

    /// Test hook: drop the next `n` inbound RTP packets.
    pub fn simulate_recv_drop(&mut self, n: u32) {
        self.simulate_recv_drop += n;
    }

    /// Test hook: drop the next `n` outbound player packets.
    pub fn simulate_player_drop(&mut self, n: u32) {
        self.simulate_player_drop += n;
    }

    pub fn publisher_keyframe_requests(&self, stream_url: &str) -> u64 {
        self.publishers
            .get(stream_url)
            .map(|p| p.video.keyframe_requests)
            .unwrap_or(0)
    }

    /// Register the publisher of `stream_url` with its audio and video
    /// SSRCs. A second publisher for the same stream is refused.
    pub fn create_publisher(
        &mut self,
        stream_url: &str,
        audio_ssrc: u32,
        video_ssrc: u32,
    ) -> Result<()> {
        if self.publishers.contains_key(stream_url) {
            return Err(Error::StreamBusy(stream_url.to_string()));
        }
        let stream = PublishStream {
            stream_url: stream_url.to_string(),
            audio: PublisherTrack::new(
                MediaKind::Audio,
                audio_ssrc,
                self.sender_ssrc,
                self.config.nack_enabled,
            ),
            video: PublisherTrack::new(
                MediaKind::Video,
                video_ssrc,
                self.sender_ssrc,
                self.config.nack_enabled,
            ),
        };
        self.publishers_ssrc_map
            .insert(audio_ssrc, stream_url.to_string());
        self.publishers_ssrc_map
            .insert(video_ssrc, stream_url.to_string());
        self.publishers.insert(stream_url.to_string(), stream);
        Ok(())
    }

    pub fn create_player(&mut self, stream_url: &str, audio_ssrc: u32, video_ssrc: u32) {
        let stream = PlayStream {
            stream_url: stream_url.to_string(),
            audio: PlayerTrack::new(audio_ssrc),
            video: PlayerTrack::new(video_ssrc),
            pli: PliRateLimiter::new(),
        };
        self.players_ssrc_map
            .insert(audio_ssrc, stream_url.to_string());
        self.players_ssrc_map
            .insert(video_ssrc, stream_url.to_string());
        self.players.insert(stream_url.to_string(), stream);
    }

    pub fn set_all_tracks_status(&mut self, stream_url: &str, active: bool) {
        if let Some(stream) = self.players.get_mut(stream_url) {
            stream.audio.active = active;
            stream.video.active = active;
        }
    }

    /// Sanity check used by tests: the SSRC map and the publisher map agree.
    pub fn publisher_maps_consistent(&self) -> bool {
        self.publishers_ssrc_map
            .values()
            .all(|url| self.publishers.contains_key(url))
            && self.publishers.values().all(|p| {
                self.publishers_ssrc_map.get(&p.audio.ssrc) == Some(&p.stream_url)
                    && self.publishers_ssrc_map.get(&p.video.ssrc) == Some(&p.stream_url)
            })
    }

    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Decrypt and process one inbound RTP datagram.
    pub fn on_rtp_cipher(
        &mut self,
        now: Instant,
        data: &[u8],
        cipher: &mut dyn SrtpCipher,
    ) -> Result<()> {
        let mut plaintext = cipher.unprotect_rtp(data)?;
        if plaintext.len() < 12 {
            return Err(Error::RtpDecode(format!(
                "rtp requires 12 bytes, got {}",
                plaintext.len()
            )));
        }
        let ssrc = u32::from_be_bytes([plaintext[8], plaintext[9], plaintext[10], plaintext[11]]);

        if self.simulate_recv_drop > 0 {
            self.simulate_recv_drop -= 1;
            info!("simulate drop inbound rtp ssrc={ssrc}");
            return Ok(());
        }
        if self.config.drop_for_pt != 0 && plaintext[1] & 0x7F == self.config.drop_for_pt {
            return Ok(());
        }

        let packet = rtp::Packet::unmarshal(&mut plaintext)?;

        if self.config.twcc_id != 0 {
            if let Some(ext) = packet.header.get_extension(self.config.twcc_id) {
                if ext.len() >= 2 {
                    let wide_seq = u16::from_be_bytes([ext[0], ext[1]]);
                    self.twcc.record(ssrc, wide_seq, now);
                }
            }
        }

        let stream_url = match self.publishers_ssrc_map.get(&ssrc) {
            Some(url) => url.clone(),
            None => {
                warn!("drop rtp for unknown ssrc={ssrc}");
                return Ok(());
            }
        };
        self.on_rtp_plaintext(now, &stream_url, packet)
    }

    fn on_rtp_plaintext(
        &mut self,
        now: Instant,
        stream_url: &str,
        packet: rtp::Packet,
    ) -> Result<()> {
        let stream = match self.publishers.get_mut(stream_url) {
            Some(s) => s,
            None => return Ok(()),
        };
        let ssrc = packet.header.ssrc;
        let track = if ssrc == stream.video.ssrc {
            &mut stream.video
        } else {
            &mut stream.audio
        };

        track
            .stats
            .on_rtp(now, packet.header.sequence_number, packet.header.timestamp);
        if let Some(nack) = track.nack.as_mut() {
            nack.on_packet(packet.header.sequence_number, now);
        }

        self.events.push_back(SessionEvent::MediaFrame {
            stream_url: stream_url.to_string(),
            kind: track.kind,
            packet,
        });
        Ok(())
    }

    /// Harvest NACK state of all publisher video tracks and emit feedback.
    pub fn check_send_nacks(
        &mut self,
        now: Instant,
        cipher: &mut dyn SrtpCipher,
    ) -> Result<()> {
        let sender_ssrc = self.sender_ssrc;
        let mut feedback = Vec::new();
        for stream in self.publishers.values_mut() {
            let track = &mut stream.video;
            let rtt = track.rtt;
            if let Some(nack) = track.nack.as_mut() {
                let check = nack.check(now, rtt);
                for seq in &check.timed_out {
                    debug!("nack timeout for seq={seq} ssrc={}", track.ssrc);
                }
                if !check.to_request.is_empty() {
                    feedback.push(TransportLayerNack {
                        sender_ssrc,
                        media_ssrc: track.ssrc,
                        nacks: nack_pairs_from_sequence_numbers(&check.to_request),
                    });
                }
            }
        }
        for nack in feedback {
            let raw = nack.marshal()?;
            let protected = cipher.protect_rtcp(&raw)?;
            self.events.push_back(SessionEvent::SendRtcp(protected));
        }
        Ok(())
    }

    /// Drive the periodic tasks: TWCC feedback, NACK harvesting and
    /// receiver reports. An encryption failure aborts the tick.
    pub fn handle_timeout(&mut self, now: Instant, cipher: &mut dyn SrtpCipher) -> Result<()> {
        if self.next_twcc_at.map(|t| now >= t).unwrap_or(true) {
            self.next_twcc_at = Some(now + TWCC_INTERVAL);
            if self.config.twcc_id != 0 && self.twcc.pending() > 0 {
                if let Some(feedback) = self.twcc.build_feedback() {
                    let raw = feedback.marshal()?;
                    let protected = cipher.protect_rtcp(&raw)?;
                    self.events.push_back(SessionEvent::SendRtcp(protected));
                }
            }
        }

        if self.next_nack_at.map(|t| now >= t).unwrap_or(true) {
            self.next_nack_at = Some(now + TWCC_INTERVAL);
            self.check_send_nacks(now, cipher)?;
        }

        if self.next_rr_at.map(|t| now >= t).unwrap_or(true) {
            self.next_rr_at = Some(now + RR_INTERVAL);
            self.send_receiver_reports(now, cipher)?;
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        [self.next_twcc_at, self.next_nack_at, self.next_rr_at]
            .into_iter()
            .flatten()
            .min()
    }

    fn send_receiver_reports(
        &mut self,
        now: Instant,
        cipher: &mut dyn SrtpCipher,
    ) -> Result<()> {
        let mut reports = Vec::new();
        for stream in self.publishers.values_mut() {
            reports.push(stream.audio.stats.generate_report(now));
            reports.push(stream.video.stats.generate_report(now));
        }
        for report in reports {
            let raw = report.marshal()?;
            let protected = cipher.protect_rtcp(&raw)?;
            self.events.push_back(SessionEvent::SendRtcp(protected));
        }
        Ok(())
    }

    /// Send a media packet to a player, retaining it for retransmission.
    pub fn send_to_player(
        &mut self,
        stream_url: &str,
        packet: rtp::Packet,
        cipher: &mut dyn SrtpCipher,
    ) -> Result<()> {
        let stream = match self.players.get_mut(stream_url) {
            Some(s) => s,
            None => return Ok(()),
        };
        let track = if packet.header.ssrc == stream.video.ssrc {
            &mut stream.video
        } else {
            &mut stream.audio
        };
        if !track.active {
            return Ok(());
        }

        if self.simulate_player_drop > 0 {
            self.simulate_player_drop -= 1;
            info!("simulate drop outbound rtp seq={}", packet.header.sequence_number);
            track.send_buffer.add(packet);
            return Ok(());
        }

        let raw = packet.marshal()?;
        track.send_buffer.add(packet);
        let protected = cipher.protect_rtp(&raw)?;
        self.events.push_back(SessionEvent::SendRtp(protected));
        Ok(())
    }

    /// Decrypt and dispatch one inbound compound RTCP datagram.
    pub fn on_rtcp_cipher(
        &mut self,
        now: Instant,
        data: &[u8],
        cipher: &mut dyn SrtpCipher,
    ) -> Result<()> {
        let plaintext = cipher.unprotect_rtcp(data)?;
        self.on_rtcp(now, plaintext, cipher)
    }

    fn on_rtcp(
        &mut self,
        now: Instant,
        plaintext: Bytes,
        cipher: &mut dyn SrtpCipher,
    ) -> Result<()> {
        for pkt in unmarshal_compound(plaintext)? {
            match pkt {
                RtcpPacket::SenderReport(sr) => self.on_rtcp_sr(now, sr),
                RtcpPacket::ReceiverReport(rr) => self.on_rtcp_rr(rr),
                RtcpPacket::ExtendedReport(xr) => self.on_rtcp_xr(xr),
                RtcpPacket::Nack(nack) => self.on_rtcp_nack(nack, cipher)?,
                RtcpPacket::TransportCc(cc) => {
                    // remote feedback about our outbound pacing
                    debug!(
                        "twcc feedback base={} count={}",
                        cc.base_sequence_number, cc.packet_status_count
                    );
                }
                RtcpPacket::Pli(pli) => self.on_rtcp_pli(now, pli),
                RtcpPacket::Remb(remb) => {
                    debug!("remb estimate {}bps for {:?}", remb.bitrate, remb.ssrcs);
                }
                RtcpPacket::SourceDescription(_) | RtcpPacket::Goodbye(_) => {}
            }
        }
        Ok(())
    }

    fn on_rtcp_sr(&mut self, now: Instant, sr: rtcp::sender_report::SenderReport) {
        let stream_url = match self.publishers_ssrc_map.get(&sr.ssrc) {
            Some(url) => url.clone(),
            None => {
                info!("ignore sr for unknown ssrc={}", sr.ssrc);
                return;
            }
        };
        if let Some(stream) = self.publishers.get_mut(&stream_url) {
            let track = if sr.ssrc == stream.video.ssrc {
                &mut stream.video
            } else {
                &mut stream.audio
            };
            track.last_sender_report_ntp = sr.ntp_time;
            track.last_sender_report_rtp_time = sr.rtp_time;
            track.stats.on_sender_report(now, sr.ntp_time);
        }
    }

    fn on_rtcp_rr(&mut self, rr: rtcp::receiver_report::ReceiverReport) {
        let rb = match rr.reports.first() {
            Some(rb) => rb,
            None => return,
        };
        // native clients report rb_ssrc zero before media flows
        if rb.ssrc == 0 {
            return;
        }
        let stream_url = match self.players_ssrc_map.get(&rb.ssrc) {
            Some(url) => url.clone(),
            None => {
                info!("ignore rr for unknown ssrc={}", rb.ssrc);
                return;
            }
        };
        if let Some(stream) = self.players.get_mut(&stream_url) {
            let now_compact = compact_ntp(system_time_to_ntp(SystemTime::now()));
            let rtt_units = now_compact
                .wrapping_sub(rb.last_sender_report)
                .wrapping_sub(rb.delay);
            if rb.last_sender_report != 0 && rtt_units < u32::MAX / 2 {
                let rtt = Duration::from_micros((rtt_units as u64 * 1_000_000) >> 16);
                let track = if rb.ssrc == stream.video.ssrc {
                    &mut stream.video
                } else {
                    &mut stream.audio
                };
                track.rtt = rtt;
            }
        }
    }

    fn on_rtcp_xr(&mut self, xr: rtcp::extended_report::ExtendedReport) {
        for report in &xr.dlrr_reports {
            let stream_url = match self.publishers_ssrc_map.get(&report.ssrc) {
                Some(url) => url.clone(),
                None => continue,
            };
            if let Some(stream) = self.publishers.get_mut(&stream_url) {
                let now_compact = compact_ntp(system_time_to_ntp(SystemTime::now()));
                let rtt_units = now_compact
                    .wrapping_sub(report.last_rr)
                    .wrapping_sub(report.dlrr);
                if report.last_rr != 0 && rtt_units < u32::MAX / 2 {
                    let rtt = Duration::from_micros((rtt_units as u64 * 1_000_000) >> 16);
                    let track = if report.ssrc == stream.video.ssrc {
                        &mut stream.video
                    } else {
                        &mut stream.audio
                    };
                    track.rtt = rtt;
                }
            }
        }
    }

    fn on_rtcp_nack(
        &mut self,
        nack: TransportLayerNack,
        cipher: &mut dyn SrtpCipher,
    ) -> Result<()> {
        let stream_url = match self.players_ssrc_map.get(&nack.media_ssrc) {
            Some(url) => url.clone(),
            None => {
                warn!("ignore nack for unknown ssrc={}", nack.media_ssrc);
                return Ok(());
            }
        };
        let stream = match self.players.get_mut(&stream_url) {
            Some(s) => s,
            None => return Ok(()),
        };
        let track = if nack.media_ssrc == stream.video.ssrc {
            &mut stream.video
        } else {
            &mut stream.audio
        };

        for pair in &nack.nacks {
            for seq in pair.packet_list() {
                if self.simulate_player_drop > 0 {
                    self.simulate_player_drop -= 1;
                    info!("simulate drop retransmit seq={seq}");
                    continue;
                }
                if let Some(pkt) = track.send_buffer.get(seq) {
                    let raw = pkt.marshal()?;
                    let protected = cipher.protect_rtp(&raw)?;
                    self.events.push_back(SessionEvent::SendRtp(protected));
                } else {
                    debug!("retransmit miss seq={seq}");
                }
            }
        }
        Ok(())
    }

    fn on_rtcp_pli(&mut self, now: Instant, pli: rtcp::picture_loss_indication::PictureLossIndication) {
        let stream_url = match self.players_ssrc_map.get(&pli.media_ssrc) {
            Some(url) => url.clone(),
            None => {
                warn!("ignore pli for unknown ssrc={:#x}", pli.media_ssrc);
                return;
            }
        };
        let allowed = match self.players.get_mut(&stream_url) {
            Some(stream) => stream.pli.request(now),
            None => false,
        };
        if !allowed {
            debug!("coalesce pli for {stream_url}");
            return;
        }

        // forward to the publisher of the same stream as a keyframe request
        if let Some(publisher) = self.publishers.get_mut(&stream_url) {
            publisher.video.keyframe_requests += 1;
            self.events.push_back(SessionEvent::KeyframeRequest {
                stream_url,
                ssrc: publisher.video.ssrc,
            });
        } else {
            self.events.push_back(SessionEvent::KeyframeRequest {
                stream_url,
                ssrc: pli.media_ssrc,
            });
        }
    }
}
