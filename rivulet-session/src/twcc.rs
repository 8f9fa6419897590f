//! Transport-wide congestion control receiver: records arrivals and builds
//! feedback packets on the periodic tick.

use rtcp::transport_layer_cc::{
    PacketStatusChunk, RecvDelta, SymbolSizeTypeTcc, SymbolTypeTcc, TransportLayerCc,
    DELTA_SCALE_FACTOR,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Feedback interval of the periodic task.
pub const TWCC_INTERVAL: Duration = Duration::from_millis(20);

/// Arrivals older than this are culled before building feedback.
const PACKET_WINDOW: Duration = Duration::from_millis(500);

const MAX_RUN_LENGTH: usize = 0x1FFF;
const MAX_TWO_BIT_CAP: usize = 7;

/// Unwraps 16-bit transport-wide sequence numbers onto a monotonic line.
struct SequenceUnwrapper {
    last: Option<i64>,
}

impl SequenceUnwrapper {
    fn new() -> Self {
        SequenceUnwrapper { last: None }
    }

    fn unwrap(&mut self, seq: u16) -> i64 {
        match self.last {
            None => {
                self.last = Some(seq as i64);
                seq as i64
            }
            Some(last) => {
                let mut diff = seq as i64 - (last & 0xFFFF);
                if diff > 0x8000 {
                    diff -= 0x10000;
                } else if diff < -0x8000 {
                    diff += 0x10000;
                }
                let unwrapped = last + diff;
                self.last = Some(unwrapped);
                unwrapped
            }
        }
    }
}

/// Records transport-wide arrivals for one peer and packs them into
/// `TransportLayerCc` feedback.
pub struct TwccReceiver {
    sender_ssrc: u32,
    media_ssrc: u32,
    unwrapper: SequenceUnwrapper,
    /// Arrival time per unwrapped sequence number.
    arrivals: BTreeMap<i64, Instant>,
    epoch: Option<Instant>,
    next_feedback_seq: Option<i64>,
    fb_pkt_count: u8,
}

impl TwccReceiver {
    pub fn new(sender_ssrc: u32) -> Self {
        TwccReceiver {
            sender_ssrc,
            media_ssrc: 0,
            unwrapper: SequenceUnwrapper::new(),
            arrivals: BTreeMap::new(),
            epoch: None,
            next_feedback_seq: None,
            fb_pkt_count: 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.arrivals.len()
    }

    /// Record one arrival carrying the transport-wide sequence number.
    pub fn record(&mut self, media_ssrc: u32, wide_seq: u16, now: Instant) {
        self.media_ssrc = media_ssrc;
        self.epoch.get_or_insert(now);
        let seq = self.unwrapper.unwrap(wide_seq);
        self.arrivals.entry(seq).or_insert(now);

        // cull already-reported arrivals past the reporting window
        if let Some(cutoff) = now.checked_sub(PACKET_WINDOW) {
            let stale: Vec<i64> = self
                .arrivals
                .iter()
                .filter(|(_, &t)| t < cutoff)
                .map(|(&s, _)| s)
                .collect();
            for s in stale {
                if Some(s) < self.next_feedback_seq {
                    self.arrivals.remove(&s);
                }
            }
        }
    }

    /// Build feedback for everything recorded since the last call.
    pub fn build_feedback(&mut self) -> Option<TransportLayerCc> {
        let epoch = self.epoch?;
        let start = match self.next_feedback_seq {
            Some(s) => s,
            None => *self.arrivals.keys().next()?,
        };
        let end = *self.arrivals.keys().last()?;
        if start > end {
            return None;
        }

        // reference time in 64 ms units since the receiver epoch
        let first_arrival = *self.arrivals.range(start..=end).next()?.1;
        let base_us = first_arrival.duration_since(epoch).as_micros() as i64;
        let reference_time = (base_us / 64_000) as u32 & 0xFFFFFF;
        let mut last_time_us = reference_time as i64 * 64_000;

        let mut symbols = Vec::new();
        let mut deltas = Vec::new();
        for seq in start..=end {
            match self.arrivals.get(&seq) {
                Some(&at) => {
                    let at_us = at.duration_since(epoch).as_micros() as i64;
                    let delta_us = at_us - last_time_us;
                    let scaled = if delta_us >= 0 {
                        (delta_us + DELTA_SCALE_FACTOR / 2) / DELTA_SCALE_FACTOR
                    } else {
                        (delta_us - DELTA_SCALE_FACTOR / 2) / DELTA_SCALE_FACTOR
                    };
                    let symbol = if (0..=0xFF).contains(&scaled) {
                        SymbolTypeTcc::PacketReceivedSmallDelta
                    } else {
                        SymbolTypeTcc::PacketReceivedLargeDelta
                    };
                    symbols.push(symbol);
                    deltas.push(RecvDelta {
                        type_tcc_packet: symbol,
                        delta: scaled * DELTA_SCALE_FACTOR,
                    });
                    last_time_us += scaled * DELTA_SCALE_FACTOR;
                }
                None => symbols.push(SymbolTypeTcc::PacketNotReceived),
            }
        }

        let packet_chunks = pack_symbols(&symbols);
        let cc = TransportLayerCc {
            sender_ssrc: self.sender_ssrc,
            media_ssrc: self.media_ssrc,
            base_sequence_number: (start & 0xFFFF) as u16,
            packet_status_count: symbols.len() as u16,
            reference_time,
            fb_pkt_count: self.fb_pkt_count,
            packet_chunks,
            recv_deltas: deltas,
        };
        self.fb_pkt_count = self.fb_pkt_count.wrapping_add(1);
        self.next_feedback_seq = Some(end + 1);
        self.arrivals = self.arrivals.split_off(&(end + 1));
        Some(cc)
    }
}

/// Pack a symbol run into status chunks: run-length chunks for uniform
/// stretches, two-bit vectors otherwise.
fn pack_symbols(symbols: &[SymbolTypeTcc]) -> Vec<PacketStatusChunk> {
    let mut chunks = Vec::new();
    let mut i = 0usize;
    while i < symbols.len() {
        // measure the run of one symbol
        let mut run = 1usize;
        while i + run < symbols.len() && symbols[i + run] == symbols[i] && run < MAX_RUN_LENGTH {
            run += 1;
        }
        if run >= MAX_TWO_BIT_CAP || i + run == symbols.len() {
            chunks.push(PacketStatusChunk::RunLengthChunk {
                packet_status_symbol: symbols[i],
                run_length: run as u16,
            });
            i += run;
            continue;
        }
        // mixed stretch: emit a two-bit vector chunk
        let take = (symbols.len() - i).min(MAX_TWO_BIT_CAP);
        let mut list = symbols[i..i + take].to_vec();
        while list.len() < MAX_TWO_BIT_CAP {
            list.push(SymbolTypeTcc::PacketNotReceived);
        }
        chunks.push(PacketStatusChunk::StatusVectorChunk {
            symbol_size: SymbolSizeTypeTcc::TwoBit,
            symbol_list: list,
        });
        i += take;
    }
    chunks
}
