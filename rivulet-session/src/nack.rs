//! Receiver-side NACK state: a ring of recently received sequence numbers
//! plus the missing set with first-seen times and retry counts.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const UINT16_SIZE_HALF: u16 = 1 << 15;

/// Retries before a missing packet is given up as timed out.
const MAX_RETRIES: u8 = 5;
/// Floor for the retry interval when RTT is tiny or unknown.
const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(20);
/// A missing packet older than this is abandoned regardless of retries.
const ENTRY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct MissingEntry {
    first_seen: Instant,
    last_request: Option<Instant>,
    retries: u8,
}

/// Result of one harvest pass.
#[derive(Debug, Default)]
pub struct NackCheck {
    /// Sequence numbers to request again now.
    pub to_request: Vec<u16>,
    /// Sequence numbers abandoned this pass.
    pub timed_out: Vec<u16>,
}

/// Tracks received sequence numbers in a power-of-two bitmap ring and keeps
/// per-gap retry bookkeeping.
pub struct NackReceiver {
    packets: Vec<u64>,
    size: u16,
    end: u16,
    started: bool,
    missing: HashMap<u16, MissingEntry>,
}

impl NackReceiver {
    /// `size` must be a power of two between 64 and 32768.
    pub fn new(size: u16) -> Option<Self> {
        let is_valid = (6..=15).any(|i| size == 1 << i);
        if !is_valid {
            return None;
        }
        Some(NackReceiver {
            packets: vec![0u64; (size / 64) as usize],
            size,
            end: 0,
            started: false,
            missing: HashMap::new(),
        })
    }

    pub fn capacity(&self) -> u16 {
        self.size
    }

    pub fn missing_len(&self) -> usize {
        self.missing.len()
    }

    pub fn is_received(&self, seq: u16) -> bool {
        let diff = self.end.wrapping_sub(seq);
        if diff >= UINT16_SIZE_HALF || diff >= self.size {
            return false;
        }
        self.get_bit(seq)
    }

    /// Record an arrival; gaps it opens join the missing set, a late arrival
    /// leaves it.
    pub fn on_packet(&mut self, seq: u16, now: Instant) {
        if !self.started {
            self.set_bit(seq);
            self.end = seq;
            self.started = true;
            return;
        }

        let diff = seq.wrapping_sub(self.end);
        if diff == 0 {
            return; // duplicate
        }
        if diff < UINT16_SIZE_HALF {
            // in-order advance: everything between end and seq is missing
            let mut i = self.end.wrapping_add(1);
            while i != seq {
                self.clear_bit(i);
                self.missing.entry(i).or_insert(MissingEntry {
                    first_seen: now,
                    last_request: None,
                    retries: 0,
                });
                i = i.wrapping_add(1);
            }
            self.end = seq;
        } else {
            // out-of-order arrival fills a gap
            self.missing.remove(&seq);
        }
        self.set_bit(seq);

        // entries older than the ring window can never be repaired
        let end = self.end;
        let size = self.size;
        self.missing
            .retain(|&s, _| end.wrapping_sub(s) < size);
    }

    /// Harvest requests due at `now`; the retry interval scales with RTT.
    pub fn check(&mut self, now: Instant, rtt: Duration) -> NackCheck {
        let interval = rtt.max(MIN_RETRY_INTERVAL);
        let mut result = NackCheck::default();

        self.missing.retain(|&seq, entry| {
            if now.duration_since(entry.first_seen) > ENTRY_TIMEOUT
                || entry.retries >= MAX_RETRIES
            {
                result.timed_out.push(seq);
                return false;
            }
            let due = match entry.last_request {
                None => true,
                Some(t) => now.duration_since(t) >= interval,
            };
            if due {
                entry.last_request = Some(now);
                entry.retries += 1;
                result.to_request.push(seq);
            }
            true
        });

        result.to_request.sort_unstable();
        result.timed_out.sort_unstable();
        result
    }

    fn set_bit(&mut self, seq: u16) {
        let pos = seq % self.size;
        self.packets[(pos / 64) as usize] |= 1 << (pos % 64);
    }

    fn clear_bit(&mut self, seq: u16) {
        let pos = seq % self.size;
        self.packets[(pos / 64) as usize] &= !(1u64 << (pos % 64));
    }

    fn get_bit(&self, seq: u16) -> bool {
        let pos = seq % self.size;
        (self.packets[(pos / 64) as usize] & (1 << (pos % 64))) != 0
    }
}
