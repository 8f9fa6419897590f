//! Per-track receive statistics: RFC 3550 interarrival jitter, loss
//! accounting and receiver-report generation.

use rtcp::reception_report::ReceptionReport;
use rtcp::receiver_report::ReceiverReport;
use std::time::Instant;

const PACKETS_PER_ENTRY: usize = 64;
const DEFAULT_SIZE: usize = 128;

pub struct ReceiverStats {
    ssrc: u32,
    receiver_ssrc: u32,
    clock_rate: f64,

    packets: Vec<u64>,
    size: usize,
    started: bool,
    seq_num_cycles: u16,
    last_seq_num: u16,
    last_report_seq_num: u16,
    last_rtp_time_rtp: u32,
    last_rtp_time_time: Option<Instant>,
    jitter: f64,
    /// Middle 32 bits of the last SR NTP timestamp.
    last_sender_report: u32,
    last_sender_report_time: Option<Instant>,
    total_lost: u32,
}

impl ReceiverStats {
    pub fn new(ssrc: u32, receiver_ssrc: u32, clock_rate: u32) -> Self {
        ReceiverStats {
            ssrc,
            receiver_ssrc,
            clock_rate: clock_rate as f64,
            packets: vec![0u64; DEFAULT_SIZE],
            size: DEFAULT_SIZE,
            started: false,
            seq_num_cycles: 0,
            last_seq_num: 0,
            last_report_seq_num: 0,
            last_rtp_time_rtp: 0,
            last_rtp_time_time: None,
            jitter: 0.0,
            last_sender_report: 0,
            last_sender_report_time: None,
            total_lost: 0,
        }
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    fn set_received(&mut self, seq: u16) {
        let pos = (seq as usize) % (self.size * PACKETS_PER_ENTRY);
        self.packets[pos / PACKETS_PER_ENTRY] |= 1 << (pos % PACKETS_PER_ENTRY);
    }

    fn del_received(&mut self, seq: u16) {
        let pos = (seq as usize) % (self.size * PACKETS_PER_ENTRY);
        self.packets[pos / PACKETS_PER_ENTRY] &= !(1u64 << (pos % PACKETS_PER_ENTRY));
    }

    fn get_received(&self, seq: u16) -> bool {
        let pos = (seq as usize) % (self.size * PACKETS_PER_ENTRY);
        (self.packets[pos / PACKETS_PER_ENTRY] & (1 << (pos % PACKETS_PER_ENTRY))) != 0
    }

    pub fn on_rtp(&mut self, now: Instant, sequence_number: u16, rtp_timestamp: u32) {
        if !self.started {
            self.started = true;
            self.set_received(sequence_number);
            self.last_seq_num = sequence_number;
            self.last_report_seq_num = sequence_number.wrapping_sub(1);
            self.last_rtp_time_rtp = rtp_timestamp;
            self.last_rtp_time_time = Some(now);
            return;
        }

        self.set_received(sequence_number);

        let diff = sequence_number.wrapping_sub(self.last_seq_num);
        if diff > 0 && diff < (1 << 15) {
            if sequence_number < self.last_seq_num {
                self.seq_num_cycles = self.seq_num_cycles.wrapping_add(1);
            }
            let mut i = self.last_seq_num.wrapping_add(1);
            while i != sequence_number {
                self.del_received(i);
                i = i.wrapping_add(1);
            }
            self.last_seq_num = sequence_number;
        }

        // interarrival jitter, RFC 3550 §A.8
        if let Some(last_time) = self.last_rtp_time_time {
            let d = now.duration_since(last_time).as_secs_f64() * self.clock_rate
                - (rtp_timestamp as f64 - self.last_rtp_time_rtp as f64);
            self.jitter += (d.abs() - self.jitter) / 16.0;
        }
        self.last_rtp_time_rtp = rtp_timestamp;
        self.last_rtp_time_time = Some(now);
    }

    pub fn on_sender_report(&mut self, now: Instant, ntp_time: u64) {
        self.last_sender_report = (ntp_time >> 16) as u32;
        self.last_sender_report_time = Some(now);
    }

    pub fn generate_report(&mut self, now: Instant) -> ReceiverReport {
        let total_since = self.last_seq_num.wrapping_sub(self.last_report_seq_num);
        let mut lost_since = 0u32;
        if self.last_seq_num != self.last_report_seq_num {
            let mut i = self.last_report_seq_num.wrapping_add(1);
            while i != self.last_seq_num {
                if !self.get_received(i) {
                    lost_since += 1;
                }
                i = i.wrapping_add(1);
            }
        }

        self.total_lost = (self.total_lost + lost_since).min(0xFFFFFF);

        let delay = match self.last_sender_report_time {
            Some(t) => (now.duration_since(t).as_secs_f64() * 65536.0) as u32,
            None => 0,
        };
        let fraction_lost = if total_since > 0 {
            ((lost_since.min(0xFFFFFF) * 256) as f64 / total_since as f64) as u8
        } else {
            0
        };

        let report = ReceiverReport {
            ssrc: self.receiver_ssrc,
            reports: vec![ReceptionReport {
                ssrc: self.ssrc,
                fraction_lost,
                total_lost: self.total_lost,
                last_sequence_number: ((self.seq_num_cycles as u32) << 16)
                    | self.last_seq_num as u32,
                jitter: self.jitter as u32,
                last_sender_report: self.last_sender_report,
                delay,
            }],
        };
        self.last_report_seq_num = self.last_seq_num;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_loss_accounting() {
        let mut stats = ReceiverStats::new(0x1234, 0x5678, 90000);
        let t0 = Instant::now();
        stats.on_rtp(t0, 100, 0);
        stats.on_rtp(t0 + Duration::from_millis(33), 101, 2970);
        // skip 102, 103
        stats.on_rtp(t0 + Duration::from_millis(133), 104, 11880);

        let report = stats.generate_report(t0 + Duration::from_millis(150));
        let rb = &report.reports[0];
        assert_eq!(rb.ssrc, 0x1234);
        assert_eq!(report.ssrc, 0x5678);
        assert_eq!(rb.total_lost, 2);
        assert_eq!(rb.last_sequence_number & 0xFFFF, 104);
        assert!(rb.fraction_lost > 0);
    }

    #[test]
    fn test_dlsr_zero_without_sr() {
        let mut stats = ReceiverStats::new(1, 2, 90000);
        let t0 = Instant::now();
        stats.on_rtp(t0, 0, 0);
        let report = stats.generate_report(t0 + Duration::from_secs(1));
        assert_eq!(report.reports[0].delay, 0);
        assert_eq!(report.reports[0].last_sender_report, 0);
    }

    #[test]
    fn test_sr_echo() {
        let mut stats = ReceiverStats::new(1, 2, 90000);
        let t0 = Instant::now();
        stats.on_rtp(t0, 0, 0);
        stats.on_sender_report(t0, 0xDA8BD1FC_DDDDA05A);
        let report = stats.generate_report(t0 + Duration::from_millis(500));
        assert_eq!(report.reports[0].last_sender_report, 0xD1FCDDDD);
        // about half a second in 1/65536 units
        let delay = report.reports[0].delay;
        assert!((30000..36000).contains(&delay));
    }

    #[test]
    fn test_jitter_settles_for_steady_stream() {
        let mut stats = ReceiverStats::new(1, 2, 90000);
        let t0 = Instant::now();
        for i in 0..50u16 {
            stats.on_rtp(
                t0 + Duration::from_millis(20 * i as u64),
                i,
                (i as u32) * 1800,
            );
        }
        assert!(stats.jitter() < 10.0);
    }
}
