use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Offset in seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// Sentinel disabling a socket recv/send timer.
pub const NO_TIMEOUT: Duration = Duration::from_secs(u64::MAX / 2);

/// 64-bit NTP timestamp: upper 32 bits seconds, lower 32 bits fraction.
pub fn system_time_to_ntp(t: SystemTime) -> u64 {
    let since_unix = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    let secs = since_unix.as_secs() + NTP_UNIX_OFFSET_SECS;
    let frac = ((since_unix.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (secs << 32) | frac
}

/// Middle 32 bits of a 64-bit NTP timestamp, as carried in SR/DLRR blocks.
pub fn compact_ntp(ntp: u64) -> u32 {
    (ntp >> 16) as u32
}

/// Convert a compact-NTP interval (1/65536 s units) to a duration.
pub fn compact_ntp_to_duration(v: u32) -> Duration {
    Duration::from_micros((v as u64 * 1_000_000) >> 16)
}

/// Convert a duration to compact-NTP 1/65536 s units.
pub fn duration_to_compact_ntp(d: Duration) -> u32 {
    ((d.as_micros() as u64) << 16).checked_div(1_000_000).unwrap_or(0) as u32
}
