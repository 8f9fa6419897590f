//! Sender-side retransmit buffer serving incoming NACKs.

use rtp::Packet;

const UINT16_SIZE_HALF: u16 = 1 << 15;

/// Circular buffer of sent RTP packets indexed by sequence number.
pub struct SendBuffer {
    packets: Vec<Option<Packet>>,
    size: u16,
    highest_added: u16,
    started: bool,
}

impl SendBuffer {
    /// `size` must be a power of two no larger than 32768.
    pub fn new(size: u16) -> Option<Self> {
        let is_valid = (0..=15).any(|i| size == 1 << i);
        if !is_valid {
            return None;
        }
        Some(SendBuffer {
            packets: vec![None; size as usize],
            size,
            highest_added: 0,
            started: false,
        })
    }

    pub fn add(&mut self, packet: Packet) {
        let seq = packet.header.sequence_number;

        if !self.started {
            self.packets[(seq % self.size) as usize] = Some(packet);
            self.highest_added = seq;
            self.started = true;
            return;
        }

        let diff = seq.wrapping_sub(self.highest_added);
        if diff == 0 {
            return;
        }
        if diff < UINT16_SIZE_HALF {
            let mut i = self.highest_added.wrapping_add(1);
            while i != seq {
                self.packets[(i % self.size) as usize] = None;
                i = i.wrapping_add(1);
            }
            self.highest_added = seq;
        }
        self.packets[(seq % self.size) as usize] = Some(packet);
    }

    pub fn get(&self, seq: u16) -> Option<&Packet> {
        if !self.started {
            return None;
        }
        let diff = self.highest_added.wrapping_sub(seq);
        if diff >= UINT16_SIZE_HALF || diff >= self.size {
            return None;
        }
        let packet = self.packets[(seq % self.size) as usize].as_ref()?;
        if packet.header.sequence_number != seq {
            return None;
        }
        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtp::Header;

    fn packet(seq: u16) -> Packet {
        Packet {
            header: Header {
                sequence_number: seq,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_store_and_fetch() {
        let mut buffer = SendBuffer::new(128).unwrap();
        for seq in 0..10u16 {
            buffer.add(packet(seq));
        }
        assert_eq!(buffer.get(5).unwrap().header.sequence_number, 5);
        assert!(buffer.get(10).is_none());
    }

    #[test]
    fn test_old_packets_evicted() {
        let mut buffer = SendBuffer::new(64).unwrap();
        buffer.add(packet(0));
        buffer.add(packet(100));
        assert!(buffer.get(0).is_none());
        assert_eq!(buffer.get(100).unwrap().header.sequence_number, 100);
    }

    #[test]
    fn test_wraparound_fetch() {
        let mut buffer = SendBuffer::new(64).unwrap();
        buffer.add(packet(65535));
        buffer.add(packet(0));
        assert!(buffer.get(65535).is_some());
        assert!(buffer.get(0).is_some());
    }
}
