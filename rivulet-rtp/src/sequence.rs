/// Monotonic RTP sequence counter with u16 wraparound.
#[derive(Debug, Clone)]
pub struct Sequencer {
    next: u16,
    roll_overs: u64,
    started: bool,
}

impl Sequencer {
    pub fn new(start: u16) -> Self {
        Sequencer {
            next: start,
            roll_overs: 0,
            started: false,
        }
    }

    /// Start from a random point, as senders should.
    pub fn new_random() -> Self {
        Self::new(rand::random())
    }

    /// Allocate the next sequence number.
    pub fn next_sequence_number(&mut self) -> u16 {
        let seq = self.next;
        let (next, wrapped) = self.next.overflowing_add(1);
        self.next = next;
        if self.started && wrapped {
            self.roll_overs += 1;
        }
        self.started = true;
        seq
    }

    /// Sequence number the next call will return.
    pub fn peek(&self) -> u16 {
        self.next
    }

    pub fn roll_over_count(&self) -> u64 {
        self.roll_overs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increments_and_wraps() {
        let mut seq = Sequencer::new(65534);
        assert_eq!(seq.next_sequence_number(), 65534);
        assert_eq!(seq.next_sequence_number(), 65535);
        assert_eq!(seq.next_sequence_number(), 0);
        assert_eq!(seq.roll_over_count(), 1);
        assert_eq!(seq.peek(), 1);
    }
}
