//! Bounded reorder and duplicate-suppression window for IQ data packets.
//!
//! UDP may deliver data packets out of order or more than once. The
//! [`ReorderBuffer`] holds up to `capacity` packets and, once full, releases
//! the one with the smallest sequence number on every new arrival. This is
//! best effort: a packet delayed by more than `capacity` arrivals still comes
//! out late.
//!
//! Sequence numbers are a 16-bit wrapping counter. [`SequenceOrdering`]
//! selects how they are compared.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use tracing::trace;

use netsdr_core::types::DataItemMessage;

/// How the reorder buffer compares sequence numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SequenceOrdering {
    /// Plain signed 16-bit comparison. Misorders a window that straddles
    /// the wrap from 32767 to -32768.
    #[default]
    Signed,
    /// Unwrap each sequence number onto a 64-bit counter using its modular
    /// distance from the previous arrival, so ordering survives the wrap.
    Wrapping,
}

struct Entry {
    key: i64,
    message: DataItemMessage,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Min-ordered window of data packets keyed by sequence number.
pub struct ReorderBuffer {
    heap: BinaryHeap<Reverse<Entry>>,
    resident: HashSet<i16>,
    capacity: usize,
    ordering: SequenceOrdering,
    last_key: Option<i64>,
    duplicates_dropped: u64,
}

impl ReorderBuffer {
    /// A buffer holding at most `capacity` packets. Capacity 0 passes every
    /// packet straight through in arrival order.
    pub fn new(capacity: usize, ordering: SequenceOrdering) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity + 1),
            resident: HashSet::with_capacity(capacity + 1),
            capacity,
            ordering,
            last_key: None,
            duplicates_dropped: 0,
        }
    }

    /// Insert a packet and return the packet evicted by it, if any.
    ///
    /// A packet whose sequence number is already resident is dropped.
    pub fn feed(&mut self, message: DataItemMessage) -> Option<DataItemMessage> {
        let sequence = message.sequence_number;
        if self.resident.contains(&sequence) {
            self.duplicates_dropped += 1;
            trace!(sequence, "dropping duplicate data packet");
            return None;
        }

        let key = self.key_for(sequence);
        self.resident.insert(sequence);
        self.heap.push(Reverse(Entry { key, message }));

        if self.heap.len() > self.capacity {
            self.pop()
        } else {
            None
        }
    }

    /// Remove every resident packet, smallest sequence first.
    pub fn drain(&mut self) -> Vec<DataItemMessage> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(message) = self.pop() {
            out.push(message);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packets discarded as duplicates of a resident packet.
    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates_dropped
    }

    fn pop(&mut self) -> Option<DataItemMessage> {
        let Reverse(entry) = self.heap.pop()?;
        self.resident.remove(&entry.message.sequence_number);
        Some(entry.message)
    }

    fn key_for(&mut self, sequence: i16) -> i64 {
        match self.ordering {
            SequenceOrdering::Signed => i64::from(sequence),
            SequenceOrdering::Wrapping => {
                let key = match self.last_key {
                    None => i64::from(sequence as u16),
                    Some(last) => {
                        let delta = (sequence as u16).wrapping_sub(last as u16) as i16;
                        last + i64::from(delta)
                    }
                };
                self.last_key = Some(key);
                key
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsdr_test_harness::data_message;

    fn msg(sequence: i16) -> DataItemMessage {
        data_message(sequence, vec![sequence as u8; 512])
    }

    fn sequences(messages: &[DataItemMessage]) -> Vec<i16> {
        messages.iter().map(|m| m.sequence_number).collect()
    }

    #[test]
    fn capacity_zero_passes_through() {
        let mut buffer = ReorderBuffer::new(0, SequenceOrdering::Signed);
        for sequence in [75, 73, 74] {
            let out = buffer.feed(msg(sequence)).unwrap();
            assert_eq!(out.sequence_number, sequence);
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn duplicate_keeps_first() {
        let mut buffer = ReorderBuffer::new(5, SequenceOrdering::Signed);
        let first = data_message(10, vec![1u8; 512]);
        let second = data_message(10, vec![2u8; 512]);

        assert!(buffer.feed(first.clone()).is_none());
        assert!(buffer.feed(second).is_none());
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.duplicates_dropped(), 1);
        assert_eq!(buffer.drain(), vec![first]);
    }

    #[test]
    fn overflow_evicts_smallest() {
        let mut buffer = ReorderBuffer::new(3, SequenceOrdering::Signed);
        assert!(buffer.feed(msg(12)).is_none());
        assert!(buffer.feed(msg(10)).is_none());
        assert!(buffer.feed(msg(11)).is_none());

        let evicted = buffer.feed(msg(13)).unwrap();
        assert_eq!(evicted.sequence_number, 10);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn reorders_within_window() {
        let mut buffer = ReorderBuffer::new(2, SequenceOrdering::Signed);
        let mut out = Vec::new();
        for sequence in [2, 1, 4, 3, 6, 5] {
            out.extend(buffer.feed(msg(sequence)));
        }
        out.extend(buffer.drain());
        assert_eq!(sequences(&out), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn late_packet_beyond_window_comes_out_late() {
        let mut buffer = ReorderBuffer::new(1, SequenceOrdering::Signed);
        let mut out = Vec::new();
        for sequence in [2, 3, 4, 1] {
            out.extend(buffer.feed(msg(sequence)));
        }
        out.extend(buffer.drain());
        assert_eq!(sequences(&out), vec![2, 3, 1, 4]);
    }

    #[test]
    fn evicted_sequence_can_return() {
        let mut buffer = ReorderBuffer::new(1, SequenceOrdering::Signed);
        buffer.feed(msg(5));
        assert_eq!(buffer.feed(msg(6)).unwrap().sequence_number, 5);

        // 5 is no longer resident, so it is accepted again.
        assert_eq!(buffer.feed(msg(5)).unwrap().sequence_number, 5);
        assert_eq!(buffer.duplicates_dropped(), 0);
    }

    #[test]
    fn signed_ordering_misorders_across_wrap() {
        let mut buffer = ReorderBuffer::new(2, SequenceOrdering::Signed);
        buffer.feed(msg(i16::MAX));
        buffer.feed(msg(i16::MIN));
        assert_eq!(sequences(&buffer.drain()), vec![i16::MIN, i16::MAX]);
    }

    #[test]
    fn wrapping_ordering_survives_wrap() {
        let mut buffer = ReorderBuffer::new(3, SequenceOrdering::Wrapping);
        let mut out = Vec::new();
        for sequence in [i16::MAX - 1, i16::MIN, i16::MAX, i16::MIN + 1] {
            out.extend(buffer.feed(msg(sequence)));
        }
        out.extend(buffer.drain());
        assert_eq!(
            sequences(&out),
            vec![i16::MAX - 1, i16::MAX, i16::MIN, i16::MIN + 1]
        );
    }

    #[test]
    fn wrapping_ordering_matches_signed_without_wrap() {
        let order = [7, 5, 6, 9, 8];
        let mut signed = ReorderBuffer::new(2, SequenceOrdering::Signed);
        let mut wrapping = ReorderBuffer::new(2, SequenceOrdering::Wrapping);
        let (mut a, mut b) = (Vec::new(), Vec::new());
        for sequence in order {
            a.extend(signed.feed(msg(sequence)));
            b.extend(wrapping.feed(msg(sequence)));
        }
        a.extend(signed.drain());
        b.extend(wrapping.drain());
        assert_eq!(sequences(&a), sequences(&b));
    }
}
