//! IQ data packet generators.
//!
//! Samples are random bytes from a seeded RNG so failures reproduce.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use netsdr_core::error::Result;
use netsdr_core::types::{DataItemMessage, Header, MessageType};
use netsdr_protocol::codec::{self, DATA_PREFIX_LEN};

/// Produces consecutive data item packets with wrapping sequence numbers.
pub struct PacketGenerator {
    rng: StdRng,
    next_sequence: i16,
    sample_len: usize,
}

impl PacketGenerator {
    /// Generator for 1024-byte packets starting at sequence 0.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            next_sequence: 0,
            sample_len: 1024,
        }
    }

    /// Start numbering at `sequence`.
    pub fn starting_at(mut self, sequence: i16) -> Self {
        self.next_sequence = sequence;
        self
    }

    /// Emit 512-byte packets instead of 1024.
    pub fn half_size(mut self) -> Self {
        self.sample_len = 512;
        self
    }

    /// Random sample bytes of the configured length.
    pub fn samples(&mut self) -> Vec<u8> {
        let mut samples = vec![0u8; self.sample_len];
        self.rng.fill(&mut samples[..]);
        samples
    }

    /// Encoded packet carrying `sequence`, without advancing the counter.
    pub fn packet(&mut self, sequence: i16) -> Result<Bytes> {
        let samples = self.samples();
        codec::encode_data_message(sequence, &samples)
    }

    /// Next encoded packet in sequence.
    pub fn next_packet(&mut self) -> Result<Bytes> {
        let sequence = self.advance();
        self.packet(sequence)
    }

    /// Next decoded message in sequence.
    pub fn next_message(&mut self) -> DataItemMessage {
        let sequence = self.advance();
        let samples = self.samples();
        data_message(sequence, samples)
    }

    fn advance(&mut self) -> i16 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }
}

/// Build a decoded data message directly.
pub fn data_message(sequence_number: i16, sample_bytes: impl Into<Bytes>) -> DataItemMessage {
    let sample_bytes = sample_bytes.into();
    DataItemMessage {
        header: Header {
            message_length: (DATA_PREFIX_LEN + sample_bytes.len()) as u16,
            message_type: MessageType::DataItem0,
        },
        sequence_number,
        sample_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_wraps() {
        let mut generator = PacketGenerator::new(1).starting_at(i16::MAX);
        assert_eq!(generator.next_message().sequence_number, i16::MAX);
        assert_eq!(generator.next_message().sequence_number, i16::MIN);
    }

    #[test]
    fn packets_decode() {
        let mut generator = PacketGenerator::new(7).starting_at(73).half_size();
        let packet = generator.next_packet().unwrap();
        assert_eq!(packet.len(), DATA_PREFIX_LEN + 512);

        let msg = codec::decode_data_message(&packet).unwrap();
        assert_eq!(msg.sequence_number, 73);
    }

    #[test]
    fn same_seed_same_samples() {
        let a = PacketGenerator::new(42).next_packet().unwrap();
        let b = PacketGenerator::new(42).next_packet().unwrap();
        assert_eq!(a, b);
    }
}
