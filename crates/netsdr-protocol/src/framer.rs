//! Control stream framing and routing.
//!
//! TCP delivers the control channel as an unstructured byte stream: one read
//! may hold a fragment of a message, exactly one message, or several. The
//! [`ControlFramer`] accumulates reads and carves complete messages using the
//! length in each header. [`classify`] decides where a framed message goes.

use bytes::BytesMut;
use tracing::{debug, warn};

use netsdr_core::types::{ControlItemMessage, HEADER_LEN, MessageType};

use crate::codec;

/// Reassembles control messages from arbitrary read boundaries.
#[derive(Debug, Default)]
pub struct ControlFramer {
    buffer: BytesMut,
    desynchronized: bool,
    format_errors: u64,
}

impl ControlFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one read and return every message it completed, in order.
    ///
    /// Bytes that do not yet form a whole message stay buffered for the next
    /// call. Messages whose body fails to decode are skipped. A header whose
    /// length is below 2 cannot be resynchronized from: the framer stops
    /// producing messages and [`is_desynchronized`](Self::is_desynchronized)
    /// becomes true.
    pub fn push(&mut self, data: &[u8]) -> Vec<ControlItemMessage> {
        let mut messages = Vec::new();
        if self.desynchronized {
            return messages;
        }

        self.buffer.extend_from_slice(data);

        while self.buffer.len() >= HEADER_LEN {
            let header = codec::decode_header(self.buffer[0], self.buffer[1]);
            let length = header.message_length as usize;

            if length < HEADER_LEN {
                warn!(length, "control stream header below minimum length, stream desynchronized");
                self.desynchronized = true;
                self.buffer.clear();
                break;
            }

            if self.buffer.len() < length {
                break;
            }

            let frame = self.buffer.split_to(length);
            match codec::decode_control_message(&frame) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    self.format_errors += 1;
                    warn!(length, "skipping malformed control message: {}", e);
                }
            }
        }

        messages
    }

    /// Finalize at end of input, discarding any partial message.
    ///
    /// Returns the number of bytes dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 {
            debug!(dropped, "discarding partial control message at end of stream");
        }
        self.buffer.clear();
        dropped
    }

    /// Whether an unrecoverable header was seen.
    pub fn is_desynchronized(&self) -> bool {
        self.desynchronized
    }

    /// Bytes held waiting for the rest of a message.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Count of messages skipped because their body failed to decode.
    pub fn format_errors(&self) -> u64 {
        self.format_errors
    }
}

/// Where a framed control message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// How many times the message is pushed to the response channel.
    pub response_copies: usize,
    /// Whether the message is also published as unsolicited.
    pub unsolicited: bool,
}

/// Route a framed control message.
///
/// A bare header (length 2) is a reply and goes to the response channel.
/// An unsolicited item also goes to the unsolicited channel. Every message
/// additionally goes to the response channel, so a bare header lands there
/// twice.
pub fn classify(message: &ControlItemMessage) -> Classification {
    let mut response_copies = 0;
    if message.is_nak() {
        response_copies += 1;
    }
    let unsolicited = message.header.message_type == MessageType::UnsolicitedControlItem;
    response_copies += 1;

    Classification {
        response_copies,
        unsolicited,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsdr_core::types::{CaptureMode, ChannelId, ControlItemCode};

    use crate::codec::{
        encode_control_item, encode_nak, encode_set_receiver_frequency,
        encode_set_receiver_state,
    };

    #[test]
    fn reassembles_split_message() {
        let msg = encode_set_receiver_frequency(ChannelId::Channel1, 14_010_000);
        let mut framer = ControlFramer::new();

        assert!(framer.push(&msg[..1]).is_empty());
        assert!(framer.push(&msg[1..2]).is_empty());
        let out = framer.push(&msg[2..]);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].item_code, Some(ControlItemCode::ReceiverFrequency));
        assert_eq!(out[0].header.message_length, 10);
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn splits_coalesced_messages_in_order() {
        let a = encode_set_receiver_state(false, true, CaptureMode::Fifo16Bit, 10);
        let b = encode_nak(MessageType::SetControlItem);
        let c = encode_set_receiver_frequency(ChannelId::Channel2, 7_074_000);

        let mut stream = Vec::new();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);
        stream.extend_from_slice(&c);
        stream.extend_from_slice(&a[..3]);

        let mut framer = ControlFramer::new();
        let out = framer.push(&stream);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].item_code, Some(ControlItemCode::ReceiverState));
        assert!(out[1].is_nak());
        assert_eq!(out[2].item_code, Some(ControlItemCode::ReceiverFrequency));
        assert_eq!(framer.buffered_len(), 3);

        let out = framer.push(&a[3..]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].item_code, Some(ControlItemCode::ReceiverState));
    }

    #[test]
    fn byte_at_a_time_matches_single_read() {
        let a = encode_set_receiver_state(true, false, CaptureMode::Contiguous16Bit, 0);
        let b = encode_set_receiver_frequency(ChannelId::All, 3_500_000);
        let stream: Vec<u8> = a.iter().chain(b.iter()).copied().collect();

        let mut whole = ControlFramer::new();
        let expected = whole.push(&stream);

        let mut trickle = ControlFramer::new();
        let mut got = Vec::new();
        for byte in &stream {
            got.extend(trickle.push(std::slice::from_ref(byte)));
        }

        assert_eq!(got, expected);
    }

    #[test]
    fn length_three_message_is_skipped() {
        let good = encode_set_receiver_frequency(ChannelId::Channel1, 1_000_000);
        let mut stream = vec![0x03, 0x00, 0x18];
        stream.extend_from_slice(&good);

        let mut framer = ControlFramer::new();
        let out = framer.push(&stream);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].item_code, Some(ControlItemCode::ReceiverFrequency));
        assert_eq!(framer.format_errors(), 1);
        assert!(!framer.is_desynchronized());
    }

    #[test]
    fn short_length_header_desynchronizes() {
        let good = encode_set_receiver_frequency(ChannelId::Channel1, 1_000_000);
        let mut stream = good.to_vec();
        stream.extend_from_slice(&[0x01, 0x00, 0xAA, 0xBB]);

        let mut framer = ControlFramer::new();
        let out = framer.push(&stream);

        assert_eq!(out.len(), 1);
        assert!(framer.is_desynchronized());
        assert!(framer.push(&good).is_empty());
    }

    #[test]
    fn finish_discards_partial_tail() {
        let msg = encode_set_receiver_state(false, true, CaptureMode::Fifo16Bit, 10);
        let mut framer = ControlFramer::new();
        assert!(framer.push(&msg[..5]).is_empty());
        assert_eq!(framer.finish(), 5);
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn classify_ack_goes_to_response_once() {
        let ack = codec::decode_control_message(&encode_set_receiver_state(
            false,
            true,
            CaptureMode::Fifo16Bit,
            10,
        ))
        .unwrap();
        assert_eq!(
            classify(&ack),
            Classification {
                response_copies: 1,
                unsolicited: false
            }
        );
    }

    #[test]
    fn classify_nak_goes_to_response_twice() {
        let nak = codec::decode_control_message(&encode_nak(MessageType::SetControlItem)).unwrap();
        assert_eq!(
            classify(&nak),
            Classification {
                response_copies: 2,
                unsolicited: false
            }
        );
    }

    #[test]
    fn classify_unsolicited_goes_to_both() {
        let bytes = encode_control_item(
            MessageType::UnsolicitedControlItem,
            ControlItemCode::ReceiverFrequency,
            &[0x00, 0x10, 0x27, 0x00, 0x00, 0x00],
        )
        .unwrap();
        let msg = codec::decode_control_message(&bytes).unwrap();
        assert_eq!(
            classify(&msg),
            Classification {
                response_copies: 1,
                unsolicited: true
            }
        );
    }
}
