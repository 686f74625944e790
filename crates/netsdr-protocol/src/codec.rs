//! NetSDR binary message encoder/decoder.
//!
//! Every NetSDR message starts with a 2-byte little-endian header packing a
//! 13-bit length and a 3-bit message type:
//!
//! ```text
//! byte0: length bits 0-7
//! byte1: length bits 8-12 (bits 0-4) | message type (bits 5-7)
//! ```
//!
//! The length counts the header itself. Control messages follow it with a
//! little-endian 16-bit item code and opaque parameters:
//!
//! ```text
//! [header:2][item code:2][parameters:length-4]
//! ```
//!
//! A bare 2-byte header is the receiver's NAK.
//!
//! Data item packets (UDP) carry 16-bit real samples captured in FIFO mode:
//!
//! ```text
//! [header:2][0x04][mode:1][sequence:2][samples:512|1024]
//! ```
//!
//! Mode `0x84` carries 1024 sample bytes, mode `0x82` carries 512.
//!
//! All functions here are pure: no I/O, no state.

use bytes::{BufMut, Bytes, BytesMut};

use netsdr_core::error::{Error, Result};
use netsdr_core::types::{
    CaptureMode, ChannelId, ControlItemCode, ControlItemMessage, DataItemMessage, HEADER_LEN,
    Header, MAX_MESSAGE_LENGTH, MessageType,
};

/// Length of a control message header plus item code.
pub const CONTROL_PREFIX_LEN: usize = 4;

/// Fixed marker byte at offset 2 of every data item packet.
pub const DATA_MARKER: u8 = 0x04;

/// Data mode byte for packets carrying 1024 sample bytes.
pub const DATA_MODE_1024: u8 = 0x84;

/// Data mode byte for packets carrying 512 sample bytes.
pub const DATA_MODE_512: u8 = 0x82;

/// Header + marker + mode + sequence number.
pub const DATA_PREFIX_LEN: usize = 6;

/// Largest data item packet on the wire.
pub const MAX_DATA_PACKET_LEN: usize = DATA_PREFIX_LEN + 1024;

/// Total length of the "set receiver state" command.
pub const RECEIVER_STATE_LEN: usize = 8;

/// Total length of the "set receiver frequency" command.
pub const RECEIVER_FREQUENCY_LEN: usize = 10;

/// Data type parameter bit selecting complex baseband data.
const COMPLEX_DATA_FLAG: u8 = 0x80;

/// Run/stop parameter: idle.
const RUN_STOP_IDLE: u8 = 0x01;

/// Run/stop parameter: run.
const RUN_STOP_RUN: u8 = 0x02;

/// Number of frequency bytes on the wire (40-bit field).
const FREQUENCY_BYTES: usize = 5;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Decode a 2-byte header.
///
/// Pure bit extraction. Unmodelled type values come back as
/// [`MessageType::Unknown`] rather than an error.
///
/// # Example
///
/// ```
/// use netsdr_protocol::codec::decode_header;
/// use netsdr_core::MessageType;
///
/// let header = decode_header(0x08, 0x00);
/// assert_eq!(header.message_length, 8);
/// assert_eq!(header.message_type, MessageType::SetControlItem);
/// ```
pub fn decode_header(byte0: u8, byte1: u8) -> Header {
    let message_length = u16::from(byte0) | (u16::from(byte1 & 0x1F) << 8);
    let message_type = MessageType::from_bits(byte1 >> 5);
    Header {
        message_length,
        message_type,
    }
}

/// Encode a header. Fails if `length` does not fit in 13 bits.
pub fn encode_header(length: u16, message_type: MessageType) -> Result<[u8; 2]> {
    if length > MAX_MESSAGE_LENGTH {
        return Err(Error::InvalidParameter(format!(
            "message length {} exceeds {}",
            length, MAX_MESSAGE_LENGTH
        )));
    }
    Ok(pack_header(length, message_type))
}

fn pack_header(length: u16, message_type: MessageType) -> [u8; 2] {
    [
        (length & 0xFF) as u8,
        ((length >> 8) as u8 & 0x1F) | (message_type.bits() << 5),
    ]
}

// ---------------------------------------------------------------------------
// Control messages
// ---------------------------------------------------------------------------

/// Decode one control message from the front of `bytes`.
///
/// `bytes` must hold at least the header's `message_length` bytes; exactly
/// that many are consumed and anything after them is ignored. A length of 2
/// yields the NAK shape (no item code, no parameters). Unknown item codes
/// are kept as [`ControlItemCode::Unknown`].
pub fn decode_control_message(bytes: &[u8]) -> Result<ControlItemMessage> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Format(format!(
            "control message too short: {} bytes, need a {}-byte header",
            bytes.len(),
            HEADER_LEN
        )));
    }

    let header = decode_header(bytes[0], bytes[1]);
    let length = header.message_length as usize;

    if length < HEADER_LEN {
        return Err(Error::Format(format!(
            "header declares length {}, shorter than the header itself",
            length
        )));
    }
    if bytes.len() < length {
        return Err(Error::Format(format!(
            "header declares {} bytes, only {} available",
            length,
            bytes.len()
        )));
    }

    if length == HEADER_LEN {
        return Ok(ControlItemMessage {
            header,
            item_code: None,
            parameters: Bytes::new(),
        });
    }

    if length < CONTROL_PREFIX_LEN {
        return Err(Error::Format(format!(
            "message length {} cannot hold an item code",
            length
        )));
    }

    let code = u16::from_le_bytes([bytes[2], bytes[3]]);
    Ok(ControlItemMessage {
        header,
        item_code: Some(ControlItemCode::from_code(code)),
        parameters: Bytes::copy_from_slice(&bytes[CONTROL_PREFIX_LEN..length]),
    })
}

/// Encode a control message with an arbitrary type, item code, and parameters.
///
/// Fails if the total length exceeds the 13-bit header field.
pub fn encode_control_item(
    message_type: MessageType,
    item_code: ControlItemCode,
    parameters: &[u8],
) -> Result<Bytes> {
    let length = CONTROL_PREFIX_LEN + parameters.len();
    if length > MAX_MESSAGE_LENGTH as usize {
        return Err(Error::InvalidParameter(format!(
            "control message length {} exceeds {}",
            length, MAX_MESSAGE_LENGTH
        )));
    }
    Ok(put_control_item(message_type, item_code, parameters))
}

/// Encode a bare 2-byte header (the NAK shape).
pub fn encode_nak(message_type: MessageType) -> Bytes {
    Bytes::copy_from_slice(&pack_header(HEADER_LEN as u16, message_type))
}

fn put_control_item(
    message_type: MessageType,
    item_code: ControlItemCode,
    parameters: &[u8],
) -> Bytes {
    let length = CONTROL_PREFIX_LEN + parameters.len();
    let mut buf = BytesMut::with_capacity(length);
    buf.put_slice(&pack_header(length as u16, message_type));
    buf.put_u16_le(item_code.code());
    buf.put_slice(parameters);
    buf.freeze()
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Encode the "set receiver state" command (item 0x0018, 8 bytes).
///
/// Parameters: data type (bit 7 set for complex data), run/stop
/// (`0x02` run, `0x01` idle), capture mode, FIFO size.
///
/// # Example
///
/// ```
/// use netsdr_protocol::codec::encode_set_receiver_state;
/// use netsdr_core::CaptureMode;
///
/// let cmd = encode_set_receiver_state(false, true, CaptureMode::Fifo16Bit, 10);
/// assert_eq!(&cmd[..], &[0x08, 0x00, 0x18, 0x00, 0x00, 0x02, 0x01, 0x0A]);
/// ```
pub fn encode_set_receiver_state(
    is_complex_data: bool,
    is_start: bool,
    capture_mode: CaptureMode,
    fifo_size: u8,
) -> Bytes {
    let data_type = if is_complex_data { COMPLEX_DATA_FLAG } else { 0 };
    let run_stop = if is_start { RUN_STOP_RUN } else { RUN_STOP_IDLE };
    put_control_item(
        MessageType::SetControlItem,
        ControlItemCode::ReceiverState,
        &[data_type, run_stop, capture_mode.to_byte(), fifo_size],
    )
}

/// Encode the "set receiver frequency" command (item 0x0020, 10 bytes).
///
/// The frequency field is 40 bits wide; bits above 40 are dropped.
pub fn encode_set_receiver_frequency(channel: ChannelId, frequency_hz: i64) -> Bytes {
    let mut params = [0u8; 1 + FREQUENCY_BYTES];
    params[0] = channel.to_byte();
    params[1..].copy_from_slice(&frequency_hz.to_le_bytes()[..FREQUENCY_BYTES]);
    put_control_item(
        MessageType::SetControlItem,
        ControlItemCode::ReceiverFrequency,
        &params,
    )
}

/// Decode the 40-bit frequency parameter of a frequency control item.
///
/// `parameters` is the parameter block after the item code (channel byte
/// followed by 5 frequency bytes).
pub fn decode_frequency_parameters(parameters: &[u8]) -> Result<(u8, i64)> {
    if parameters.len() < 1 + FREQUENCY_BYTES {
        return Err(Error::Format(format!(
            "frequency parameters too short: {} bytes",
            parameters.len()
        )));
    }
    let mut raw = [0u8; 8];
    raw[..FREQUENCY_BYTES].copy_from_slice(&parameters[1..1 + FREQUENCY_BYTES]);
    Ok((parameters[0], i64::from_le_bytes(raw)))
}

// ---------------------------------------------------------------------------
// Data items
// ---------------------------------------------------------------------------

/// Decode a data item packet from one complete UDP datagram.
///
/// Fails if the marker byte is not `0x04`, the mode byte is neither `0x82`
/// nor `0x84`, or the sample byte count differs from the mode's length.
/// The header length field is not compared with the datagram size.
pub fn decode_data_message(bytes: &[u8]) -> Result<DataItemMessage> {
    if bytes.len() < DATA_PREFIX_LEN {
        return Err(Error::Format(format!(
            "data packet too short: {} bytes, minimum is {}",
            bytes.len(),
            DATA_PREFIX_LEN
        )));
    }

    let header = decode_header(bytes[0], bytes[1]);

    if bytes[2] != DATA_MARKER {
        return Err(Error::Format(format!(
            "data marker 0x{:02X}, expected 0x{:02X}",
            bytes[2], DATA_MARKER
        )));
    }

    let expected = sample_len_for_mode(bytes[3])?;
    let samples = &bytes[DATA_PREFIX_LEN..];
    if samples.len() != expected {
        return Err(Error::Format(format!(
            "data mode 0x{:02X} implies {} sample bytes, packet carries {}",
            bytes[3],
            expected,
            samples.len()
        )));
    }

    Ok(DataItemMessage {
        header,
        sequence_number: i16::from_le_bytes([bytes[4], bytes[5]]),
        sample_bytes: Bytes::copy_from_slice(samples),
    })
}

/// Encode a data item packet. `sample_bytes` must be 512 or 1024 bytes long.
pub fn encode_data_message(sequence_number: i16, sample_bytes: &[u8]) -> Result<Bytes> {
    let mode = match sample_bytes.len() {
        1024 => DATA_MODE_1024,
        512 => DATA_MODE_512,
        other => {
            return Err(Error::InvalidParameter(format!(
                "data packets carry 512 or 1024 sample bytes, got {}",
                other
            )));
        }
    };

    let length = DATA_PREFIX_LEN + sample_bytes.len();
    let mut buf = BytesMut::with_capacity(length);
    buf.put_slice(&pack_header(length as u16, MessageType::DataItem0));
    buf.put_u8(DATA_MARKER);
    buf.put_u8(mode);
    buf.put_i16_le(sequence_number);
    buf.put_slice(sample_bytes);
    Ok(buf.freeze())
}

fn sample_len_for_mode(mode: u8) -> Result<usize> {
    match mode {
        DATA_MODE_1024 => Ok(1024),
        DATA_MODE_512 => Ok(512),
        other => Err(Error::Format(format!(
            "unsupported data mode 0x{:02X}",
            other
        ))),
    }
}
