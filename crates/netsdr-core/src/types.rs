//! Wire data model for the NetSDR control and data protocol.
//!
//! These types are produced by the codec in `netsdr-protocol` and consumed by
//! the client. They are transient: decoded per read and dropped after the
//! correlator wait, the reorder window, or delivery.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

/// Largest value the 13-bit header length field can carry.
pub const MAX_MESSAGE_LENGTH: u16 = 0x1FFF;

/// Size of the packed message header in bytes.
pub const HEADER_LEN: usize = 2;

/// Message type carried in the top 3 bits of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Host sets a control item; the receiver echoes it back as an ACK.
    SetControlItem,
    /// Receiver reports a control item change on its own.
    UnsolicitedControlItem,
    /// Data item channel 0 (IQ sample packets on UDP).
    DataItem0,
    /// Any other 3-bit value. The raw bits are kept so headers round-trip.
    Unknown(u8),
}

impl MessageType {
    /// Map a raw 3-bit type value. Values above 7 are masked.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0b000 => MessageType::SetControlItem,
            0b001 => MessageType::UnsolicitedControlItem,
            0b100 => MessageType::DataItem0,
            other => MessageType::Unknown(other),
        }
    }

    /// Raw 3-bit value of this type.
    pub fn bits(&self) -> u8 {
        match self {
            MessageType::SetControlItem => 0b000,
            MessageType::UnsolicitedControlItem => 0b001,
            MessageType::DataItem0 => 0b100,
            MessageType::Unknown(bits) => bits & 0b111,
        }
    }
}

/// Decoded 2-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    /// Total message length in bytes, including these 2 header bytes.
    pub message_length: u16,
    /// Message type from the top 3 bits.
    pub message_type: MessageType,
}

/// 16-bit control item code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlItemCode {
    /// Receiver state (run/stop, capture mode) -- 0x0018.
    ReceiverState,
    /// Receiver NCO frequency -- 0x0020.
    ReceiverFrequency,
    /// Any item code this client does not model.
    Unknown(u16),
}

impl ControlItemCode {
    /// Map a raw item code. Unknown codes are kept, never rejected.
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0018 => ControlItemCode::ReceiverState,
            0x0020 => ControlItemCode::ReceiverFrequency,
            other => ControlItemCode::Unknown(other),
        }
    }

    /// Raw 16-bit item code.
    pub fn code(&self) -> u16 {
        match self {
            ControlItemCode::ReceiverState => 0x0018,
            ControlItemCode::ReceiverFrequency => 0x0020,
            ControlItemCode::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for ControlItemCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlItemCode::ReceiverState => write!(f, "receiver state"),
            ControlItemCode::ReceiverFrequency => write!(f, "receiver frequency"),
            ControlItemCode::Unknown(code) => write!(f, "item 0x{code:04X}"),
        }
    }
}

/// A framed control-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlItemMessage {
    /// The message header.
    pub header: Header,
    /// Item code from bytes 2-3. `None` for a bare 2-byte header (NAK).
    pub item_code: Option<ControlItemCode>,
    /// Opaque parameter bytes after the item code.
    pub parameters: Bytes,
}

impl ControlItemMessage {
    /// Whether this is the bare-header NAK shape (total length 2).
    pub fn is_nak(&self) -> bool {
        self.header.message_length as usize == HEADER_LEN
    }
}

/// A decoded IQ data packet from the UDP channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItemMessage {
    /// The message header.
    pub header: Header,
    /// 16-bit wrapping sequence number, bit-identical to the unsigned wire value.
    pub sequence_number: i16,
    /// Raw 16-bit sample bytes (512 or 1024).
    pub sample_bytes: Bytes,
}

/// Capture mode parameter of the "set receiver state" command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// 16-bit samples sent contiguously to the host.
    Contiguous16Bit,
    /// 24-bit samples sent contiguously to the host.
    Contiguous24Bit,
    /// 16-bit samples captured in a FIFO, then sent.
    Fifo16Bit,
    /// 24-bit hardware-triggered pulse mode.
    HardwareTriggered24Bit,
    /// 16-bit hardware-triggered pulse mode.
    HardwareTriggered16Bit,
}

impl CaptureMode {
    /// Wire byte for this mode.
    pub fn to_byte(self) -> u8 {
        match self {
            CaptureMode::Contiguous16Bit => 0x00,
            CaptureMode::Contiguous24Bit => 0x80,
            CaptureMode::Fifo16Bit => 0x01,
            CaptureMode::HardwareTriggered24Bit => 0x83,
            CaptureMode::HardwareTriggered16Bit => 0x03,
        }
    }
}

/// Receiver channel selector for the frequency command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Channel 1 NCO.
    Channel1,
    /// Channel 2 NCO.
    Channel2,
    /// All channels.
    All,
}

impl ChannelId {
    /// Wire byte for this channel.
    pub fn to_byte(self) -> u8 {
        match self {
            ChannelId::Channel1 => 0x00,
            ChannelId::Channel2 => 0x02,
            ChannelId::All => 0xFF,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Channel1 => write!(f, "1"),
            ChannelId::Channel2 => write!(f, "2"),
            ChannelId::All => write!(f, "all"),
        }
    }
}

/// Error returned when a string cannot be parsed into a [`ChannelId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChannelError(String);

impl fmt::Display for ParseChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel: {} (expected 1, 2 or all)", self.0)
    }
}

impl std::error::Error for ParseChannelError {}

impl FromStr for ChannelId {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "a" => Ok(ChannelId::Channel1),
            "2" | "b" => Ok(ChannelId::Channel2),
            "all" => Ok(ChannelId::All),
            _ => Err(ParseChannelError(s.to_string())),
        }
    }
}

/// Lifecycle state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// No control connection.
    Disconnected,
    /// Control connection is being opened.
    Connecting,
    /// Control connection is up; no data stream.
    Connected,
    /// Control connection is up and IQ data is being received.
    Streaming,
}

impl ClientState {
    /// Whether commands may be issued in this state.
    pub fn accepts_commands(&self) -> bool {
        matches!(self, ClientState::Connected | ClientState::Streaming)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Streaming => "streaming",
        };
        write!(f, "{s}")
    }
}
