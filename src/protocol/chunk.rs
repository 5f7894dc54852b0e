//! RTMP chunk stream codec
//!
//! RTMP messages are split into chunks for multiplexing. Each chunk has a header
//! that identifies the chunk stream and message being sent.
//!
//! ```text
//! Chunk Format:
//! +-------------+----------------+-------------------+
//! | Basic Header| Message Header | Chunk Data        |
//! | (1-3 bytes) | (0,3,7,11 bytes)| (variable)       |
//! +-------------+----------------+-------------------+
//!
//! Basic Header formats:
//! - 1 byte:  fmt(2) + csid(6)        for csid 2-63
//! - 2 bytes: fmt(2) + 0 + csid(8)    for csid 64-319
//! - 3 bytes: fmt(2) + 1 + csid(16)   for csid 64-65599
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4, LE)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (use previous chunk's values)
//!
//! Extended timestamp (4 bytes) follows the message header when the 3-byte
//! field is 0xFFFFFF, and is repeated on every continuation chunk of the
//! same message.
//! ```
//!
//! Reference: RTMP Specification Section 5.3

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// A complete RTMP message (reassembled from chunks)
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpChunk {
    /// Chunk stream ID (for multiplexing)
    pub csid: u32,
    /// Message timestamp (milliseconds)
    pub timestamp: u32,
    /// Message type ID
    pub message_type: u8,
    /// Message stream ID
    pub stream_id: u32,
    /// Message payload
    pub payload: Bytes,
}

/// Per-chunk-stream state for reassembly and header compression
#[derive(Debug, Clone, Default)]
struct ChunkStreamState {
    /// Last timestamp (absolute)
    timestamp: u32,
    /// Last timestamp delta
    timestamp_delta: u32,
    /// Last message length
    message_length: u32,
    /// Last message type
    message_type: u8,
    /// Last message stream ID
    stream_id: u32,
    /// Whether the current message carries an extended timestamp
    has_extended_timestamp: bool,
    /// Buffer for partial message reassembly
    partial_message: BytesMut,
    /// Expected total length of current message
    expected_length: u32,
    /// A partial payload is pending; the next chunk must be Type 3
    fragmented: bool,
}

/// Chunk stream decoder
///
/// Handles chunk demultiplexing and message reassembly.
pub struct ChunkDecoder {
    /// Maximum incoming chunk size
    chunk_size: u32,
    /// Per-chunk-stream state
    streams: HashMap<u32, ChunkStreamState>,
    /// Maximum message size (sanity limit)
    max_message_size: u32,
}

impl ChunkDecoder {
    /// Create a new decoder with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Set the chunk size (called when receiving SetChunkSize message)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.min(MAX_CHUNK_SIZE);
    }

    /// Get current chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Try to decode a complete message from the buffer
    ///
    /// Returns Ok(Some(chunk)) if a complete message was decoded,
    /// Ok(None) if more data is needed, or Err on protocol error.
    ///
    /// Nothing is consumed from `buf` until a full chunk (headers plus
    /// body) is available, so the call is restartable after Ok(None).
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpChunk>> {
        if buf.is_empty() {
            return Ok(None);
        }

        let (fmt, csid, header_len) = match parse_basic_header(buf)? {
            Some(v) => v,
            None => return Ok(None),
        };

        let state = self.streams.entry(csid).or_default();

        // A pending partial payload may only be continued with Type 3
        if state.fragmented && fmt != CHUNK_FMT_3 {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }

        let msg_header_size = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };

        if buf.len() < header_len + msg_header_size {
            return Ok(None); // Need more header data
        }

        // Peek the message header without consuming
        let header = &buf[header_len..header_len + msg_header_size];
        let (timestamp_field, message_length, message_type, stream_id) = match fmt {
            0 => (
                read_u24(&header[0..3]),
                read_u24(&header[3..6]),
                header[6],
                u32::from_le_bytes([header[7], header[8], header[9], header[10]]),
            ),
            1 => (
                read_u24(&header[0..3]),
                read_u24(&header[3..6]),
                header[6],
                state.stream_id,
            ),
            2 => (
                read_u24(&header[0..3]),
                state.message_length,
                state.message_type,
                state.stream_id,
            ),
            _ => (
                state.timestamp_delta,
                state.message_length,
                state.message_type,
                state.stream_id,
            ),
        };

        let needs_extended = if fmt == CHUNK_FMT_3 {
            state.has_extended_timestamp
        } else {
            timestamp_field >= EXTENDED_TIMESTAMP_THRESHOLD
        };
        let extended_size = if needs_extended { 4 } else { 0 };
        let total_header_size = header_len + msg_header_size + extended_size;

        if message_length > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: message_length,
                max: self.max_message_size,
            }
            .into());
        }

        let continuation = state.fragmented;
        let accumulated = if continuation {
            state.partial_message.len() as u32
        } else {
            0
        };
        let expected = if continuation {
            state.expected_length
        } else {
            message_length
        };
        let chunk_data_len = (expected - accumulated).min(self.chunk_size) as usize;

        if buf.len() < total_header_size + chunk_data_len {
            return Ok(None); // Need the full chunk before consuming anything
        }

        let timestamp_value = if needs_extended {
            let ext = &buf[header_len + msg_header_size..total_header_size];
            u32::from_be_bytes([ext[0], ext[1], ext[2], ext[3]])
        } else {
            timestamp_field
        };

        buf.advance(total_header_size);

        // Continuation chunks repeat the in-flight message's header; the
        // fields only advance when a new message starts.
        if !continuation {
            state.has_extended_timestamp = needs_extended;
            state.timestamp = if fmt == CHUNK_FMT_0 {
                timestamp_value
            } else {
                state.timestamp.wrapping_add(timestamp_value)
            };
            // Per RTMP convention, a Type-3 chunk following a Type-0 chunk
            // reuses the Type-0 timestamp as its delta.
            state.timestamp_delta = timestamp_value;
            state.message_length = message_length;
            state.message_type = message_type;
            state.stream_id = stream_id;
            state.expected_length = message_length;
            state.partial_message.reserve(message_length as usize);
        }

        state.partial_message.put_slice(&buf[..chunk_data_len]);
        buf.advance(chunk_data_len);

        state.fragmented = (state.partial_message.len() as u32) < state.expected_length;

        if state.fragmented {
            Ok(None) // Message not yet complete
        } else {
            let payload = state.partial_message.split().freeze();
            state.expected_length = 0;

            Ok(Some(RtmpChunk {
                csid,
                timestamp: state.timestamp,
                message_type: state.message_type,
                stream_id: state.stream_id,
                payload,
            }))
        }
    }

    /// Abort a message on a chunk stream (when receiving Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.partial_message.clear();
            state.expected_length = 0;
            state.fragmented = false;
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse basic header and return (fmt, csid, header_length)
fn parse_basic_header(buf: &[u8]) -> Result<Option<(u8, u32, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let first = buf[0];
    let fmt = (first >> 6) & 0x03;
    let csid_low = first & 0x3F;

    match csid_low {
        0 => {
            // 2-byte header: csid = 64 + second byte
            if buf.len() < 2 {
                return Ok(None);
            }
            let csid = 64 + buf[1] as u32;
            Ok(Some((fmt, csid, 2)))
        }
        1 => {
            // 3-byte header: csid = 64 + u16_le(second, third)
            if buf.len() < 3 {
                return Ok(None);
            }
            let csid = 64 + buf[1] as u32 + (buf[2] as u32) * 256;
            Ok(Some((fmt, csid, 3)))
        }
        _ => Ok(Some((fmt, csid_low as u32, 1))),
    }
}

/// Read 24-bit big-endian value from a 3-byte slice
fn read_u24(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32)
}

/// Chunk stream encoder
///
/// Encodes messages into chunks for transmission.
pub struct ChunkEncoder {
    /// Outgoing chunk size
    chunk_size: u32,
    /// Per-chunk-stream state for header compression
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkEncoder {
    /// Create a new encoder with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Set the chunk size (call before encoding to use larger chunks)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.min(MAX_CHUNK_SIZE);
    }

    /// Get current chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Encode a message into chunks, selecting the most compact header format
    pub fn encode(&mut self, chunk: &RtmpChunk, buf: &mut BytesMut) {
        let fmt = {
            let state = self.streams.entry(chunk.csid).or_default();
            select_format(chunk, state)
        };
        self.encode_with_format(chunk, fmt, buf);
    }

    /// Encode a message into chunks with a caller-chosen header format
    ///
    /// The stream packager forces Type 0 for the first send on a media or
    /// data channel and Type 1 afterwards. `chunk.timestamp` is always the
    /// absolute message timestamp; deltas are derived from encoder state.
    pub fn encode_with_format(&mut self, chunk: &RtmpChunk, fmt: u8, buf: &mut BytesMut) {
        let csid = chunk.csid;
        let chunk_size = self.chunk_size;

        let state = self.streams.entry(csid).or_default();
        let timestamp_delta = chunk.timestamp.wrapping_sub(state.timestamp);

        // The 3-byte field carries the absolute timestamp for Type 0 and the
        // delta for Types 1 and 2; either overflows into an extended field.
        let field_value = if fmt == CHUNK_FMT_0 {
            chunk.timestamp
        } else {
            timestamp_delta
        };
        let needs_extended = field_value >= EXTENDED_TIMESTAMP_THRESHOLD;
        let wire_field = if needs_extended {
            EXTENDED_TIMESTAMP_THRESHOLD
        } else {
            field_value
        };

        // Update compression state before writing
        state.timestamp = chunk.timestamp;
        if fmt != CHUNK_FMT_3 {
            state.timestamp_delta = field_value;
        }
        state.message_length = chunk.payload.len() as u32;
        state.message_type = chunk.message_type;
        state.stream_id = chunk.stream_id;
        state.has_extended_timestamp = needs_extended;

        let payload_len = chunk.payload.len();
        let mut offset = 0;
        let mut first_chunk = true;

        loop {
            let chunk_data_len = (payload_len - offset).min(chunk_size as usize);

            write_basic_header(csid, if first_chunk { fmt } else { CHUNK_FMT_3 }, buf);

            if first_chunk {
                match fmt {
                    CHUNK_FMT_0 => {
                        write_u24(wire_field, buf);
                        write_u24(payload_len as u32, buf);
                        buf.put_u8(chunk.message_type);
                        buf.put_u32_le(chunk.stream_id);
                    }
                    CHUNK_FMT_1 => {
                        write_u24(wire_field, buf);
                        write_u24(payload_len as u32, buf);
                        buf.put_u8(chunk.message_type);
                    }
                    CHUNK_FMT_2 => {
                        write_u24(wire_field, buf);
                    }
                    _ => {}
                }
            }

            // The extended timestamp is repeated on every continuation chunk
            if needs_extended {
                buf.put_u32(field_value);
            }

            buf.put_slice(&chunk.payload[offset..offset + chunk_data_len]);
            offset += chunk_data_len;
            first_chunk = false;

            if offset >= payload_len {
                break;
            }
        }
    }
}

/// Select the most compact header format for a message given prior state
fn select_format(chunk: &RtmpChunk, state: &ChunkStreamState) -> u8 {
    // First message on this chunk stream must use format 0
    if state.message_type == 0 && state.stream_id == 0 {
        return CHUNK_FMT_0;
    }

    // If stream ID differs, must use format 0
    if chunk.stream_id != state.stream_id {
        return CHUNK_FMT_0;
    }

    // If message type or length differs, use format 1
    if chunk.message_type != state.message_type
        || chunk.payload.len() as u32 != state.message_length
    {
        return CHUNK_FMT_1;
    }

    // If timestamp delta matches the previous delta, use format 3
    let delta = chunk.timestamp.wrapping_sub(state.timestamp);
    if delta == state.timestamp_delta {
        return CHUNK_FMT_3;
    }

    CHUNK_FMT_2
}

/// Write basic header
fn write_basic_header(csid: u32, fmt: u8, buf: &mut BytesMut) {
    if csid >= 64 + 256 {
        // 3-byte header
        buf.put_u8((fmt << 6) | 1);
        let csid_offset = csid - 64;
        buf.put_u8((csid_offset & 0xFF) as u8);
        buf.put_u8(((csid_offset >> 8) & 0xFF) as u8);
    } else if csid >= 64 {
        // 2-byte header
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        // 1-byte header
        buf.put_u8((fmt << 6) | (csid as u8));
    }
}

/// Write 24-bit big-endian value
fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}
