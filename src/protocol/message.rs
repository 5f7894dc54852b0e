//! RTMP message types and parsing
//!
//! RTMP messages are classified into:
//! - Protocol Control Messages (types 1-6): Chunk/flow control
//! - Command Messages (type 20): AMF-encoded commands
//! - Data Messages (type 18): Metadata
//! - Audio/Video Messages (types 8, 9): Media data
//!
//! Reference: RTMP Specification Section 5.4

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{amf0, Amf0Decoder, Amf0Encoder, AmfValue};
use crate::error::{AmfError, ProtocolError, Result};
use crate::protocol::chunk::RtmpChunk;
use crate::protocol::constants::*;

/// Parsed RTMP message
#[derive(Debug, Clone)]
pub enum RtmpMessage {
    /// Set Chunk Size (type 1)
    SetChunkSize(u32),

    /// Abort Message (type 2)
    Abort { csid: u32 },

    /// Acknowledgement (type 3)
    Acknowledgement { sequence: u32 },

    /// User Control Message (type 4)
    UserControl(UserControlEvent),

    /// Window Acknowledgement Size (type 5)
    WindowAckSize(u32),

    /// Set Peer Bandwidth (type 6)
    SetPeerBandwidth { size: u32, limit_type: u8 },

    /// Audio data (type 8) - a formed FLV audio tag body
    Audio { timestamp: u32, data: Bytes },

    /// Video data (type 9) - a formed FLV video tag body
    Video { timestamp: u32, data: Bytes },

    /// AMF0 Command (type 20)
    Command(Command),

    /// AMF0 Data message (type 18) - @setDataFrame, onMetaData
    Data(DataMessage),

    /// Unknown message type
    Unknown { type_id: u8, data: Bytes },
}

/// User Control Event
#[derive(Debug, Clone)]
pub enum UserControlEvent {
    StreamBegin(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, data: Bytes },
}

/// RTMP command (connect, createStream, publish, ...)
#[derive(Debug, Clone)]
pub struct Command {
    /// Command name
    pub name: String,
    /// Transaction ID
    pub transaction_id: f64,
    /// Command object (often null)
    pub command_object: AmfValue,
    /// Additional arguments
    pub arguments: Vec<AmfValue>,
    /// Message stream ID (from chunk)
    pub stream_id: u32,
}

/// Data message (@setDataFrame, onMetaData, etc.)
#[derive(Debug, Clone)]
pub struct DataMessage {
    /// Handler name (e.g., "@setDataFrame")
    pub name: String,
    /// Data values
    pub values: Vec<AmfValue>,
    /// Message stream ID
    pub stream_id: u32,
}

/// Status information carried by onStatus and connect results
#[derive(Debug, Clone, PartialEq)]
pub struct StatusInfo {
    /// "status", "error" or "warning"
    pub level: String,
    /// Dotted status code, e.g. "NetStream.Publish.Start"
    pub code: String,
    /// Human-readable description
    pub description: String,
}

impl StatusInfo {
    /// Extract status information from a command's info object
    pub fn from_amf(info: &AmfValue) -> Option<Self> {
        let obj = info.as_object()?;
        Some(StatusInfo {
            level: obj.get("level").and_then(|v| v.as_str()).unwrap_or("status").to_string(),
            code: obj.get("code").and_then(|v| v.as_str())?.to_string(),
            description: obj
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }
}

impl RtmpMessage {
    /// Parse a message from a reassembled chunk
    pub fn from_chunk(chunk: &RtmpChunk) -> Result<Self> {
        let mut payload = chunk.payload.clone();

        match chunk.message_type {
            MSG_SET_CHUNK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let size = payload.get_u32() & 0x7FFF_FFFF; // Ignore MSB
                Ok(RtmpMessage::SetChunkSize(size))
            }

            MSG_ABORT => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::Abort { csid: payload.get_u32() })
            }

            MSG_ACKNOWLEDGEMENT => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::Acknowledgement { sequence: payload.get_u32() })
            }

            MSG_USER_CONTROL => Self::parse_user_control(&mut payload),

            MSG_WINDOW_ACK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::WindowAckSize(payload.get_u32()))
            }

            MSG_SET_PEER_BANDWIDTH => {
                if payload.len() < 5 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let size = payload.get_u32();
                let limit_type = payload.get_u8();
                Ok(RtmpMessage::SetPeerBandwidth { size, limit_type })
            }

            MSG_AUDIO => Ok(RtmpMessage::Audio {
                timestamp: chunk.timestamp,
                data: payload,
            }),

            MSG_VIDEO => Ok(RtmpMessage::Video {
                timestamp: chunk.timestamp,
                data: payload,
            }),

            MSG_COMMAND_AMF0 => {
                let cmd = Self::parse_command(&mut payload, chunk.stream_id)?;
                Ok(RtmpMessage::Command(cmd))
            }

            MSG_DATA_AMF0 => {
                let data = Self::parse_data(&mut payload, chunk.stream_id)?;
                Ok(RtmpMessage::Data(data))
            }

            _ => Ok(RtmpMessage::Unknown {
                type_id: chunk.message_type,
                data: payload,
            }),
        }
    }

    /// Parse User Control message
    fn parse_user_control(payload: &mut Bytes) -> Result<Self> {
        if payload.len() < 6 {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }

        let event_type = payload.get_u16();
        let event = match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(payload.get_u32()),
            UC_PING_REQUEST => UserControlEvent::PingRequest(payload.get_u32()),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(payload.get_u32()),
            _ => UserControlEvent::Unknown {
                event_type,
                data: payload.clone(),
            },
        };

        Ok(RtmpMessage::UserControl(event))
    }

    /// Parse AMF0 command
    fn parse_command(payload: &mut Bytes, stream_id: u32) -> Result<Command> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s,
            _ => return Err(ProtocolError::InvalidCommand("missing command name".into()).into()),
        };

        let transaction_id = match decoder.decode(payload)? {
            AmfValue::Number(n) => n,
            _ => 0.0, // Lenient: default to 0
        };

        let command_object = if payload.has_remaining() {
            decoder.decode(payload)?
        } else {
            AmfValue::Null
        };

        let mut arguments = Vec::new();
        while payload.has_remaining() {
            match decoder.decode(payload) {
                Ok(v) => arguments.push(v),
                Err(AmfError::UnexpectedEof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Command {
            name,
            transaction_id,
            command_object,
            arguments,
            stream_id,
        })
    }

    /// Parse AMF0 data message
    fn parse_data(payload: &mut Bytes, stream_id: u32) -> Result<DataMessage> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s,
            _ => String::new(), // Lenient
        };

        let mut values = Vec::new();
        while payload.has_remaining() {
            match decoder.decode(payload) {
                Ok(v) => values.push(v),
                Err(AmfError::UnexpectedEof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(DataMessage { name, values, stream_id })
    }

    /// Encode message to (type id, chunk payload)
    ///
    /// Command and data payloads are AMF0-encoded here, so the chunked
    /// message length equals the AMF0 byte count.
    pub fn encode(&self) -> (u8, Bytes) {
        match self {
            RtmpMessage::SetChunkSize(size) => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_u32(*size);
                (MSG_SET_CHUNK_SIZE, buf.freeze())
            }

            RtmpMessage::Abort { csid } => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_u32(*csid);
                (MSG_ABORT, buf.freeze())
            }

            RtmpMessage::Acknowledgement { sequence } => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_u32(*sequence);
                (MSG_ACKNOWLEDGEMENT, buf.freeze())
            }

            RtmpMessage::WindowAckSize(size) => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_u32(*size);
                (MSG_WINDOW_ACK_SIZE, buf.freeze())
            }

            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }

            RtmpMessage::UserControl(event) => {
                let mut buf = BytesMut::with_capacity(10);
                match event {
                    UserControlEvent::StreamBegin(id) => {
                        buf.put_u16(UC_STREAM_BEGIN);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::PingRequest(ts) => {
                        buf.put_u16(UC_PING_REQUEST);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::PingResponse(ts) => {
                        buf.put_u16(UC_PING_RESPONSE);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::Unknown { event_type, data } => {
                        buf.put_u16(*event_type);
                        buf.put_slice(data);
                    }
                }
                (MSG_USER_CONTROL, buf.freeze())
            }

            RtmpMessage::Audio { data, .. } => (MSG_AUDIO, data.clone()),

            RtmpMessage::Video { data, .. } => (MSG_VIDEO, data.clone()),

            RtmpMessage::Command(cmd) => (MSG_COMMAND_AMF0, cmd.to_amf0()),

            RtmpMessage::Data(data) => (MSG_DATA_AMF0, data.to_amf0()),

            RtmpMessage::Unknown { type_id, data } => (*type_id, data.clone()),
        }
    }
}

impl Command {
    /// Create a command with a null command object
    pub fn new(name: &str, transaction_id: f64, arguments: Vec<AmfValue>) -> Self {
        Command {
            name: name.to_string(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments,
            stream_id: 0,
        }
    }

    /// Encode to AMF0 bytes: name, transaction id, command object, arguments
    pub fn to_amf0(&self) -> Bytes {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode(&AmfValue::Number(self.transaction_id));
        encoder.encode(&self.command_object);
        for arg in &self.arguments {
            encoder.encode(arg);
        }
        encoder.finish()
    }

    /// Status info from the first argument, for onStatus and _result
    pub fn status_info(&self) -> Option<StatusInfo> {
        self.arguments.first().and_then(StatusInfo::from_amf)
    }
}

impl DataMessage {
    /// Encode to AMF0 bytes: handler name followed by all values
    pub fn to_amf0(&self) -> Bytes {
        let mut values = Vec::with_capacity(self.values.len() + 1);
        values.push(AmfValue::String(self.name.clone()));
        values.extend(self.values.iter().cloned());
        amf0::encode_all(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_command_roundtrip() {
        let cmd = Command {
            name: "publish".to_string(),
            transaction_id: 5.0,
            command_object: AmfValue::Null,
            arguments: vec![
                AmfValue::String("stream-key".into()),
                AmfValue::String("live".into()),
            ],
            stream_id: 1,
        };

        let chunk = RtmpChunk {
            csid: CSID_COMMAND,
            timestamp: 0,
            message_type: MSG_COMMAND_AMF0,
            stream_id: 1,
            payload: cmd.to_amf0(),
        };

        let parsed = RtmpMessage::from_chunk(&chunk).unwrap();
        match parsed {
            RtmpMessage::Command(parsed_cmd) => {
                assert_eq!(parsed_cmd.name, "publish");
                assert_eq!(parsed_cmd.transaction_id, 5.0);
                assert_eq!(parsed_cmd.arguments.len(), 2);
                assert_eq!(parsed_cmd.stream_id, 1);
            }
            other => panic!("expected Command, got {:?}", other),
        }
    }

    #[test]
    fn test_data_message_roundtrip() {
        let mut meta = HashMap::new();
        meta.insert("width".to_string(), AmfValue::Number(1280.0));
        let data = DataMessage {
            name: CMD_SET_DATA_FRAME.to_string(),
            values: vec![
                AmfValue::String(CMD_ON_METADATA.into()),
                AmfValue::EcmaArray(meta),
            ],
            stream_id: 1,
        };

        let chunk = RtmpChunk {
            csid: CSID_DATA,
            timestamp: 0,
            message_type: MSG_DATA_AMF0,
            stream_id: 1,
            payload: data.to_amf0(),
        };

        let parsed = RtmpMessage::from_chunk(&chunk).unwrap();
        match parsed {
            RtmpMessage::Data(d) => {
                assert_eq!(d.name, CMD_SET_DATA_FRAME);
                assert_eq!(d.values.len(), 2);
                assert_eq!(d.values[1].get_number("width"), Some(1280.0));
            }
            other => panic!("expected Data, got {:?}", other),
        }
    }

    #[test]
    fn test_control_messages() {
        let chunk = RtmpChunk {
            csid: CSID_PROTOCOL_CONTROL,
            timestamp: 0,
            message_type: MSG_SET_CHUNK_SIZE,
            stream_id: 0,
            payload: Bytes::from_static(&[0x00, 0x00, 0x10, 0x00]),
        };
        assert!(matches!(
            RtmpMessage::from_chunk(&chunk).unwrap(),
            RtmpMessage::SetChunkSize(4096)
        ));

        let chunk = RtmpChunk {
            csid: CSID_PROTOCOL_CONTROL,
            timestamp: 0,
            message_type: MSG_WINDOW_ACK_SIZE,
            stream_id: 0,
            payload: Bytes::from_static(&[0x00, 0x26, 0x25, 0xA0]),
        };
        assert!(matches!(
            RtmpMessage::from_chunk(&chunk).unwrap(),
            RtmpMessage::WindowAckSize(2_500_000)
        ));
    }

    #[test]
    fn test_set_chunk_size_ignores_msb() {
        let chunk = RtmpChunk {
            csid: CSID_PROTOCOL_CONTROL,
            timestamp: 0,
            message_type: MSG_SET_CHUNK_SIZE,
            stream_id: 0,
            payload: Bytes::from_static(&[0x80, 0x00, 0x10, 0x00]),
        };
        assert!(matches!(
            RtmpMessage::from_chunk(&chunk).unwrap(),
            RtmpMessage::SetChunkSize(4096)
        ));
    }

    #[test]
    fn test_user_control_ping() {
        let msg = RtmpMessage::UserControl(UserControlEvent::PingRequest(7));
        let (type_id, payload) = msg.encode();
        assert_eq!(type_id, MSG_USER_CONTROL);

        let chunk = RtmpChunk {
            csid: CSID_PROTOCOL_CONTROL,
            timestamp: 0,
            message_type: MSG_USER_CONTROL,
            stream_id: 0,
            payload,
        };
        assert!(matches!(
            RtmpMessage::from_chunk(&chunk).unwrap(),
            RtmpMessage::UserControl(UserControlEvent::PingRequest(7))
        ));
    }

    #[test]
    fn test_unknown_message_type() {
        let chunk = RtmpChunk {
            csid: CSID_PROTOCOL_CONTROL,
            timestamp: 0,
            message_type: 99,
            stream_id: 0,
            payload: Bytes::from_static(&[1, 2, 3]),
        };
        match RtmpMessage::from_chunk(&chunk).unwrap() {
            RtmpMessage::Unknown { type_id, data } => {
                assert_eq!(type_id, 99);
                assert_eq!(data.len(), 3);
            }
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_status_info_extraction() {
        let mut info = HashMap::new();
        info.insert("level".to_string(), AmfValue::String("status".into()));
        info.insert(
            "code".to_string(),
            AmfValue::String("NetStream.Publish.Start".into()),
        );
        info.insert(
            "description".to_string(),
            AmfValue::String("Stream is now published.".into()),
        );

        let cmd = Command {
            name: CMD_ON_STATUS.to_string(),
            transaction_id: 0.0,
            command_object: AmfValue::Null,
            arguments: vec![AmfValue::Object(info)],
            stream_id: 1,
        };

        let status = cmd.status_info().unwrap();
        assert_eq!(status.code, NS_PUBLISH_START);
        assert_eq!(status.level, "status");
    }

    #[test]
    fn test_status_info_requires_code() {
        let cmd = Command::new(CMD_ON_STATUS, 0.0, vec![AmfValue::Object(HashMap::new())]);
        assert!(cmd.status_info().is_none());
    }
}
