//! Command and control plumbing over the transport seam
//!
//! The TCP socket and the RTMP handshake belong to the caller's connection
//! layer; this type is handed a blocking writer and fed the inbound byte
//! stream after the handshake completes. It owns the chunk codecs, sends
//! commands and media, answers protocol control messages, and routes status
//! notifications into the event dispatcher.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::amf::AmfValue;
use crate::error::Result;
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, RtmpChunk};
use crate::protocol::constants::*;
use crate::protocol::message::{Command, RtmpMessage, StatusInfo, UserControlEvent};

use super::events::{Event, EventDispatcher};
use super::stats::PublisherStats;

/// Inbound occurrences the stream state machine reacts to outside the
/// status-event path
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingEvent {
    /// createStream completed; the server assigned this message stream id
    StreamCreated { stream_id: u32 },
}

/// Publisher-side RTMP connection
pub struct RtmpConnection<W: Write> {
    writer: W,
    chunk_encoder: ChunkEncoder,
    chunk_decoder: ChunkDecoder,
    dispatcher: Arc<EventDispatcher>,
    stats: Arc<PublisherStats>,
    read_buf: BytesMut,
    write_buf: BytesMut,

    /// Last issued transaction id; connect is always 1
    transaction_id: f64,
    /// Transaction id of the in-flight connect command
    connect_transaction: Option<f64>,
    /// Transaction ids of in-flight createStream commands
    pending_create_stream: Vec<f64>,
    /// Chunk size to request once connected
    outbound_chunk_size: u32,
    connected: bool,

    /// Acknowledgement window requested by the peer
    window_ack_size: Option<u32>,
    bytes_received: u64,
    bytes_acknowledged: u64,
}

impl<W: Write> RtmpConnection<W> {
    /// Create a connection over an established, post-handshake transport
    pub fn new(
        writer: W,
        outbound_chunk_size: u32,
        dispatcher: Arc<EventDispatcher>,
        stats: Arc<PublisherStats>,
    ) -> Self {
        Self {
            writer,
            chunk_encoder: ChunkEncoder::new(),
            chunk_decoder: ChunkDecoder::new(),
            dispatcher,
            stats,
            read_buf: BytesMut::with_capacity(16 * 1024),
            write_buf: BytesMut::with_capacity(16 * 1024),
            transaction_id: 0.0,
            connect_transaction: None,
            pending_create_stream: Vec::new(),
            outbound_chunk_size,
            connected: false,
            window_ack_size: None,
            bytes_received: 0,
            bytes_acknowledged: 0,
        }
    }

    /// Whether the connect handshake completed successfully
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Next transaction id for an outgoing command
    pub fn next_transaction_id(&mut self) -> f64 {
        self.transaction_id += 1.0;
        self.transaction_id
    }

    /// Access the underlying writer
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Mutable access to the underlying writer
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Send the connect command for an application
    pub fn connect(&mut self, app: &str, tc_url: &str, flash_ver: &str) -> Result<()> {
        let mut obj = HashMap::new();
        obj.insert("app".to_string(), AmfValue::String(app.to_string()));
        obj.insert("type".to_string(), AmfValue::String("nonprivate".into()));
        obj.insert("flashVer".to_string(), AmfValue::String(flash_ver.to_string()));
        obj.insert("tcUrl".to_string(), AmfValue::String(tc_url.to_string()));
        obj.insert("fpad".to_string(), AmfValue::Boolean(false));
        obj.insert("capabilities".to_string(), AmfValue::Number(239.0));
        obj.insert("audioCodecs".to_string(), AmfValue::Number(3191.0));
        obj.insert("videoCodecs".to_string(), AmfValue::Number(252.0));
        obj.insert("videoFunction".to_string(), AmfValue::Number(1.0));

        let transaction_id = self.next_transaction_id();
        self.connect_transaction = Some(transaction_id);

        let cmd = Command {
            name: CMD_CONNECT.to_string(),
            transaction_id,
            command_object: AmfValue::Object(obj),
            arguments: vec![],
            stream_id: 0,
        };
        self.send_command(&cmd)
    }

    /// Ask the server for a new message stream id
    pub fn create_stream(&mut self) -> Result<()> {
        let transaction_id = self.next_transaction_id();
        self.pending_create_stream.push(transaction_id);
        let cmd = Command::new(CMD_CREATE_STREAM, transaction_id, vec![]);
        self.send_command(&cmd)
    }

    /// Send a command on the command chunk stream
    pub fn send_command(&mut self, cmd: &Command) -> Result<()> {
        self.send_message(CSID_COMMAND, 0, cmd.stream_id, &RtmpMessage::Command(cmd.clone()))
    }

    /// Send a message, letting the chunk encoder pick the header format
    pub fn send_message(
        &mut self,
        csid: u32,
        timestamp: u32,
        stream_id: u32,
        msg: &RtmpMessage,
    ) -> Result<()> {
        let (message_type, payload) = msg.encode();
        let chunk = RtmpChunk {
            csid,
            timestamp,
            message_type,
            stream_id,
            payload,
        };
        self.write_buf.clear();
        self.chunk_encoder.encode(&chunk, &mut self.write_buf);
        self.writer.write_all(&self.write_buf)?;
        self.writer.flush()?;
        self.stats.add_bytes(self.write_buf.len());
        Ok(())
    }

    /// Send a pre-built media or data payload with a forced header format
    pub fn send_chunk(
        &mut self,
        csid: u32,
        message_type: u8,
        timestamp: u32,
        stream_id: u32,
        payload: Bytes,
        format: u8,
    ) -> Result<()> {
        let chunk = RtmpChunk {
            csid,
            timestamp,
            message_type,
            stream_id,
            payload,
        };
        self.write_buf.clear();
        self.chunk_encoder.encode_with_format(&chunk, format, &mut self.write_buf);
        self.writer.write_all(&self.write_buf)?;
        self.writer.flush()?;
        self.stats.add_bytes(self.write_buf.len());
        Ok(())
    }

    /// Feed inbound framed bytes from the socket reader.
    ///
    /// Decodes as many complete messages as the bytes allow, handles
    /// protocol control internally, dispatches status notifications, and
    /// returns the occurrences the stream must react to directly.
    pub fn handle_bytes(&mut self, data: &[u8]) -> Result<Vec<IncomingEvent>> {
        self.read_buf.extend_from_slice(data);
        self.bytes_received += data.len() as u64;

        let mut events = Vec::new();
        loop {
            match self.chunk_decoder.decode(&mut self.read_buf)? {
                Some(chunk) => match RtmpMessage::from_chunk(&chunk) {
                    Ok(msg) => self.handle_message(msg, &mut events)?,
                    Err(e) => {
                        tracing::error!(
                            csid = chunk.csid,
                            message_type = chunk.message_type,
                            error = %e,
                            "Dropping undecodable message"
                        );
                    }
                },
                None => break,
            }
        }

        self.maybe_acknowledge()?;
        Ok(events)
    }

    fn handle_message(&mut self, msg: RtmpMessage, events: &mut Vec<IncomingEvent>) -> Result<()> {
        match msg {
            RtmpMessage::SetChunkSize(size) => {
                tracing::debug!(size = size, "Peer set chunk size");
                self.chunk_decoder.set_chunk_size(size);
            }

            RtmpMessage::Abort { csid } => {
                self.chunk_decoder.abort(csid);
            }

            RtmpMessage::WindowAckSize(size) => {
                tracing::debug!(size = size, "Peer set acknowledgement window");
                self.window_ack_size = Some(size);
            }

            RtmpMessage::SetPeerBandwidth { size, .. } => {
                tracing::debug!(size = size, "Peer bandwidth advertised");
            }

            RtmpMessage::Acknowledgement { sequence } => {
                tracing::trace!(sequence = sequence, "Peer acknowledged");
            }

            RtmpMessage::UserControl(UserControlEvent::PingRequest(timestamp)) => {
                self.send_message(
                    CSID_PROTOCOL_CONTROL,
                    0,
                    0,
                    &RtmpMessage::UserControl(UserControlEvent::PingResponse(timestamp)),
                )?;
            }

            RtmpMessage::UserControl(event) => {
                tracing::debug!(event = ?event, "User control event");
            }

            RtmpMessage::Command(cmd) => {
                self.handle_command(cmd, events)?;
            }

            RtmpMessage::Data(data) => {
                tracing::trace!(name = data.name, "Ignoring inbound data message");
            }

            RtmpMessage::Audio { .. } | RtmpMessage::Video { .. } => {
                // Publish-only connection; inbound media is not expected
                tracing::trace!("Ignoring inbound media");
            }

            RtmpMessage::Unknown { type_id, data } => {
                tracing::error!(type_id = type_id, len = data.len(), "Unknown message type; dropping");
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, cmd: Command, events: &mut Vec<IncomingEvent>) -> Result<()> {
        match cmd.name.as_str() {
            CMD_RESULT => {
                if let Some(idx) = self
                    .pending_create_stream
                    .iter()
                    .position(|txn| *txn == cmd.transaction_id)
                {
                    self.pending_create_stream.swap_remove(idx);
                    if let Some(id) = cmd.arguments.first().and_then(|v| v.as_number()) {
                        let stream_id = id as u32;
                        tracing::debug!(stream_id = stream_id, "Stream created");
                        events.push(IncomingEvent::StreamCreated { stream_id });
                    }
                } else if self.connect_transaction == Some(cmd.transaction_id) {
                    self.connect_transaction = None;
                    self.connected = true;
                    tracing::debug!("Connected");

                    // Raise the outbound chunk size before media flows
                    self.chunk_encoder.set_chunk_size(self.outbound_chunk_size);
                    self.send_message(
                        CSID_PROTOCOL_CONTROL,
                        0,
                        0,
                        &RtmpMessage::SetChunkSize(self.outbound_chunk_size),
                    )?;

                    let status = cmd.status_info().unwrap_or_else(|| StatusInfo {
                        level: "status".into(),
                        code: NC_CONNECT_SUCCESS.into(),
                        description: String::new(),
                    });
                    self.dispatcher.dispatch(&Event::Status(status));
                }
            }

            CMD_ERROR | CMD_ON_STATUS => {
                if let Some(status) = cmd.status_info() {
                    tracing::debug!(code = status.code, level = status.level, "Status received");
                    self.dispatcher.dispatch(&Event::Status(status));
                } else {
                    tracing::warn!(name = cmd.name, "Status command without info object");
                }
            }

            _ => {
                tracing::trace!(command = cmd.name, "Unhandled command");
            }
        }
        Ok(())
    }

    /// Honor the peer's acknowledgement window
    fn maybe_acknowledge(&mut self) -> Result<()> {
        if let Some(window) = self.window_ack_size {
            if self.bytes_received - self.bytes_acknowledged >= window as u64 {
                self.bytes_acknowledged = self.bytes_received;
                self.send_message(
                    CSID_PROTOCOL_CONTROL,
                    0,
                    0,
                    &RtmpMessage::Acknowledgement {
                        sequence: self.bytes_received as u32,
                    },
                )?;
            }
        }
        Ok(())
    }
}
