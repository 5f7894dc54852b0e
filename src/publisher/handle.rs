//! Serial stream queue and public publisher handle
//!
//! All state mutations, frame handling and socket writes happen on one
//! owned task draining an inbox; public operations post to it and return
//! immediately. Encoder callbacks therefore never block, and frames are
//! written in arrival order.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::media::VideoCodec;
use crate::protocol::message::StatusInfo;

use super::config::{PublisherConfig, PublishSettings, PublishTarget};
use super::connection::{IncomingEvent, RtmpConnection};
use super::events::{Event, EventDispatcher, EventKind, ListenerToken};
use super::stats::PublisherStats;
use super::stream::{CodecFormat, RtmpStream, VideoSample};

/// The capability surface encoder collaborators receive.
///
/// Audio and video encoders only ever accept frames and announce formats;
/// handing them this trait instead of the whole publisher keeps the
/// coupling one-way.
pub trait FrameSink: Send + Sync {
    /// Accept a raw AAC frame with its presentation timestamp in seconds
    fn on_encoded_audio(&self, data: Bytes, pts: f64);

    /// Accept an encoded video access unit for a codec
    fn on_encoded_video(&self, format: VideoCodec, sample: VideoSample);

    /// Announce a codec format; emits the sequence header
    fn on_codec_format(&self, format: CodecFormat);
}

/// Work items posted to the stream queue
enum PublisherOp {
    Publish(String),
    Close,
    Audio { data: Bytes, pts: f64 },
    Video { codec: VideoCodec, sample: VideoSample },
    CodecFormat(CodecFormat),
    Incoming(Bytes),
    Status(StatusInfo),
    ConnectionLost,
}

/// Asynchronous RTMP publisher
///
/// Owns a worker task that serializes every operation. Constructed over an
/// established, post-handshake transport writer; inbound framed bytes are
/// fed through [`RtmpPublisher::feed`].
pub struct RtmpPublisher {
    op_tx: mpsc::UnboundedSender<PublisherOp>,
    dispatcher: Arc<EventDispatcher>,
    stats: Arc<PublisherStats>,
    status_token: ListenerToken,
}

impl RtmpPublisher {
    /// Start a publisher over a transport writer.
    ///
    /// The writer is called from the worker task and may block; hand in a
    /// handle that forwards to the connection layer's writer thread. Must
    /// be called within a tokio runtime.
    pub fn spawn<W>(writer: W, config: PublisherConfig, settings: PublishSettings) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let target: PublishTarget = config.url.parse()?;

        let dispatcher = Arc::new(EventDispatcher::new());
        let stats = Arc::new(PublisherStats::new());
        let (op_tx, op_rx) = mpsc::unbounded_channel();

        // The stream subscribes at construction: status notifications are
        // forwarded onto the serial queue
        let status_tx = op_tx.clone();
        let status_token = dispatcher.add_listener(EventKind::RtmpStatus, move |event| {
            if let Some(status) = event.status() {
                let _ = status_tx.send(PublisherOp::Status(status.clone()));
            }
        });

        let conn = RtmpConnection::new(
            writer,
            config.chunk_size,
            Arc::clone(&dispatcher),
            Arc::clone(&stats),
        );
        let stream = RtmpStream::new(settings, Arc::clone(&stats));

        let connect = ConnectArgs {
            app: target.app().to_string(),
            tc_url: target.tc_url(),
            flash_ver: config.flash_ver.clone(),
            timeout: config.connect_timeout,
        };
        tokio::spawn(run_queue(conn, stream, op_rx, Arc::clone(&dispatcher), connect));

        Ok(Self {
            op_tx,
            dispatcher,
            stats,
            status_token,
        })
    }

    /// Start publishing under a stream key; asynchronous.
    pub fn publish(&self, name: &str) {
        let _ = self.op_tx.send(PublisherOp::Publish(name.to_string()));
    }

    /// Tear down the publish session; asynchronous.
    pub fn close(&self) {
        let _ = self.op_tx.send(PublisherOp::Close);
    }

    /// Feed framed bytes read from the socket.
    pub fn feed(&self, data: Bytes) {
        let _ = self.op_tx.send(PublisherOp::Incoming(data));
    }

    /// Tell the publisher the socket is gone.
    pub fn connection_lost(&self) {
        let _ = self.op_tx.send(PublisherOp::ConnectionLost);
    }

    /// Cumulative bytes written to the transport.
    pub fn byte_count(&self) -> i64 {
        self.stats.byte_count()
    }

    /// Session counters, readable from any thread.
    pub fn stats(&self) -> &Arc<PublisherStats> {
        &self.stats
    }

    /// The status event dispatcher, for external observers.
    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }
}

impl FrameSink for RtmpPublisher {
    fn on_encoded_audio(&self, data: Bytes, pts: f64) {
        let _ = self.op_tx.send(PublisherOp::Audio { data, pts });
    }

    fn on_encoded_video(&self, format: VideoCodec, sample: VideoSample) {
        let _ = self.op_tx.send(PublisherOp::Video { codec: format, sample });
    }

    fn on_codec_format(&self, format: CodecFormat) {
        let _ = self.op_tx.send(PublisherOp::CodecFormat(format));
    }
}

impl Drop for RtmpPublisher {
    fn drop(&mut self) {
        // Unsubscribing drops the queue sender held by the listener; the
        // worker ends once every sender is gone
        self.dispatcher.remove_listener(self.status_token);
    }
}

/// What the worker needs to open the session
struct ConnectArgs {
    app: String,
    tc_url: String,
    flash_ver: String,
    timeout: Duration,
}

/// The stream queue: drains operations in arrival order.
async fn run_queue<W: Write + Send>(
    mut conn: RtmpConnection<W>,
    mut stream: RtmpStream,
    mut ops: mpsc::UnboundedReceiver<PublisherOp>,
    dispatcher: Arc<EventDispatcher>,
    connect: ConnectArgs,
) {
    if let Err(e) = conn.connect(&connect.app, &connect.tc_url, &connect.flash_ver) {
        tracing::error!(error = %e, "Connect command failed");
        dispatcher.dispatch(&Event::Closed);
        return;
    }

    let connect_deadline = tokio::time::Instant::now() + connect.timeout;

    loop {
        // Waiting is bounded until the server answers the connect command
        let received = if conn.is_connected() {
            ops.recv().await
        } else {
            match tokio::time::timeout_at(connect_deadline, ops.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    let err = Error::Timeout;
                    tracing::error!(error = %err, "Server did not answer connect");
                    stream.on_connection_closed();
                    dispatcher.dispatch(&Event::Closed);
                    return;
                }
            }
        };

        let op = match received {
            Some(op) => op,
            None => break,
        };

        let result = match op {
            PublisherOp::Publish(name) => stream.publish(&name, &mut conn),
            PublisherOp::Close => stream.close(&mut conn),
            PublisherOp::Audio { data, pts } => stream.append_audio(data, pts, &mut conn),
            PublisherOp::Video { codec, sample } => stream.append_video(codec, sample, &mut conn),
            PublisherOp::CodecFormat(format) => stream.set_codec_format(format, &mut conn),
            PublisherOp::Status(status) => stream.on_status(&status, &mut conn),
            PublisherOp::Incoming(data) => handle_incoming(&mut conn, &mut stream, &data),
            PublisherOp::ConnectionLost => {
                stream.on_connection_closed();
                dispatcher.dispatch(&Event::Closed);
                break;
            }
        };

        if let Err(e) = result {
            match e {
                Error::Io(_) | Error::ConnectionClosed | Error::Protocol(_) => {
                    tracing::error!(error = %e, "Connection unusable; resetting stream");
                    stream.on_connection_closed();
                    dispatcher.dispatch(&Event::Closed);
                    break;
                }
                other => {
                    tracing::error!(error = %other, "Stream operation failed");
                }
            }
        }
    }

    tracing::debug!("Stream queue stopped");
}

fn handle_incoming<W: Write>(
    conn: &mut RtmpConnection<W>,
    stream: &mut RtmpStream,
    data: &[u8],
) -> Result<()> {
    for event in conn.handle_bytes(data)? {
        match event {
            IncomingEvent::StreamCreated { stream_id } => {
                stream.on_stream_created(stream_id, conn)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::AmfValue;
    use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, RtmpChunk};
    use crate::protocol::constants::*;
    use crate::protocol::message::{Command, RtmpMessage};
    use bytes::BytesMut;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Writer the worker owns while the test keeps a viewing handle
    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedWriter {
        fn snapshot(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Decode outbound wire bytes, honoring chunk-size updates
    fn decode_wire(bytes: &[u8]) -> Vec<RtmpMessage> {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Some(chunk) = decoder.decode(&mut buf).unwrap() {
            let msg = RtmpMessage::from_chunk(&chunk).unwrap();
            if let RtmpMessage::SetChunkSize(size) = msg {
                decoder.set_chunk_size(size);
            }
            out.push(msg);
        }
        out
    }

    async fn wait_until<F>(writer: &SharedWriter, pred: F) -> Vec<RtmpMessage>
    where
        F: Fn(&[RtmpMessage]) -> bool,
    {
        for _ in 0..200 {
            let messages = decode_wire(&writer.snapshot());
            if pred(&messages) {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached; wire: {:?}", decode_wire(&writer.snapshot()));
    }

    fn server_result(transaction_id: f64, arguments: Vec<AmfValue>) -> Bytes {
        server_command(Command {
            name: CMD_RESULT.to_string(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments,
            stream_id: 0,
        })
    }

    fn server_command(cmd: Command) -> Bytes {
        let mut encoder = ChunkEncoder::new();
        let mut buf = BytesMut::new();
        let (message_type, payload) = RtmpMessage::Command(cmd).encode();
        encoder.encode(
            &RtmpChunk {
                csid: CSID_COMMAND,
                timestamp: 0,
                message_type,
                stream_id: 0,
                payload,
            },
            &mut buf,
        );
        buf.freeze()
    }

    fn status_command(code: &str) -> Command {
        let mut info = HashMap::new();
        info.insert("level".to_string(), AmfValue::String("status".into()));
        info.insert("code".to_string(), AmfValue::String(code.into()));
        Command {
            name: CMD_ON_STATUS.to_string(),
            transaction_id: 0.0,
            command_object: AmfValue::Null,
            arguments: vec![AmfValue::Object(info)],
            stream_id: 1,
        }
    }

    #[tokio::test]
    async fn test_connect_sent_on_spawn() {
        let writer = SharedWriter::default();
        let config = PublisherConfig::new("rtmp://localhost/live/key");
        let _publisher =
            RtmpPublisher::spawn(writer.clone(), config, PublishSettings::default()).unwrap();

        let messages = wait_until(&writer, |m| !m.is_empty()).await;
        match &messages[0] {
            RtmpMessage::Command(cmd) => {
                assert_eq!(cmd.name, CMD_CONNECT);
                assert_eq!(cmd.command_object.get_string("app"), Some("live"));
            }
            other => panic!("expected connect, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_flow_over_queue() {
        let writer = SharedWriter::default();
        let config = PublisherConfig::new("rtmp://localhost/live/key");
        let publisher =
            RtmpPublisher::spawn(writer.clone(), config, PublishSettings::default()).unwrap();

        publisher.publish("key");
        wait_until(&writer, |m| {
            m.iter().any(|msg| matches!(msg, RtmpMessage::Command(c) if c.name == CMD_CONNECT))
        })
        .await;

        // connect succeeds (transaction 1)
        let mut info = HashMap::new();
        info.insert("level".to_string(), AmfValue::String("status".into()));
        info.insert("code".to_string(), AmfValue::String(NC_CONNECT_SUCCESS.into()));
        publisher.feed(server_result(1.0, vec![AmfValue::Object(info)]));

        wait_until(&writer, |m| {
            m.iter()
                .any(|msg| matches!(msg, RtmpMessage::Command(c) if c.name == CMD_CREATE_STREAM))
        })
        .await;

        // createStream result (transaction 2) assigns stream id 7
        publisher.feed(server_result(2.0, vec![AmfValue::Number(7.0)]));
        let messages = wait_until(&writer, |m| {
            m.iter().any(|msg| matches!(msg, RtmpMessage::Command(c) if c.name == CMD_PUBLISH))
        })
        .await;
        let publish = messages
            .iter()
            .find_map(|m| match m {
                RtmpMessage::Command(c) if c.name == CMD_PUBLISH => Some(c),
                _ => None,
            })
            .unwrap();
        assert_eq!(publish.stream_id, 7);
        assert_eq!(publish.arguments[0].as_str(), Some("key"));

        // publish accepted: metadata goes out, then media flows
        publisher.feed(server_command(status_command(NS_PUBLISH_START)));
        wait_until(&writer, |m| {
            m.iter()
                .any(|msg| matches!(msg, RtmpMessage::Data(d) if d.name == CMD_SET_DATA_FRAME))
        })
        .await;

        publisher.on_encoded_audio(Bytes::from_static(&[0x21, 0x00]), 42.0);
        let messages =
            wait_until(&writer, |m| m.iter().any(|msg| matches!(msg, RtmpMessage::Audio { .. })))
                .await;
        let audio = messages
            .iter()
            .find_map(|m| match m {
                RtmpMessage::Audio { timestamp, data } => Some((*timestamp, data.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(audio.0, 0);
        assert_eq!(&audio.1[..2], &[0xAF, 0x01]);

        assert!(publisher.byte_count() > 0);
        assert_eq!(publisher.stats().audio_frames(), 1);
    }

    #[tokio::test]
    async fn test_connect_timeout_surfaces_as_closed() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let writer = SharedWriter::default();
        let mut config = PublisherConfig::new("rtmp://localhost/live/key");
        config.connect_timeout = Duration::from_millis(50);
        let publisher =
            RtmpPublisher::spawn(writer, config, PublishSettings::default()).unwrap();

        let closed = Arc::new(AtomicBool::new(false));
        let closed2 = Arc::clone(&closed);
        publisher
            .events()
            .add_listener(EventKind::ConnectionClosed, move |_| {
                closed2.store(true, Ordering::SeqCst);
            });

        // Never answer the connect command; the watchdog must fire
        for _ in 0..200 {
            if closed.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connect timeout was not surfaced");
    }

    #[tokio::test]
    async fn test_connection_lost_notifies_listeners() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let writer = SharedWriter::default();
        let config = PublisherConfig::new("rtmp://localhost/live/key");
        let publisher =
            RtmpPublisher::spawn(writer.clone(), config, PublishSettings::default()).unwrap();

        let closed = Arc::new(AtomicBool::new(false));
        let closed2 = Arc::clone(&closed);
        publisher
            .events()
            .add_listener(EventKind::ConnectionClosed, move |_| {
                closed2.store(true, Ordering::SeqCst);
            });

        publisher.connection_lost();
        for _ in 0..200 {
            if closed.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection loss was not dispatched");
    }

    #[tokio::test]
    async fn test_frames_after_close_are_noops() {
        let writer = SharedWriter::default();
        let config = PublisherConfig::new("rtmp://localhost/live/key");
        let publisher =
            RtmpPublisher::spawn(writer.clone(), config, PublishSettings::default()).unwrap();

        publisher.publish("key");
        let mut info = HashMap::new();
        info.insert("code".to_string(), AmfValue::String(NC_CONNECT_SUCCESS.into()));
        publisher.feed(server_result(1.0, vec![AmfValue::Object(info)]));
        wait_until(&writer, |m| {
            m.iter()
                .any(|msg| matches!(msg, RtmpMessage::Command(c) if c.name == CMD_CREATE_STREAM))
        })
        .await;

        publisher.feed(server_result(2.0, vec![AmfValue::Number(1.0)]));
        wait_until(&writer, |m| {
            m.iter().any(|msg| matches!(msg, RtmpMessage::Command(c) if c.name == CMD_PUBLISH))
        })
        .await;

        publisher.feed(server_command(status_command(NS_PUBLISH_START)));
        wait_until(&writer, |m| {
            m.iter()
                .any(|msg| matches!(msg, RtmpMessage::Data(d) if d.name == CMD_SET_DATA_FRAME))
        })
        .await;

        // Close, then a frame already behind it in the queue: the frame
        // must not reach the wire
        publisher.close();
        publisher.on_encoded_audio(Bytes::from_static(&[0x21]), 1.0);

        wait_until(&writer, |m| {
            m.iter()
                .any(|msg| matches!(msg, RtmpMessage::Command(c) if c.name == CMD_DELETE_STREAM))
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let messages = decode_wire(&writer.snapshot());
        assert!(!messages.iter().any(|m| matches!(m, RtmpMessage::Audio { .. })));
    }
}
