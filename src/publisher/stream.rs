//! Publishing stream state machine
//!
//! Drives the publish lifecycle (initialized, open, publish, publishing),
//! packages encoder output as FLV tags with rebased timestamps, and emits
//! metadata at the right moments.
//!
//! ```text
//! publish("key")        connect success          NetStream.Publish.Start
//!   queued  ----------->  createStream  ------->  @setDataFrame onMetaData
//! Initialized            Open -> Publish          Publish -> Publishing
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::amf::AmfValue;
use crate::error::Result;
use crate::media::flv::{self, AacPacketType, AvcPacketType, ExVideoPacketType, VideoFrameType};
use crate::media::fourcc::VideoCodec;
use crate::protocol::constants::*;
use crate::protocol::message::{Command, DataMessage, StatusInfo};

use super::config::PublishSettings;
use super::connection::RtmpConnection;
use super::stats::PublisherStats;
use super::timestamp::{MediaChannel, MediaClock};

/// Publish lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// No connection yet; publish requests queue up
    Initialized,
    /// Connected; waiting for a stream id
    Open,
    /// publish command sent; waiting for the server to accept
    Publish,
    /// Accepted; media flows
    Publishing,
}

/// An encoded video access unit with its timing
#[derive(Debug, Clone)]
pub struct VideoSample {
    /// Access unit bytes (AVCC/HVCC framing, no start codes)
    pub data: Bytes,
    /// Presentation timestamp in seconds
    pub pts: f64,
    /// Decode timestamp in seconds
    pub dts: f64,
    /// Whether this is a sync sample
    pub keyframe: bool,
}

/// Codec configuration emitted by an encoder when its format is known
#[derive(Debug, Clone)]
pub enum CodecFormat {
    /// AAC AudioSpecificConfig
    Aac { config: Bytes },
    /// AVCDecoderConfigurationRecord
    Avc { config: Bytes },
    /// HEVCDecoderConfigurationRecord
    Hevc { config: Bytes },
}

/// Publisher stream state machine
pub struct RtmpStream {
    ready_state: ReadyState,
    settings: PublishSettings,
    stats: Arc<PublisherStats>,

    /// Server-assigned message stream id, from createStream
    stream_id: u32,
    /// Stream key of the active or requested publish
    resource_name: Option<String>,
    /// publish commands issued before the connection was ready
    queued_commands: Vec<Command>,

    clock: MediaClock,
    /// Accumulated RTMP timestamps per media channel
    audio_timestamp: u32,
    video_timestamp: u32,
    /// Whether the channel's first (Type 0) chunk went out
    audio_header_sent: bool,
    video_header_sent: bool,

    /// Handler name -> wall clock of last send; first send uses a full
    /// chunk header, later sends a compressed one
    data_timestamps: HashMap<String, Instant>,

    /// Video codec in effect, updated by codec format announcements
    video_codec: VideoCodec,
    /// Sequence headers to (re-)emit when publishing starts
    pending_audio_config: Option<Bytes>,
    pending_video_config: Option<Bytes>,
}

impl RtmpStream {
    /// Create a stream in the Initialized state
    pub fn new(settings: PublishSettings, stats: Arc<PublisherStats>) -> Self {
        let video_codec = settings.video_codec;
        Self {
            ready_state: ReadyState::Initialized,
            settings,
            stats,
            stream_id: 0,
            resource_name: None,
            queued_commands: Vec::new(),
            clock: MediaClock::new(),
            audio_timestamp: 0,
            video_timestamp: 0,
            audio_header_sent: false,
            video_header_sent: false,
            data_timestamps: HashMap::new(),
            video_codec,
            pending_audio_config: None,
            pending_video_config: None,
        }
    }

    /// Current lifecycle state
    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    /// Request publishing under a stream key.
    ///
    /// Queued while no connection exists; flushed with a fresh transaction
    /// id once the connection is open and a stream id is assigned.
    pub fn publish<W: Write>(
        &mut self,
        name: &str,
        conn: &mut RtmpConnection<W>,
    ) -> Result<()> {
        match self.ready_state {
            ReadyState::Publish | ReadyState::Publishing => {
                tracing::debug!(name = name, "Already publishing; ignoring");
                Ok(())
            }
            _ => {
                self.resource_name = Some(name.to_string());
                self.queued_commands.push(Command::new(
                    CMD_PUBLISH,
                    0.0,
                    vec![name.into(), PUBLISH_TYPE_LIVE.into()],
                ));
                self.flush_queued(conn)
            }
        }
    }

    /// Tear the publish session down and return to Initialized.
    pub fn close<W: Write>(&mut self, conn: &mut RtmpConnection<W>) -> Result<()> {
        match self.ready_state {
            ReadyState::Initialized => {}
            ReadyState::Open => {
                if self.stream_id != 0 {
                    self.send_delete_stream(conn)?;
                }
            }
            ReadyState::Publish | ReadyState::Publishing => {
                if let Some(name) = self.resource_name.clone() {
                    let txn = conn.next_transaction_id();
                    conn.send_command(&Command::new(CMD_FC_UNPUBLISH, txn, vec![name.into()]))?;
                }
                let txn = conn.next_transaction_id();
                let mut close_stream = Command::new(CMD_CLOSE_STREAM, txn, vec![]);
                close_stream.stream_id = self.stream_id;
                conn.send_command(&close_stream)?;
                self.send_delete_stream(conn)?;
            }
        }

        tracing::debug!("Stream closed");
        self.reset();
        Ok(())
    }

    fn send_delete_stream<W: Write>(&mut self, conn: &mut RtmpConnection<W>) -> Result<()> {
        let txn = conn.next_transaction_id();
        conn.send_command(&Command::new(
            CMD_DELETE_STREAM,
            txn,
            vec![(self.stream_id as f64).into()],
        ))
    }

    /// React to a status notification routed from the connection.
    pub fn on_status<W: Write>(
        &mut self,
        status: &StatusInfo,
        conn: &mut RtmpConnection<W>,
    ) -> Result<()> {
        match status.code.as_str() {
            NC_CONNECT_SUCCESS => {
                if self.ready_state == ReadyState::Initialized {
                    self.ready_state = ReadyState::Open;
                    conn.create_stream()?;
                }
            }

            NS_PUBLISH_START => {
                // Only a pending (or re-confirmed) publish may start
                if self.ready_state == ReadyState::Initialized
                    || self.ready_state == ReadyState::Open
                {
                    return Ok(());
                }
                tracing::info!(
                    name = self.resource_name.as_deref().unwrap_or(""),
                    "Publish accepted"
                );
                self.ready_state = ReadyState::Publishing;
                self.clock.reset();
                self.audio_timestamp = 0;
                self.video_timestamp = 0;
                self.audio_header_sent = false;
                self.video_header_sent = false;
                self.send_metadata(conn)?;
                self.send_audio_config(conn)?;
                self.send_video_config(conn)?;
            }

            NS_VIDEO_DIMENSION_CHANGE => {
                if self.ready_state == ReadyState::Publishing {
                    self.send_metadata(conn)?;
                }
            }

            _ => {
                tracing::trace!(code = status.code, "Status ignored");
            }
        }
        Ok(())
    }

    /// The server assigned a message stream id via createStream.
    pub fn on_stream_created<W: Write>(
        &mut self,
        stream_id: u32,
        conn: &mut RtmpConnection<W>,
    ) -> Result<()> {
        self.stream_id = stream_id;
        self.flush_queued(conn)
    }

    /// The transport went away; drop queued work and start over.
    pub fn on_connection_closed(&mut self) {
        tracing::debug!("Connection lost; resetting stream");
        self.reset();
    }

    /// Flush queued publish commands once open with a stream id.
    fn flush_queued<W: Write>(&mut self, conn: &mut RtmpConnection<W>) -> Result<()> {
        if self.ready_state != ReadyState::Open || self.stream_id == 0 {
            return Ok(());
        }
        if self.queued_commands.is_empty() {
            return Ok(());
        }

        for mut cmd in std::mem::take(&mut self.queued_commands) {
            let name = cmd
                .arguments
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let txn = conn.next_transaction_id();
            conn.send_command(&Command::new(CMD_RELEASE_STREAM, txn, vec![name.clone().into()]))?;
            let txn = conn.next_transaction_id();
            conn.send_command(&Command::new(CMD_FC_PUBLISH, txn, vec![name.into()]))?;

            cmd.transaction_id = conn.next_transaction_id();
            cmd.stream_id = self.stream_id;
            conn.send_command(&cmd)?;
        }

        self.ready_state = ReadyState::Publish;
        Ok(())
    }

    /// Accept a raw AAC frame from the audio encoder.
    pub fn append_audio<W: Write>(
        &mut self,
        data: Bytes,
        pts: f64,
        conn: &mut RtmpConnection<W>,
    ) -> Result<()> {
        if self.ready_state != ReadyState::Publishing {
            return Ok(());
        }
        if data.is_empty() {
            self.stats.record_dropped_frame();
            return Ok(());
        }

        let rebased = match self.clock.rebase(pts) {
            Some(r) => r,
            None => {
                self.stats.record_dropped_frame();
                return Ok(());
            }
        };
        let delta = match self.clock.advance(MediaChannel::Audio, rebased) {
            Some(d) => d,
            None => {
                self.stats.record_dropped_frame();
                return Ok(());
            }
        };

        self.audio_timestamp = self.audio_timestamp.wrapping_add(delta);
        let tag = flv::aac_audio_tag(AacPacketType::Raw, &data);
        let format = if self.audio_header_sent { CHUNK_FMT_1 } else { CHUNK_FMT_0 };
        conn.send_chunk(CSID_AUDIO, MSG_AUDIO, self.audio_timestamp, self.stream_id, tag, format)?;
        self.audio_header_sent = true;
        self.stats.record_audio_frame();
        Ok(())
    }

    /// Accept an encoded video access unit for a codec.
    pub fn append_video<W: Write>(
        &mut self,
        codec: VideoCodec,
        sample: VideoSample,
        conn: &mut RtmpConnection<W>,
    ) -> Result<()> {
        if self.ready_state != ReadyState::Publishing {
            return Ok(());
        }
        if sample.data.is_empty() {
            self.stats.record_dropped_frame();
            return Ok(());
        }

        let rebased_dts = match self.clock.rebase(sample.dts) {
            Some(r) => r,
            None => {
                self.stats.record_dropped_frame();
                return Ok(());
            }
        };

        // Composition offset against the previous frame, before the clock
        // advances
        let composition_time = if sample.pts != sample.dts {
            match self.clock.rebased(sample.pts) {
                Some(pts_rebased) => self
                    .clock
                    .video_composition_time(pts_rebased, self.settings.composition_time_offset),
                None => 0,
            }
        } else {
            0
        };

        let frame_type = if sample.keyframe {
            VideoFrameType::Key
        } else {
            VideoFrameType::Inter
        };
        let tag = match codec {
            VideoCodec::Avc => {
                flv::avc_video_tag(frame_type, AvcPacketType::Nalu, composition_time, &sample.data)?
            }
            VideoCodec::Hevc => flv::hevc_video_tag(
                frame_type,
                ExVideoPacketType::CodedFrames,
                composition_time,
                &sample.data,
            )?,
        };

        let delta = match self.clock.advance(MediaChannel::Video, rebased_dts) {
            Some(d) => d,
            None => {
                self.stats.record_dropped_frame();
                return Ok(());
            }
        };

        self.video_timestamp = self.video_timestamp.wrapping_add(delta);
        let format = if self.video_header_sent { CHUNK_FMT_1 } else { CHUNK_FMT_0 };
        conn.send_chunk(CSID_VIDEO, MSG_VIDEO, self.video_timestamp, self.stream_id, tag, format)?;
        self.video_header_sent = true;
        self.stats.record_video_frame();
        Ok(())
    }

    /// Accept a codec format announcement; the sequence header goes out
    /// immediately when publishing, and again on every publish start.
    pub fn set_codec_format<W: Write>(
        &mut self,
        format: CodecFormat,
        conn: &mut RtmpConnection<W>,
    ) -> Result<()> {
        match format {
            CodecFormat::Aac { config } => {
                self.pending_audio_config = Some(config);
                if self.ready_state == ReadyState::Publishing {
                    self.send_audio_config(conn)?;
                }
            }
            CodecFormat::Avc { config } => {
                self.video_codec = VideoCodec::Avc;
                self.pending_video_config = Some(config);
                if self.ready_state == ReadyState::Publishing {
                    self.send_video_config(conn)?;
                }
            }
            CodecFormat::Hevc { config } => {
                self.video_codec = VideoCodec::Hevc;
                self.pending_video_config = Some(config);
                if self.ready_state == ReadyState::Publishing {
                    self.send_video_config(conn)?;
                }
            }
        }
        Ok(())
    }

    fn send_audio_config<W: Write>(&mut self, conn: &mut RtmpConnection<W>) -> Result<()> {
        let config = match &self.pending_audio_config {
            Some(c) => c.clone(),
            None => return Ok(()),
        };
        let tag = flv::aac_audio_tag(AacPacketType::SequenceHeader, &config);
        let format = if self.audio_header_sent { CHUNK_FMT_1 } else { CHUNK_FMT_0 };
        conn.send_chunk(CSID_AUDIO, MSG_AUDIO, self.audio_timestamp, self.stream_id, tag, format)?;
        self.audio_header_sent = true;
        Ok(())
    }

    fn send_video_config<W: Write>(&mut self, conn: &mut RtmpConnection<W>) -> Result<()> {
        let config = match &self.pending_video_config {
            Some(c) => c.clone(),
            None => return Ok(()),
        };
        let tag = match self.video_codec {
            VideoCodec::Avc => {
                flv::avc_video_tag(VideoFrameType::Key, AvcPacketType::SequenceHeader, 0, &config)?
            }
            VideoCodec::Hevc => flv::hevc_video_tag(
                VideoFrameType::Key,
                ExVideoPacketType::SequenceStart,
                0,
                &config,
            )?,
        };
        let format = if self.video_header_sent { CHUNK_FMT_1 } else { CHUNK_FMT_0 };
        conn.send_chunk(CSID_VIDEO, MSG_VIDEO, self.video_timestamp, self.stream_id, tag, format)?;
        self.video_header_sent = true;
        Ok(())
    }

    /// Send `@setDataFrame onMetaData {...}` describing the stream.
    fn send_metadata<W: Write>(&mut self, conn: &mut RtmpConnection<W>) -> Result<()> {
        let mut meta = HashMap::new();
        meta.insert("width".to_string(), (self.settings.width as f64).into());
        meta.insert("height".to_string(), (self.settings.height as f64).into());
        meta.insert("framerate".to_string(), self.settings.framerate.into());
        meta.insert(
            "videocodecid".to_string(),
            self.video_codec.metadata_codec_id().into(),
        );
        meta.insert(
            "videodatarate".to_string(),
            self.settings.video_bitrate_kbps.into(),
        );
        meta.insert("audiocodecid".to_string(), 10.0.into());
        meta.insert(
            "audiodatarate".to_string(),
            self.settings.audio_bitrate_kbps.into(),
        );
        meta.insert(
            "audiosamplerate".to_string(),
            self.settings.audio_sample_rate.into(),
        );

        self.send_data_message(
            CMD_SET_DATA_FRAME,
            vec![
                AmfValue::String(CMD_ON_METADATA.to_string()),
                AmfValue::EcmaArray(meta),
            ],
            conn,
        )
    }

    /// Send a data message, with a full chunk header on the first send of
    /// a handler name and a compressed one afterwards.
    fn send_data_message<W: Write>(
        &mut self,
        handler: &str,
        values: Vec<AmfValue>,
        conn: &mut RtmpConnection<W>,
    ) -> Result<()> {
        let format = if self.data_timestamps.contains_key(handler) {
            CHUNK_FMT_1
        } else {
            CHUNK_FMT_0
        };
        self.data_timestamps.insert(handler.to_string(), Instant::now());

        let msg = DataMessage {
            name: handler.to_string(),
            values,
            stream_id: self.stream_id,
        };
        conn.send_chunk(CSID_DATA, MSG_DATA_AMF0, 0, self.stream_id, msg.to_amf0(), format)
    }

    fn reset(&mut self) {
        self.ready_state = ReadyState::Initialized;
        self.stream_id = 0;
        self.queued_commands.clear();
        self.clock.reset();
        self.audio_timestamp = 0;
        self.video_timestamp = 0;
        self.audio_header_sent = false;
        self.video_header_sent = false;
        self.data_timestamps.clear();
    }
}
