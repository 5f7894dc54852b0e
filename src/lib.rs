//! rtmp-publisher: RTMP live publishing core
//!
//! This library implements the publisher side of RTMP:
//! - Chunk stream codec (fragmentation, four header formats, extended
//!   timestamps)
//! - Typed message model with AMF0 command/data payloads
//! - FLV tag packaging for AAC audio and AVC/HEVC video
//! - Timestamp rebasing with drift-free millisecond deltas
//! - The publish lifecycle state machine behind a serial stream queue
//!
//! The TCP socket and the RTMP handshake stay with the caller: construct
//! the publisher over an established transport writer and feed it the
//! inbound byte stream. Audio/video encoders hand frames to the
//! [`FrameSink`] surface.
//!
//! # Example
//!
//! ```no_run
//! use rtmp_publisher::{FrameSink, PublisherConfig, PublishSettings, RtmpPublisher};
//!
//! # async fn run(socket_writer: impl std::io::Write + Send + 'static) -> rtmp_publisher::Result<()> {
//! let config = PublisherConfig::new("rtmp://ingest.example.com/live/stream-key");
//! let publisher = RtmpPublisher::spawn(socket_writer, config, PublishSettings::default())?;
//!
//! publisher.publish("stream-key");
//! // encoder callbacks:
//! publisher.on_encoded_audio(bytes::Bytes::from_static(&[0x21, 0x00]), 0.0);
//! # Ok(())
//! # }
//! ```

pub mod amf;
pub mod error;
pub mod media;
pub mod protocol;
pub mod publisher;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use publisher::{
    CodecFormat, FrameSink, PublisherConfig, PublisherStats, PublishSettings, ReadyState,
    RtmpPublisher, VideoSample,
};
