//! Publishing core
//!
//! This module drives a publish session end to end:
//! - connection plumbing over the caller's transport (commands, control)
//! - the publish lifecycle state machine and FLV frame emission
//! - timestamp rebasing, status event dispatch, shared counters
//! - the serial stream queue behind the public handle

pub mod config;
pub mod connection;
pub mod events;
pub mod handle;
pub mod stats;
pub mod stream;
pub mod timestamp;

pub use config::{PublisherConfig, PublishSettings, PublishTarget};
pub use connection::{IncomingEvent, RtmpConnection};
pub use events::{Event, EventDispatcher, EventKind, ListenerToken};
pub use handle::{FrameSink, RtmpPublisher};
pub use stats::PublisherStats;
pub use stream::{CodecFormat, ReadyState, RtmpStream, VideoSample};
pub use timestamp::{MediaChannel, MediaClock};
