//! Media packaging for RTMP publishing
//!
//! This module provides:
//! - FLV tag construction for AAC audio and AVC/HEVC video
//! - FOURCC codec identifiers for the extended video header

pub mod flv;
pub mod fourcc;

pub use flv::{AacPacketType, AvcPacketType, ExVideoPacketType, VideoFrameType};
pub use fourcc::{FourCC, VideoCodec};
