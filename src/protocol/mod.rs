//! RTMP wire protocol implementation
//!
//! This module handles the low-level protocol details:
//! - Chunk stream multiplexing and demultiplexing
//! - Message framing and parsing
//!
//! The TCP socket and the RTMP handshake live in the caller's connection
//! layer; this crate consumes and produces framed bytes only.

pub mod chunk;
pub mod constants;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder, RtmpChunk};
pub use message::{Command, DataMessage, RtmpMessage, StatusInfo, UserControlEvent};
