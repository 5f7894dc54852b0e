//! FOURCC codec identifiers
//!
//! FOURCC (Four Character Code) is a sequence of four bytes used to uniquely
//! identify a codec. The extended FLV video header signals modern codecs like
//! HEVC by FOURCC, and the same value (as a big-endian u32) is advertised in
//! the `videocodecid` metadata field.
//!
//! Reference: E-RTMP v2 specification

use std::fmt;

/// A four-character ASCII code identifying a codec.
///
/// FOURCC values are stored as big-endian u32 (e.g., "hvc1" = 0x68766331).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC([u8; 4]);

impl FourCC {
    /// Create a FOURCC from 4 ASCII bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Convert to big-endian u32 (for AMF encoding).
    pub const fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Convert to string slice ("????" if somehow not ASCII).
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC(\"{}\")", self.as_str())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Video codecs the publisher can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// H.264/AVC, classic FLV codec id 7
    Avc,
    /// H.265/HEVC, extended video header with FOURCC "hvc1"
    Hevc,
}

impl VideoCodec {
    /// FOURCC for H.265/HEVC
    pub const HEVC_FOURCC: FourCC = FourCC::new(*b"hvc1");

    /// Classic FLV codec id for AVC
    pub const AVC_CODEC_ID: u8 = 7;

    /// The `videocodecid` metadata value: 7 for AVC, the FOURCC as u32
    /// for HEVC.
    pub fn metadata_codec_id(&self) -> f64 {
        match self {
            VideoCodec::Avc => Self::AVC_CODEC_ID as f64,
            VideoCodec::Hevc => Self::HEVC_FOURCC.as_u32() as f64,
        }
    }

    /// Get the codec name as a string.
    pub const fn name(&self) -> &'static str {
        match self {
            VideoCodec::Avc => "H.264/AVC",
            VideoCodec::Hevc => "H.265/HEVC",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
