//! FLV tag construction
//!
//! RTMP audio/video message payloads are FLV tag bodies (the framing shared
//! with the FLV file format, minus the file-level tag header). The publisher
//! builds these bodies from encoder output.
//!
//! RTMP Video Data (classic, AVC):
//! ```text
//! +----------+----------+------------+----------------+---------+
//! | FrameType| CodecID  | PacketType | CompositionTime| Data    |
//! | (4 bits) | (4 bits) | (1 byte)   | (3 bytes, i24) | (N)     |
//! +----------+----------+------------+----------------+---------+
//! ```
//!
//! RTMP Video Data (extended header, HEVC):
//! ```text
//! +---+-----------+------------+--------+------------------------+
//! | 1 | FrameType | PacketType | FOURCC | [CompositionTime] Data |
//! |bit| (3 bits)  | (4 bits)   | (4 B)  |                        |
//! +---+-----------+------------+--------+------------------------+
//! ```
//!
//! RTMP Audio Data (AAC):
//! ```text
//! +-----------+---------+----------+----------+---------+------+
//! |SoundFormat|SoundRate|SoundSize |SoundType | AACType | Data |
//! | (4 bits)  | (2 bits)| (1 bit)  | (1 bit)  | (1 byte)|      |
//! +-----------+---------+----------+----------+---------+------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};
use crate::media::fourcc::VideoCodec;

/// AAC audio tag header byte: codec 10, 44.1 kHz, 16-bit, stereo.
///
/// (10 << 4) | (3 << 2) | (1 << 1) | 1
pub const AAC_AUDIO_HEADER: u8 = 0xAF;

/// Extended video header flag (bit 7 of the first byte)
const EX_VIDEO_HEADER: u8 = 0x80;

/// Signed 24-bit range for composition time offsets
const COMPOSITION_TIME_MIN: i32 = -(1 << 23);
const COMPOSITION_TIME_MAX: i32 = (1 << 23) - 1;

/// Video frame type (upper bits of the first tag byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (IDR, seekable)
    Key = 1,
    /// Inter frame
    Inter = 2,
}

/// AAC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    /// Sequence header (AudioSpecificConfig)
    SequenceHeader = 0,
    /// Raw AAC frame data
    Raw = 1,
}

/// AVC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// AVCDecoderConfigurationRecord
    SequenceHeader = 0,
    /// One or more NALUs (AVCC framing, no Annex-B start codes)
    Nalu = 1,
}

/// Extended video packet type (lower 4 bits when the extended bit is set)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExVideoPacketType {
    /// Sequence start (codec configuration record)
    SequenceStart = 0,
    /// Coded frames with composition time
    CodedFrames = 1,
}

/// Build an AAC audio tag body: `AF 00|01 <data>`
pub fn aac_audio_tag(packet_type: AacPacketType, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + data.len());
    buf.put_u8(AAC_AUDIO_HEADER);
    buf.put_u8(packet_type as u8);
    buf.put_slice(data);
    buf.freeze()
}

/// Build a classic AVC video tag body.
///
/// Layout: frame/codec byte, packet type, 3-byte signed composition time,
/// then the configuration record or AVCC sample data.
pub fn avc_video_tag(
    frame_type: VideoFrameType,
    packet_type: AvcPacketType,
    composition_time_ms: i32,
    data: &[u8],
) -> Result<Bytes> {
    if data.is_empty() {
        return Err(MediaError::EmptySample.into());
    }
    check_composition_time(composition_time_ms)?;

    let mut buf = BytesMut::with_capacity(5 + data.len());
    buf.put_u8(((frame_type as u8) << 4) | VideoCodec::AVC_CODEC_ID);
    buf.put_u8(packet_type as u8);
    put_i24(&mut buf, composition_time_ms);
    buf.put_slice(data);
    Ok(buf.freeze())
}

/// Build an extended-header HEVC video tag body.
///
/// Layout: extended bit | frame type | packet type, FOURCC "hvc1", then
/// either the HEVCDecoderConfigurationRecord (sequence start) or a 3-byte
/// signed composition time followed by the coded access unit.
pub fn hevc_video_tag(
    frame_type: VideoFrameType,
    packet_type: ExVideoPacketType,
    composition_time_ms: i32,
    data: &[u8],
) -> Result<Bytes> {
    if data.is_empty() {
        return Err(MediaError::EmptySample.into());
    }

    let mut buf = BytesMut::with_capacity(8 + data.len());
    buf.put_u8(EX_VIDEO_HEADER | ((frame_type as u8) << 4) | packet_type as u8);
    buf.put_slice(VideoCodec::HEVC_FOURCC.as_bytes());
    if packet_type == ExVideoPacketType::CodedFrames {
        check_composition_time(composition_time_ms)?;
        put_i24(&mut buf, composition_time_ms);
    }
    buf.put_slice(data);
    Ok(buf.freeze())
}

fn check_composition_time(ct: i32) -> Result<()> {
    if !(COMPOSITION_TIME_MIN..=COMPOSITION_TIME_MAX).contains(&ct) {
        return Err(MediaError::InvalidCompositionTime(ct).into());
    }
    Ok(())
}

/// Write a signed 24-bit big-endian value
fn put_i24(buf: &mut BytesMut, value: i32) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}

/// Check whether a video tag body carries a keyframe
pub fn is_key_frame(data: &[u8]) -> bool {
    match data.first() {
        Some(b) if b & EX_VIDEO_HEADER != 0 => (b >> 4) & 0x07 == VideoFrameType::Key as u8,
        Some(b) => (b >> 4) & 0x0F == VideoFrameType::Key as u8,
        None => false,
    }
}

/// Check whether an audio tag body is an AAC sequence header
pub fn is_aac_sequence_header(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == AAC_AUDIO_HEADER && data[1] == AacPacketType::SequenceHeader as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aac_sequence_header_tag() {
        // AudioSpecificConfig for AAC-LC 44.1 kHz stereo
        let tag = aac_audio_tag(AacPacketType::SequenceHeader, &[0x12, 0x10]);
        assert_eq!(&tag[..], &[0xAF, 0x00, 0x12, 0x10]);
        assert!(is_aac_sequence_header(&tag));
    }

    #[test]
    fn test_aac_raw_tag() {
        let tag = aac_audio_tag(AacPacketType::Raw, &[0x21, 0x00, 0x03]);
        assert_eq!(&tag[..2], &[0xAF, 0x01]);
        assert_eq!(&tag[2..], &[0x21, 0x00, 0x03]);
        assert!(!is_aac_sequence_header(&tag));
    }

    #[test]
    fn test_avc_sequence_header_tag() {
        let config = [0x01, 0x64, 0x00, 0x1F, 0xFF];
        let tag = avc_video_tag(VideoFrameType::Key, AvcPacketType::SequenceHeader, 0, &config)
            .unwrap();
        assert_eq!(&tag[..5], &[0x17, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&tag[5..], &config);
        assert!(is_key_frame(&tag));
    }

    #[test]
    fn test_avc_inter_frame_with_composition_time() {
        let tag = avc_video_tag(VideoFrameType::Inter, AvcPacketType::Nalu, 100, &[0xAA])
            .unwrap();
        assert_eq!(tag[0], 0x27);
        assert_eq!(tag[1], 0x01);
        assert_eq!(&tag[2..5], &[0x00, 0x00, 0x64]);
        assert!(!is_key_frame(&tag));
    }

    #[test]
    fn test_avc_negative_composition_time() {
        let tag = avc_video_tag(VideoFrameType::Inter, AvcPacketType::Nalu, -2, &[0xAA])
            .unwrap();
        // -2 as signed 24-bit big-endian
        assert_eq!(&tag[2..5], &[0xFF, 0xFF, 0xFE]);
    }

    #[test]
    fn test_hevc_key_frame_tag() {
        let sample = [0xDE, 0xAD, 0xBE, 0xEF];
        let tag = hevc_video_tag(VideoFrameType::Key, ExVideoPacketType::CodedFrames, 100, &sample)
            .unwrap();
        // (1 << 7) | (1 << 4) | 1 = 0x91
        assert_eq!(tag[0], 0x91);
        assert_eq!(&tag[1..5], b"hvc1");
        assert_eq!(&tag[5..8], &[0x00, 0x00, 0x64]);
        assert_eq!(&tag[8..], &sample);
        assert!(is_key_frame(&tag));
    }

    #[test]
    fn test_hevc_sequence_start_has_no_composition_time() {
        let config = [0x01, 0x02];
        let tag = hevc_video_tag(VideoFrameType::Key, ExVideoPacketType::SequenceStart, 0, &config)
            .unwrap();
        assert_eq!(tag[0], 0x90);
        assert_eq!(&tag[1..5], b"hvc1");
        assert_eq!(&tag[5..], &config);
    }

    #[test]
    fn test_empty_sample_rejected() {
        assert!(avc_video_tag(VideoFrameType::Key, AvcPacketType::Nalu, 0, &[]).is_err());
        assert!(hevc_video_tag(VideoFrameType::Key, ExVideoPacketType::CodedFrames, 0, &[]).is_err());
    }

    #[test]
    fn test_composition_time_range() {
        assert!(avc_video_tag(VideoFrameType::Inter, AvcPacketType::Nalu, 1 << 23, &[1]).is_err());
        assert!(avc_video_tag(VideoFrameType::Inter, AvcPacketType::Nalu, (1 << 23) - 1, &[1]).is_ok());
        assert!(avc_video_tag(VideoFrameType::Inter, AvcPacketType::Nalu, -(1 << 23), &[1]).is_ok());
    }
}
