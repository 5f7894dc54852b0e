//! Media timestamp rebasing
//!
//! Encoders emit monotonic presentation/decode timestamps in seconds;
//! RTMP wants non-negative millisecond deltas per message. The clock
//! rebases everything against the first accepted frame and keeps one
//! fractional-millisecond accumulator per media channel so that the sum
//! of the emitted integer deltas tracks true elapsed time within ±1 ms.

/// Media channels with independent delta tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaChannel {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelClock {
    /// Rebased timestamp of the last accepted frame
    prev_rebased: Option<f64>,
    /// Fractional-millisecond carry
    delta_acc: f64,
}

/// Per-stream rebasing clock
#[derive(Debug, Clone, Default)]
pub struct MediaClock {
    /// Origin captured from the first frame after publish
    base: Option<f64>,
    audio: ChannelClock,
    video: ChannelClock,
}

impl MediaClock {
    /// Create a clock with no origin
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the origin and all channel state
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Rebase a media timestamp against the stream origin.
    ///
    /// The first call records the origin. Returns None for timestamps
    /// before the origin; such frames are dropped.
    pub fn rebase(&mut self, seconds: f64) -> Option<f64> {
        let base = *self.base.get_or_insert(seconds);
        let rebased = seconds - base;
        if rebased < 0.0 {
            None
        } else {
            Some(rebased)
        }
    }

    /// Rebase without capturing an origin; None until one exists or when
    /// the timestamp precedes it.
    pub fn rebased(&self, seconds: f64) -> Option<f64> {
        let rebased = seconds - self.base?;
        if rebased < 0.0 {
            None
        } else {
            Some(rebased)
        }
    }

    /// Advance a channel to a rebased timestamp, returning the integer
    /// millisecond delta to put on the wire.
    ///
    /// Returns None when the channel would move backwards; the frame is
    /// dropped and neither the previous timestamp nor the accumulator
    /// changes.
    pub fn advance(&mut self, channel: MediaChannel, rebased: f64) -> Option<u32> {
        let clock = self.channel_mut(channel);
        let prev = clock.prev_rebased.unwrap_or(rebased);

        let delta_ms = (rebased - prev) * 1000.0;
        if delta_ms < 0.0 {
            return None;
        }

        clock.delta_acc += delta_ms;
        let emitted = clock.delta_acc.floor();
        clock.delta_acc -= emitted;
        clock.prev_rebased = Some(rebased);

        Some(emitted as u32)
    }

    /// Composition time offset in milliseconds for a video frame whose
    /// presentation timestamp differs from its decode timestamp.
    ///
    /// Computed against the previous accepted video frame, before the
    /// channel advances; zero for the first frame.
    pub fn video_composition_time(&self, pts_rebased: f64, offset_secs: f64) -> i32 {
        match self.video.prev_rebased {
            Some(prev) => ((pts_rebased - prev + offset_secs) * 1000.0).round() as i32,
            None => 0,
        }
    }

    /// Whether an origin has been captured
    pub fn has_base(&self) -> bool {
        self.base.is_some()
    }

    fn channel_mut(&mut self, channel: MediaChannel) -> &mut ChannelClock {
        match channel {
            MediaChannel::Audio => &mut self.audio,
            MediaChannel::Video => &mut self.video,
        }
    }
}
