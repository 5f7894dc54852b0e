//! Publisher configuration

use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::media::VideoCodec;
use crate::protocol::constants::RECOMMENDED_CHUNK_SIZE;

/// Connection-level configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// RTMP URL to publish to (rtmp://host[:port]/app[/stream])
    pub url: String,

    /// Flash version string to send in the connect command
    pub flash_ver: String,

    /// Outbound chunk size negotiated after connect
    pub chunk_size: u32,

    /// How long to wait for the server to answer the connect command
    pub connect_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            flash_ver: "FMLE/3.0 (compatible; FMSc/1.0)".to_string(),
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PublisherConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Where a publish session goes, parsed from an rtmp:// URL.
///
/// The application name is mandatory and the trailing stream key optional;
/// the default port 1935 is folded into the authority at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    /// host:port
    authority: String,
    app: String,
    stream_key: Option<String>,
}

impl PublishTarget {
    /// Application name
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Stream key, when the URL carries one
    pub fn stream_key(&self) -> Option<&str> {
        self.stream_key.as_deref()
    }

    /// The tcUrl advertised in the connect command (no stream key)
    pub fn tc_url(&self) -> String {
        format!("rtmp://{}/{}", self.authority, self.app)
    }
}

impl FromStr for PublishTarget {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Error> {
        let rest = input
            .strip_prefix("rtmp://")
            .ok_or_else(|| Error::Config(format!("not an rtmp:// URL: {}", input)))?;

        let (authority, path) = rest
            .split_once('/')
            .ok_or_else(|| Error::Config("URL has no application name".into()))?;
        if authority.is_empty() {
            return Err(Error::Config("URL has no host".into()));
        }

        let authority = match authority.split_once(':') {
            Some((_, port)) => {
                port.parse::<u16>()
                    .map_err(|_| Error::Config(format!("bad port: {}", port)))?;
                authority.to_string()
            }
            None => format!("{}:1935", authority),
        };

        let (app, stream_key) = match path.split_once('/') {
            Some((app, key)) if key.is_empty() => (app, None),
            Some((app, key)) => (app, Some(key.to_string())),
            None => (path, None),
        };
        if app.is_empty() {
            return Err(Error::Config("URL has no application name".into()));
        }

        Ok(PublishTarget {
            authority,
            app: app.to_string(),
            stream_key,
        })
    }
}

/// Per-stream publish settings
///
/// These drive the `onMetaData` object and video packaging. The fields the
/// encoders do not carry (dimensions, rates) are supplied by the caller.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Video width in pixels
    pub width: u32,

    /// Video height in pixels
    pub height: u32,

    /// Video frame rate
    pub framerate: f64,

    /// Video codec to package (AVC or HEVC)
    pub video_codec: VideoCodec,

    /// Video bitrate in kbit/s
    pub video_bitrate_kbps: f64,

    /// Audio bitrate in kbit/s
    pub audio_bitrate_kbps: f64,

    /// Audio sample rate in Hz
    pub audio_sample_rate: f64,

    /// Offset in seconds added to video composition times, absorbing the
    /// encoder's PTS-DTS relationship
    pub composition_time_offset: f64,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            framerate: 30.0,
            video_codec: VideoCodec::Avc,
            video_bitrate_kbps: 2500.0,
            audio_bitrate_kbps: 128.0,
            audio_sample_rate: 44_100.0,
            composition_time_offset: 3.0 / 30.0,
        }
    }
}
