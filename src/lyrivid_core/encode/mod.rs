//! The video encoder capability: H.264 configuration candidates with real
//! level capacity checks, the encoded-chunk contract, and the ffmpeg-pipe
//! production encoder.

mod annexb;
mod ffmpeg_pipe;

use std::io;

use thiserror::Error;

pub(crate) use annexb::{AccessUnitSplitter, access_unit_is_idr};
pub use ffmpeg_pipe::FfmpegPipeEncoder;

use super::domain::ExportRequest;
use super::render::PixelBuffer;

/// Resolution hint attached to `EncoderUnsupported` failures.
pub const RESOLUTION_HINT: &str = "for 1:1 aspect, try <= 1440x1440";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Profile {
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Level {
    L4_0,
    L5_0,
}

impl H264Level {
    /// Maximum luma macroblocks per frame the level admits (ITU-T H.264
    /// table A-1).
    pub fn max_macroblocks_per_frame(self) -> u64 {
        match self {
            H264Level::L4_0 => 8192,
            H264Level::L5_0 => 22080,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            H264Level::L4_0 => "4.0",
            H264Level::L5_0 => "5.0",
        }
    }
}

/// One candidate encoder configuration. Everything an encoder needs to
/// produce a deterministic CFR stream is fixed here up front, including the
/// keyframe cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Keyframe interval in frames; one keyframe every two seconds.
    pub gop: u32,
    pub profile: H264Profile,
    pub level: H264Level,
}

impl EncoderConfig {
    /// Candidates in negotiation order: High@4.0, then High@5.0 for frame
    /// sizes (1:1 HD, 4K) that exceed level 4.0.
    pub fn candidates(request: &ExportRequest) -> Vec<EncoderConfig> {
        [H264Level::L4_0, H264Level::L5_0]
            .into_iter()
            .map(|level| EncoderConfig {
                width: request.width,
                height: request.height,
                fps: request.fps,
                gop: request.gop_frames(),
                profile: H264Profile::High,
                level,
            })
            .collect()
    }

    pub fn macroblocks_per_frame(&self) -> u64 {
        u64::from(self.width.div_ceil(16)) * u64::from(self.height.div_ceil(16))
    }

    /// Whether the frame size fits the level's capacity.
    pub fn fits_level(&self) -> bool {
        self.macroblocks_per_frame() <= self.level.max_macroblocks_per_frame()
    }

    pub fn dt_us(&self) -> u64 {
        (1_000_000.0 / self.fps).round() as u64
    }

    pub fn describe(&self) -> String {
        format!("High@{}", self.level.as_str())
    }
}

/// One compressed frame as emitted by the encoder, in encode order. Owned
/// by the chunk callback for the duration of the call only; the sink
/// appends `data` and drops it.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    pub is_key: bool,
    pub timestamp_us: u64,
    pub duration_us: Option<u64>,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct EncoderError {
    pub message: String,
}

impl EncoderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<io::Error> for EncoderError {
    fn from(err: io::Error) -> Self {
        Self::new(err.to_string())
    }
}

pub type ChunkCallback = Box<dyn FnMut(EncodedChunk) + Send>;

/// Capability interface over the H.264 encoder. Chunks arrive on the
/// callback in encode order, which equals submission order.
pub trait VideoEncoder: Send {
    fn is_config_supported(&self, config: &EncoderConfig) -> bool;

    fn configure(
        &mut self,
        config: &EncoderConfig,
        on_chunk: ChunkCallback,
    ) -> Result<(), EncoderError>;

    /// Queue one frame at `pts_us`. Returns without waiting for the encode;
    /// backpressure is the caller's job via `queued_frames`.
    fn submit(
        &mut self,
        frame: &PixelBuffer,
        pts_us: u64,
        key_frame: bool,
    ) -> Result<(), EncoderError>;

    /// Frames submitted but not yet consumed by the encoder.
    fn queued_frames(&self) -> usize;

    /// Drain all in-flight frames and emit their chunks. No further
    /// submissions are accepted afterwards.
    fn flush(&mut self) -> Result<(), EncoderError>;

    /// Tear down immediately, discarding in-flight frames. Safe to call in
    /// any state; used on cancellation.
    fn close(&mut self);
}
