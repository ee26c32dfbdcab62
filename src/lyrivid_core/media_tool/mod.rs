//! The external media tool capability: frame extraction for step 1 and the
//! final mux for step 3, both supervised processes streaming progress
//! heartbeats. Production wires the ffmpeg CLI implementation; engine tests
//! wire an in-process stub.

mod args;
mod ffmpeg;
mod progress;

use std::path::Path;

use thiserror::Error;

use super::cancel::CancelToken;
use super::domain::FitMode;
pub use args::format_command_for_log;
pub(crate) use args::{build_extract_frames_args, build_mux_args, format_fps};
pub use ffmpeg::FfmpegMediaTool;
pub(crate) use progress::{is_progress_end, parse_progress_line};

/// One `(out_time_ms, frame, fps)` sample parsed from the tool's progress
/// stream. Any field may be absent on a given sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ToolHeartbeat {
    pub out_time_ms: Option<u64>,
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub speed: Option<f64>,
    /// Set on the final `progress=end` sample of a structured stream.
    pub end: bool,
}

/// Inputs for the background frame extraction run.
#[derive(Debug, Clone)]
pub struct ExtractFramesSpec<'a> {
    pub input: &'a Path,
    pub out_dir: &'a Path,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub fit: FitMode,
    /// ffmpeg JPEG quality on the 2..=31 scale, 2 = best.
    pub jpeg_quality: u8,
}

/// Inputs for the final mux run. `output_path` here is the scratch path the
/// caller later renames onto the requested destination.
#[derive(Debug, Clone)]
pub struct MuxSpec<'a> {
    pub h264_path: &'a Path,
    pub audio_path: Option<&'a Path>,
    pub fps: f64,
    pub total_frames: u64,
    pub total_duration_ms: u64,
    /// Offset into the audio file matching t=0 of the output.
    pub audio_start_ms: u64,
    pub output_path: &'a Path,
}

#[derive(Debug, Error)]
pub enum MediaToolError {
    #[error("media tool cancelled")]
    Cancelled,
    #[error("media tool exited with {status}")]
    NonZeroExit {
        status: String,
        command: String,
        log_tail: String,
    },
    #[error("media tool i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability interface over the external tool. Both operations block until
/// the tool exits, forwarding heartbeats and raw diagnostic lines as they
/// stream in; cancellation is observed between heartbeats.
pub trait MediaTool: Send + Sync {
    /// Extract one JPEG per output frame into `spec.out_dir` as
    /// `bg_{n:06}.jpg` starting at 0. Returns the number of frames written.
    fn extract_frames(
        &self,
        spec: &ExtractFramesSpec<'_>,
        cancel: &CancelToken,
        on_heartbeat: &mut dyn FnMut(ToolHeartbeat),
        on_log_line: &mut dyn FnMut(&str),
    ) -> Result<u64, MediaToolError>;

    /// Combine the elementary stream and optional audio into an MP4 at
    /// `spec.output_path`.
    fn mux_h264(
        &self,
        spec: &MuxSpec<'_>,
        cancel: &CancelToken,
        on_heartbeat: &mut dyn FnMut(ToolHeartbeat),
        on_log_line: &mut dyn FnMut(&str),
    ) -> Result<(), MediaToolError>;
}
