use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::progress_agg::ProgressAggregator;
use super::state::{Inner, append_session_log, emit_progress};
use super::temp_session::{TempSession, bg_frame_file_name};
use crate::lyrivid_core::cancel::CancelToken;
use crate::lyrivid_core::domain::{ExportError, ExportRequest, ExportStep, Timeline};
use crate::lyrivid_core::media_tool::{ExtractFramesSpec, MediaTool, MediaToolError};

/// Read-only mapping `n -> bg_frames/bg_{n:06}.jpg`, valid for every
/// `n < total_frames` once step 1 has succeeded.
#[derive(Debug, Clone)]
pub(crate) struct BackgroundFrameIndex {
    dir: PathBuf,
}

impl BackgroundFrameIndex {
    pub(crate) fn frame_path(&self, n: u64) -> PathBuf {
        self.dir.join(bg_frame_file_name(n))
    }
}

/// Step 1: pre-rasterize the background video into one JPEG per timeline
/// frame, so step 2 reads files instead of seeking a decoder. Severs the
/// background's decode jitter from the encode path and makes the pipeline
/// reproducible.
pub(crate) fn prepare_background(
    inner: &Arc<Inner>,
    request: &ExportRequest,
    background_video: &Path,
    timeline: &Timeline,
    temp: &TempSession,
    media_tool: &dyn MediaTool,
    agg: &mut ProgressAggregator,
    cancel: &CancelToken,
) -> Result<BackgroundFrameIndex, ExportError> {
    let session_id = request.session_id.clone();
    let total_frames = timeline.total_frames();
    let total_duration_ms = request.total_duration_ms();
    let out_dir = temp.bg_frames_dir();

    let event = agg.begin_step(ExportStep::BackgroundPrep);
    emit_progress(inner, event);

    let spec = ExtractFramesSpec {
        input: background_video,
        out_dir: &out_dir,
        fps: request.fps,
        width: request.width,
        height: request.height,
        start_ms: request.start_ms,
        end_ms: request.end_ms,
        fit: request.background_fit,
        jpeg_quality: 2,
    };

    let mut on_heartbeat = |heartbeat: crate::lyrivid_core::media_tool::ToolHeartbeat| {
        let step_progress = if heartbeat.end {
            1.0
        } else if let Some(out_time_ms) = heartbeat.out_time_ms {
            (out_time_ms as f64 / total_duration_ms as f64).min(1.0)
        } else if let Some(frame) = heartbeat.frame {
            (frame as f64 / total_frames as f64).min(1.0)
        } else {
            return;
        };
        let event = agg.sample(step_progress);
        emit_progress(inner, event);
    };
    let mut on_log_line = |line: &str| append_session_log(inner, &session_id, line);

    let produced = media_tool
        .extract_frames(&spec, cancel, &mut on_heartbeat, &mut on_log_line)
        .map_err(map_extract_error)?;

    // Looping is not this component's job: a background shorter than the
    // export window is a hard failure, surfaced with both counts.
    if produced < total_frames {
        return Err(ExportError::BackgroundTooShort {
            actual: produced,
            expected: total_frames,
        });
    }

    let event = agg.sample(1.0);
    emit_progress(inner, event);
    Ok(BackgroundFrameIndex { dir: out_dir })
}

fn map_extract_error(err: MediaToolError) -> ExportError {
    match err {
        MediaToolError::Cancelled => ExportError::Cancelled,
        MediaToolError::Io(err) => ExportError::Io(err),
        MediaToolError::NonZeroExit {
            status,
            command,
            log_tail,
        } => ExportError::Io(std::io::Error::other(format!(
            "background frame extraction failed ({status}); command: {command}; {log_tail}"
        ))),
    }
}
