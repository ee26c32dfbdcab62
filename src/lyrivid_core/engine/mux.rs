use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::progress_agg::ProgressAggregator;
use super::state::{Inner, append_session_log, emit_progress};
use super::temp_session::TempSession;
use crate::lyrivid_core::cancel::CancelToken;
use crate::lyrivid_core::domain::{ExportError, ExportRequest, ExportStep};
use crate::lyrivid_core::media_tool::{MediaTool, MediaToolError, MuxSpec};

/// Scratch destination adjacent to the requested output, so the final
/// rename stays on one filesystem. Keeps the `.mp4` suffix because the
/// muxer infers the container from it.
pub(crate) fn scratch_output_path(output_path: &Path) -> PathBuf {
    let file_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    match output_path.parent() {
        Some(parent) => parent.join(format!(".{file_name}.part.mp4")),
        None => PathBuf::from(format!(".{file_name}.part.mp4")),
    }
}

/// Step 3: combine the elementary stream with the optional audio into the
/// final MP4, then atomically publish it at the requested path. A partial
/// file is never observable at `output_path`.
pub(crate) fn mux_session(
    inner: &Arc<Inner>,
    request: &ExportRequest,
    temp: &TempSession,
    media_tool: &dyn MediaTool,
    agg: &mut ProgressAggregator,
    cancel: &CancelToken,
) -> Result<PathBuf, ExportError> {
    let session_id = request.session_id.clone();
    let total_duration_ms = request.total_duration_ms();

    let event = agg.begin_step(ExportStep::Muxing);
    emit_progress(inner, event);

    if let Some(parent) = request.output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let scratch = scratch_output_path(&request.output_path);
    let h264_path = temp.h264_path();

    let spec = MuxSpec {
        h264_path: &h264_path,
        audio_path: request.audio_path.as_deref(),
        fps: request.fps,
        total_frames: request.total_frames(),
        total_duration_ms,
        audio_start_ms: request.start_ms,
        output_path: &scratch,
    };

    let mut on_heartbeat = |heartbeat: crate::lyrivid_core::media_tool::ToolHeartbeat| {
        let step_progress = if heartbeat.end {
            1.0
        } else if let Some(out_time_ms) = heartbeat.out_time_ms {
            (out_time_ms as f64 / total_duration_ms as f64).min(1.0)
        } else {
            return;
        };
        let event = agg.sample(step_progress);
        emit_progress(inner, event);
    };
    let mut on_log_line = |line: &str| append_session_log(inner, &session_id, line);

    let result = media_tool.mux_h264(&spec, cancel, &mut on_heartbeat, &mut on_log_line);
    match result {
        Ok(()) => {
            if let Err(err) = std::fs::rename(&scratch, &request.output_path) {
                // A failed publish (cross-device move, permissions, full
                // disk) must not strand the scratch file next to the
                // destination.
                let _ = std::fs::remove_file(&scratch);
                return Err(err.into());
            }
            Ok(request.output_path.clone())
        }
        Err(err) => {
            // Whatever the tool managed to write must not linger next to
            // the requested output.
            let _ = std::fs::remove_file(&scratch);
            Err(match err {
                MediaToolError::Cancelled => ExportError::Cancelled,
                MediaToolError::Io(err) => ExportError::Io(err),
                MediaToolError::NonZeroExit {
                    status,
                    command,
                    log_tail,
                } => ExportError::Mux {
                    status,
                    command,
                    log_tail,
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_path_sits_next_to_the_output_with_an_mp4_suffix() {
        let scratch = scratch_output_path(Path::new("/videos/final.mp4"));
        assert_eq!(scratch, PathBuf::from("/videos/.final.mp4.part.mp4"));
        let bare = scratch_output_path(Path::new("out.mp4"));
        assert_eq!(bare, PathBuf::from(".out.mp4.part.mp4"));
    }
}
