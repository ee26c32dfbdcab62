use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use super::background::{BackgroundFrameIndex, prepare_background};
use super::driver::run_lockstep;
use super::mux::mux_session;
use super::progress_agg::ProgressAggregator;
use super::state::{Inner, emit_progress, finish_session, transition_session};
use super::temp_session::TempSession;
use crate::lyrivid_core::cancel::CancelToken;
use crate::lyrivid_core::domain::{ExportError, ExportRequest, SessionState, Timeline};
use crate::lyrivid_core::encode::VideoEncoder;
use crate::lyrivid_core::media_tool::MediaTool;
use crate::lyrivid_core::render::SceneRenderer;

/// Spawn the per-session worker thread. Everything after this call reports
/// back through the session record and the event listeners.
pub(crate) fn spawn_session_worker(
    inner: Arc<Inner>,
    session_id: String,
    renderer: Box<dyn SceneRenderer>,
    encoder: Box<dyn VideoEncoder>,
    media_tool: Arc<dyn MediaTool>,
) {
    let thread_name = format!("lyrivid-export-{session_id}");
    let inner_for_spawn_failure = inner.clone();
    let session_for_spawn_failure = session_id.clone();
    let spawn_result = std::thread::Builder::new().name(thread_name).spawn(move || {
        run_export_session(&inner, &session_id, renderer, encoder, media_tool);
    });
    if let Err(err) = spawn_result {
        // Callers waiting on the terminal event must not hang forever if the
        // worker never came up.
        error!("failed to spawn export worker: {err}");
        finish_session(
            &inner_for_spawn_failure,
            &session_for_spawn_failure,
            Err(ExportError::Io(err)),
            None,
        );
    }
}

pub(crate) fn run_export_session(
    inner: &Arc<Inner>,
    session_id: &str,
    mut renderer: Box<dyn SceneRenderer>,
    mut encoder: Box<dyn VideoEncoder>,
    media_tool: Arc<dyn MediaTool>,
) {
    let Some((request, cancel)) = ({
        let state = inner.state.lock().expect("engine state poisoned");
        state
            .sessions
            .get(session_id)
            .map(|session| (session.request.clone(), session.cancel.clone()))
    }) else {
        error!(session_id, "export worker started for unknown session");
        return;
    };

    let result = export_pipeline(
        inner,
        &request,
        renderer.as_mut(),
        encoder.as_mut(),
        media_tool.as_ref(),
        &cancel,
    );

    match &result {
        Ok(output_path) => {
            info!(session_id, output = %output_path.display(), "export completed");
        }
        Err((ExportError::Cancelled, _)) => info!(session_id, "export cancelled"),
        Err((err, step)) => {
            error!(session_id, ?step, "export failed: {err}");
        }
    }

    match result {
        Ok(output_path) => finish_session(inner, session_id, Ok(output_path), None),
        Err((err, step)) => finish_session(inner, session_id, Err(err), step),
    }
}

type StepTagged<T> = Result<T, (ExportError, Option<u8>)>;

/// The three steps in sequence. Returns the published output path; the
/// temp session is removed on every exit path by its drop guard (retention
/// flag excepted).
fn export_pipeline(
    inner: &Arc<Inner>,
    request: &ExportRequest,
    renderer: &mut dyn SceneRenderer,
    encoder: &mut dyn VideoEncoder,
    media_tool: &dyn MediaTool,
    cancel: &CancelToken,
) -> StepTagged<PathBuf> {
    let timeline = Timeline::new(request);
    let mut temp = TempSession::create(
        &inner.config.temp_base,
        &request.session_id,
        inner.config.retain_temp,
    )
    .map_err(|err| (ExportError::Io(err), None))?;
    let mut agg = ProgressAggregator::new(
        &request.session_id,
        request.background_video_path.is_none(),
    );

    // Step 1: background pre-rasterization, skipped without a background.
    let bg_index: Option<BackgroundFrameIndex> =
        if let Some(background_video) = request.background_video_path.clone() {
            if cancel.is_cancelled() {
                return Err((ExportError::Cancelled, Some(1)));
            }
            transition_session(inner, &request.session_id, SessionState::PreparingBg);
            let index = prepare_background(
                inner,
                request,
                &background_video,
                &timeline,
                &temp,
                media_tool,
                &mut agg,
                cancel,
            )
            .map_err(|err| (err, Some(1)))?;
            Some(index)
        } else {
            None
        };

    // Step 2: the lockstep drive.
    if cancel.is_cancelled() {
        return Err((ExportError::Cancelled, Some(2)));
    }
    transition_session(inner, &request.session_id, SessionState::Encoding);
    run_lockstep(
        inner,
        request,
        &timeline,
        bg_index.as_ref(),
        &temp,
        renderer,
        encoder,
        &mut agg,
        cancel,
    )
    .map_err(|err| (err, Some(2)))?;

    // Step 3: mux and publish.
    if cancel.is_cancelled() {
        return Err((ExportError::Cancelled, Some(3)));
    }
    transition_session(inner, &request.session_id, SessionState::Muxing);
    let output_path = mux_session(inner, request, &temp, media_tool, &mut agg, cancel)
        .map_err(|err| (err, Some(3)))?;

    let final_event = agg.complete();
    emit_progress(inner, final_event);
    temp.cleanup();
    Ok(output_path)
}
