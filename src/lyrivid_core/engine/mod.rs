//! The export session engine: facade, shared state, the three pipeline
//! steps, and progress aggregation.

mod background;
mod driver;
mod mux;
mod progress_agg;
mod state;
mod temp_session;
#[cfg(test)]
mod tests;
mod worker;

use std::sync::Arc;

use state::Inner;
pub use temp_session::TempSession;

use super::cancel::CancelToken;
use super::config::EngineConfig;
use super::domain::{ExportError, ExportRequest, ProgressEvent, SessionSnapshot, TerminalEvent};
use super::encode::VideoEncoder;
use super::media_tool::MediaTool;
use super::render::SceneRenderer;

/// The capability wiring for an engine: how to build the per-session
/// renderer and encoder, and which media tool supervises the external
/// steps. Production wires the ffmpeg-backed implementations; tests wire
/// deterministic in-process stubs.
pub struct ExportCapabilities {
    pub new_renderer: Box<dyn Fn(&ExportRequest) -> Box<dyn SceneRenderer> + Send + Sync>,
    pub new_encoder: Box<dyn Fn(&ExportRequest) -> Box<dyn VideoEncoder> + Send + Sync>,
    pub media_tool: Arc<dyn MediaTool>,
}

/// The main export engine facade.
///
/// One engine serves many sequential or concurrent sessions; each `start`
/// spawns a dedicated worker thread that owns its session's temp directory,
/// renderer, and encoder for the session's lifetime.
#[derive(Clone)]
pub struct ExportEngine {
    inner: Arc<Inner>,
    capabilities: Arc<ExportCapabilities>,
}

impl ExportEngine {
    pub fn new(config: EngineConfig, capabilities: ExportCapabilities) -> Self {
        Self {
            inner: Arc::new(Inner::new(config)),
            capabilities: Arc::new(capabilities),
        }
    }

    /// Validate the request, register the session, and start its worker.
    /// Returns the session id future events will carry.
    pub fn start(&self, request: ExportRequest) -> Result<String, ExportError> {
        request.validate()?;
        let session_id = request.session_id.clone();

        {
            let mut state = self.inner.state.lock().expect("engine state poisoned");
            if state.sessions.contains_key(&session_id) {
                return Err(ExportError::InvalidRequest(format!(
                    "session {session_id} already exists"
                )));
            }
            state
                .sessions
                .insert(session_id.clone(), state::SessionRecord::new(request.clone()));
        }

        let renderer = (self.capabilities.new_renderer)(&request);
        let encoder = (self.capabilities.new_encoder)(&request);
        worker::spawn_session_worker(
            self.inner.clone(),
            session_id.clone(),
            renderer,
            encoder,
            self.capabilities.media_tool.clone(),
        );
        Ok(session_id)
    }

    /// Request cooperative cancellation. Returns whether a live session was
    /// asked to stop; the terminal event arrives once the worker has wound
    /// down and cleaned up.
    pub fn cancel(&self, session_id: &str) -> bool {
        let state = self.inner.state.lock().expect("engine state poisoned");
        match state.sessions.get(session_id) {
            Some(session) if !session.state.is_terminal() => {
                session.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn session_detail(&self, session_id: &str) -> Option<SessionSnapshot> {
        let state = self.inner.state.lock().expect("engine state poisoned");
        state.sessions.get(session_id).map(|s| s.snapshot())
    }

    /// Register a listener for progress events across all sessions.
    pub fn register_progress_listener<F>(&self, listener: F)
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let mut listeners = self
            .inner
            .progress_listeners
            .lock()
            .expect("listener registry poisoned");
        listeners.push(Arc::new(listener));
    }

    /// Register a listener for the single terminal event each session fires.
    pub fn register_terminal_listener<F>(&self, listener: F)
    where
        F: Fn(&TerminalEvent) + Send + Sync + 'static,
    {
        let mut listeners = self
            .inner
            .terminal_listeners
            .lock()
            .expect("listener registry poisoned");
        listeners.push(Arc::new(listener));
    }

    /// Cancellation token for a session, shared with its helpers.
    pub fn cancel_token(&self, session_id: &str) -> Option<CancelToken> {
        let state = self.inner.state.lock().expect("engine state poisoned");
        state.sessions.get(session_id).map(|s| s.cancel.clone())
    }
}
