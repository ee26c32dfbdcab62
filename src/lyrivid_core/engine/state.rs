use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::lyrivid_core::cancel::CancelToken;
use crate::lyrivid_core::config::EngineConfig;
use crate::lyrivid_core::domain::{
    ExportError, ExportRequest, MAX_LOG_LINES, ProgressEvent, SessionSnapshot, SessionState,
    TerminalEvent, TerminalOutcome, render_log_tail,
};

pub(crate) type ProgressListener = Arc<dyn Fn(&ProgressEvent) + Send + Sync + 'static>;
pub(crate) type TerminalListener = Arc<dyn Fn(&TerminalEvent) + Send + Sync + 'static>;

pub(crate) fn current_time_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Mutable per-session record behind the engine lock.
pub(crate) struct SessionRecord {
    pub(crate) request: ExportRequest,
    pub(crate) state: SessionState,
    pub(crate) overall_progress: f64,
    pub(crate) step_index: Option<u8>,
    pub(crate) step_progress: f64,
    pub(crate) output_path: Option<PathBuf>,
    pub(crate) error_kind: Option<String>,
    pub(crate) failure_reason: Option<String>,
    pub(crate) started_at_ms: u64,
    pub(crate) ended_at_ms: Option<u64>,
    pub(crate) logs: Vec<String>,
    pub(crate) log_tail: Option<String>,
    pub(crate) cancel: CancelToken,
}

impl SessionRecord {
    pub(crate) fn new(request: ExportRequest) -> Self {
        Self {
            request,
            state: SessionState::Idle,
            overall_progress: 0.0,
            step_index: None,
            step_progress: 0.0,
            output_path: None,
            error_kind: None,
            failure_reason: None,
            started_at_ms: current_time_millis(),
            ended_at_ms: None,
            logs: Vec::new(),
            log_tail: None,
            cancel: CancelToken::new(),
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.request.session_id.clone(),
            state: self.state,
            overall_progress: self.overall_progress,
            step_index: self.step_index,
            step_progress: self.step_progress,
            output_path: self
                .output_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            error_kind: self.error_kind.clone(),
            failure_reason: self.failure_reason.clone(),
            started_at_ms: self.started_at_ms,
            ended_at_ms: self.ended_at_ms,
            log_tail: self.log_tail.clone(),
        }
    }

    /// Append one diagnostic line, keeping only a small rolling window to
    /// avoid unbounded growth, and refresh the rendered tail.
    pub(crate) fn append_log(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.drain(0..self.logs.len() + 1 - MAX_LOG_LINES);
        }
        self.logs.push(line.to_string());
        self.log_tail = render_log_tail(&self.logs);
    }
}

pub(crate) struct EngineState {
    pub(crate) sessions: HashMap<String, SessionRecord>,
}

pub(crate) struct Inner {
    pub(crate) config: EngineConfig,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) progress_listeners: Mutex<Vec<ProgressListener>>,
    pub(crate) terminal_listeners: Mutex<Vec<TerminalListener>>,
}

impl Inner {
    pub(crate) fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Mutex::new(EngineState {
                sessions: HashMap::new(),
            }),
            progress_listeners: Mutex::new(Vec::new()),
            terminal_listeners: Mutex::new(Vec::new()),
        }
    }
}

pub(crate) fn append_session_log(inner: &Inner, session_id: &str, line: &str) {
    let mut state = inner.state.lock().expect("engine state poisoned");
    if let Some(session) = state.sessions.get_mut(session_id) {
        session.append_log(line);
    }
}

/// Advance a session to a non-terminal state. Illegal transitions (already
/// terminal, or moving backwards) are refused and logged.
pub(crate) fn transition_session(inner: &Inner, session_id: &str, next: SessionState) -> bool {
    let mut state = inner.state.lock().expect("engine state poisoned");
    let Some(session) = state.sessions.get_mut(session_id) else {
        return false;
    };
    if !session.state.can_transition_to(next) {
        warn!(session_id, ?next, current = ?session.state, "refused state transition");
        return false;
    }
    session.state = next;
    true
}

/// Record a progress sample and fan it out to subscribers. Listeners are
/// invoked outside the engine lock.
pub(crate) fn emit_progress(inner: &Inner, event: ProgressEvent) {
    {
        let mut state = inner.state.lock().expect("engine state poisoned");
        if let Some(session) = state.sessions.get_mut(&event.session_id) {
            // Terminal sessions emit nothing further.
            if session.state.is_terminal() {
                return;
            }
            session.overall_progress = event.overall_progress;
            session.step_index = Some(event.step_index);
            session.step_progress = event.step_progress;
        }
    }
    let listeners: Vec<ProgressListener> = inner
        .progress_listeners
        .lock()
        .expect("listener registry poisoned")
        .clone();
    for listener in listeners {
        listener(&event);
    }
}

/// Move a session to its terminal state and fire the terminal event
/// exactly once. `step` is the 1-based step the failure surfaced in.
pub(crate) fn finish_session(
    inner: &Inner,
    session_id: &str,
    result: Result<PathBuf, ExportError>,
    step: Option<u8>,
) {
    let event = {
        let mut state = inner.state.lock().expect("engine state poisoned");
        let Some(session) = state.sessions.get_mut(session_id) else {
            return;
        };
        if session.state.is_terminal() {
            return;
        }
        session.ended_at_ms = Some(current_time_millis());

        let outcome = match result {
            Ok(output_path) => {
                session.state = SessionState::Succeeded;
                session.overall_progress = 1.0;
                session.output_path = Some(output_path.clone());
                TerminalOutcome::Completed {
                    output_path: output_path.to_string_lossy().into_owned(),
                }
            }
            Err(ExportError::Cancelled) => {
                session.state = SessionState::Cancelled;
                session.error_kind = Some(ExportError::Cancelled.kind().to_string());
                TerminalOutcome::Cancelled
            }
            Err(err) => {
                session.state = SessionState::Failed;
                let message = err.to_string();
                session.error_kind = Some(err.kind().to_string());
                session.failure_reason = Some(message.clone());
                session.append_log(&message);
                TerminalOutcome::Failed {
                    error_kind: err.kind().to_string(),
                    message,
                    step,
                }
            }
        };
        TerminalEvent {
            session_id: session_id.to_string(),
            outcome,
        }
    };

    let listeners: Vec<TerminalListener> = inner
        .terminal_listeners
        .lock()
        .expect("listener registry poisoned")
        .clone();
    for listener in listeners {
        listener(&event);
    }
}
