use serde::{Deserialize, Serialize};

/// Lifecycle of one export session.
///
/// Transitions are one-way along `Idle -> PreparingBg -> Encoding -> Muxing
/// -> Succeeded`; any non-terminal state may move to `Cancelled` or
/// `Failed`. Once terminal, no further state changes or events are emitted
/// for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    PreparingBg,
    Encoding,
    Muxing,
    Succeeded,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Succeeded | SessionState::Failed | SessionState::Cancelled
        )
    }

    fn rank(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::PreparingBg => 1,
            SessionState::Encoding => 2,
            SessionState::Muxing => 3,
            SessionState::Succeeded => 4,
            SessionState::Failed => 4,
            SessionState::Cancelled => 4,
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            SessionState::Cancelled | SessionState::Failed => true,
            SessionState::Idle => false,
            _ => next.rank() > self.rank(),
        }
    }
}

/// Serializable view of one session for shells that poll instead of
/// subscribing to the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub overall_progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u8>,
    pub step_progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    /// Truncated tail of the session diagnostics, at most
    /// [`MAX_LOG_TAIL_BYTES`] of rendered text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_tail: Option<String>,
}

/// The single terminal event fired per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalEvent {
    pub session_id: String,
    pub outcome: TerminalOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "kind")]
pub enum TerminalOutcome {
    Completed {
        output_path: String,
    },
    Failed {
        error_kind: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<u8>,
    },
    Cancelled,
}

/// Upper bound for the rendered diagnostics tail kept per session.
pub const MAX_LOG_TAIL_BYTES: usize = 16 * 1024;

/// Rolling window of diagnostic lines kept per session.
pub const MAX_LOG_LINES: usize = 200;

/// Materialize the truncated tail view of `lines`, capped at
/// [`MAX_LOG_TAIL_BYTES`] on a char boundary.
pub fn render_log_tail(lines: &[String]) -> Option<String> {
    if lines.is_empty() {
        return None;
    }
    let joined = lines.join("\n");
    if joined.len() > MAX_LOG_TAIL_BYTES {
        let mut start = joined.len() - MAX_LOG_TAIL_BYTES;
        while !joined.is_char_boundary(start) {
            start += 1;
        }
        Some(joined[start..].to_string())
    } else {
        Some(joined)
    }
}
