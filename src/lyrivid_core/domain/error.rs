use thiserror::Error;

/// Terminal failure taxonomy for an export session.
///
/// Every failed session carries exactly one of these kinds; the engine maps
/// lower-level failures (media tool exits, encoder submission errors, temp
/// directory I/O) onto the matching variant before the terminal event fires.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The request was rejected before a session was created.
    #[error("invalid export request: {0}")]
    InvalidRequest(String),

    /// Temp directory, file write, or rename failure. Not retried.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Background extraction produced fewer frames than the timeline needs.
    #[error("background video too short: extracted {actual} frames, expected {expected}")]
    BackgroundTooShort { actual: u64, expected: u64 },

    /// No candidate encoder configuration was accepted.
    #[error("no supported encoder configuration (tried: {}); {hint}", tried.join(", "))]
    EncoderUnsupported { tried: Vec<String>, hint: String },

    /// Runtime failure during encoder configure/submit/flush.
    #[error("encoder failure: {0}")]
    Encoder(String),

    /// The muxer exited non-zero. Carries the captured tail of its
    /// diagnostics and the exact command line for reproduction.
    #[error("mux failed ({status}): {log_tail}")]
    Mux {
        status: String,
        command: String,
        log_tail: String,
    },

    /// Cooperative cancellation was observed. Distinguished from failures in
    /// the terminal event and the process exit code.
    #[error("export cancelled")]
    Cancelled,
}

impl ExportError {
    /// Stable machine-readable kind identifier, mirrored into session
    /// snapshots and terminal events.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::InvalidRequest(_) => "invalidRequest",
            ExportError::Io(_) => "io",
            ExportError::BackgroundTooShort { .. } => "backgroundTooShort",
            ExportError::EncoderUnsupported { .. } => "encoderUnsupported",
            ExportError::Encoder(_) => "encoder",
            ExportError::Mux { .. } => "mux",
            ExportError::Cancelled => "cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_unsupported_message_lists_tried_configs_and_hint() {
        let err = ExportError::EncoderUnsupported {
            tried: vec!["High@4.0".to_string(), "High@5.0".to_string()],
            hint: "for 1:1 aspect, try <= 1440x1440".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("High@4.0"), "message: {message}");
        assert!(message.contains("High@5.0"), "message: {message}");
        assert!(message.contains("1440x1440"), "message: {message}");
        assert_eq!(err.kind(), "encoderUnsupported");
    }

    #[test]
    fn cancelled_is_not_reported_as_a_failure_kind() {
        let err = ExportError::Cancelled;
        assert!(err.is_cancelled());
        assert_eq!(err.kind(), "cancelled");
    }
}
