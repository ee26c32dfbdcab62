//! Plain serializable records shared across the export pipeline: the
//! request, the frame timeline, progress/terminal events, session state,
//! and the error taxonomy.

mod error;
mod progress;
mod request;
mod session;
mod timeline;

pub use error::ExportError;
pub use progress::{ExportStep, ProgressEvent, STEP_COUNT};
pub use request::{ExportRequest, FitMode};
pub use session::{
    MAX_LOG_LINES, MAX_LOG_TAIL_BYTES, SessionSnapshot, SessionState, TerminalEvent,
    TerminalOutcome, render_log_tail,
};
pub use timeline::Timeline;
