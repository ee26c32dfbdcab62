use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Zero-padded background frame file name; width 6 is an invariant shared
/// with the extraction tool's `bg_%06d.jpg` output pattern.
pub(crate) fn bg_frame_file_name(n: u64) -> String {
    format!("bg_{n:06}.jpg")
}

/// Per-session working directory tree:
///
/// ```text
/// <base>/<session_id>/
///   bg_frames/bg_000000.jpg ...
///   video.h264
/// ```
///
/// Exclusively owned by the session worker. Dropping the session removes
/// the tree on every exit path (success, failure, cancellation, panic)
/// unless retention was requested.
#[derive(Debug)]
pub struct TempSession {
    root: PathBuf,
    retain: bool,
    cleaned: bool,
}

impl TempSession {
    pub fn create(base: &Path, session_id: &str, retain: bool) -> io::Result<Self> {
        let root = base.join(session_id);
        std::fs::create_dir_all(root.join("bg_frames"))?;
        Ok(Self {
            root,
            retain,
            cleaned: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bg_frames_dir(&self) -> PathBuf {
        self.root.join("bg_frames")
    }

    /// Elementary stream written by the step-2 sink, read by the muxer.
    pub fn h264_path(&self) -> PathBuf {
        self.root.join("video.h264")
    }

    pub fn bg_frame_path(&self, n: u64) -> PathBuf {
        self.bg_frames_dir().join(bg_frame_file_name(n))
    }

    /// Recursively remove the tree. Idempotent; already-removed entries are
    /// not an error, and failures are logged without masking whatever error
    /// is already in flight on the calling path.
    pub fn cleanup(&mut self) {
        if self.cleaned || self.retain {
            return;
        }
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => self.cleaned = true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => self.cleaned = true,
            Err(err) => {
                warn!(root = %self.root.display(), "temp session cleanup failed: {err}");
            }
        }
    }
}

impl Drop for TempSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_lays_out_the_tree() {
        let base = tempfile::tempdir().expect("tempdir");
        let session = TempSession::create(base.path(), "sess-1", false).expect("create");
        assert!(session.bg_frames_dir().is_dir());
        assert_eq!(session.h264_path(), base.path().join("sess-1/video.h264"));
        assert_eq!(
            session.bg_frame_path(7),
            base.path().join("sess-1/bg_frames/bg_000007.jpg")
        );
    }

    #[test]
    fn frame_names_are_zero_padded_to_six_digits() {
        assert_eq!(bg_frame_file_name(0), "bg_000000.jpg");
        assert_eq!(bg_frame_file_name(123), "bg_000123.jpg");
        assert_eq!(bg_frame_file_name(1_234_567), "bg_1234567.jpg");
    }

    #[test]
    fn cleanup_removes_partial_writes_and_is_idempotent() {
        let base = tempfile::tempdir().expect("tempdir");
        let mut session = TempSession::create(base.path(), "sess-2", false).expect("create");
        std::fs::write(session.h264_path(), b"partial").unwrap();
        std::fs::write(session.bg_frame_path(0), b"jpg").unwrap();
        let root = session.root().to_path_buf();

        session.cleanup();
        assert!(!root.exists());
        session.cleanup();
        assert!(!root.exists());
    }

    #[test]
    fn drop_cleans_up() {
        let base = tempfile::tempdir().expect("tempdir");
        let root = {
            let session = TempSession::create(base.path(), "sess-3", false).expect("create");
            session.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn retention_keeps_the_tree() {
        let base = tempfile::tempdir().expect("tempdir");
        let root = {
            let session = TempSession::create(base.path(), "sess-4", true).expect("create");
            std::fs::write(session.h264_path(), b"es").unwrap();
            session.root().to_path_buf()
        };
        assert!(root.exists(), "retained session must survive drop");
    }
}
