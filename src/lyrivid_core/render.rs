//! The scene renderer capability and the deterministic test-card renderer
//! used for headless exports.

use std::io;
use std::path::Path;

/// RGBA8 frame buffer handed to the renderer once per timestamp. The driver
/// reuses one allocation across frames; its contents are fully overwritten
/// by every render.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Paints one frame per timestamp.
///
/// Implementations must be pure in `(t_ms, scene description)`: no wall
/// clock, no frame counters, no unseeded randomness. The driver calls
/// `set_time`, then one of the background operations, then `render_into`,
/// with no suspension in between.
pub trait SceneRenderer: Send {
    /// Deterministically advance scene state to `t_ms`.
    fn set_time(&mut self, t_ms: u64);

    /// Composite the given pre-rasterized image as the background for
    /// subsequent renders. The image is exactly the output resolution.
    fn set_background_frame(&mut self, path: &Path) -> io::Result<()>;

    /// Pause the live background source at `t_ms`. Used only when no
    /// background frame index exists.
    fn freeze_background_at(&mut self, t_ms: u64);

    /// Paint the frame for the most recent `set_time` into `buffer`.
    fn render_into(&mut self, buffer: &mut PixelBuffer) -> io::Result<()>;
}

/// Clock-free synthetic scene: a slowly shifting vertical gradient with a
/// sweeping horizontal bar, every pixel a pure function of the last
/// `set_time`. Gives headless exports and tests real, per-frame-distinct
/// content without a project file.
pub struct TestCardRenderer {
    t_ms: u64,
    background: Option<Vec<u8>>,
}

impl TestCardRenderer {
    pub fn new() -> Self {
        Self {
            t_ms: 0,
            background: None,
        }
    }
}

impl Default for TestCardRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneRenderer for TestCardRenderer {
    fn set_time(&mut self, t_ms: u64) {
        self.t_ms = t_ms;
    }

    fn set_background_frame(&mut self, path: &Path) -> io::Result<()> {
        let image = image::open(path)
            .map_err(|err| io::Error::other(format!("decode {}: {err}", path.display())))?;
        self.background = Some(image.to_rgba8().into_raw());
        Ok(())
    }

    fn freeze_background_at(&mut self, _t_ms: u64) {
        // No live background source; nothing to pause.
        self.background = None;
    }

    fn render_into(&mut self, buffer: &mut PixelBuffer) -> io::Result<()> {
        let width = buffer.width() as usize;
        let height = buffer.height() as usize;
        let expected = width * height * 4;

        if let Some(background) = self.background.as_deref() {
            if background.len() != expected {
                return Err(io::Error::other(format!(
                    "background frame size mismatch: got {} bytes, need {expected}",
                    background.len()
                )));
            }
            buffer.data_mut().copy_from_slice(background);
        } else {
            let phase = (self.t_ms / 4 % 256) as u8;
            let data = buffer.data_mut();
            for y in 0..height {
                let shade = ((y * 255) / height.max(1)) as u8;
                let row = &mut data[y * width * 4..(y + 1) * width * 4];
                for px in row.chunks_exact_mut(4) {
                    px[0] = shade.wrapping_add(phase);
                    px[1] = shade;
                    px[2] = 255 - shade;
                    px[3] = 255;
                }
            }
        }

        // Sweeping bar: one full traversal every 2 s, white over everything.
        let bar_x = ((self.t_ms % 2000) as usize * width) / 2000;
        let bar_w = (width / 64).max(2);
        let data = buffer.data_mut();
        for y in 0..height {
            for x in bar_x..(bar_x + bar_w).min(width) {
                let at = (y * width + x) * 4;
                data[at..at + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        Ok(())
    }
}
