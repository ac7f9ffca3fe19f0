//! Text recognition for on-screen fields (round counter, map name).

pub mod engine;
pub mod preprocess;
pub mod setup;

pub use setup::ensure_tesseract;

use anyhow::Result;
use image::RgbaImage;
use std::sync::Arc;
use tracing::debug;

use crate::automation::config::RelativeRect;
use engine::recognize_line;
use preprocess::prepare_region;

/// Characters of the `"<current>/<total>"` round counter.
pub const ROUND_WHITELIST: &str = "0123456789/";
/// Characters of a map name as shown on the event screen.
pub const MAP_NAME_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Reads text from a region of the game window.
///
/// Unreliable by nature: may return wrong characters, partial text or
/// `None`. Implementations never fail to the caller.
pub trait TextReader: Send + Sync {
    fn read(&self, region: &RelativeRect, whitelist: &str) -> Option<String>;
}

/// Produces full frames of the game client area.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Result<RgbaImage>;
}

impl<T: FrameSource + ?Sized> FrameSource for Arc<T> {
    fn capture(&self) -> Result<RgbaImage> {
        (**self).capture()
    }
}

/// Captures a frame, prepares the region and runs Tesseract on it.
pub struct TesseractReader<S> {
    source: S,
    threshold: u8,
}

impl<S: FrameSource> TesseractReader<S> {
    pub fn new(source: S, threshold: u8) -> Self {
        Self { source, threshold }
    }

    fn try_read(&self, region: &RelativeRect, whitelist: &str) -> Result<Option<String>> {
        let frame = self.source.capture()?;
        let prepared = prepare_region(&frame, region, self.threshold);
        if prepared.width() == 0 || prepared.height() == 0 {
            return Ok(None);
        }
        recognize_line(&prepared, Some(whitelist))
    }
}

impl<S: FrameSource> TextReader for TesseractReader<S> {
    fn read(&self, region: &RelativeRect, whitelist: &str) -> Option<String> {
        match self.try_read(region, whitelist) {
            Ok(text) => text,
            Err(e) => {
                debug!("OCR failed: {:#}", e);
                None
            }
        }
    }
}
