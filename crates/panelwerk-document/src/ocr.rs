// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OCR text extraction delegate, backed by `ocrs` with models run by `rten`.
//
// Only built with the `ocr` feature. The engine needs two model files,
// `text-detection.rten` and `text-recognition.rten`, looked up in
// `$XDG_CACHE_HOME/ocrs` (or `~/.cache/ocrs`) unless a directory is given.
// Running `ocrs-cli` once downloads them there.

use std::path::{Path, PathBuf};

use image::RgbImage;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use panelwerk_core::error::{PanelwerkError, Result};
use rten::Model;
use tracing::{debug, info, instrument};

use crate::postprocess::TextExtractor;

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// Where the OCR models are cached by default.
pub fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Model file locations.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrModels {
    pub detection: PathBuf,
    pub recognition: PathBuf,
}

impl Default for OcrModels {
    fn default() -> Self {
        Self::in_dir(default_model_dir())
    }
}

impl OcrModels {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection: dir.join(DETECTION_MODEL_FILENAME),
            recognition: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    fn check(&self) -> Result<()> {
        for path in [&self.detection, &self.recognition] {
            if !path.exists() {
                return Err(PanelwerkError::OcrError(format!(
                    "model not found at {}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

fn load_model(path: &Path) -> Result<Model> {
    Model::load_file(path).map_err(|err| {
        PanelwerkError::OcrError(format!("failed to load model {}: {err}", path.display()))
    })
}

/// Lettering extraction for restored pages.
///
/// Model loading is the expensive part; build one extractor and hand it to
/// the post-processor for the whole batch.
pub struct OcrTextExtractor {
    engine: OcrEngine,
}

impl OcrTextExtractor {
    #[instrument(skip_all, fields(detection = %models.detection.display()))]
    pub fn new(models: OcrModels) -> Result<Self> {
        models.check()?;
        let detection_model = load_model(&models.detection)?;
        let recognition_model = load_model(&models.recognition)?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| {
            PanelwerkError::OcrError(format!("failed to initialise OCR engine: {err}"))
        })?;

        info!("OCR engine ready");
        Ok(Self { engine })
    }

    pub fn with_default_models() -> Result<Self> {
        Self::new(OcrModels::default())
    }
}

impl TextExtractor for OcrTextExtractor {
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    fn extract_text(&self, image: &RgbImage) -> Result<String> {
        let source = ImageSource::from_bytes(image.as_raw(), image.dimensions())
            .map_err(|err| PanelwerkError::OcrError(format!("bad OCR input: {err}")))?;
        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| PanelwerkError::OcrError(format!("OCR preprocessing failed: {err}")))?;
        let text = self
            .engine
            .get_text(&input)
            .map_err(|err| PanelwerkError::OcrError(format!("OCR recognition failed: {err}")))?;

        debug!(lines = text.lines().count(), "Text extracted");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_resolve_inside_dir() {
        let models = OcrModels::in_dir("/opt/ocr");
        assert_eq!(models.detection, PathBuf::from("/opt/ocr/text-detection.rten"));
        assert_eq!(models.recognition, PathBuf::from("/opt/ocr/text-recognition.rten"));
    }

    #[test]
    fn missing_models_are_ocr_errors() {
        let result = OcrTextExtractor::new(OcrModels::in_dir("/nonexistent/ocr-models"));
        assert!(matches!(result, Err(PanelwerkError::OcrError(_))));
    }
}
