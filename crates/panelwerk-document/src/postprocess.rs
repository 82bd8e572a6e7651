// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Post-processor — deterministic local transforms applied to every successful
// restoration before QA.
//
// Order: scale normalisation to `source x scale`, matte compensation, optional
// face-region enhancement, optional text extraction. Delegates are pluggable;
// a failing delegate is logged and skipped, it never fails the job.

use image::RgbImage;
use panelwerk_core::error::Result;
use panelwerk_core::types::RestorationParams;
use tracing::{debug, instrument, warn};

use crate::raster::processor::ImageProcessor;

/// Enhances a region class (faces, lettering) of a restored page.
pub trait RegionEnhancer {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    fn enhance(&self, image: RgbImage) -> Result<RgbImage>;
}

/// Extracts text from a restored page.
pub trait TextExtractor {
    fn extract_text(&self, image: &RgbImage) -> Result<String>;
}

/// Output of one post-processing pass.
#[derive(Debug, Clone)]
pub struct PostProcessed {
    pub image: RgbImage,
    /// Present when OCR was requested and the extractor succeeded.
    pub text: Option<String>,
}

/// Applies the post-restoration transform chain.
#[derive(Default)]
pub struct PostProcessor {
    face_enhancer: Option<Box<dyn RegionEnhancer>>,
    text_extractor: Option<Box<dyn TextExtractor>>,
}

impl PostProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_face_enhancer(mut self, enhancer: impl RegionEnhancer + 'static) -> Self {
        self.face_enhancer = Some(Box::new(enhancer));
        self
    }

    pub fn with_text_extractor(mut self, extractor: impl TextExtractor + 'static) -> Self {
        self.text_extractor = Some(Box::new(extractor));
        self
    }

    /// Run the chain on a restored buffer.
    ///
    /// `source_dims` are the dimensions of the original scan; the result is
    /// always exactly `source_dims x scale_factor` regardless of what the
    /// service returned.
    #[instrument(skip(self, restored, params), fields(
        width = restored.width(),
        height = restored.height(),
        scale = params.scale_factor.factor(),
        matte = params.matte_compensation,
    ))]
    pub fn process(
        &self,
        restored: RgbImage,
        source_dims: (u32, u32),
        params: &RestorationParams,
    ) -> PostProcessed {
        let factor = params.scale_factor.factor();
        let target = (source_dims.0 * factor, source_dims.1 * factor);

        let mut image = ImageProcessor::new(restored)
            .resize_exact(target.0, target.1)
            .matte_compensate(params.matte_compensation)
            .into_rgb();

        if params.face_restore {
            image = self.enhance_faces(image);
        }

        let text = if params.ocr { self.extract_text(&image) } else { None };

        debug!(
            width = image.width(),
            height = image.height(),
            has_text = text.is_some(),
            "Post-processing complete"
        );
        PostProcessed { image, text }
    }

    fn enhance_faces(&self, image: RgbImage) -> RgbImage {
        let Some(enhancer) = &self.face_enhancer else {
            debug!("Face restore requested but no enhancer configured");
            return image;
        };
        // The enhancer consumes its input, so keep a copy to fall back on.
        match enhancer.enhance(image.clone()) {
            Ok(enhanced) if enhanced.dimensions() == image.dimensions() => enhanced,
            Ok(enhanced) => {
                warn!(
                    enhancer = enhancer.name(),
                    got_w = enhanced.width(),
                    got_h = enhanced.height(),
                    "Enhancer changed page dimensions; discarding its output"
                );
                image
            }
            Err(err) => {
                warn!(enhancer = enhancer.name(), error = %err, "Face enhancement failed");
                image
            }
        }
    }

    fn extract_text(&self, image: &RgbImage) -> Option<String> {
        let extractor = self.text_extractor.as_ref()?;
        match extractor.extract_text(image) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(error = %err, "Text extraction failed");
                None
            }
        }
    }
}
