// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor — exact resampling, aspect-preserving fit, matte
// compensation, and canvas padding on 8-bit RGB buffers.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use panelwerk_core::error::PanelwerkError;
use tracing::{debug, instrument};

/// Paper white, used for padding and alpha flattening.
pub const PAPER_WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Chainable transforms over a single RGB buffer.
///
/// Each method consumes `self` and returns the transformed processor:
///
/// ```ignore
/// let page = ImageProcessor::new(restored)
///     .resize_exact(2048, 3136)
///     .matte_compensate(4.0)
///     .fit_within(2025, 3150)
///     .pad_to_canvas(2025, 3150, PAPER_WHITE)
///     .into_rgb();
/// ```
pub struct ImageProcessor {
    image: RgbImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    // -- Transformations ------------------------------------------------------

    /// Resample to exactly `width` x `height`. No-op when already that size.
    #[instrument(skip(self), fields(from_w = self.image.width(), from_h = self.image.height()))]
    pub fn resize_exact(self, width: u32, height: u32) -> Self {
        if self.image.dimensions() == (width, height) {
            return self;
        }
        debug!(width, height, "Resampling image");
        Self {
            image: imageops::resize(&self.image, width, height, FilterType::Lanczos3),
        }
    }

    /// Scale up or down to the largest size that fits inside
    /// `max_width` x `max_height` without changing the aspect ratio.
    pub fn fit_within(self, max_width: u32, max_height: u32) -> Self {
        let (width, height) = fit_dimensions(self.image.dimensions(), (max_width, max_height));
        self.resize_exact(width, height)
    }

    /// Matte paper compensation at `level` (0..=10).
    ///
    /// Matte stock scans dark and flat, so each channel gets a contrast
    /// stretch of `1 + 0.02 * level` around mid-grey plus a lift of
    /// `3 * level`. Level 0 is the identity.
    #[instrument(skip(self))]
    pub fn matte_compensate(self, level: f32) -> Self {
        let level = level.clamp(0.0, 10.0);
        if level == 0.0 {
            return self;
        }
        let contrast = 1.0 + 0.02 * level;
        let lift = 3.0 * level;

        let mut lut = [0u8; 256];
        for (value, slot) in lut.iter_mut().enumerate() {
            let adjusted = (value as f32 - 128.0) * contrast + 128.0 + lift;
            *slot = adjusted.round().clamp(0.0, 255.0) as u8;
        }

        let mut image = self.image;
        for pixel in image.pixels_mut() {
            let Rgb([r, g, b]) = *pixel;
            *pixel = Rgb([lut[r as usize], lut[g as usize], lut[b as usize]]);
        }
        debug!(contrast, lift, "Matte compensation applied");
        Self { image }
    }

    /// Centre the image on a `width` x `height` canvas filled with `fill`.
    ///
    /// Parts of the image beyond the canvas are clipped; call
    /// [`fit_within`](Self::fit_within) first to avoid that.
    pub fn pad_to_canvas(self, width: u32, height: u32, fill: Rgb<u8>) -> Self {
        if self.image.dimensions() == (width, height) {
            return self;
        }
        let mut canvas = RgbImage::from_pixel(width, height, fill);
        let x = (width as i64 - self.image.width() as i64) / 2;
        let y = (height as i64 - self.image.height() as i64) / 2;
        imageops::overlay(&mut canvas, &self.image, x, y);
        Self { image: canvas }
    }

    // -- Output ---------------------------------------------------------------

    pub fn into_rgb(self) -> RgbImage {
        self.image
    }

    /// Encode the current image as PNG bytes.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, PanelwerkError> {
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        self.image
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|err| PanelwerkError::ImageError(format!("PNG encoding failed: {err}")))?;
        Ok(buffer)
    }
}

/// Convert any decoded image to 8-bit RGB, compositing transparency over
/// paper white.
pub fn flatten_to_rgb(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let image::Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Largest `(w, h)` inside `bounds` with the aspect ratio of `size`.
pub fn fit_dimensions(size: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (w, h) = size;
    let (max_w, max_h) = bounds;
    if w == 0 || h == 0 {
        return (max_w, max_h);
    }
    let scale = (max_w as f64 / w as f64).min(max_h as f64 / h as f64);
    let fit_w = ((w as f64 * scale).round() as u32).clamp(1, max_w.max(1));
    let fit_h = ((h as f64 * scale).round() as u32).clamp(1, max_h.max(1));
    (fit_w, fit_h)
}
