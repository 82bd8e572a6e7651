// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image source adapter — decodes a scan and its optional damage mask into
// normalised in-memory buffers.
//
// Scans arrive in whatever the scanner produced: 16-bit TIFF, greyscale PNG,
// JPEG, PNG with alpha. Everything is converted to 8-bit RGB here so the rest
// of the pipeline only ever sees one pixel format. Masks are reduced to binary
// luma: white (255) marks damage eligible for inpainting, black (0) preserves.

use std::path::Path;

use image::{DynamicImage, GrayImage, ImageError, Luma, RgbImage};
use panelwerk_core::error::{PanelwerkError, Result};
use tracing::{debug, instrument};

use crate::raster::processor::flatten_to_rgb;

/// Luma at or above this value counts as a damaged (white) mask pixel.
const MASK_THRESHOLD: u8 = 128;

/// A decoded scan with its optional damage mask.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub image: RgbImage,
    pub mask: Option<GrayImage>,
}

impl SourceImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Load a scan, and optionally its mask, from disk.
///
/// Dimension checks are left to the restoration boundary; a mask of the
/// wrong size loads fine and is rejected there.
#[instrument(fields(image = %image_path.as_ref().display()), skip_all)]
pub fn load_source(
    image_path: impl AsRef<Path>,
    mask_path: Option<&Path>,
) -> Result<SourceImage> {
    let image = image::open(image_path.as_ref()).map_err(map_image_error)?;
    let mask = match mask_path {
        Some(path) => Some(image::open(path).map_err(map_image_error)?),
        None => None,
    };
    Ok(normalise(&image, mask.as_ref()))
}

/// Decode a scan, and optionally its mask, from encoded bytes.
pub fn decode_source(image_bytes: &[u8], mask_bytes: Option<&[u8]>) -> Result<SourceImage> {
    let image = image::load_from_memory(image_bytes).map_err(map_image_error)?;
    let mask = mask_bytes
        .map(image::load_from_memory)
        .transpose()
        .map_err(map_image_error)?;
    Ok(normalise(&image, mask.as_ref()))
}

fn normalise(image: &DynamicImage, mask: Option<&DynamicImage>) -> SourceImage {
    let image = normalize_image(image);
    let mask = mask.map(normalize_mask);
    debug!(
        width = image.width(),
        height = image.height(),
        has_mask = mask.is_some(),
        "Source normalised"
    );
    SourceImage { image, mask }
}

/// Any colour type or bit depth to 8-bit RGB, alpha flattened over white.
pub fn normalize_image(image: &DynamicImage) -> RgbImage {
    flatten_to_rgb(image)
}

/// Any image to a binary mask (255 = damaged, 0 = preserve).
pub fn normalize_mask(mask: &DynamicImage) -> GrayImage {
    let rgb = flatten_to_rgb(mask);
    let gray = image::imageops::grayscale(&rgb);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let Luma([v]) = *gray.get_pixel(x, y);
        Luma([if v >= MASK_THRESHOLD { 255 } else { 0 }])
    })
}

fn map_image_error(err: ImageError) -> PanelwerkError {
    match err {
        ImageError::IoError(io) => PanelwerkError::Io(io),
        other => PanelwerkError::ImageError(format!("failed to decode image: {other}")),
    }
}
