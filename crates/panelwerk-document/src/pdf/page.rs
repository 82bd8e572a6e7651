// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page compositor — places accepted restorations on print-sized canvases.

use image::RgbImage;
use panelwerk_core::error::{PanelwerkError, Result};
use panelwerk_core::types::PageGeometry;
use tracing::{debug, instrument};

use crate::raster::processor::{ImageProcessor, PAPER_WHITE};

/// One composed page: a canvas of exactly the geometry's pixel size.
#[derive(Debug, Clone)]
pub struct Page {
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub dpi: u32,
    pub content: RgbImage,
    /// Usually the source file name.
    pub label: String,
}

impl Page {
    /// Physical page size in millimetres.
    pub fn size_mm(&self) -> (f32, f32) {
        let to_mm = |px: u32| px as f32 / self.dpi as f32 * 25.4;
        (to_mm(self.pixel_width), to_mm(self.pixel_height))
    }
}

/// An ordered, non-empty list of pages ready for export.
#[derive(Debug, Clone)]
pub struct Document {
    pub title: String,
    pages: Vec<Page>,
}

impl Document {
    /// Fails with [`PanelwerkError::EmptyDocument`] when `pages` is empty.
    pub fn new(title: impl Into<String>, pages: Vec<Page>) -> Result<Self> {
        if pages.is_empty() {
            return Err(PanelwerkError::EmptyDocument);
        }
        Ok(Self {
            title: title.into(),
            pages,
        })
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Fits images inside the page canvas and pads the remainder with paper white.
/// Images are never stretched or cropped.
#[derive(Debug, Clone, Copy)]
pub struct PageCompositor {
    geometry: PageGeometry,
}

impl PageCompositor {
    pub fn new(geometry: PageGeometry) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn compose(&self, image: &RgbImage, label: impl Into<String>) -> Page {
        let (canvas_w, canvas_h) = self.geometry.pixel_size();
        let content = ImageProcessor::new(image.clone())
            .fit_within(canvas_w, canvas_h)
            .pad_to_canvas(canvas_w, canvas_h, PAPER_WHITE)
            .into_rgb();
        debug!(canvas_w, canvas_h, "Page composed");
        Page {
            pixel_width: canvas_w,
            pixel_height: canvas_h,
            dpi: self.geometry.dpi,
            content,
            label: label.into(),
        }
    }
}
