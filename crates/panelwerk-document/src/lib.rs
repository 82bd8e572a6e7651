// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// panelwerk-document — Everything that touches pixels locally.
//
// Loads and normalises source scans and damage masks, applies the
// deterministic post-restoration transforms (scale normalisation, matte
// compensation, optional face/text delegates), scores results for QA, and
// composes accepted pages into print-ready PDFs.

pub mod pdf;
pub mod postprocess;
pub mod qa;
pub mod raster;
pub mod source;

#[cfg(feature = "ocr")]
pub mod ocr;

pub use pdf::page::{Document, Page, PageCompositor};
pub use pdf::writer::PdfExporter;
pub use postprocess::{PostProcessed, PostProcessor, RegionEnhancer, TextExtractor};
pub use qa::QaChecker;
pub use raster::processor::ImageProcessor;
pub use source::{SourceImage, load_source};

#[cfg(feature = "ocr")]
pub use ocr::OcrTextExtractor;
