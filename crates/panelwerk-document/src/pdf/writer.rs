// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF exporter — serialises composed documents using `printpdf` 0.8.
//
// printpdf 0.8 uses a data-oriented API: each page is a `PdfPage` holding a
// `Vec<Op>`, and the document is serialised via `PdfDocument::save()`. Every
// page image is placed at the page's DPI so it covers the full sheet,
// bleed included.

use std::path::Path;

use panelwerk_core::error::Result;
use printpdf::{
    Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Pt, RawImage, RawImageData,
    RawImageFormat, XObjectTransform,
};
use tracing::{debug, info, instrument, warn};

use super::page::{Document, Page};

/// Writes [`Document`]s as print-ready PDFs.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExporter;

impl PdfExporter {
    pub fn new() -> Self {
        Self
    }

    /// Serialise `document` to PDF bytes, one PDF page per page.
    #[instrument(
        skip(self, document),
        fields(title = %document.title, pages = document.page_count())
    )]
    pub fn export(&self, document: &Document) -> Result<Vec<u8>> {
        let mut doc = PdfDocument::new(&document.title);
        let mut pages: Vec<PdfPage> = Vec::with_capacity(document.page_count());

        for page in document.pages() {
            pages.push(place_page(&mut doc, page));
        }
        doc.with_pages(pages);

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let output = doc.save(&PdfSaveOptions::default(), &mut warnings);
        if !warnings.is_empty() {
            warn!(count = warnings.len(), "PDF serialisation produced warnings");
        }

        info!(bytes = output.len(), "PDF exported");
        Ok(output)
    }

    /// Export and write straight to `path`.
    pub fn write_to_file(&self, document: &Document, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.export(document)?;
        std::fs::write(path.as_ref(), &bytes)?;
        info!("Wrote PDF to {}", path.as_ref().display());
        Ok(())
    }
}

fn place_page(doc: &mut PdfDocument, page: &Page) -> PdfPage {
    let raw = RawImage {
        pixels: RawImageData::U8(page.content.as_raw().clone()),
        width: page.pixel_width as usize,
        height: page.pixel_height as usize,
        data_format: RawImageFormat::RGB8,
        tag: Vec::new(),
    };
    let xobject_id = doc.add_image(&raw);

    let (w_mm, h_mm) = page.size_mm();
    let ops = vec![Op::UseXobject {
        id: xobject_id,
        transform: XObjectTransform {
            translate_x: Some(Pt(0.0)),
            translate_y: Some(Pt(0.0)),
            scale_x: Some(1.0),
            scale_y: Some(1.0),
            dpi: Some(page.dpi as f32),
            rotate: None,
        },
    }];

    debug!(label = %page.label, w_mm, h_mm, "Page placed");
    PdfPage::new(Mm(w_mm), Mm(h_mm), ops)
}
