// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Result assembly — accepted restorations to print documents.

use panelwerk_core::error::{PanelwerkError, Result};
use panelwerk_core::types::PageGeometry;
use panelwerk_document::{Document, Page, PageCompositor};
use tracing::{info, instrument};

use crate::runner::JobResult;

/// Compose every completed result, in submission order, onto pages of
/// `geometry`.
///
/// With `combine` the pages form one document titled `title`; otherwise each
/// page becomes its own single-page document named after its job. Fails with
/// [`PanelwerkError::EmptyDocument`] when no result completed.
#[instrument(skip(results, geometry), fields(results = results.len()))]
pub fn assemble(
    results: &[JobResult],
    geometry: &PageGeometry,
    combine: bool,
    title: &str,
) -> Result<Vec<Document>> {
    let compositor = PageCompositor::new(*geometry);
    let pages: Vec<Page> = results
        .iter()
        .filter_map(|result| {
            result
                .final_buffer()
                .map(|buffer| compositor.compose(buffer, result.name()))
        })
        .collect();

    if pages.is_empty() {
        return Err(PanelwerkError::EmptyDocument);
    }
    info!(pages = pages.len(), combine, "Assembling documents");

    if combine {
        return Ok(vec![Document::new(title, pages)?]);
    }
    pages
        .into_iter()
        .map(|page| {
            let name = page.label.clone();
            Document::new(name, vec![page])
        })
        .collect()
}
