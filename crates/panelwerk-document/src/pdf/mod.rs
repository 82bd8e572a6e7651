// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF module — page composition and document export.

pub mod page;
pub mod writer;

pub use page::{Document, Page, PageCompositor};
pub use writer::PdfExporter;
