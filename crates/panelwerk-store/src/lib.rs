// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// panelwerk-store — Staging storage for restored pages and exported PDFs.
//
// Objects are addressed by relative `/`-separated keys and handed out as
// URLs. The local backend keeps blobs on disk and an index with SHA-256
// digests in SQLite; every read is verified against its digest.

pub mod integrity;
pub mod object_store;

pub use integrity::{hash_bytes, verify_hash};
pub use object_store::{LocalObjectStore, ObjectStore, StoredObject};
