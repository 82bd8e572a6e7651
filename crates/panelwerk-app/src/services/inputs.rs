// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Input discovery for batch runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use panelwerk_core::error::{PanelwerkError, Result};
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "webp", "bmp"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Image files directly inside `dir`, sorted by file name.
pub fn collect_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PanelwerkError::Config(format!(
            "input directory not found: {}",
            dir.display()
        )));
    }
    let mut inputs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            inputs.push(path);
        } else {
            debug!(path = %path.display(), "skipping non-image entry");
        }
    }
    inputs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(inputs)
}

/// Mask in `mask_dir` with the same file name as `input`, if there is one.
pub fn mask_for(mask_dir: Option<&Path>, input: &Path) -> Option<PathBuf> {
    let candidate = mask_dir?.join(input.file_name()?);
    candidate.is_file().then_some(candidate)
}

/// Display name for a job: the input's file stem.
pub fn job_name(input: &Path) -> String {
    input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_owned())
}

fn file_name(input: &Path) -> String {
    input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| job_name(input))
}

/// Job names for a batch, unique within it. Inputs whose stems collide
/// (`page-01.png`, `page-01.jpg`) keep their full file name instead, so the
/// PDFs, sidecars and stored pages named after them never overwrite each other.
pub fn job_names(inputs: &[PathBuf]) -> Vec<String> {
    let mut names: Vec<String> = inputs.iter().map(|input| job_name(input)).collect();
    loop {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for name in &names {
            *counts.entry(name.as_str()).or_default() += 1;
        }
        let clashing: Vec<usize> = names
            .iter()
            .enumerate()
            .filter(|(i, name)| counts[name.as_str()] > 1 && **name != file_name(&inputs[*i]))
            .map(|(i, _)| i)
            .collect();
        if clashing.is_empty() {
            return names;
        }
        for i in clashing {
            names[i] = file_name(&inputs[i]);
        }
    }
}
