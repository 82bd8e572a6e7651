// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// QA checker — scores a post-processed restoration against its source scan.
//
// Three independent metrics, all computed on luma at source resolution:
//
// - **Sharpness**: RMS Sobel magnitude of the output divided by that of the
//   source. Below `min_sharpness` is retry-class.
// - **Colour deviation**: share of pixels that were mid-tones in the source
//   (`[midtone_floor, midtone_ceiling]`) and were clipped outside the neutral
//   luma range `[neutral_floor, neutral_ceiling]`. Whitened paper and
//   deepened ink never count. Above `max_color_deviation` is retry-class.
// - **Damage residual**: share of masked (white) pixels whose luma stayed
//   within `repair_tolerance` of the source. Above `max_damage_residual` is
//   fail-class. Always 0 without a mask.
//
// Verdict: Fail when any fail-class issue exists; otherwise Retry when a
// retry-class issue exists and remediation is still available; a retry-class
// issue with no remediation left is a Fail; otherwise Pass.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::gradients::sobel_gradients;
use panelwerk_core::types::{QaIssue, QaReport, QaThresholds, QaVerdict};
use tracing::{debug, instrument, warn};

/// Below this RMS edge energy a source is treated as flat.
const FLAT_EDGE_ENERGY: f64 = 1e-6;

pub struct QaChecker {
    thresholds: QaThresholds,
}

impl QaChecker {
    pub fn new(thresholds: QaThresholds) -> Self {
        Self { thresholds }
    }

    /// Score `output` against `source` and decide the verdict.
    ///
    /// `output` may be larger than `source` (upscaled); it is resampled to
    /// source resolution first. A mask whose size differs from the source is
    /// ignored.
    #[instrument(skip_all, fields(
        source_w = source.width(),
        source_h = source.height(),
        remediation_available = remediation_available,
    ))]
    pub fn evaluate(
        &self,
        source: &RgbImage,
        output: &RgbImage,
        mask: Option<&GrayImage>,
        remediation_available: bool,
    ) -> QaReport {
        let source_luma = imageops::grayscale(source);
        let output_luma = luma_at(output, source.dimensions());

        let mask = mask.filter(|m| {
            let matches = m.dimensions() == source.dimensions();
            if !matches {
                warn!(
                    mask_w = m.width(),
                    mask_h = m.height(),
                    "Mask size differs from source; damage residual not scored"
                );
            }
            matches
        });

        let sharpness_score = sharpness(&source_luma, &output_luma);
        let color_deviation_score = color_deviation(&source_luma, &output_luma, &self.thresholds);
        let damage_residual_score = mask
            .map(|m| {
                damage_residual(&source_luma, &output_luma, m, self.thresholds.repair_tolerance)
            })
            .unwrap_or(0.0);

        let t = &self.thresholds;
        let mut reasons = Vec::new();
        let mut retry_class = false;
        let mut fail_class = false;

        if sharpness_score < t.min_sharpness {
            retry_class = true;
            reasons.push(QaIssue::LowSharpness {
                score: sharpness_score,
                minimum: t.min_sharpness,
            });
        }
        if color_deviation_score > t.max_color_deviation {
            retry_class = true;
            reasons.push(QaIssue::ColorDeviation {
                score: color_deviation_score,
                maximum: t.max_color_deviation,
            });
        }
        if mask.is_some() && damage_residual_score > t.max_damage_residual {
            fail_class = true;
            reasons.push(QaIssue::DamageResidual {
                score: damage_residual_score,
                maximum: t.max_damage_residual,
            });
        }

        let verdict = match (fail_class, retry_class) {
            (true, _) => QaVerdict::Fail,
            (false, true) if remediation_available => QaVerdict::Retry,
            (false, true) => QaVerdict::Fail,
            (false, false) => QaVerdict::Pass,
        };

        debug!(
            sharpness_score,
            color_deviation_score,
            damage_residual_score,
            ?verdict,
            "QA evaluated"
        );

        QaReport {
            sharpness_score,
            color_deviation_score,
            damage_residual_score,
            verdict,
            reasons,
        }
    }
}

/// Luma of `image` at exactly `dims`.
fn luma_at(image: &RgbImage, dims: (u32, u32)) -> GrayImage {
    let luma = imageops::grayscale(image);
    if luma.dimensions() == dims {
        luma
    } else {
        imageops::resize(&luma, dims.0, dims.1, FilterType::Triangle)
    }
}

fn rms_edge_energy(luma: &GrayImage) -> f64 {
    let gradients = sobel_gradients(luma);
    let count = pixel_count(luma);
    if count == 0 {
        return 0.0;
    }
    let sum_sq: f64 = gradients
        .pixels()
        .map(|p| {
            let g = p.0[0] as f64;
            g * g
        })
        .sum();
    (sum_sq / count as f64).sqrt()
}

fn pixel_count(luma: &GrayImage) -> usize {
    luma.width() as usize * luma.height() as usize
}

fn sharpness(source: &GrayImage, output: &GrayImage) -> f64 {
    let reference = rms_edge_energy(source);
    if reference < FLAT_EDGE_ENERGY {
        return 1.0;
    }
    rms_edge_energy(output) / reference
}

fn color_deviation(source: &GrayImage, output: &GrayImage, t: &QaThresholds) -> f64 {
    let total = pixel_count(source);
    if total == 0 {
        return 0.0;
    }
    let midtones = t.midtone_floor..=t.midtone_ceiling;
    let neutral = t.neutral_floor..=t.neutral_ceiling;
    let clipped = source
        .pixels()
        .zip(output.pixels())
        .filter(|(s, o)| midtones.contains(&s.0[0]) && !neutral.contains(&o.0[0]))
        .count();
    clipped as f64 / total as f64
}

fn damage_residual(source: &GrayImage, output: &GrayImage, mask: &GrayImage, tolerance: u8) -> f64 {
    let mut masked = 0usize;
    let mut unrepaired = 0usize;
    for ((m, s), o) in mask.pixels().zip(source.pixels()).zip(output.pixels()) {
        if m.0[0] == 0 {
            continue;
        }
        masked += 1;
        if s.0[0].abs_diff(o.0[0]) <= tolerance {
            unrepaired += 1;
        }
    }
    if masked == 0 {
        0.0
    } else {
        unrepaired as f64 / masked as f64
    }
}
