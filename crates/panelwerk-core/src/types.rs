// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Panelwerk restoration pipeline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PanelwerkError, Result};

/// Unique identifier for a restoration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Restore options
// ---------------------------------------------------------------------------

/// Upscaling factor requested from the restoration service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ScaleFactor {
    X1,
    X2,
    X4,
}

impl ScaleFactor {
    pub fn factor(&self) -> u32 {
        match self {
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X4 => 4,
        }
    }
}

impl TryFrom<u32> for ScaleFactor {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::X1),
            2 => Ok(Self::X2),
            4 => Ok(Self::X4),
            other => Err(format!("scale factor must be 1, 2 or 4 (got {other})")),
        }
    }
}

impl From<ScaleFactor> for u32 {
    fn from(value: ScaleFactor) -> Self {
        value.factor()
    }
}

/// Which trim edges receive bleed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BleedEdges {
    /// Bound-book interior: outer edge horizontally, top and bottom vertically.
    #[default]
    Outside,
    /// Bleed on all four edges.
    All,
}

/// Physical page geometry for print output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageGeometry {
    /// Trim width in inches.
    pub trim_width_in: f64,
    /// Trim height in inches.
    pub trim_height_in: f64,
    /// Bleed margin in inches.
    pub bleed_in: f64,
    /// Output resolution.
    pub dpi: u32,
    pub bleed_edges: BleedEdges,
}

impl Default for PageGeometry {
    /// US comic trim (6.625" x 10.25") with 1/8" bleed at 300 DPI.
    fn default() -> Self {
        Self {
            trim_width_in: 6.625,
            trim_height_in: 10.25,
            bleed_in: 0.125,
            dpi: 300,
            bleed_edges: BleedEdges::Outside,
        }
    }
}

impl PageGeometry {
    /// Page size in inches including bleed.
    pub fn page_size_in(&self) -> (f64, f64) {
        let (extra_w, extra_h) = match self.bleed_edges {
            BleedEdges::Outside => (self.bleed_in, 2.0 * self.bleed_in),
            BleedEdges::All => (2.0 * self.bleed_in, 2.0 * self.bleed_in),
        };
        (self.trim_width_in + extra_w, self.trim_height_in + extra_h)
    }

    /// Page canvas size in pixels, rounded to the nearest whole pixel.
    pub fn pixel_size(&self) -> (u32, u32) {
        let (w_in, h_in) = self.page_size_in();
        let dpi = self.dpi as f64;
        ((w_in * dpi).round() as u32, (h_in * dpi).round() as u32)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.trim_width_in) || !positive(self.trim_height_in) {
            return Err(PanelwerkError::InvalidOptions(format!(
                "trim size must be positive (got {}x{} in)",
                self.trim_width_in, self.trim_height_in
            )));
        }
        if !self.bleed_in.is_finite() || self.bleed_in < 0.0 {
            return Err(PanelwerkError::InvalidOptions(format!(
                "bleed must be zero or positive (got {} in)",
                self.bleed_in
            )));
        }
        if !(72..=1200).contains(&self.dpi) {
            return Err(PanelwerkError::InvalidOptions(format!(
                "dpi must be within 72..=1200 (got {})",
                self.dpi
            )));
        }
        Ok(())
    }
}

/// Per-job restoration settings. Validated once when the job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreOptions {
    pub scale_factor: ScaleFactor,
    /// Matte paper compensation strength, 0 (off) to 10.
    pub matte_compensation: f32,
    /// Ask for face-region enhancement.
    pub face_restore: bool,
    /// Run text extraction on the restored page.
    pub ocr: bool,
    pub geometry: PageGeometry,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            scale_factor: ScaleFactor::X2,
            matte_compensation: 0.0,
            face_restore: false,
            ocr: false,
            geometry: PageGeometry::default(),
        }
    }
}

impl RestoreOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.matte_compensation.is_finite() || !(0.0..=10.0).contains(&self.matte_compensation)
        {
            return Err(PanelwerkError::InvalidOptions(format!(
                "matte compensation must be within 0..=10 (got {})",
                self.matte_compensation
            )));
        }
        self.geometry.validate()
    }
}

/// Parameters sent to the restoration service with each submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorationParams {
    pub scale_factor: ScaleFactor,
    pub matte_compensation: f32,
    pub face_restore: bool,
    pub ocr: bool,
    /// Restoration aggressiveness, 0.0 to 1.0.
    pub strength: f32,
}

impl RestorationParams {
    pub fn from_options(options: &RestoreOptions) -> Self {
        Self {
            scale_factor: options.scale_factor,
            matte_compensation: options.matte_compensation,
            face_restore: options.face_restore,
            ocr: options.ocr,
            strength: 1.0,
        }
    }

    /// Gentler parameters for the single QA remediation pass.
    pub fn remediated(&self, factor: f32) -> Self {
        let factor = factor.clamp(0.0, 1.0);
        Self {
            matte_compensation: self.matte_compensation * factor,
            strength: self.strength * factor,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Restoration retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Submissions allowed before a job fails with `RateLimitExhausted`.
    pub max_restore_attempts: u32,
    /// Base delay between retries (exponential backoff).
    pub base_delay_ms: u64,
    /// Maximum delay between retries.
    pub max_delay_ms: u64,
    /// Multiplier applied to strength and matte compensation on remediation.
    pub remediation_factor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_restore_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            remediation_factor: 0.5,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_restore_attempts == 0 {
            return Err(PanelwerkError::Config(
                "max_restore_attempts must be at least 1".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(PanelwerkError::Config(format!(
                "max_delay_ms ({}) is below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.remediation_factor) {
            return Err(PanelwerkError::Config(format!(
                "remediation_factor must be within 0..=1 (got {})",
                self.remediation_factor
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Quality assurance
// ---------------------------------------------------------------------------

/// Tunable QA thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaThresholds {
    /// Minimum edge-energy ratio (output vs. source).
    pub min_sharpness: f64,
    /// Maximum share of source mid-tones clipped out of the neutral range.
    pub max_color_deviation: f64,
    /// Maximum share of masked pixels left unrepaired.
    pub max_damage_residual: f64,
    /// Lower bound of the neutral luma range.
    pub neutral_floor: u8,
    /// Upper bound of the neutral luma range.
    pub neutral_ceiling: u8,
    /// Source luma band checked for clipping. Paper and ink outside it may
    /// be pushed to white or black freely.
    pub midtone_floor: u8,
    pub midtone_ceiling: u8,
    /// Luma difference below which a masked pixel counts as untouched.
    pub repair_tolerance: u8,
}

impl Default for QaThresholds {
    fn default() -> Self {
        Self {
            min_sharpness: 0.6,
            max_color_deviation: 0.05,
            max_damage_residual: 0.25,
            neutral_floor: 8,
            neutral_ceiling: 247,
            midtone_floor: 64,
            midtone_ceiling: 192,
            repair_tolerance: 6,
        }
    }
}

impl QaThresholds {
    pub fn validate(&self) -> Result<()> {
        let unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !self.min_sharpness.is_finite() || self.min_sharpness < 0.0 {
            return Err(PanelwerkError::Config(format!(
                "min_sharpness must be non-negative (got {})",
                self.min_sharpness
            )));
        }
        if !unit(self.max_color_deviation) || !unit(self.max_damage_residual) {
            return Err(PanelwerkError::Config(
                "max_color_deviation and max_damage_residual must be within 0..=1".into(),
            ));
        }
        if self.neutral_floor >= self.neutral_ceiling {
            return Err(PanelwerkError::Config(format!(
                "neutral range is empty ({}..={})",
                self.neutral_floor, self.neutral_ceiling
            )));
        }
        if self.midtone_floor > self.midtone_ceiling
            || self.midtone_floor < self.neutral_floor
            || self.midtone_ceiling > self.neutral_ceiling
        {
            return Err(PanelwerkError::Config(format!(
                "mid-tone band {}..={} must lie within the neutral range {}..={}",
                self.midtone_floor, self.midtone_ceiling, self.neutral_floor, self.neutral_ceiling
            )));
        }
        Ok(())
    }
}

/// QA decision for one restoration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QaVerdict {
    Pass,
    Retry,
    Fail,
}

/// A single metric that crossed its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QaIssue {
    LowSharpness { score: f64, minimum: f64 },
    ColorDeviation { score: f64, maximum: f64 },
    DamageResidual { score: f64, maximum: f64 },
}

impl std::fmt::Display for QaIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowSharpness { score, minimum } => {
                write!(f, "sharpness {score:.3} below {minimum:.3}")
            }
            Self::ColorDeviation { score, maximum } => {
                write!(f, "color deviation {score:.3} above {maximum:.3}")
            }
            Self::DamageResidual { score, maximum } => {
                write!(f, "damage residual {score:.3} above {maximum:.3}")
            }
        }
    }
}

/// Metrics and verdict for one post-processed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaReport {
    pub sharpness_score: f64,
    pub color_deviation_score: f64,
    /// Zero when no mask was supplied.
    pub damage_residual_score: f64,
    pub verdict: QaVerdict,
    pub reasons: Vec<QaIssue>,
}

impl QaReport {
    /// Reasons joined for log lines and error records.
    pub fn reason_summary(&self) -> String {
        self.reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ---------------------------------------------------------------------------
// Job lifecycle
// ---------------------------------------------------------------------------

/// States of the per-job restoration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Restoring,
    PostProcessing,
    QaEvaluating,
    /// Waiting out a backoff delay or preparing a remediation pass.
    Retrying,
    Accepted,
    Failed,
}

/// Final status of a job inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Completed,
    Failed,
    /// Never admitted because the batch stopped.
    Skipped,
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    Validation,
    RateLimitExhausted,
    ServiceRejected,
    QaRejected,
    Io,
}

impl FailureReason {
    /// Everything except running out of transient retries.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RateLimitExhausted)
    }
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Rate limit, timeout, 5xx. Safe to retry automatically.
    Transient,
    /// Auth failure, malformed request. Retrying cannot help.
    Fatal,
}

/// Error taxonomy used in job records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    ExternalTransient,
    ExternalFatal,
    Qa,
    Io,
    Config,
    Assembly,
}

/// One error observed while running a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Restoration attempt the error belongs to (0 = before the first submission).
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn from_error(attempt: u32, err: &PanelwerkError) -> Self {
        Self {
            attempt,
            kind: err.kind(),
            message: err.to_string(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comic_geometry_pixel_size() {
        let geometry = PageGeometry {
            trim_width_in: 6.625,
            trim_height_in: 10.25,
            bleed_in: 0.125,
            dpi: 300,
            bleed_edges: BleedEdges::Outside,
        };
        assert_eq!(geometry.pixel_size(), (2025, 3150));
    }

    #[test]
    fn full_bleed_adds_both_sides() {
        let geometry = PageGeometry {
            bleed_edges: BleedEdges::All,
            ..PageGeometry::default()
        };
        // (6.625 + 0.25) * 300 = 2062.5 rounds up.
        assert_eq!(geometry.pixel_size(), (2063, 3150));
    }

    #[test]
    fn geometry_without_bleed() {
        let geometry = PageGeometry {
            trim_width_in: 8.5,
            trim_height_in: 11.0,
            bleed_in: 0.0,
            dpi: 150,
            bleed_edges: BleedEdges::All,
        };
        assert_eq!(geometry.pixel_size(), (1275, 1650));
    }

    #[test]
    fn scale_factor_rejects_three() {
        assert!(ScaleFactor::try_from(3).is_err());
        assert_eq!(ScaleFactor::try_from(4), Ok(ScaleFactor::X4));
        let parsed: ScaleFactor = serde_json::from_str("2").expect("parse");
        assert_eq!(parsed, ScaleFactor::X2);
        assert!(serde_json::from_str::<ScaleFactor>("8").is_err());
    }

    #[test]
    fn options_validation() {
        assert!(RestoreOptions::default().validate().is_ok());

        let bad_matte = RestoreOptions {
            matte_compensation: 11.0,
            ..Default::default()
        };
        assert!(matches!(
            bad_matte.validate(),
            Err(PanelwerkError::InvalidOptions(_))
        ));

        let mut bad_dpi = RestoreOptions::default();
        bad_dpi.geometry.dpi = 10;
        assert!(bad_dpi.validate().is_err());

        let mut bad_bleed = RestoreOptions::default();
        bad_bleed.geometry.bleed_in = -0.1;
        assert!(bad_bleed.validate().is_err());
    }

    #[test]
    fn remediation_reduces_aggressiveness() {
        let options = RestoreOptions {
            matte_compensation: 6.0,
            ..Default::default()
        };
        let params = RestorationParams::from_options(&options);
        let gentler = params.remediated(0.5);
        assert_eq!(gentler.strength, 0.5);
        assert_eq!(gentler.matte_compensation, 3.0);
        assert_eq!(gentler.scale_factor, params.scale_factor);
    }

    #[test]
    fn only_rate_limit_is_non_fatal() {
        assert!(!FailureReason::RateLimitExhausted.is_fatal());
        assert!(FailureReason::QaRejected.is_fatal());
        assert!(FailureReason::Validation.is_fatal());
    }

    #[test]
    fn retry_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        let zero = RetryPolicy {
            max_restore_attempts: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn midtone_band_must_sit_inside_neutral_range() {
        assert!(QaThresholds::default().validate().is_ok());
        let outside = QaThresholds {
            midtone_ceiling: 250,
            ..Default::default()
        };
        assert!(matches!(outside.validate(), Err(PanelwerkError::Config(_))));
        let inverted = QaThresholds {
            midtone_floor: 200,
            midtone_ceiling: 100,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn qa_issue_display() {
        let issue = QaIssue::LowSharpness {
            score: 0.25,
            minimum: 0.6,
        };
        assert_eq!(issue.to_string(), "sharpness 0.250 below 0.600");
    }
}
