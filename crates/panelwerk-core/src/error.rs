// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Panelwerk.

use thiserror::Error;

use crate::types::ErrorKind;

/// Top-level error type for all Panelwerk operations.
#[derive(Debug, Error)]
pub enum PanelwerkError {
    // -- Validation errors (rejected before any external call) --
    #[error("invalid restore options: {0}")]
    InvalidOptions(String),

    #[error("source image is empty")]
    EmptyImage,

    #[error("input of {width}x{height} exceeds the {max_pixels} pixel limit")]
    OversizedInput {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    #[error("mask is {mask_width}x{mask_height} but image is {width}x{height}")]
    MaskMismatch {
        width: u32,
        height: u32,
        mask_width: u32,
        mask_height: u32,
    },

    // -- Restoration service errors --
    #[error("restoration service unavailable: {reason}")]
    ServiceTransient {
        reason: String,
        retry_after_ms: Option<u64>,
    },

    #[error("restoration service rejected the request: {0}")]
    ServiceFatal(String),

    #[error("rate limit exhausted after {attempts} attempts: {last_reason}")]
    RateLimitExhausted { attempts: u32, last_reason: String },

    // -- Quality assurance --
    #[error("quality check failed: {0}")]
    QaFailure(String),

    // -- Document errors --
    #[error("image processing failed: {0}")]
    ImageError(String),

    #[error("PDF operation failed: {0}")]
    PdfError(String),

    #[error("OCR failed: {0}")]
    OcrError(String),

    #[error("no accepted pages available for assembly")]
    EmptyDocument,

    // -- Storage / persistence --
    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Configuration --
    #[error("configuration error: {0}")]
    Config(String),
}

impl PanelwerkError {
    /// Position of this error in the pipeline's error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidOptions(_)
            | Self::EmptyImage
            | Self::OversizedInput { .. }
            | Self::MaskMismatch { .. } => ErrorKind::Validation,

            Self::ServiceTransient { .. } | Self::RateLimitExhausted { .. } => {
                ErrorKind::ExternalTransient
            }
            Self::ServiceFatal(_) => ErrorKind::ExternalFatal,

            Self::QaFailure(_) => ErrorKind::Qa,

            Self::ImageError(_)
            | Self::PdfError(_)
            | Self::OcrError(_)
            | Self::Storage(_)
            | Self::Database(_)
            | Self::IntegrityMismatch { .. }
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::Io,

            Self::EmptyDocument => ErrorKind::Assembly,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceTransient { .. })
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PanelwerkError>;
