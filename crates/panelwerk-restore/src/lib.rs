// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// panelwerk-restore — Orchestration of restoration jobs.
//
// The restoration service is reached through the `RestorationClient` trait.
// `JobRunner` drives one job through restore, post-process, and QA with a
// bounded retry/backoff state machine; `BatchProcessor` runs many jobs with
// bounded concurrency; `assemble` turns accepted results into documents.

pub mod assemble;
pub mod batch;
pub mod client;
pub mod retry;
pub mod runner;

pub use assemble::assemble;
pub use batch::{BatchProcessor, BatchRun, BatchSummary, JobEvent, StopHandle};
pub use client::{
    HostedRestorationClient, RestorationClient, RestorationOutcome, RestorationRequest,
};
pub use runner::{Job, JobResult, JobRunner};
