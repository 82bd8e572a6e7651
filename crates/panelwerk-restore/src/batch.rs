// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Batch processor — runs many jobs with bounded concurrency.
//
// Jobs are admitted from a FIFO queue; whenever one finishes the next is
// admitted, so at most `concurrency_limit` run at once. All jobs of a batch
// are driven from a single task, so nothing is spawned and nothing outlives
// `run`. Results land at their job's original index.
//
// Stopping is cooperative: once stopped (by `stop_on_error` or a
// `StopHandle`), no further job is admitted, in-flight jobs finish, and jobs
// never admitted are recorded as `Skipped`. The stop is cleared when `run`
// returns, so the next run on the same processor starts fresh.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use panelwerk_core::config::BatchConfig;
use panelwerk_core::error::{PanelwerkError, Result};
use panelwerk_core::types::JobStatus;
use tracing::{info, instrument, warn};

use crate::client::RestorationClient;
use crate::runner::{Job, JobResult, JobRunner};

/// Cloneable stop signal for a running batch.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop admitting jobs. In-flight jobs still finish.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Progress notification, fired once per finished job.
#[derive(Debug, Clone, Copy)]
pub struct JobEvent<'a> {
    /// Position of the job in the submitted list.
    pub index: usize,
    /// Jobs finished so far, this one included.
    pub finished: usize,
    pub total: usize,
    pub result: &'a JobResult,
}

/// Outcome counts for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn all_completed(&self) -> bool {
        self.completed == self.total
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} failed, {} skipped ({} total)",
            self.completed, self.failed, self.skipped, self.total
        )
    }
}

/// Record of one batch. Built only by [`BatchProcessor::run`].
#[derive(Debug, Clone)]
pub struct BatchRun {
    jobs: Vec<JobResult>,
    concurrency_limit: usize,
    stop_on_error: bool,
    stopped: bool,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl BatchRun {
    /// One result per submitted job, in submission order.
    pub fn jobs(&self) -> &[JobResult] {
        &self.jobs
    }

    pub fn into_jobs(self) -> Vec<JobResult> {
        self.jobs
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn stop_on_error(&self) -> bool {
        self.stop_on_error
    }

    /// Whether admission was stopped before the queue drained.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.jobs.len(),
            ..Default::default()
        };
        for job in &self.jobs {
            match job.status() {
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Drives a list of jobs through a [`JobRunner`].
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    concurrency_limit: usize,
    stop_on_error: bool,
    stop: StopHandle,
}

impl BatchProcessor {
    pub fn new(concurrency_limit: usize, stop_on_error: bool) -> Result<Self> {
        if concurrency_limit == 0 {
            return Err(PanelwerkError::Config(
                "concurrency_limit must be at least 1".into(),
            ));
        }
        Ok(Self {
            concurrency_limit,
            stop_on_error,
            stop: StopHandle::new(),
        })
    }

    pub fn from_config(config: &BatchConfig) -> Result<Self> {
        Self::new(config.concurrency_limit, config.stop_on_error)
    }

    /// Handle that stops admission of further jobs when triggered. A stop
    /// requested between runs applies to the next one.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    #[instrument(skip_all, fields(
        jobs = jobs.len(),
        concurrency = self.concurrency_limit,
        stop_on_error = self.stop_on_error,
    ))]
    pub async fn run<C, F>(
        &self,
        runner: &JobRunner<C>,
        jobs: Vec<Job>,
        mut on_progress: F,
    ) -> BatchRun
    where
        C: RestorationClient,
        F: FnMut(JobEvent<'_>),
    {
        let total = jobs.len();
        let started_at = Utc::now();
        let mut slots: Vec<Option<JobResult>> = (0..total).map(|_| None).collect();
        let mut queue = jobs.iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut stopped = false;
        let mut finished = 0usize;

        info!(total, "Batch started");

        loop {
            while !stopped && in_flight.len() < self.concurrency_limit {
                if self.stop.is_stopped() {
                    info!("Stop requested, no further jobs admitted");
                    stopped = true;
                    break;
                }
                let Some((index, job)) = queue.next() else {
                    break;
                };
                in_flight.push(async move { (index, runner.run(job).await) });
            }

            let Some((index, result)) = in_flight.next().await else {
                break;
            };
            finished += 1;

            if self.stop_on_error && !stopped && result.is_fatal_failure() {
                warn!(job = %result.name(), "Fatal job failure, stopping admission");
                stopped = true;
            }

            on_progress(JobEvent {
                index,
                finished,
                total,
                result: &result,
            });
            slots[index] = Some(result);
        }
        self.stop.clear();

        let results: Vec<JobResult> = jobs
            .iter()
            .zip(slots)
            .map(|(job, slot)| slot.unwrap_or_else(|| JobResult::skipped(job)))
            .collect();

        let run = BatchRun {
            jobs: results,
            concurrency_limit: self.concurrency_limit,
            stop_on_error: self.stop_on_error,
            stopped,
            started_at,
            finished_at: Utc::now(),
        };
        info!(summary = %run.summary(), "Batch finished");
        run
    }
}
