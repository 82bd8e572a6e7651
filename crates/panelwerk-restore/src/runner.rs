// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job runner — drives one page through restore → post-process → QA.
//
// State machine:
//
//   Pending → Restoring → PostProcessing → QaEvaluating → Accepted
//                ↑   │                          │
//                │   └─ transient → Retrying ───┤ (backoff, then Restoring)
//                │                              │
//                └──────── QA retry → Retrying ─┘ (once, gentler params)
//
// Anything else ends in Failed. Every submission counts as an attempt; the
// budget is `max_restore_attempts`, plus one submission for the single QA
// remediation pass, so a job never makes more than `max_restore_attempts + 1`.

use image::{GrayImage, RgbImage};
use panelwerk_core::config::ServiceConfig;
use panelwerk_core::error::{PanelwerkError, Result};
use panelwerk_core::types::{
    ErrorClass, ErrorRecord, FailureReason, JobId, JobState, JobStatus, QaReport, QaVerdict,
    RestorationParams, RestoreOptions, RetryPolicy,
};
use panelwerk_document::{PostProcessor, QaChecker, SourceImage};
use tracing::{debug, info, instrument, warn};

use crate::client::{RestorationClient, RestorationRequest, preflight};
use crate::retry::{RetryDecision, should_retry};

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One input page and its settings. Immutable once created.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    name: String,
    image: RgbImage,
    mask: Option<GrayImage>,
    options: RestoreOptions,
}

impl Job {
    /// Create a job, validating `options` up front.
    pub fn new(
        name: impl Into<String>,
        source: SourceImage,
        options: RestoreOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            id: JobId::new(),
            name: name.into(),
            image: source.image,
            mask: source.mask,
            options,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn mask(&self) -> Option<&GrayImage> {
        self.mask.as_ref()
    }

    pub fn options(&self) -> &RestoreOptions {
        &self.options
    }
}

// ---------------------------------------------------------------------------
// JobResult
// ---------------------------------------------------------------------------

/// Terminal record of one job. `final_buffer` is present exactly when the
/// status is `Completed`, and then the QA verdict is `Pass`.
#[derive(Debug, Clone)]
pub struct JobResult {
    job_id: JobId,
    name: String,
    status: JobStatus,
    failure: Option<FailureReason>,
    final_buffer: Option<RgbImage>,
    text: Option<String>,
    qa_report: Option<QaReport>,
    attempts: u32,
    errors: Vec<ErrorRecord>,
}

impl JobResult {
    fn completed(
        job: &Job,
        buffer: RgbImage,
        text: Option<String>,
        report: QaReport,
        attempts: u32,
        errors: Vec<ErrorRecord>,
    ) -> Self {
        Self {
            job_id: job.id,
            name: job.name.clone(),
            status: JobStatus::Completed,
            failure: None,
            final_buffer: Some(buffer),
            text,
            qa_report: Some(report),
            attempts,
            errors,
        }
    }

    fn failed(
        job: &Job,
        reason: FailureReason,
        report: Option<QaReport>,
        attempts: u32,
        errors: Vec<ErrorRecord>,
    ) -> Self {
        Self {
            job_id: job.id,
            name: job.name.clone(),
            status: JobStatus::Failed,
            failure: Some(reason),
            final_buffer: None,
            text: None,
            qa_report: report,
            attempts,
            errors,
        }
    }

    pub(crate) fn skipped(job: &Job) -> Self {
        Self {
            job_id: job.id,
            name: job.name.clone(),
            status: JobStatus::Skipped,
            failure: None,
            final_buffer: None,
            text: None,
            qa_report: None,
            attempts: 0,
            errors: Vec::new(),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn failure(&self) -> Option<FailureReason> {
        self.failure
    }

    /// Failed for any reason other than running out of transient retries.
    pub fn is_fatal_failure(&self) -> bool {
        self.failure.is_some_and(|reason| reason.is_fatal())
    }

    pub fn final_buffer(&self) -> Option<&RgbImage> {
        self.final_buffer.as_ref()
    }

    /// Extracted lettering, when OCR ran and succeeded.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn qa_report(&self) -> Option<&QaReport> {
        self.qa_report.as_ref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// One-line outcome for batch reports.
    pub fn outcome_line(&self) -> String {
        match self.status {
            JobStatus::Completed => {
                format!("{}: completed after {} attempt(s)", self.name, self.attempts)
            }
            JobStatus::Skipped => format!("{}: skipped", self.name),
            JobStatus::Failed => {
                let last = self
                    .errors
                    .last()
                    .map(|e| e.message.as_str())
                    .unwrap_or("no detail");
                format!(
                    "{}: failed ({:?}) after {} attempt(s): {}",
                    self.name,
                    self.failure.unwrap_or(FailureReason::Io),
                    self.attempts,
                    last
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// JobRunner
// ---------------------------------------------------------------------------

/// Runs jobs against a restoration client. One runner serves a whole batch.
pub struct JobRunner<C> {
    client: C,
    post: PostProcessor,
    qa: QaChecker,
    policy: RetryPolicy,
    max_pixel_area: u64,
}

impl<C: RestorationClient> JobRunner<C> {
    pub fn new(client: C, post: PostProcessor, qa: QaChecker, policy: RetryPolicy) -> Self {
        Self {
            client,
            post,
            qa,
            policy,
            max_pixel_area: ServiceConfig::default().max_pixel_area,
        }
    }

    pub fn with_max_pixel_area(mut self, max_pixel_area: u64) -> Self {
        self.max_pixel_area = max_pixel_area;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `job` to a terminal state. Never panics and never returns early
    /// with an error: every failure is captured in the result.
    #[instrument(skip_all, fields(job = %job.id(), name = %job.name()))]
    pub async fn run(&self, job: &Job) -> JobResult {
        let mut state = JobState::Pending;
        let mut errors = Vec::new();
        let mut attempts: u32 = 0;
        let mut budget = self.policy.max_restore_attempts;
        let mut params = RestorationParams::from_options(job.options());
        let mut remediated = false;
        let mut last_report: Option<QaReport> = None;

        if let Err(err) = preflight(job.image(), job.mask(), self.max_pixel_area) {
            warn!(error = %err, "Job rejected before submission");
            errors.push(ErrorRecord::from_error(0, &err));
            advance(&mut state, JobState::Failed);
            return JobResult::failed(job, FailureReason::Validation, None, 0, errors);
        }

        loop {
            advance(&mut state, JobState::Restoring);
            attempts += 1;
            let request = RestorationRequest {
                image: job.image(),
                mask: job.mask(),
                params: &params,
            };

            let buffer = match self.client.submit(&request).await.into_result() {
                Ok(buffer) => buffer,
                Err(err) => {
                    errors.push(ErrorRecord::from_error(attempts, &err));
                    let class = if err.is_transient() {
                        ErrorClass::Transient
                    } else {
                        ErrorClass::Fatal
                    };
                    let retry_after_ms = match &err {
                        PanelwerkError::ServiceTransient { retry_after_ms, .. } => *retry_after_ms,
                        _ => None,
                    };

                    match should_retry(class, attempts, budget, retry_after_ms, &self.policy) {
                        RetryDecision::RetryAfter(delay) => {
                            advance(&mut state, JobState::Retrying);
                            info!(
                                attempt = attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "Transient failure, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        RetryDecision::Exhausted => {
                            let last_reason = match err {
                                PanelwerkError::ServiceTransient { reason, .. } => reason,
                                other => other.to_string(),
                            };
                            let err = PanelwerkError::RateLimitExhausted {
                                attempts,
                                last_reason,
                            };
                            warn!(error = %err, "Job failed");
                            errors.push(ErrorRecord::from_error(attempts, &err));
                            advance(&mut state, JobState::Failed);
                            return JobResult::failed(
                                job,
                                FailureReason::RateLimitExhausted,
                                last_report,
                                attempts,
                                errors,
                            );
                        }
                        RetryDecision::GiveUp(_) => {
                            warn!(attempt = attempts, error = %err, "Job failed");
                            advance(&mut state, JobState::Failed);
                            return JobResult::failed(
                                job,
                                FailureReason::ServiceRejected,
                                last_report,
                                attempts,
                                errors,
                            );
                        }
                    }
                }
            };

            advance(&mut state, JobState::PostProcessing);
            let processed = self.post.process(buffer, job.image().dimensions(), &params);

            advance(&mut state, JobState::QaEvaluating);
            let report = self
                .qa
                .evaluate(job.image(), &processed.image, job.mask(), !remediated);

            match report.verdict {
                QaVerdict::Pass => {
                    advance(&mut state, JobState::Accepted);
                    info!(attempts, sharpness = report.sharpness_score, "Job accepted");
                    return JobResult::completed(
                        job,
                        processed.image,
                        processed.text,
                        report,
                        attempts,
                        errors,
                    );
                }
                QaVerdict::Retry => {
                    let err = PanelwerkError::QaFailure(report.reason_summary());
                    info!(
                        attempt = attempts,
                        reasons = %report.reason_summary(),
                        "QA requested remediation"
                    );
                    errors.push(ErrorRecord::from_error(attempts, &err));
                    remediated = true;
                    budget = self.policy.max_restore_attempts.saturating_add(1);
                    params = params.remediated(self.policy.remediation_factor);
                    last_report = Some(report);
                    advance(&mut state, JobState::Retrying);
                }
                QaVerdict::Fail => {
                    let err = PanelwerkError::QaFailure(report.reason_summary());
                    warn!(attempt = attempts, error = %err, "Job failed");
                    errors.push(ErrorRecord::from_error(attempts, &err));
                    advance(&mut state, JobState::Failed);
                    return JobResult::failed(
                        job,
                        FailureReason::QaRejected,
                        Some(report),
                        attempts,
                        errors,
                    );
                }
            }
        }
    }
}

fn advance(state: &mut JobState, next: JobState) {
    debug!(from = ?*state, to = ?next, "state transition");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RestorationOutcome;
    use image::{Luma, Rgb};
    use panelwerk_core::types::{ErrorKind, QaThresholds, ScaleFactor};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Transient,
        Fatal,
        /// Return the inverted page: every pixel clearly repaired.
        Restore,
        /// Return a black page: no edges, crushed tones.
        Ruin,
    }

    /// Replays a script of outcomes, then keeps restoring.
    struct Scripted {
        script: Mutex<Vec<Step>>,
        strengths: Mutex<Vec<f32>>,
    }

    impl Scripted {
        fn new(steps: &[Step]) -> Self {
            Self {
                script: Mutex::new(steps.to_vec()),
                strengths: Mutex::new(Vec::new()),
            }
        }

        fn strengths(&self) -> Vec<f32> {
            self.strengths.lock().expect("lock").clone()
        }
    }

    impl RestorationClient for Scripted {
        async fn submit(&self, request: &RestorationRequest<'_>) -> RestorationOutcome {
            self.strengths
                .lock()
                .expect("lock")
                .push(request.params.strength);
            let step = {
                let mut script = self.script.lock().expect("lock");
                if script.is_empty() {
                    Step::Restore
                } else {
                    script.remove(0)
                }
            };
            match step {
                Step::Transient => RestorationOutcome::transient("HTTP 429"),
                Step::Fatal => RestorationOutcome::fatal("HTTP 401"),
                Step::Restore => {
                    let mut buffer = request.image.clone();
                    image::imageops::invert(&mut buffer);
                    RestorationOutcome::Success { buffer }
                }
                Step::Ruin => {
                    let (w, h) = request.image.dimensions();
                    RestorationOutcome::Success {
                        buffer: RgbImage::new(w, h),
                    }
                }
            }
        }
    }

    fn page() -> RgbImage {
        RgbImage::from_fn(32, 32, |x, y| {
            if ((x / 4) + (y / 4)) % 2 == 0 {
                Rgb([40, 40, 40])
            } else {
                Rgb([220, 220, 220])
            }
        })
    }

    fn job(mask: Option<GrayImage>) -> Job {
        let options = RestoreOptions {
            scale_factor: ScaleFactor::X1,
            ..Default::default()
        };
        Job::new("page-01.png", SourceImage { image: page(), mask }, options).expect("valid job")
    }

    fn runner(steps: &[Step]) -> JobRunner<Scripted> {
        let policy = RetryPolicy {
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        };
        JobRunner::new(
            Scripted::new(steps),
            PostProcessor::new(),
            QaChecker::new(QaThresholds::default()),
            policy,
        )
    }

    #[tokio::test]
    async fn transient_twice_then_success_completes() {
        let runner = runner(&[Step::Transient, Step::Transient, Step::Restore]);
        let mask = GrayImage::from_pixel(32, 32, Luma([255]));
        let result = runner.run(&job(Some(mask))).await;

        assert_eq!(result.status(), JobStatus::Completed);
        assert_eq!(result.attempts(), 3);
        assert_eq!(
            result.qa_report().map(|r| r.verdict),
            Some(QaVerdict::Pass)
        );
        assert_eq!(result.final_buffer().map(|b| b.dimensions()), Some((32, 32)));
        assert_eq!(result.errors().len(), 2);
        assert!(
            result
                .errors()
                .iter()
                .all(|e| e.kind == ErrorKind::ExternalTransient)
        );
    }

    #[tokio::test]
    async fn fatal_outcome_is_not_retried() {
        let runner = runner(&[Step::Fatal, Step::Restore]);
        let result = runner.run(&job(None)).await;

        assert_eq!(result.status(), JobStatus::Failed);
        assert_eq!(result.failure(), Some(FailureReason::ServiceRejected));
        assert!(result.is_fatal_failure());
        assert_eq!(result.attempts(), 1);
        assert!(result.final_buffer().is_none());
        assert!(result.qa_report().is_none());
    }

    #[tokio::test]
    async fn fatal_after_transient_gives_up_at_once() {
        let runner = runner(&[Step::Transient, Step::Fatal, Step::Restore]);
        let result = runner.run(&job(None)).await;

        assert_eq!(result.failure(), Some(FailureReason::ServiceRejected));
        assert_eq!(result.attempts(), 2);
        let kinds: Vec<ErrorKind> = result.errors().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [ErrorKind::ExternalTransient, ErrorKind::ExternalFatal]);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_budget() {
        let runner = runner(&[Step::Transient; 5]);
        let result = runner.run(&job(None)).await;

        assert_eq!(result.failure(), Some(FailureReason::RateLimitExhausted));
        assert!(!result.is_fatal_failure());
        assert_eq!(result.attempts(), 3);
        assert_eq!(runner.client().strengths().len(), 3);
    }

    #[tokio::test]
    async fn remediation_uses_gentler_params_once() {
        let runner = runner(&[Step::Ruin, Step::Restore]);
        let result = runner.run(&job(None)).await;

        assert_eq!(result.status(), JobStatus::Completed);
        assert_eq!(result.attempts(), 2);
        assert_eq!(runner.client().strengths(), vec![1.0, 0.5]);
        assert_eq!(result.errors()[0].kind, ErrorKind::Qa);
    }

    #[tokio::test]
    async fn second_qa_retry_becomes_failure() {
        let runner = runner(&[Step::Ruin, Step::Ruin, Step::Restore]);
        let result = runner.run(&job(None)).await;

        assert_eq!(result.status(), JobStatus::Failed);
        assert_eq!(result.failure(), Some(FailureReason::QaRejected));
        assert_eq!(result.attempts(), 2);
        let report = result.qa_report().expect("report kept");
        assert_eq!(report.verdict, QaVerdict::Fail);
        assert!(!report.reasons.is_empty());
    }

    #[tokio::test]
    async fn remediation_grants_exactly_one_extra_attempt() {
        let runner = runner(&[
            Step::Transient,
            Step::Transient,
            Step::Ruin,
            Step::Transient,
            Step::Transient,
        ]);
        let result = runner.run(&job(None)).await;

        assert_eq!(result.failure(), Some(FailureReason::RateLimitExhausted));
        assert_eq!(result.attempts(), runner.policy().max_restore_attempts + 1);
    }

    #[tokio::test]
    async fn mismatched_mask_fails_without_submission() {
        let runner = runner(&[]);
        let mask = GrayImage::new(16, 16);
        let result = runner.run(&job(Some(mask))).await;

        assert_eq!(result.failure(), Some(FailureReason::Validation));
        assert_eq!(result.attempts(), 0);
        assert!(runner.client().strengths().is_empty());
        assert_eq!(result.errors()[0].kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn oversized_input_fails_without_submission() {
        let runner = runner(&[]).with_max_pixel_area(100);
        let result = runner.run(&job(None)).await;

        assert_eq!(result.failure(), Some(FailureReason::Validation));
        assert!(runner.client().strengths().is_empty());
    }

    #[test]
    fn invalid_options_rejected_at_creation() {
        let options = RestoreOptions {
            matte_compensation: 42.0,
            ..Default::default()
        };
        let source = SourceImage {
            image: page(),
            mask: None,
        };
        assert!(matches!(
            Job::new("bad", source, options),
            Err(PanelwerkError::InvalidOptions(_))
        ));
    }
}
