// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry engine with exponential backoff + jitter for restoration submissions.
//
// Transient outcomes (rate limit, timeout, 5xx) are retried until the attempt
// budget is spent; fatal outcomes give up immediately.

use std::time::Duration;

use panelwerk_core::types::{ErrorClass, RetryPolicy};
use tracing::{debug, info, warn};

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Submit again after this delay.
    RetryAfter(Duration),
    /// Do not retry; the failure is permanent.
    GiveUp(ErrorClass),
    /// The attempt budget is spent.
    Exhausted,
}

/// Decide what follows a failed submission.
///
/// `attempts` is the number of submissions made so far (including the one
/// that just failed) and `budget` the most this job may make.
pub fn should_retry(
    class: ErrorClass,
    attempts: u32,
    budget: u32,
    retry_after_ms: Option<u64>,
    policy: &RetryPolicy,
) -> RetryDecision {
    match class {
        ErrorClass::Fatal => {
            info!("fatal outcome, not retrying");
            RetryDecision::GiveUp(ErrorClass::Fatal)
        }
        ErrorClass::Transient => {
            if attempts >= budget {
                warn!(attempts, budget, "restore attempts exhausted");
                RetryDecision::Exhausted
            } else {
                let delay = compute_delay(attempts.saturating_sub(1), policy, retry_after_ms);
                debug!(attempts, delay_ms = delay.as_millis() as u64, "scheduling retry");
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// Backoff before retry number `retry` (0-based).
///
/// delay = min(max(base * 2^retry + jitter, retry_after), max_delay)
/// jitter lies in [0, base).
pub fn compute_delay(retry: u32, policy: &RetryPolicy, retry_after_ms: Option<u64>) -> Duration {
    let base_ms = policy.base_delay_ms;
    let exp_ms = base_ms.saturating_mul(1u64 << retry.min(16));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, retry));
    let hinted_ms = total_ms.max(retry_after_ms.unwrap_or(0));
    Duration::from_millis(hinted_ms.min(policy.max_delay_ms))
}

/// Deterministic spread over [0, base): multiply by a large odd constant and
/// reduce. Keeps retries from lining up without pulling in an RNG.
fn jitter(base_ms: u64, retry: u32) -> u64 {
    let hash = (u64::from(retry) + 1).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}
