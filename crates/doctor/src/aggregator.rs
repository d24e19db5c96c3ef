//! Concurrent check execution.
//!
//! Every enabled check runs as its own task, bounded by a semaphore. A check
//! that errors, panics or is cancelled costs only its own category; the rest
//! of the snapshot is still assembled.
//!
//! The overall timeout is a deadline checks can see: probes stop waiting at
//! it and report degraded results. Checks still running a grace period
//! later are cancelled.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::checks::{Check, CheckContext, CheckOutcome};
use crate::error::CheckError;
use crate::model::{CheckFailure, ClusterHealthStatus, FailureScope, HealthRun};

/// Time past the deadline for probe cleanup and in-flight results.
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// What one task hands back.
enum TaskResult {
    Done(Result<CheckOutcome, CheckError>),
    Panicked(String),
}

/// Run `checks` against the cluster and assemble one snapshot.
///
/// Checks run until the overall timeout from the config, plus a short
/// grace period. Cancelling `ctx.cancel` stops outstanding checks at once.
/// Probe cleanups are awaited before returning.
pub async fn run_checks(ctx: &CheckContext, checks: Vec<Arc<dyn Check>>) -> HealthRun {
    let config = Arc::clone(&ctx.config);
    let deadline = Instant::now() + config.timeout;
    let run_ctx = ctx
        .clone()
        .with_cancel(ctx.cancel.child_token())
        .with_deadline(deadline);
    let semaphore = Arc::new(Semaphore::new(
        config.settings.max_concurrent_checks.max(1),
    ));

    let mut skipped = Vec::new();
    let mut pending = BTreeSet::new();
    let mut set = JoinSet::new();

    for check in checks {
        let category = check.category();
        if !config.is_enabled(category) {
            debug!(category = %category, "Check excluded");
            skipped.push(category);
            continue;
        }
        pending.insert(category);

        let task_ctx = run_ctx.clone();
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let work = async {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| CheckError::Cancelled)?;
                debug!(category = %category, "Check started");
                check.run(&task_ctx).await
            };
            let guarded = async {
                tokio::select! {
                    biased;
                    () = task_ctx.cancel.cancelled() => Err(CheckError::Cancelled),
                    outcome = work => outcome,
                }
            };
            let result = match AssertUnwindSafe(guarded).catch_unwind().await {
                Ok(result) => TaskResult::Done(result),
                Err(payload) => TaskResult::Panicked(panic_message(payload.as_ref())),
            };
            (category, result)
        });
    }

    let mut status = ClusterHealthStatus::default();
    let mut failures = Vec::new();
    let mut evaluated = Vec::new();

    let hard_stop = tokio::time::sleep_until(deadline + CANCEL_GRACE);
    tokio::pin!(hard_stop);
    let mut timed_out = false;

    loop {
        tokio::select! {
            joined = set.join_next() => {
                let Some(joined) = joined else { break };
                let (category, result) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        // Tasks are never aborted; whichever category this was
                        // is picked up from `pending` below.
                        warn!(error = %e, "Check task ended abnormally");
                        continue;
                    }
                };
                pending.remove(&category);

                match result {
                    TaskResult::Done(Ok(outcome)) => {
                        info!(category = %category, degraded = outcome.degraded.len(), "Check completed");
                        failures.extend(outcome.degraded.iter().map(|e| CheckFailure {
                            category,
                            scope: FailureScope::Probe,
                            cause: e.to_string(),
                        }));
                        outcome.contribution.merge_into(&mut status);
                        evaluated.push(category);
                    }
                    TaskResult::Done(Err(e)) => {
                        warn!(category = %category, error = %e, "Check failed");
                        failures.push(CheckFailure {
                            category,
                            scope: FailureScope::Check,
                            cause: e.to_string(),
                        });
                    }
                    TaskResult::Panicked(message) => {
                        warn!(category = %category, panic = %message, "Check panicked");
                        failures.push(CheckFailure {
                            category,
                            scope: FailureScope::Check,
                            cause: format!("check panicked: {message}"),
                        });
                    }
                }
            }
            () = &mut hard_stop, if !timed_out => {
                warn!(timeout_secs = config.timeout.as_secs(), "Health run timed out, cancelling outstanding checks");
                timed_out = true;
                run_ctx.cancel.cancel();
            }
        }
    }

    for category in pending {
        failures.push(CheckFailure {
            category,
            scope: FailureScope::Check,
            cause: "check task did not complete".to_string(),
        });
    }

    // Probe guards dropped on the cancellation path have spawned their
    // deletions by now.
    ctx.janitor.close();
    ctx.janitor.wait().await;
    ctx.janitor.reopen();

    evaluated.sort();
    skipped.sort();
    failures.sort_by_key(|f| f.category);

    info!(
        evaluated = evaluated.len(),
        failed = failures.iter().filter(|f| f.scope == FailureScope::Check).count(),
        skipped = skipped.len(),
        "Health run finished"
    );

    HealthRun {
        status,
        failures,
        evaluated,
        skipped,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
