use std::collections::HashMap;
use std::time::Duration;

use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::PipelineError;

type StageTasks = JoinSet<Result<(), PipelineError>>;

/// Wait for every stage task and resolve the run outcome.
///
/// Semantics:
/// - If every task succeeded, return `Ok`.
/// - On the first failure, cancel the token, abort every unfinished task and
///   wait up to `grace_period` for them to finish.
/// - Return the first failure that is not a consequence of another stage going
///   away; fall back to the first failure seen.
pub(crate) async fn settle_stages(
    mut tasks: StageTasks,
    names: HashMap<Id, String>,
    token: CancellationToken,
    grace_period: Duration,
) -> Result<(), PipelineError> {
    let mut failure = None;
    while let Some(joined) = tasks.join_next_with_id().await {
        if let Err(err) = task_outcome(joined, &names) {
            failure = Some(err);
            break;
        }
    }
    let Some(mut failure) = failure else {
        return Ok(());
    };

    error!(error = %failure, "Stage failed, cancelling pipeline");
    token.cancel();
    tasks.abort_all();

    if !tasks.is_empty() {
        debug!(pending = tasks.len(), "Waiting for cancelled stages");
        let drained = tokio::time::timeout(grace_period, async {
            while let Some(joined) = tasks.join_next_with_id().await {
                if let Err(err) = task_outcome(joined, &names) {
                    prefer(&mut failure, err);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                grace_period_ms = grace_period.as_millis() as u64,
                "Stages did not finish within the grace period"
            );
        }
    }

    Err(failure)
}

fn task_outcome(
    joined: Result<(Id, Result<(), PipelineError>), JoinError>,
    names: &HashMap<Id, String>,
) -> Result<(), PipelineError> {
    let stage = |id: Id| {
        names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("task {id}"))
    };
    match joined {
        Ok((id, Ok(()))) => {
            debug!(stage = %stage(id), "Stage finished");
            Ok(())
        }
        Ok((id, Err(err))) => {
            if !err.is_secondary() {
                error!(stage = %stage(id), error = %err, "Stage failed");
            }
            Err(err)
        }
        Err(join_error) if join_error.is_cancelled() => Err(PipelineError::Cancelled),
        Err(join_error) => {
            let id = join_error.id();
            let message = panic_message(join_error);
            error!(stage = %stage(id), %message, "Stage panicked");
            Err(PipelineError::StagePanicked {
                stage: stage(id),
                message,
            })
        }
    }
}

fn prefer(current: &mut PipelineError, candidate: PipelineError) {
    if current.is_secondary() && !candidate.is_secondary() {
        *current = candidate;
    }
}

fn panic_message(join_error: JoinError) -> String {
    match join_error.try_into_panic() {
        Ok(payload) => {
            if let Some(message) = payload.downcast_ref::<&str>() {
                (*message).to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "unknown panic payload".to_string()
            }
        }
        Err(join_error) => join_error.to_string(),
    }
}
