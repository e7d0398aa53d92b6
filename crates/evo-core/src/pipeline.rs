//! Attempt pipeline
//!
//! Drives one parent through provision, diagnose, author, apply, shallow and
//! optionally deep evaluation, and classifies the result into exactly one
//! terminal status. Nothing that goes wrong inside an attempt escapes as an
//! error: adapter failures, apply conflicts, timeouts and panics all become
//! terminal child records. The sandbox is torn down on every path; a handle
//! whose teardown did not complete stays registered until
//! [`AttemptPipeline::release_abandoned`] retries it.

use crate::adapter::{Adapters, EvalStage, EvaluationRequest, SandboxHandle};
use crate::attempt::{AttemptOutcome, AttemptState, AttemptTicket, AttemptTrail};
use crate::config::{ArchiveRule, EvaluationConfig, EvaluationMode, PatchPolicy, RunConfig};
use crate::error::{AdapterError, ApplyError};
use crate::patch::{inspect_patch, PatchOutcome};
use crate::retry::RetryPolicy;
use dashmap::DashMap;
use evo_archive::{
    AttemptId, EvaluationResult, NewVariant, Patch, SourceTree, StatusError, Variant, VariantStatus,
};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Parent and lineage context for one attempt
#[derive(Debug, Clone)]
pub struct AttemptInput {
    /// Attempt identity and generation
    pub ticket: AttemptTicket,
    /// Committed parent record
    pub parent: Variant,
    /// Parent's resolved source tree
    pub parent_tree: SourceTree,
}

/// Why an attempt stopped early
#[derive(Debug, Clone, PartialEq, Eq)]
struct Failure {
    status: VariantStatus,
    reason: String,
}

impl Failure {
    fn new(status: VariantStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

impl From<AdapterError> for Failure {
    fn from(err: AdapterError) -> Self {
        Self::new(err.terminal_status(), err.to_string())
    }
}

impl From<StatusError> for Failure {
    fn from(err: StatusError) -> Self {
        Self::new(VariantStatus::Error, err.to_string())
    }
}

/// Runs attempts against the configured adapters
#[derive(Debug, Clone)]
pub struct AttemptPipeline {
    adapters: Adapters,
    evaluation: EvaluationConfig,
    archive_rule: ArchiveRule,
    patch_policy: PatchPolicy,
    provision_retry: RetryPolicy,
    call_timeout: Duration,
    attempt_timeout: Duration,
    live: Arc<DashMap<AttemptId, SandboxHandle>>,
}

impl AttemptPipeline {
    /// Create pipeline from run configuration
    #[must_use]
    pub fn new(config: &RunConfig, adapters: Adapters) -> Self {
        Self {
            adapters,
            evaluation: config.evaluation.clone(),
            archive_rule: config.archive_rule,
            patch_policy: config.patch_policy,
            provision_retry: config.provision_retry,
            call_timeout: config.timeouts.adapter_call_duration(),
            attempt_timeout: config.timeouts.attempt_duration(),
            live: Arc::new(DashMap::new()),
        }
    }

    /// Deadline for an attempt starting now, capped by the generation's
    #[must_use]
    pub fn attempt_deadline(&self, generation_deadline: Instant) -> Instant {
        (Instant::now() + self.attempt_timeout).min(generation_deadline)
    }

    /// Run one attempt to a terminal outcome
    pub async fn run(&self, input: AttemptInput, deadline: Instant) -> AttemptOutcome {
        let ticket = input.ticket;
        let mut child = NewVariant::child(ticket.parent_id, ticket.generation, ticket.attempt_id);
        let mut trail = AttemptTrail::default();
        let mut sandbox = None;

        let result = guarded(
            deadline,
            self.drive(&input, &mut child, &mut trail, &mut sandbox),
        )
        .await;

        if let Some(handle) = sandbox.take() {
            if self.teardown(handle).await {
                self.live.remove(&ticket.attempt_id);
            }
        }
        if let Err(failure) = result {
            fail(&mut child, &mut trail, failure);
        }

        tracing::debug!(
            status = %child.status(),
            reason = child.reason.as_deref().unwrap_or_default(),
            "attempt finished"
        );
        AttemptOutcome {
            ticket,
            variant: child,
            trail,
        }
    }

    /// Evaluate the hand-written baseline into an archived root record
    ///
    /// # Errors
    /// The reason baseline evaluation failed; the run cannot start without it.
    pub async fn evaluate_baseline(&self, deadline: Instant) -> Result<NewVariant, String> {
        let mut root = NewVariant::root();
        let mut sandbox = None;

        let result = guarded(deadline, self.drive_baseline(&mut root, &mut sandbox)).await;

        if let Some(handle) = sandbox.take() {
            self.teardown(handle).await;
        }
        result.map(|()| root).map_err(|f| f.reason)
    }

    async fn drive(
        &self,
        input: &AttemptInput,
        child: &mut NewVariant,
        trail: &mut AttemptTrail,
        slot: &mut Option<SandboxHandle>,
    ) -> Result<(), Failure> {
        let parent = &input.parent;
        let parent_score = parent.score().unwrap_or(0.0);
        let author = self.adapters.author.as_ref();

        let handle = self.provision(&input.parent_tree).await?;
        *slot = Some(handle);
        self.live.insert(input.ticket.attempt_id, handle);
        step(trail, AttemptState::Provisioned)?;

        let failure_logs: Vec<String> = parent
            .final_result()
            .map(|r| r.failed_tasks().map(str::to_string).collect())
            .unwrap_or_default();
        let diagnosis = bounded(
            self.call_timeout,
            "diagnose",
            author.diagnose(parent, &failure_logs),
        )
        .await?;
        if !diagnosis.trim().is_empty() {
            child.diagnosis = Some(diagnosis.clone());
        }
        step(trail, AttemptState::Diagnosed)?;

        let patch = bounded(
            self.call_timeout,
            "author_patch",
            author.author_patch(parent, &diagnosis),
        )
        .await?;
        child.patch = patch;
        step(trail, AttemptState::Patched)?;

        match self.apply(handle, &input.parent_tree, &child.patch).await? {
            PatchOutcome::Applied(tree) => {
                tracing::debug!(patches = tree.patches.len(), "patch applied");
                step(trail, AttemptState::Applied)?;
            }
            PatchOutcome::Empty { reason } => {
                step(trail, AttemptState::Applied)?;
                tracing::debug!(%reason, "no-op patch, skipping evaluation");
                child.reason = Some(reason);
                child.advance(VariantStatus::Discarded)?;
                step(trail, AttemptState::Discarded)?;
                return Ok(());
            }
            PatchOutcome::ApplyError(reason) => {
                return Err(Failure::new(VariantStatus::FailedCompile, reason));
            }
        }

        child.advance(VariantStatus::EvaluatingShallow)?;
        let shallow = self.evaluate(handle, EvalStage::Shallow).await?;
        step(trail, AttemptState::EvalShallow)?;

        let promote = self.evaluation.mode.promotes(shallow.score, parent_score);
        tracing::debug!(shallow = shallow.score, parent = parent_score, promote, "shallow evaluation done");
        child.shallow_result = Some(shallow);

        if promote {
            child.advance(VariantStatus::EvaluatingDeep)?;
            let deep = self.evaluate(handle, EvalStage::Deep).await?;
            child.deep_result = Some(deep);
            step(trail, AttemptState::EvalDeep)?;
        }
        step(trail, AttemptState::Scored)?;

        let score = child.final_result().map_or(0.0, |r| r.score);
        child.reason = Some(format!("score {score:.4} vs parent {parent_score:.4}"));
        if self.archive_rule.accepts(score, parent_score) {
            child.advance(VariantStatus::Archived)?;
            step(trail, AttemptState::Archived)?;
        } else {
            child.advance(VariantStatus::Discarded)?;
            step(trail, AttemptState::Discarded)?;
        }
        Ok(())
    }

    async fn drive_baseline(
        &self,
        root: &mut NewVariant,
        slot: &mut Option<SandboxHandle>,
    ) -> Result<(), Failure> {
        let handle = self.provision(&SourceTree::baseline()).await?;
        *slot = Some(handle);

        root.advance(VariantStatus::EvaluatingShallow)?;
        root.shallow_result = Some(self.evaluate(handle, EvalStage::Shallow).await?);

        if self.evaluation.mode != EvaluationMode::ShallowOnly {
            root.advance(VariantStatus::EvaluatingDeep)?;
            root.deep_result = Some(self.evaluate(handle, EvalStage::Deep).await?);
        }

        root.reason = Some("baseline".to_string());
        root.advance(VariantStatus::Archived)?;
        Ok(())
    }

    async fn provision(&self, tree: &SourceTree) -> Result<SandboxHandle, Failure> {
        let sandbox = self.adapters.sandbox.as_ref();
        let limit = self.call_timeout;
        let handle = self
            .provision_retry
            .run("provision", move || bounded(limit, "provision", sandbox.provision(tree)))
            .await?;
        tracing::debug!(%handle, "sandbox provisioned");
        Ok(handle)
    }

    async fn apply(
        &self,
        handle: SandboxHandle,
        parent_tree: &SourceTree,
        patch: &Patch,
    ) -> Result<PatchOutcome, Failure> {
        let inspection = inspect_patch(patch);
        if !inspection.is_valid(self.patch_policy.reject_test_only) {
            return Ok(PatchOutcome::Empty {
                reason: inspection.reason().to_string(),
            });
        }

        let applied = tokio::time::timeout(
            self.call_timeout,
            self.adapters.sandbox.apply_patch(handle, patch),
        )
        .await
        .map_err(|_| AdapterError::Timeout(timeout_label("apply_patch", self.call_timeout)))?;

        match applied {
            Ok(()) => Ok(PatchOutcome::Applied(parent_tree.with_patch(patch))),
            Err(ApplyError::Adapter(err)) => Err(err.into()),
            Err(err @ (ApplyError::Conflict(_) | ApplyError::Malformed(_))) => {
                Ok(PatchOutcome::ApplyError(err.to_string()))
            }
        }
    }

    async fn evaluate(&self, handle: SandboxHandle, stage: EvalStage) -> Result<EvaluationResult, Failure> {
        let (tasks, run_count) = match stage {
            EvalStage::Shallow => (&self.evaluation.shallow_tasks, self.evaluation.shallow_runs),
            EvalStage::Deep => (&self.evaluation.deep_tasks, self.evaluation.deep_runs),
        };
        let request = EvaluationRequest {
            stage,
            tasks: tasks.clone(),
            run_count,
            aggregation: self.evaluation.aggregation,
        };

        let result = bounded(
            self.call_timeout,
            stage.as_str(),
            self.adapters.evaluator.evaluate(handle, &request),
        )
        .await?;

        if !(0.0..=1.0).contains(&result.score) {
            return Err(Failure::new(
                VariantStatus::Error,
                format!("{} evaluation returned score {}", stage.as_str(), result.score),
            ));
        }
        Ok(result)
    }

    /// Retry teardown for every sandbox still registered to an attempt
    ///
    /// Covers attempts that were aborted mid-flight or whose own teardown
    /// failed. Each handle gets one more try and is then forgotten.
    pub async fn release_abandoned(&self) -> usize {
        let pending: Vec<(AttemptId, SandboxHandle)> =
            self.live.iter().map(|e| (*e.key(), *e.value())).collect();
        for (attempt, handle) in &pending {
            tracing::warn!(%attempt, %handle, "releasing abandoned sandbox");
            self.teardown(*handle).await;
            self.live.remove(attempt);
        }
        pending.len()
    }

    /// Returns whether the sandbox was released
    async fn teardown(&self, handle: SandboxHandle) -> bool {
        let call = AssertUnwindSafe(self.adapters.sandbox.teardown(handle)).catch_unwind();
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!(%handle, "sandbox torn down");
                true
            }
            Ok(Ok(Err(err))) => {
                tracing::warn!(%handle, error = %err, "sandbox teardown failed");
                false
            }
            Ok(Err(panic)) => {
                tracing::error!(%handle, panic = %panic_message(panic.as_ref()), "sandbox teardown panicked");
                false
            }
            Err(_) => {
                tracing::warn!(%handle, "sandbox teardown timed out");
                false
            }
        }
    }
}

/// Run `work` under `deadline`, turning a timeout or a panic into a failure
async fn guarded<F>(deadline: Instant, work: F) -> Result<(), Failure>
where
    F: Future<Output = Result<(), Failure>>,
{
    match tokio::time::timeout_at(deadline, AssertUnwindSafe(work).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(Failure::new(
            VariantStatus::Error,
            format!("attempt panicked: {}", panic_message(panic.as_ref())),
        )),
        Err(_) => Err(Failure::new(
            VariantStatus::TimedOut,
            "attempt exceeded its deadline",
        )),
    }
}

async fn bounded<T, F>(limit: Duration, operation: &str, call: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(AdapterError::Timeout(timeout_label(operation, limit))))
}

fn timeout_label(operation: &str, limit: Duration) -> String {
    format!("{operation} after {}ms", limit.as_millis())
}

fn step(trail: &mut AttemptTrail, to: AttemptState) -> Result<(), Failure> {
    if trail.advance(to) {
        Ok(())
    } else {
        Err(Failure::new(
            VariantStatus::Error,
            format!("illegal attempt transition {} -> {to}", trail.current()),
        ))
    }
}

fn fail(child: &mut NewVariant, trail: &mut AttemptTrail, failure: Failure) {
    tracing::warn!(status = %failure.status, reason = %failure.reason, "attempt failed");
    child.reason = Some(failure.reason);
    if !child.status().is_terminal() {
        if let Err(err) = child.advance(failure.status) {
            tracing::error!(error = %err, "cannot record attempt failure");
        }
    }
    if !trail.current().is_terminal() {
        if let Some(state) = AttemptState::from_status(child.status()) {
            trail.advance(state);
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_failures_map_to_statuses() {
        let f = Failure::from(AdapterError::Timeout("evaluate".into()));
        assert_eq!(f.status, VariantStatus::TimedOut);
        let f = Failure::from(AdapterError::Unavailable("docker".into()));
        assert_eq!(f.status, VariantStatus::Error);
    }

    #[test]
    fn fail_marks_child_and_trail() {
        let mut child = NewVariant::child(evo_archive::VariantId::ROOT, 0, evo_archive::AttemptId::new());
        let mut trail = AttemptTrail::default();
        trail.advance(AttemptState::Provisioned);
        fail(
            &mut child,
            &mut trail,
            Failure::new(VariantStatus::FailedCompile, "hunk 1 failed"),
        );
        assert_eq!(child.status(), VariantStatus::FailedCompile);
        assert_eq!(child.reason.as_deref(), Some("hunk 1 failed"));
        assert_eq!(trail.current(), AttemptState::FailedCompile);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_times_out() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let result = guarded(deadline, std::future::pending()).await;
        assert_eq!(result.unwrap_err().status, VariantStatus::TimedOut);
    }

    #[tokio::test]
    async fn guarded_catches_panics() {
        let deadline = Instant::now() + Duration::from_secs(5);
        let result = guarded(deadline, async {
            if deadline > Instant::now() {
                panic!("adapter exploded");
            }
            Ok(())
        })
        .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.status, VariantStatus::Error);
        assert!(failure.reason.contains("adapter exploded"));
    }
}
