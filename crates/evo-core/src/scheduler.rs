//! Generation scheduler
//!
//! Owns the generation loop. For each generation it selects K parents (the
//! root K times for generation 0), runs one attempt per parent on a pool of
//! W workers, and commits every outcome to the store before the next
//! generation's selection runs.
//!
//! # Guarantees
//! - Every launched attempt produces exactly one terminal commit, including
//!   attempts still queued or running when the generation deadline passes.
//! - The scheduler is the only committer; selection for generation `g + 1`
//!   sees every variant of generations `<= g`.
//! - Store failures stop the run after in-flight attempts have drained.
//! - A task that panics outside the pipeline's guard is committed as
//!   `error`; sandboxes it or an aborted task left behind are released
//!   before the generation's commits.

use crate::adapter::Adapters;
use crate::attempt::{AttemptOutcome, AttemptTicket};
use crate::config::RunConfig;
use crate::error::{ConfigError, SchedulerError};
use crate::pipeline::{panic_message, AttemptInput, AttemptPipeline};
use crate::report::{GenerationReport, RunReport, StatusCounts};
use evo_archive::{Variant, VariantId, VariantStatus, VariantStore};
use evo_selection::SelectionPolicy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::Instrument;

/// Extra time past the generation deadline for teardown before tasks are aborted
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Requests a graceful stop: in-flight generations finish, no new one starts
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Request the stop
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Evolutionary scheduler
pub struct Scheduler {
    config: RunConfig,
    store: Arc<VariantStore>,
    policy: Box<dyn SelectionPolicy>,
    pipeline: Arc<AttemptPipeline>,
    rng: StdRng,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("policy", &self.policy.name())
            .field("store_len", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler over `store`
    ///
    /// # Errors
    /// `Config` if the configuration does not validate.
    pub fn new(
        config: RunConfig,
        store: Arc<VariantStore>,
        adapters: Adapters,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let policy = config
            .selection
            .build()
            .map_err(ConfigError::from)?;
        let pipeline = Arc::new(AttemptPipeline::new(&config, adapters));
        let rng = StdRng::seed_from_u64(config.seed);
        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Self {
            config,
            store,
            policy,
            pipeline,
            rng,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        })
    }

    /// Handle for requesting a graceful stop
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    /// The store this scheduler commits to
    #[must_use]
    pub fn store(&self) -> &Arc<VariantStore> {
        &self.store
    }

    /// Run configuration
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Evaluate the baseline and commit it as the archived root
    ///
    /// Returns the existing root if the store already has one.
    ///
    /// # Errors
    /// `Baseline` if the baseline cannot be evaluated, `Store` if the commit
    /// fails.
    pub async fn bootstrap_root(&self) -> Result<VariantId, SchedulerError> {
        if let Some(root) = self.store.root() {
            tracing::info!(root = %root.id, "resuming from existing root");
            return Ok(root.id);
        }

        let deadline = self
            .pipeline
            .attempt_deadline(Instant::now() + self.config.timeouts.generation_duration());
        let root = self
            .pipeline
            .evaluate_baseline(deadline)
            .instrument(tracing::info_span!("baseline"))
            .await
            .map_err(SchedulerError::Baseline)?;

        let score = root.final_result().map(|r| r.score);
        let id = self.store.commit(root)?;
        tracing::info!(root = %id, score = ?score, "baseline committed");
        Ok(id)
    }

    /// Run generations until the configured count or a stop request
    ///
    /// Bootstraps the root if needed and resumes after the latest generation
    /// already in the store.
    ///
    /// # Errors
    /// Any run-level failure: baseline, store or selection.
    pub async fn run(&mut self) -> Result<RunReport, SchedulerError> {
        let root = self.bootstrap_root().await?;
        let start = self.store.latest_generation().map_or(0, |g| g + 1);
        let mut reports = Vec::new();
        let mut stopped_by_signal = false;

        tracing::info!(
            root = %root,
            start,
            generations = self.config.generations,
            attempts = self.config.attempts_per_generation,
            workers = self.config.workers,
            policy = self.policy.name(),
            "starting run"
        );

        for generation in start..self.config.generations {
            if *self.stop_rx.borrow() {
                tracing::info!(generation, "stop requested, not starting generation");
                stopped_by_signal = true;
                break;
            }
            let report = self.run_generation(generation, root).await?;
            reports.push(report);
        }

        let best = self
            .store
            .candidates()
            .into_iter()
            .fold(None::<(VariantId, f64)>, |best, c| match best {
                Some((_, top)) if top >= c.score => best,
                _ => Some((c.id, c.score)),
            });

        Ok(RunReport {
            generations: reports,
            stopped_by_signal,
            best_variant: best.map(|(id, _)| id),
            best_score: best.map(|(_, score)| score),
        })
    }

    /// Run a single generation to completion
    ///
    /// # Errors
    /// Selection failure after generation 0, or any store failure.
    pub async fn run_generation(
        &mut self,
        generation: u32,
        root: VariantId,
    ) -> Result<GenerationReport, SchedulerError> {
        let started = Instant::now();
        let k = self.config.attempts_per_generation;

        let parents = if generation == 0 {
            vec![root; k]
        } else {
            self.policy
                .select(&self.store.candidates(), k, &mut self.rng)
                .map_err(|source| SchedulerError::Selection { generation, source })?
        };
        tracing::info!(generation, parents = ?parents, "generation started");

        let mut inputs = Vec::with_capacity(parents.len());
        for parent_id in &parents {
            let parent: Variant = self.store.get(*parent_id)?;
            let parent_tree = self.store.resolve_tree(*parent_id)?;
            inputs.push(AttemptInput {
                ticket: AttemptTicket::new(*parent_id, generation),
                parent,
                parent_tree,
            });
        }

        let deadline = started + self.config.timeouts.generation_duration();
        let outcomes = self.execute(inputs, deadline).await;

        let mut committed = Vec::with_capacity(outcomes.len());
        let mut counts = StatusCounts::default();
        let mut best_score: Option<f64> = None;
        let mut fatal = None;

        for outcome in outcomes {
            if fatal.is_some() {
                tracing::error!(attempt = %outcome.ticket.attempt_id, "attempt dropped after store failure");
                continue;
            }
            let status = outcome.status();
            let score = outcome.variant.final_result().map(|r| r.score);
            match self.store.commit(outcome.variant) {
                Ok(id) => {
                    counts.record(status);
                    committed.push(id);
                    if let Some(score) = score {
                        best_score = Some(best_score.map_or(score, |b: f64| b.max(score)));
                    }
                    tracing::info!(
                        generation,
                        id = %id,
                        parent = %outcome.ticket.parent_id,
                        %status,
                        score = ?score,
                        "variant committed"
                    );
                }
                Err(err) => {
                    tracing::error!(generation, error = %err, "store commit failed, stopping run");
                    fatal = Some(err);
                }
            }
        }
        if let Some(err) = fatal {
            return Err(err.into());
        }

        let report = GenerationReport {
            generation,
            parents,
            counts,
            committed,
            best_score,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            generation,
            counts = %report.counts,
            best = ?report.best_score,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "generation finished"
        );
        Ok(report)
    }

    /// Run attempts on the worker pool; returns exactly one outcome per input,
    /// in completion order, with cancelled attempts last
    async fn execute(&self, inputs: Vec<AttemptInput>, deadline: Instant) -> Vec<AttemptOutcome> {
        let tickets: Vec<AttemptTicket> = inputs.iter().map(|i| i.ticket).collect();
        let workers = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = JoinSet::new();
        let mut slots = HashMap::with_capacity(tickets.len());

        for (slot, input) in inputs.into_iter().enumerate() {
            let workers = Arc::clone(&workers);
            let pipeline = Arc::clone(&self.pipeline);
            let ticket = input.ticket;
            let span = tracing::info_span!(
                "attempt",
                attempt = %ticket.attempt_id,
                parent = %ticket.parent_id,
                generation = ticket.generation
            );

            let task = tasks.spawn(
                async move {
                    let outcome = match tokio::time::timeout_at(deadline, workers.acquire_owned()).await {
                        Ok(Ok(_permit)) => {
                            let attempt_deadline = pipeline.attempt_deadline(deadline);
                            pipeline.run(input, attempt_deadline).await
                        }
                        Ok(Err(_closed)) => AttemptOutcome::abandoned(
                            ticket,
                            VariantStatus::Error,
                            "worker pool closed",
                        ),
                        Err(_) => AttemptOutcome::abandoned(
                            ticket,
                            VariantStatus::TimedOut,
                            "generation deadline passed while queued",
                        ),
                    };
                    outcome
                }
                .instrument(span),
            );
            slots.insert(task.id(), slot);
        }

        let hard_deadline = deadline + self.config.timeouts.adapter_call_duration() + DRAIN_GRACE;
        let mut outcomes = Vec::with_capacity(tickets.len());
        let mut finished = vec![false; tickets.len()];
        let mut aborted = false;

        loop {
            let next = if aborted {
                tasks.join_next_with_id().await
            } else {
                match tokio::time::timeout_at(hard_deadline, tasks.join_next_with_id()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!(remaining = tasks.len(), "attempts did not drain, aborting");
                        tasks.abort_all();
                        aborted = true;
                        continue;
                    }
                }
            };
            match next {
                None => break,
                Some(Ok((id, outcome))) => {
                    if let Some(&slot) = slots.get(&id) {
                        finished[slot] = true;
                    }
                    outcomes.push(outcome);
                }
                Some(Err(err)) if err.is_panic() => {
                    if let Some(&slot) = slots.get(&err.id()) {
                        finished[slot] = true;
                        outcomes.push(panicked_outcome(tickets[slot], err));
                    }
                }
                Some(Err(err)) => tracing::warn!(error = %err, "attempt task did not complete"),
            }
        }

        let released = self.pipeline.release_abandoned().await;
        if released > 0 {
            tracing::warn!(released, "released sandboxes left behind by attempts");
        }

        for (ticket, _) in tickets.into_iter().zip(finished).filter(|(_, done)| !done) {
            outcomes.push(AttemptOutcome::abandoned(
                ticket,
                VariantStatus::TimedOut,
                "attempt cancelled at generation deadline",
            ));
        }
        outcomes
    }
}

/// Outcome for an attempt whose task panicked outside the pipeline's guard
fn panicked_outcome(ticket: AttemptTicket, err: JoinError) -> AttemptOutcome {
    let message = panic_message(err.into_panic().as_ref());
    tracing::error!(attempt = %ticket.attempt_id, panic = %message, "attempt task panicked");
    AttemptOutcome::abandoned(
        ticket,
        VariantStatus::Error,
        format!("attempt panicked: {message}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicked_task_becomes_an_error_outcome() {
        let err = tokio::spawn(async { panic!("sandbox exploded") }).await.unwrap_err();
        let ticket = AttemptTicket::new(VariantId::ROOT, 3);

        let outcome = panicked_outcome(ticket, err);
        assert_eq!(outcome.status(), VariantStatus::Error);
        assert_eq!(outcome.variant.generation, 3);
        assert!(outcome.variant.reason.unwrap().contains("sandbox exploded"));
    }
}
