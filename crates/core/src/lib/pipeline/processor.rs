use std::collections::HashMap;

use beacon_indexer_shared::types::Epoch;
use chrono::{DateTime, Utc};

use crate::beacon_client::types::IdealAttestationRewards;
use crate::beacon_client::{self, BeaconApi, StateRef};
use crate::prometheus_metrics::outcome;
use crate::store::rewards::ValidatorEpochRewards;
use crate::store::{EpochFlag, EpochFlags, EpochRow, StoreError};

use super::{IndexerStore, PipelineContext};

/// Attempts per step before the processor gives up on this pass. The epoch
/// stays the minimum unprocessed row, so the next orchestrator cycle resumes
/// it at the first still-false flag.
const MAX_STEP_ATTEMPTS: u32 = 3;

/// Validators per attestation-rewards request.
const REWARDS_BATCH_SIZE: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ValidatorsBalances,
    Rewards,
    Committees,
    ProposerDuties,
    SyncCommittees,
    Slots,
}

impl Step {
    pub const FIRST: Step = Step::ValidatorsBalances;

    pub const ALL: [Step; 6] = [
        Step::ValidatorsBalances,
        Step::Rewards,
        Step::Committees,
        Step::ProposerDuties,
        Step::SyncCommittees,
        Step::Slots,
    ];

    /// The one progress flag this step guards and flips.
    pub fn flag(&self) -> EpochFlag {
        match self {
            Self::ValidatorsBalances => EpochFlag::ValidatorsBalances,
            Self::Rewards => EpochFlag::Rewards,
            Self::Committees => EpochFlag::Committees,
            Self::ProposerDuties => EpochFlag::ProposerDuties,
            Self::SyncCommittees => EpochFlag::SyncCommittees,
            Self::Slots => EpochFlag::Slots,
        }
    }

    pub fn next(&self) -> Option<Step> {
        match self {
            Self::ValidatorsBalances => Some(Self::Rewards),
            Self::Rewards => Some(Self::Committees),
            Self::Committees => Some(Self::ProposerDuties),
            Self::ProposerDuties => Some(Self::SyncCommittees),
            Self::SyncCommittees => Some(Self::Slots),
            Self::Slots => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidatorsBalances => "validators_balances",
            Self::Rewards => "rewards",
            Self::Committees => "committees",
            Self::ProposerDuties => "proposer_duties",
            Self::SyncCommittees => "sync_committees",
            Self::Slots => "slots",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Beacon(#[from] beacon_client::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StepError {
    /// 4xx responses are deterministic; retrying the step cannot help.
    fn is_fatal(&self) -> bool {
        matches!(self, Self::Beacon(beacon_client::Error::BadRequest { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorOutcome {
    /// All six flags are true.
    Completed,
    /// A step exhausted its retries; flags record what did succeed.
    Failed { step: Step },
    /// Shutdown arrived between steps.
    Aborted,
}

/// Drives one epoch row towards "all flags true". Steps whose flag is
/// already set are skipped, which makes a processing pass resumable after a
/// crash at any point.
pub struct EpochProcessor {
    epoch: Epoch,
    flags: EpochFlags,
}

impl EpochProcessor {
    pub fn new(row: &EpochRow) -> Self {
        Self {
            epoch: row.epoch,
            flags: row.flags,
        }
    }

    pub async fn run<S, B>(mut self, ctx: &PipelineContext<S, B>) -> ProcessorOutcome
    where
        S: IndexerStore,
        B: BeaconApi + Send + Sync,
    {
        let mut step = Step::FIRST;
        loop {
            if ctx.shutdown_requested() {
                return ProcessorOutcome::Aborted;
            }
            if self.flags.get(step.flag()) {
                tracing::debug!(epoch = %self.epoch, step = step.as_str(), "Step already done, skipping");
            } else {
                match self.run_step_with_retries(step, ctx).await {
                    Ok(()) => {
                        self.flags.set(step.flag());
                        ctx.metrics
                            .epochs
                            .step_outcomes
                            .with_label_values(&[step.as_str(), outcome::SUCCESS])
                            .inc();
                    }
                    Err(e) => {
                        ctx.metrics
                            .epochs
                            .step_outcomes
                            .with_label_values(&[step.as_str(), outcome::ERROR])
                            .inc();
                        tracing::error!(epoch = %self.epoch, step = step.as_str(), "Step failed: {e}");
                        return ProcessorOutcome::Failed { step };
                    }
                }
            }
            match step.next() {
                Some(next) => step = next,
                None => return ProcessorOutcome::Completed,
            }
        }
    }

    /// Transient beacon failures re-enter the step after a slot delay, up to
    /// `MAX_STEP_ATTEMPTS`. Store errors get a single immediate retry; a
    /// second store failure fails the step. 4xx fails immediately.
    async fn run_step_with_retries<S, B>(&self, step: Step, ctx: &PipelineContext<S, B>) -> Result<(), StepError>
    where
        S: IndexerStore,
        B: BeaconApi + Send + Sync,
    {
        let mut store_retry_used = false;
        let mut attempts: u32 = 0;
        loop {
            match self.run_step(step, ctx).await {
                Ok(()) => return Ok(()),
                Err(e @ StepError::Store(_)) => {
                    if store_retry_used {
                        return Err(e);
                    }
                    store_retry_used = true;
                    tracing::warn!(epoch = %self.epoch, step = step.as_str(), "Retrying step after store error: {e}");
                }
                Err(e) => {
                    attempts += 1;
                    if e.is_fatal() || attempts >= MAX_STEP_ATTEMPTS {
                        return Err(e);
                    }
                    tracing::warn!(
                        epoch = %self.epoch,
                        step = step.as_str(),
                        attempts,
                        "Step attempt failed, re-entering after one slot: {e}"
                    );
                    tokio::time::sleep(ctx.slot_duration()).await;
                }
            }
        }
    }

    async fn run_step<S, B>(&self, step: Step, ctx: &PipelineContext<S, B>) -> Result<(), StepError>
    where
        S: IndexerStore,
        B: BeaconApi + Send + Sync,
    {
        match step {
            Step::ValidatorsBalances => self.fetch_validators_balances(ctx).await,
            Step::Rewards => self.fetch_rewards(ctx).await,
            Step::Committees => self.fetch_committees(ctx).await,
            Step::ProposerDuties => self.fetch_proposer_duties(ctx).await,
            Step::SyncCommittees => self.fetch_sync_committees(ctx).await,
            Step::Slots => self.fetch_slots(ctx).await,
        }
    }

    async fn fetch_validators_balances<S, B>(&self, ctx: &PipelineContext<S, B>) -> Result<(), StepError>
    where
        S: IndexerStore,
        B: BeaconApi + Send + Sync,
    {
        let slot = ctx.clock.first_slot_of_epoch(self.epoch);
        let balances = ctx.beacon.get_validator_balances(&StateRef::Slot(slot)).await?;
        tracing::debug!(epoch = %self.epoch, count = balances.len(), "Fetched validator balances");
        ctx.store.insert_validator_balances(self.epoch, &balances).await?;
        Ok(())
    }

    /// The atomic rewards-and-aggregation job. Fetches actual and ideal
    /// attestation rewards in batches, computes clamped missed components
    /// per validator, and hands everything to the store as one transaction.
    async fn fetch_rewards<S, B>(&self, ctx: &PipelineContext<S, B>) -> Result<(), StepError>
    where
        S: IndexerStore,
        B: BeaconApi + Send + Sync,
    {
        let ids = ctx.store.attesting_validator_ids().await?;
        let mut rewards: Vec<ValidatorEpochRewards> = Vec::with_capacity(ids.len());
        let mut ideal_by_balance: Option<HashMap<u64, IdealAttestationRewards>> = None;

        for batch in ids.chunks(REWARDS_BATCH_SIZE) {
            let effective_balances = ctx.store.effective_balances(batch).await?;
            let response = ctx.beacon.get_attestation_rewards(self.epoch, batch).await?;

            // The ideal table is identical across batches of the same epoch.
            let ideal = ideal_by_balance.get_or_insert_with(|| {
                response
                    .ideal_rewards
                    .iter()
                    .map(|ideal| (ideal.effective_balance, ideal.clone()))
                    .collect()
            });

            for actual in &response.total_rewards {
                let Some(effective_balance) = effective_balances.get(&actual.validator_index) else {
                    tracing::warn!(
                        epoch = %self.epoch,
                        validator = actual.validator_index,
                        "Rewards response for validator without a stored effective balance"
                    );
                    continue;
                };
                let Some(ideal_tuple) = ideal.get(effective_balance) else {
                    tracing::warn!(
                        epoch = %self.epoch,
                        validator = actual.validator_index,
                        effective_balance,
                        "No ideal rewards tuple for effective balance"
                    );
                    continue;
                };
                rewards.push(ValidatorEpochRewards::from_actual_and_ideal(actual, ideal_tuple));
            }
        }

        let hour = hour_of_epoch(ctx, self.epoch);
        let applied = ctx.store.apply_epoch_rewards(self.epoch, hour, &rewards).await?;
        tracing::debug!(
            epoch = %self.epoch,
            computed = rewards.len(),
            applied,
            "Applied epoch rewards"
        );
        Ok(())
    }

    async fn fetch_committees<S, B>(&self, ctx: &PipelineContext<S, B>) -> Result<(), StepError>
    where
        S: IndexerStore,
        B: BeaconApi + Send + Sync,
    {
        let committees = ctx.beacon.get_committees(self.epoch).await?;
        ctx.store
            .apply_committees(
                self.epoch,
                ctx.clock.epoch_slots(self.epoch),
                ctx.clock.slot_start_indexing(),
                &committees,
            )
            .await?;
        Ok(())
    }

    async fn fetch_proposer_duties<S, B>(&self, ctx: &PipelineContext<S, B>) -> Result<(), StepError>
    where
        S: IndexerStore,
        B: BeaconApi + Send + Sync,
    {
        let duties = ctx.beacon.get_proposer_duties(self.epoch).await?;
        ctx.store.insert_proposer_duties(self.epoch, &duties).await?;
        Ok(())
    }

    /// One HTTP call per 256-epoch period: when a stored row already covers
    /// this epoch only the flag flips.
    async fn fetch_sync_committees<S, B>(&self, ctx: &PipelineContext<S, B>) -> Result<(), StepError>
    where
        S: IndexerStore,
        B: BeaconApi + Send + Sync,
    {
        if let Some(existing) = ctx.store.sync_committee_covering(self.epoch).await? {
            tracing::debug!(
                epoch = %self.epoch,
                from_epoch = %existing.from_epoch,
                to_epoch = %existing.to_epoch,
                "Sync committee period already stored"
            );
            ctx.store.set_epoch_flag(self.epoch, EpochFlag::SyncCommittees).await?;
            return Ok(());
        }

        let period_start = ctx.clock.sync_committee_period_start(self.epoch);
        let period_end = ctx.clock.sync_committee_period_end(self.epoch);
        let committee = ctx.beacon.get_sync_committees(period_start).await?;
        ctx.store
            .insert_sync_committee(self.epoch, period_start, period_end, &committee.validators)
            .await?;
        Ok(())
    }

    async fn fetch_slots<S, B>(&self, ctx: &PipelineContext<S, B>) -> Result<(), StepError>
    where
        S: IndexerStore,
        B: BeaconApi + Send + Sync,
    {
        ctx.store
            .ensure_epoch_slots(
                self.epoch,
                ctx.clock.epoch_slots(self.epoch),
                ctx.clock.slot_start_indexing(),
            )
            .await?;
        Ok(())
    }
}

fn hour_of_epoch<S, B>(ctx: &PipelineContext<S, B>, epoch: Epoch) -> DateTime<Utc> {
    let hour_ms = ctx.clock.hour_containing_epoch(epoch);
    DateTime::from_timestamp_millis(hour_ms).expect("epoch timestamps fit the chrono range")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_run_in_declared_order() {
        let order: Vec<Step> = std::iter::successors(Some(Step::FIRST), |step| step.next()).collect();
        assert_eq!(order, Step::ALL.to_vec());
    }

    #[test]
    fn every_step_guards_a_distinct_flag() {
        let flags: std::collections::HashSet<EpochFlag> = Step::ALL.iter().map(|step| step.flag()).collect();
        assert_eq!(flags.len(), 6);

        // Running every step once completes the epoch; dropping any one step
        // leaves its flag false.
        let mut all = EpochFlags::default();
        for step in Step::ALL {
            all.set(step.flag());
        }
        assert!(all.all_done());
        for skipped in Step::ALL {
            let mut partial = EpochFlags::default();
            for step in Step::ALL.iter().filter(|step| **step != skipped) {
                partial.set(step.flag());
            }
            assert!(!partial.all_done());
            assert!(!partial.get(skipped.flag()));
        }
    }
}
