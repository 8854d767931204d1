use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use beacon_indexer_shared::beacon_time::BeaconClock;
use beacon_indexer_shared::types::{Epoch, Slot};
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;

use crate::beacon_client::types::{CommitteeData, ProposerDutyData, ValidatorBalanceData, ValidatorData};
use crate::prometheus_metrics::Metrics;
use crate::store::rewards::ValidatorEpochRewards;
use crate::store::validators::GlobalStats;
use crate::store::{EpochFlag, EpochRow, PgStore, StoreError, SyncCommitteeRow};

pub mod creator;
pub mod orchestrator;
pub mod processor;
pub mod tracker;

/// The persistence surface the control loops drive. `PgStore` is the real
/// implementation; tests run the loops against an in-memory one.
pub trait IndexerStore: Send + Sync {
    fn last_epoch(&self) -> impl Future<Output = Result<Option<Epoch>, StoreError>> + Send;

    fn count_unprocessed_epochs(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn insert_epochs(&self, epochs: &[Epoch]) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn min_unprocessed_epoch(&self) -> impl Future<Output = Result<Option<EpochRow>, StoreError>> + Send;

    fn set_epoch_flag(&self, epoch: Epoch, flag: EpochFlag) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn insert_validator_balances(
        &self,
        epoch: Epoch,
        balances: &[ValidatorBalanceData],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn attesting_validator_ids(&self) -> impl Future<Output = Result<Vec<u64>, StoreError>> + Send;

    fn effective_balances(&self, ids: &[u64]) -> impl Future<Output = Result<HashMap<u64, u64>, StoreError>> + Send;

    fn apply_epoch_rewards(
        &self,
        epoch: Epoch,
        hour: DateTime<Utc>,
        rewards: &[ValidatorEpochRewards],
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn apply_committees(
        &self,
        epoch: Epoch,
        epoch_slots: (Slot, Slot),
        floor_slot: Slot,
        committees: &[CommitteeData],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn insert_proposer_duties(
        &self,
        epoch: Epoch,
        duties: &[ProposerDutyData],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn sync_committee_covering(
        &self,
        epoch: Epoch,
    ) -> impl Future<Output = Result<Option<SyncCommitteeRow>, StoreError>> + Send;

    fn insert_sync_committee(
        &self,
        epoch: Epoch,
        from_epoch: Epoch,
        to_epoch: Epoch,
        validator_ids: &[u64],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn ensure_epoch_slots(
        &self,
        epoch: Epoch,
        epoch_slots: (Slot, Slot),
        floor_slot: Slot,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn count_validators(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn upsert_validators(&self, validators: &[ValidatorData]) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn upsert_global_stats(
        &self,
        day_utc: NaiveDate,
        stats: &GlobalStats,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl IndexerStore for PgStore {
    async fn last_epoch(&self) -> Result<Option<Epoch>, StoreError> {
        PgStore::last_epoch(self).await
    }

    async fn count_unprocessed_epochs(&self) -> Result<u64, StoreError> {
        PgStore::count_unprocessed_epochs(self).await
    }

    async fn insert_epochs(&self, epochs: &[Epoch]) -> Result<(), StoreError> {
        PgStore::insert_epochs(self, epochs).await
    }

    async fn min_unprocessed_epoch(&self) -> Result<Option<EpochRow>, StoreError> {
        PgStore::min_unprocessed_epoch(self).await
    }

    async fn set_epoch_flag(&self, epoch: Epoch, flag: EpochFlag) -> Result<(), StoreError> {
        PgStore::set_epoch_flag(self, epoch, flag).await
    }

    async fn insert_validator_balances(
        &self,
        epoch: Epoch,
        balances: &[ValidatorBalanceData],
    ) -> Result<(), StoreError> {
        PgStore::insert_validator_balances(self, epoch, balances).await
    }

    async fn attesting_validator_ids(&self) -> Result<Vec<u64>, StoreError> {
        PgStore::attesting_validator_ids(self).await
    }

    async fn effective_balances(&self, ids: &[u64]) -> Result<HashMap<u64, u64>, StoreError> {
        PgStore::effective_balances(self, ids).await
    }

    async fn apply_epoch_rewards(
        &self,
        epoch: Epoch,
        hour: DateTime<Utc>,
        rewards: &[ValidatorEpochRewards],
    ) -> Result<u64, StoreError> {
        PgStore::apply_epoch_rewards(self, epoch, hour, rewards).await
    }

    async fn apply_committees(
        &self,
        epoch: Epoch,
        epoch_slots: (Slot, Slot),
        floor_slot: Slot,
        committees: &[CommitteeData],
    ) -> Result<(), StoreError> {
        PgStore::apply_committees(self, epoch, epoch_slots, floor_slot, committees).await
    }

    async fn insert_proposer_duties(&self, epoch: Epoch, duties: &[ProposerDutyData]) -> Result<(), StoreError> {
        PgStore::insert_proposer_duties(self, epoch, duties).await
    }

    async fn sync_committee_covering(&self, epoch: Epoch) -> Result<Option<SyncCommitteeRow>, StoreError> {
        PgStore::sync_committee_covering(self, epoch).await
    }

    async fn insert_sync_committee(
        &self,
        epoch: Epoch,
        from_epoch: Epoch,
        to_epoch: Epoch,
        validator_ids: &[u64],
    ) -> Result<(), StoreError> {
        PgStore::insert_sync_committee(self, epoch, from_epoch, to_epoch, validator_ids).await
    }

    async fn ensure_epoch_slots(
        &self,
        epoch: Epoch,
        epoch_slots: (Slot, Slot),
        floor_slot: Slot,
    ) -> Result<(), StoreError> {
        PgStore::ensure_epoch_slots(self, epoch, epoch_slots, floor_slot).await
    }

    async fn count_validators(&self) -> Result<u64, StoreError> {
        PgStore::count_validators(self).await
    }

    async fn upsert_validators(&self, validators: &[ValidatorData]) -> Result<(), StoreError> {
        PgStore::upsert_validators(self, validators).await
    }

    async fn upsert_global_stats(&self, day_utc: NaiveDate, stats: &GlobalStats) -> Result<(), StoreError> {
        PgStore::upsert_global_stats(self, day_utc, stats).await
    }
}

/// Immutable-after-construction handles every loop runs against. Loops
/// coordinate only through the store, never through each other.
pub struct PipelineContext<S, B> {
    pub store: S,
    pub beacon: Arc<B>,
    pub clock: BeaconClock,
    pub metrics: Arc<Metrics>,
    pub shutdown: watch::Receiver<bool>,
}

impl<S: Clone, B> Clone for PipelineContext<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            beacon: Arc::clone(&self.beacon),
            clock: self.clock.clone(),
            metrics: Arc::clone(&self.metrics),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S, B> PipelineContext<S, B> {
    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn slot_duration(&self) -> Duration {
        Duration::from_millis(self.clock.slot_duration_ms())
    }

    pub fn epoch_duration(&self) -> Duration {
        Duration::from_millis(self.clock.slot_duration_ms() * self.clock.slots_per_epoch())
    }
}

/// Sleeps unless shutdown arrives first; returns true when the loop should
/// exit.
pub(crate) async fn sleep_unless_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => match changed {
            Ok(()) => *shutdown.borrow(),
            // Sender dropped: the service is going away.
            Err(_) => true,
        },
    }
}
