#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;

use beacon_indexer_core::beacon_client::types::{
    AttestationRewards, CommitteeData, ProposerDutyData, SyncCommitteeData, ValidatorBalanceData, ValidatorData,
};
use beacon_indexer_core::beacon_client::{BeaconApi, Error as BeaconError, StateRef};
use beacon_indexer_core::pipeline::{IndexerStore, PipelineContext};
use beacon_indexer_core::prometheus_metrics::Metrics;
use beacon_indexer_core::store::rewards::ValidatorEpochRewards;
use beacon_indexer_core::store::validators::GlobalStats;
use beacon_indexer_core::store::{EpochFlag, EpochFlags, EpochRow, StoreError, SyncCommitteeRow};
use beacon_indexer_shared::beacon_time::BeaconClock;
use beacon_indexer_shared::chain::{Chain, ChainInfo};
use beacon_indexer_shared::types::{Epoch, Slot, ValidatorStatus};

pub const LOOKBACK_SLOT: Slot = Slot(1_000_000);

/// In-memory stand-in for the Postgres store, mirroring the SQL semantics
/// the pipeline relies on (dedupe-by-prefix appends, conflict-free inserts,
/// flag writes inside the same "transaction").
#[derive(Clone, Default)]
pub struct MemStore {
    pub inner: Arc<Mutex<MemStoreInner>>,
}

#[derive(Default)]
pub struct MemStoreInner {
    pub epochs: BTreeMap<u64, EpochFlags>,
    pub validators: BTreeMap<u64, StoredValidator>,
    pub validator_balances: BTreeMap<(u64, u64), u64>,
    pub slots: BTreeMap<u64, StoredSlot>,
    pub committees: BTreeMap<(u64, u64), StoredCommittee>,
    pub proposer_duties: BTreeMap<u64, StoredDuty>,
    pub sync_committees: BTreeMap<u64, (u64, Vec<u64>)>,
    pub hourly_data: BTreeMap<(u64, DateTime<Utc>), String>,
    pub hourly_stats: BTreeMap<(u64, DateTime<Utc>), (i128, i128)>,
    pub global_stats: BTreeMap<NaiveDate, GlobalStats>,
    /// Epochs in the order their sixth flag flipped true.
    pub completion_order: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct StoredValidator {
    pub status: ValidatorStatus,
    pub balance: u64,
    pub effective_balance: u64,
    pub withdrawal_address: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct StoredSlot {
    pub epoch: u64,
    pub committees_count: i32,
}

#[derive(Debug, Clone)]
pub struct StoredCommittee {
    pub epoch: u64,
    pub validator_ids: Vec<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct StoredDuty {
    pub epoch: u64,
    pub validator_index: u64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator(self, id: u64, status: ValidatorStatus, effective_balance: u64) -> Self {
        self.inner.lock().unwrap().validators.insert(
            id,
            StoredValidator {
                status,
                balance: effective_balance,
                effective_balance,
                withdrawal_address: None,
            },
        );
        self
    }

    pub fn with_epoch(self, epoch: u64, flags: EpochFlags) -> Self {
        self.inner.lock().unwrap().epochs.insert(epoch, flags);
        self
    }

    pub fn epoch_numbers(&self) -> Vec<u64> {
        self.inner.lock().unwrap().epochs.keys().copied().collect()
    }

    pub fn flags_of(&self, epoch: u64) -> EpochFlags {
        self.inner.lock().unwrap().epochs[&epoch]
    }

    pub fn completion_order(&self) -> Vec<u64> {
        self.inner.lock().unwrap().completion_order.clone()
    }

    pub fn hourly_record(&self, validator_id: u64, hour: DateTime<Utc>) -> Option<String> {
        self.inner.lock().unwrap().hourly_data.get(&(validator_id, hour)).cloned()
    }

    pub fn hourly_stats(&self, validator_id: u64, hour: DateTime<Utc>) -> Option<(i128, i128)> {
        self.inner.lock().unwrap().hourly_stats.get(&(validator_id, hour)).copied()
    }
}

fn set_flag_inner(inner: &mut MemStoreInner, epoch: Epoch, flag: EpochFlag) {
    let flags = inner.epochs.entry(epoch.0).or_default();
    let was_done = flags.all_done();
    flags.set(flag);
    if !was_done && flags.all_done() {
        inner.completion_order.push(epoch.0);
    }
}

impl IndexerStore for MemStore {
    async fn last_epoch(&self) -> Result<Option<Epoch>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.epochs.keys().next_back().map(|epoch| Epoch(*epoch)))
    }

    async fn count_unprocessed_epochs(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.epochs.values().filter(|flags| !flags.all_done()).count() as u64)
    }

    async fn insert_epochs(&self, epochs: &[Epoch]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for epoch in epochs {
            inner.epochs.entry(epoch.0).or_default();
        }
        Ok(())
    }

    async fn min_unprocessed_epoch(&self) -> Result<Option<EpochRow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .epochs
            .iter()
            .find(|(_, flags)| !flags.all_done())
            .map(|(epoch, flags)| EpochRow {
                epoch: Epoch(*epoch),
                flags: *flags,
            }))
    }

    async fn set_epoch_flag(&self, epoch: Epoch, flag: EpochFlag) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        set_flag_inner(&mut inner, epoch, flag);
        Ok(())
    }

    async fn insert_validator_balances(
        &self,
        epoch: Epoch,
        balances: &[ValidatorBalanceData],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for balance in balances {
            inner
                .validator_balances
                .entry((balance.index, epoch.0))
                .or_insert(balance.balance);
        }
        set_flag_inner(&mut inner, epoch, EpochFlag::ValidatorsBalances);
        Ok(())
    }

    async fn attesting_validator_ids(&self) -> Result<Vec<u64>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .validators
            .iter()
            .filter(|(_, validator)| ValidatorStatus::ATTESTING.contains(&validator.status))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn effective_balances(&self, ids: &[u64]) -> Result<HashMap<u64, u64>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| inner.validators.get(id).map(|v| (*id, v.effective_balance)))
            .collect())
    }

    async fn apply_epoch_rewards(
        &self,
        epoch: Epoch,
        hour: DateTime<Utc>,
        rewards: &[ValidatorEpochRewards],
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let prefix = format!("{epoch}:");
        let infix = format!(",{epoch}:");
        let already: HashSet<u64> = inner
            .hourly_data
            .iter()
            .filter(|((_, datetime), value)| {
                *datetime == hour && (value.starts_with(&prefix) || value.contains(&infix))
            })
            .map(|((validator_id, _), _)| *validator_id)
            .collect();

        let mut applied = 0;
        for reward in rewards {
            if already.contains(&reward.validator_id) {
                continue;
            }
            let record = reward.record(epoch);
            inner
                .hourly_data
                .entry((reward.validator_id, hour))
                .and_modify(|value| {
                    value.push(',');
                    value.push_str(&record);
                })
                .or_insert(record);
            let stats = inner.hourly_stats.entry((reward.validator_id, hour)).or_insert((0, 0));
            stats.0 += reward.cl_rewards() as i128;
            stats.1 += reward.cl_missed_rewards() as i128;
            applied += 1;
        }

        set_flag_inner(&mut inner, epoch, EpochFlag::Rewards);
        Ok(applied)
    }

    async fn apply_committees(
        &self,
        epoch: Epoch,
        epoch_slots: (Slot, Slot),
        floor_slot: Slot,
        committees: &[CommitteeData],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();

        for slot in epoch_slots.0 .0..=epoch_slots.1 .0 {
            if slot < floor_slot.0 {
                continue;
            }
            inner.slots.entry(slot).or_insert(StoredSlot {
                epoch: epoch.0,
                committees_count: 0,
            });
        }

        let mut counts: BTreeMap<u64, i32> = BTreeMap::new();
        for committee in committees {
            inner.committees.entry((committee.slot, committee.index)).or_insert(StoredCommittee {
                epoch: epoch.0,
                validator_ids: committee.validators.clone(),
            });
            *counts.entry(committee.slot).or_default() += 1;
        }
        for (slot, count) in counts {
            if let Some(stored) = inner.slots.get_mut(&slot) {
                stored.committees_count = count;
            }
        }

        set_flag_inner(&mut inner, epoch, EpochFlag::Committees);
        Ok(())
    }

    async fn insert_proposer_duties(&self, epoch: Epoch, duties: &[ProposerDutyData]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for duty in duties {
            inner.proposer_duties.entry(duty.slot).or_insert(StoredDuty {
                epoch: epoch.0,
                validator_index: duty.validator_index,
            });
        }
        set_flag_inner(&mut inner, epoch, EpochFlag::ProposerDuties);
        Ok(())
    }

    async fn sync_committee_covering(&self, epoch: Epoch) -> Result<Option<SyncCommitteeRow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sync_committees
            .iter()
            .find(|(from, (to, _))| **from <= epoch.0 && epoch.0 <= *to)
            .map(|(from, (to, validator_ids))| SyncCommitteeRow {
                from_epoch: Epoch(*from),
                to_epoch: Epoch(*to),
                validator_ids: validator_ids.clone(),
            }))
    }

    async fn insert_sync_committee(
        &self,
        epoch: Epoch,
        from_epoch: Epoch,
        to_epoch: Epoch,
        validator_ids: &[u64],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .sync_committees
            .entry(from_epoch.0)
            .or_insert((to_epoch.0, validator_ids.to_vec()));
        set_flag_inner(&mut inner, epoch, EpochFlag::SyncCommittees);
        Ok(())
    }

    async fn ensure_epoch_slots(
        &self,
        epoch: Epoch,
        epoch_slots: (Slot, Slot),
        floor_slot: Slot,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for slot in epoch_slots.0 .0..=epoch_slots.1 .0 {
            if slot < floor_slot.0 {
                continue;
            }
            inner.slots.entry(slot).or_insert(StoredSlot {
                epoch: epoch.0,
                committees_count: 0,
            });
        }
        set_flag_inner(&mut inner, epoch, EpochFlag::Slots);
        Ok(())
    }

    async fn count_validators(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().unwrap().validators.len() as u64)
    }

    async fn upsert_validators(&self, validators: &[ValidatorData]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for validator in validators {
            inner.validators.insert(
                validator.index,
                StoredValidator {
                    status: validator.status,
                    balance: validator.balance,
                    effective_balance: validator.validator.effective_balance,
                    withdrawal_address: validator.withdrawal_address(),
                },
            );
        }
        Ok(())
    }

    async fn upsert_global_stats(&self, day_utc: NaiveDate, stats: &GlobalStats) -> Result<(), StoreError> {
        self.inner.lock().unwrap().global_stats.insert(day_utc, *stats);
        Ok(())
    }
}

#[derive(Default)]
pub struct CallCounts {
    pub validators: u32,
    pub validator_balances: u32,
    pub attestation_rewards: u32,
    pub committees: u32,
    pub proposer_duties: u32,
    pub sync_committees: u32,
}

/// Scripted beacon node: returns preset responses and counts calls.
pub struct StubBeacon {
    pub validators: Vec<ValidatorData>,
    pub balances: Vec<ValidatorBalanceData>,
    pub rewards: AttestationRewards,
    pub committees: Vec<CommitteeData>,
    pub duties: Vec<ProposerDutyData>,
    pub sync_committee: SyncCommitteeData,
    pub fail_committees: bool,
    pub calls: Mutex<CallCounts>,
}

impl Default for StubBeacon {
    fn default() -> Self {
        Self {
            validators: Vec::new(),
            balances: Vec::new(),
            rewards: AttestationRewards {
                ideal_rewards: Vec::new(),
                total_rewards: Vec::new(),
            },
            committees: Vec::new(),
            duties: Vec::new(),
            sync_committee: SyncCommitteeData { validators: Vec::new() },
            fail_committees: false,
            calls: Mutex::new(CallCounts::default()),
        }
    }
}

impl BeaconApi for StubBeacon {
    async fn get_validators(
        &self,
        _state: &StateRef,
        _ids: Option<&[u64]>,
        _statuses: Option<&[ValidatorStatus]>,
    ) -> Result<Vec<ValidatorData>, BeaconError> {
        self.calls.lock().unwrap().validators += 1;
        Ok(self.validators.clone())
    }

    async fn get_validator_balances(&self, _state: &StateRef) -> Result<Vec<ValidatorBalanceData>, BeaconError> {
        self.calls.lock().unwrap().validator_balances += 1;
        Ok(self.balances.clone())
    }

    async fn get_attestation_rewards(&self, _epoch: Epoch, _ids: &[u64]) -> Result<AttestationRewards, BeaconError> {
        self.calls.lock().unwrap().attestation_rewards += 1;
        Ok(self.rewards.clone())
    }

    async fn get_committees(&self, _epoch: Epoch) -> Result<Vec<CommitteeData>, BeaconError> {
        self.calls.lock().unwrap().committees += 1;
        if self.fail_committees {
            return Err(BeaconError::BadRequest {
                status: 404,
                url: "stub://committees".to_owned(),
            });
        }
        Ok(self.committees.clone())
    }

    async fn get_proposer_duties(&self, _epoch: Epoch) -> Result<Vec<ProposerDutyData>, BeaconError> {
        self.calls.lock().unwrap().proposer_duties += 1;
        Ok(self.duties.clone())
    }

    async fn get_sync_committees(&self, _period_start: Epoch) -> Result<SyncCommitteeData, BeaconError> {
        self.calls.lock().unwrap().sync_committees += 1;
        Ok(self.sync_committee.clone())
    }
}

pub fn test_clock() -> BeaconClock {
    BeaconClock::new(&Chain::Ethereum.get_config(), LOOKBACK_SLOT)
}

pub fn test_context(
    store: MemStore,
    beacon: StubBeacon,
) -> (PipelineContext<MemStore, StubBeacon>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = PipelineContext {
        store,
        beacon: Arc::new(beacon),
        clock: test_clock(),
        metrics: Arc::new(Metrics::new("test")),
        shutdown: shutdown_rx,
    };
    (ctx, shutdown_tx)
}
