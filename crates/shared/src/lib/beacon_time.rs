use thiserror::Error;

use crate::chain::ChainConfig;
use crate::types::{Epoch, Slot};

const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("Timestamp {timestamp_ms}ms is earlier than genesis {genesis_ms}ms")]
    BeforeGenesis { timestamp_ms: i64, genesis_ms: i64 },
}

/// Pure slot/epoch/timestamp arithmetic for one chain. Everything here is
/// total on slots and epochs; only wall-clock conversions can fail, and only
/// for timestamps predating genesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconClock {
    genesis_timestamp: u64,
    slot_duration_ms: u64,
    slots_per_epoch: u64,
    epochs_per_sync_committee_period: u64,
    slot_start_indexing: Slot,
}

impl BeaconClock {
    pub fn new(config: &ChainConfig, slot_start_indexing: Slot) -> Self {
        Self {
            genesis_timestamp: config.genesis_timestamp,
            slot_duration_ms: config.slot_duration_ms,
            slots_per_epoch: config.slots_per_epoch,
            epochs_per_sync_committee_period: config.epochs_per_sync_committee_period,
            slot_start_indexing,
        }
    }

    fn genesis_ms(&self) -> i64 {
        self.genesis_timestamp as i64 * 1000
    }

    pub fn slot_duration_ms(&self) -> u64 {
        self.slot_duration_ms
    }

    pub fn slots_per_epoch(&self) -> u64 {
        self.slots_per_epoch
    }

    pub fn slot_from_timestamp(&self, timestamp_ms: i64) -> Result<Slot, TimeError> {
        let since_genesis = timestamp_ms - self.genesis_ms();
        if since_genesis < 0 {
            return Err(TimeError::BeforeGenesis {
                timestamp_ms,
                genesis_ms: self.genesis_ms(),
            });
        }
        Ok(Slot(since_genesis as u64 / self.slot_duration_ms))
    }

    pub fn timestamp_from_slot(&self, slot: Slot) -> i64 {
        self.genesis_ms() + (slot.0 * self.slot_duration_ms) as i64
    }

    pub fn epoch_from_slot(&self, slot: Slot) -> Epoch {
        Epoch(slot.0 / self.slots_per_epoch)
    }

    pub fn epoch_from_timestamp(&self, timestamp_ms: i64) -> Result<Epoch, TimeError> {
        self.slot_from_timestamp(timestamp_ms)
            .map(|slot| self.epoch_from_slot(slot))
    }

    pub fn timestamp_from_epoch(&self, epoch: Epoch) -> i64 {
        self.genesis_ms() + (epoch.0 * self.slots_per_epoch * self.slot_duration_ms) as i64
    }

    /// First and last slot of an epoch, inclusive.
    pub fn epoch_slots(&self, epoch: Epoch) -> (Slot, Slot) {
        let first = Slot(epoch.0 * self.slots_per_epoch);
        (first, first + (self.slots_per_epoch - 1))
    }

    pub fn first_slot_of_epoch(&self, epoch: Epoch) -> Slot {
        self.epoch_slots(epoch).0
    }

    pub fn sync_committee_period_start(&self, epoch: Epoch) -> Epoch {
        let period = self.epochs_per_sync_committee_period;
        Epoch(epoch.0 / period * period)
    }

    pub fn sync_committee_period_end(&self, epoch: Epoch) -> Epoch {
        self.sync_committee_period_start(epoch) + (self.epochs_per_sync_committee_period - 1)
    }

    pub fn slot_start_indexing(&self) -> Slot {
        self.slot_start_indexing
    }

    /// The first epoch the indexer creates when the store is empty.
    pub fn first_epoch_to_index(&self) -> Epoch {
        self.epoch_from_slot(self.slot_start_indexing)
    }

    /// Start of the UTC hour containing the epoch's first slot, in ms.
    pub fn hour_containing_epoch(&self, epoch: Epoch) -> i64 {
        let ts = self.timestamp_from_epoch(epoch);
        ts - ts.rem_euclid(MILLIS_PER_HOUR)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::chain::{Chain, ChainInfo};

    fn mainnet_clock() -> BeaconClock {
        BeaconClock::new(&Chain::Ethereum.get_config(), Slot(1_000_000))
    }

    #[test]
    fn genesis_maps_to_slot_zero() {
        let clock = mainnet_clock();
        assert_eq!(clock.slot_from_timestamp(1606824000 * 1000).unwrap(), Slot(0));
        assert_eq!(clock.timestamp_from_slot(Slot(0)), 1606824000 * 1000);
    }

    #[test]
    fn pre_genesis_timestamp_is_rejected() {
        let clock = mainnet_clock();
        let err = clock.slot_from_timestamp(1606824000 * 1000 - 1).unwrap_err();
        assert!(matches!(err, TimeError::BeforeGenesis { .. }));
    }

    #[test]
    fn slot_within_duration_window_maps_back() {
        let clock = mainnet_clock();
        let base = clock.timestamp_from_slot(Slot(12345));
        assert_eq!(clock.slot_from_timestamp(base).unwrap(), Slot(12345));
        assert_eq!(clock.slot_from_timestamp(base + 11_999).unwrap(), Slot(12345));
        assert_eq!(clock.slot_from_timestamp(base + 12_000).unwrap(), Slot(12346));
    }

    #[test]
    fn lookback_slot_to_first_epoch() {
        let clock = mainnet_clock();
        assert_eq!(clock.first_epoch_to_index(), Epoch(31250));
    }

    #[test]
    fn epoch_slot_window() {
        let clock = mainnet_clock();
        let (first, last) = clock.epoch_slots(Epoch(31250));
        assert_eq!(first, Slot(1_000_000));
        assert_eq!(last, Slot(1_000_031));
    }

    #[test]
    fn epoch_timestamps_follow_slot_zero_of_epoch() {
        let clock = mainnet_clock();
        assert_eq!(
            clock.timestamp_from_epoch(Epoch(31250)),
            clock.timestamp_from_slot(Slot(1_000_000))
        );
    }

    #[test]
    fn hour_of_epoch_is_truncated() {
        let clock = mainnet_clock();
        let hour = clock.hour_containing_epoch(Epoch(31250));
        assert_eq!(hour % (3600 * 1000), 0);
        assert!(hour <= clock.timestamp_from_epoch(Epoch(31250)));
        assert!(hour + 3600 * 1000 > clock.timestamp_from_epoch(Epoch(31250)));
    }

    proptest! {
        #[test]
        fn slot_timestamp_roundtrip(slot in 0u64..100_000_000) {
            let clock = mainnet_clock();
            let ts = clock.timestamp_from_slot(Slot(slot));
            prop_assert_eq!(clock.slot_from_timestamp(ts).unwrap(), Slot(slot));
        }

        #[test]
        fn epoch_from_slot_matches_division(slot in 0u64..100_000_000) {
            let clock = mainnet_clock();
            prop_assert_eq!(clock.epoch_from_slot(Slot(slot)), Epoch(slot / 32));
        }

        #[test]
        fn sync_period_start_is_idempotent(epoch in 0u64..10_000_000) {
            let clock = mainnet_clock();
            let start = clock.sync_committee_period_start(Epoch(epoch));
            prop_assert_eq!(clock.sync_committee_period_start(start), start);
            prop_assert_eq!(start.0 % 256, 0);
            prop_assert!(start.0 <= epoch);
            prop_assert!(epoch < start.0 + 256);
        }

        #[test]
        fn epochs_in_same_window_share_period_start(epoch in 0u64..10_000_000, offset in 0u64..256) {
            let clock = mainnet_clock();
            let base = clock.sync_committee_period_start(Epoch(epoch));
            prop_assert_eq!(clock.sync_committee_period_start(base + offset), base);
        }
    }
}
