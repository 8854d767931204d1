use beacon_indexer_shared::types::{Epoch, Slot};
use itertools::Itertools;

use crate::beacon_client::types::{CommitteeData, ProposerDutyData};

use super::{EpochFlag, PgStore, StoreError};

/// Slot numbers of the epoch that are at or above the indexing floor.
fn indexable_slots(epoch_slots: (Slot, Slot), floor_slot: Slot) -> Vec<i64> {
    (epoch_slots.0 .0..=epoch_slots.1 .0)
        .filter(|slot| *slot >= floor_slot.0)
        .map(|slot| slot as i64)
        .collect()
}

impl PgStore {
    /// Slot rows, committee rows, per-slot committee counts and the
    /// `committees_fetched` flag, all in one transaction.
    pub async fn apply_committees(
        &self,
        epoch: Epoch,
        epoch_slots: (Slot, Slot),
        floor_slot: Slot,
        committees: &[CommitteeData],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let slots = indexable_slots(epoch_slots, floor_slot);
        sqlx::query(
            "INSERT INTO slots (slot, epoch, committees_count) \
             SELECT t.slot, $2, 0 FROM UNNEST($1::bigint[]) AS t(slot) \
             ON CONFLICT (slot) DO NOTHING",
        )
        .bind(&slots)
        .bind(epoch.0 as i64)
        .execute(&mut *tx)
        .await?;

        for committee in committees {
            let validator_ids: Vec<i64> = committee.validators.iter().map(|id| *id as i64).collect();
            sqlx::query(
                "INSERT INTO committees (epoch, slot, committee_index, validator_ids) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (slot, committee_index) DO NOTHING",
            )
            .bind(epoch.0 as i64)
            .bind(committee.slot as i64)
            .bind(committee.index as i64)
            .bind(&validator_ids)
            .execute(&mut *tx)
            .await?;
        }

        let counts = committees.iter().map(|committee| committee.slot).counts();
        let (count_slots, count_values): (Vec<i64>, Vec<i32>) = counts
            .into_iter()
            .sorted()
            .map(|(slot, count)| (slot as i64, count as i32))
            .unzip();
        sqlx::query(
            "UPDATE slots SET committees_count = t.committees_count \
             FROM UNNEST($1::bigint[], $2::int[]) AS t(slot, committees_count) \
             WHERE slots.slot = t.slot",
        )
        .bind(&count_slots)
        .bind(&count_values)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE epochs SET {} = TRUE WHERE epoch = $1",
            EpochFlag::Committees.column()
        ))
        .bind(epoch.0 as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// One proposer duty per slot of the epoch, plus the flag, atomically.
    pub async fn insert_proposer_duties(&self, epoch: Epoch, duties: &[ProposerDutyData]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let slots: Vec<i64> = duties.iter().map(|duty| duty.slot as i64).collect();
        let validator_indices: Vec<i64> = duties.iter().map(|duty| duty.validator_index as i64).collect();
        sqlx::query(
            "INSERT INTO proposer_duties (epoch, slot, validator_index) \
             SELECT $1, t.slot, t.validator_index FROM UNNEST($2::bigint[], $3::bigint[]) AS t(slot, validator_index) \
             ON CONFLICT (slot) DO NOTHING",
        )
        .bind(epoch.0 as i64)
        .bind(&slots)
        .bind(&validator_indices)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE epochs SET {} = TRUE WHERE epoch = $1",
            EpochFlag::ProposerDuties.column()
        ))
        .bind(epoch.0 as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Backstop for the processor's final step: any slot row of the epoch
    /// still missing is created, then `slots_fetched` flips.
    pub async fn ensure_epoch_slots(
        &self,
        epoch: Epoch,
        epoch_slots: (Slot, Slot),
        floor_slot: Slot,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let slots = indexable_slots(epoch_slots, floor_slot);
        sqlx::query(
            "INSERT INTO slots (slot, epoch, committees_count) \
             SELECT t.slot, $2, 0 FROM UNNEST($1::bigint[]) AS t(slot) \
             ON CONFLICT (slot) DO NOTHING",
        )
        .bind(&slots)
        .bind(epoch.0 as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE epochs SET {} = TRUE WHERE epoch = $1",
            EpochFlag::Slots.column()
        ))
        .bind(epoch.0 as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_below_the_floor_are_skipped() {
        let window = (Slot(1_000_000), Slot(1_000_031));
        assert_eq!(indexable_slots(window, Slot(0)).len(), 32);
        assert_eq!(indexable_slots(window, Slot(1_000_000)).len(), 32);
        assert_eq!(indexable_slots(window, Slot(1_000_016)).len(), 16);
        assert!(indexable_slots(window, Slot(2_000_000)).is_empty());
    }
}
