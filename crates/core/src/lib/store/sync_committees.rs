use beacon_indexer_shared::types::Epoch;

use super::{EpochFlag, PgStore, StoreError, SyncCommitteeRow};

impl PgStore {
    /// The sync-committee period row covering `epoch`, if one was stored by
    /// an earlier epoch of the same 256-epoch window.
    pub async fn sync_committee_covering(&self, epoch: Epoch) -> Result<Option<SyncCommitteeRow>, StoreError> {
        let row: Option<(i64, i64, Vec<i64>)> = sqlx::query_as(
            "SELECT from_epoch, to_epoch, validator_ids FROM sync_committees \
             WHERE from_epoch <= $1 AND to_epoch >= $1",
        )
        .bind(epoch.0 as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(from_epoch, to_epoch, validator_ids)| SyncCommitteeRow {
            from_epoch: Epoch(from_epoch as u64),
            to_epoch: Epoch(to_epoch as u64),
            validator_ids: validator_ids.into_iter().map(|id| id as u64).collect(),
        }))
    }

    /// Stores one full period and flips `sync_committees_fetched` for the
    /// epoch being processed, atomically.
    pub async fn insert_sync_committee(
        &self,
        epoch: Epoch,
        from_epoch: Epoch,
        to_epoch: Epoch,
        validator_ids: &[u64],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<i64> = validator_ids.iter().map(|id| *id as i64).collect();
        sqlx::query(
            "INSERT INTO sync_committees (from_epoch, to_epoch, validator_ids) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (from_epoch) DO NOTHING",
        )
        .bind(from_epoch.0 as i64)
        .bind(to_epoch.0 as i64)
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE epochs SET {} = TRUE WHERE epoch = $1",
            EpochFlag::SyncCommittees.column()
        ))
        .bind(epoch.0 as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
