use beacon_indexer_shared::types::Epoch;

use super::{EpochFlag, EpochFlags, EpochRow, PgStore, StoreError};

/// Predicate shared by every "unprocessed" query.
const NOT_FULLY_PROCESSED: &str = "NOT (validators_balances_fetched \
     AND rewards_fetched \
     AND committees_fetched \
     AND proposer_duties_fetched \
     AND sync_committees_fetched \
     AND slots_fetched)";

impl PgStore {
    pub async fn last_epoch(&self) -> Result<Option<Epoch>, StoreError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(epoch) FROM epochs")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.map(|epoch| Epoch(epoch as u64)))
    }

    pub async fn count_unprocessed_epochs(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM epochs WHERE {NOT_FULLY_PROCESSED}"
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    /// Inserts epoch rows with every progress flag false. Rows already
    /// present are left untouched.
    pub async fn insert_epochs(&self, epochs: &[Epoch]) -> Result<(), StoreError> {
        if epochs.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = epochs.iter().map(|epoch| epoch.0 as i64).collect();
        sqlx::query(
            "INSERT INTO epochs (epoch, validators_balances_fetched, rewards_fetched, \
             committees_fetched, proposer_duties_fetched, sync_committees_fetched, slots_fetched) \
             SELECT t.epoch, FALSE, FALSE, FALSE, FALSE, FALSE, FALSE \
             FROM UNNEST($1::bigint[]) AS t(epoch) \
             ON CONFLICT (epoch) DO NOTHING",
        )
        .bind(&ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The smallest epoch whose flag conjunction is still false; the next
    /// epoch the orchestrator will hand to a processor.
    pub async fn min_unprocessed_epoch(&self) -> Result<Option<EpochRow>, StoreError> {
        let row: Option<(i64, bool, bool, bool, bool, bool, bool)> = sqlx::query_as(&format!(
            "SELECT epoch, validators_balances_fetched, rewards_fetched, committees_fetched, \
             proposer_duties_fetched, sync_committees_fetched, slots_fetched \
             FROM epochs WHERE {NOT_FULLY_PROCESSED} ORDER BY epoch ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(epoch, validators_balances, rewards, committees, proposer_duties, sync_committees, slots)| EpochRow {
                epoch: Epoch(epoch as u64),
                flags: EpochFlags {
                    validators_balances_fetched: validators_balances,
                    rewards_fetched: rewards,
                    committees_fetched: committees,
                    proposer_duties_fetched: proposer_duties,
                    sync_committees_fetched: sync_committees,
                    slots_fetched: slots,
                },
            },
        ))
    }

    pub async fn set_epoch_flag(&self, epoch: Epoch, flag: EpochFlag) -> Result<(), StoreError> {
        sqlx::query(&format!("UPDATE epochs SET {} = TRUE WHERE epoch = $1", flag.column()))
            .bind(epoch.0 as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
