use std::collections::HashMap;

use beacon_indexer_shared::types::{Epoch, ValidatorStatus};
use chrono::NaiveDate;

use crate::beacon_client::types::{ValidatorBalanceData, ValidatorData};

use super::{EpochFlag, PgStore, StoreError, WRITE_CHUNK};

/// Daily aggregate over the whole validator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalStats {
    pub pending_validators: u64,
    pub active_validators: u64,
    pub exiting_validators: u64,
    pub slashed_validators: u64,
    pub exited_validators: u64,
    pub withdrawal_validators: u64,
    pub average_balance: u64,
    pub average_effective_balance: u64,
}

impl GlobalStats {
    pub fn from_validators(validators: &[ValidatorData]) -> Self {
        let mut stats = GlobalStats::default();
        let mut balance_sum: u128 = 0;
        let mut effective_sum: u128 = 0;
        for validator in validators {
            match validator.status {
                ValidatorStatus::PendingInitialized | ValidatorStatus::PendingQueued => {
                    stats.pending_validators += 1
                }
                ValidatorStatus::ActiveOngoing => stats.active_validators += 1,
                ValidatorStatus::ActiveExiting => stats.exiting_validators += 1,
                ValidatorStatus::ActiveSlashed => stats.slashed_validators += 1,
                ValidatorStatus::ExitedUnslashed | ValidatorStatus::ExitedSlashed => stats.exited_validators += 1,
                ValidatorStatus::WithdrawalPossible | ValidatorStatus::WithdrawalDone => {
                    stats.withdrawal_validators += 1
                }
            }
            balance_sum += validator.balance as u128;
            effective_sum += validator.validator.effective_balance as u128;
        }
        if !validators.is_empty() {
            stats.average_balance = (balance_sum / validators.len() as u128) as u64;
            stats.average_effective_balance = (effective_sum / validators.len() as u128) as u64;
        }
        stats
    }
}

impl PgStore {
    pub async fn count_validators(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM validators")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn upsert_validators(&self, validators: &[ValidatorData]) -> Result<(), StoreError> {
        for chunk in validators.chunks(WRITE_CHUNK) {
            let ids: Vec<i64> = chunk.iter().map(|v| v.index as i64).collect();
            let withdrawal_addresses: Vec<Option<String>> = chunk.iter().map(|v| v.withdrawal_address()).collect();
            let statuses: Vec<String> = chunk.iter().map(|v| v.status.as_str().to_owned()).collect();
            let balances: Vec<i64> = chunk.iter().map(|v| v.balance as i64).collect();
            let effective_balances: Vec<i64> = chunk.iter().map(|v| v.validator.effective_balance as i64).collect();

            sqlx::query(
                "INSERT INTO validators (id, withdrawal_address, status, balance, effective_balance) \
                 SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::text[], $4::bigint[], $5::bigint[]) \
                 ON CONFLICT (id) DO UPDATE SET \
                 withdrawal_address = EXCLUDED.withdrawal_address, \
                 status = EXCLUDED.status, \
                 balance = EXCLUDED.balance, \
                 effective_balance = EXCLUDED.effective_balance",
            )
            .bind(&ids)
            .bind(&withdrawal_addresses)
            .bind(&statuses)
            .bind(&balances)
            .bind(&effective_balances)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Ids of validators that attest this epoch, ascending.
    pub async fn attesting_validator_ids(&self) -> Result<Vec<u64>, StoreError> {
        let statuses: Vec<String> = ValidatorStatus::ATTESTING
            .iter()
            .map(|status| status.as_str().to_owned())
            .collect();
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM validators WHERE status = ANY($1::text[]) ORDER BY id")
            .bind(&statuses)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(|id| id as u64).collect())
    }

    pub async fn effective_balances(&self, ids: &[u64]) -> Result<HashMap<u64, u64>, StoreError> {
        let mut result = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(WRITE_CHUNK) {
            let chunk_ids: Vec<i64> = chunk.iter().map(|id| *id as i64).collect();
            let rows: Vec<(i64, i64)> =
                sqlx::query_as("SELECT id, effective_balance FROM validators WHERE id = ANY($1::bigint[])")
                    .bind(&chunk_ids)
                    .fetch_all(&self.pool)
                    .await?;
            result.extend(rows.into_iter().map(|(id, balance)| (id as u64, balance as u64)));
        }
        Ok(result)
    }

    /// Per-validator balance snapshot at the epoch's first slot, and the
    /// `validators_balances_fetched` flag, in one transaction.
    pub async fn insert_validator_balances(
        &self,
        epoch: Epoch,
        balances: &[ValidatorBalanceData],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for chunk in balances.chunks(WRITE_CHUNK) {
            let ids: Vec<i64> = chunk.iter().map(|b| b.index as i64).collect();
            let amounts: Vec<i64> = chunk.iter().map(|b| b.balance as i64).collect();
            sqlx::query(
                "INSERT INTO validator_balances (validator_id, epoch, balance) \
                 SELECT t.id, $2, t.balance FROM UNNEST($1::bigint[], $3::bigint[]) AS t(id, balance) \
                 ON CONFLICT (validator_id, epoch) DO NOTHING",
            )
            .bind(&ids)
            .bind(epoch.0 as i64)
            .bind(&amounts)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(&format!(
            "UPDATE epochs SET {} = TRUE WHERE epoch = $1",
            EpochFlag::ValidatorsBalances.column()
        ))
        .bind(epoch.0 as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert_global_stats(&self, day_utc: NaiveDate, stats: &GlobalStats) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO global_stats (day_utc, pending_validators, active_validators, exiting_validators, \
             slashed_validators, exited_validators, withdrawal_validators, average_balance, average_effective_balance) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (day_utc) DO UPDATE SET \
             pending_validators = EXCLUDED.pending_validators, \
             active_validators = EXCLUDED.active_validators, \
             exiting_validators = EXCLUDED.exiting_validators, \
             slashed_validators = EXCLUDED.slashed_validators, \
             exited_validators = EXCLUDED.exited_validators, \
             withdrawal_validators = EXCLUDED.withdrawal_validators, \
             average_balance = EXCLUDED.average_balance, \
             average_effective_balance = EXCLUDED.average_effective_balance",
        )
        .bind(day_utc)
        .bind(stats.pending_validators as i64)
        .bind(stats.active_validators as i64)
        .bind(stats.exiting_validators as i64)
        .bind(stats.slashed_validators as i64)
        .bind(stats.exited_validators as i64)
        .bind(stats.withdrawal_validators as i64)
        .bind(stats.average_balance as i64)
        .bind(stats.average_effective_balance as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
