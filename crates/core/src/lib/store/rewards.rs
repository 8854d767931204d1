use std::collections::HashSet;

use beacon_indexer_shared::types::Epoch;
use chrono::{DateTime, Utc};

use crate::beacon_client::types::{IdealAttestationRewards, TotalAttestationRewards};

use super::{EpochFlag, PgStore, StoreError, WRITE_CHUNK};

/// One validator's attestation outcome for one epoch, ready to aggregate.
/// Missed components are clamped: `missed = max(0, ideal - actual)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorEpochRewards {
    pub validator_id: u64,
    pub head: i64,
    pub target: i64,
    pub source: i64,
    pub inactivity: i64,
    pub missed_head: i64,
    pub missed_target: i64,
    pub missed_source: i64,
    pub missed_inactivity: i64,
}

impl ValidatorEpochRewards {
    pub fn from_actual_and_ideal(actual: &TotalAttestationRewards, ideal: &IdealAttestationRewards) -> Self {
        Self {
            validator_id: actual.validator_index,
            head: actual.head,
            target: actual.target,
            source: actual.source,
            inactivity: actual.inactivity,
            missed_head: (ideal.head - actual.head).max(0),
            missed_target: (ideal.target - actual.target).max(0),
            missed_source: (ideal.source - actual.source).max(0),
            missed_inactivity: (ideal.inactivity - actual.inactivity).max(0),
        }
    }

    /// The nine-field record appended to `hourly_validator_data`:
    /// `epoch:head:target:source:inactivity:missedHead:missedTarget:missedSource:missedInactivity`.
    pub fn record(&self, epoch: Epoch) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:{}",
            epoch,
            self.head,
            self.target,
            self.source,
            self.inactivity,
            self.missed_head,
            self.missed_target,
            self.missed_source,
            self.missed_inactivity
        )
    }

    pub fn cl_rewards(&self) -> i64 {
        self.head + self.target + self.source + self.inactivity
    }

    pub fn cl_missed_rewards(&self) -> i64 {
        self.missed_head + self.missed_target + self.missed_source + self.missed_inactivity
    }
}

/// LIKE patterns matching an hourly `epoch_rewards` value that already holds
/// a record for `epoch` — either as the first record or after a comma. The
/// leading separator keeps epoch 1250 from matching inside 31250.
pub(crate) fn epoch_record_patterns(epoch: Epoch) -> (String, String) {
    (format!("{epoch}:%"), format!("%,{epoch}:%"))
}

impl PgStore {
    /// The per-epoch rewards-and-aggregation write. In one transaction:
    /// append each validator's record to its hourly `epoch_rewards` list,
    /// accumulate `cl_rewards`/`cl_missed_rewards`, and flip
    /// `rewards_fetched`. Validators whose hourly row already carries a
    /// record for this epoch are skipped entirely, so re-running the step
    /// after a crash never double-counts. Returns how many validators were
    /// actually applied.
    pub async fn apply_epoch_rewards(
        &self,
        epoch: Epoch,
        hour: DateTime<Utc>,
        rewards: &[ValidatorEpochRewards],
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (prefix, infix) = epoch_record_patterns(epoch);
        let already_applied: Vec<i64> = sqlx::query_scalar(
            "SELECT validator_id FROM hourly_validator_data \
             WHERE datetime = $1 AND (epoch_rewards LIKE $2 OR epoch_rewards LIKE $3)",
        )
        .bind(hour)
        .bind(&prefix)
        .bind(&infix)
        .fetch_all(&mut *tx)
        .await?;
        let skip: HashSet<u64> = already_applied.into_iter().map(|id| id as u64).collect();

        let fresh: Vec<&ValidatorEpochRewards> = rewards
            .iter()
            .filter(|reward| !skip.contains(&reward.validator_id))
            .collect();

        for chunk in fresh.chunks(WRITE_CHUNK) {
            let ids: Vec<i64> = chunk.iter().map(|r| r.validator_id as i64).collect();
            let records: Vec<String> = chunk.iter().map(|r| r.record(epoch)).collect();
            let cl_rewards: Vec<i64> = chunk.iter().map(|r| r.cl_rewards()).collect();
            let cl_missed: Vec<i64> = chunk.iter().map(|r| r.cl_missed_rewards()).collect();

            sqlx::query(
                "INSERT INTO hourly_validator_data (validator_id, datetime, epoch_rewards) \
                 SELECT t.validator_id, $2, t.record \
                 FROM UNNEST($1::bigint[], $3::text[]) AS t(validator_id, record) \
                 ON CONFLICT (validator_id, datetime) DO UPDATE \
                 SET epoch_rewards = hourly_validator_data.epoch_rewards || ',' || EXCLUDED.epoch_rewards",
            )
            .bind(&ids)
            .bind(hour)
            .bind(&records)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO hourly_validator_stats (validator_id, datetime, cl_rewards, cl_missed_rewards) \
                 SELECT t.validator_id, $2, t.cl_rewards, t.cl_missed_rewards \
                 FROM UNNEST($1::bigint[], $3::bigint[], $4::bigint[]) AS t(validator_id, cl_rewards, cl_missed_rewards) \
                 ON CONFLICT (validator_id, datetime) DO UPDATE \
                 SET cl_rewards = hourly_validator_stats.cl_rewards + EXCLUDED.cl_rewards, \
                 cl_missed_rewards = hourly_validator_stats.cl_missed_rewards + EXCLUDED.cl_missed_rewards",
            )
            .bind(&ids)
            .bind(hour)
            .bind(&cl_rewards)
            .bind(&cl_missed)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(&format!(
            "UPDATE epochs SET {} = TRUE WHERE epoch = $1",
            EpochFlag::Rewards.column()
        ))
        .bind(epoch.0 as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(fresh.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ideal() -> IdealAttestationRewards {
        IdealAttestationRewards {
            effective_balance: 32_000_000_000,
            head: 10,
            target: 25,
            source: 30,
            inactivity: 0,
        }
    }

    fn actual(validator_index: u64, head: i64, target: i64, source: i64, inactivity: i64) -> TotalAttestationRewards {
        TotalAttestationRewards {
            validator_index,
            head,
            target,
            source,
            inactivity,
        }
    }

    #[test]
    fn fully_attesting_validator_misses_only_the_target_gap() {
        let rewards = ValidatorEpochRewards::from_actual_and_ideal(&actual(1, 10, 20, 30, 0), &ideal());
        assert_eq!(rewards.record(Epoch(31250)), "31250:10:20:30:0:0:5:0:0");
        assert_eq!(rewards.cl_rewards(), 60);
        assert_eq!(rewards.cl_missed_rewards(), 5);
    }

    #[test]
    fn negative_missed_components_are_clamped_to_zero() {
        // Actual inactivity exceeds the ideal of 0, so the missed component
        // clamps rather than going negative.
        let rewards = ValidatorEpochRewards::from_actual_and_ideal(&actual(2, 5, 5, 5, 5), &ideal());
        assert_eq!(rewards.record(Epoch(31250)), "31250:5:5:5:5:5:20:25:0");
        assert_eq!(rewards.cl_rewards(), 20);
        assert_eq!(rewards.cl_missed_rewards(), 50);
    }

    #[test]
    fn penalties_flow_through_as_negative_actuals() {
        let rewards = ValidatorEpochRewards::from_actual_and_ideal(&actual(3, -10, -20, 0, 0), &ideal());
        assert_eq!(rewards.record(Epoch(1)), "1:-10:-20:0:0:20:45:30:0");
        assert_eq!(rewards.cl_rewards(), -30);
        assert_eq!(rewards.cl_missed_rewards(), 95);
    }

    #[test]
    fn record_patterns_do_not_match_other_epochs() {
        let (prefix, infix) = epoch_record_patterns(Epoch(1250));
        assert_eq!(prefix, "1250:%");
        assert_eq!(infix, "%,1250:%");

        // What the SQL LIKE would see for an hour already holding 31250.
        let value = "31250:10:20:30:0:0:5:0:0";
        assert!(!value.starts_with("1250:"));
        assert!(!value.contains(",1250:"));

        let appended = format!("{value},1250:1:2:3:0:0:0:0:0");
        assert!(appended.contains(",1250:"));
    }
}
