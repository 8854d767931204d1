use beacon_indexer_shared::types::Epoch;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod committees;
pub mod epochs;
pub mod rewards;
pub mod sync_committees;
pub mod validators;

/// Rows written per statement in bulk operations. Keeps bind arrays well
/// under the Postgres message size the pool is comfortable with.
pub(crate) const WRITE_CHUNK: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// All persistence goes through this handle; no SQL crosses its boundary.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// One progress flag on an epoch row. Every processor step owns exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpochFlag {
    ValidatorsBalances,
    Rewards,
    Committees,
    ProposerDuties,
    SyncCommittees,
    Slots,
}

impl EpochFlag {
    pub const ALL: [EpochFlag; 6] = [
        EpochFlag::ValidatorsBalances,
        EpochFlag::Rewards,
        EpochFlag::Committees,
        EpochFlag::ProposerDuties,
        EpochFlag::SyncCommittees,
        EpochFlag::Slots,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Self::ValidatorsBalances => "validators_balances_fetched",
            Self::Rewards => "rewards_fetched",
            Self::Committees => "committees_fetched",
            Self::ProposerDuties => "proposer_duties_fetched",
            Self::SyncCommittees => "sync_committees_fetched",
            Self::Slots => "slots_fetched",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpochFlags {
    pub validators_balances_fetched: bool,
    pub rewards_fetched: bool,
    pub committees_fetched: bool,
    pub proposer_duties_fetched: bool,
    pub sync_committees_fetched: bool,
    pub slots_fetched: bool,
}

impl EpochFlags {
    pub fn get(&self, flag: EpochFlag) -> bool {
        match flag {
            EpochFlag::ValidatorsBalances => self.validators_balances_fetched,
            EpochFlag::Rewards => self.rewards_fetched,
            EpochFlag::Committees => self.committees_fetched,
            EpochFlag::ProposerDuties => self.proposer_duties_fetched,
            EpochFlag::SyncCommittees => self.sync_committees_fetched,
            EpochFlag::Slots => self.slots_fetched,
        }
    }

    pub fn set(&mut self, flag: EpochFlag) {
        match flag {
            EpochFlag::ValidatorsBalances => self.validators_balances_fetched = true,
            EpochFlag::Rewards => self.rewards_fetched = true,
            EpochFlag::Committees => self.committees_fetched = true,
            EpochFlag::ProposerDuties => self.proposer_duties_fetched = true,
            EpochFlag::SyncCommittees => self.sync_committees_fetched = true,
            EpochFlag::Slots => self.slots_fetched = true,
        }
    }

    /// An epoch is fully processed iff every flag is set.
    pub fn all_done(&self) -> bool {
        EpochFlag::ALL.iter().all(|flag| self.get(*flag))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochRow {
    pub epoch: Epoch,
    pub flags: EpochFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCommitteeRow {
    pub from_epoch: Epoch,
    pub to_epoch: Epoch,
    pub validator_ids: Vec<u64>,
}

impl SyncCommitteeRow {
    pub fn covers(&self, epoch: Epoch) -> bool {
        self.from_epoch <= epoch && epoch <= self.to_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_cover_all_six_columns() {
        let mut flags = EpochFlags::default();
        assert!(!flags.all_done());
        for (i, flag) in EpochFlag::ALL.iter().enumerate() {
            assert!(!flags.get(*flag));
            flags.set(*flag);
            assert!(flags.get(*flag));
            assert_eq!(flags.all_done(), i == EpochFlag::ALL.len() - 1);
        }
    }

    #[test]
    fn flag_columns_are_distinct() {
        let mut columns: Vec<&str> = EpochFlag::ALL.iter().map(|f| f.column()).collect();
        columns.sort();
        columns.dedup();
        assert_eq!(columns.len(), 6);
    }

    #[test]
    fn sync_committee_row_coverage() {
        let row = SyncCommitteeRow {
            from_epoch: Epoch(31232),
            to_epoch: Epoch(31487),
            validator_ids: vec![],
        };
        assert!(row.covers(Epoch(31232)));
        assert!(row.covers(Epoch(31250)));
        assert!(row.covers(Epoch(31487)));
        assert!(!row.covers(Epoch(31488)));
        assert!(!row.covers(Epoch(31231)));
    }
}
