use std::future::Future;
use std::time::Duration;

use beacon_indexer_shared::types::{Epoch, ValidatorStatus};

pub mod reqwest;
pub mod types;

use types::{
    AttestationRewards, CommitteeData, ProposerDutyData, SyncCommitteeData, ValidatorBalanceData, ValidatorData,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 4xx other than 429. Not retried.
    #[error("Beacon node rejected request to {url} with status {status}")]
    BadRequest { status: u16, url: String },

    /// Retries exhausted against one endpoint (5xx, timeouts, rate limiting).
    #[error("Beacon {endpoint} endpoint unavailable after {attempts} attempts: {reason}")]
    Unavailable {
        endpoint: &'static str,
        attempts: u32,
        reason: String,
    },

    #[error("Failed to decode beacon response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to initialize beacon client: {0}")]
pub struct InitializationError(#[from] ::reqwest::Error);

/// State selector for `/eth/v1/beacon/states/{state_id}/…` routes.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum StateRef {
    Head,
    Slot(beacon_indexer_shared::types::Slot),
}

impl StateRef {
    pub fn as_str(&self) -> String {
        match self {
            Self::Head => "head".to_owned(),
            Self::Slot(slot) => slot.0.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BeaconClientConfig {
    pub full_url: String,
    pub full_concurrency: usize,
    pub full_retries: u32,
    pub archive_url: String,
    pub archive_concurrency: usize,
    pub archive_retries: u32,
    pub base_delay: Duration,
}

impl BeaconClientConfig {
    pub fn new(full_url: &str, archive_url: &str, concurrency: usize) -> Self {
        Self {
            full_url: full_url.to_owned(),
            full_concurrency: concurrency,
            full_retries: 3,
            archive_url: archive_url.to_owned(),
            archive_concurrency: concurrency,
            archive_retries: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// The beacon node surface the epoch pipeline consumes. One implementation
/// talks HTTP (`reqwest::ReqwestBeaconClient`); tests script their own.
pub trait BeaconApi {
    fn get_validators(
        &self,
        state: &StateRef,
        ids: Option<&[u64]>,
        statuses: Option<&[ValidatorStatus]>,
    ) -> impl Future<Output = Result<Vec<ValidatorData>, Error>> + Send;

    fn get_validator_balances(
        &self,
        state: &StateRef,
    ) -> impl Future<Output = Result<Vec<ValidatorBalanceData>, Error>> + Send;

    fn get_attestation_rewards(
        &self,
        epoch: Epoch,
        ids: &[u64],
    ) -> impl Future<Output = Result<AttestationRewards, Error>> + Send;

    fn get_committees(&self, epoch: Epoch) -> impl Future<Output = Result<Vec<CommitteeData>, Error>> + Send;

    fn get_proposer_duties(&self, epoch: Epoch)
        -> impl Future<Output = Result<Vec<ProposerDutyData>, Error>> + Send;

    fn get_sync_committees(
        &self,
        period_start: Epoch,
    ) -> impl Future<Output = Result<SyncCommitteeData, Error>> + Send;
}
