use beacon_indexer_shared::types::ValidatorStatus;
use serde::{Deserialize, Serialize};

/// Standard beacon API envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorData {
    #[serde(with = "serde_utils::quoted_u64")]
    pub index: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub balance: u64,
    pub status: ValidatorStatus,
    pub validator: ValidatorDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorDetails {
    pub pubkey: String,
    pub withdrawal_credentials: String,
    #[serde(with = "serde_utils::quoted_u64")]
    pub effective_balance: u64,
    pub slashed: bool,
}

impl ValidatorData {
    /// Execution-layer withdrawal address, present once credentials were
    /// rotated to the 0x01/0x02 form (last 20 bytes of the credentials).
    pub fn withdrawal_address(&self) -> Option<String> {
        let raw = self.validator.withdrawal_credentials.trim_start_matches("0x");
        let bytes = hex::decode(raw).ok()?;
        if bytes.len() != 32 || (bytes[0] != 0x01 && bytes[0] != 0x02) {
            return None;
        }
        Some(format!("0x{}", hex::encode(&bytes[12..])))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorBalanceData {
    #[serde(with = "serde_utils::quoted_u64")]
    pub index: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdealAttestationRewards {
    #[serde(with = "serde_utils::quoted_u64")]
    pub effective_balance: u64,
    #[serde(with = "serde_utils::quoted_i64")]
    pub head: i64,
    #[serde(with = "serde_utils::quoted_i64")]
    pub target: i64,
    #[serde(with = "serde_utils::quoted_i64")]
    pub source: i64,
    #[serde(with = "serde_utils::quoted_i64", default)]
    pub inactivity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalAttestationRewards {
    #[serde(with = "serde_utils::quoted_u64")]
    pub validator_index: u64,
    #[serde(with = "serde_utils::quoted_i64")]
    pub head: i64,
    #[serde(with = "serde_utils::quoted_i64")]
    pub target: i64,
    #[serde(with = "serde_utils::quoted_i64")]
    pub source: i64,
    #[serde(with = "serde_utils::quoted_i64", default)]
    pub inactivity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationRewards {
    pub ideal_rewards: Vec<IdealAttestationRewards>,
    pub total_rewards: Vec<TotalAttestationRewards>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitteeData {
    #[serde(with = "serde_utils::quoted_u64")]
    pub index: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub slot: u64,
    #[serde(with = "serde_utils::quoted_u64_vec")]
    pub validators: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposerDutyData {
    pub pubkey: String,
    #[serde(with = "serde_utils::quoted_u64")]
    pub validator_index: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub slot: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCommitteeData {
    #[serde(with = "serde_utils::quoted_u64_vec")]
    pub validators: Vec<u64>,
}

/// Body for the POST variant of the validators route, used when the id list
/// would not fit in a query string.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatorsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statuses: Option<Vec<ValidatorStatus>>,
}

impl ValidatorsRequest {
    pub fn new(ids: Option<&[u64]>, statuses: Option<&[ValidatorStatus]>) -> Self {
        Self {
            ids: ids.map(|list| list.iter().map(|id| id.to_string()).collect()),
            statuses: statuses.map(|list| list.to_vec()),
        }
    }
}
