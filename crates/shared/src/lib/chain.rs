use thiserror::Error;

/// Static per-chain parameters. Both supported chains run 12-second slots,
/// 32-slot epochs and 256-epoch sync-committee periods; they differ in
/// genesis timestamp and chain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Unix timestamp of slot 0, in seconds.
    pub genesis_timestamp: u64,
    pub slot_duration_ms: u64,
    pub slots_per_epoch: u64,
    pub epochs_per_sync_committee_period: u64,
    /// Default per-endpoint request concurrency for the beacon client.
    pub api_request_per_second: u32,
    pub max_attestation_delay: u64,
    pub delay_slots_to_head: u64,
}

pub trait ChainInfo {
    fn as_str(&self) -> String;
    fn get_config(&self) -> ChainConfig;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chain {
    Ethereum,
    Gnosis,
}

#[derive(Debug, Error)]
#[error("Unknown chain {0}")]
pub struct ChainParseError(String);

impl std::str::FromStr for Chain {
    type Err = ChainParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "ethereum" => Ok(Self::Ethereum),
            "gnosis" => Ok(Self::Gnosis),
            other => Err(ChainParseError(other.to_owned())),
        }
    }
}

impl ChainInfo for Chain {
    fn as_str(&self) -> String {
        let val = match self {
            Self::Ethereum => "ethereum",
            Self::Gnosis => "gnosis",
        };
        val.to_owned()
    }

    fn get_config(&self) -> ChainConfig {
        match self {
            Self::Ethereum => ChainConfig {
                chain_id: 1,
                genesis_timestamp: 1606824000,
                ..Self::common_config()
            },
            Self::Gnosis => ChainConfig {
                chain_id: 100,
                genesis_timestamp: 1638993340,
                ..Self::common_config()
            },
        }
    }
}

impl Chain {
    fn common_config() -> ChainConfig {
        ChainConfig {
            chain_id: 0,
            genesis_timestamp: 0,
            slot_duration_ms: 12_000,
            slots_per_epoch: 32,
            epochs_per_sync_committee_period: 256,
            api_request_per_second: 10,
            max_attestation_delay: 2,
            delay_slots_to_head: 2,
        }
    }
}
