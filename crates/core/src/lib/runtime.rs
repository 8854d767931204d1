use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use beacon_indexer_shared::beacon_time::BeaconClock;
use beacon_indexer_shared::chain::{Chain, ChainConfig, ChainInfo, ChainParseError};
use beacon_indexer_shared::types::Slot;
use thiserror::Error;
use tokio::sync::watch;

use crate::beacon_client::reqwest::ReqwestBeaconClient;
use crate::beacon_client::{BeaconClientConfig, InitializationError};
use crate::env::{self, EnvVarValue};
use crate::pipeline::PipelineContext;
use crate::prometheus_metrics::Metrics;
use crate::store::{PgStore, StoreError};
use crate::tracing::LogFormat;

const DEFAULT_PROMETHEUS_NAMESPACE: &str = "beacon_indexer";
const DEFAULT_POOL_SIZE: u32 = 10;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read chain from env var: {0:?}")]
    FailedToParseChain(#[from] ChainParseError),

    #[error("Failed to create beacon client: {0:?}")]
    FailedToCreateBeaconClient(#[from] InitializationError),

    #[error("Failed to connect to the store: {0:?}")]
    FailedToConnectStore(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct EnvVars {
    pub log_format: EnvVarValue<LogFormat>,
    pub chain: EnvVarValue<String>,
    pub database_url: EnvVarValue<String>,
    pub consensus_full_api_url: EnvVarValue<String>,
    pub consensus_archive_api_url: EnvVarValue<String>,
    pub consensus_api_request_per_second: EnvVarValue<Option<u32>>,
    pub consensus_lookback_slot: EnvVarValue<u64>,
    pub service_bind_to_addr: EnvVarValue<SocketAddr>,
    pub prometheus_namespace: EnvVarValue<String>,
}

impl EnvVars {
    pub fn init_from_env_or_crash() -> Self {
        Self {
            log_format: env::LOG_FORMAT.default(LogFormat::Plain),
            chain: env::CHAIN.required(),
            database_url: env::DATABASE_URL.required(),
            consensus_full_api_url: env::CONSENSUS_FULL_API_URL.required(),
            consensus_archive_api_url: env::CONSENSUS_ARCHIVE_API_URL.required(),
            consensus_api_request_per_second: env::CONSENSUS_API_REQUEST_PER_SECOND.optional(),
            consensus_lookback_slot: env::CONSENSUS_LOOKBACK_SLOT.required(),
            service_bind_to_addr: env::SERVICE_BIND_TO_ADDR.default(SocketAddr::from(([0, 0, 0, 0], 8080))),
            prometheus_namespace: env::PROMETHEUS_NAMESPACE.default(DEFAULT_PROMETHEUS_NAMESPACE.to_owned()),
        }
    }

    pub fn for_logging(&self) -> HashMap<&'static str, String> {
        let mut result = HashMap::new();
        result.insert("log_format", format!("{:?}", self.log_format.value));
        result.insert("chain", self.chain.value.clone());
        result.insert("database_url", "<sensitive>".to_string());
        result.insert("consensus_full_api_url", "<sensitive>".to_string());
        result.insert("consensus_archive_api_url", "<sensitive>".to_string());
        result.insert(
            "consensus_api_request_per_second",
            format!("{:?}", self.consensus_api_request_per_second.value),
        );
        result.insert(
            "consensus_lookback_slot",
            self.consensus_lookback_slot.value.to_string(),
        );
        result.insert("service_bind_to_addr", self.service_bind_to_addr.value.to_string());
        result.insert("prometheus_namespace", self.prometheus_namespace.value.clone());
        result
    }
}

/// Everything the loops share, wired once at startup and effectively
/// immutable afterwards.
pub struct IndexerRuntime {
    pub chain: Chain,
    pub chain_config: ChainConfig,
    pub clock: BeaconClock,
    pub store: PgStore,
    pub beacon: Arc<ReqwestBeaconClient>,
    pub metrics: Arc<Metrics>,
}

impl IndexerRuntime {
    pub async fn init(env_vars: &EnvVars) -> Result<Self, Error> {
        let chain: Chain = env_vars.chain.value.parse()?;
        let chain_config = chain.get_config();
        let clock = BeaconClock::new(&chain_config, Slot(env_vars.consensus_lookback_slot.value));

        let metrics = Arc::new(Metrics::new(&env_vars.prometheus_namespace.value));
        metrics
            .metadata
            .network_chain
            .with_label_values(&[&chain.as_str()])
            .set(1.0);

        let concurrency = env_vars
            .consensus_api_request_per_second
            .value
            .unwrap_or(chain_config.api_request_per_second) as usize;
        let client_config = BeaconClientConfig::new(
            &env_vars.consensus_full_api_url.value,
            &env_vars.consensus_archive_api_url.value,
            concurrency,
        );
        let beacon = Arc::new(ReqwestBeaconClient::new(
            &client_config,
            clock.clone(),
            metrics.beacon.clone(),
        )?);

        let store = PgStore::connect(&env_vars.database_url.value, DEFAULT_POOL_SIZE).await?;

        Ok(Self {
            chain,
            chain_config,
            clock,
            store,
            beacon,
            metrics,
        })
    }

    pub fn pipeline_context(&self, shutdown: watch::Receiver<bool>) -> PipelineContext<PgStore, ReqwestBeaconClient> {
        PipelineContext {
            store: self.store.clone(),
            beacon: Arc::clone(&self.beacon),
            clock: self.clock.clone(),
            metrics: Arc::clone(&self.metrics),
            shutdown,
        }
    }
}
