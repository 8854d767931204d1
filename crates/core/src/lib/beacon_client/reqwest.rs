use std::time::Duration;

use beacon_indexer_shared::beacon_time::BeaconClock;
use beacon_indexer_shared::types::{Epoch, Slot, ValidatorStatus};
use itertools::Itertools;
use rand::Rng;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;

use crate::prometheus_metrics;

use super::types::{
    ApiResponse, AttestationRewards, CommitteeData, ProposerDutyData, SyncCommitteeData, ValidatorBalanceData,
    ValidatorData, ValidatorsRequest,
};
use super::{BeaconApi, BeaconClientConfig, Error, InitializationError, StateRef};

/// Above this many validator ids the id list no longer fits a query string
/// and the POST-with-body variant of the route is used.
const MAX_IDS_IN_QUERY: usize = 64;

/// Slots behind the wall clock beyond which state queries route to the
/// archive endpoint. Full nodes typically serve about a day of history.
const RECENT_SLOT_WINDOW: u64 = 8192;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

struct Endpoint {
    name: &'static str,
    base_url: String,
    permits: Semaphore,
    retries: u32,
}

impl Endpoint {
    fn new(name: &'static str, base_url: &str, concurrency: usize, retries: u32) -> Self {
        Self {
            name,
            base_url: normalize_url(base_url),
            permits: Semaphore::new(concurrency),
            retries,
        }
    }
}

fn normalize_url(base_url: &str) -> String {
    base_url.strip_suffix('/').unwrap_or(base_url).to_owned()
}

pub(crate) fn routes_to_archive(head_slot: Slot, target_slot: Slot) -> bool {
    head_slot.0.saturating_sub(target_slot.0) > RECENT_SLOT_WINDOW
}

pub(crate) fn use_post_body(ids: Option<&[u64]>) -> bool {
    ids.map_or(false, |list| list.len() > MAX_IDS_IN_QUERY)
}

fn jittered(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(0.8..=1.2);
    delay.mul_f64(factor)
}

pub struct ReqwestBeaconClient {
    client: Client,
    full: Endpoint,
    archive: Endpoint,
    base_delay: Duration,
    clock: BeaconClock,
    metrics: prometheus_metrics::Service,
}

impl ReqwestBeaconClient {
    pub fn new(
        config: &BeaconClientConfig,
        clock: BeaconClock,
        metrics: prometheus_metrics::Service,
    ) -> Result<Self, InitializationError> {
        let client = ClientBuilder::new().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            full: Endpoint::new("full", &config.full_url, config.full_concurrency, config.full_retries),
            archive: Endpoint::new(
                "archive",
                &config.archive_url,
                config.archive_concurrency,
                config.archive_retries,
            ),
            base_delay: config.base_delay,
            clock,
            metrics,
        })
    }

    fn endpoint_for(&self, state: &StateRef) -> &Endpoint {
        match state {
            StateRef::Head => &self.full,
            StateRef::Slot(slot) => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                match self.clock.slot_from_timestamp(now_ms) {
                    Ok(head_slot) if routes_to_archive(head_slot, *slot) => &self.archive,
                    _ => &self.full,
                }
            }
        }
    }

    fn endpoint_for_epoch(&self, epoch: Epoch) -> &Endpoint {
        let (_, last_slot) = self.clock.epoch_slots(epoch);
        self.endpoint_for(&StateRef::Slot(last_slot))
    }

    /// Sends a request, retrying transient failures with exponential backoff
    /// and ±20% jitter up to the endpoint's retry budget. A 429 widens the
    /// backoff of the current call by an extra factor of two. The request is
    /// rebuilt for every attempt.
    async fn execute<F>(&self, endpoint: &Endpoint, operation: &'static str, build: F) -> Result<Response, Error>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let _permit = endpoint
            .permits
            .acquire()
            .await
            .expect("endpoint semaphore is never closed");

        self.metrics
            .call_count
            .with_label_values(&[operation, endpoint.name])
            .inc();

        let mut delay = self.base_delay;
        let mut attempt: u32 = 0;
        loop {
            let outcome = build(&self.client, &endpoint.base_url).send().await;
            let reason = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        self.metrics
                            .status
                            .with_label_values(&[operation, prometheus_metrics::outcome::SUCCESS])
                            .inc();
                        return Ok(response);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        delay *= 2;
                        format!("rate limited ({status})")
                    } else if status.is_client_error() {
                        self.metrics
                            .status
                            .with_label_values(&[operation, prometheus_metrics::outcome::ERROR])
                            .inc();
                        return Err(Error::BadRequest {
                            status: status.as_u16(),
                            url: response.url().to_string(),
                        });
                    } else {
                        format!("status {status}")
                    }
                }
                Err(e) if e.is_builder() => {
                    self.metrics
                        .status
                        .with_label_values(&[operation, prometheus_metrics::outcome::ERROR])
                        .inc();
                    return Err(Error::Unavailable {
                        endpoint: endpoint.name,
                        attempts: attempt + 1,
                        reason: format!("malformed request: {e}"),
                    });
                }
                Err(e) => format!("transport error: {e}"),
            };

            attempt += 1;
            if attempt > endpoint.retries {
                self.metrics
                    .status
                    .with_label_values(&[operation, prometheus_metrics::outcome::ERROR])
                    .inc();
                return Err(Error::Unavailable {
                    endpoint: endpoint.name,
                    attempts: attempt,
                    reason,
                });
            }

            self.metrics
                .retry_count
                .with_label_values(&[operation, endpoint.name])
                .inc();
            tracing::warn!(
                endpoint = endpoint.name,
                operation,
                attempt,
                "Retrying beacon request: {reason}"
            );
            tokio::time::sleep(jittered(delay)).await;
            delay *= 2;
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, Error> {
        let url = response.url().to_string();
        response.json::<ApiResponse<T>>().await.map(|r| r.data).map_err(|e| Error::Decode {
            url,
            reason: e.to_string(),
        })
    }
}

impl BeaconApi for ReqwestBeaconClient {
    async fn get_validators(
        &self,
        state: &StateRef,
        ids: Option<&[u64]>,
        statuses: Option<&[ValidatorStatus]>,
    ) -> Result<Vec<ValidatorData>, Error> {
        let endpoint = self.endpoint_for(state);
        let path = format!("eth/v1/beacon/states/{}/validators", state.as_str());

        let response = if use_post_body(ids) {
            let body = ValidatorsRequest::new(ids, statuses);
            self.execute(endpoint, "get_validators", |client, base| {
                client.post(format!("{base}/{path}")).json(&body)
            })
            .await?
        } else {
            self.execute(endpoint, "get_validators", |client, base| {
                let mut request = client.get(format!("{base}/{path}"));
                if let Some(ids) = ids {
                    request = request.query(&[("id", ids.iter().join(","))]);
                }
                if let Some(statuses) = statuses {
                    request = request.query(&[("status", statuses.iter().map(|s| s.as_str()).join(","))]);
                }
                request
            })
            .await?
        };
        Self::decode(response).await
    }

    async fn get_validator_balances(&self, state: &StateRef) -> Result<Vec<ValidatorBalanceData>, Error> {
        let endpoint = self.endpoint_for(state);
        let path = format!("eth/v1/beacon/states/{}/validator_balances", state.as_str());
        let response = self
            .execute(endpoint, "get_validator_balances", |client, base| {
                client.get(format!("{base}/{path}"))
            })
            .await?;
        Self::decode(response).await
    }

    async fn get_attestation_rewards(&self, epoch: Epoch, ids: &[u64]) -> Result<AttestationRewards, Error> {
        let endpoint = self.endpoint_for_epoch(epoch);
        let body: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let response = self
            .execute(endpoint, "get_attestation_rewards", |client, base| {
                client
                    .post(format!("{base}/eth/v1/beacon/rewards/attestations/{epoch}"))
                    .json(&body)
            })
            .await?;
        Self::decode(response).await
    }

    async fn get_committees(&self, epoch: Epoch) -> Result<Vec<CommitteeData>, Error> {
        let endpoint = self.endpoint_for_epoch(epoch);
        let state_slot = self.clock.first_slot_of_epoch(epoch);
        let response = self
            .execute(endpoint, "get_committees", |client, base| {
                client
                    .get(format!("{base}/eth/v1/beacon/states/{state_slot}/committees"))
                    .query(&[("epoch", epoch.0.to_string())])
            })
            .await?;
        Self::decode(response).await
    }

    async fn get_proposer_duties(&self, epoch: Epoch) -> Result<Vec<ProposerDutyData>, Error> {
        let endpoint = self.endpoint_for_epoch(epoch);
        let response = self
            .execute(endpoint, "get_proposer_duties", |client, base| {
                client.get(format!("{base}/eth/v1/validator/duties/proposer/{epoch}"))
            })
            .await?;
        Self::decode(response).await
    }

    async fn get_sync_committees(&self, period_start: Epoch) -> Result<SyncCommitteeData, Error> {
        let endpoint = self.endpoint_for_epoch(period_start);
        let state_slot = self.clock.first_slot_of_epoch(period_start);
        let response = self
            .execute(endpoint, "get_sync_committees", |client, base| {
                client.get(format!("{base}/eth/v1/beacon/states/{state_slot}/sync_committees"))
            })
            .await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_routing_kicks_in_past_the_window() {
        let head = Slot(1_000_000);
        assert!(!routes_to_archive(head, Slot(1_000_000)));
        assert!(!routes_to_archive(head, head - RECENT_SLOT_WINDOW));
        assert!(routes_to_archive(head, head - (RECENT_SLOT_WINDOW + 1)));
        // Target slots ahead of the local clock are always recent.
        assert!(!routes_to_archive(head, Slot(1_000_010)));
    }

    #[test]
    fn post_body_only_for_large_id_lists() {
        assert!(!use_post_body(None));
        let small: Vec<u64> = (0..MAX_IDS_IN_QUERY as u64).collect();
        assert!(!use_post_body(Some(&small)));
        let large: Vec<u64> = (0..=MAX_IDS_IN_QUERY as u64).collect();
        assert!(use_post_body(Some(&large)));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let delay = Duration::from_millis(1000);
        for _ in 0..200 {
            let jittered = jittered(delay);
            assert!(jittered >= Duration::from_millis(800));
            assert!(jittered <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn url_normalization_strips_trailing_slash() {
        assert_eq!(normalize_url("http://node:5052/"), "http://node:5052");
        assert_eq!(normalize_url("http://node:5052"), "http://node:5052");
    }
}
