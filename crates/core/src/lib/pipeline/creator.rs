use beacon_indexer_shared::beacon_time::BeaconClock;
use beacon_indexer_shared::types::Epoch;

use crate::store::StoreError;

use super::{sleep_unless_shutdown, IndexerStore, PipelineContext};

/// Upper bound on epoch rows whose processing has not finished. The creator
/// tops the backlog up to this size and no further.
pub const MAX_UNPROCESSED_EPOCHS: u64 = 5;

/// The rows one creator pass must insert: consecutive epochs continuing from
/// the current maximum, or starting at the configured lookback epoch when
/// the table is empty.
pub fn epochs_to_create(last_epoch: Option<Epoch>, unprocessed: u64, first_epoch: Epoch) -> Vec<Epoch> {
    let need = MAX_UNPROCESSED_EPOCHS.saturating_sub(unprocessed);
    let start = match last_epoch {
        Some(last) => last + 1,
        None => first_epoch,
    };
    (0..need).map(|offset| start + offset).collect()
}

pub async fn create_epochs_if_needed<S: IndexerStore>(store: &S, clock: &BeaconClock) -> Result<u64, StoreError> {
    let last_epoch = store.last_epoch().await?;
    let unprocessed = store.count_unprocessed_epochs().await?;
    let epochs = epochs_to_create(last_epoch, unprocessed, clock.first_epoch_to_index());
    if epochs.is_empty() {
        return Ok(0);
    }
    store.insert_epochs(&epochs).await?;
    Ok(epochs.len() as u64)
}

/// Long-lived creator loop: one pass per slot. Pass failures are logged and
/// swallowed; the loop only exits on shutdown.
pub async fn run_creator<S, B>(mut ctx: PipelineContext<S, B>)
where
    S: IndexerStore,
    B: Send + Sync,
{
    tracing::info!("Creator loop started");
    loop {
        if ctx.shutdown_requested() {
            break;
        }
        match create_epochs_if_needed(&ctx.store, &ctx.clock).await {
            Ok(0) => {}
            Ok(created) => {
                ctx.metrics.epochs.created_total.inc_by(created);
                tracing::info!(created, "Created unprocessed epoch rows");
            }
            Err(e) => tracing::warn!("Epoch creation pass failed: {e}"),
        }
        let slot = ctx.slot_duration();
        if sleep_unless_shutdown(&mut ctx.shutdown, slot).await {
            break;
        }
    }
    tracing::info!("Creator loop stopped");
}
