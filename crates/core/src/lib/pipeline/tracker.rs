use crate::beacon_client::{BeaconApi, StateRef};
use crate::store::validators::GlobalStats;

use super::{sleep_unless_shutdown, IndexerStore, PipelineContext};

/// Refreshes the validator registry from the head state and upserts the
/// daily global stats. The first pass doubles as the initial bulk load.
pub async fn refresh_validators<S, B>(ctx: &PipelineContext<S, B>) -> anyhow::Result<u64>
where
    S: IndexerStore,
    B: BeaconApi + Send + Sync,
{
    let known = ctx.store.count_validators().await?;
    let validators = ctx.beacon.get_validators(&StateRef::Head, None, None).await?;
    if known == 0 {
        tracing::info!(count = validators.len(), "Initial validator bulk load");
    }
    ctx.store.upsert_validators(&validators).await?;

    let today = chrono::Utc::now().date_naive();
    ctx.store
        .upsert_global_stats(today, &GlobalStats::from_validators(&validators))
        .await?;
    Ok(validators.len() as u64)
}

/// Long-lived transition-tracker loop: one pass per epoch. Errors are
/// logged and swallowed like the creator's.
pub async fn run_tracker<S, B>(mut ctx: PipelineContext<S, B>)
where
    S: IndexerStore,
    B: BeaconApi + Send + Sync,
{
    tracing::info!("Validator tracker loop started");
    loop {
        if ctx.shutdown_requested() {
            break;
        }
        match refresh_validators(&ctx).await {
            Ok(count) => tracing::debug!(count, "Refreshed validator registry"),
            Err(e) => tracing::warn!("Validator refresh pass failed: {e}"),
        }
        let epoch = ctx.epoch_duration();
        if sleep_unless_shutdown(&mut ctx.shutdown, epoch).await {
            break;
        }
    }
    tracing::info!("Validator tracker loop stopped");
}
