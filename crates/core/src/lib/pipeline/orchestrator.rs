use tracing::Instrument;

use crate::beacon_client::BeaconApi;
use crate::store::EpochRow;

use super::processor::{EpochProcessor, ProcessorOutcome};
use super::{sleep_unless_shutdown, IndexerStore, PipelineContext};

#[derive(Debug)]
enum OrchestratorState {
    GettingMinEpoch,
    CheckingIfCanSpawn(Option<EpochRow>),
    Processing(EpochRow),
    NoMinEpoch,
}

/// Single-actor coordinator: selects the minimum unprocessed epoch and runs
/// exactly one processor at a time, so epochs complete in strictly ascending
/// order.
pub async fn run_orchestrator<S, B>(mut ctx: PipelineContext<S, B>)
where
    S: IndexerStore,
    B: BeaconApi + Send + Sync,
{
    tracing::info!("Orchestrator loop started");
    let mut state = OrchestratorState::GettingMinEpoch;
    loop {
        if ctx.shutdown_requested() {
            break;
        }
        state = match state {
            OrchestratorState::GettingMinEpoch => match ctx.store.min_unprocessed_epoch().await {
                Ok(row) => OrchestratorState::CheckingIfCanSpawn(row),
                Err(e) => {
                    tracing::warn!("Failed to query minimum unprocessed epoch: {e}");
                    OrchestratorState::NoMinEpoch
                }
            },
            OrchestratorState::CheckingIfCanSpawn(Some(row)) => OrchestratorState::Processing(row),
            OrchestratorState::CheckingIfCanSpawn(None) => OrchestratorState::NoMinEpoch,
            OrchestratorState::Processing(row) => {
                let epoch = row.epoch;
                ctx.metrics.epochs.current_epoch.set(epoch.0 as i64);
                let span = tracing::info_span!("epoch_processor", epoch = epoch.0);
                let outcome = EpochProcessor::new(&row).run(&ctx).instrument(span).await;
                match outcome {
                    ProcessorOutcome::Completed => {
                        ctx.metrics.epochs.processed_total.inc();
                        tracing::info!(%epoch, "Epoch fully processed");
                        OrchestratorState::GettingMinEpoch
                    }
                    ProcessorOutcome::Failed { step } => {
                        tracing::warn!(
                            %epoch,
                            step = step.as_str(),
                            "Epoch processing failed; will resume at the first unfinished step"
                        );
                        // The failed epoch is still the minimum unprocessed
                        // row; go through the wait state so a persistently
                        // failing step cannot spin the loop.
                        OrchestratorState::NoMinEpoch
                    }
                    ProcessorOutcome::Aborted => break,
                }
            }
            OrchestratorState::NoMinEpoch => {
                let wait = ctx.slot_duration() / 3;
                if sleep_unless_shutdown(&mut ctx.shutdown, wait).await {
                    break;
                }
                OrchestratorState::GettingMinEpoch
            }
        };
    }
    tracing::info!("Orchestrator loop stopped");
}
