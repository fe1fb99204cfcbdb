use crate::config::{CycleFailurePolicy, HarvestSettings};
use crate::harvest::{CycleError, HarvestCycle, Transport};
use crate::traits::EventSink;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Fires harvest cycles on a fixed period until stopped.
///
/// Cycles never overlap: the next tick is awaited only once the current cycle
/// has finished. An overrunning cycle delays the next tick rather than
/// causing a burst of catch-up cycles. The stop token is only observed
/// between cycles, so a session is never abandoned half-way.
pub struct HarvestScheduler {
    period: Duration,
    on_cycle_failure: CycleFailurePolicy,
}

impl HarvestScheduler {
    pub fn new(period: Duration, on_cycle_failure: CycleFailurePolicy) -> Self {
        Self {
            period,
            on_cycle_failure,
        }
    }

    pub fn from_settings(settings: &HarvestSettings) -> Self {
        Self::new(settings.period, settings.on_cycle_failure)
    }

    /// Runs until `stop` is cancelled, returning the number of cycles that
    /// completed. The first cycle starts one period after the call.
    ///
    /// # Errors
    ///
    /// With [`CycleFailurePolicy::Stop`], the first [`CycleError`] ends the
    /// loop and is returned. With [`CycleFailurePolicy::Skip`] it is logged
    /// and polling continues.
    #[instrument(skip_all, fields(period = ?self.period))]
    pub async fn run<T, S>(
        &self,
        cycle: &HarvestCycle<T, S>,
        stop: &CancellationToken,
    ) -> Result<u64, CycleError>
    where
        T: Transport,
        S: EventSink,
    {
        info!("Harvester is running! Hit CTRL-C to stop it.");

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut completed = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    info!(cycles = completed, "Stop requested, harvester exiting");
                    return Ok(completed);
                }
                _ = ticker.tick() => {}
            }

            match cycle.run().await {
                Ok(_) => completed += 1,
                Err(e) => match self.on_cycle_failure {
                    CycleFailurePolicy::Stop => return Err(e),
                    CycleFailurePolicy::Skip => {
                        warn!(error = %e, "Cycle failed, retrying on next tick");
                    }
                },
            }
        }
    }
}

/// Cancels `stop` on the first interrupt and returns on the second, at which
/// point the caller should exit without waiting for the running cycle.
pub async fn watch_interrupts<F, Fut>(
    mut next_interrupt: F,
    stop: CancellationToken,
) -> std::io::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    next_interrupt().await?;
    info!("Interrupt received, stopping after the current cycle (press again to force)");
    stop.cancel();

    next_interrupt().await?;
    warn!("Second interrupt received, exiting immediately");
    Ok(())
}
