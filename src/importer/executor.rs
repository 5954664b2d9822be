use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::{IngestError, Result};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Runs blocking work off the async workers and drives periodic timers.
#[derive(Clone, Debug)]
pub struct Scheduler {
    runtime: Handle,
}

impl Scheduler {
    /// Scheduler bound to the runtime of the calling task.
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| IngestError::internal(format!("no tokio runtime: {e}")))?;
        Ok(Self { runtime })
    }

    #[must_use]
    pub const fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Runs `task` on the blocking pool. Completion order across calls is not guaranteed.
    pub async fn blocking<F, R>(&self, task: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.runtime
            .spawn_blocking(task)
            .await
            .map_err(|e| IngestError::internal(format!("blocking task failed: {e}")))
    }

    /// Calls `on_tick` every `period`, first after one full period.
    ///
    /// Ticks never overlap: the next tick is scheduled after the previous one returned.
    /// The timer stops once its handle is cancelled, including from inside `on_tick`.
    pub fn periodic<F, Fut>(&self, period: Duration, name: &str, mut on_tick: F) -> TimerHandle
    where
        F: FnMut(TimerHandle) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = TimerHandle {
            id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            token: CancellationToken::new(),
        };
        let timer = handle.clone();

        self.runtime.spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("[scheduler] timer {} #{} started", timer.name, timer.id);

            loop {
                tokio::select! {
                    biased;
                    () = timer.token.cancelled() => break,
                    _ = ticks.tick() => {
                        trace!("[scheduler] timer {} #{} tick", timer.name, timer.id);
                        on_tick(timer.clone()).await;
                    }
                }
            }
            debug!("[scheduler] timer {} #{} stopped", timer.name, timer.id);
        });

        handle
    }
}

/// Handle to a periodic timer. Cancelling is idempotent and safe from any task.
#[derive(Clone, Debug)]
pub struct TimerHandle {
    id: u64,
    name: String,
    token: CancellationToken,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
