//! Poll, publish, commit, sleep.
//!
//! One cycle runs at a time. Shutdown is observed before each cycle and
//! while sleeping, never in the middle of a cycle, so a publish is always
//! followed by its commit attempt.

use std::fmt;
use std::time::Duration;

use checkpoints::ArcDynOffsetStore;
use metrics::{counter, gauge, histogram};
use relay_config::LoopCfg;
use relay_core::{
    ArcDynPublisher, ArcDynRowPoller, Checkpoint, EventMapper, Mode,
    RelayError, RelayResult,
};
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Polling,
    Publishing,
    Committing,
    Sleeping,
    ShuttingDown,
    Stopped,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Starting => "starting",
            LoopState::Polling => "polling",
            LoopState::Publishing => "publishing",
            LoopState::Committing => "committing",
            LoopState::Sleeping => "sleeping",
            LoopState::ShuttingDown => "shutting_down",
            LoopState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Nothing above the checkpoint.
    Idle,
    /// The whole batch was acknowledged. `committed` is the new checkpoint,
    /// `None` in replay mode.
    Published {
        events: usize,
        committed: Option<Checkpoint>,
    },
    /// Store or broker failure; the checkpoint was not moved.
    Retryable(RelayError),
    /// The loop cannot continue.
    Fatal(RelayError),
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Idle => "idle",
            CycleOutcome::Published { .. } => "published",
            CycleOutcome::Retryable(_) => "retryable",
            CycleOutcome::Fatal(_) => "fatal",
        }
    }
}

/// Totals for one `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub cycles: u64,
    pub events: u64,
    pub failed_cycles: u64,
}

pub struct StreamingLoop {
    store: ArcDynOffsetStore,
    poller: ArcDynRowPoller,
    publisher: ArcDynPublisher,
    mapper: EventMapper,
    batch_size: usize,
    poll_interval: Duration,
    mode: Mode,
    max_cycles: Option<u64>,
    state_tx: watch::Sender<LoopState>,
}

impl StreamingLoop {
    pub fn new(
        cfg: &LoopCfg,
        store: ArcDynOffsetStore,
        poller: ArcDynRowPoller,
        publisher: ArcDynPublisher,
        mapper: EventMapper,
    ) -> Self {
        let (state_tx, _) = watch::channel(LoopState::Starting);
        Self {
            store,
            poller,
            publisher,
            mapper,
            batch_size: cfg.batch_size,
            poll_interval: cfg.poll_interval(),
            mode: Mode::from_replay_flag(cfg.replay),
            max_cycles: cfg.max_cycles,
            state_tx,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> LoopState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, next: LoopState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, "loop state");
        }
    }

    /// Connect the producer and check the checkpoint seed. Any error here
    /// is fatal.
    async fn startup(&self) -> RelayResult<()> {
        self.publisher.init_producer().await?;
        let cp = self.store.get_offset().await?;
        gauge!("rowrelay_checkpoint_last_id").set(cp.last_id as f64);
        info!(
            last_id = cp.last_id,
            mode = %self.mode,
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            publisher = self.publisher.id(),
            "streaming loop started"
        );
        Ok(())
    }

    async fn shutdown(&self) {
        self.set_state(LoopState::ShuttingDown);
        if let Err(e) = self.publisher.shutdown_producer().await {
            warn!(error = %e, "producer shutdown failed");
        }
        self.set_state(LoopState::Stopped);
    }

    /// One poll, publish, commit pass. Errors never escape; they are
    /// classified in the returned outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let t0 = Instant::now();

        let outcome = match self.cycle().await {
            Ok(outcome) => outcome,
            Err(e) if e.is_retryable() => CycleOutcome::Retryable(e),
            Err(e) => CycleOutcome::Fatal(e),
        };

        counter!("rowrelay_cycles_total", "outcome" => outcome.label())
            .increment(1);
        histogram!("rowrelay_cycle_latency_seconds")
            .record(t0.elapsed().as_secs_f64());
        outcome
    }

    async fn cycle(&self) -> RelayResult<CycleOutcome> {
        self.set_state(LoopState::Polling);

        let last_id = match self.mode {
            Mode::Replay => 0,
            Mode::Normal => self.store.get_offset().await?.last_id,
        };

        let rows = self.poller.poll_new_rows(last_id, self.batch_size).await?;
        counter!("rowrelay_rows_polled_total").increment(rows.len() as u64);

        let Some(last) = rows.last() else {
            debug!(last_id, "no new rows");
            return Ok(CycleOutcome::Idle);
        };
        let next = Checkpoint::after(last);

        self.set_state(LoopState::Publishing);
        let events = self.mapper.map_batch(&rows, self.mode);
        if let Err(e) = self.publisher.send_events(&events).await {
            counter!("rowrelay_publish_errors_total").increment(1);
            return Err(e.into());
        }
        counter!("rowrelay_events_published_total")
            .increment(events.len() as u64);

        if self.mode.is_replay() {
            debug!(count = events.len(), "replay batch published");
            return Ok(CycleOutcome::Published {
                events: events.len(),
                committed: None,
            });
        }

        self.set_state(LoopState::Committing);
        self.store.update_offset(next.last_id, last.created_at).await?;
        counter!("rowrelay_checkpoint_commits_total").increment(1);
        gauge!("rowrelay_checkpoint_last_id").set(next.last_id as f64);

        Ok(CycleOutcome::Published {
            events: events.len(),
            committed: Some(next),
        })
    }

    /// Run until `cancel` fires, `max_cycles` is reached, or a fatal error.
    /// The producer is shut down on every path out, including a failed
    /// startup.
    pub async fn run(&self, cancel: CancellationToken) -> RelayResult<RunStats> {
        self.set_state(LoopState::Starting);

        if let Err(e) = self.startup().await {
            error!(error = %e, kind = e.kind(), "startup failed");
            self.shutdown().await;
            return Err(e);
        }

        let mut stats = RunStats::default();
        let mut fatal = None;

        while !cancel.is_cancelled() {
            let outcome = self.run_cycle().await;
            stats.cycles += 1;

            match outcome {
                CycleOutcome::Idle => {}
                CycleOutcome::Published { events, committed } => {
                    stats.events += events as u64;
                    info!(
                        events,
                        last_id = committed.map(|c| c.last_id),
                        mode = %self.mode,
                        "batch published"
                    );
                }
                CycleOutcome::Retryable(e) => {
                    stats.failed_cycles += 1;
                    warn!(error = %e, kind = e.kind(), "cycle failed; checkpoint unchanged");
                }
                CycleOutcome::Fatal(e) => {
                    error!(error = %e, kind = e.kind(), "cycle failed fatally");
                    fatal = Some(e);
                    break;
                }
            }

            if self.max_cycles.is_some_and(|max| stats.cycles >= max) {
                info!(cycles = stats.cycles, "cycle limit reached");
                break;
            }

            self.set_state(LoopState::Sleeping);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        if cancel.is_cancelled() {
            info!("shutdown requested; stopping loop");
        }
        self.shutdown().await;
        info!(
            cycles = stats.cycles,
            events = stats.events,
            failed_cycles = stats.failed_cycles,
            "streaming loop stopped"
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}
