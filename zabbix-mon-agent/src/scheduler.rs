//! Delivery scheduler
//!
//! Drives the collect -> translate -> send cycle on a fixed interval:
//! - startup initialises the Zabbix session; any failure there is fatal
//! - each cycle is bounded by a deadline and never overlaps the next one
//! - sends are retried with exponential backoff, refreshing the session when
//!   the server reports it expired
//! - a failed cycle is logged and the loop moves on to the next tick
//!
//! One run-scoped [`CancellationToken`] stops the loop, the cycle in flight
//! and any backoff wait.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::MetricSource;
use crate::translator::translate;
use crate::zabbix::{
    ControlPlane, ControlPlaneError, DataEndpoint, ErrorKind, MetricTransport, SenderError, SessionStore, WireMetric,
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Host name as registered in Zabbix
    pub host: String,
    pub interval: Duration,
    pub cycle_timeout: Duration,
    /// Send attempts per cycle, first one included
    pub max_retries: u32,
    /// Wait before the second attempt; doubles for each further attempt
    pub retry_backoff: Duration,
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            host: "monitoring-host".to_string(),
            interval: Duration::from_secs(10),
            cycle_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            batch_size: 50,
        }
    }
}

/// How a single cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Delivered { items: usize, attempts: u32 },
    /// Every metric category failed; nothing was sent
    CollectionFailed,
    /// No collected value maps to a provisioned item
    NothingToSend,
    Failed,
    Cancelled,
}

enum DeliveryFailure {
    Cancelled,
    Abandoned,
    Exhausted,
}

#[derive(Debug, Default)]
struct SchedulerStats {
    running: AtomicBool,
    cycles_completed: AtomicU64,
    cycles_failed: AtomicU64,
    cycles_skipped: AtomicU64,
    send_attempts: AtomicU64,
    session_refreshes: AtomicU64,
}

/// Point-in-time view of the scheduler counters
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub running: bool,
    pub interval: String,
    pub endpoint: String,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub cycles_skipped: u64,
    pub send_attempts: u64,
    pub session_refreshes: u64,
}

pub struct Scheduler<S, C, T> {
    source: S,
    control: C,
    transport: T,
    config: SchedulerConfig,
    store: SessionStore,
    stats: SchedulerStats,
}

impl<S, C, T> Scheduler<S, C, T>
where
    S: MetricSource,
    C: ControlPlane,
    T: MetricTransport,
{
    /// Initialise the Zabbix session. The scheduler only exists once the
    /// session does; an error here means the agent must not start.
    pub async fn start(source: S, control: C, transport: T, config: SchedulerConfig) -> Result<Self, ControlPlaneError> {
        info!(host = %config.host, "Initializing Zabbix session");
        let state = control.initialize(&config.host).await?;

        Ok(Self {
            source,
            control,
            transport,
            config,
            store: SessionStore::new(state),
            stats: SchedulerStats::default(),
        })
    }

    pub fn endpoint(&self) -> DataEndpoint {
        self.store.snapshot().endpoint.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            running: self.stats.running.load(Ordering::Relaxed),
            interval: humantime::format_duration(self.config.interval).to_string(),
            endpoint: self.endpoint().to_string(),
            cycles_completed: self.stats.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.stats.cycles_failed.load(Ordering::Relaxed),
            cycles_skipped: self.stats.cycles_skipped.load(Ordering::Relaxed),
            send_attempts: self.stats.send_attempts.load(Ordering::Relaxed),
            session_refreshes: self.stats.session_refreshes.load(Ordering::Relaxed),
        }
    }

    /// Tick loop; returns once `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.stats.running.store(true, Ordering::Relaxed);
        info!(
            interval = %humantime::format_duration(self.config.interval),
            endpoint = %self.endpoint(),
            "Metrics scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cycle = tokio::time::timeout(self.config.cycle_timeout, self.run_cycle(&cancel));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => CycleOutcome::Cancelled,
                result = cycle => result.unwrap_or_else(|_| {
                    error!(timeout = ?self.config.cycle_timeout, "Metrics cycle exceeded its deadline");
                    CycleOutcome::Failed
                }),
            };

            match outcome {
                CycleOutcome::Delivered { .. } => self.stats.cycles_completed.fetch_add(1, Ordering::Relaxed),
                CycleOutcome::CollectionFailed | CycleOutcome::NothingToSend => {
                    self.stats.cycles_skipped.fetch_add(1, Ordering::Relaxed)
                }
                CycleOutcome::Failed => self.stats.cycles_failed.fetch_add(1, Ordering::Relaxed),
                CycleOutcome::Cancelled => break,
            };
        }

        self.stats.running.store(false, Ordering::Relaxed);
        info!(stats = ?self.stats(), "Metrics scheduler stopped");
    }

    /// One collect -> translate -> send pass
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleOutcome {
        let started = Instant::now();

        let snapshot = match self.source.collect().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "Metrics collection failed, skipping cycle");
                return CycleOutcome::CollectionFailed;
            }
        };
        let collect_elapsed = started.elapsed();

        let metrics = {
            let state = self.store.snapshot();
            translate(&snapshot, &state.items, &state.session.host_name)
        };
        if metrics.is_empty() {
            debug!("No provisioned metrics to send");
            return CycleOutcome::NothingToSend;
        }

        let send_started = Instant::now();
        match self.deliver(&metrics, send_started, cancel).await {
            Ok(attempts) => {
                info!(
                    items = metrics.len(),
                    attempts,
                    collect = ?collect_elapsed,
                    send = ?send_started.elapsed(),
                    total = ?started.elapsed(),
                    "Metrics cycle completed"
                );
                CycleOutcome::Delivered { items: metrics.len(), attempts }
            }
            Err(DeliveryFailure::Cancelled) => CycleOutcome::Cancelled,
            Err(DeliveryFailure::Abandoned | DeliveryFailure::Exhausted) => CycleOutcome::Failed,
        }
    }

    async fn deliver(
        &self,
        metrics: &[WireMetric],
        send_started: Instant,
        cancel: &CancellationToken,
    ) -> Result<u32, DeliveryFailure> {
        let batches: Vec<&[WireMetric]> = metrics.chunks(self.config.batch_size.max(1)).collect();
        let max_attempts = self.config.max_retries.max(1);
        let mut backoff = self.config.retry_backoff;
        let mut next_batch = 0;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                debug!(attempt, backoff = ?backoff, "Waiting before retry");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(attempt, "Send retry cancelled");
                        return Err(DeliveryFailure::Cancelled);
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = backoff.saturating_mul(2);
            }

            self.stats.send_attempts.fetch_add(1, Ordering::Relaxed);
            let endpoint = self.endpoint();

            let err = match self.send_pending(&endpoint, &batches, &mut next_batch).await {
                Ok(()) => return Ok(attempt),
                Err(e) => e,
            };

            match err.kind() {
                ErrorKind::Fatal => {
                    error!(
                        attempt,
                        elapsed = ?send_started.elapsed(),
                        error = %err,
                        "Send failed permanently, abandoning cycle"
                    );
                    return Err(DeliveryFailure::Abandoned);
                }
                ErrorKind::AuthExpired if attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        elapsed = ?send_started.elapsed(),
                        error = %err,
                        "Zabbix session expired, re-initializing"
                    );
                    self.refresh_session().await;
                }
                _ if attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        endpoint = %endpoint,
                        elapsed = ?send_started.elapsed(),
                        error = %err,
                        "Failed to send metrics, will retry"
                    );
                }
                _ => {
                    error!(
                        attempts = max_attempts,
                        endpoint = %endpoint,
                        pending_batches = batches.len() - next_batch,
                        elapsed = ?send_started.elapsed(),
                        error = %err,
                        "Failed to send metrics after all retries"
                    );
                }
            }
        }

        Err(DeliveryFailure::Exhausted)
    }

    /// Send batches from `next` onwards; `next` is left on the first batch
    /// the server has not accepted.
    async fn send_pending(
        &self,
        endpoint: &DataEndpoint,
        batches: &[&[WireMetric]],
        next: &mut usize,
    ) -> Result<(), SenderError> {
        while let Some(batch) = batches.get(*next) {
            let ack = self.transport.send(endpoint, batch).await?;
            match &ack.parsed {
                Some(counters) => debug!(
                    batch = *next + 1,
                    batches = batches.len(),
                    processed = counters.processed,
                    failed = counters.failed,
                    seconds_spent = counters.seconds_spent,
                    "Batch accepted"
                ),
                None => debug!(batch = *next + 1, batches = batches.len(), info = %ack.info, "Batch accepted"),
            }
            *next += 1;
        }
        Ok(())
    }

    async fn refresh_session(&self) {
        self.stats.session_refreshes.fetch_add(1, Ordering::Relaxed);
        match self.control.initialize(&self.config.host).await {
            Ok(state) => {
                self.store.replace(state);
                info!("Zabbix session refreshed");
            }
            Err(e) => warn!(error = %e, kind = %e.kind(), "Failed to refresh Zabbix session"),
        }
    }
}
