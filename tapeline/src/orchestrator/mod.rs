//! Run orchestrator - schedules pipeline firings and owns shutdown.
//!
//! One long-lived task per (pipeline, schedule class) fires the pipeline at
//! the class's configured period; a firing that lands while the previous one
//! is still running is skipped, not queued. SIGINT/SIGTERM cancel the shared
//! token, the orchestrator waits for every consumer to acknowledge, then
//! moves both pools' In-Progress jobs to Interrupted and closes the drives.

use crate::config::ScheduleClass;
use crate::pair::BackupPipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How the run ended; the CLI maps this to an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// All requested work completed (only reachable in `--once` mode).
    Completed,
    /// Operator signal; open jobs were transitioned to Interrupted.
    Interrupted,
    /// Both pipelines latched hard errors and no work can proceed.
    Failed,
}

/// Coordinates the paired pipelines, their schedules and shutdown.
pub struct Orchestrator {
    pipeline_a: Arc<BackupPipeline>,
    pipeline_b: Arc<BackupPipeline>,
    schedules: Vec<ScheduleClass>,
    roots: Vec<String>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        pipeline_a: Arc<BackupPipeline>,
        pipeline_b: Arc<BackupPipeline>,
        schedules: Vec<ScheduleClass>,
        roots: Vec<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pipeline_a,
            pipeline_b,
            schedules,
            roots,
            cancel,
        }
    }

    /// Run both pipelines on their schedules until a signal arrives or both
    /// latch hard errors.
    pub async fn run(&self) -> RunOutcome {
        info!(
            pools = ?[self.pipeline_a.pool_id(), self.pipeline_b.pool_id()],
            schedules = ?self.schedules.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "orchestrator started"
        );

        let mut timers = Vec::new();
        for pipeline in [&self.pipeline_a, &self.pipeline_b] {
            for class in &self.schedules {
                timers.push(tokio::spawn(schedule_loop(
                    Arc::clone(pipeline),
                    class.clone(),
                    self.roots.clone(),
                    self.cancel.clone(),
                )));
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = wait_for_shutdown_signal() => RunOutcome::Interrupted,
            _ = self.watch_failures() => RunOutcome::Failed,
        };

        // Stop the timers, then wait until any active consumer has exited;
        // closing the device under an in-flight write would fault.
        self.cancel.cancel();
        for timer in timers {
            let _ = timer.await;
        }
        self.pipeline_a.shutdown().await;
        self.pipeline_b.shutdown().await;

        info!(?outcome, "orchestrator stopped");
        outcome
    }

    /// Fire every schedule class once, immediately, on both pipelines,
    /// covering every configured walk root.
    pub async fn run_once_now(&self) -> RunOutcome {
        for class in &self.schedules {
            for root in &self.roots {
                let (a, b) = tokio::join!(
                    self.pipeline_a.run_once(root, &class.name),
                    self.pipeline_b.run_once(root, &class.name),
                );
                if a.as_ref().is_err_and(|e| e.is_interrupt())
                    || b.as_ref().is_err_and(|e| e.is_interrupt())
                {
                    self.pipeline_a.shutdown().await;
                    self.pipeline_b.shutdown().await;
                    return RunOutcome::Interrupted;
                }
                if a.is_err() || b.is_err() {
                    return RunOutcome::Failed;
                }
            }
        }
        RunOutcome::Completed
    }

    /// Resolves once both pipelines have latched hard errors.
    async fn watch_failures(&self) {
        loop {
            tokio::time::sleep(Duration::from_secs(20)).await;
            if self.pipeline_a.has_failed() && self.pipeline_b.has_failed() {
                return;
            }
        }
    }
}

/// Recurring firings of one pipeline for one schedule class, rotating
/// through the configured walk roots.
async fn schedule_loop(
    pipeline: Arc<BackupPipeline>,
    class: ScheduleClass,
    roots: Vec<String>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(class.period_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick resolves immediately; the first firing waits one period.
    interval.tick().await;

    let mut next_root = 0usize;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let root = &roots[next_root % roots.len()];
        next_root = next_root.wrapping_add(1);

        debug!(pool = pipeline.pool_id(), class = %class.name, root, "schedule fired");
        if let Err(err) = pipeline.run_once(root, &class.name).await {
            if err.is_interrupt() {
                return;
            }
            // Hard errors are latched and quarantined inside run_once.
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    async fn wait_for_sigterm() {
        use tokio::signal::unix;

        unix::signal(unix::SignalKind::terminate())
            .expect("unable to register for SIGTERM signals")
            .recv()
            .await;
        info!("received SIGTERM");
    }

    #[cfg(not(unix))]
    async fn wait_for_sigterm() {
        std::future::pending::<()>().await;
    }

    tokio::select! {
        _ = wait_for_sigterm() => (),
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
    }
}
