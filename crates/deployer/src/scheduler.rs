// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Run admission: at most one run at a time, at most one queued re-run.

use std::error::Error;
use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::activation::DeferredActivation;
use crate::pipeline::{RunError, RunSummary};
use crate::status::{RunState, StatusHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Command,
    Webhook,
    Interval,
    Activation,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerSource::Command => "command",
            TriggerSource::Webhook => "webhook",
            TriggerSource::Interval => "interval",
            TriggerSource::Activation => "activation",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub source: TriggerSource,
    /// Who asked for the run, when known.
    pub actor: Option<String>,
}

impl Trigger {
    pub fn new(source: TriggerSource, actor: Option<String>) -> Self {
        Self { source, actor }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    /// A run is in progress; one re-run will follow it.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    Completed(RunSummary),
    Failed {
        name: &'static str,
        error: String,
        /// Source chain, outermost first.
        causes: Vec<String>,
        actor: Option<String>,
    },
}

impl RunReport {
    fn failed(err: &RunError, actor: Option<String>) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        RunReport::Failed {
            name: err.name(),
            error: err.to_string(),
            causes,
            actor,
        }
    }
}

/// Receives the outcome of every finished run.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn run_finished(&self, report: &RunReport);
}

/// Performs one complete run.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn execute(&self, status: &StatusHandle) -> Result<RunSummary, RunError>;
}

#[derive(Default)]
struct Admit {
    running: bool,
    queued: Option<Trigger>,
}

struct Inner {
    executor: Arc<dyn RunExecutor>,
    sink: Arc<dyn NotificationSink>,
    status: StatusHandle,
    admit: Mutex<Admit>,
    deferred: Mutex<Vec<DeferredActivation>>,
    /// Entries handed to a run by `check_deferred`, kept until a run succeeds.
    activating: Mutex<Vec<DeferredActivation>>,
    idle: Notify,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    pub fn new(executor: Arc<dyn RunExecutor>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                sink,
                status: StatusHandle::new(),
                admit: Mutex::new(Admit::default()),
                deferred: Mutex::new(Vec::new()),
                activating: Mutex::new(Vec::new()),
                idle: Notify::new(),
            }),
        }
    }

    pub fn status(&self) -> &StatusHandle {
        &self.inner.status
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.admit).running
    }

    /// Targets held back by the last successful run.
    pub fn deferred(&self) -> Vec<DeferredActivation> {
        lock(&self.inner.deferred).clone()
    }

    /// Single entry point for every trigger source.
    pub fn request_run(&self, trigger: Trigger) -> Admission {
        {
            let mut admit = lock(&self.inner.admit);
            if admit.running {
                tracing::info!("Run in progress, queueing {} trigger", trigger.source);
                admit.queued.get_or_insert(trigger);
                return Admission::Queued;
            }
            admit.running = true;
        }
        let this = self.clone();
        tokio::spawn(async move { this.run_chain(trigger).await });
        Admission::Started
    }

    async fn run_chain(&self, mut trigger: Trigger) {
        loop {
            self.run_once(trigger).await;
            let next = {
                let mut admit = lock(&self.inner.admit);
                let next = admit.queued.take();
                if next.is_none() {
                    admit.running = false;
                }
                next
            };
            match next {
                Some(queued) => trigger = queued,
                None => break,
            }
        }
        self.inner.idle.notify_waiters();
    }

    async fn run_once(&self, trigger: Trigger) {
        let status = &self.inner.status;
        tracing::info!(
            "Starting run ({}, requested by {})",
            trigger.source,
            trigger.actor.as_deref().unwrap_or("nobody")
        );
        status.set_state(RunState::Running);

        let executor = self.inner.executor.clone();
        let task_status = status.clone();
        let result = tokio::spawn(async move { executor.execute(&task_status).await })
            .await
            .map_err(RunError::from)
            .and_then(|r| r);

        let report = match result {
            Ok(summary) => {
                *lock(&self.inner.deferred) = summary.deferred.clone();
                lock(&self.inner.activating).clear();
                status.set_state(RunState::Done);
                RunReport::Completed(summary)
            }
            Err(err) => {
                tracing::error!("Run failed: {err}");
                let restored: Vec<_> = lock(&self.inner.activating).drain(..).collect();
                lock(&self.inner.deferred).extend(restored);
                status.set_state(RunState::Error);
                RunReport::failed(&err, trigger.actor)
            }
        };
        self.inner.sink.run_finished(&report).await;
        status.set_state(RunState::Pending);
    }

    /// Resolves once no run is active or queued.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// Moves every deferred entry due at `now` out of the list and requests a run
    /// if there was one. A fatal run puts them back.
    pub fn check_deferred(&self, now: DateTime<Utc>) -> Option<Admission> {
        let due: Vec<_> = {
            let mut deferred = lock(&self.inner.deferred);
            let (due, later): (Vec<_>, Vec<_>) = deferred.drain(..).partition(|d| d.at <= now);
            *deferred = later;
            due
        };
        if due.is_empty() {
            return None;
        }
        for entry in &due {
            tracing::info!("{} reached its release time {}", entry.target, entry.at);
        }
        lock(&self.inner.activating).extend(due);
        Some(self.request_run(Trigger::new(TriggerSource::Activation, None)))
    }

    pub fn spawn_activation_timer(&self, period: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                this.check_deferred(Utc::now());
            }
        })
    }

    pub fn spawn_periodic_trigger(&self, period: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                this.request_run(Trigger::new(TriggerSource::Interval, None));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Semaphore;

    use super::*;
    use crate::platform::PlatformError;

    struct GatedExecutor {
        gate: Semaphore,
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        deferred: Mutex<Vec<DeferredActivation>>,
        fail_first: bool,
    }

    impl Default for GatedExecutor {
        fn default() -> Self {
            Self {
                gate: Semaphore::new(0),
                runs: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                deferred: Mutex::new(Vec::new()),
                fail_first: false,
            }
        }
    }

    #[async_trait]
    impl RunExecutor for GatedExecutor {
        async fn execute(&self, _status: &StatusHandle) -> Result<RunSummary, RunError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail_first && run == 0 {
                return Err(RunError::Platform(PlatformError::Rejected {
                    method: reqwest::Method::GET,
                    path: "/challenges".into(),
                }));
            }
            Ok(RunSummary {
                deployed: 1,
                deferred: self.deferred.lock().unwrap().clone(),
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<RunReport>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn run_finished(&self, report: &RunReport) {
            self.reports.lock().unwrap().push(report.clone());
        }
    }

    fn trigger(actor: &str) -> Trigger {
        Trigger::new(TriggerSource::Command, Some(actor.to_string()))
    }

    #[tokio::test]
    async fn test_triggers_during_run_coalesce_into_one_rerun() {
        let executor = Arc::new(GatedExecutor::default());
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::new(executor.clone(), sink.clone());

        assert_eq!(scheduler.request_run(trigger("alice")), Admission::Started);
        for actor in ["bob", "carol", "dave"] {
            assert_eq!(scheduler.request_run(trigger(actor)), Admission::Queued);
        }
        executor.gate.add_permits(10);
        scheduler.wait_idle().await;

        assert_eq!(executor.runs.load(Ordering::SeqCst), 2);
        assert_eq!(executor.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(sink.reports.lock().unwrap().len(), 2);
        assert_eq!(scheduler.status().current().state, RunState::Pending);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_status_is_running_while_executing() {
        let executor = Arc::new(GatedExecutor::default());
        let scheduler = Scheduler::new(executor.clone(), Arc::new(RecordingSink::default()));
        let mut status = scheduler.status().subscribe();
        scheduler.request_run(trigger("alice"));
        status
            .wait_for(|s| s.state == RunState::Running)
            .await
            .unwrap();
        executor.gate.add_permits(1);
        scheduler.wait_idle().await;
        assert_eq!(scheduler.status().current().state, RunState::Pending);
    }

    #[tokio::test]
    async fn test_failed_run_is_reported_and_does_not_block() {
        let executor = Arc::new(GatedExecutor {
            fail_first: true,
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::new(executor.clone(), sink.clone());
        executor.gate.add_permits(10);

        scheduler.request_run(trigger("alice"));
        scheduler.wait_idle().await;
        assert_eq!(scheduler.request_run(trigger("bob")), Admission::Started);
        scheduler.wait_idle().await;

        let reports = sink.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 2);
        match &reports[0] {
            RunReport::Failed {
                name,
                error,
                causes,
                actor,
            } => {
                assert_eq!(*name, "PlatformError");
                assert_eq!(error, "Failed to list existing challenges");
                assert_eq!(causes.len(), 1);
                assert_eq!(actor.as_deref(), Some("alice"));
            }
            other => panic!("unexpected report {other:?}"),
        }
        assert!(matches!(reports[1], RunReport::Completed(_)));
    }

    #[tokio::test]
    async fn test_elapsed_deferred_entry_requests_a_run() {
        let at = Utc::now() + chrono::Duration::hours(1);
        let executor = Arc::new(GatedExecutor::default());
        executor.deferred.lock().unwrap().push(DeferredActivation {
            target: "later".into(),
            at,
        });
        executor.gate.add_permits(10);
        let scheduler = Scheduler::new(executor.clone(), Arc::new(RecordingSink::default()));

        scheduler.request_run(trigger("alice"));
        scheduler.wait_idle().await;
        assert_eq!(scheduler.deferred().len(), 1);

        assert_eq!(scheduler.check_deferred(Utc::now()), None);
        executor.deferred.lock().unwrap().clear();
        assert_eq!(
            scheduler.check_deferred(at + chrono::Duration::minutes(1)),
            Some(Admission::Started)
        );
        scheduler.wait_idle().await;
        assert_eq!(executor.runs.load(Ordering::SeqCst), 2);
        assert!(scheduler.deferred().is_empty());
    }

    #[tokio::test]
    async fn test_elapsed_entry_during_run_is_queued() {
        let executor = Arc::new(GatedExecutor::default());
        let scheduler = Scheduler::new(executor.clone(), Arc::new(RecordingSink::default()));
        scheduler.request_run(trigger("alice"));
        lock(&scheduler.inner.deferred).push(DeferredActivation {
            target: "later".into(),
            at: Utc::now(),
        });
        assert_eq!(scheduler.check_deferred(Utc::now()), Some(Admission::Queued));
        executor.gate.add_permits(10);
        scheduler.wait_idle().await;
        assert_eq!(executor.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_timer_retries_after_fatal_run() {
        let executor = Arc::new(GatedExecutor {
            fail_first: true,
            ..Default::default()
        });
        executor.gate.add_permits(10);
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::new(executor.clone(), sink.clone());
        lock(&scheduler.inner.deferred).push(DeferredActivation {
            target: "later".into(),
            at: Utc::now() - chrono::Duration::minutes(1),
        });

        let timer = scheduler.spawn_activation_timer(Duration::from_secs(60));
        while executor.runs.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.wait_idle().await;
        assert_eq!(scheduler.deferred().len(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        while executor.runs.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.wait_idle().await;
        timer.abort();

        assert!(scheduler.deferred().is_empty());
        let reports = sink.reports.lock().unwrap().clone();
        assert!(matches!(reports[0], RunReport::Failed { .. }));
        assert!(matches!(reports[1], RunReport::Completed(_)));
        assert_eq!(executor.runs.load(Ordering::SeqCst), 2);
    }
}
