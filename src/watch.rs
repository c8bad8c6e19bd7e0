//! Deployment watcher
//!
//! Polls CodeDeploy for a deployment's progress and reports state changes
//! until every instance reaches a terminal state. The loop owns all of its
//! state (`WatcherState`) and talks to the outside world through two seams:
//! a `StatusProvider` for reads and a `Reporter` for operator-facing output.
//! Both are traits so the tick logic can be driven by canned snapshots in
//! tests without a live AWS endpoint.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::aws::error::ProviderError;
use crate::status::{
    DeploymentSnapshot, DeploymentStatus, InstanceSnapshot, InstanceStatus, Overview,
};

/// Watch failure modes.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The deployment ran to completion but at least one instance failed.
    /// Counts were already reported incrementally, so no payload here.
    #[error("deployment failed")]
    DeploymentFailed,

    /// The Status Provider failed; never retried by the watcher.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Read access to a deployment's remote status.
///
/// Implemented by the CodeDeploy client; mocked in tests to drive the watch
/// loop with scripted snapshots.
#[allow(async_fn_in_trait)] // Internal use only; the loop awaits inline
#[cfg_attr(test, mockall::automock)]
pub trait StatusProvider {
    /// Fetch the deployment's aggregate status and overview counts.
    async fn get_deployment(&self, deployment_id: &str)
        -> Result<DeploymentSnapshot, ProviderError>;

    /// List the instance ids currently registered to the deployment.
    ///
    /// Fails with `ProviderError::InstancesNotReady` while the service is
    /// still registering instances.
    async fn list_instances(&self, deployment_id: &str) -> Result<Vec<String>, ProviderError>;

    /// Fetch one instance's status and lifecycle events.
    async fn get_instance(
        &self,
        deployment_id: &str,
        instance_id: &str,
    ) -> Result<InstanceSnapshot, ProviderError>;
}

/// Operator-facing change notifications.
///
/// The watcher calls these only when the corresponding value changed since
/// the previous poll, never unconditionally. Per-tick full dumps would flood
/// the console.
pub trait Reporter: Send + Sync {
    /// The deployment's aggregate status changed.
    fn deployment_status(&self, deployment_id: &str, status: DeploymentStatus);

    /// Overview counts, reported alongside a status change.
    fn overview(&self, deployment_id: &str, overview: &Overview);

    /// An instance's status changed (including first observation).
    fn instance_status(&self, deployment_id: &str, instance_id: &str, status: InstanceStatus);

    /// A lifecycle event's log tail, reported once per event name.
    fn instance_log(&self, deployment_id: &str, instance_id: &str, log_tail: &str);
}

/// Reporter that writes change notifications to the tracing log.
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn deployment_status(&self, deployment_id: &str, status: DeploymentStatus) {
        info!(deployment_id = %deployment_id, status = %status, "Deployment status changed");
    }

    fn overview(&self, deployment_id: &str, overview: &Overview) {
        info!(
            deployment_id = %deployment_id,
            failed = overview.failed,
            in_progress = overview.in_progress,
            skipped = overview.skipped,
            succeeded = overview.succeeded,
            pending = overview.pending,
            "Deployment overview"
        );
    }

    fn instance_status(&self, deployment_id: &str, instance_id: &str, status: InstanceStatus) {
        info!(
            deployment_id = %deployment_id,
            instance_id = %instance_id,
            status = %status,
            "Instance status changed"
        );
    }

    fn instance_log(&self, deployment_id: &str, instance_id: &str, log_tail: &str) {
        info!(
            deployment_id = %deployment_id,
            instance_id = %instance_id,
            "Instance log:\n{log_tail}"
        );
    }
}

/// What changed for an instance in one poll.
#[derive(Debug, Default)]
struct InstanceDelta {
    status_changed: bool,
    /// Trimmed, non-empty log tails of newly observed events, in event order.
    new_logs: Vec<String>,
}

/// Mutable state of one watch session.
///
/// Single owner, single writer: the watch loop. `seen_events` only grows for
/// the lifetime of the session; `instance_statuses` is overwritten per
/// instance, never merged.
#[derive(Debug, Default)]
pub struct WatcherState {
    last_status: Option<DeploymentStatus>,
    instance_statuses: HashMap<String, InstanceStatus>,
    seen_events: HashMap<String, HashSet<String>>,
}

impl WatcherState {
    /// Record the deployment's aggregate status; true if it changed.
    fn record_deployment_status(&mut self, status: DeploymentStatus) -> bool {
        if self.last_status == Some(status) {
            return false;
        }
        self.last_status = Some(status);
        true
    }

    /// Record one instance snapshot, returning what changed.
    ///
    /// Event names are deduplicated for the session: a log tail is captured
    /// the first time its event name appears and never again.
    fn record_instance(&mut self, snapshot: &InstanceSnapshot) -> InstanceDelta {
        let mut delta = InstanceDelta::default();

        let seen = self
            .seen_events
            .entry(snapshot.instance_id.clone())
            .or_default();

        let previous = self
            .instance_statuses
            .insert(snapshot.instance_id.clone(), snapshot.status);
        delta.status_changed = previous != Some(snapshot.status);

        for event in &snapshot.events {
            if !seen.insert(event.name.clone()) {
                continue;
            }
            if let Some(log_tail) = event.log_tail.as_deref() {
                let trimmed = log_tail.trim();
                if !trimmed.is_empty() {
                    delta.new_logs.push(trimmed.to_string());
                }
            }
        }

        delta
    }

    /// Completion predicate.
    ///
    /// Uses the current tick's overview together with the cumulative set of
    /// instances observed so far. Must not fire before at least one instance
    /// snapshot has been recorded, even if an early overview looks complete.
    fn is_done(&self, overview: Option<&Overview>) -> bool {
        let Some(overview) = overview else {
            return false;
        };
        if self.instance_statuses.is_empty() {
            return false;
        }
        overview.finished() >= self.instance_statuses.len() as i64
    }
}

/// Outcome of one poll tick.
#[derive(Debug, Clone, Copy)]
struct TickOutcome {
    done: bool,
    failed: bool,
}

/// Run one poll: fetch snapshots, report changes, recompute completion.
async fn poll_once<P: StatusProvider, R: Reporter>(
    provider: &P,
    reporter: &R,
    state: &mut WatcherState,
    deployment_id: &str,
) -> Result<TickOutcome, ProviderError> {
    let deployment = provider.get_deployment(deployment_id).await?;

    if state.record_deployment_status(deployment.status) {
        reporter.deployment_status(deployment_id, deployment.status);
        // Overview rides along with status changes only; counts shifting
        // under an unchanged status stay quiet.
        if let Some(overview) = &deployment.overview {
            reporter.overview(deployment_id, overview);
        }
    }

    match provider.list_instances(deployment_id).await {
        Ok(instance_ids) => {
            for instance_id in instance_ids {
                let instance = provider.get_instance(deployment_id, &instance_id).await?;
                let delta = state.record_instance(&instance);
                if delta.status_changed {
                    reporter.instance_status(deployment_id, &instance.instance_id, instance.status);
                }
                for log_tail in &delta.new_logs {
                    reporter.instance_log(deployment_id, &instance.instance_id, log_tail);
                }
            }
        }
        // Instances aren't registered yet; skip the instance phase for this
        // tick and poll again.
        Err(e) if e.is_not_ready() => {}
        Err(e) => return Err(e),
    }

    let done = state.is_done(deployment.overview.as_ref());
    let failed = done
        && deployment
            .overview
            .as_ref()
            .is_some_and(|overview| overview.failed > 0);

    Ok(TickOutcome { done, failed })
}

/// Watch a deployment until every instance reaches a terminal state.
///
/// Sleeps `poll_interval` before each poll (the deployment won't be ready
/// immediately anyway). Runs until completion or the first provider error;
/// there is no backoff, retry limit, or internal timeout.
///
/// Returns `WatchError::DeploymentFailed` if any instance failed.
pub async fn watch_deployment<P: StatusProvider, R: Reporter>(
    provider: &P,
    reporter: &R,
    deployment_id: &str,
    poll_interval: Duration,
) -> Result<(), WatchError> {
    let mut state = WatcherState::default();

    loop {
        tokio::time::sleep(poll_interval).await;

        let outcome = poll_once(provider, reporter, &mut state, deployment_id).await?;
        if outcome.done {
            return if outcome.failed {
                Err(WatchError::DeploymentFailed)
            } else {
                Ok(())
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::LifecycleEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const DEPLOYMENT_ID: &str = "d-TEST123";

    #[derive(Debug, Clone, PartialEq)]
    enum Report {
        Deployment(DeploymentStatus),
        Overview(Overview),
        Instance(String, InstanceStatus),
        Log(String, String),
    }

    /// Reporter that records every call for assertions.
    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<Report>>,
    }

    impl RecordingReporter {
        fn take(&self) -> Vec<Report> {
            std::mem::take(&mut *self.reports.lock().unwrap())
        }
    }

    impl Reporter for RecordingReporter {
        fn deployment_status(&self, _id: &str, status: DeploymentStatus) {
            self.reports.lock().unwrap().push(Report::Deployment(status));
        }

        fn overview(&self, _id: &str, overview: &Overview) {
            self.reports.lock().unwrap().push(Report::Overview(*overview));
        }

        fn instance_status(&self, _id: &str, instance_id: &str, status: InstanceStatus) {
            self.reports
                .lock()
                .unwrap()
                .push(Report::Instance(instance_id.to_string(), status));
        }

        fn instance_log(&self, _id: &str, instance_id: &str, log_tail: &str) {
            self.reports
                .lock()
                .unwrap()
                .push(Report::Log(instance_id.to_string(), log_tail.to_string()));
        }
    }

    fn snapshot(status: DeploymentStatus, overview: Option<Overview>) -> DeploymentSnapshot {
        DeploymentSnapshot { status, overview }
    }

    fn instance(id: &str, status: InstanceStatus, events: Vec<LifecycleEvent>) -> InstanceSnapshot {
        InstanceSnapshot {
            instance_id: id.to_string(),
            status,
            events,
        }
    }

    fn event(name: &str, log_tail: Option<&str>) -> LifecycleEvent {
        LifecycleEvent {
            name: name.to_string(),
            log_tail: log_tail.map(str::to_string),
        }
    }

    fn tick_interval() -> Duration {
        Duration::from_millis(1)
    }

    #[test]
    fn unchanged_deployment_status_recorded_once() {
        let mut state = WatcherState::default();
        assert!(state.record_deployment_status(DeploymentStatus::Created));
        assert!(!state.record_deployment_status(DeploymentStatus::Created));
        assert!(state.record_deployment_status(DeploymentStatus::InProgress));
        assert!(!state.record_deployment_status(DeploymentStatus::InProgress));
    }

    #[test]
    fn instance_status_change_detection() {
        let mut state = WatcherState::default();

        // First observation counts as a change
        let delta = state.record_instance(&instance("i-1", InstanceStatus::Pending, vec![]));
        assert!(delta.status_changed);

        let delta = state.record_instance(&instance("i-1", InstanceStatus::Pending, vec![]));
        assert!(!delta.status_changed);

        let delta = state.record_instance(&instance("i-1", InstanceStatus::InProgress, vec![]));
        assert!(delta.status_changed);
    }

    #[test]
    fn log_tail_captured_once_per_event_name() {
        let mut state = WatcherState::default();

        let events = vec![event("BeforeInstall", Some("  boom\n"))];
        let delta =
            state.record_instance(&instance("i-1", InstanceStatus::InProgress, events.clone()));
        assert_eq!(delta.new_logs, vec!["boom".to_string()]);

        // Same event visible next tick: no new log
        let delta = state.record_instance(&instance("i-1", InstanceStatus::InProgress, events));
        assert!(delta.new_logs.is_empty());

        // Same event name on a different instance is independent
        let delta = state.record_instance(&instance(
            "i-2",
            InstanceStatus::InProgress,
            vec![event("BeforeInstall", Some("other"))],
        ));
        assert_eq!(delta.new_logs, vec!["other".to_string()]);
    }

    #[test]
    fn empty_and_missing_log_tails_not_reported() {
        let mut state = WatcherState::default();
        let delta = state.record_instance(&instance(
            "i-1",
            InstanceStatus::InProgress,
            vec![event("ApplicationStop", None), event("BeforeInstall", Some("   \n"))],
        ));
        assert!(delta.new_logs.is_empty());

        // Both names are still marked seen: no log later either
        let delta = state.record_instance(&instance(
            "i-1",
            InstanceStatus::InProgress,
            vec![event("BeforeInstall", Some("late content"))],
        ));
        assert!(delta.new_logs.is_empty());
    }

    #[test]
    fn not_done_without_overview_or_instances() {
        let mut state = WatcherState::default();
        let complete_looking = Overview {
            succeeded: 1,
            ..Default::default()
        };

        // No overview, no instances
        assert!(!state.is_done(None));
        // Overview present but zero instances known yet
        assert!(!state.is_done(Some(&complete_looking)));

        state.record_instance(&instance("i-1", InstanceStatus::Succeeded, vec![]));
        assert!(state.is_done(Some(&complete_looking)));
        assert!(!state.is_done(None));
    }

    #[test]
    fn done_requires_all_known_instances_finished() {
        let mut state = WatcherState::default();
        state.record_instance(&instance("i-1", InstanceStatus::Succeeded, vec![]));
        state.record_instance(&instance("i-2", InstanceStatus::InProgress, vec![]));

        let partial = Overview {
            succeeded: 1,
            in_progress: 1,
            ..Default::default()
        };
        assert!(!state.is_done(Some(&partial)));

        let finished = Overview {
            succeeded: 1,
            failed: 1,
            ..Default::default()
        };
        assert!(state.is_done(Some(&finished)));
    }

    #[tokio::test]
    async fn not_ready_tick_leaves_state_untouched() {
        let mut provider = MockStatusProvider::new();
        provider.expect_get_deployment().returning(|_| {
            Ok(snapshot(DeploymentStatus::Created, None))
        });
        provider
            .expect_list_instances()
            .returning(|_| Err(ProviderError::InstancesNotReady));

        let reporter = RecordingReporter::default();
        let mut state = WatcherState::default();

        let outcome = poll_once(&provider, &reporter, &mut state, DEPLOYMENT_ID)
            .await
            .unwrap();

        assert!(!outcome.done);
        assert!(state.instance_statuses.is_empty());
        assert!(state.seen_events.is_empty());
        assert_eq!(
            reporter.take(),
            vec![Report::Deployment(DeploymentStatus::Created)]
        );
    }

    #[tokio::test]
    async fn provider_error_on_get_deployment_is_fatal() {
        let mut provider = MockStatusProvider::new();
        provider.expect_get_deployment().returning(|_| {
            Err(ProviderError::Api {
                code: Some("AccessDeniedException".to_string()),
                message: "denied".to_string(),
            })
        });

        let reporter = RecordingReporter::default();
        let result =
            watch_deployment(&provider, &reporter, DEPLOYMENT_ID, tick_interval()).await;

        assert!(matches!(result, Err(WatchError::Provider(_))));
        assert!(reporter.take().is_empty());
    }

    #[tokio::test]
    async fn instance_fetch_error_fails_the_tick() {
        let mut provider = MockStatusProvider::new();
        provider
            .expect_get_deployment()
            .returning(|_| Ok(snapshot(DeploymentStatus::InProgress, None)));
        provider
            .expect_list_instances()
            .returning(|_| Ok(vec!["i-1".to_string()]));
        provider.expect_get_instance().returning(|_, _| {
            Err(ProviderError::MalformedResponse(
                "missing instanceSummary".to_string(),
            ))
        });

        let reporter = RecordingReporter::default();
        let result =
            watch_deployment(&provider, &reporter, DEPLOYMENT_ID, tick_interval()).await;

        assert!(matches!(
            result,
            Err(WatchError::Provider(ProviderError::MalformedResponse(_)))
        ));
    }

    #[tokio::test]
    async fn status_reported_once_while_unchanged() {
        // Three ticks with the same status; deployment finishes on the third.
        let tick = Arc::new(AtomicUsize::new(0));
        let mut provider = MockStatusProvider::new();

        let t = tick.clone();
        provider.expect_get_deployment().times(3).returning(move |_| {
            let n = t.fetch_add(1, Ordering::SeqCst) + 1;
            let overview = if n < 3 {
                Overview {
                    in_progress: 1,
                    ..Default::default()
                }
            } else {
                Overview {
                    succeeded: 1,
                    ..Default::default()
                }
            };
            Ok(snapshot(DeploymentStatus::InProgress, Some(overview)))
        });
        provider
            .expect_list_instances()
            .times(3)
            .returning(|_| Ok(vec!["i-1".to_string()]));
        let t = tick.clone();
        provider.expect_get_instance().times(3).returning(move |_, _| {
            let n = t.load(Ordering::SeqCst);
            let status = if n < 3 {
                InstanceStatus::InProgress
            } else {
                InstanceStatus::Succeeded
            };
            Ok(instance("i-1", status, vec![]))
        });

        let reporter = RecordingReporter::default();
        watch_deployment(&provider, &reporter, DEPLOYMENT_ID, tick_interval())
            .await
            .unwrap();

        let reports = reporter.take();
        let deployment_reports: Vec<_> = reports
            .iter()
            .filter(|r| matches!(r, Report::Deployment(_)))
            .collect();
        assert_eq!(
            deployment_reports,
            vec![&Report::Deployment(DeploymentStatus::InProgress)]
        );
    }

    /// Scenario: created (not ready) -> in progress -> succeeded.
    #[tokio::test]
    async fn three_tick_success_scenario() {
        let tick = Arc::new(AtomicUsize::new(0));
        let mut provider = MockStatusProvider::new();

        let t = tick.clone();
        provider.expect_get_deployment().times(3).returning(move |_| {
            Ok(match t.fetch_add(1, Ordering::SeqCst) + 1 {
                1 => snapshot(DeploymentStatus::Created, None),
                2 => snapshot(
                    DeploymentStatus::InProgress,
                    Some(Overview {
                        pending: 1,
                        in_progress: 1,
                        ..Default::default()
                    }),
                ),
                _ => snapshot(
                    DeploymentStatus::Succeeded,
                    Some(Overview {
                        succeeded: 1,
                        ..Default::default()
                    }),
                ),
            })
        });

        let t = tick.clone();
        provider.expect_list_instances().times(3).returning(move |_| {
            match t.load(Ordering::SeqCst) {
                1 => Err(ProviderError::InstancesNotReady),
                _ => Ok(vec!["i-1".to_string()]),
            }
        });

        let t = tick.clone();
        provider.expect_get_instance().times(2).returning(move |_, _| {
            Ok(match t.load(Ordering::SeqCst) {
                2 => instance("i-1", InstanceStatus::InProgress, vec![]),
                _ => instance(
                    "i-1",
                    InstanceStatus::Succeeded,
                    vec![event("ApplicationStart", None)],
                ),
            })
        });

        let reporter = RecordingReporter::default();
        watch_deployment(&provider, &reporter, DEPLOYMENT_ID, tick_interval())
            .await
            .unwrap();

        assert_eq!(
            reporter.take(),
            vec![
                // Tick 1: status only, no overview present yet
                Report::Deployment(DeploymentStatus::Created),
                // Tick 2: status change, overview rides along, first instance sighting
                Report::Deployment(DeploymentStatus::InProgress),
                Report::Overview(Overview {
                    pending: 1,
                    in_progress: 1,
                    ..Default::default()
                }),
                Report::Instance("i-1".to_string(), InstanceStatus::InProgress),
                // Tick 3: final transition; event without diagnostics emits no log
                Report::Deployment(DeploymentStatus::Succeeded),
                Report::Overview(Overview {
                    succeeded: 1,
                    ..Default::default()
                }),
                Report::Instance("i-1".to_string(), InstanceStatus::Succeeded),
            ]
        );
    }

    /// Same shape as the success scenario, but the instance fails.
    #[tokio::test]
    async fn three_tick_failure_scenario() {
        let tick = Arc::new(AtomicUsize::new(0));
        let mut provider = MockStatusProvider::new();

        let t = tick.clone();
        provider.expect_get_deployment().times(3).returning(move |_| {
            Ok(match t.fetch_add(1, Ordering::SeqCst) + 1 {
                1 => snapshot(DeploymentStatus::Created, None),
                2 => snapshot(
                    DeploymentStatus::InProgress,
                    Some(Overview {
                        pending: 1,
                        in_progress: 1,
                        ..Default::default()
                    }),
                ),
                _ => snapshot(
                    DeploymentStatus::Failed,
                    Some(Overview {
                        failed: 1,
                        ..Default::default()
                    }),
                ),
            })
        });

        let t = tick.clone();
        provider.expect_list_instances().times(3).returning(move |_| {
            match t.load(Ordering::SeqCst) {
                1 => Err(ProviderError::InstancesNotReady),
                _ => Ok(vec!["i-1".to_string()]),
            }
        });

        let t = tick.clone();
        provider.expect_get_instance().times(2).returning(move |_, _| {
            Ok(match t.load(Ordering::SeqCst) {
                2 => instance("i-1", InstanceStatus::InProgress, vec![]),
                _ => instance(
                    "i-1",
                    InstanceStatus::Failed,
                    vec![event("ApplicationStart", Some("docker: no such image\n"))],
                ),
            })
        });

        let reporter = RecordingReporter::default();
        let result =
            watch_deployment(&provider, &reporter, DEPLOYMENT_ID, tick_interval()).await;
        assert!(matches!(result, Err(WatchError::DeploymentFailed)));

        let reports = reporter.take();
        assert!(reports.contains(&Report::Instance(
            "i-1".to_string(),
            InstanceStatus::Failed
        )));
        assert!(reports.contains(&Report::Log(
            "i-1".to_string(),
            "docker: no such image".to_string()
        )));
    }
}
