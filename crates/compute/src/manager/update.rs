use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use fractal_core::{CompletionAck, FractalError, TaskId, TaskOutcome};

use super::{ManagerState, QueueManager, StalePayload, TaskState, TrackedTask, UpdateReport};
use crate::adapters::CompletedTask;

impl QueueManager {
    /// Run one cycle: retry stale results, push new ones, heartbeat, claim more work.
    ///
    /// Network failures are absorbed here and never returned.
    pub fn update(&mut self) -> UpdateReport {
        let claim = self.state == ManagerState::Active;
        self.cycle(claim)
    }

    /// One cycle; `claim` gates new work. Heartbeats follow the manager state.
    pub(super) fn cycle(&mut self, claim: bool) -> UpdateReport {
        let mut report = UpdateReport::default();
        if self.state == ManagerState::Stopped {
            warn!(manager = %self.name, "update on a stopped manager ignored");
            return report;
        }

        self.retry_stale(&mut report);
        self.push_new_results(&mut report);

        if self.state == ManagerState::Active {
            report.heartbeat_ok = self.send_heartbeat();
        }
        if claim && self.state == ManagerState::Active {
            self.claim_and_submit(&mut report);
        }

        self.cycles += 1;
        debug!(
            manager = %self.name,
            cycle = self.cycles,
            claimed = report.claimed,
            collected = report.collected,
            confirmed = report.confirmed,
            current = self.current_tasks.len(),
            stale_tracking = self.stale_payloads.len(),
            stale_jobs = self.n_stale_jobs,
            "update cycle"
        );
        self.statistics.log(&self.name);
        report
    }

    fn retry_stale(&mut self, report: &mut UpdateReport) {
        if self.stale_payloads.is_empty() {
            return;
        }

        let results: Vec<(TaskId, TaskOutcome)> = self
            .stale_payloads
            .iter()
            .map(|(id, payload)| (*id, payload.outcome.clone()))
            .collect();

        match self.client.complete_tasks(&self.name, &results) {
            Ok(ack) => {
                let wall_times: HashMap<TaskId, Duration> = self
                    .stale_payloads
                    .drain(..)
                    .map(|(id, payload)| (id, payload.wall_time))
                    .collect();
                info!(manager = %self.name, count = results.len(), "stale results pushed");
                self.confirm(&ack, &results, &wall_times, report);
            }
            Err(e) => {
                let retries = self.config.server_error_retries;
                for payload in self.stale_payloads.values_mut() {
                    payload.attempts += 1;
                }
                let before = self.stale_payloads.len();
                self.stale_payloads.retain(|_, payload| payload.attempts < retries);
                let promoted = before - self.stale_payloads.len();

                self.n_stale_jobs += promoted;
                report.promoted_stale += promoted;
                warn!(
                    manager = %self.name,
                    error = %e,
                    tracking = self.stale_payloads.len(),
                    promoted,
                    "retrying stale results failed"
                );
            }
        }
    }

    fn push_new_results(&mut self, report: &mut UpdateReport) {
        let collected = self.adapter.collect();
        if collected.is_empty() {
            return;
        }
        report.collected = collected.len();

        // Keep claim order on the wire.
        let mut finished: Vec<(TaskId, CompletedTask)> = Vec::with_capacity(collected.len());
        let mut collected = collected;
        self.current_tasks.retain(|id, tracked| match collected.remove(id) {
            Some(done) => {
                tracked.state = TaskState::LocalComplete;
                finished.push((*id, done));
                false
            }
            None => true,
        });
        for (id, _) in collected {
            warn!(manager = %self.name, task_id = %id, "adapter returned a task this manager does not hold");
        }
        if finished.is_empty() {
            return;
        }

        let results: Vec<(TaskId, TaskOutcome)> = finished
            .iter()
            .map(|(id, done)| (*id, done.outcome.clone()))
            .collect();

        match self.client.complete_tasks(&self.name, &results) {
            Ok(ack) => {
                let wall_times = finished
                    .iter()
                    .map(|(id, done)| (*id, done.wall_time))
                    .collect();
                self.confirm(&ack, &results, &wall_times, report);
            }
            Err(e) => {
                report.newly_stale = finished.len();
                if self.config.server_error_retries == 0 {
                    self.n_stale_jobs += finished.len();
                    report.promoted_stale += finished.len();
                } else {
                    for (id, done) in finished {
                        self.stale_payloads.insert(
                            id,
                            StalePayload {
                                outcome: done.outcome,
                                wall_time: done.wall_time,
                                attempts: 0,
                            },
                        );
                    }
                }
                warn!(
                    manager = %self.name,
                    error = %e,
                    results = report.newly_stale,
                    "pushing results failed; tracking as stale"
                );
            }
        }
    }

    /// Book-keep a server acknowledgement. Duplicates count as confirmed.
    fn confirm(
        &mut self,
        ack: &CompletionAck,
        results: &[(TaskId, TaskOutcome)],
        wall_times: &HashMap<TaskId, Duration>,
        report: &mut UpdateReport,
    ) {
        let outcomes: HashMap<&TaskId, &TaskOutcome> = results.iter().map(|(id, o)| (id, o)).collect();

        for id in ack.accepted.iter().chain(&ack.duplicates) {
            let success = outcomes.get(id).is_some_and(|o| o.is_success());
            let wall_time = wall_times.get(id).copied().unwrap_or_default();
            self.statistics.record(success, wall_time);
            report.confirmed += 1;
            debug!(manager = %self.name, task_id = %id, state = ?TaskState::Confirmed, "result confirmed");
        }

        if !ack.rejected.is_empty() {
            report.rejected += ack.rejected.len();
            warn!(
                manager = %self.name,
                rejected = ack.rejected.len(),
                "server rejected results for tasks no longer held by this manager"
            );
        }
    }

    fn send_heartbeat(&self) -> bool {
        match self.client.heartbeat(&self.name) {
            Ok(()) => true,
            Err(FractalError::UnknownManager(_)) => {
                error!(manager = %self.name, "server no longer considers this manager active");
                false
            }
            Err(e) => {
                warn!(manager = %self.name, error = %e, "heartbeat failed");
                false
            }
        }
    }

    fn claim_and_submit(&mut self, report: &mut UpdateReport) {
        let in_flight = self.current_tasks.len().max(self.adapter.count_running());
        let capacity = self.max_tasks.saturating_sub(in_flight);
        if capacity == 0 {
            return;
        }

        let tag = self.config.queue_tag.as_deref();
        let tasks = match self.client.claim_tasks(&self.name, tag, &self.programs, capacity) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(manager = %self.name, error = %e, "claiming tasks failed");
                return;
            }
        };
        if tasks.is_empty() {
            return;
        }

        let now = Utc::now();
        report.claimed = tasks.len();
        for task in tasks {
            let id = task.id;
            self.current_tasks.insert(
                id,
                TrackedTask {
                    task: task.clone(),
                    state: TaskState::Claimed,
                    claimed_at: now,
                },
            );
            self.adapter.submit(task);
            if let Some(tracked) = self.current_tasks.get_mut(&id) {
                tracked.state = TaskState::Submitted;
            }
        }
        info!(manager = %self.name, claimed = report.claimed, capacity, "tasks acquired");
    }
}
