use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Running totals over every result this manager has had confirmed.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatistics {
    /// Results confirmed by the server, successes and failures alike.
    pub processed: u64,
    pub completed: u64,
    pub failed: u64,
    /// Sum of task wall times; each task occupies one worker.
    pub total_task_time: Duration,
    pub mean_task_time: Duration,
    /// Workers the adapter reported at startup.
    pub workers: usize,
    pub started_at: DateTime<Utc>,
}

/// Derived view for one log line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreUsage {
    pub used: Duration,
    pub available: Duration,
}

impl CoreUsage {
    /// Share of available core time spent on tasks, in percent.
    pub fn efficiency(&self) -> f64 {
        let available = self.available.as_secs_f64();
        if available <= 0.0 {
            return 0.0;
        }
        (self.used.as_secs_f64() / available * 100.0).min(100.0)
    }
}

impl ManagerStatistics {
    pub fn new(workers: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            processed: 0,
            completed: 0,
            failed: 0,
            total_task_time: Duration::ZERO,
            mean_task_time: Duration::ZERO,
            workers: workers.max(1),
            started_at,
        }
    }

    pub fn record(&mut self, success: bool, wall_time: Duration) {
        self.processed += 1;
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.total_task_time += wall_time;

        // Incremental mean: new_avg = prev_avg + (x - prev_avg) / n
        self.mean_task_time = if self.processed == 1 {
            wall_time
        } else {
            let prev = self.mean_task_time.as_nanos() as f64;
            let cur = wall_time.as_nanos() as f64;
            let avg = prev + (cur - prev) / self.processed as f64;
            Duration::from_nanos(avg as u64)
        };
    }

    pub fn core_usage(&self, now: DateTime<Utc>) -> CoreUsage {
        let elapsed = now
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default();
        CoreUsage {
            used: self.total_task_time,
            available: elapsed.saturating_mul(u32::try_from(self.workers).unwrap_or(u32::MAX)),
        }
    }

    /// Lines logged after each update cycle.
    pub fn report_lines(&self, now: DateTime<Utc>) -> Vec<String> {
        if self.processed == 0 {
            return vec!["Task statistics unavailable until first tasks return".to_string()];
        }
        let usage = self.core_usage(now);
        vec![
            format!(
                "Task Stats: Processed={}, Completed={}, Failed={}, Mean wall time={:.3}s",
                self.processed,
                self.completed,
                self.failed,
                self.mean_task_time.as_secs_f64()
            ),
            format!(
                "Core Usage vs. Max Resources: {:.2} / {:.2} core-seconds ({} workers)",
                usage.used.as_secs_f64(),
                usage.available.as_secs_f64(),
                self.workers
            ),
            format!("Core Usage Efficiency: {:.2}%", usage.efficiency()),
        ]
    }

    pub fn log(&self, manager: &str) {
        for line in self.report_lines(Utc::now()) {
            info!(manager = %manager, "{line}");
        }
    }
}
