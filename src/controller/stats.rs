//! Queue statistics and status reports.

use crate::types::{Lane, QueueStats};
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::PackagingController;

impl PackagingController {
    /// Snapshot of the scheduler state
    pub async fn stats(&self) -> QueueStats {
        let scheduler = &self.config.scheduler;
        let (queued, queued_large, longest_wait) = {
            let queue = self.state.queue.lock().await;
            let queued_large = queue.iter().filter(|item| item.lane == Lane::Large).count();
            let longest_wait = queue
                .iter()
                .map(|item| item.submitted_at.elapsed())
                .max()
                .unwrap_or_default();
            (queue.len(), queued_large, longest_wait)
        };

        QueueStats {
            active: scheduler
                .max_total_jobs
                .saturating_sub(self.state.total_limit.available_permits()),
            active_large: scheduler
                .max_large_jobs
                .saturating_sub(self.state.large_limit.available_permits()),
            queued,
            queued_large,
            queue_high_water: self.counters.queue_high_water.load(Ordering::Relaxed),
            total_packaged: self.counters.total_packaged.load(Ordering::Relaxed),
            total_immediate: self.counters.total_immediate.load(Ordering::Relaxed),
            longest_wait_ms: longest_wait.as_millis() as u64,
            max_large_jobs: scheduler.max_large_jobs,
            max_total_jobs: scheduler.max_total_jobs,
            accepting_new: self.state.accepting_new.load(Ordering::SeqCst),
        }
    }

    /// Human-readable scheduler summary, one line per figure
    pub async fn status_lines(&self) -> Vec<String> {
        let stats = self.stats().await;
        if stats.total_packaged == 0 && stats.active == 0 && stats.queued == 0 {
            return vec!["  - Not Active".to_string()];
        }

        vec![
            format!(
                "  - Large packagers running: {} of {}",
                stats.active_large, stats.max_large_jobs
            ),
            format!(
                "  - Packagers running: {} of {}",
                stats.active, stats.max_total_jobs
            ),
            format!(
                "  - Longest current wait: {}",
                format_wait(Duration::from_millis(stats.longest_wait_ms))
            ),
            format!("  - Total packaged: {}", stats.total_packaged),
            format!(
                "  - Total packaged in background: {}",
                stats.total_packaged.saturating_sub(stats.total_immediate)
            ),
            format!("  - Total immediate: {}", stats.total_immediate),
            format!("  - Queue high water mark: {}", stats.queue_high_water),
            format!("  - Large packages waiting: {}", stats.queued_large),
            format!("  - Queue size: {}", stats.queued),
        ]
    }

    /// Whether more packages are waiting than `warning_queue_size`
    pub async fn is_queue_long(&self) -> bool {
        self.state.queue.lock().await.len() > self.config.scheduler.warning_queue_size
    }

    pub(crate) async fn log_status_report(&self) {
        let lines = self.status_lines().await;
        tracing::info!("Packaging queue status report\n{}", lines.join("\n"));
        if self.is_queue_long().await {
            tracing::warn!(
                warning_queue_size = self.config.scheduler.warning_queue_size,
                "packaging queue is long"
            );
        }
    }
}

fn format_wait(wait: Duration) -> String {
    let secs = wait.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:01}s", secs, wait.subsec_millis() / 100)
    }
}
