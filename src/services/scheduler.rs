use crate::services::collector;
use crate::services::repository::Repository;
use chrono::{Datelike, Duration as ChronoDuration, Local, Timelike, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// The allowed interval ladder with its wire-level cron strings.
pub const INTERVALS: &[(&str, &str)] = &[
    ("EVERY_MINUTE", "* * * * *"),
    ("EVERY_5_MINUTES", "*/5 * * * *"),
    ("EVERY_15_MINUTES", "*/15 * * * *"),
    ("EVERY_30_MINUTES", "*/30 * * * *"),
    ("HOURLY", "0 * * * *"),
    ("DAILY", "0 0 * * *"),
];

pub const DEFAULT_INTERVAL: &str = "EVERY_5_MINUTES";
const RETENTION_CRON: &str = "0 1 * * *";

/// Sub-minute tick; the minute guard keeps a schedule from firing twice.
const TICK: Duration = Duration::from_secs(20);

/// Accepts either the label or the cron string and returns both.
pub fn resolve_interval(input: &str) -> Option<(&'static str, &'static str)> {
    INTERVALS
        .iter()
        .copied()
        .find(|(label, cron)| *label == input || *cron == input)
}

/// Periodic fan-out of the collector plus the daily retention sweep. The
/// two jobs start and stop independently; reconfiguration is serialised on
/// the collection handle lock.
pub struct MetricsScheduler {
    repo: Arc<dyn Repository>,
    interval: RwLock<&'static str>,
    collection: Mutex<Option<JoinHandle<()>>>,
    retention: Mutex<Option<JoinHandle<()>>>,
    collection_running: AtomicBool,
}

impl MetricsScheduler {
    pub fn new(repo: Arc<dyn Repository>, interval: &'static str) -> Self {
        Self {
            repo,
            interval: RwLock::new(interval),
            collection: Mutex::new(None),
            retention: Mutex::new(None),
            collection_running: AtomicBool::new(false),
        }
    }

    pub async fn current_interval(&self) -> &'static str {
        *self.interval.read().await
    }

    pub fn is_collecting(&self) -> bool {
        self.collection_running.load(Ordering::Relaxed)
    }

    pub async fn start_collection(self: &Arc<Self>) {
        let mut slot = self.collection.lock().await;
        if slot.is_some() {
            return;
        }

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut last_fired: Option<String> = None;
            loop {
                tokio::time::sleep(TICK).await;
                let cron = {
                    let label = *scheduler.interval.read().await;
                    resolve_interval(label).map(|(_, cron)| cron).unwrap_or("*/5 * * * *")
                };
                if fire_due(cron, &mut last_fired) {
                    scheduler.run_collection_cycle().await;
                }
            }
        });
        *slot = Some(handle);
        self.collection_running.store(true, Ordering::Relaxed);
        let interval = *self.interval.read().await;
        info!(interval, "metrics collection scheduled");
    }

    pub async fn stop_collection(&self) {
        let mut slot = self.collection.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        self.collection_running.store(false, Ordering::Relaxed);
    }

    /// Swap the collection schedule at runtime: stop, install, start.
    pub async fn reconfigure(self: &Arc<Self>, input: &str) -> Option<&'static str> {
        let (label, _cron) = resolve_interval(input)?;
        self.stop_collection().await;
        *self.interval.write().await = label;
        self.start_collection().await;
        info!(interval = label, "collection interval reconfigured");
        Some(label)
    }

    pub async fn start_retention(self: &Arc<Self>) {
        let mut slot = self.retention.lock().await;
        if slot.is_some() {
            return;
        }

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut last_fired: Option<String> = None;
            loop {
                tokio::time::sleep(TICK).await;
                if fire_due(RETENTION_CRON, &mut last_fired) {
                    scheduler.run_retention_sweep().await;
                }
            }
        });
        *slot = Some(handle);
        info!("retention sweep scheduled (daily at 01:00)");
    }

    pub async fn stop_retention(&self) {
        let mut slot = self.retention.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// One collection pass over every monitored router. Failures are
    /// counted, never propagated.
    async fn run_collection_cycle(&self) {
        let routers = match self.repo.list_monitored().await {
            Ok(routers) => routers,
            Err(e) => {
                error!("collection cycle aborted, router query failed: {}", e);
                return;
            }
        };
        if routers.is_empty() {
            return;
        }

        let mut tasks = JoinSet::new();
        for router in routers {
            let repo = Arc::clone(&self.repo);
            tasks.spawn(async move {
                match collector::collect_and_store(repo.as_ref(), &router).await {
                    Ok(outcome) => {
                        debug!(
                            router = %router.name,
                            online = outcome.online,
                            "metrics collected"
                        );
                        outcome.record.error.is_none()
                    }
                    Err(e) => {
                        warn!(router = %router.name, "metrics collection failed: {}", e);
                        false
                    }
                }
            });
        }

        let (mut succeeded, mut failed) = (0u32, 0u32);
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => succeeded += 1,
                _ => failed += 1,
            }
        }
        info!(succeeded, failed, "metrics collection cycle complete");
    }

    /// Delete each router's metrics that fell off its retention horizon.
    async fn run_retention_sweep(&self) {
        let routers = match self.repo.list_routers().await {
            Ok(routers) => routers,
            Err(e) => {
                error!("retention sweep aborted, router query failed: {}", e);
                return;
            }
        };

        for router in routers {
            let cutoff = Utc::now().naive_utc()
                - ChronoDuration::days(router.metrics_retention_days as i64);
            match self.repo.delete_metrics_before(router.id, cutoff).await {
                Ok(0) => {}
                Ok(deleted) => {
                    info!(router = %router.name, deleted, "pruned aged metrics");
                }
                Err(e) => {
                    error!(router = %router.name, "retention sweep failed: {}", e);
                }
            }
        }
    }
}

/// True when the cron expression matches the current local minute and that
/// minute has not fired yet.
fn fire_due(cron: &str, last_fired: &mut Option<String>) -> bool {
    let now = Local::now();
    let minute_key = now.format("%Y-%m-%d %H:%M").to_string();
    if last_fired.as_deref() == Some(minute_key.as_str()) {
        return false;
    }
    let due = cron_matches_at(
        cron,
        now.minute(),
        now.hour(),
        now.day(),
        now.month(),
        now.weekday().num_days_from_sunday(),
    );
    if due {
        *last_fired = Some(minute_key);
    }
    due
}

fn cron_matches_at(expr: &str, minute: u32, hour: u32, dom: u32, month: u32, dow: u32) -> bool {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        warn!("invalid cron expression: {}", expr);
        return false;
    }

    cron_field_matches(fields[0], minute)
        && cron_field_matches(fields[1], hour)
        && cron_field_matches(fields[2], dom)
        && cron_field_matches(fields[3], month)
        && cron_field_matches(fields[4], dow)
}

/// Match a single cron field. Supports: *, */n, n, n-m, n,m,o
fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }

    if let Some(step_str) = field.strip_prefix("*/") {
        if let Ok(step) = step_str.parse::<u32>() {
            return step > 0 && value % step == 0;
        }
        return false;
    }

    for part in field.split(',') {
        if let Some((start_str, end_str)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_str.parse::<u32>(), end_str.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(exact) = part.parse::<u32>() {
            if value == exact {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_and_cron_strings_both_resolve() {
        assert_eq!(
            resolve_interval("EVERY_5_MINUTES"),
            Some(("EVERY_5_MINUTES", "*/5 * * * *"))
        );
        assert_eq!(
            resolve_interval("0 * * * *"),
            Some(("HOURLY", "0 * * * *"))
        );
        assert_eq!(resolve_interval("FORTNIGHTLY"), None);
        assert_eq!(resolve_interval("*/7 * * * *"), None);
    }

    #[test]
    fn cron_wildcard_and_step() {
        assert!(cron_field_matches("*", 0));
        assert!(cron_field_matches("*", 59));
        assert!(cron_field_matches("*/5", 0));
        assert!(cron_field_matches("*/5", 15));
        assert!(!cron_field_matches("*/5", 13));
        assert!(!cron_field_matches("*/0", 10));
    }

    #[test]
    fn cron_exact_range_and_list() {
        assert!(cron_field_matches("30", 30));
        assert!(!cron_field_matches("30", 31));
        assert!(cron_field_matches("1-5", 3));
        assert!(!cron_field_matches("1-5", 6));
        assert!(cron_field_matches("1,3,5", 3));
        assert!(!cron_field_matches("1,3,5", 4));
    }

    #[test]
    fn every_five_minutes_fires_on_the_marks() {
        assert!(cron_matches_at("*/5 * * * *", 0, 12, 14, 6, 3));
        assert!(cron_matches_at("*/5 * * * *", 55, 23, 1, 1, 0));
        assert!(!cron_matches_at("*/5 * * * *", 7, 12, 14, 6, 3));
    }

    #[test]
    fn retention_cron_fires_only_at_one_am() {
        assert!(cron_matches_at(RETENTION_CRON, 0, 1, 10, 3, 2));
        assert!(!cron_matches_at(RETENTION_CRON, 0, 2, 10, 3, 2));
        assert!(!cron_matches_at(RETENTION_CRON, 1, 1, 10, 3, 2));
    }

    #[test]
    fn a_minute_fires_at_most_once() {
        let mut last = Some(Local::now().format("%Y-%m-%d %H:%M").to_string());
        assert!(!fire_due("* * * * *", &mut last));

        let mut fresh = None;
        assert!(fire_due("* * * * *", &mut fresh));
        assert!(!fire_due("* * * * *", &mut fresh));
    }
}
