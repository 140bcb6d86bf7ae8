use crate::scanner::fingerprint::DiscoveredDevice;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Hard cap on one scan's wall-clock time.
pub const SCAN_DEADLINE: Duration = Duration::from_secs(600);
/// Jobs untouched for this long are eligible for eviction.
const JOB_TTL_MINUTES: i64 = 30;
const EVICTION_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Error)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    pub id: String,
    pub subnet: String,
    pub status: ScanStatus,
    pub progress: u8,
    pub message: String,
    pub devices: Vec<DiscoveredDevice>,
    pub partial_scan: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field-wise merge applied atomically under the map entry lock.
#[derive(Debug, Default)]
pub struct JobPatch {
    pub status: Option<ScanStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub devices: Option<Vec<DiscoveredDevice>>,
    pub partial_scan: Option<bool>,
    pub error: Option<String>,
}

impl JobPatch {
    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn completed(
        devices: Vec<DiscoveredDevice>,
        partial_scan: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: Some(ScanStatus::Completed),
            progress: Some(100),
            message: Some(message.into()),
            devices: Some(devices),
            partial_scan: Some(partial_scan),
            ..Self::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            status: Some(ScanStatus::Error),
            progress: Some(100),
            message: Some(format!("Scan failed: {}", reason)),
            error: Some(reason),
            ..Self::default()
        }
    }
}

/// In-memory registry of scan jobs. Not persistent: a restart drops
/// in-flight jobs and the client re-issues.
pub struct ScanJobRegistry {
    jobs: DashMap<String, ScanJob>,
}

impl ScanJobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    pub fn create(&self, subnet: &str) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let id = format!("scan_{}_{}", Utc::now().timestamp_millis(), suffix);

        let now = Utc::now();
        self.jobs.insert(
            id.clone(),
            ScanJob {
                id: id.clone(),
                subnet: subnet.to_string(),
                status: ScanStatus::Pending,
                progress: 0,
                message: "Scan queued".to_string(),
                devices: Vec::new(),
                partial_scan: false,
                error: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn get(&self, id: &str) -> Option<ScanJob> {
        self.jobs.get(id).map(|entry| entry.clone())
    }

    /// Merge a patch into a job. Progress never moves backwards, and a
    /// terminal status pins it at 100.
    pub fn update(&self, id: &str, patch: JobPatch) {
        let Some(mut job) = self.jobs.get_mut(id) else {
            return;
        };

        if let Some(status) = patch.status {
            if !job.status.is_terminal() {
                job.status = status;
            }
        }
        if let Some(progress) = patch.progress {
            job.progress = job.progress.max(progress.min(100));
        }
        if job.status.is_terminal() {
            job.progress = 100;
        }
        if let Some(message) = patch.message {
            job.message = message;
        }
        if let Some(devices) = patch.devices {
            job.devices = devices;
        }
        if let Some(partial) = patch.partial_scan {
            job.partial_scan = partial;
        }
        if let Some(error) = patch.error {
            job.error = Some(error);
        }
        job.updated_at = Utc::now();
    }

    /// Move a pending job to running and execute its scan under the scan
    /// deadline. Starting a non-pending job is a no-op.
    pub fn start<F>(self: &Arc<Self>, id: &str, scan: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let Some(mut job) = self.jobs.get_mut(id) else {
                return;
            };
            if job.status != ScanStatus::Pending {
                return;
            }
            job.status = ScanStatus::Running;
            job.message = "Scan started".to_string();
            job.updated_at = Utc::now();
        }

        let registry = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            if tokio::time::timeout(SCAN_DEADLINE, scan).await.is_err() {
                tracing::warn!(job = %id, "scan hit the {}s deadline", SCAN_DEADLINE.as_secs());
                registry.update(&id, JobPatch::failed("timed out"));
            }
        });
    }

    pub fn evict_stale(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::minutes(JOB_TTL_MINUTES);
        let before = self.jobs.len();
        self.jobs.retain(|_, job| job.updated_at > cutoff);
        before - self.jobs.len()
    }

    pub fn spawn_eviction_sweep(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(EVICTION_INTERVAL).await;
                let evicted = registry.evict_stale();
                if evicted > 0 {
                    tracing::debug!("evicted {} stale scan job(s)", evicted);
                }
            }
        });
    }

    #[cfg(test)]
    fn backdate(&self, id: &str, minutes: i64) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            job.updated_at = Utc::now() - ChronoDuration::minutes(minutes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_carry_the_scan_prefix() {
        let registry = ScanJobRegistry::new();
        let id = registry.create("192.168.1.");
        assert!(id.starts_with("scan_"));
        assert_eq!(id.split('_').count(), 3);

        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, ScanStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.subnet, "192.168.1.");
    }

    #[test]
    fn progress_never_regresses() {
        let registry = ScanJobRegistry::new();
        let id = registry.create("10.0.0.");

        registry.update(&id, JobPatch::progress(40, "sweeping"));
        registry.update(&id, JobPatch::progress(20, "late update"));

        let job = registry.get(&id).unwrap();
        assert_eq!(job.progress, 40);
        assert_eq!(job.message, "late update");
    }

    #[test]
    fn terminal_status_pins_progress_at_100() {
        let registry = ScanJobRegistry::new();
        let id = registry.create("10.0.0.");

        registry.update(&id, JobPatch::progress(55, "fingerprinting"));
        registry.update(&id, JobPatch::failed("timed out"));

        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, ScanStatus::Error);
        assert_eq!(job.progress, 100);
        assert_eq!(job.error.as_deref(), Some("timed out"));

        // Terminal states are absorbing.
        registry.update(
            &id,
            JobPatch {
                status: Some(ScanStatus::Running),
                ..JobPatch::default()
            },
        );
        assert_eq!(registry.get(&id).unwrap().status, ScanStatus::Error);
    }

    #[test]
    fn stale_jobs_are_evicted() {
        let registry = ScanJobRegistry::new();
        let stale = registry.create("10.0.0.");
        let fresh = registry.create("10.0.1.");

        registry.backdate(&stale, 31);
        assert_eq!(registry.evict_stale(), 1);
        assert!(registry.get(&stale).is_none());
        assert!(registry.get(&fresh).is_some());
    }

    #[tokio::test]
    async fn starting_a_running_job_is_a_no_op() {
        let registry = Arc::new(ScanJobRegistry::new());
        let id = registry.create("10.0.0.");

        registry.start(&id, async {});
        let first = registry.get(&id).unwrap();
        assert_eq!(first.status, ScanStatus::Running);

        // A second start must not reset the message or respawn the scan.
        registry.update(&id, JobPatch::progress(10, "sweeping"));
        registry.start(&id, async {});
        assert_eq!(registry.get(&id).unwrap().message, "sweeping");
    }
}
