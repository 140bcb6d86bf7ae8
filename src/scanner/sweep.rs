use crate::scanner::fingerprint::{self, DiscoveredDevice};
use crate::scanner::jobs::{JobPatch, ScanJobRegistry};
use crate::scanner::probe::{self, probe_tcp};
use crate::scanner::shell::Credentials;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Last octets where home routers usually sit.
pub const PRIORITY_HOSTS: &[u8] = &[1, 2, 10, 20, 99, 100, 101, 102, 250, 253, 254];

const PRIORITY_PORTS: &[u16] = &[22, 80, 443, 8080];
const NEARBY_PORTS: &[u16] = &[22, 80, 443, 8080, 8081];
const SWEEP_PORTS: &[u16] = &[80, 443, 22, 8080, 8081];
const NEARBY_OFFSETS: &[i16] = &[-2, -1, 1, 2];

const SWEEP_BATCH: usize = 40;
/// With hosts already in hand, stop the full sweep after this many batches.
const SWEEP_BATCH_CUTOFF: usize = 8;

/// Outer deadlines for the per-candidate fingerprint calls.
const HINTED_FINGERPRINT_DEADLINE: Duration = Duration::from_secs(5);
const QUICK_FINGERPRINT_DEADLINE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default)]
pub struct SweepConfig {
    /// Last-octet hints that get extended timeouts and extended
    /// fingerprinting. Empty unless operator tooling supplies them.
    pub hinted_hosts: Vec<u8>,
}

#[derive(Debug)]
struct SweepOutcome {
    /// Last octets that answered a probe, plus every hinted host.
    candidates: BTreeSet<u8>,
    partial: bool,
}

/// Drive one scan job end to end: tiered sweep, then fingerprinting, with
/// progress written to the registry as it goes.
pub async fn run_scan_job(
    registry: Arc<ScanJobRegistry>,
    job_id: String,
    prefix: String,
    creds: Credentials,
    config: SweepConfig,
) {
    let report = |progress: u8, message: String| {
        registry.update(&job_id, JobPatch::progress(progress, message));
    };

    let outcome = sweep_candidates(&prefix, &config, &report).await;
    let total = outcome.candidates.len();
    tracing::info!(
        subnet = %prefix,
        candidates = total,
        partial = outcome.partial,
        "sweep finished"
    );

    report(60, format!("Fingerprinting {} host(s)...", total));
    let devices =
        fingerprint_candidates(&prefix, &outcome.candidates, &creds, &config.hinted_hosts, &report)
            .await;

    let found = devices.len();
    registry.update(
        &job_id,
        JobPatch::completed(
            devices,
            outcome.partial,
            format!("Scan complete: {} device(s) found", found),
        ),
    );
}

async fn sweep_candidates(
    prefix: &str,
    config: &SweepConfig,
    report: &impl Fn(u8, String),
) -> SweepOutcome {
    let mut probed: BTreeSet<u8> = BTreeSet::new();
    let mut found: BTreeSet<u8> = BTreeSet::new();

    // Tier 1: the short list of likely router addresses.
    report(5, "Probing priority hosts...".to_string());
    let tier1 = probe_octets(
        prefix,
        PRIORITY_HOSTS.iter().copied(),
        PRIORITY_PORTS,
        probe::QUICK_TIMEOUT,
    )
    .await;
    probed.extend(PRIORITY_HOSTS.iter().copied());
    found.extend(tier1);

    if found.len() >= 2 {
        return SweepOutcome {
            candidates: with_hints(found, &config.hinted_hosts),
            partial: true,
        };
    }

    // Tier 2: widen around every hinted host.
    if !config.hinted_hosts.is_empty() {
        report(15, "Probing hinted hosts...".to_string());
        let neighborhood: BTreeSet<u8> = config
            .hinted_hosts
            .iter()
            .flat_map(|&h| nearby_octets(h))
            .collect();
        let tier2 = probe_octets(
            prefix,
            neighborhood.iter().copied(),
            NEARBY_PORTS,
            probe::NEARBY_TIMEOUT,
        )
        .await;
        probed.extend(neighborhood);
        found.extend(tier2);
    }

    // Tier 3: everything else, probed as (host, port) pairs in batches of
    // SWEEP_BATCH concurrent connects.
    report(20, "Sweeping subnet...".to_string());
    let pairs: Vec<(u8, u16)> = (1..=254)
        .filter(|octet| !probed.contains(octet))
        .flat_map(|octet| SWEEP_PORTS.iter().map(move |&port| (octet, port)))
        .collect();
    let total_batches = pairs.len().div_ceil(SWEEP_BATCH).max(1);
    let mut partial = false;

    for (index, batch) in pairs.chunks(SWEEP_BATCH).enumerate() {
        let hits = probe_pairs(prefix, batch, &found, probe::ULTRA_TIMEOUT).await;
        found.extend(hits);

        let done = index + 1;
        let progress = 20 + (done * 38 / total_batches) as u8;
        report(
            progress.min(58),
            format!("Sweeping subnet ({}/{} batches)...", done, total_batches),
        );

        if done >= SWEEP_BATCH_CUTOFF && done < total_batches && !found.is_empty() {
            partial = true;
            break;
        }
    }

    SweepOutcome {
        candidates: with_hints(found, &config.hinted_hosts),
        partial,
    }
}

/// Probe a set of last octets concurrently; an octet counts as soon as any
/// of its ports answers.
async fn probe_octets(
    prefix: &str,
    octets: impl Iterator<Item = u8>,
    ports: &'static [u16],
    budget: Duration,
) -> BTreeSet<u8> {
    let mut tasks = JoinSet::new();
    for octet in octets {
        let ip = format!("{}{}", prefix, octet);
        tasks.spawn(async move {
            for &port in ports {
                if probe_tcp(&ip, port, budget).await.is_open() {
                    return Some(octet);
                }
            }
            None
        });
    }

    let mut open = BTreeSet::new();
    while let Some(result) = tasks.join_next().await {
        if let Ok(Some(octet)) = result {
            open.insert(octet);
        }
    }
    open
}

/// Probe one batch of (octet, port) pairs concurrently, skipping octets that
/// already answered in an earlier batch.
async fn probe_pairs(
    prefix: &str,
    pairs: &[(u8, u16)],
    already_found: &BTreeSet<u8>,
    budget: Duration,
) -> BTreeSet<u8> {
    let mut tasks = JoinSet::new();
    for &(octet, port) in pairs {
        if already_found.contains(&octet) {
            continue;
        }
        let ip = format!("{}{}", prefix, octet);
        tasks.spawn(async move {
            if probe_tcp(&ip, port, budget).await.is_open() {
                Some(octet)
            } else {
                None
            }
        });
    }

    let mut open = BTreeSet::new();
    while let Some(result) = tasks.join_next().await {
        if let Ok(Some(octet)) = result {
            open.insert(octet);
        }
    }
    open
}

fn nearby_octets(hint: u8) -> Vec<u8> {
    let mut octets = vec![hint];
    for &offset in NEARBY_OFFSETS {
        let neighbor = hint as i16 + offset;
        if (1..=254).contains(&neighbor) {
            octets.push(neighbor as u8);
        }
    }
    octets
}

/// Hinted hosts are first-class candidates even when every probe missed.
fn with_hints(mut found: BTreeSet<u8>, hints: &[u8]) -> BTreeSet<u8> {
    found.extend(hints.iter().copied());
    found
}

async fn fingerprint_candidates(
    prefix: &str,
    candidates: &BTreeSet<u8>,
    creds: &Credentials,
    hints: &[u8],
    report: &impl Fn(u8, String),
) -> Vec<DiscoveredDevice> {
    let total = candidates.len();
    if total == 0 {
        return Vec::new();
    }

    let mut tasks = JoinSet::new();
    for &octet in candidates {
        let ip = format!("{}{}", prefix, octet);
        let creds = creds.clone();
        let hinted = hints.contains(&octet);
        tasks.spawn(async move { (octet, fingerprint_host(ip, hinted, creds).await) });
    }

    let mut results: Vec<(u8, DiscoveredDevice)> = Vec::new();
    let mut done = 0usize;
    while let Some(joined) = tasks.join_next().await {
        done += 1;
        report(
            (60 + done * 35 / total).min(95) as u8,
            format!("Fingerprinting hosts ({}/{})...", done, total),
        );
        if let Ok((octet, Some(device))) = joined {
            results.push((octet, device));
        }
    }

    results.sort_by_key(|(octet, _)| *octet);
    results.into_iter().map(|(_, device)| device).collect()
}

/// Hinted hosts always yield a device, degraded if the shell never opened.
/// Everyone else is only reported on a successful fingerprint.
async fn fingerprint_host(ip: String, hinted: bool, creds: Credentials) -> Option<DiscoveredDevice> {
    if hinted {
        match timeout(
            HINTED_FINGERPRINT_DEADLINE,
            fingerprint::extended(ip.clone(), 22, creds),
        )
        .await
        {
            Ok(Ok(device)) => Some(device),
            Ok(Err(_)) | Err(_) => Some(fingerprint::degraded_device(&ip)),
        }
    } else {
        match timeout(
            QUICK_FINGERPRINT_DEADLINE,
            fingerprint::quick(ip.clone(), 22, creds),
        )
        .await
        {
            Ok(Ok(device)) => Some(device),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_octets_clamp_to_the_host_range() {
        let low = nearby_octets(1);
        assert!(low.contains(&1) && low.contains(&2) && low.contains(&3));
        assert!(!low.iter().any(|&o| o == 0));

        let high = nearby_octets(254);
        assert!(high.contains(&252) && high.contains(&254));
    }

    #[test]
    fn hints_are_forced_into_the_candidate_set() {
        let found: BTreeSet<u8> = [10, 20].into_iter().collect();
        let candidates = with_hints(found, &[36, 10]);
        assert_eq!(candidates.into_iter().collect::<Vec<_>>(), vec![10, 20, 36]);
    }

    #[tokio::test]
    async fn sweep_on_a_dead_subnet_completes_without_candidates() {
        // TEST-NET-2: nothing answers, so the sweep must run to the end.
        let report = |_p: u8, _m: String| {};
        let config = SweepConfig::default();
        let outcome = sweep_candidates("198.51.100.", &config, &report).await;
        assert!(outcome.candidates.is_empty());
        assert!(!outcome.partial);
    }
}
