use crate::entities::router;
use crate::scanner::probe::probe_tcp;
use crate::scanner::shell::{Credentials, ShellError, ShellSession};
use crate::services::repository::{Repository, RouterPatch};
use crate::services::telemetry::{
    self, MetricRecord, NetworkInterface,
};
use chrono::Utc;
use sea_orm::DbErr;
use std::time::Duration;
use tokio::task;
use tokio::time::timeout;

const REACHABILITY_BUDGET: Duration = Duration::from_secs(2);
const SHELL_OPEN_BUDGET: Duration = Duration::from_secs(5);
const COMMAND_BUDGET: Duration = Duration::from_secs(5);
/// Outer cap on one whole battery run.
const BATTERY_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct CollectionOutcome {
    pub online: bool,
    pub record: MetricRecord,
}

/// Collect one metric for a router and persist it, updating the router's
/// status along the way. Command-level failures never escape: they are
/// folded into the record, and only repository errors propagate.
pub async fn collect_and_store(
    repo: &dyn Repository,
    router: &router::Model,
) -> Result<CollectionOutcome, DbErr> {
    let port = router.ssh_port as u16;

    if !probe_tcp(&router.ip_address, port, REACHABILITY_BUDGET)
        .await
        .is_open()
    {
        repo.update_router(router.id, RouterPatch::status(router::STATUS_OFFLINE))
            .await?;
        return Ok(CollectionOutcome {
            online: false,
            record: MetricRecord::sentinel("Device not reachable"),
        });
    }

    let ip = router.ip_address.clone();
    let creds = Credentials::new(
        router.username.clone(),
        router.password.clone(),
        router.ssh_key.clone(),
    );
    let handle = task::spawn_blocking(move || run_battery(&ip, port, &creds));
    let battery = match timeout(BATTERY_DEADLINE, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ShellError::Task(join.to_string())),
        Err(_) => Err(ShellError::Timeout),
    };

    let (record, any_command_ok) = match battery {
        Ok((record, any_ok)) => (record, any_ok),
        Err(e) => {
            // Port answered but the shell did not; online with limited
            // telemetry is a first-class outcome.
            tracing::debug!(router = %router.name, "shell unavailable: {}", e);
            (MetricRecord::sentinel("SSH connection failed"), false)
        }
    };

    let patch = if any_command_ok {
        RouterPatch::seen_now(router::STATUS_ONLINE)
    } else {
        RouterPatch::status(router::STATUS_ONLINE)
    };
    repo.update_router(router.id, patch).await?;
    repo.insert_metric(router.id, Utc::now().naive_utc(), &record)
        .await?;

    Ok(CollectionOutcome {
        online: true,
        record,
    })
}

/// The full command battery against one open session. Blocking; runs on the
/// blocking pool.
fn run_battery(
    ip: &str,
    port: u16,
    creds: &Credentials,
) -> Result<(MetricRecord, bool), ShellError> {
    let mut session = ShellSession::open(ip, port, creds, SHELL_OPEN_BUDGET)?;
    let mut record = MetricRecord::default();
    let mut any_ok = false;

    if let Some(uptime) = run_parse(&mut session, "uptime", |out| {
        Some(out.trim().to_string())
    }) {
        record.uptime = uptime;
        any_ok = true;
    }

    let memory = run_parse(&mut session, "cat /proc/meminfo", telemetry::parse_meminfo)
        .or_else(|| run_parse(&mut session, "free | grep Mem", telemetry::parse_free_line));
    if let Some(memory) = memory {
        record.memory_usage = memory;
        any_ok = true;
    }

    let cpu_load = run_parse(&mut session, "cat /proc/loadavg", telemetry::parse_loadavg)
        .or_else(|| run_parse(&mut session, "uptime", telemetry::parse_uptime_load))
        .or_else(|| {
            run_parse(
                &mut session,
                "top -bn1 | grep %Cpu | awk '{print $2}'",
                telemetry::parse_top_cpu,
            )
        });
    if let Some(cpu_load) = cpu_load {
        record.cpu_load = cpu_load;
        any_ok = true;
    }

    if let Some(disk) = run_parse(&mut session, "df -h / | tail -n 1", telemetry::parse_df_line) {
        record.disk_usage = disk;
        any_ok = true;
    }

    let interfaces = collect_interfaces(&mut session);
    if !interfaces.is_empty() {
        record.network_interfaces = interfaces;
        any_ok = true;
    }

    record.wireless_clients = collect_wireless_clients(&mut session);

    session.close();
    Ok((record, any_ok))
}

/// Run one command and feed its stdout to a parser. Failures of any kind
/// (exec, timeout, non-zero exit, parse miss) collapse to `None`.
fn run_parse<T>(
    session: &mut ShellSession,
    command: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Option<T> {
    match session.run(command, COMMAND_BUDGET) {
        Ok(output) if output.succeeded() => parse(&output.stdout),
        Ok(output) => {
            tracing::trace!(
                command,
                exit = output.exit_code,
                stderr = %output.stderr.trim(),
                "command produced no usable output"
            );
            None
        }
        Err(e) => {
            tracing::trace!(command, "command failed: {}", e);
            None
        }
    }
}

fn collect_interfaces(session: &mut ShellSession) -> Vec<NetworkInterface> {
    if let Some(interfaces) = run_parse(session, "ifconfig", |out| {
        let parsed = telemetry::parse_ifconfig(out);
        if parsed.is_empty() {
            None
        } else {
            Some(parsed)
        }
    }) {
        return interfaces;
    }

    // ifconfig missing: reassemble from iproute2 and sysfs.
    let Some(names) = run_parse(session, "ip link show", |out| {
        let names = telemetry::parse_ip_link_names(out);
        if names.is_empty() {
            None
        } else {
            Some(names)
        }
    }) else {
        return Vec::new();
    };

    let mut interfaces = Vec::new();
    for name in names {
        let mut interface = run_parse(session, &format!("ip addr show {}", name), |out| {
            Some(telemetry::interface_from_ip_addr(&name, out))
        })
        .unwrap_or_else(|| NetworkInterface {
            name: name.clone(),
            ipv4: None,
            mac: None,
            rx_bytes: 0,
            tx_bytes: 0,
            status: "down".to_string(),
        });

        if interface.mac.is_none() {
            interface.mac = run_parse(
                session,
                &format!("cat /sys/class/net/{}/address", name),
                telemetry::mac_in_text,
            );
        }
        interfaces.push(interface);
    }
    interfaces
}

/// Station counts summed over every wlan* radio, with the single-radio form
/// as the fallback. Anything going wrong reads as zero clients.
fn collect_wireless_clients(session: &mut ShellSession) -> u32 {
    let has_iw = matches!(
        session.run("which iw", COMMAND_BUDGET),
        Ok(output) if output.succeeded()
    );
    if !has_iw {
        return 0;
    }

    if let Some(radios) = run_parse(session, "ls /sys/class/net | grep '^wlan'", |out| {
        let radios: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if radios.is_empty() {
            None
        } else {
            Some(radios)
        }
    }) {
        let mut total = 0;
        let mut counted = false;
        for radio in radios {
            let command = format!("iw dev {} station dump | grep Station | wc -l", radio);
            if let Some(count) = run_parse(session, &command, |out| {
                Some(telemetry::parse_station_count(out))
            }) {
                total += count;
                counted = true;
            }
        }
        if counted {
            return total;
        }
    }

    run_parse(
        session,
        "iw dev wlan0 station dump | grep Station | wc -l",
        |out| Some(telemetry::parse_station_count(out)),
    )
    .unwrap_or(0)
}
