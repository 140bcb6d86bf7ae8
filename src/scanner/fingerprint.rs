use crate::scanner::shell::{Credentials, ShellError, ShellSession};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::task;
use tokio::time::timeout;

/// Total budget for the single-command quick pass.
const QUICK_BUDGET: Duration = Duration::from_millis(3500);
/// Total budget for the fallback-chain extended pass.
const EXTENDED_BUDGET: Duration = Duration::from_secs(8);
/// Per-command budget inside the extended chains.
const CHAIN_COMMAND_BUDGET: Duration = Duration::from_millis(1500);

const QUICK_COMMAND: &str = "hostname; \
cat /etc/openwrt_release 2>/dev/null || cat /etc/os-release 2>/dev/null; \
ip link show | grep link/ether | head -1";

const HOSTNAME_CHAIN: &[&str] = &[
    "cat /proc/sys/kernel/hostname",
    "hostname",
    "uci get system.@system[0].hostname",
    "cat /etc/config/system | grep hostname | cut -d \"'\" -f 2",
    "cat /etc/hostname",
];

const RELEASE_CHAIN: &[&str] = &[
    "cat /etc/openwrt_release",
    "cat /etc/os-release | grep -i openwrt",
    "ubus call system board",
    "uci show system.@system[0]",
];

const MAC_CHAIN: &[&str] = &[
    "ip link show | grep link/ether | awk '{print $2}' | head -1",
    "ifconfig | grep -E \"HWaddr|ether\" | head -1",
    "cat /sys/class/net/br-lan/address || cat /sys/class/net/eth0/address || cat /sys/class/net/wlan0/address",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub ip_address: String,
    pub hostname: String,
    pub mac_address: Option<String>,
    pub is_open_wrt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
}

fn mac_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)([0-9a-f]{2}[:\-]){5}[0-9a-f]{2}").unwrap()
    })
}

/// First IEEE-802 address in the text, normalised to lower-case colon form.
pub fn extract_mac(text: &str) -> Option<String> {
    mac_pattern()
        .find(text)
        .map(|m| m.as_str().to_lowercase().replace('-', ":"))
}

/// Explicit firmware markers only. A generic hostname is not enough to call
/// something a router, so plain Linux boxes come back as non-routers.
pub fn is_router_output(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("openwrt") || lower.contains("lede") || text.contains("DISTRIB_")
}

/// Stand-in record for a host with an open service port that refused every
/// shell attempt. Operators can still enrol it by hand.
pub fn degraded_device(ip: &str) -> DiscoveredDevice {
    let last_octet = ip.rsplit('.').next().unwrap_or("0");
    DiscoveredDevice {
        ip_address: ip.to_string(),
        hostname: format!("Router-{}", last_octet),
        mac_address: None,
        is_open_wrt: true,
        note: Some("SSH connection failed; detected by open port only".to_string()),
        ssh_success: Some(false),
        exists: None,
    }
}

/// Quick fingerprint: one session, one combined command, 3.5s overall.
pub async fn quick(
    ip: String,
    port: u16,
    creds: Credentials,
) -> Result<DiscoveredDevice, ShellError> {
    let handle = task::spawn_blocking(move || quick_blocking(&ip, port, &creds));

    match timeout(QUICK_BUDGET, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ShellError::Task(join.to_string())),
        Err(_) => Err(ShellError::Timeout),
    }
}

fn quick_blocking(ip: &str, port: u16, creds: &Credentials) -> Result<DiscoveredDevice, ShellError> {
    let mut session = ShellSession::open(ip, port, creds, Duration::from_millis(2000))?;
    let output = session.run(QUICK_COMMAND, Duration::from_millis(1500));
    session.close();
    let output = output?;

    let hostname = output
        .stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string();

    Ok(DiscoveredDevice {
        ip_address: ip.to_string(),
        hostname,
        mac_address: extract_mac(&output.stdout),
        is_open_wrt: is_router_output(&output.stdout),
        note: None,
        ssh_success: Some(true),
        exists: None,
    })
}

/// Extended fingerprint: three fallback chains, each stopping at the first
/// command that produces usable output. 8s overall.
pub async fn extended(
    ip: String,
    port: u16,
    creds: Credentials,
) -> Result<DiscoveredDevice, ShellError> {
    let handle = task::spawn_blocking(move || extended_blocking(&ip, port, &creds));

    match timeout(EXTENDED_BUDGET, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ShellError::Task(join.to_string())),
        Err(_) => Err(ShellError::Timeout),
    }
}

fn extended_blocking(
    ip: &str,
    port: u16,
    creds: &Credentials,
) -> Result<DiscoveredDevice, ShellError> {
    let mut session = ShellSession::open(ip, port, creds, Duration::from_millis(3000))?;

    let hostname = first_chain_hit(&mut session, HOSTNAME_CHAIN)
        .map(|out| out.lines().next().unwrap_or("").trim().to_string())
        .unwrap_or_default();

    let is_open_wrt = first_chain_hit(&mut session, RELEASE_CHAIN)
        .map(|out| is_router_output(&out))
        .unwrap_or(false);

    let mac_address = first_chain_hit(&mut session, MAC_CHAIN)
        .as_deref()
        .and_then(extract_mac);

    session.close();

    Ok(DiscoveredDevice {
        ip_address: ip.to_string(),
        hostname,
        mac_address,
        is_open_wrt,
        note: None,
        ssh_success: Some(true),
        exists: None,
    })
}

/// Walk a command chain until one succeeds. A command that times out or
/// errors just moves the chain along.
fn first_chain_hit(session: &mut ShellSession, chain: &[&str]) -> Option<String> {
    for command in chain {
        match session.run(command, CHAIN_COMMAND_BUDGET) {
            Ok(output) if output.succeeded() => return Some(output.stdout),
            _ => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_is_normalised_to_lowercase_colons() {
        assert_eq!(
            extract_mac("link/ether AA:BB:CC:DD:EE:FF brd ff:ff:ff:ff:ff:ff"),
            Some("aa:bb:cc:dd:ee:ff".to_string())
        );
        assert_eq!(
            extract_mac("HWaddr 00-14-22-01-23-45"),
            Some("00:14:22:01:23:45".to_string())
        );
        assert_eq!(extract_mac("no hardware address here"), None);
    }

    #[test]
    fn first_mac_wins() {
        let output = "eth0 link/ether 11:22:33:44:55:66\nwlan0 link/ether aa:aa:aa:aa:aa:aa";
        assert_eq!(extract_mac(output), Some("11:22:33:44:55:66".to_string()));
    }

    #[test]
    fn router_markers_are_explicit() {
        assert!(is_router_output("DISTRIB_ID='OpenWrt'"));
        assert!(is_router_output("NAME=\"OpenWrt\""));
        assert!(is_router_output("LEDE Reboot 17.01"));
        // A bare non-localhost hostname is not a marker.
        assert!(!is_router_output("debian-box"));
        assert!(!is_router_output("PRETTY_NAME=\"Debian GNU/Linux 12\""));
    }

    #[test]
    fn degraded_device_keeps_the_last_octet() {
        let device = degraded_device("192.168.1.36");
        assert_eq!(device.hostname, "Router-36");
        assert!(device.is_open_wrt);
        assert_eq!(device.ssh_success, Some(false));
        assert!(device.mac_address.is_none());
        assert!(device.note.is_some());
    }
}
