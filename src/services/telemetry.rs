//! Parsers that turn raw shell output from a router into the structured
//! metric record. Every parser is total over garbage input: a miss returns
//! `None` and the collector keeps the field at its zero value.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    /// All kB, straight from /proc/meminfo.
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub percentage: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percentage: u32,
    /// Human-readable values exactly as `df -h` printed them.
    pub total_raw: String,
    pub used_raw: String,
    pub free_raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    pub ipv4: Option<String>,
    pub mac: Option<String>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub status: String,
}

/// One collection result. Structurally complete: absent sub-fields stay at
/// their zero values so consumers never null-check.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub uptime: String,
    pub cpu_load: f64,
    pub memory_usage: MemoryUsage,
    pub disk_usage: DiskUsage,
    pub network_interfaces: Vec<NetworkInterface>,
    pub wireless_clients: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricRecord {
    pub fn sentinel(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

fn regex(pattern: &'static str, cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

macro_rules! cached_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static CELL: OnceLock<Regex> = OnceLock::new();
            regex($pattern, &CELL)
        }
    };
}

cached_regex!(load_average_re, r"load average:\s*([0-9.]+)");
cached_regex!(inet_addr_re, r"inet addr:\s*([0-9]{1,3}(?:\.[0-9]{1,3}){3})");
cached_regex!(inet_re, r"inet\s+([0-9]{1,3}(?:\.[0-9]{1,3}){3})");
cached_regex!(
    mac_prefixed_re,
    r"(?i)(?:HWaddr|link/ether|ether)\s+([0-9a-f]{2}(?::[0-9a-f]{2}){5})"
);
cached_regex!(mac_bare_re, r"(?i)\b[0-9a-f]{2}(?::[0-9a-f]{2}){5}\b");
cached_regex!(rx_bytes_re, r"RX bytes:\s*(\d+)");
cached_regex!(tx_bytes_re, r"TX bytes:\s*(\d+)");

fn meminfo_field(text: &str, key: &str) -> u64 {
    text.lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Parse /proc/meminfo. Prefers MemAvailable when the kernel reports it,
/// otherwise reconstructs it from free + buffers + cached.
pub fn parse_meminfo(text: &str) -> Option<MemoryUsage> {
    let total = meminfo_field(text, "MemTotal:");
    if total == 0 {
        return None;
    }

    let free = meminfo_field(text, "MemFree:");
    let available = meminfo_field(text, "MemAvailable:");
    let buffers = meminfo_field(text, "Buffers:");
    let cached = meminfo_field(text, "Cached:");

    let effective_free = if available > 0 {
        available
    } else {
        free + buffers + cached
    };
    let used = total.saturating_sub(effective_free);

    Some(MemoryUsage {
        total,
        free: effective_free,
        used,
        percentage: ratio_percent(used, total),
    })
}

/// Parse the `Mem:` row of busybox `free`.
pub fn parse_free_line(text: &str) -> Option<MemoryUsage> {
    let line = text.lines().find(|l| l.trim_start().starts_with("Mem:"))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 3 {
        return None;
    }

    let (total, used, free) = (fields[0], fields[1], fields[2]);
    if total == 0 {
        return None;
    }
    Some(MemoryUsage {
        total,
        free,
        used,
        percentage: ratio_percent(used, total),
    })
}

fn ratio_percent(part: u64, whole: u64) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as u32
}

/// First field of /proc/loadavg.
pub fn parse_loadavg(text: &str) -> Option<f64> {
    text.split_whitespace()
        .next()
        .and_then(|field| field.parse::<f64>().ok())
        .filter(|load| *load >= 0.0)
}

/// `load average: 0.52, ...` from `uptime`.
pub fn parse_uptime_load(text: &str) -> Option<f64> {
    load_average_re()
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}

/// `top -bn1` CPU column, a percentage; scaled down to a load-style value.
pub fn parse_top_cpu(text: &str) -> Option<f64> {
    text.split_whitespace()
        .next()
        .and_then(|field| field.trim_end_matches('%').parse::<f64>().ok())
        .filter(|value| *value >= 0.0)
        .map(|value| value / 100.0)
}

/// `df -h` style size: bare bytes or K/KB/M/MB/G/GB/T/TB, case-insensitive,
/// 1024-based.
pub fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        "T" | "TB" => 1 << 40,
        _ => return None,
    };

    Some((value * multiplier as f64).round() as u64)
}

/// Inverse of `parse_size`, one decimal of precision.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("T", 1 << 40),
        ("G", 1 << 30),
        ("M", 1 << 20),
        ("K", 1 << 10),
    ];
    for (suffix, scale) in UNITS {
        if bytes >= scale {
            return format!("{:.1}{}", bytes as f64 / scale as f64, suffix);
        }
    }
    format!("{}", bytes)
}

/// Last line of `df -h /`. Field layout is anchored on the `NN%` column so a
/// wrapped filesystem name does not shift the numbers.
pub fn parse_df_line(line: &str) -> Option<DiskUsage> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let percent_idx = fields
        .iter()
        .position(|f| f.ends_with('%') && f.len() > 1)?;
    if percent_idx < 3 {
        return None;
    }

    let total_raw = fields[percent_idx - 3];
    let used_raw = fields[percent_idx - 2];
    let free_raw = fields[percent_idx - 1];

    let total = parse_size(total_raw)?;
    let used = parse_size(used_raw)?;
    let free = parse_size(free_raw)?;
    let percentage: u32 = fields[percent_idx]
        .trim_end_matches('%')
        .parse()
        .unwrap_or_else(|_| ratio_percent(used, total));

    Some(DiskUsage {
        total,
        used,
        free,
        percentage: percentage.min(100),
        total_raw: total_raw.to_string(),
        used_raw: used_raw.to_string(),
        free_raw: free_raw.to_string(),
    })
}

/// Block-parse `ifconfig` output. Handles both the busybox layout
/// (`eth0  Link encap:... HWaddr ...` / `inet addr:...` / `RX bytes:...`)
/// and the net-tools layout (`eth0: flags=...` / `inet ...` / `ether ...`).
pub fn parse_ifconfig(text: &str) -> Vec<NetworkInterface> {
    let mut interfaces = Vec::new();

    for block in split_blocks(text) {
        let first_line = block.lines().next().unwrap_or("");
        let name = first_line
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_end_matches(':')
            .to_string();
        if name.is_empty() {
            continue;
        }
        interfaces.push(parse_interface_block(name, &block));
    }

    interfaces
}

fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let continuation = line.starts_with(' ') || line.starts_with('\t');
        if continuation {
            // A continuation line before any block header is dropped.
            if let Some(block) = blocks.last_mut() {
                block.push('\n');
                block.push_str(line);
            }
        } else {
            blocks.push(line.to_string());
        }
    }
    blocks
}

fn parse_interface_block(name: String, block: &str) -> NetworkInterface {
    let ipv4 = inet_addr_re()
        .captures(block)
        .or_else(|| inet_re().captures(block))
        .map(|caps| caps[1].to_string());

    let mac = mac_in_text(block);

    let rx_bytes = rx_bytes_re()
        .captures(block)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0);
    let tx_bytes = tx_bytes_re()
        .captures(block)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0);

    let status = if block.contains("UP") { "up" } else { "down" };

    NetworkInterface {
        name,
        ipv4,
        mac,
        rx_bytes,
        tx_bytes,
        status: status.to_string(),
    }
}

/// MAC from a text fragment: a prefixed form wins, a bare address is the
/// fallback (covers `/sys/class/net/<iface>/address`).
pub fn mac_in_text(text: &str) -> Option<String> {
    mac_prefixed_re()
        .captures(text)
        .map(|caps| caps[1].to_lowercase())
        .or_else(|| {
            mac_bare_re()
                .find(text)
                .map(|m| m.as_str().to_lowercase())
        })
}

/// Build an interface record from `ip addr show <iface>` output.
pub fn interface_from_ip_addr(name: &str, text: &str) -> NetworkInterface {
    NetworkInterface {
        name: name.to_string(),
        ipv4: inet_addr_re()
            .captures(text)
            .or_else(|| inet_re().captures(text))
            .map(|caps| caps[1].to_string()),
        mac: mac_in_text(text),
        rx_bytes: 0,
        tx_bytes: 0,
        status: if text.contains("UP") { "up" } else { "down" }.to_string(),
    }
}

/// Interface names from `ip link show`: `2: eth0: <BROADCAST,...> ...`.
pub fn parse_ip_link_names(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let index = parts.next()?.trim();
            if index.parse::<u32>().is_err() {
                return None;
            }
            let name = parts.next()?.trim();
            // Strip VLAN-style suffixes like eth0@if2.
            Some(name.split('@').next().unwrap_or(name).to_string())
        })
        .collect()
}

/// `iw dev ... station dump | grep Station | wc -l` output: a bare count.
pub fn parse_station_count(text: &str) -> u32 {
    text.trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal: 64000 kB\nMemFree: 8000 kB\nMemAvailable: 16000 kB\nBuffers: 2000 kB\nCached: 4000 kB";

    #[test]
    fn meminfo_prefers_mem_available() {
        let usage = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(usage.total, 64000);
        assert_eq!(usage.free, 16000);
        assert_eq!(usage.used, 48000);
        assert_eq!(usage.percentage, 75);
    }

    #[test]
    fn meminfo_reconstructs_available_on_old_kernels() {
        let text = "MemTotal: 64000 kB\nMemFree: 8000 kB\nBuffers: 2000 kB\nCached: 4000 kB";
        let usage = parse_meminfo(text).unwrap();
        assert_eq!(usage.free, 14000);
        assert_eq!(usage.used, 50000);
        assert_eq!(usage.percentage, 78);
    }

    #[test]
    fn meminfo_without_total_is_a_miss() {
        assert!(parse_meminfo("MemFree: 8000 kB").is_none());
        assert!(parse_meminfo("").is_none());
    }

    #[test]
    fn free_fallback_reads_the_mem_row() {
        let text = "              total        used        free\nMem:         125952      101076       24876";
        let usage = parse_free_line(text).unwrap();
        assert_eq!(usage.total, 125952);
        assert_eq!(usage.used, 101076);
        assert_eq!(usage.free, 24876);
        assert_eq!(usage.percentage, 80);
    }

    #[test]
    fn loadavg_takes_the_one_minute_field() {
        assert_eq!(parse_loadavg("0.52 0.48 0.45 1/78 1234"), Some(0.52));
        assert_eq!(parse_loadavg("garbage"), None);
    }

    #[test]
    fn uptime_fallback_extracts_the_load() {
        let text = " 14:21:33 up 42 days,  3:17,  load average: 1.05, 0.70, 0.55";
        assert_eq!(parse_uptime_load(text), Some(1.05));
        assert_eq!(parse_uptime_load("no load here"), None);
    }

    #[test]
    fn top_percentage_scales_to_a_load_value() {
        assert_eq!(parse_top_cpu("12.5"), Some(0.125));
        assert_eq!(parse_top_cpu("-3"), None);
    }

    #[test]
    fn sizes_accept_every_documented_unit() {
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("1K"), Some(1024));
        assert_eq!(parse_size("1kb"), Some(1024));
        assert_eq!(parse_size("1.5M"), Some(1_572_864));
        assert_eq!(parse_size("2GB"), Some(2_147_483_648));
        assert_eq!(parse_size("1t"), Some(1_099_511_627_776));
        assert_eq!(parse_size("98.3M"), Some(103_078_298));
        assert_eq!(parse_size("12X"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn size_round_trip_stays_within_one_percent() {
        for raw in ["98.3M", "49.1M", "7.2G", "512K", "1.0T", "300"] {
            let bytes = parse_size(raw).unwrap();
            let reparsed = parse_size(&format_size(bytes)).unwrap();
            let drift = (reparsed as f64 - bytes as f64).abs() / bytes as f64;
            assert!(drift < 0.01, "{} drifted {:.4}", raw, drift);
        }
    }

    #[test]
    fn df_line_keeps_the_raw_strings() {
        let disk = parse_df_line("rootfs 98.3M 49.1M 49.2M 50% /").unwrap();
        assert_eq!(disk.percentage, 50);
        assert_eq!(disk.total_raw, "98.3M");
        assert_eq!(disk.used_raw, "49.1M");
        assert_eq!(disk.free_raw, "49.2M");
        // 49.1M in 1024-based bytes, within rounding tolerance.
        let reference = 51_498_189f64;
        assert!((disk.used as f64 - reference).abs() / reference < 0.01);
    }

    #[test]
    fn df_line_tolerates_a_missing_filesystem_column() {
        let disk = parse_df_line("7.2G 3.1G 3.8G 45% /overlay").unwrap();
        assert_eq!(disk.percentage, 45);
        assert_eq!(disk.total_raw, "7.2G");
    }

    #[test]
    fn df_garbage_is_a_miss() {
        assert!(parse_df_line("df: /: No such file or directory").is_none());
        assert!(parse_df_line("").is_none());
    }

    const BUSYBOX_IFCONFIG: &str = "\
br-lan    Link encap:Ethernet  HWaddr AA:BB:CC:DD:EE:FF
          inet addr:192.168.1.1  Bcast:192.168.1.255  Mask:255.255.255.0
          UP BROADCAST RUNNING MULTICAST  MTU:1500  Metric:1
          RX bytes:123456 (120.5 KiB)  TX bytes:654321 (639.0 KiB)

wlan0     Link encap:Ethernet  HWaddr 11:22:33:44:55:66
          MTU:1500  Metric:1
          RX bytes:0 (0.0 B)  TX bytes:0 (0.0 B)
";

    #[test]
    fn busybox_ifconfig_blocks_parse() {
        let interfaces = parse_ifconfig(BUSYBOX_IFCONFIG);
        assert_eq!(interfaces.len(), 2);

        let lan = &interfaces[0];
        assert_eq!(lan.name, "br-lan");
        assert_eq!(lan.ipv4.as_deref(), Some("192.168.1.1"));
        assert_eq!(lan.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(lan.rx_bytes, 123456);
        assert_eq!(lan.tx_bytes, 654321);
        assert_eq!(lan.status, "up");

        let wifi = &interfaces[1];
        assert_eq!(wifi.name, "wlan0");
        assert!(wifi.ipv4.is_none());
        assert_eq!(wifi.status, "down");
    }

    #[test]
    fn net_tools_ifconfig_blocks_parse() {
        let text = "\
eth0: flags=4163<UP,BROADCAST,RUNNING,MULTICAST>  mtu 1500
        inet 10.0.0.5  netmask 255.255.255.0  broadcast 10.0.0.255
        ether de:ad:be:ef:00:01  txqueuelen 1000  (Ethernet)
";
        let interfaces = parse_ifconfig(text);
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].name, "eth0");
        assert_eq!(interfaces[0].ipv4.as_deref(), Some("10.0.0.5"));
        assert_eq!(interfaces[0].mac.as_deref(), Some("de:ad:be:ef:00:01"));
        assert_eq!(interfaces[0].status, "up");
    }

    #[test]
    fn bare_mac_from_sysfs_is_accepted() {
        assert_eq!(
            mac_in_text("A4:B1:C2:D3:E4:F5\n"),
            Some("a4:b1:c2:d3:e4:f5".to_string())
        );
    }

    #[test]
    fn ip_addr_show_builds_a_partial_interface() {
        let text = "\
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP
    link/ether 00:11:22:33:44:55 brd ff:ff:ff:ff:ff:ff
    inet 192.168.1.10/24 brd 192.168.1.255 scope global eth0
";
        let interface = interface_from_ip_addr("eth0", text);
        assert_eq!(interface.name, "eth0");
        assert_eq!(interface.ipv4.as_deref(), Some("192.168.1.10"));
        assert_eq!(interface.mac.as_deref(), Some("00:11:22:33:44:55"));
        assert_eq!(interface.status, "up");
        assert_eq!(interface.rx_bytes, 0);
    }

    #[test]
    fn ip_link_names_strip_indexes_and_suffixes() {
        let text = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500
3: eth0.2@eth0: <BROADCAST,MULTICAST,UP> mtu 1500
";
        assert_eq!(parse_ip_link_names(text), vec!["lo", "eth0", "eth0.2"]);
    }

    #[test]
    fn station_count_is_zero_on_garbage() {
        assert_eq!(parse_station_count("3\n"), 3);
        assert_eq!(parse_station_count("iw: not found"), 0);
    }

    #[test]
    fn sentinel_records_are_structurally_complete() {
        let record = MetricRecord::sentinel("Device not reachable");
        assert_eq!(record.cpu_load, 0.0);
        assert_eq!(record.memory_usage.percentage, 0);
        assert!(record.network_interfaces.is_empty());
        assert_eq!(record.error.as_deref(), Some("Device not reachable"));
    }
}
