pub mod routers;
pub mod scanner;

use crate::error::ApiError;
use crate::scanner::jobs::ScanJobRegistry;
use crate::services::repository::Repository;
use crate::services::scheduler::MetricsScheduler;
use std::net::Ipv4Addr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub jobs: Arc<ScanJobRegistry>,
    pub scheduler: Arc<MetricsScheduler>,
}

pub fn validate_ipv4(address: &str) -> Result<(), ApiError> {
    address
        .parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| ApiError::Validation(format!("invalid IPv4 address: {}", address)))
}

pub fn validate_port(port: u16) -> Result<(), ApiError> {
    if port == 0 {
        return Err(ApiError::Validation("port must be in [1, 65535]".into()));
    }
    Ok(())
}

pub fn validate_retention_days(days: i32) -> Result<(), ApiError> {
    if !(1..=365).contains(&days) {
        return Err(ApiError::Validation(
            "metricsRetentionDays must be in [1, 365]".into(),
        ));
    }
    Ok(())
}

/// Accepts "192.168.1" or "192.168.1." and yields the trailing-dot form.
pub fn normalize_subnet(subnet: &str) -> Result<String, ApiError> {
    let trimmed = subnet.trim().trim_end_matches('.');
    let octets: Vec<&str> = trimmed.split('.').collect();
    if octets.len() == 3 && octets.iter().all(|o| o.parse::<u8>().is_ok()) {
        return Ok(format!("{}.", trimmed));
    }
    Err(ApiError::Validation(format!(
        "invalid subnet prefix: {}",
        subnet
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_must_be_a_dotted_quad() {
        assert!(validate_ipv4("192.168.1.1").is_ok());
        assert!(validate_ipv4("192.168.1").is_err());
        assert!(validate_ipv4("192.168.1.256").is_err());
        assert!(validate_ipv4("router.lan").is_err());
    }

    #[test]
    fn subnet_normalises_to_trailing_dot() {
        assert_eq!(normalize_subnet("192.168.1").unwrap(), "192.168.1.");
        assert_eq!(normalize_subnet("192.168.1.").unwrap(), "192.168.1.");
        assert_eq!(normalize_subnet("10.0.0").unwrap(), "10.0.0.");
        assert!(normalize_subnet("192.168").is_err());
        assert!(normalize_subnet("192.168.1.0/24").is_err());
        assert!(normalize_subnet("a.b.c").is_err());
    }

    #[test]
    fn retention_window_is_bounded() {
        assert!(validate_retention_days(1).is_ok());
        assert!(validate_retention_days(365).is_ok());
        assert!(validate_retention_days(0).is_err());
        assert!(validate_retention_days(366).is_err());
    }

    #[test]
    fn port_zero_is_rejected() {
        assert!(validate_port(22).is_ok());
        assert!(validate_port(0).is_err());
    }
}
