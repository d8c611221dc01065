//! Parsing of the human-readable figures `docker stats` prints.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use toolcell_application::RuntimeError;
use toolcell_domain::ContainerStats;

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([0-9]+(?:\.[0-9]+)?)\s*([A-Za-z]*)\s*$").unwrap_or_else(|e| panic!("invalid regex: {}", e))
});

/// `"90.2%"` → `90.2`. `"--"` (container not running) → `0`.
pub fn parse_percent(raw: &str) -> Result<f64, RuntimeError> {
    let trimmed = raw.trim();
    if trimmed == "--" || trimmed.is_empty() {
        return Ok(0.0);
    }
    trimmed
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .map_err(|_| RuntimeError::Parse(format!("invalid percentage '{}'", raw)))
}

/// `"1.5MiB"` → `1572864`; `"1.2kB"` → `1200`. Binary (`KiB`) and decimal
/// (`kB`) suffixes are both accepted.
pub fn parse_bytes(raw: &str) -> Result<u64, RuntimeError> {
    let invalid = || RuntimeError::Parse(format!("invalid byte quantity '{}'", raw));
    if raw.trim() == "--" {
        return Ok(0);
    }
    let caps = QUANTITY.captures(raw).ok_or_else(invalid)?;
    let value: f64 = caps[1].parse().map_err(|_| invalid())?;
    let multiplier: f64 = match caps[2].to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" | "k" => 1e3,
        "mb" | "m" => 1e6,
        "gb" | "g" => 1e9,
        "tb" | "t" => 1e12,
        "kib" => 1024.0,
        "mib" => 1024.0 * 1024.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return Err(invalid()),
    };
    Ok((value * multiplier).round() as u64)
}

/// `"1.5MiB / 2GiB"` → `(used, limit)`.
pub fn parse_pair(raw: &str) -> Result<(u64, u64), RuntimeError> {
    let (a, b) = raw
        .split_once('/')
        .ok_or_else(|| RuntimeError::Parse(format!("expected 'a / b', got '{}'", raw)))?;
    Ok((parse_bytes(a)?, parse_bytes(b)?))
}

/// One line of `docker stats --no-stream --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct StatsLine {
    #[serde(rename = "CPUPerc")]
    cpu: String,
    #[serde(rename = "MemUsage")]
    memory: String,
    #[serde(rename = "NetIO")]
    network: String,
    #[serde(rename = "PIDs")]
    pids: String,
}

pub fn parse_stats_line(line: &str) -> Result<ContainerStats, RuntimeError> {
    let raw: StatsLine =
        serde_json::from_str(line.trim()).map_err(|e| RuntimeError::Parse(format!("stats: {}", e)))?;
    let (memory_used_bytes, memory_limit_bytes) = parse_pair(&raw.memory)?;
    let (network_rx_bytes, network_tx_bytes) = parse_pair(&raw.network)?;
    let processes = match raw.pids.trim() {
        "--" | "" => 0,
        pids => pids
            .parse()
            .map_err(|_| RuntimeError::Parse(format!("invalid PIDs '{}'", pids)))?,
    };
    Ok(ContainerStats {
        cpu_percent: parse_percent(&raw.cpu)?,
        memory_used_bytes,
        memory_limit_bytes,
        network_rx_bytes,
        network_tx_bytes,
        processes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("90.2%").unwrap(), 90.2);
        assert_eq!(parse_percent("0.00%").unwrap(), 0.0);
        assert_eq!(parse_percent("--").unwrap(), 0.0);
        assert!(parse_percent("lots").is_err());
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("1.5MiB").unwrap(), 1_572_864);
        assert_eq!(parse_bytes("2GiB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_bytes("1.2kB").unwrap(), 1200);
        assert_eq!(parse_bytes("3MB").unwrap(), 3_000_000);
        assert_eq!(parse_bytes("0B").unwrap(), 0);
        assert!(parse_bytes("12 parsecs").is_err());
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("1.5MiB / 2GiB").unwrap(), (1_572_864, 2_147_483_648));
        assert!(parse_pair("1.5MiB").is_err());
    }

    #[test]
    fn test_parse_stats_line() {
        let line = r#"{"BlockIO":"0B / 0B","CPUPerc":"95.00%","Container":"abc","ID":"abc","MemPerc":"0.08%","MemUsage":"1.5MiB / 2GiB","Name":"toolcell-x","NetIO":"1.2kB / 3MB","PIDs":"3"}"#;
        let stats = parse_stats_line(line).unwrap();
        assert_eq!(stats.cpu_percent, 95.0);
        assert_eq!(stats.memory_used_bytes, 1_572_864);
        assert_eq!(stats.memory_limit_bytes, 2_147_483_648);
        assert_eq!(stats.network_rx_bytes, 1200);
        assert_eq!(stats.network_tx_bytes, 3_000_000);
        assert_eq!(stats.processes, 3);
    }
}
